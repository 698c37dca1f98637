//! The device link facade the UI talks to.
//!
//! Owns the series store, the recording flag, and at most one connection
//! session. Presentation concerns stay outside: the UI subscribes to
//! redraw-needed and state-changed events and reads the store when it paints.

use crate::config::LinkConfig;
use crate::error::{LinkError, SocketErrorCode};
use crate::ingest::{IngestLoop, IngestStats, RedrawCallback, SharedSeries, StatsSnapshot};
use crate::session::{control_target, handshake, ConnectionSession, Connector, SessionState, TcpConnector};
use birdview_ingest_core::{channel, FrameSource, IngestError, SampleTx, TransportMode};
use birdview_ingest_tcp::StreamSource;
use birdview_ingest_udp::DatagramSource;
use model::{Axis, SeriesRange, SeriesStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateChange {
    pub state: SessionState,
    pub status: String,
}

impl StateChange {
    fn new(state: SessionState, status: impl Into<String>) -> Self {
        Self { state, status: status.into() }
    }
}

pub type StateCallback = Arc<dyn Fn(&StateChange) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    redraw: Mutex<Vec<RedrawCallback>>,
    state: Mutex<Vec<StateCallback>>,
}

impl Listeners {
    // callbacks run outside the lock so they may call back into the link
    fn redraw(&self) {
        let cbs = self.redraw.lock().clone();
        for cb in cbs {
            cb();
        }
    }

    fn state(&self, change: &StateChange) {
        tracing::info!(state = ?change.state, status = %change.status, "link state changed");
        let cbs = self.state.lock().clone();
        for cb in cbs {
            cb(change);
        }
    }
}

struct Active {
    session: ConnectionSession,
    tasks: Vec<JoinHandle<()>>,
    data_addr: Option<SocketAddr>,
}

impl Active {
    fn stop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

enum Slot {
    Idle,
    /// Replacing the slot drops the sender, which cancels the handshake.
    Connecting(Uuid, oneshot::Sender<()>),
    Connected(Active),
}

struct Shared {
    config: LinkConfig,
    store: SharedSeries,
    recording: Arc<AtomicBool>,
    axis: Mutex<Axis>,
    slot: Mutex<Slot>,
    listeners: Arc<Listeners>,
    stats: Arc<IngestStats>,
}

impl Shared {
    /// Called by transport tasks when their connection ends.
    fn transport_closed(&self, id: Uuid, result: Result<(), IngestError>) {
        let mut active = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Connected(a) if a.session.id() == id => {}
                _ => return,
            }
            match std::mem::replace(&mut *slot, Slot::Idle) {
                Slot::Connected(a) => a,
                _ => return,
            }
        };

        let change = match result {
            Ok(()) => {
                active.session.disconnect();
                StateChange::new(SessionState::Idle, "Disconnected")
            }
            Err(IngestError::Socket(e)) => {
                let code = SocketErrorCode::from(&e);
                tracing::warn!(%code, error = %e, "socket error while connected");
                active.session.fail(code);
                StateChange::new(SessionState::Idle, format!("Disconnected: Socket error {}", code))
            }
            Err(e) => {
                tracing::warn!(error = %e, "transport stopped");
                active.session.disconnect();
                StateChange::new(SessionState::Idle, format!("Disconnected: {}", e))
            }
        };
        active.stop();
        self.listeners.state(&change);
    }

    fn is_connecting(&self, id: Uuid) -> bool {
        matches!(&*self.slot.lock(), Slot::Connecting(cur, _) if *cur == id)
    }

    /// Leaves `Connecting(id)` after a failed attempt. False if a disconnect got there first.
    fn abandon(&self, id: Uuid) -> bool {
        let mut slot = self.slot.lock();
        if matches!(&*slot, Slot::Connecting(cur, _) if *cur == id) {
            *slot = Slot::Idle;
            true
        } else {
            false
        }
    }
}

fn spawn_source<S>(shared: Arc<Shared>, id: Uuid, mut source: S, tx: SampleTx) -> JoinHandle<()>
where
    S: FrameSource + 'static,
{
    tokio::spawn(async move {
        let result = source.run(tx, &*shared.stats).await;
        shared.transport_closed(id, result);
    })
}

/// Datagram mode keeps the control connection open; watch it for close and errors.
fn spawn_control_watch(shared: Arc<Shared>, id: Uuid, mut stream: TcpStream) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut buf = [0u8; 256];
        let result = loop {
            match stream.read(&mut buf).await {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) => break Err(IngestError::from(e)),
            }
        };
        shared.transport_closed(id, result);
    })
}

pub struct DeviceLink {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
}

impl DeviceLink {
    pub fn new(config: LinkConfig) -> Self {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    pub fn with_connector(config: LinkConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                store: Arc::new(Mutex::new(SeriesStore::new())),
                recording: Arc::new(AtomicBool::new(false)),
                axis: Mutex::new(Axis::default()),
                slot: Mutex::new(Slot::Idle),
                listeners: Arc::new(Listeners::default()),
                stats: Arc::new(IngestStats::default()),
            }),
            connector,
        }
    }

    pub fn config(&self) -> &LinkConfig {
        &self.shared.config
    }

    /// Runs the handshake and starts ingest. Must be called inside a tokio runtime.
    pub async fn connect(&self, address: &str) -> Result<SocketAddr, LinkError> {
        let shared = &self.shared;
        let target = control_target(address, shared.config.control_port)?;
        let mut session = ConnectionSession::new(target.clone(), &shared.config);
        let id = session.id();

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        {
            let mut slot = shared.slot.lock();
            let busy = match &*slot {
                Slot::Idle => None,
                Slot::Connecting(..) => Some(SessionState::Connecting),
                Slot::Connected(_) => Some(SessionState::Connected),
            };
            if let Some(state) = busy {
                return Err(LinkError::InvalidState { op: "connect", state });
            }
            *slot = Slot::Connecting(id, cancel_tx);
        }
        shared
            .listeners
            .state(&StateChange::new(SessionState::Connecting, format!("Connecting to {}", target)));

        let attempt = handshake(&mut session, self.connector.connect(&target), cancel_rx);
        let (stream, peer) = match attempt.await {
            Ok(done) => done,
            Err(e) => {
                if shared.abandon(id) {
                    let change = match &e {
                        LinkError::ConnectTimeout { .. } => StateChange::new(SessionState::TimedOut, "Timed out"),
                        other => StateChange::new(session.state(), format!("Connection failed: {}", other)),
                    };
                    shared.listeners.state(&change);
                }
                return Err(e);
            }
        };
        if !shared.is_connecting(id) {
            return Err(LinkError::Cancelled(target));
        }

        enum Transport {
            Stream(TcpStream),
            Datagram(DatagramSource, TcpStream),
        }
        let transport = match shared.config.mode {
            TransportMode::Stream => Transport::Stream(stream),
            TransportMode::Datagram => {
                let bind = SocketAddr::from((Ipv4Addr::UNSPECIFIED, shared.config.data_port));
                match DatagramSource::bind(bind).await {
                    Ok(source) => Transport::Datagram(source, stream),
                    Err(e) => {
                        if shared.abandon(id) {
                            shared.listeners.state(&StateChange::new(
                                SessionState::Failed,
                                format!("Connection failed: data channel {}", e),
                            ));
                        }
                        return Err(LinkError::DataChannel(e));
                    }
                }
            }
        };

        let (tx, rx) = channel();
        let listeners = shared.listeners.clone();
        let ingest = IngestLoop::new(
            shared.store.clone(),
            shared.recording.clone(),
            shared.config.redraw_every,
            shared.stats.clone(),
            Arc::new(move || listeners.redraw()),
        );
        if let Err(e) = ingest.spawn(rx) {
            if shared.abandon(id) {
                shared
                    .listeners
                    .state(&StateChange::new(SessionState::Failed, format!("Connection failed: {}", e)));
            }
            return Err(LinkError::IngestThread(e));
        }

        {
            // tasks start under the lock so an early close finds the session installed
            let mut slot = shared.slot.lock();
            if !matches!(&*slot, Slot::Connecting(cur, _) if *cur == id) {
                return Err(LinkError::Cancelled(target));
            }
            let mut active = Active { session, tasks: Vec::new(), data_addr: None };
            match transport {
                Transport::Stream(stream) => {
                    active.tasks.push(spawn_source(shared.clone(), id, StreamSource::new(stream), tx));
                }
                Transport::Datagram(source, stream) => {
                    active.data_addr = source.local_addr().ok();
                    active.tasks.push(spawn_source(shared.clone(), id, source, tx));
                    active.tasks.push(spawn_control_watch(shared.clone(), id, stream));
                }
            }
            *slot = Slot::Connected(active);
        }
        tracing::info!(session = %id, %peer, mode = ?shared.config.mode, "ingest started");
        shared
            .listeners
            .state(&StateChange::new(SessionState::Connected, format!("Connected to {}", peer)));
        Ok(peer)
    }

    /// Stops ingest and releases the transport without waiting on in-flight reads.
    pub fn disconnect(&self) {
        let prev = std::mem::replace(&mut *self.shared.slot.lock(), Slot::Idle);
        match prev {
            Slot::Idle => {}
            Slot::Connecting(..) => {
                self.shared.listeners.state(&StateChange::new(SessionState::Idle, "Disconnected"));
            }
            Slot::Connected(mut active) => {
                active.session.disconnect();
                active.stop();
                self.shared.listeners.state(&StateChange::new(SessionState::Idle, "Disconnected"));
            }
        }
    }

    pub fn state(&self) -> SessionState {
        match &*self.shared.slot.lock() {
            Slot::Idle => SessionState::Idle,
            Slot::Connecting(..) => SessionState::Connecting,
            Slot::Connected(a) => a.session.state(),
        }
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        match &*self.shared.slot.lock() {
            Slot::Connected(a) => a.session.peer(),
            _ => None,
        }
    }

    /// Local address of the UDP data socket while connected in datagram mode.
    pub fn data_addr(&self) -> Option<SocketAddr> {
        match &*self.shared.slot.lock() {
            Slot::Connected(a) => a.data_addr,
            _ => None,
        }
    }

    /// Flips the recording flag and returns the new value.
    pub fn toggle_recording(&self) -> bool {
        let now = !self.shared.recording.fetch_xor(true, Ordering::AcqRel);
        tracing::info!(recording = now, "recording toggled");
        now
    }

    pub fn is_recording(&self) -> bool {
        self.shared.recording.load(Ordering::Acquire)
    }

    /// Drops all samples and stops recording. Confirmation is the caller's job.
    pub fn clear_data(&self) {
        {
            let mut store = self.shared.store.lock();
            self.shared.recording.store(false, Ordering::Release);
            store.clear();
        }
        tracing::info!("series cleared");
        self.shared.listeners.redraw();
    }

    pub fn export(&self, path: &Path) -> Result<usize, LinkError> {
        let lines = iox::export_file(&self.shared.store.lock(), path)?;
        tracing::info!(path = %path.display(), lines, "exported series");
        Ok(lines)
    }

    pub fn select_axis(&self, axis: Axis) {
        *self.shared.axis.lock() = axis;
        self.shared.listeners.redraw();
    }

    pub fn selected_axis(&self) -> Axis {
        *self.shared.axis.lock()
    }

    pub fn selected_series(&self, axis: Axis) -> Vec<(f64, f64)> {
        self.shared.store.lock().channel(axis).collect()
    }

    /// Iterates one channel under the store lock without copying it.
    pub fn with_series<R>(&self, axis: Axis, f: impl FnOnce(&mut dyn Iterator<Item = (f64, f64)>) -> R) -> R {
        let store = self.shared.store.lock();
        let mut it = store.channel(axis);
        f(&mut it)
    }

    pub fn range(&self) -> Option<SeriesRange> {
        self.shared.store.lock().range()
    }

    /// Direct handle on the store, for painting.
    pub fn series(&self) -> SharedSeries {
        self.shared.store.clone()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    pub fn on_redraw_needed(&self, cb: impl Fn() + Send + Sync + 'static) {
        self.shared.listeners.redraw.lock().push(Arc::new(cb));
    }

    pub fn on_state_changed(&self, cb: impl Fn(&StateChange) + Send + Sync + 'static) {
        self.shared.listeners.state.lock().push(Arc::new(cb));
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        self.disconnect();
    }
}
