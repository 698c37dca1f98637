//! Connection handshake state machine.
//!
//! The handshake is driven by a fixed poll tick rather than a single
//! connect-with-deadline: the connect attempt runs alongside a ticker, a
//! socket error fails the attempt as soon as it is reported, and a completed
//! connect is confirmed on the next tick. After `connect_timeout` worth of
//! ticks without a connection the attempt times out.

use crate::config::LinkConfig;
use crate::error::{LinkError, SocketErrorCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Failed,
    TimedOut,
}

/// Opens the control connection to the device.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &str) -> io::Result<TcpStream>;
}

pub struct TcpConnector;

#[async_trait::async_trait]
impl Connector for TcpConnector {
    async fn connect(&self, target: &str) -> io::Result<TcpStream> {
        TcpStream::connect(target).await
    }
}

/// Turns user input into a `host:port` target. A bare host or IP gets `default_port`.
pub fn control_target(address: &str, default_port: u16) -> Result<String, LinkError> {
    let address = address.trim();
    if address.is_empty() {
        return Err(LinkError::InvalidAddress(address.to_string()));
    }
    if address.parse::<SocketAddr>().is_ok() {
        return Ok(address.to_string());
    }
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port).to_string());
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
            Ok(address.to_string())
        }
        Some(_) => Err(LinkError::InvalidAddress(address.to_string())),
        None => Ok(format!("{}:{}", address, default_port)),
    }
}

#[derive(Debug)]
pub struct ConnectionSession {
    id: Uuid,
    target: String,
    state: SessionState,
    poll_interval: Duration,
    timeout: Duration,
    waited: Duration,
    peer: Option<SocketAddr>,
    error: Option<SocketErrorCode>,
}

impl ConnectionSession {
    pub fn new(target: impl Into<String>, cfg: &LinkConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: target.into(),
            state: SessionState::Idle,
            poll_interval: cfg.poll_interval(),
            timeout: cfg.connect_timeout(),
            waited: Duration::ZERO,
            peer: None,
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn last_error(&self) -> Option<SocketErrorCode> {
        self.error
    }

    pub fn begin(&mut self) -> Result<(), LinkError> {
        if self.state != SessionState::Idle {
            return Err(LinkError::InvalidState { op: "connect", state: self.state });
        }
        self.state = SessionState::Connecting;
        self.waited = Duration::ZERO;
        self.error = None;
        Ok(())
    }

    /// One poll tick. `established` is the peer address if the transport reports connected.
    pub fn poll(&mut self, established: Option<SocketAddr>) -> SessionState {
        if self.state != SessionState::Connecting {
            return self.state;
        }
        if let Some(peer) = established {
            self.peer = Some(peer);
            self.state = SessionState::Connected;
            return self.state;
        }
        self.waited += self.poll_interval;
        if self.waited >= self.timeout {
            self.state = SessionState::TimedOut;
        }
        self.state
    }

    /// A socket error event. Fails a pending handshake, drops an established session.
    pub fn fail(&mut self, code: SocketErrorCode) -> SessionState {
        match self.state {
            SessionState::Connecting => {
                self.error = Some(code);
                self.state = SessionState::Failed;
            }
            SessionState::Connected => {
                self.error = Some(code);
                self.peer = None;
                self.state = SessionState::Idle;
            }
            _ => {}
        }
        self.state
    }

    pub fn disconnect(&mut self) -> SessionState {
        self.peer = None;
        self.state = SessionState::Idle;
        self.state
    }
}

fn failed(session: &mut ConnectionSession, e: &io::Error) -> LinkError {
    let code = SocketErrorCode::from(e);
    session.fail(code);
    tracing::warn!(%code, error = %e, "handshake failed");
    LinkError::ConnectFailed {
        target: session.target().to_string(),
        code,
        message: e.to_string(),
    }
}

/// Runs the handshake for `session` against an in-flight `connect`.
///
/// Resolves to the stream and its peer once a tick confirms the connection.
/// If `cancelled` completes first the attempt is dropped and the session
/// goes back to `Idle`.
pub async fn handshake<F, C>(
    session: &mut ConnectionSession,
    connect: F,
    cancelled: C,
) -> Result<(TcpStream, SocketAddr), LinkError>
where
    F: Future<Output = io::Result<TcpStream>>,
    C: Future,
{
    session.begin()?;
    let span = tracing::info_span!("handshake", session = %session.id(), target = %session.target());

    async move {
        tokio::pin!(connect);
        tokio::pin!(cancelled);
        let period = session.poll_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut established: Option<TcpStream> = None;

        loop {
            tokio::select! {
                _ = &mut cancelled => {
                    session.disconnect();
                    tracing::info!("handshake cancelled");
                    return Err(LinkError::Cancelled(session.target().to_string()));
                }
                res = &mut connect, if established.is_none() => match res {
                    Ok(stream) => established = Some(stream),
                    Err(e) => return Err(failed(session, &e)),
                },
                _ = ticker.tick() => {
                    let peer = match established.as_ref().map(|s| s.peer_addr()) {
                        Some(Ok(addr)) => Some(addr),
                        Some(Err(e)) => return Err(failed(session, &e)),
                        None => None,
                    };
                    match session.poll(peer) {
                        SessionState::Connected => {
                            if let (Some(stream), Some(peer)) = (established.take(), peer) {
                                tracing::info!(%peer, "connected");
                                return Ok((stream, peer));
                            }
                        }
                        SessionState::TimedOut => {
                            tracing::warn!(waited_ms = session.waited().as_millis() as u64, "timed out");
                            return Err(LinkError::ConnectTimeout {
                                target: session.target().to_string(),
                                waited_ms: session.waited().as_millis() as u64,
                            });
                        }
                        _ => {}
                    }
                }
            }
        }
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::net::Ipv4Addr;

    fn cfg() -> LinkConfig {
        LinkConfig::default()
    }

    #[test]
    fn test_control_target_defaults_port() {
        assert_eq!(control_target("192.168.1.5", 1998).unwrap(), "192.168.1.5:1998");
        assert_eq!(control_target(" 10.0.0.2:4000 ", 1998).unwrap(), "10.0.0.2:4000");
        assert_eq!(control_target("::1", 1998).unwrap(), "[::1]:1998");
        assert_eq!(control_target("phone.local", 1998).unwrap(), "phone.local:1998");
        assert_eq!(control_target("phone.local:7", 1998).unwrap(), "phone.local:7");
        assert!(control_target("", 1998).is_err());
        assert!(control_target("host:notaport", 1998).is_err());
    }

    #[test]
    fn test_poll_times_out_after_budget() {
        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        for _ in 0..19 {
            assert_eq!(s.poll(None), SessionState::Connecting);
        }
        assert_eq!(s.poll(None), SessionState::TimedOut);
        assert_eq!(s.waited(), Duration::from_millis(10_000));
        // terminal
        assert_eq!(s.poll(Some(SocketAddr::from((Ipv4Addr::LOCALHOST, 1)))), SessionState::TimedOut);
    }

    #[test]
    fn test_poll_checks_transport_before_timeout() {
        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        for _ in 0..19 {
            s.poll(None);
        }
        let peer = SocketAddr::from((Ipv4Addr::LOCALHOST, 1998));
        assert_eq!(s.poll(Some(peer)), SessionState::Connected);
        assert_eq!(s.peer(), Some(peer));
    }

    #[test]
    fn test_error_event_fails_handshake_and_drops_connection() {
        let code = SocketErrorCode::Kind(io::ErrorKind::ConnectionRefused);
        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        assert_eq!(s.fail(code), SessionState::Failed);
        assert_eq!(s.last_error(), Some(code));

        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        s.poll(Some(SocketAddr::from((Ipv4Addr::LOCALHOST, 1998))));
        assert_eq!(s.fail(code), SessionState::Idle);
        assert_eq!(s.peer(), None);
    }

    #[test]
    fn test_no_error_means_no_failure() {
        // a fresh session must keep waiting, not fail on the first tick
        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        assert_eq!(s.poll(None), SessionState::Connecting);
        assert_eq!(s.last_error(), None);
    }

    #[test]
    fn test_begin_twice_is_rejected() {
        let mut s = ConnectionSession::new("x:1", &cfg());
        s.begin().unwrap();
        assert!(matches!(s.begin(), Err(LinkError::InvalidState { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_times_out_when_connect_never_completes() {
        let mut s = ConnectionSession::new("10.255.255.1:1998", &cfg());
        let started = Instant::now();
        let res = handshake(&mut s, pending::<io::Result<TcpStream>>(), pending::<()>()).await;

        assert!(matches!(res, Err(LinkError::ConnectTimeout { waited_ms: 10_000, .. })));
        assert_eq!(s.state(), SessionState::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(10_000));
        assert!(elapsed <= Duration::from_millis(10_500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_fails_on_socket_error() {
        let mut s = ConnectionSession::new("127.0.0.1:1", &cfg());
        let refused = async { Err(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")) };
        let started = Instant::now();
        let res = handshake(&mut s, refused, pending::<()>()).await;

        match res {
            Err(LinkError::ConnectFailed { code, .. }) => {
                assert_eq!(code, SocketErrorCode::Kind(io::ErrorKind::ConnectionRefused))
            }
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert_eq!(s.state(), SessionState::Failed);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_handshake_confirms_on_tick() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accept = tokio::spawn(async move { listener.accept().await.map(|(s, _)| s) });

        let mut c = cfg();
        c.poll_interval_ms = 20;
        let mut s = ConnectionSession::new(addr.to_string(), &c);
        let (stream, peer) = handshake(&mut s, TcpConnector.connect(&addr.to_string()), pending::<()>())
            .await
            .unwrap();

        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.peer(), Some(addr));
        assert_eq!(peer, addr);
        assert_eq!(stream.peer_addr().unwrap(), addr);
        accept.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_stops_when_cancelled() {
        let mut s = ConnectionSession::new("10.255.255.1:1998", &cfg());
        let started = Instant::now();
        let cancel = time::sleep(Duration::from_millis(100));
        let res = handshake(&mut s, pending::<io::Result<TcpStream>>(), cancel).await;

        assert!(matches!(res, Err(LinkError::Cancelled(ref t)) if t == "10.255.255.1:1998"));
        assert_eq!(s.state(), SessionState::Idle);
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
