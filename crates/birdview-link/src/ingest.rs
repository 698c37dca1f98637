use birdview_ingest_core::{SampleRx, SourceStats};
use model::{Sample, SeriesStore};
use parking_lot::Mutex;
use serde::Serialize;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

pub type SharedSeries = Arc<Mutex<SeriesStore>>;
pub type RedrawCallback = Arc<dyn Fn() + Send + Sync>;

#[derive(Debug, Default)]
pub struct IngestStats {
    frames: AtomicU64,
    decode_errors: AtomicU64,
    discarded: AtomicU64,
    inserted: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub frames: u64,
    pub decode_errors: u64,
    /// decoded while not recording
    pub discarded: u64,
    pub inserted: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames: self.frames.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
            inserted: self.inserted.load(Ordering::Relaxed),
        }
    }
}

impl SourceStats for IngestStats {
    fn frame_received(&self) {
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    fn decode_failed(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }
}

/// Decimates redraw requests: fires on every `every`-th call.
#[derive(Debug, Clone)]
pub struct RedrawThrottle {
    every: u32,
    seen: u32,
}

impl RedrawThrottle {
    pub fn new(every: u32) -> Self {
        Self { every: every.max(1), seen: 0 }
    }

    pub fn tick(&mut self) -> bool {
        self.seen += 1;
        if self.seen >= self.every {
            self.seen = 0;
            true
        } else {
            false
        }
    }
}

/// Consumes decoded samples: recording gate, store insert, throttled redraw.
pub struct IngestLoop {
    store: SharedSeries,
    recording: Arc<AtomicBool>,
    throttle: RedrawThrottle,
    stats: Arc<IngestStats>,
    on_redraw: RedrawCallback,
}

impl IngestLoop {
    pub fn new(
        store: SharedSeries,
        recording: Arc<AtomicBool>,
        redraw_every: u32,
        stats: Arc<IngestStats>,
        on_redraw: RedrawCallback,
    ) -> Self {
        Self {
            store,
            recording,
            throttle: RedrawThrottle::new(redraw_every),
            stats,
            on_redraw,
        }
    }

    /// Returns whether the sample was stored.
    ///
    /// The recording flag is read under the store lock, so a sample can never
    /// land after a clear that also stopped recording.
    pub fn feed(&mut self, sample: Sample) -> bool {
        {
            let mut store = self.store.lock();
            if !self.recording.load(Ordering::Acquire) {
                drop(store);
                self.stats.discarded.fetch_add(1, Ordering::Relaxed);
                return false;
            }
            store.insert(sample);
        }
        self.stats.inserted.fetch_add(1, Ordering::Relaxed);
        if self.throttle.tick() {
            (self.on_redraw)();
        }
        true
    }

    /// Blocks until every sender of `rx` is gone.
    pub fn pump(mut self, rx: SampleRx) {
        for sample in rx.iter() {
            self.feed(sample);
        }
        tracing::debug!("ingest pump stopped");
    }

    pub fn spawn(self, rx: SampleRx) -> io::Result<thread::JoinHandle<()>> {
        thread::Builder::new()
            .name("birdview-ingest".into())
            .spawn(move || self.pump(rx))
    }
}
