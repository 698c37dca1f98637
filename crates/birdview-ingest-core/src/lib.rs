//! Frame codec and source traits shared by the Birdview transports

use byteorder::{BigEndian, ByteOrder, ReadBytesExt};
use bytes::{Buf, BytesMut};
use model::Sample;
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// Wire frame: `x | y | z | timestamp`, each a big-endian f32.
pub const FRAME_SIZE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TransportMode {
    /// Frames are read from the control TCP connection.
    Stream,
    /// Frames arrive one per UDP datagram on the data port.
    #[default]
    Datagram,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("short frame: got {len} bytes, need {}", FRAME_SIZE)]
    ShortFrame { len: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub fn decode_frame(buf: &[u8]) -> Result<Sample, DecodeError> {
    let frame = buf
        .get(..FRAME_SIZE)
        .ok_or(DecodeError::ShortFrame { len: buf.len() })?;
    let mut c = Cursor::new(frame);
    let short = |_| DecodeError::ShortFrame { len: buf.len() };
    let x = c.read_f32::<BigEndian>().map_err(short)?;
    let y = c.read_f32::<BigEndian>().map_err(short)?;
    let z = c.read_f32::<BigEndian>().map_err(short)?;
    let timestamp = c.read_f32::<BigEndian>().map_err(short)?;
    Ok(Sample::new(timestamp as f64, x as f64, y as f64, z as f64))
}

/// Inverse of [`decode_frame`]. Values are narrowed to f32.
pub fn encode_frame(s: &Sample) -> [u8; FRAME_SIZE] {
    let mut out = [0u8; FRAME_SIZE];
    for (field, v) in out.chunks_exact_mut(4).zip([s.x, s.y, s.z, s.timestamp]) {
        BigEndian::write_f32(field, v as f32);
    }
    out
}

/// Reassembles frames from a byte stream delivered in arbitrary chunks.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buf: BytesMut,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self { buf: BytesMut::with_capacity(FRAME_SIZE * 64) }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete frame, if one is buffered. Partial tails stay put.
    pub fn next_frame(&mut self) -> Option<Sample> {
        if self.buf.len() < FRAME_SIZE {
            return None;
        }
        let frame = self.buf.split_to(FRAME_SIZE);
        decode_frame(&frame).ok()
    }

    pub fn pending(&self) -> usize {
        self.buf.remaining()
    }
}

pub type SampleTx = crossbeam_channel::Sender<Sample>;
pub type SampleRx = crossbeam_channel::Receiver<Sample>;

/// Counters a source bumps while it reads the transport.
pub trait SourceStats: Send + Sync {
    fn frame_received(&self);
    fn decode_failed(&self);
}

/// Trait for any live frame transport
#[async_trait::async_trait]
pub trait FrameSource: Send {
    /// Reads until the transport closes. `Ok(())` means the peer closed it.
    async fn run(&mut self, tx: SampleTx, stats: &dyn SourceStats) -> Result<(), IngestError>;
}

pub fn channel() -> (SampleTx, SampleRx) {
    crossbeam_channel::unbounded()
}
