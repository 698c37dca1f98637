//! Device link for the Birdview accelerometer viewer.
//!
//! Connects to a device over TCP, confirms the handshake on a poll tick,
//! decodes the 16-byte big-endian frame stream (over the same TCP
//! connection or over UDP datagrams) and keeps the samples in a
//! timestamp-ordered store the UI reads from.

pub mod config;
pub mod device;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod session;

pub use birdview_ingest_core::{decode_frame, encode_frame, DecodeError, TransportMode, FRAME_SIZE};
pub use config::LinkConfig;
pub use device::{DeviceLink, StateChange};
pub use error::{LinkError, SocketErrorCode};
pub use ingest::{IngestLoop, RedrawThrottle, StatsSnapshot};
pub use model::{Axis, Sample, SeriesRange, SeriesStore};
pub use session::{ConnectionSession, Connector, SessionState, TcpConnector};
