use birdview_ingest_core::TransportMode;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const CONTROL_PORT: u16 = 1998;
pub const DATA_PORT: u16 = 1999;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// TCP port of the handshake connection, used when the address has none
    pub control_port: u16,
    /// Local UDP port bound in datagram mode (0 picks a free one)
    pub data_port: u16,
    pub mode: TransportMode,
    pub poll_interval_ms: u64,
    pub connect_timeout_ms: u64,
    /// Redraw after every n-th stored sample
    pub redraw_every: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            control_port: CONTROL_PORT,
            data_port: DATA_PORT,
            mode: TransportMode::Datagram,
            poll_interval_ms: 500,
            connect_timeout_ms: 10_000,
            redraw_every: 2,
        }
    }
}

impl LinkConfig {
    pub fn poll_interval(&self) -> Duration {
        // tokio intervals panic on a zero period
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
