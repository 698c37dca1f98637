use crate::session::SessionState;
use birdview_ingest_core::IngestError;
use std::fmt;
use std::io;

/// Socket error as reported by the transport: the OS errno when there is
/// one, otherwise the `io::ErrorKind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketErrorCode {
    Os(i32),
    Kind(io::ErrorKind),
}

impl From<&io::Error> for SocketErrorCode {
    fn from(e: &io::Error) -> Self {
        match e.raw_os_error() {
            Some(code) => SocketErrorCode::Os(code),
            None => SocketErrorCode::Kind(e.kind()),
        }
    }
}

impl fmt::Display for SocketErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketErrorCode::Os(code) => write!(f, "{}", code),
            SocketErrorCode::Kind(kind) => write!(f, "{:?}", kind),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("timed out after {waited_ms} ms connecting to {target}")]
    ConnectTimeout { target: String, waited_ms: u64 },

    #[error("connecting to {target} failed: socket error {code} ({message})")]
    ConnectFailed {
        target: String,
        code: SocketErrorCode,
        message: String,
    },

    #[error("data channel: {0}")]
    DataChannel(#[from] IngestError),

    #[error("failed to start ingest thread: {0}")]
    IngestThread(#[source] io::Error),

    #[error("connect to {0} cancelled by disconnect")]
    Cancelled(String),

    #[error("cannot {op} while {state:?}")]
    InvalidState {
        op: &'static str,
        state: SessionState,
    },

    #[error("invalid address {0:?}")]
    InvalidAddress(String),

    #[error("export failed: {0}")]
    Export(#[from] iox::ExportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_prefers_os_errno() {
        let e = io::Error::from_raw_os_error(111);
        assert_eq!(SocketErrorCode::from(&e).to_string(), "111");

        let e = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert_eq!(SocketErrorCode::from(&e).to_string(), "ConnectionReset");
    }
}
