use anyhow::Context;
use birdview_ingest_core::*;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;

/// Datagram-mode source: one frame per UDP datagram on the data port.
pub struct DatagramSource {
    socket: UdpSocket,
}

impl DatagramSource {
    pub async fn bind(addr: SocketAddr) -> Result<Self, IngestError> {
        let socket = UdpSocket::bind(addr)
            .await
            .with_context(|| format!("bind {}", addr))?;
        Ok(Self { socket })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait::async_trait]
impl FrameSource for DatagramSource {
    async fn run(&mut self, tx: SampleTx, stats: &dyn SourceStats) -> Result<(), IngestError> {
        let mut buf = vec![0u8; 2048];
        loop {
            self.socket.readable().await?;
            // drain every pending datagram before waiting again
            loop {
                let (len, peer) = match self.socket.try_recv_from(&mut buf) {
                    Ok(got) => got,
                    Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e.into()),
                };
                match decode_frame(&buf[..len]) {
                    Ok(sample) => {
                        if len > FRAME_SIZE {
                            tracing::trace!(%peer, len, "ignoring trailing datagram bytes");
                        }
                        stats.frame_received();
                        if tx.send(sample).is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        stats.decode_failed();
                        tracing::debug!(%peer, error = %e, "dropping datagram");
                    }
                }
            }
        }
    }
}
