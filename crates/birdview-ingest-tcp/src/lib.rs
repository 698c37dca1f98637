use birdview_ingest_core::*;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::net::TcpStream;

const READ_CHUNK: usize = 1024;

/// Stream-mode source: frames are read back to back from one connection.
pub struct StreamSource<R = TcpStream> {
    reader: R,
    assembler: FrameAssembler,
}

impl<R> StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    pub fn new(reader: R) -> Self {
        Self { reader, assembler: FrameAssembler::new() }
    }
}

#[async_trait::async_trait]
impl<R> FrameSource for StreamSource<R>
where
    R: AsyncRead + Unpin + Send,
{
    async fn run(&mut self, tx: SampleTx, stats: &dyn SourceStats) -> Result<(), IngestError> {
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let len = self.reader.read(&mut buf).await?;
            if len == 0 {
                if self.assembler.pending() > 0 {
                    tracing::debug!(pending = self.assembler.pending(), "stream closed mid-frame");
                }
                return Ok(());
            }
            self.assembler.push(&buf[..len]);
            while let Some(sample) = self.assembler.next_frame() {
                stats.frame_received();
                if tx.send(sample).is_err() {
                    // pump is gone, nobody left to feed
                    return Ok(());
                }
            }
        }
    }
}
