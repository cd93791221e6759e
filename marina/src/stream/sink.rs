//! Destinations for container output.

use std::io;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::engine::LogChunk;

/// Receives container output chunk by chunk, as it arrives.
#[async_trait]
pub trait OutputSink: Send {
    async fn write_chunk(&mut self, chunk: &LogChunk) -> io::Result<()>;

    /// Called once after the stream closed normally.
    async fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Produces a fresh sink for every attached build container.
pub type SinkFactory = Arc<dyn Fn() -> Box<dyn OutputSink> + Send + Sync>;

/// Sink factory writing to the process's standard output.
pub fn console() -> SinkFactory {
    Arc::new(|| Box::new(WriterSink::new(tokio::io::stdout())) as Box<dyn OutputSink>)
}

/// Sink factory dropping everything (quiet mode).
pub fn discard() -> SinkFactory {
    Arc::new(|| Box::new(DiscardSink) as Box<dyn OutputSink>)
}

/// Forwards both stdout and stderr chunks to one writer.
pub struct WriterSink<W> {
    writer: W,
}

impl<W> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> OutputSink for WriterSink<W> {
    async fn write_chunk(&mut self, chunk: &LogChunk) -> io::Result<()> {
        self.writer.write_all(chunk.bytes()).await?;
        // keep long builds readable as they run
        self.writer.flush().await
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

pub struct DiscardSink;

#[async_trait]
impl OutputSink for DiscardSink {
    async fn write_chunk(&mut self, _chunk: &LogChunk) -> io::Result<()> {
        Ok(())
    }
}

/// Writes stdout bytes to a file; stderr goes to the log instead so it
/// cannot corrupt binary payloads such as the build archive.
pub struct FileSink {
    file: tokio::fs::File,
}

impl FileSink {
    pub async fn create(path: &Path) -> io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self { file })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write_chunk(&mut self, chunk: &LogChunk) -> io::Result<()> {
        match chunk {
            LogChunk::Stdout(bytes) => self.file.write_all(bytes).await,
            LogChunk::Stderr(bytes) => {
                let line = String::from_utf8_lossy(bytes);
                tracing::warn!(target: "container:stderr", "{}", line.trim_end());
                Ok(())
            }
        }
    }

    async fn flush(&mut self) -> io::Result<()> {
        self.file.flush().await?;
        self.file.sync_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_writer_sink_forwards_both_channels() {
        let mut sink = WriterSink::new(Vec::new());
        sink.write_chunk(&LogChunk::Stdout(b"out ".to_vec()))
            .await
            .unwrap();
        sink.write_chunk(&LogChunk::Stderr(b"err".to_vec()))
            .await
            .unwrap();
        assert_eq!(sink.writer, b"out err");
    }

    #[tokio::test]
    async fn test_file_sink_keeps_only_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("archive.tar.gz");

        let mut sink = FileSink::create(&path).await.unwrap();
        sink.write_chunk(&LogChunk::Stdout(vec![0x1f, 0x8b]))
            .await
            .unwrap();
        sink.write_chunk(&LogChunk::Stderr(b"cat: warning".to_vec()))
            .await
            .unwrap();
        sink.write_chunk(&LogChunk::Stdout(vec![0x08]))
            .await
            .unwrap();
        sink.flush().await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), vec![0x1f, 0x8b, 0x08]);
    }
}
