use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::RelayError;

/// Destination for framed SSE bytes headed to the client.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, frame: Bytes) -> Result<(), RelayError>;
}

/// Collects frames in memory. Used by tests and by buffered replays.
#[derive(Debug, Default)]
pub struct BufferSink {
    pub frames: Vec<Bytes>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected frames concatenated, for whole-stream assertions.
    pub fn joined(&self) -> String {
        self.frames
            .iter()
            .map(|frame| String::from_utf8_lossy(frame).into_owned())
            .collect()
    }
}

#[async_trait]
impl EventSink for BufferSink {
    async fn send(&mut self, frame: Bytes) -> Result<(), RelayError> {
        self.frames.push(frame);
        Ok(())
    }
}
