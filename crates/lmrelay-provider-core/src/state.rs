use async_trait::async_trait;

use crate::block::BlockRecord;

#[derive(Debug, Clone)]
pub enum KeyStateEvent {
    UpsertBlock(BlockRecord),
}

/// Receives key-state changes so cooldowns can outlive the process.
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn submit(&self, event: KeyStateEvent);
}

pub struct NoopStateSink;

#[async_trait]
impl StateSink for NoopStateSink {
    async fn submit(&self, _event: KeyStateEvent) {}
}
