use std::time::{Duration, SystemTime};

/// What a block applies to: the whole key, or one model served by it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockScope {
    AllModels,
    Model(String),
}

impl BlockScope {
    pub fn model<S: Into<String>>(model: S) -> Self {
        Self::Model(model.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockLevel {
    /// Rate-limited or out of quota; expires at a known time.
    Cooldown,
    /// Upstream hiccup; short expiry.
    Transient,
    /// Key rejected by the upstream; never expires on its own.
    Dead,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlockKey {
    pub key_id: String,
    pub scope: BlockScope,
}

impl BlockKey {
    pub fn new(key_id: impl Into<String>, scope: BlockScope) -> Self {
        Self {
            key_id: key_id.into(),
            scope,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockEntry {
    pub level: BlockLevel,
    pub until: Option<SystemTime>,
    pub reason: Option<String>,
    pub updated_at: SystemTime,
}

impl BlockEntry {
    pub fn is_active(&self, now: SystemTime) -> bool {
        match self.until {
            Some(until) => until > now,
            None => true,
        }
    }
}

/// A block requested by a failed attempt, before it is stamped with a
/// deadline and stored.
#[derive(Debug, Clone)]
pub struct BlockMark {
    pub scope: BlockScope,
    pub level: BlockLevel,
    pub duration: Option<Duration>,
    pub reason: Option<String>,
}

/// Fully resolved block, as handed to the state sink for persistence.
#[derive(Debug, Clone)]
pub struct BlockRecord {
    pub channel: String,
    pub key_id: String,
    pub scope: BlockScope,
    pub level: BlockLevel,
    pub until: Option<SystemTime>,
    pub reason: Option<String>,
    pub updated_at: SystemTime,
}
