use serde::{Deserialize, Serialize};

use crate::error::TransferError;

pub const DEFAULT_MAX_CONCURRENT: usize = 3;
pub const DEFAULT_CHUNK_SIZE: usize = 256 * 1024; // 256KB
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on pipelines running at once.
    pub max_concurrent: usize,
    /// Read size for download streams.
    pub chunk_size: usize,
    /// Buffered progress events per subscriber before it starts lagging.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EngineConfig {
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    pub fn validate(&self) -> Result<(), TransferError> {
        if self.max_concurrent == 0 {
            return Err(TransferError::Validation("max_concurrent must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(TransferError::Validation("chunk_size must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(TransferError::Validation("event_capacity must be at least 1".into()));
        }
        Ok(())
    }
}
