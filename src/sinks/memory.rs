use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::traits::{ArtifactSink, SinkError};

/// Keeps artifacts in memory, keyed by name.
#[derive(Debug, Default)]
pub struct MemorySink {
    container: String,
    blobs: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemorySink {
    pub fn new(container: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            blobs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn get(&self, name: &str) -> Option<Vec<u8>> {
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// Stored artifact names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ArtifactSink for MemorySink {
    fn container(&self) -> &str {
        &self.container
    }

    async fn put(&self, name: &str, bytes: Vec<u8>) -> Result<(), SinkError> {
        if name.is_empty() {
            return Err(SinkError::InvalidName(name.to_string()));
        }
        self.blobs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(name.to_string(), bytes);
        Ok(())
    }
}
