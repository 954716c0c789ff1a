use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::{ProcessState, RunKey};
use crate::storage::StateStore;

/// In-memory state store. Holds snapshots only for the lifetime of the instance.
pub struct MemoryStateStore {
    states: RwLock<HashMap<RunKey, ProcessState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(HashMap::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.states.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.states.read().await.is_empty()
    }
}

impl Default for MemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, key: &RunKey) -> Result<Option<ProcessState>> {
        Ok(self.states.read().await.get(key).cloned())
    }

    async fn put(&self, key: &RunKey, state: &ProcessState) -> Result<()> {
        self.states
            .write()
            .await
            .insert(key.clone(), state.clone());
        Ok(())
    }
}
