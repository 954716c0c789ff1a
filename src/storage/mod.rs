pub mod json_store;
pub mod memory_store;

use anyhow::Result;
use async_trait::async_trait;

use crate::engine::types::{ProcessState, RunKey};

/// Key → snapshot persistence for process runs.
///
/// `get` and `put` are each atomic on their own. Nothing guards the
/// load → mutate → persist cycle of a run; the last `put` wins.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the snapshot stored under `key`, if any.
    async fn get(&self, key: &RunKey) -> Result<Option<ProcessState>>;

    /// Store `state` under `key`, replacing any previous snapshot.
    async fn put(&self, key: &RunKey, state: &ProcessState) -> Result<()>;
}
