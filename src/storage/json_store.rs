use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::engine::types::{ProcessState, RunKey};
use crate::storage::StateStore;

/// File-based JSON state store. Each key is stored as a separate JSON file.
pub struct JsonStateStore {
    base_dir: PathBuf,
    lock: RwLock<()>,
}

impl JsonStateStore {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            lock: RwLock::new(()),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn state_path(&self, key: &RunKey) -> PathBuf {
        self.base_dir
            .join(format!("{}.{}.json", key.run_id(), key.kind()))
    }
}

fn check_run_id(run_id: &str) -> Result<()> {
    let valid = !run_id.is_empty()
        && run_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if !valid {
        anyhow::bail!("Invalid run id for file store: '{}'", run_id);
    }
    Ok(())
}

#[async_trait]
impl StateStore for JsonStateStore {
    async fn get(&self, key: &RunKey) -> Result<Option<ProcessState>> {
        check_run_id(key.run_id())?;
        let _lock = self.lock.read().await;

        let path = self.state_path(key);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to read state file: {}", path.display()));
            }
        };

        let state: ProcessState = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse state for {}", key))?;
        Ok(Some(state))
    }

    async fn put(&self, key: &RunKey, state: &ProcessState) -> Result<()> {
        check_run_id(key.run_id())?;
        let _lock = self.lock.write().await;

        tokio::fs::create_dir_all(&self.base_dir).await?;

        let path = self.state_path(key);
        let tmp_path = path.with_extension("json.tmp");

        let data = serde_json::to_string_pretty(state)?;
        tokio::fs::write(&tmp_path, &data)
            .await
            .with_context(|| format!("Failed to write state file: {}", tmp_path.display()))?;
        tokio::fs::rename(&tmp_path, &path).await?;

        Ok(())
    }
}
