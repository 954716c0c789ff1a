use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::data::{QueryRequest, Record, RecordSource};

/// Record source holding whole tables in memory.
pub struct MemoryRecordSource {
    tables: RwLock<HashMap<String, Vec<Record>>>,
}

impl Default for MemoryRecordSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRecordSource {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_tables(tables: HashMap<String, Vec<Record>>) -> Self {
        Self {
            tables: RwLock::new(tables),
        }
    }

    /// Load tables from a JSON file shaped as `{ "table": [ {record}, ... ] }`.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read data file: {}", path.display()))?;
        let tables: HashMap<String, Vec<Record>> = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse data file: {}", path.display()))?;
        Ok(Self::with_tables(tables))
    }

    pub async fn insert(&self, table: &str, record: Record) {
        self.tables
            .write()
            .await
            .entry(table.to_string())
            .or_default()
            .push(record);
    }
}

#[async_trait]
impl RecordSource for MemoryRecordSource {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>> {
        let tables = self.tables.read().await;
        let rows = tables
            .get(&request.table)
            .ok_or_else(|| anyhow::anyhow!("Unknown table: {}", request.table))?;

        let matched = rows
            .iter()
            .filter(|r| request.filter.matches(r))
            .take(request.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();
        Ok(matched)
    }
}
