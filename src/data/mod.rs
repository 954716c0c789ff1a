pub mod filter;
pub mod memory_source;
pub mod sql_source;

use anyhow::Result;
use async_trait::async_trait;

pub use filter::{Criterion, Operator, QueryFilter};

/// A generic record: field name → JSON value.
pub type Record = serde_json::Map<String, serde_json::Value>;

/// A query against one table of the backing store.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub filter: QueryFilter,
    pub limit: Option<usize>,
}

impl QueryRequest {
    pub fn new(table: impl Into<String>, filter: QueryFilter) -> Self {
        Self {
            table: table.into(),
            filter,
            limit: None,
        }
    }
}

/// Data-access collaborator used to fetch records a step needs but was not given.
#[async_trait]
pub trait RecordSource: Send + Sync {
    async fn query(&self, request: &QueryRequest) -> Result<Vec<Record>>;
}
