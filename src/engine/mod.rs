//! Process execution engine.
//!
//! [`ProcessRunner`] walks a process's step plan, pausing at frontend steps
//! and delegating backend steps to [`StepExecutor`]. [`ProcessCanceler`]
//! runs a process's cancel step against a stored run. All three take their
//! collaborators (catalog, state store, record source) explicitly.

pub mod callback;
pub mod canceler;
pub mod error;
pub mod executor;
pub mod resolve;
pub mod runner;
pub mod types;

use std::sync::Arc;

pub use callback::{CallbackDescriptor, DataCompletionCallback};
pub use canceler::ProcessCanceler;
pub use error::EngineError;
pub use executor::{StepContext, StepExecutor};
pub use runner::ProcessRunner;

use crate::catalog::ProcessCatalog;
use crate::data::RecordSource;
use crate::storage::StateStore;

/// Runner and canceler wired to the same collaborators.
pub struct Engine {
    pub runner: ProcessRunner,
    pub canceler: ProcessCanceler,
}

impl Engine {
    pub fn new(
        catalog: Arc<ProcessCatalog>,
        store: Arc<dyn StateStore>,
        records: Arc<dyn RecordSource>,
    ) -> Self {
        let executor = Arc::new(StepExecutor::new(records));
        Self {
            runner: ProcessRunner::new(catalog.clone(), store.clone(), executor.clone()),
            canceler: ProcessCanceler::new(catalog, store, executor),
        }
    }
}
