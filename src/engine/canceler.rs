use std::sync::Arc;

use tracing::{error, info, warn};

use crate::catalog::ProcessCatalog;
use crate::engine::error::EngineError;
use crate::engine::executor::{StepContext, StepExecutor};
use crate::engine::types::{CancelInput, RunKey, RunOutput, RunStatus};
use crate::storage::StateStore;

/// Runs a process's cancel step against an existing run.
pub struct ProcessCanceler {
    catalog: Arc<ProcessCatalog>,
    store: Arc<dyn StateStore>,
    executor: Arc<StepExecutor>,
}

impl ProcessCanceler {
    pub fn new(
        catalog: Arc<ProcessCatalog>,
        store: Arc<dyn StateStore>,
        executor: Arc<StepExecutor>,
    ) -> Self {
        Self {
            catalog,
            store,
            executor,
        }
    }

    /// Cancel `input.run_id`. A process without a cancel step makes this a no-op
    /// that returns the stored state.
    pub async fn cancel(&self, input: CancelInput) -> RunOutput {
        if input.run_id.trim().is_empty() {
            return RunOutput::aborted(
                input.run_id,
                EngineError::BadRequest("a run id is required to cancel a process".to_string()),
            );
        }

        let Some(process) = self.catalog.get(&input.process_name) else {
            return RunOutput::aborted(
                input.run_id,
                EngineError::NotFound(format!("process '{}'", input.process_name)),
            );
        };

        let key = RunKey::process_status(&input.run_id);
        let state = match self.store.get(&key).await {
            Ok(Some(state)) => state,
            Ok(None) => {
                return RunOutput::aborted(
                    input.run_id.clone(),
                    EngineError::NotFound(format!("no stored state for run '{}'", input.run_id)),
                );
            }
            Err(e) => {
                return RunOutput::aborted(
                    input.run_id.clone(),
                    EngineError::internal(format!("loading state for run {}", input.run_id), e),
                );
            }
        };

        let Some(cancel_step) = process.cancel_step() else {
            info!(run_id = %input.run_id, process = %process.name, "Process has no cancel step; nothing to do");
            return RunOutput::from_state(input.run_id, RunStatus::Cancelled, state);
        };

        info!(run_id = %input.run_id, process = %process.name, step = %cancel_step.name, "Running cancel step");

        let ctx = StepContext {
            process_name: &process.name,
            run_id: &input.run_id,
            callback: input.callback.as_deref(),
        };
        let mut state = self.executor.execute(state, cancel_step, ctx).await;
        state.touch();

        // Persist, then surface.
        let persisted = self.store.put(&key, &state).await;
        let mut failure = state
            .failure
            .clone()
            .map(|f| f.into_error(&process.name));

        if let Err(e) = persisted {
            let err = EngineError::internal(format!("persisting state for run {}", input.run_id), e);
            if failure.is_some() {
                error!(run_id = %input.run_id, error = %err, "Failed to persist state after cancel failure");
            } else {
                failure = Some(err);
            }
        }

        let status = match &failure {
            None => RunStatus::Cancelled,
            Some(e) => {
                warn!(run_id = %input.run_id, error = %e, "Cancel step failed");
                RunStatus::Failed
            }
        };

        let mut output = RunOutput::from_state(input.run_id, status, state);
        output.last_step = Some(cancel_step.name.clone());
        output.failure = failure;
        output
    }
}
