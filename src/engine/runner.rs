use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{ProcessCatalog, ProcessDefinition, StepDefinition};
use crate::engine::error::EngineError;
use crate::engine::executor::{StepContext, StepExecutor};
use crate::engine::types::{
    FrontendStepBehavior, ProcessState, RunInput, RunKey, RunOutput, RunStatus,
};
use crate::storage::StateStore;

/// Runs or resumes a process, one step at a time, persisting after each backend step.
pub struct ProcessRunner {
    catalog: Arc<ProcessCatalog>,
    store: Arc<dyn StateStore>,
    executor: Arc<StepExecutor>,
}

impl ProcessRunner {
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

    /// Run `input.process_name` from the start, or resume it after `input.resume_after_step`.
    ///
    /// Always returns an output. When a state exists it is persisted and
    /// attached, whether the run completed, paused or failed.
    pub async fn run(&self, input: RunInput) -> RunOutput {
        let run_id = input
            .run_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let Some(process) = self.catalog.get(&input.process_name) else {
            return RunOutput::aborted(
                run_id,
                EngineError::NotFound(format!("process '{}'", input.process_name)),
            );
        };

        let key = RunKey::process_status(&run_id);
        let mut state = match self.prime_state(&process, &key, &input).await {
            Ok(state) => state,
            Err(e) => {
                warn!(run_id = %run_id, process = %process.name, error = %e, "Could not prime run");
                return RunOutput::aborted(run_id, e);
            }
        };

        info!(
            run_id = %run_id,
            process = %process.name,
            resume_after = input.resume_after_step.as_deref().unwrap_or("-"),
            "Starting process run"
        );

        let mut last_step = None;
        let result = self
            .walk(&process, &key, &input, &mut state, &mut last_step)
            .await;

        // Persist on every exit path.
        state.touch();
        let result = match self.store.put(&key, &state).await {
            Ok(()) => result,
            Err(e) => {
                let err = EngineError::internal(format!("persisting state for run {}", run_id), e);
                match result {
                    Ok(_) => Err(err),
                    Err(original) => {
                        error!(run_id = %run_id, error = %err, "Failed to persist state after failure");
                        Err(original)
                    }
                }
            }
        };

        let (status, failure) = match result {
            Ok(status) => (status, None),
            Err(e) => (RunStatus::Failed, Some(e)),
        };

        match &failure {
            None => info!(run_id = %run_id, process = %process.name, status = %status, "Process run finished"),
            Some(e) => warn!(run_id = %run_id, process = %process.name, error = %e, "Process run failed"),
        }

        let mut output = RunOutput::from_state(run_id, status, state);
        output.last_step = last_step;
        output.failure = failure;
        output
    }

    async fn prime_state(
        &self,
        process: &ProcessDefinition,
        key: &RunKey,
        input: &RunInput,
    ) -> Result<ProcessState, EngineError> {
        let stored = self
            .store
            .get(key)
            .await
            .map_err(|e| EngineError::internal(format!("loading state for run {}", key.run_id()), e))?;

        match stored {
            None => {
                if let Some(after) = &input.resume_after_step {
                    return Err(EngineError::NotFound(format!(
                        "no stored state for run '{}' to resume after step '{}'",
                        key.run_id(),
                        after
                    )));
                }

                let mut state = ProcessState::new(process.step_names());
                state.values = input.values.clone();
                state.records = input.records.clone();
                state.touch();
                self.store.put(key, &state).await.map_err(|e| {
                    EngineError::internal(format!("persisting new run {}", key.run_id()), e)
                })?;

                debug!(run_id = %key.run_id(), steps = state.step_list.len(), "Primed new run");
                Ok(state)
            }
            Some(mut state) => {
                for (name, value) in &input.values {
                    state.values.insert(name.clone(), value.clone());
                }
                if !input.records.is_empty() {
                    state.records = input.records.clone();
                }
                state.next_step_name = None;
                state.failure = None;

                if let Some(after) = &input.resume_after_step
                    && !state.contains_step(after)
                {
                    return Err(EngineError::NotFound(format!(
                        "step '{}' is not in the plan of run '{}'",
                        after,
                        key.run_id()
                    )));
                }

                debug!(run_id = %key.run_id(), "Restored stored run");
                Ok(state)
            }
        }
    }

    async fn walk(
        &self,
        process: &ProcessDefinition,
        key: &RunKey,
        input: &RunInput,
        state: &mut ProcessState,
        last_step: &mut Option<String>,
    ) -> Result<RunStatus, EngineError> {
        let ctx = StepContext {
            process_name: &process.name,
            run_id: key.run_id(),
            callback: input.callback.as_deref(),
        };

        let mut cursor = input.resume_after_step.clone();

        loop {
            // Cursors are step names, so a plan that repeats one would never end.
            if let Some(dup) = state.duplicate_step() {
                let rewritten_by = cursor.as_deref().unwrap_or("-");
                return Err(EngineError::internal(
                    format!("invalid plan after step '{}'", rewritten_by),
                    anyhow::anyhow!("step '{}' appears more than once in the plan", dup),
                ));
            }

            // The plan may have been rewritten by the previous step.
            let remaining = state.remaining_steps(cursor.as_deref());
            let Some(step_name) = remaining.into_iter().next() else {
                if let Some(c) = &cursor
                    && !state.contains_step(c)
                {
                    warn!(run_id = %key.run_id(), step = %c, "Last step no longer in plan; ending run");
                }
                return Ok(RunStatus::Completed);
            };

            *last_step = Some(step_name.clone());
            cursor = Some(step_name.clone());

            let step = process.step(&step_name).ok_or_else(|| {
                EngineError::NotFound(format!(
                    "step '{}' in process '{}'",
                    step_name, process.name
                ))
            })?;

            match step {
                StepDefinition::Frontend(_) => match input.frontend_step_behavior {
                    FrontendStepBehavior::Break => {
                        info!(run_id = %key.run_id(), step = %step_name, "Pausing at frontend step");
                        state.next_step_name = Some(step_name);
                        return Ok(RunStatus::Paused);
                    }
                    FrontendStepBehavior::Skip => {
                        debug!(run_id = %key.run_id(), step = %step_name, "Skipping frontend step");
                    }
                    FrontendStepBehavior::Fail => {
                        return Err(EngineError::FrontendStep {
                            process: process.name.clone(),
                            step: step_name,
                        });
                    }
                },
                StepDefinition::Backend(backend) => {
                    let next = self.executor.execute(state.clone(), backend, ctx).await;
                    *state = next;
                    state.touch();

                    self.store.put(key, state).await.map_err(|e| {
                        EngineError::internal(
                            format!("persisting state after step '{}'", step_name),
                            e,
                        )
                    })?;

                    if let Some(failure) = state.failure.clone() {
                        return Err(failure.into_error(&process.name));
                    }
                }
            }
        }
    }
}
