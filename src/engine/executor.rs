use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tracing::{debug, info, warn};

use crate::catalog::BackendStep;
use crate::data::{QueryRequest, RecordSource};
use crate::engine::callback::DataCompletionCallback;
use crate::engine::resolve::{InputOutcome, assess_fields, assess_records};
use crate::engine::types::{CapturedFailure, ProcessState};
use crate::handlers::{StepInput, StepOutput};

/// Per-invocation context for one step execution.
#[derive(Clone, Copy)]
pub struct StepContext<'a> {
    pub process_name: &'a str,
    pub run_id: &'a str,
    pub callback: Option<&'a dyn DataCompletionCallback>,
}

/// Runs one backend step: completes its inputs, then dispatches to its handler.
///
/// Never returns an error. Every failure, expected or not, is captured into
/// the returned state's `failure`.
pub struct StepExecutor {
    records: Arc<dyn RecordSource>,
}

impl StepExecutor {
    pub fn new(records: Arc<dyn RecordSource>) -> Self {
        Self { records }
    }

    pub async fn execute(
        &self,
        state: ProcessState,
        step: &BackendStep,
        ctx: StepContext<'_>,
    ) -> ProcessState {
        let mut state = state;
        state.failure = None;

        if let Err(failure) = self.ensure_records(&mut state, step, ctx).await {
            state.failure = Some(failure);
            return state;
        }
        if let Err(failure) = ensure_fields(&mut state, step, ctx) {
            state.failure = Some(failure);
            return state;
        }

        self.dispatch(state, step, ctx).await
    }

    async fn ensure_records(
        &self,
        state: &mut ProcessState,
        step: &BackendStep,
        ctx: StepContext<'_>,
    ) -> Result<(), CapturedFailure> {
        let input = match assess_records(state, step, ctx.callback.is_some()) {
            InputOutcome::Ready => return Ok(()),
            InputOutcome::Unrecoverable(reason) => {
                return Err(CapturedFailure::user_facing(&step.name, reason));
            }
            InputOutcome::NeedsCallback(input) => input,
        };

        let Some(callback) = ctx.callback else {
            return Err(CapturedFailure::internal(
                &step.name,
                "record resolution requested a callback that is not present",
            ));
        };

        let Some(filter) = callback.query_filter() else {
            if input.required {
                return Err(CapturedFailure::user_facing(
                    &step.name,
                    format!(
                        "Step '{}' needs records from '{}' and the callback offered no filter",
                        step.name, input.table
                    ),
                ));
            }
            debug!(step = %step.name, table = %input.table, "Callback offered no filter; continuing without records");
            return Ok(());
        };

        let mut request = QueryRequest::new(&input.table, filter);
        callback.before_query(&step.name, &mut request);

        let records = self.records.query(&request).await.map_err(|e| {
            CapturedFailure::internal(
                &step.name,
                format!("Failed to fetch records from '{}': {:#}", request.table, e),
            )
        })?;

        info!(
            run_id = %ctx.run_id,
            step = %step.name,
            table = %request.table,
            count = records.len(),
            "Fetched records via callback filter"
        );
        state.records = records;
        Ok(())
    }

    async fn dispatch(
        &self,
        state: ProcessState,
        step: &BackendStep,
        ctx: StepContext<'_>,
    ) -> ProcessState {
        let mut state = state;

        let input = StepInput {
            process_name: ctx.process_name.to_string(),
            run_id: ctx.run_id.to_string(),
            step_name: step.name.clone(),
            config: step.config.clone(),
            values: state.values.clone(),
            records: state.records.clone(),
            step_list: state.step_list.clone(),
        };
        let mut output = StepOutput::seeded(&input);

        info!(run_id = %ctx.run_id, step = %step.name, handler = %step.handler.handler_type(), "Running step");

        let result = AssertUnwindSafe(step.handler.run(input, &mut output))
            .catch_unwind()
            .await;

        state.values = output.values;
        state.records = output.records;
        state.step_list = output.step_list;

        let failure = match result {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(panic) => Some(panic_message(panic.as_ref())),
        };

        if let Some(message) = failure {
            warn!(run_id = %ctx.run_id, step = %step.name, error = %message, "Step failed");
            state.failure = Some(CapturedFailure::internal(&step.name, message));
        }

        state
    }
}

fn ensure_fields(
    state: &mut ProcessState,
    step: &BackendStep,
    ctx: StepContext<'_>,
) -> Result<(), CapturedFailure> {
    let missing = match assess_fields(&mut state.values, &step.field_inputs, ctx.callback.is_some())
    {
        InputOutcome::Ready => return Ok(()),
        InputOutcome::Unrecoverable(reason) => {
            return Err(CapturedFailure::user_facing(&step.name, reason));
        }
        InputOutcome::NeedsCallback(missing) => missing,
    };

    let Some(callback) = ctx.callback else {
        return Err(CapturedFailure::internal(
            &step.name,
            "field resolution requested a callback that is not present",
        ));
    };

    let resolved = callback.field_values(&missing);
    debug!(
        step = %step.name,
        requested = missing.len(),
        resolved = resolved.len(),
        "Requested missing fields from callback"
    );
    state.values.extend(resolved);
    Ok(())
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", s)
    } else {
        "handler panicked".to_string()
    }
}
