use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use crate::catalog::StepDefinition;
use crate::data::{QueryFilter, Record};
use crate::engine::EngineError;
use crate::engine::callback::{CallbackDescriptor, DataCompletionCallback};
use crate::engine::types::{
    CancelInput, FrontendStepBehavior, ProcessState, RunInput, RunKey, RunOutput, RunStatus,
    Values,
};

use super::AppState;
use super::errors::{AppError, request_error};

// --- Request/Response types ---

/// Filter and field values offered to steps that lack input.
#[derive(Deserialize, Default)]
pub struct CallbackRequest {
    #[serde(default)]
    pub filter: Option<QueryFilter>,
    #[serde(default)]
    pub values: Values,
}

impl CallbackRequest {
    fn into_callback(self) -> Arc<dyn DataCompletionCallback> {
        let mut builder = CallbackDescriptor::builder().values(self.values);
        if let Some(filter) = self.filter {
            builder = builder.filter(filter);
        }
        Arc::new(builder.build())
    }
}

#[derive(Deserialize, Default)]
pub struct RunProcessRequest {
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub resume_after_step: Option<String>,
    #[serde(default)]
    pub values: Values,
    #[serde(default)]
    pub records: Vec<Record>,
    #[serde(default)]
    pub frontend_step_behavior: FrontendStepBehavior,
    #[serde(default)]
    pub callback: Option<CallbackRequest>,
}

#[derive(Deserialize, Default)]
pub struct CancelRunRequest {
    #[serde(default)]
    pub callback: Option<CallbackRequest>,
}

#[derive(Serialize)]
pub struct RunErrorBody {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
}

#[derive(Serialize)]
pub struct RunResponse {
    pub run_id: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<ProcessState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunErrorBody>,
}

#[derive(Serialize)]
pub struct StepInfo {
    pub name: String,
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

#[derive(Serialize)]
pub struct ProcessInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub steps: Vec<StepInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cancel_step: Option<String>,
}

#[derive(Serialize)]
pub struct HandlerInfo {
    pub handler: String,
    pub description: String,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

// --- Handlers ---

/// POST /processes/{name}/run
pub async fn run_process(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(req): Json<RunProcessRequest>,
) -> Result<Json<RunResponse>, AppError> {
    let input = RunInput {
        process_name: name,
        run_id: req.run_id,
        resume_after_step: req.resume_after_step,
        values: req.values,
        records: req.records,
        frontend_step_behavior: req.frontend_step_behavior,
        callback: req.callback.map(CallbackRequest::into_callback),
    };

    let output = state.engine.runner.run(input).await;
    respond(output)
}

/// POST /processes/{name}/runs/{id}/cancel
///
/// The body is optional; a bare POST cancels without a callback.
pub async fn cancel_run(
    State(state): State<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
    body: Option<Json<CancelRunRequest>>,
) -> Result<Json<RunResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let mut input = CancelInput::new(name, id);
    input.callback = req.callback.map(CallbackRequest::into_callback);

    let output = state.engine.canceler.cancel(input).await;
    respond(output)
}

/// GET /runs/{id}
pub async fn get_run(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ProcessState>, AppError> {
    let stored = state.store.get(&RunKey::process_status(&id)).await?;
    stored
        .map(Json)
        .ok_or_else(|| AppError::NotFound(format!("Run '{}' not found", id)))
}

/// GET /processes
pub async fn list_processes(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let processes: Vec<ProcessInfo> = state
        .catalog
        .names()
        .into_iter()
        .filter_map(|name| state.catalog.get(name))
        .map(|p| ProcessInfo {
            name: p.name.clone(),
            label: p.label.clone(),
            steps: p
                .steps()
                .iter()
                .map(|s| StepInfo {
                    name: s.name().to_string(),
                    kind: s.kind().to_string(),
                    handler: match s {
                        StepDefinition::Backend(b) => Some(b.handler.handler_type().to_string()),
                        StepDefinition::Frontend(_) => None,
                    },
                })
                .collect(),
            cancel_step: p.cancel_step().map(|c| c.name.clone()),
        })
        .collect();

    let total = processes.len();
    Json(serde_json::json!({
        "processes": processes,
        "total": total,
    }))
}

/// GET /handlers
pub async fn list_handlers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let handlers: Vec<HandlerInfo> = state
        .handlers
        .list()
        .iter()
        .map(|(name, desc)| HandlerInfo {
            handler: name.to_string(),
            description: desc.to_string(),
        })
        .collect();

    let total = handlers.len();
    Json(serde_json::json!({
        "handlers": handlers,
        "total": total,
    }))
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// --- Helpers ---

fn respond(output: RunOutput) -> Result<Json<RunResponse>, AppError> {
    if let Some(err) = &output.failure
        && let Some(app_err) = request_error(err)
    {
        return Err(app_err);
    }

    let error = output.failure.as_ref().map(|e| RunErrorBody {
        kind: e.kind().to_string(),
        message: e.to_string(),
        step: match e {
            EngineError::UserFacing { step, .. }
            | EngineError::FrontendStep { step, .. }
            | EngineError::Step { step, .. } => Some(step.clone()),
            _ => None,
        },
    });

    Ok(Json(RunResponse {
        run_id: output.run_id,
        status: output.status,
        last_step: output.last_step,
        state: output.process_state,
        error,
    }))
}
