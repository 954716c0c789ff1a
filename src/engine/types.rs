use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::Record;
use crate::engine::callback::DataCompletionCallback;
use crate::engine::error::EngineError;

/// Accumulated name → value map carried through a run.
pub type Values = HashMap<String, serde_json::Value>;

/// Discriminator for what a stored snapshot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    ProcessStatus,
}

impl std::fmt::Display for StateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StateKind::ProcessStatus => write!(f, "process_status"),
        }
    }
}

/// Key under which a run's snapshot is stored.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunKey {
    run_id: String,
    kind: StateKind,
}

impl RunKey {
    pub fn new(run_id: impl Into<String>, kind: StateKind) -> Self {
        Self {
            run_id: run_id.into(),
            kind,
        }
    }

    /// Key for the process-status snapshot of a run.
    pub fn process_status(run_id: impl Into<String>) -> Self {
        Self::new(run_id, StateKind::ProcessStatus)
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn kind(&self) -> StateKind {
        self.kind
    }
}

impl std::fmt::Display for RunKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.run_id, self.kind)
    }
}

/// Whether a captured failure is safe to show to an end user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UserFacing,
    Internal,
}

/// A failure recorded into state by the step executor instead of being raised.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapturedFailure {
    pub step: String,
    pub kind: FailureKind,
    pub message: String,
}

impl CapturedFailure {
    pub fn user_facing(step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            kind: FailureKind::UserFacing,
            message: message.into(),
        }
    }

    pub fn internal(step: &str, message: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            kind: FailureKind::Internal,
            message: message.into(),
        }
    }

    /// Turn the captured failure into the error surfaced by the runner or canceler.
    pub fn into_error(self, process: &str) -> EngineError {
        match self.kind {
            FailureKind::UserFacing => EngineError::UserFacing {
                step: self.step,
                message: self.message,
            },
            FailureKind::Internal => EngineError::Step {
                process: process.to_string(),
                step: self.step,
                message: self.message,
            },
        }
    }
}

/// Durable, resumable snapshot of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    /// Ordered step plan. Backend steps may replace it.
    pub step_list: Vec<String>,
    #[serde(default)]
    pub values: Values,
    #[serde(default)]
    pub records: Vec<Record>,
    /// Set only when the run paused at a frontend step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_step_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<CapturedFailure>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}

impl ProcessState {
    pub fn new(step_list: Vec<String>) -> Self {
        Self {
            step_list,
            values: Values::new(),
            records: Vec::new(),
            next_step_name: None,
            failure: None,
            updated: None,
        }
    }

    /// Steps still to consider after `after`, derived from the current plan.
    ///
    /// With no cursor the whole plan remains. A cursor that is no longer part
    /// of the plan leaves nothing to run.
    pub fn remaining_steps(&self, after: Option<&str>) -> Vec<String> {
        match after {
            None => self.step_list.clone(),
            Some(name) => match self.step_list.iter().position(|s| s == name) {
                Some(idx) => self.step_list[idx + 1..].to_vec(),
                None => Vec::new(),
            },
        }
    }

    pub fn contains_step(&self, name: &str) -> bool {
        self.step_list.iter().any(|s| s == name)
    }

    /// First step name that appears more than once in the plan.
    pub fn duplicate_step(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        self.step_list
            .iter()
            .find(|s| !seen.insert(s.as_str()))
            .map(String::as_str)
    }

    pub fn touch(&mut self) {
        self.updated = Some(Utc::now());
    }
}

/// What the runner does when it reaches a frontend step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrontendStepBehavior {
    #[default]
    Break,
    Skip,
    Fail,
}

impl std::fmt::Display for FrontendStepBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrontendStepBehavior::Break => write!(f, "break"),
            FrontendStepBehavior::Skip => write!(f, "skip"),
            FrontendStepBehavior::Fail => write!(f, "fail"),
        }
    }
}

impl std::str::FromStr for FrontendStepBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "break" => Ok(FrontendStepBehavior::Break),
            "skip" => Ok(FrontendStepBehavior::Skip),
            "fail" => Ok(FrontendStepBehavior::Fail),
            other => Err(format!("invalid frontend step behavior: {}", other)),
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    Paused,
    Failed,
    Cancelled,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Paused => write!(f, "paused"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request to start or resume a run.
#[derive(Clone, Default)]
pub struct RunInput {
    pub process_name: String,
    pub run_id: Option<String>,
    pub resume_after_step: Option<String>,
    pub values: Values,
    pub records: Vec<Record>,
    pub frontend_step_behavior: FrontendStepBehavior,
    pub callback: Option<Arc<dyn DataCompletionCallback>>,
}

impl RunInput {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            ..Default::default()
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn resume_after(mut self, step: impl Into<String>) -> Self {
        self.resume_after_step = Some(step.into());
        self
    }

    pub fn with_value(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn with_values(mut self, values: Values) -> Self {
        self.values.extend(values);
        self
    }

    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    pub fn with_frontend_behavior(mut self, behavior: FrontendStepBehavior) -> Self {
        self.frontend_step_behavior = behavior;
        self
    }

    pub fn with_callback(mut self, callback: Arc<dyn DataCompletionCallback>) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl std::fmt::Debug for RunInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunInput")
            .field("process_name", &self.process_name)
            .field("run_id", &self.run_id)
            .field("resume_after_step", &self.resume_after_step)
            .field("values", &self.values)
            .field("records", &self.records.len())
            .field("frontend_step_behavior", &self.frontend_step_behavior)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Request to run a process's cancel step against an existing run.
#[derive(Clone, Default)]
pub struct CancelInput {
    pub process_name: String,
    pub run_id: String,
    pub callback: Option<Arc<dyn DataCompletionCallback>>,
}

impl CancelInput {
    pub fn new(process_name: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
            run_id: run_id.into(),
            callback: None,
        }
    }
}

/// Result of a run, resume or cancel. Always carries the latest state when one exists.
#[derive(Debug)]
pub struct RunOutput {
    pub run_id: String,
    pub status: RunStatus,
    pub values: Values,
    pub records: Vec<Record>,
    pub process_state: Option<ProcessState>,
    /// Last step the runner considered, executed or not.
    pub last_step: Option<String>,
    pub failure: Option<EngineError>,
}

impl RunOutput {
    /// Output for an invocation that aborted before any state existed.
    pub fn aborted(run_id: impl Into<String>, error: EngineError) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Failed,
            values: Values::new(),
            records: Vec::new(),
            process_state: None,
            last_step: None,
            failure: Some(error),
        }
    }

    pub fn from_state(run_id: impl Into<String>, status: RunStatus, state: ProcessState) -> Self {
        Self {
            run_id: run_id.into(),
            status,
            values: state.values.clone(),
            records: state.records.clone(),
            process_state: Some(state),
            last_step: None,
            failure: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    pub fn into_result(self) -> Result<RunOutput, EngineError> {
        let mut output = self;
        match output.failure.take() {
            Some(err) => Err(err),
            None => Ok(output),
        }
    }
}
