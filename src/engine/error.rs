use thiserror::Error;

/// Errors surfaced by the runner and canceler.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Unknown process or step, or no stored state for a resume/cancel target.
    #[error("not found: {0}")]
    NotFound(String),

    /// Missing required identifiers on the request.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Input could not be satisfied and nothing could supply it.
    #[error("{message}")]
    UserFacing { step: String, message: String },

    /// A frontend step was reached under the `fail` policy.
    #[error("frontend step '{step}' reached in process '{process}'")]
    FrontendStep { process: String, step: String },

    /// A backend step's handler failed.
    #[error("step '{step}' of process '{process}' failed: {message}")]
    Step {
        process: String,
        step: String,
        message: String,
    },

    #[error("{context}: {source:#}")]
    Internal {
        context: String,
        source: anyhow::Error,
    },
}

impl EngineError {
    pub fn internal(context: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::Internal {
            context: context.into(),
            source,
        }
    }

    /// True when the error can be shown to an end user as a request for input.
    pub fn is_user_facing(&self) -> bool {
        matches!(self, EngineError::UserFacing { .. })
    }

    /// Short machine-readable category.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound(_) => "not_found",
            EngineError::BadRequest(_) => "bad_request",
            EngineError::UserFacing { .. } => "user_facing",
            EngineError::FrontendStep { .. } => "frontend_step",
            EngineError::Step { .. } => "step",
            EngineError::Internal { .. } => "internal",
        }
    }
}
