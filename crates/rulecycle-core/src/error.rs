use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    #[error("rule '{id}' has invalid weight {weight}: must be a finite number > 0")]
    InvalidWeight { id: String, weight: f64 },

    #[error("action already registered: {0}")]
    DuplicateAction(String),

    #[error("condition for rule '{rule}' failed: {reason}")]
    ConditionEvaluation { rule: String, reason: String },

    #[error("no handler registered for action: {0}")]
    UnknownAction(String),

    #[error("action '{action}' failed: {reason}")]
    Action { action: String, reason: String },

    #[error("audit sink error: {0}")]
    Sink(String),

    #[error("exclusion memory store error: {0}")]
    Memory(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for errors that must stop the daemon before the loop starts.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_)
                | Error::InvalidRule { .. }
                | Error::DuplicateRule(_)
                | Error::InvalidWeight { .. }
                | Error::DuplicateAction(_)
                | Error::Yaml(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
