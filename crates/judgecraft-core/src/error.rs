use std::time::Duration;

/// A malformed case. Fatal for the suite that declares it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaseDefinitionError {
    #[error("case name must not be empty")]
    EmptyName,

    #[error("case '{0}' sets both expected_output and criteria")]
    ConflictingDirective(String),

    #[error("case '{0}' sets neither expected_output nor criteria")]
    MissingDirective(String),

    #[error("case '{0}' has an empty criteria list")]
    EmptyCriteria(String),

    #[error("case '{0}' is already registered")]
    DuplicateName(String),
}

/// Failure reported by a generative-model backend.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("{0}")]
    Other(String),
}

/// Failure of a single `Agent::process` call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AgentError {
    /// Transient; the runner backs off and retries.
    #[error("rate limited: {message}")]
    RateLimited {
        retry_after: Option<Duration>,
        message: String,
    },

    #[error("{0}")]
    Failed(String),
}

impl AgentError {
    pub fn failed(message: impl Into<String>) -> Self {
        AgentError::Failed(message.into())
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        AgentError::RateLimited {
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, AgentError::RateLimited { .. })
    }

    /// The underlying error text, without the variant prefix.
    pub fn message(&self) -> &str {
        match self {
            AgentError::RateLimited { message, .. } => message,
            AgentError::Failed(message) => message,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AgentError::RateLimited { retry_after, .. } => *retry_after,
            AgentError::Failed(_) => None,
        }
    }
}

impl From<BackendError> for AgentError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::RateLimited {
                retry_after,
                message,
            } => AgentError::RateLimited {
                retry_after,
                message,
            },
            BackendError::Other(message) => AgentError::Failed(message),
        }
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(err: anyhow::Error) -> Self {
        let err = match err.downcast::<AgentError>() {
            Ok(agent_err) => return agent_err,
            Err(err) => err,
        };
        match err.downcast::<BackendError>() {
            Ok(backend_err) => backend_err.into(),
            Err(err) => AgentError::Failed(format!("{err:#}")),
        }
    }
}
