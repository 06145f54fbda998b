//! Error types for the Sentinel Grid workshop crate.
//!
//! Each subsystem has its own error enum; [`SentinelError`] wraps them all
//! for callers that drive several subsystems at once (the runner binary,
//! the agent system).

use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The requested service has no configured port.
    #[error("Unknown service: {name}")]
    UnknownService { name: String },

    /// The verbosity string does not name a known level.
    #[error("Invalid verbosity level '{value}' (expected silent, minimal, normal, verbose or debug)")]
    InvalidVerbosity { value: String },

    /// The display feature name is not recognised.
    #[error("Unknown display feature: {name}")]
    UnknownFeature { name: String },

    /// A port override could not be parsed.
    #[error("Invalid port for {service}: {value}")]
    InvalidPort { service: String, value: String },
}

/// Errors raised while building or validating a command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The service name is not grid, emergency or traffic.
    #[error("Unknown service type: {0}")]
    UnknownService(String),

    /// The action is not allowed for the service.
    #[error("Invalid action '{action}' for service {service}")]
    InvalidAction { service: String, action: String },

    /// Parameter validation failed.
    #[error("Invalid parameters for {action}: {message}")]
    InvalidParameters { action: String, message: String },

    /// The command could not be decoded.
    #[error("Malformed command: {0}")]
    Malformed(String),
}

impl CommandError {
    pub(crate) fn params(action: &str, message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            action: action.to_string(),
            message: message.into(),
        }
    }
}

/// Errors from dispatching a command to a service over HTTP.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The request did not complete before the deadline.
    #[error("Request to {url} timed out")]
    Timeout { url: String },

    /// The service could not be reached.
    #[error("Connection to {url} failed: {message}")]
    Connection { url: String, message: String },

    /// The service answered with a non-success status.
    #[error("{status} - {body}")]
    Status { status: u16, body: String },

    /// Any other transport error.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ExecutorError {
    /// Classify a reqwest error by its cause.
    pub fn from_reqwest(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
            }
        } else if err.is_connect() {
            Self::Connection {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Http(err)
        }
    }

    /// Whether this error means the service itself was unavailable.
    pub fn is_unavailable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connection { .. } => true,
            Self::Status { status, .. } => *status >= 500,
            Self::Http(_) => false,
        }
    }
}

/// Errors from an LLM provider.
#[derive(Debug, Error)]
pub enum LlmError {
    /// No API key was configured.
    #[error("API key not set. Set OPENAI_API_KEY or pass api_key to the constructor.")]
    MissingApiKey,

    /// Transport failure.
    #[error("LLM request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error status.
    #[error("LLM API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// The response could not be interpreted.
    #[error("Failed to parse LLM response: {0}")]
    Parse(String),

    /// Retries were exhausted.
    #[error("LLM call failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

/// Scenario lookup and activation errors.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("Scenario not found: {0}")]
    NotFound(String),

    #[error("Scenario day must be between 1 and 31, got {0}")]
    InvalidDay(u32),

    #[error("Unknown scenario type: {0}")]
    UnknownType(String),

    #[error("Failed to load scenario definition: {0}")]
    Load(String),
}

/// Errors from reading or writing result files.
#[derive(Debug, Error)]
pub enum ResultsError {
    #[error("Results IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Results serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Umbrella error for the workshop crate.
#[derive(Debug, Error)]
pub enum SentinelError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Results(#[from] ResultsError),
}

/// Convenience result alias.
pub type Result<T, E = SentinelError> = std::result::Result<T, E>;
