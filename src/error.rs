//! Error types for the signup flow.

use std::time::Duration;

use crate::flow::FlowPhase;

/// Top-level error type for the crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("Flow error: {0}")]
    Flow(#[from] FlowError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Analytics error: {0}")]
    Analytics(#[from] AnalyticsError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse flow definition: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A single field rejected by validation. Never reaches the network.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Construction-time violations of the step sequence invariants.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Step sequence must contain at least one step")]
    EmptySequence,

    #[error("Step {index} has no fields")]
    EmptyStep { index: usize },

    #[error("Radio field {field} has no options")]
    RadioWithoutOptions { field: String },

    #[error("Terminal share field {field} cannot be required or carry a validator")]
    InvalidTerminalField { field: String },

    #[error("Step {index} contains a terminal share field but is not the last step")]
    TerminalShareNotLast { index: usize },

    #[error("Field name {field} appears more than once")]
    DuplicateField { field: String },

    #[error("Sequence has {count} persistence boundaries, expected exactly one")]
    BoundaryCount { count: usize },

    #[error("Persistence boundary at step {index} is followed by a collecting step")]
    BoundaryNotFinal { index: usize },

    #[error("Persistence boundary at step {index} has nothing to collect")]
    BoundaryOnTerminal { index: usize },

    #[error("Sequence has no collecting step")]
    NothingToCollect,

    #[error("Unknown validator: {name}")]
    UnknownValidator { name: String },
}

/// Errors returned by controller operations.
///
/// Persistence failures are not here: they are folded into `FlowState`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Flow is not open")]
    NotOpen,

    #[error("A submission is already in flight")]
    SubmissionInProgress,

    #[error("Flow already completed")]
    AlreadyCompleted,

    #[error("Cannot transition from {from} to {to}")]
    InvalidTransition { from: FlowPhase, to: FlowPhase },
}

/// Errors from the flow registry behind the shell API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Unknown flow: {0}")]
    UnknownFlow(String),

    #[error(transparent)]
    Flow(#[from] FlowError),
}

/// Errors raised by a submission sink.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("Insert into {collection} failed: {reason}")]
    RequestFailed { collection: String, reason: String },

    #[error("Store rejected insert into {collection} with status {status}: {body}")]
    Rejected {
        collection: String,
        status: u16,
        body: String,
    },

    #[error("Request to store timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),
}

/// Analytics delivery errors. Always swallowed by the controller.
#[derive(Debug, thiserror::Error)]
pub enum AnalyticsError {
    #[error("Analytics transport failed: {0}")]
    Transport(String),

    #[error("Analytics serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the crate.
pub type Result<T> = std::result::Result<T, Error>;
