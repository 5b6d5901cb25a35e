// src/types/errors.rs - Error taxonomy: validation, actuator, store, stuck actions

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use super::{ActionKind, UserId};

/// Rejected synchronously, never partially applied
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Expression '{expression}' is already registered")]
    AlreadyRegistered { expression: String },

    #[error("Invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("No entry matching '{expression}' exists")]
    NotFound { expression: String },

    #[error("Malformed schedule request: {0}")]
    MalformedSchedule(String),

    #[error("Unknown action kind: {0}")]
    UnknownAction(String),
}

/// Typed failure of a platform call
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActuatorError {
    #[error("Subject not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Platform unavailable: {0}")]
    Unavailable(String),

    #[error("Platform call timed out after {0:?}")]
    TimedOut(Duration),
}

pub type ActuatorResult<T> = Result<T, ActuatorError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Document serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt document {collection}/{id}: {reason}")]
    Corrupt { collection: String, id: String, reason: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A deferred action whose handler failed and now waits for an operator
#[derive(Error, Debug, Clone, PartialEq)]
#[error("Action {action_id} ({kind} for {subject_id}) is stuck: {cause}")]
pub struct StuckActionError {
    pub action_id: Uuid,
    pub kind: ActionKind,
    pub subject_id: UserId,
    pub cause: String,
}

#[derive(Error, Debug)]
pub enum ModerationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Actuator(#[from] ActuatorError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Stuck(#[from] StuckActionError),
}

pub type ModerationResult<T> = Result<T, ModerationError>;
