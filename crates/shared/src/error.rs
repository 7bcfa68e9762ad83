use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    AuthenticationFailure,
    SubscriptionFailure,
    ValidationFailure,
    NotReady,
    SaveFailure,
    DeleteFailure,
    OperationInFlight,
}

/// A recoverable, user-visible failure. None of these are fatal; the user may retry.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind:?}: {message}")]
pub struct InventoryError {
    pub kind: ErrorKind,
    pub message: String,
}

impl InventoryError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AuthenticationFailure, message)
    }

    pub fn subscription(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SubscriptionFailure, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailure, message)
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
    }

    pub fn save(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SaveFailure, message)
    }

    pub fn delete(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeleteFailure, message)
    }

    pub fn in_flight(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OperationInFlight, message)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}
