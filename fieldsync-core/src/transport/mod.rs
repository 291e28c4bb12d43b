//! The network-facing contract the orchestrator drives.
//!
//! A transport performs one operation against the server and classifies the
//! outcome. The operation id is passed as an idempotency key so that a
//! replay of an operation whose response was lost is recognized as a
//! duplicate rather than applied twice.

mod http;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::operation::{OperationId, OperationKind};

pub use http::{HttpTransport, IDEMPOTENCY_HEADER};
pub(crate) use http::build_http_url;

/// Successful delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The server applied the operation.
    Applied,
    /// The server had already applied this idempotency key.
    AlreadyApplied,
}

/// How the orchestrator should treat a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient: timeouts, connection loss, 5xx.
    Retryable,
    /// The server rejected the operation as invalid. Never retried.
    Terminal,
    /// The transport could not tell. Handled as retryable until the cap.
    Unclassified,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::Retryable => write!(f, "retryable"),
            ErrorClass::Terminal => write!(f, "terminal"),
            ErrorClass::Unclassified => write!(f, "unclassified"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct TransportError {
    pub class: ErrorClass,
    pub message: String,
}

impl TransportError {
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Retryable, message)
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Terminal, message)
    }

    pub fn unclassified(message: impl Into<String>) -> Self {
        Self::new(ErrorClass::Unclassified, message)
    }

    /// Whether the failure may succeed on a later attempt.
    pub fn is_retryable(&self) -> bool {
        !matches!(self.class, ErrorClass::Terminal)
    }
}

/// Host-supplied request/response call for a single operation.
///
/// The engine imposes no timeout of its own; a transport timeout should be
/// reported as [`ErrorClass::Retryable`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn perform(
        &self,
        idempotency_key: &OperationId,
        kind: OperationKind,
        resource: &str,
        payload: &Value,
    ) -> Result<Delivery, TransportError>;
}
