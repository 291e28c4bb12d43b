//! The unit of offline work and its identifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Errors parsing operation identifiers or enum names.
#[derive(Error, Debug, PartialEq)]
pub enum OperationParseError {
    #[error("Invalid operation id '{0}'")]
    InvalidId(String),

    #[error("Invalid operation kind '{0}'. Valid options: create, update, delete")]
    InvalidKind(String),

    #[error("Invalid operation state '{0}'. Valid options: pending, failed_terminal")]
    InvalidState(String),
}

/// Globally unique operation id, generated on the client at enqueue time.
///
/// Doubles as the idempotency key handed to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(Uuid);

impl OperationId {
    /// Generate a new random operation id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for OperationId {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim())
            .map(Self)
            .map_err(|_| OperationParseError::InvalidId(s.to_string()))
    }
}

/// What an operation does to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationKind::Create),
            "update" => Ok(OperationKind::Update),
            "delete" => Ok(OperationKind::Delete),
            _ => Err(OperationParseError::InvalidKind(s.to_string())),
        }
    }
}

/// Persisted lifecycle state.
///
/// An operation being attempted has no state of its own: a crash mid-attempt
/// leaves it `Pending`, and the idempotency key makes the replay safe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationState {
    #[default]
    Pending,
    FailedTerminal,
}

impl OperationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationState::Pending => "pending",
            OperationState::FailedTerminal => "failed_terminal",
        }
    }
}

impl fmt::Display for OperationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationState {
    type Err = OperationParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "pending" => Ok(OperationState::Pending),
            "failed_terminal" => Ok(OperationState::FailedTerminal),
            _ => Err(OperationParseError::InvalidState(s.to_string())),
        }
    }
}

/// One durably recorded offline intent to mutate server state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub kind: OperationKind,
    pub resource: String,
    pub payload: Value,
    pub enqueued_at: DateTime<Utc>,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub state: OperationState,
}

impl Operation {
    pub fn new(kind: OperationKind, resource: impl Into<String>, payload: Value) -> Self {
        Self {
            id: OperationId::new(),
            kind,
            resource: resource.into(),
            payload,
            enqueued_at: Utc::now(),
            retry_count: 0,
            last_error: None,
            state: OperationState::Pending,
        }
    }

    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = id;
        self
    }

    pub fn with_enqueued_at(mut self, enqueued_at: DateTime<Utc>) -> Self {
        self.enqueued_at = enqueued_at;
        self
    }

    pub fn is_pending(&self) -> bool {
        self.state == OperationState::Pending
    }

    pub fn is_failed_terminal(&self) -> bool {
        self.state == OperationState::FailedTerminal
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} [{}, retries: {}]",
            self.id, self.kind, self.resource, self.state, self.retry_count
        )?;
        if let Some(err) = &self.last_error {
            write!(f, " last error: {}", err)?;
        }
        Ok(())
    }
}
