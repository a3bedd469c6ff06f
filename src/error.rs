//! Error taxonomy for the authorization core
//!
//! Every variant is recoverable at the protocol level: the affected node is
//! denied or revoked, the coordinator keeps running. Each error carries a
//! stable [`ErrorKind`] so that denials and revocations can be audited from
//! log lines without parsing messages.

use serde::Serialize;
use thiserror::Error;

/// Stable classification of an [`AuthError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    InvalidSignature,
    UnknownNode,
    StaleBeacon,
    NotVerified,
    DuplicateSession,
    NonceMismatch,
    InvalidPhysicalInput,
    SafetyLimitExceeded,
    LivenessLost,
    InvalidKeyMaterial,
    MalformedMessage,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AuthError {
    #[error("invalid beacon signature for node {node_id}")]
    InvalidSignature { node_id: String },

    #[error("no identity registered for node {node_id}")]
    UnknownNode { node_id: String },

    #[error("stale beacon from node {node_id} (timestamp {timestamp}, now {now})")]
    StaleBeacon {
        node_id: String,
        timestamp: f64,
        now: f64,
    },

    #[error("node {node_id} has not passed beacon verification")]
    NotVerified { node_id: String },

    #[error("node {node_id} already holds an active session")]
    DuplicateSession { node_id: String },

    #[error("ready nonce mismatch for node {node_id}")]
    NonceMismatch { node_id: String },

    #[error("invalid physical input: {parameter} = {value} (must be finite and > 0)")]
    InvalidPhysicalInput { parameter: &'static str, value: f64 },

    #[error("power density {power_density:.3e} W/m² exceeds the {threshold} W/m² limit")]
    SafetyLimitExceeded { power_density: f64, threshold: f64 },

    #[error("liveness lost for node {node_id} (silent for {silent_for:.3}s)")]
    LivenessLost { node_id: String, silent_for: f64 },

    #[error("key material for node {node_id} rejected: {reason}")]
    InvalidKeyMaterial { node_id: String, reason: String },

    #[error("malformed message: {0}")]
    MalformedMessage(String),
}

impl AuthError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AuthError::InvalidSignature { .. } => ErrorKind::InvalidSignature,
            AuthError::UnknownNode { .. } => ErrorKind::UnknownNode,
            AuthError::StaleBeacon { .. } => ErrorKind::StaleBeacon,
            AuthError::NotVerified { .. } => ErrorKind::NotVerified,
            AuthError::DuplicateSession { .. } => ErrorKind::DuplicateSession,
            AuthError::NonceMismatch { .. } => ErrorKind::NonceMismatch,
            AuthError::InvalidPhysicalInput { .. } => ErrorKind::InvalidPhysicalInput,
            AuthError::SafetyLimitExceeded { .. } => ErrorKind::SafetyLimitExceeded,
            AuthError::LivenessLost { .. } => ErrorKind::LivenessLost,
            AuthError::InvalidKeyMaterial { .. } => ErrorKind::InvalidKeyMaterial,
            AuthError::MalformedMessage(_) => ErrorKind::MalformedMessage,
        }
    }
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
