//! Audit trail for authorization decisions
//!
//! Every transition, denial and revocation is logged and handed to an
//! [`AuditSink`]. Denials and revocations carry the [`ErrorKind`] that caused
//! them, so safety-relevant decisions can be reconstructed afterwards.

use log::{info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::authorization::AuthState;
use crate::error::ErrorKind;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AuditEvent {
    Transition {
        node_id: String,
        from: AuthState,
        to: AuthState,
        at: f64,
    },
    /// A request was refused; the node's state did not advance
    Denied {
        node_id: String,
        kind: ErrorKind,
        at: f64,
    },
    /// An authorization was withdrawn
    Revoked {
        node_id: String,
        kind: ErrorKind,
        /// Whether the beam was enabled and had to be cleared
        beam_cleared: bool,
        /// State the node settled in after the revocation
        settled: AuthState,
        at: f64,
    },
}

impl AuditEvent {
    pub fn node_id(&self) -> &str {
        match self {
            AuditEvent::Transition { node_id, .. }
            | AuditEvent::Denied { node_id, .. }
            | AuditEvent::Revoked { node_id, .. } => node_id,
        }
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: &AuditEvent);
}

/// Sink that discards events (they are still logged)
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAudit;

impl AuditSink for NoAudit {
    fn record(&self, _event: &AuditEvent) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryAudit {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAudit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, node_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.node_id() == node_id)
            .cloned()
            .collect()
    }
}

impl AuditSink for MemoryAudit {
    fn record(&self, event: &AuditEvent) {
        self.events.lock().push(event.clone());
    }
}

/// Log an event, then forward it to the sink
pub(crate) fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    match &event {
        AuditEvent::Transition { node_id, from, to, .. } => {
            info!("{}: {:?} -> {:?}", node_id, from, to);
        }
        AuditEvent::Denied { node_id, kind, .. } => {
            warn!("{}: DENIED ({:?})", node_id, kind);
        }
        AuditEvent::Revoked {
            node_id,
            kind,
            beam_cleared,
            settled,
            ..
        } => {
            warn!(
                "{}: REVOKED ({:?}), beam cleared: {}, settled in {:?}",
                node_id, kind, beam_cleared, settled
            );
        }
    }
    sink.record(&event);
}
