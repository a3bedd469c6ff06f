//! Per-node authorization state machine
//!
//! ```text
//! Unknown --beacon verified--> BeaconReceived --session--> SessionActive
//!    ^                                                        |    ^
//!    |                                   liveness ∧ nonce ok  v    | safety
//!    +---- liveness lost / bad signature ---- Revoked <---- Ready  | violation
//!                                               ^             |    |
//!                                               |  within     v    |
//!                                               +-------- Enabled -+
//! ```
//!
//! `NodeAuth` owns everything the decision needs for one node: the state,
//! the session, the heartbeat record and the pending readiness nonce. The
//! coordinator keeps each `NodeAuth` behind its own mutex, so every method
//! here sees a consistent snapshot and is the only way the state changes.
//!
//! Invariants:
//! - `Enabled` is entered only when a session exists, liveness is `Alive` and
//!   the safety envelope is within limit, all checked in the same call.
//! - Leaving `Enabled` for any reason clears the beam output before the
//!   state field changes.
//! - `Revoked` is transient: a safety violation settles back in
//!   `SessionActive` with a fresh nonce, liveness loss and signature failure
//!   destroy the session and settle in `Unknown`.
//! - A denial never moves the state.

use log::debug;
use serde::Serialize;

use crate::audit::{emit, AuditEvent, AuditSink};
use crate::beam::BeamOutput;
use crate::config::CoordinatorConfig;
use crate::entropy::Nonce;
use crate::error::{AuthError, ErrorKind, Result};
use crate::identity::NodeIdentity;
use crate::liveness::{self, HeartbeatRecord, Liveness};
use crate::message::Beacon;
use crate::safety::SafetyEnvelope;
use crate::session::{KeyAgreement, Session};
use crate::verifier::{self, Freshness};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum AuthState {
    Unknown,
    BeaconReceived,
    SessionActive,
    Ready,
    Enabled,
    /// Transient; never observed between calls
    Revoked,
}

impl AuthState {
    fn has_session(self) -> bool {
        matches!(
            self,
            AuthState::SessionActive | AuthState::Ready | AuthState::Enabled
        )
    }
}

/// Collaborators a transition may touch
pub struct Effects<'a> {
    pub beam: &'a dyn BeamOutput,
    pub audit: &'a dyn AuditSink,
    pub config: &'a CoordinatorConfig,
}

/// Where a revocation settles
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settle {
    KeepSession,
    DropSession,
}

#[derive(Debug)]
pub struct NodeAuth {
    node_id: String,
    state: AuthState,
    last_transition: f64,
    last_beacon: Option<f64>,
    session: Option<Session>,
    heartbeat: Option<HeartbeatRecord>,
    nonce: Option<Nonce>,
    retired: bool,
}

impl NodeAuth {
    pub fn new(node_id: impl Into<String>, now: f64) -> Self {
        Self {
            node_id: node_id.into(),
            state: AuthState::Unknown,
            last_transition: now,
            last_beacon: None,
            session: None,
            heartbeat: None,
            nonce: None,
            retired: false,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn last_transition(&self) -> f64 {
        self.last_transition
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn heartbeat(&self) -> Option<&HeartbeatRecord> {
        self.heartbeat.as_ref()
    }

    pub fn liveness(&self, now: f64) -> Liveness {
        liveness::check(self.heartbeat.as_ref(), now)
    }

    /// Whether the node was deregistered while a caller held a handle to it
    pub fn is_retired(&self) -> bool {
        self.retired
    }

    /// Handle a schema-checked beacon
    ///
    /// A valid beacon moves `Unknown` to `BeaconReceived` and refreshes the
    /// replay watermark in every other state. A signature failure while a
    /// session exists revokes the session.
    pub fn on_beacon(
        &mut self,
        beacon: &Beacon,
        identity: Option<&NodeIdentity>,
        fx: &Effects<'_>,
        now: f64,
    ) -> Result<AuthState> {
        let freshness = Freshness {
            now,
            window: fx.config.freshness_window_secs,
            last_accepted: self.last_beacon,
        };

        match verifier::verify(beacon, identity, freshness) {
            Ok(()) => {
                self.last_beacon = Some(beacon.timestamp());
                if self.state == AuthState::Unknown {
                    self.transition(AuthState::BeaconReceived, fx, now);
                }
                Ok(self.state)
            }
            Err(err) if err.kind() == ErrorKind::InvalidSignature && self.state.has_session() => {
                self.revoke(err.kind(), Settle::DropSession, fx, now);
                Err(err)
            }
            Err(err) => Err(self.deny(err, fx, now)),
        }
    }

    /// Establish a session from externally agreed key material
    ///
    /// Seeds the heartbeat record at `now` and returns the readiness nonce
    /// the node must echo.
    pub fn on_session_key(
        &mut self,
        key_material: &[u8],
        agreement: &dyn KeyAgreement,
        fx: &Effects<'_>,
        now: f64,
    ) -> Result<Nonce> {
        if self.session.is_some() {
            let err = AuthError::DuplicateSession {
                node_id: self.node_id.clone(),
            };
            return Err(self.deny(err, fx, now));
        }
        if self.state != AuthState::BeaconReceived {
            return Err(self.deny(self.not_verified(), fx, now));
        }

        let session_key = match agreement.accept(&self.node_id, key_material) {
            Ok(key) => key,
            Err(err) => return Err(self.deny(err, fx, now)),
        };

        self.session = Some(Session::new(self.node_id.clone(), session_key, now));
        self.heartbeat = Some(HeartbeatRecord::seed(
            self.node_id.clone(),
            now,
            fx.config.heartbeat_interval_secs,
        ));
        let nonce = self.fresh_nonce();
        self.transition(AuthState::SessionActive, fx, now);
        Ok(nonce)
    }

    /// Record a heartbeat received at `now`
    ///
    /// Liveness runs on the coordinator clock. The node's own `timestamp` is
    /// unauthenticated and only reported when it disagrees with `now` by more
    /// than the freshness window.
    pub fn on_heartbeat(&mut self, timestamp: f64, fx: &Effects<'_>, now: f64) -> Result<()> {
        match self.heartbeat.as_mut() {
            Some(record) => {
                if (now - timestamp).abs() > fx.config.freshness_window_secs {
                    debug!(
                        "{}: heartbeat clock skew {:.3}s",
                        self.node_id,
                        timestamp - now
                    );
                }
                if !record.record(now) {
                    debug!(
                        "{}: ignoring heartbeat received at {} (last seen {})",
                        self.node_id,
                        now,
                        record.last_seen()
                    );
                }
                Ok(())
            }
            None => Err(self.deny(self.not_verified(), fx, now)),
        }
    }

    /// Issue a replacement readiness nonce
    pub fn issue_nonce(&mut self, fx: &Effects<'_>, now: f64) -> Result<Nonce> {
        if self.state != AuthState::SessionActive {
            return Err(self.deny(self.not_verified(), fx, now));
        }
        Ok(self.fresh_nonce())
    }

    /// Handle a ready message echoing the issued nonce
    ///
    /// The pending nonce is consumed whatever the outcome.
    pub fn on_ready(&mut self, echoed: &Nonce, fx: &Effects<'_>, now: f64) -> Result<AuthState> {
        match self.state {
            AuthState::SessionActive => {}
            AuthState::Ready | AuthState::Enabled => {
                // A second ready is a replay; the nonce is already spent
                let err = AuthError::NonceMismatch {
                    node_id: self.node_id.clone(),
                };
                return Err(self.deny(err, fx, now));
            }
            _ => return Err(self.deny(self.not_verified(), fx, now)),
        }

        let accepted = self
            .nonce
            .take()
            .is_some_and(|issued| issued.matches(echoed));
        if !accepted {
            let err = AuthError::NonceMismatch {
                node_id: self.node_id.clone(),
            };
            return Err(self.deny(err, fx, now));
        }

        if let Liveness::Lost { silent_for } = self.liveness(now) {
            let err = AuthError::LivenessLost {
                node_id: self.node_id.clone(),
                silent_for,
            };
            self.revoke(err.kind(), Settle::DropSession, fx, now);
            return Err(err);
        }

        self.transition(AuthState::Ready, fx, now);
        Ok(self.state)
    }

    /// Gate the beam on a freshly computed safety envelope
    ///
    /// From `Ready` this enables the beam if every condition holds; from
    /// `Enabled` it re-checks them and revokes on any violation. An envelope
    /// that could not be computed counts as a violation.
    pub fn authorize(
        &mut self,
        envelope: Result<SafetyEnvelope>,
        fx: &Effects<'_>,
        now: f64,
    ) -> Result<AuthState> {
        if !matches!(self.state, AuthState::Ready | AuthState::Enabled) {
            // Bad physical input is reported as such whatever the state
            let err = match envelope {
                Err(err) => err,
                Ok(_) => self.not_verified(),
            };
            return Err(self.deny(err, fx, now));
        }

        if self.session.is_none() {
            let err = self.not_verified();
            self.revoke(err.kind(), Settle::DropSession, fx, now);
            return Err(err);
        }

        if let Liveness::Lost { silent_for } = self.liveness(now) {
            let err = AuthError::LivenessLost {
                node_id: self.node_id.clone(),
                silent_for,
            };
            self.revoke(err.kind(), Settle::DropSession, fx, now);
            return Err(err);
        }

        if let Err(err) = envelope.and_then(|envelope| envelope.ensure_within_limit()) {
            self.revoke(err.kind(), Settle::KeepSession, fx, now);
            return Err(err);
        }

        if self.state == AuthState::Ready {
            fx.beam.assert_enable(&self.node_id);
            self.transition(AuthState::Enabled, fx, now);
        }
        Ok(self.state)
    }

    /// Periodic liveness check; revokes if the node has gone silent
    pub fn sweep(&mut self, fx: &Effects<'_>, now: f64) -> Option<AuthError> {
        if !self.state.has_session() {
            return None;
        }
        match self.liveness(now) {
            Liveness::Alive => None,
            Liveness::Lost { silent_for } => {
                let err = AuthError::LivenessLost {
                    node_id: self.node_id.clone(),
                    silent_for,
                };
                self.revoke(err.kind(), Settle::DropSession, fx, now);
                Some(err)
            }
        }
    }

    /// Explicit session teardown; the node must start over with a beacon
    pub fn teardown(&mut self, fx: &Effects<'_>, now: f64) {
        if self.state == AuthState::Enabled {
            fx.beam.clear_enable(&self.node_id);
        }
        self.drop_session();
        if self.state != AuthState::Unknown {
            self.transition(AuthState::Unknown, fx, now);
        }
    }

    /// Tear down and mark the unit unusable
    pub fn retire(&mut self, fx: &Effects<'_>, now: f64) {
        self.teardown(fx, now);
        self.retired = true;
    }

    fn revoke(&mut self, kind: ErrorKind, settle: Settle, fx: &Effects<'_>, now: f64) {
        let beam_cleared = self.state == AuthState::Enabled;
        if beam_cleared {
            fx.beam.clear_enable(&self.node_id);
        }
        self.transition(AuthState::Revoked, fx, now);

        let settled = match settle {
            Settle::KeepSession => {
                self.fresh_nonce();
                AuthState::SessionActive
            }
            Settle::DropSession => {
                self.drop_session();
                AuthState::Unknown
            }
        };
        self.transition(settled, fx, now);

        emit(
            fx.audit,
            AuditEvent::Revoked {
                node_id: self.node_id.clone(),
                kind,
                beam_cleared,
                settled,
                at: now,
            },
        );
    }

    fn deny(&self, err: AuthError, fx: &Effects<'_>, now: f64) -> AuthError {
        emit(
            fx.audit,
            AuditEvent::Denied {
                node_id: self.node_id.clone(),
                kind: err.kind(),
                at: now,
            },
        );
        err
    }

    fn transition(&mut self, to: AuthState, fx: &Effects<'_>, now: f64) {
        let from = self.state;
        self.state = to;
        self.last_transition = now;
        emit(
            fx.audit,
            AuditEvent::Transition {
                node_id: self.node_id.clone(),
                from,
                to,
                at: now,
            },
        );
    }

    fn fresh_nonce(&mut self) -> Nonce {
        let nonce = Nonce::generate();
        self.nonce = Some(nonce.clone());
        nonce
    }

    fn drop_session(&mut self) {
        self.session = None;
        self.heartbeat = None;
        self.nonce = None;
    }

    fn not_verified(&self) -> AuthError {
        AuthError::NotVerified {
            node_id: self.node_id.clone(),
        }
    }
}
