//! Authorization coordinator
//!
//! Holds one [`NodeAuth`] per node, keyed by `node_id`, each behind its own
//! mutex. Nodes never share mutable state; the only shared structures are
//! the identity registry and the map of units, both read-mostly.
//!
//! Lock order is always map, then unit. Handlers clone the unit handle out of
//! the map and release the map lock before locking the unit, so work on one
//! node never blocks another. Deregistration holds the map write lock while
//! it retires the unit, which makes removal of identity, session and
//! heartbeat record a single step with respect to every other handler.
//!
//! Safety envelopes are computed before the unit is locked; they are a pure
//! function of their inputs, so the decision still sees one consistent
//! snapshot of session, liveness and safety.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};

use crate::audit::{emit, AuditEvent, AuditSink, NoAudit};
use crate::authorization::{AuthState, Effects, NodeAuth};
use crate::beam::BeamOutput;
use crate::config::CoordinatorConfig;
use crate::entropy::Nonce;
use crate::error::{AuthError, Result};
use crate::identity::{IdentityRegistry, NodeIdentity};
use crate::liveness::Liveness;
use crate::message::{Beacon, Inbound, Message};
use crate::safety::SafetyEnvelope;
use crate::session::{KeyAgreement, PreSharedKey};
use crate::verifier::{self, Freshness};

type Unit = Arc<Mutex<NodeAuth>>;

/// Outcome of a handled message
#[derive(Debug)]
pub enum Reply {
    /// State after a beacon or ready message
    State(AuthState),
    /// Session established; the nonce must be delivered to the node
    Nonce(Nonce),
    /// Heartbeat recorded
    Ack,
}

pub struct Coordinator {
    config: CoordinatorConfig,
    identities: IdentityRegistry,
    nodes: RwLock<HashMap<String, Unit>>,
    beam: Arc<dyn BeamOutput>,
    audit: Arc<dyn AuditSink>,
    keys: Arc<dyn KeyAgreement>,
}

impl Coordinator {
    pub fn new(config: CoordinatorConfig, beam: Arc<dyn BeamOutput>) -> Self {
        Self {
            config,
            identities: IdentityRegistry::new(),
            nodes: RwLock::new(HashMap::new()),
            beam,
            audit: Arc::new(NoAudit),
            keys: Arc::new(PreSharedKey),
        }
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_key_agreement(mut self, keys: Arc<dyn KeyAgreement>) -> Self {
        self.keys = keys;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    fn effects(&self) -> Effects<'_> {
        Effects {
            beam: self.beam.as_ref(),
            audit: self.audit.as_ref(),
            config: &self.config,
        }
    }

    /// Register a node identity; `false` if the id is already taken
    pub fn register(&self, identity: NodeIdentity) -> bool {
        let node_id = identity.node_id().to_owned();
        let added = self.identities.register(identity);
        if added {
            info!("{}: identity registered", node_id);
        } else {
            warn!("{}: identity already registered, keeping existing key", node_id);
        }
        added
    }

    /// Remove a node entirely, disabling its beam first if it is enabled
    ///
    /// Returns `false` if the node was not registered.
    pub fn deregister(&self, node_id: &str, now: f64) -> bool {
        let mut nodes = self.nodes.write();
        let identity = self.identities.remove(node_id);
        if let Some(unit) = nodes.remove(node_id) {
            unit.lock().retire(&self.effects(), now);
        }
        drop(nodes);

        if identity.is_some() {
            info!("{}: deregistered", node_id);
        }
        identity.is_some()
    }

    /// Current state of a node; `Unknown` if it has never sent a beacon
    pub fn state(&self, node_id: &str) -> AuthState {
        self.unit(node_id)
            .map(|unit| unit.lock().state())
            .unwrap_or(AuthState::Unknown)
    }

    pub fn liveness(&self, node_id: &str, now: f64) -> Liveness {
        match self.unit(node_id) {
            Some(unit) => unit.lock().liveness(now),
            None => crate::liveness::check(None, now),
        }
    }

    /// Decode, validate and dispatch a wire message
    pub fn handle_bytes(&self, bytes: &[u8], now: f64) -> Result<Reply> {
        let message = Message::decode(bytes).map_err(|err| self.reject(None, err, now))?;
        self.handle(message, now)
    }

    /// Validate and dispatch a message
    pub fn handle(&self, message: Message, now: f64) -> Result<Reply> {
        let node_id = message.node_id().to_owned();
        let inbound = message
            .validate()
            .map_err(|err| self.reject(Some(&node_id), err, now))?;

        match inbound {
            Inbound::Beacon(beacon) => self.beacon(&beacon, now).map(Reply::State),
            Inbound::SessionKey {
                node_id,
                key_material,
            } => self.establish(&node_id, &key_material, now).map(Reply::Nonce),
            Inbound::Ready { node_id, nonce } => self.ready(&node_id, &nonce, now).map(Reply::State),
            Inbound::Heartbeat { node_id, timestamp } => self
                .record_heartbeat(&node_id, timestamp, now)
                .map(|()| Reply::Ack),
        }
    }

    /// Verify a beacon; the first valid one creates the node's unit
    pub fn beacon(&self, beacon: &Beacon, now: f64) -> Result<AuthState> {
        let node_id = beacon.node_id();
        let Some(identity) = self.identities.get(node_id) else {
            // Same verification work as a registered node, then UnknownNode
            let freshness = Freshness {
                now,
                window: self.config.freshness_window_secs,
                last_accepted: None,
            };
            let err = match verifier::verify(beacon, None, freshness) {
                Err(err) => err,
                Ok(()) => AuthError::UnknownNode {
                    node_id: node_id.to_owned(),
                },
            };
            return Err(self.reject(Some(node_id), err, now));
        };

        let unit = self.unit_or_insert(node_id, now)?;
        let mut node = unit.lock();
        if node.is_retired() {
            return Err(self.unknown(node_id, now));
        }
        node.on_beacon(beacon, Some(identity.as_ref()), &self.effects(), now)
    }

    /// Establish a session; returns the readiness nonce for the node
    pub fn establish(&self, node_id: &str, key_material: &[u8], now: f64) -> Result<Nonce> {
        self.with_unit(node_id, now, |node, fx| {
            node.on_session_key(key_material, self.keys.as_ref(), fx, now)
        })
    }

    /// Issue a replacement nonce to a node in `SessionActive`
    pub fn issue_nonce(&self, node_id: &str, now: f64) -> Result<Nonce> {
        self.with_unit(node_id, now, |node, fx| node.issue_nonce(fx, now))
    }

    pub fn ready(&self, node_id: &str, nonce: &Nonce, now: f64) -> Result<AuthState> {
        self.with_unit(node_id, now, |node, fx| node.on_ready(nonce, fx, now))
    }

    pub fn record_heartbeat(&self, node_id: &str, timestamp: f64, now: f64) -> Result<()> {
        self.with_unit(node_id, now, |node, fx| node.on_heartbeat(timestamp, fx, now))
    }

    /// Enable the beam toward a `Ready` node, or re-check an `Enabled` one
    ///
    /// An invalid physical input is returned to the caller unchanged and
    /// also revokes the node back to `SessionActive`, since safety can no
    /// longer be shown.
    pub fn authorize(
        &self,
        node_id: &str,
        ish_power: f64,
        distance: f64,
        now: f64,
    ) -> Result<AuthState> {
        let envelope = SafetyEnvelope::compute(
            ish_power,
            distance,
            self.config.frequency_hz,
            self.config.aperture_diameter_m,
        );
        self.with_unit(node_id, now, |node, fx| node.authorize(envelope, fx, now))
    }

    /// Destroy a node's session without deregistering it
    pub fn teardown(&self, node_id: &str, now: f64) -> Result<()> {
        self.with_unit(node_id, now, |node, fx| {
            node.teardown(fx, now);
            Ok(())
        })
    }

    /// Revoke every node whose liveness has been lost
    ///
    /// Returns the revocations performed, one per node.
    pub fn sweep(&self, now: f64) -> Vec<AuthError> {
        let units: Vec<Unit> = self.nodes.read().values().cloned().collect();
        let fx = self.effects();

        units
            .iter()
            .filter_map(|unit| {
                let mut node = unit.lock();
                if node.is_retired() {
                    return None;
                }
                node.sweep(&fx, now)
            })
            .collect()
    }

    /// Nodes currently in `Enabled`
    pub fn enabled_nodes(&self) -> Vec<String> {
        let units: Vec<Unit> = self.nodes.read().values().cloned().collect();
        let mut enabled: Vec<String> = units
            .iter()
            .filter_map(|unit| {
                let node = unit.lock();
                (node.state() == AuthState::Enabled).then(|| node.node_id().to_owned())
            })
            .collect();
        enabled.sort();
        enabled
    }

    fn unit(&self, node_id: &str) -> Option<Unit> {
        self.nodes.read().get(node_id).cloned()
    }

    fn unit_or_insert(&self, node_id: &str, now: f64) -> Result<Unit> {
        if let Some(unit) = self.unit(node_id) {
            return Ok(unit);
        }

        let mut nodes = self.nodes.write();
        // Deregistration may have run since the identity lookup
        if self.identities.get(node_id).is_none() {
            drop(nodes);
            return Err(self.unknown(node_id, now));
        }
        let unit = nodes
            .entry(node_id.to_owned())
            .or_insert_with(|| {
                debug!("{}: new authorization unit", node_id);
                Arc::new(Mutex::new(NodeAuth::new(node_id, now)))
            })
            .clone();
        Ok(unit)
    }

    fn with_unit<T>(
        &self,
        node_id: &str,
        now: f64,
        f: impl FnOnce(&mut NodeAuth, &Effects<'_>) -> Result<T>,
    ) -> Result<T> {
        let Some(unit) = self.unit(node_id) else {
            return Err(self.unrecognised(node_id, now));
        };
        let mut node = unit.lock();
        if node.is_retired() {
            return Err(self.unknown(node_id, now));
        }
        f(&mut *node, &self.effects())
    }

    /// A message for a node with no unit: unknown identity, or known but
    /// never verified
    fn unrecognised(&self, node_id: &str, now: f64) -> AuthError {
        if self.identities.get(node_id).is_none() {
            return self.unknown(node_id, now);
        }
        let err = AuthError::NotVerified {
            node_id: node_id.to_owned(),
        };
        self.reject(Some(node_id), err, now)
    }

    fn unknown(&self, node_id: &str, now: f64) -> AuthError {
        let err = AuthError::UnknownNode {
            node_id: node_id.to_owned(),
        };
        self.reject(Some(node_id), err, now)
    }

    /// Record a denial that happened before any unit was involved
    fn reject(&self, node_id: Option<&str>, err: AuthError, now: f64) -> AuthError {
        emit(
            self.audit.as_ref(),
            AuditEvent::Denied {
                node_id: node_id.unwrap_or("<undecodable>").to_owned(),
                kind: err.kind(),
                at: now,
            },
        );
        err
    }
}

/// Seconds since the Unix epoch, as used for beacon and heartbeat timestamps
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0)
}

/// Background liveness sweep; stops when dropped
pub struct Sweeper {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl Sweeper {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("liveness sweeper panicked");
            }
        }
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run [`Coordinator::sweep`] every `sweep_interval_secs` on its own thread
///
/// `clock` supplies `now`; pass [`unix_now`] outside of tests.
pub fn spawn_sweeper<C>(coordinator: Arc<Coordinator>, clock: C) -> std::io::Result<Sweeper>
where
    C: Fn() -> f64 + Send + 'static,
{
    let stop = Arc::new(AtomicBool::new(false));
    let cadence = Duration::try_from_secs_f64(coordinator.config().sweep_interval_secs)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let thread = std::thread::Builder::new()
        .name("liveness-sweep".into())
        .spawn({
            let stop = Arc::clone(&stop);
            move || {
                while !stop.load(Ordering::SeqCst) {
                    let revoked = coordinator.sweep(clock());
                    if !revoked.is_empty() {
                        debug!("liveness sweep revoked {} node(s)", revoked.len());
                    }
                    std::thread::sleep(cadence);
                }
            }
        })?;

    Ok(Sweeper {
        stop,
        thread: Some(thread),
    })
}
