//! End-to-end authorization protocol tests
//!
//! Drives the coordinator with wire messages from simulated nodes and checks
//! the beam output against the audit trail.

use std::sync::{Arc, OnceLock};
use std::thread;

use parking_lot::Mutex;
use rand_core::OsRng;
use rsa::RsaPrivateKey;

use beamgate::audit::{AuditEvent, AuditSink};
use beamgate::beam::BeamOutput;
use beamgate::{
    AuthState, Coordinator, CoordinatorConfig, ErrorKind, GroundNode, MemoryAudit, Nonce,
    RecordingBeam, Reply,
};

const T0: f64 = 1_760_659_200.0;
const KEY: [u8; 32] = [0x42; 32];

// ════════════════════════════════════════════════════════════════════════════
// HELPERS
// ════════════════════════════════════════════════════════════════════════════

/// Beam output and audit sink sharing one ordered trace
#[derive(Debug, Default)]
struct Trace {
    entries: Mutex<Vec<Entry>>,
}

#[derive(Debug, Clone, PartialEq)]
enum Entry {
    Enable(String),
    Disable(String),
    Audit(AuditEvent),
}

impl Trace {
    fn entries(&self) -> Vec<Entry> {
        self.entries.lock().clone()
    }
}

impl BeamOutput for Trace {
    fn assert_enable(&self, node_id: &str) {
        self.entries.lock().push(Entry::Enable(node_id.to_owned()));
    }

    fn clear_enable(&self, node_id: &str) {
        self.entries.lock().push(Entry::Disable(node_id.to_owned()));
    }
}

impl AuditSink for Trace {
    fn record(&self, event: &AuditEvent) {
        self.entries.lock().push(Entry::Audit(event.clone()));
    }
}

/// RSA key generation is slow; nodes share a small pool of keys
fn grn(node_id: &str) -> GroundNode {
    static KEYS: [OnceLock<RsaPrivateKey>; 2] = [OnceLock::new(), OnceLock::new()];
    let slot = node_id.bytes().map(usize::from).sum::<usize>() % KEYS.len();
    let key = KEYS[slot].get_or_init(|| RsaPrivateKey::new(&mut OsRng, 2048).unwrap());
    GroundNode::new(node_id, key.clone()).unwrap()
}

fn nonce_of(reply: Reply) -> Nonce {
    match reply {
        Reply::Nonce(nonce) => nonce,
        other => panic!("expected nonce, got {other:?}"),
    }
}

fn state_of(reply: Reply) -> AuthState {
    match reply {
        Reply::State(state) => state,
        other => panic!("expected state, got {other:?}"),
    }
}

/// Walk a registered node from Unknown to Enabled
fn enable(coordinator: &Coordinator, node: &mut GroundNode, at: f64) {
    let state = state_of(coordinator.handle(node.beacon(at).unwrap(), at).unwrap());
    assert_eq!(state, AuthState::BeaconReceived);

    let nonce = nonce_of(coordinator.handle(node.session_key_message(&KEY), at).unwrap());
    assert_eq!(coordinator.state(node.node_id()), AuthState::SessionActive);

    let state = state_of(coordinator.handle(node.ready(&nonce), at + 0.01).unwrap());
    assert_eq!(state, AuthState::Ready);

    let state = coordinator
        .authorize(node.node_id(), 1e9, 3.6e11, at + 0.02)
        .unwrap();
    assert_eq!(state, AuthState::Enabled);
}

// ════════════════════════════════════════════════════════════════════════════
// TESTS
// ════════════════════════════════════════════════════════════════════════════

#[test]
fn test_happy_path_enables_beam() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());

    enable(&coordinator, &mut node, T0);
    assert!(beam.is_enabled("GRN-001"));
}

#[test]
fn test_missed_heartbeats_clear_beam_before_revocation() {
    let trace = Arc::new(Trace::default());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), trace.clone())
        .with_audit(trace.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    // Heartbeats every 50 ms, then silence
    for i in 1..=4 {
        let at = T0 + 0.05 * i as f64;
        coordinator.handle(node.heartbeat(at), at).unwrap();
        assert!(coordinator.sweep(at + 0.01).is_empty());
    }
    let last = T0 + 0.2;
    let revoked = coordinator.sweep(last + 0.16);
    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].kind(), ErrorKind::LivenessLost);
    assert_eq!(coordinator.state("GRN-001"), AuthState::Unknown);

    let entries = trace.entries();
    let disable = entries
        .iter()
        .position(|e| *e == Entry::Disable("GRN-001".into()))
        .expect("beam was cleared");
    let revoked_transition = entries
        .iter()
        .position(|e| {
            matches!(
                e,
                Entry::Audit(AuditEvent::Transition {
                    from: AuthState::Enabled,
                    to: AuthState::Revoked,
                    ..
                })
            )
        })
        .expect("revocation recorded");
    assert!(disable < revoked_transition);

    assert!(entries.iter().any(|e| matches!(
        e,
        Entry::Audit(AuditEvent::Revoked {
            kind: ErrorKind::LivenessLost,
            beam_cleared: true,
            settled: AuthState::Unknown,
            ..
        })
    )));
}

#[test]
fn test_revoked_node_can_reenter_with_fresh_beacon() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());

    enable(&coordinator, &mut node, T0);
    coordinator.sweep(T0 + 1.0);
    assert!(!beam.is_enabled("GRN-001"));

    // The old session is gone; re-entry starts from a new beacon
    enable(&coordinator, &mut node, T0 + 2.0);
    assert!(beam.is_enabled("GRN-001"));
}

#[test]
fn test_replayed_beacon_is_stale() {
    let coordinator = Coordinator::new(CoordinatorConfig::default(), Arc::new(RecordingBeam::new()));
    let node = grn("GRN-001");
    coordinator.register(node.identity());

    let captured = node.beacon(T0).unwrap();
    coordinator.handle(captured.clone(), T0).unwrap();
    let err = coordinator.handle(captured, T0 + 0.5).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StaleBeacon);
    assert_eq!(coordinator.state("GRN-001"), AuthState::BeaconReceived);
}

#[test]
fn test_wrong_nonce_never_advances_from_any_state() {
    let coordinator = Coordinator::new(CoordinatorConfig::default(), Arc::new(RecordingBeam::new()));
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    let forged = Nonce::from_bytes([0x11; 32]);

    // Unknown
    let err = coordinator.handle(node.ready(&forged), T0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotVerified);
    assert_eq!(coordinator.state("GRN-001"), AuthState::Unknown);

    // BeaconReceived
    coordinator.handle(node.beacon(T0).unwrap(), T0).unwrap();
    assert!(coordinator.handle(node.ready(&forged), T0).is_err());
    assert_eq!(coordinator.state("GRN-001"), AuthState::BeaconReceived);

    // SessionActive
    coordinator
        .handle(node.session_key_message(&KEY), T0)
        .unwrap();
    let err = coordinator.handle(node.ready(&forged), T0 + 0.01).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NonceMismatch);
    assert_eq!(coordinator.state("GRN-001"), AuthState::SessionActive);
}

#[test]
fn test_unsafe_power_is_refused_and_session_kept() {
    let beam = Arc::new(RecordingBeam::new());
    let audit = Arc::new(MemoryAudit::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone())
        .with_audit(audit.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    let err = coordinator
        .authorize("GRN-001", 1e10, 2.5e7, T0 + 0.03)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SafetyLimitExceeded);
    assert!(!beam.is_enabled("GRN-001"));
    assert_eq!(coordinator.state("GRN-001"), AuthState::SessionActive);

    // A fresh nonce lets the node come back once the geometry is safe
    let nonce = coordinator.issue_nonce("GRN-001", T0 + 0.04).unwrap();
    coordinator.handle(node.ready(&nonce), T0 + 0.05).unwrap();
    let state = coordinator.authorize("GRN-001", 1e9, 3.6e11, T0 + 0.06).unwrap();
    assert_eq!(state, AuthState::Enabled);

    let revocations: Vec<_> = audit
        .events_for("GRN-001")
        .into_iter()
        .filter(|e| matches!(e, AuditEvent::Revoked { .. }))
        .collect();
    assert_eq!(revocations.len(), 1);
}

#[test]
fn test_invalid_physical_input_is_surfaced() {
    let coordinator = Coordinator::new(CoordinatorConfig::default(), Arc::new(RecordingBeam::new()));
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    for (power, distance) in [(0.0, 1e9), (-5.0, 1e9), (1e9, 0.0), (1e9, -1.0)] {
        let err = coordinator
            .authorize("GRN-001", power, distance, T0 + 0.03)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidPhysicalInput);
    }
    assert_eq!(coordinator.state("GRN-001"), AuthState::SessionActive);
}

#[test]
fn test_nodes_are_independent_across_threads() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Arc::new(Coordinator::new(CoordinatorConfig::default(), beam.clone()));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let mut node = grn(&format!("GRN-{i:03}"));
                coordinator.register(node.identity());
                enable(&coordinator, &mut node, T0);
                node
            })
        })
        .collect();
    let nodes: Vec<GroundNode> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(coordinator.enabled_nodes().len(), 8);

    // Only even nodes keep sending heartbeats
    for node in nodes.iter().step_by(2) {
        coordinator
            .handle(node.heartbeat(T0 + 0.1), T0 + 0.1)
            .unwrap();
    }
    let revoked = coordinator.sweep(T0 + 0.2);
    assert_eq!(revoked.len(), 4);
    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(beam.is_enabled(node.node_id()), i % 2 == 0);
    }
}

#[test]
fn test_future_dated_heartbeat_cannot_hold_beam_open() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    coordinator
        .handle(node.heartbeat(T0 + 3600.0), T0 + 0.03)
        .unwrap();
    let revoked = coordinator.sweep(T0 + 600.0);

    assert_eq!(revoked.len(), 1);
    assert_eq!(revoked[0].kind(), ErrorKind::LivenessLost);
    assert_eq!(coordinator.state("GRN-001"), AuthState::Unknown);
    assert!(!beam.is_enabled("GRN-001"));
}

#[test]
fn test_node_with_slow_clock_stays_enabled() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    // Heartbeats every 50 ms from a clock one second behind
    for i in 1..=8 {
        let at = T0 + 0.02 + 0.05 * i as f64;
        coordinator.handle(node.heartbeat(at - 1.0), at).unwrap();
        assert!(coordinator.sweep(at + 0.01).is_empty());
    }
    assert_eq!(coordinator.state("GRN-001"), AuthState::Enabled);
    assert!(beam.is_enabled("GRN-001"));
}

#[test]
fn test_teardown_requires_new_beacon() {
    let beam = Arc::new(RecordingBeam::new());
    let coordinator = Coordinator::new(CoordinatorConfig::default(), beam.clone());
    let mut node = grn("GRN-001");
    coordinator.register(node.identity());
    enable(&coordinator, &mut node, T0);

    coordinator.teardown("GRN-001", T0 + 0.03).unwrap();
    assert!(!beam.is_enabled("GRN-001"));

    let err = coordinator
        .handle(node.session_key_message(&KEY), T0 + 0.04)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotVerified);
}
