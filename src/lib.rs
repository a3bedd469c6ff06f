//! Beamgate - safety-gated authorization for directed microwave power beaming
//!
//! The beam toward a Ground Reception Node may be enabled only while:
//! 1. The node's identity is proven by a fresh RSA-PSS signed beacon
//! 2. A session exists and the node's heartbeats are recent
//! 3. The computed power density at the receiver is within the safety limit
//!
//! [`Coordinator`] is the only component that asserts or clears the beam
//! output. It revokes immediately, clearing the beam first, when any of the
//! three conditions stops holding.

pub mod audit;
pub mod authorization;
pub mod beam;
pub mod config;
pub mod coordinator;
pub mod entropy;
pub mod error;
pub mod identity;
pub mod liveness;
pub mod message;
pub mod node;
pub mod safety;
pub mod session;
pub mod verifier;

pub use audit::{AuditEvent, AuditSink, MemoryAudit};
pub use authorization::AuthState;
pub use beam::{BeamOutput, LoggedBeam, RecordingBeam};
pub use config::CoordinatorConfig;
pub use coordinator::{spawn_sweeper, unix_now, Coordinator, Reply, Sweeper};
pub use entropy::Nonce;
pub use error::{AuthError, ErrorKind};
pub use identity::NodeIdentity;
pub use liveness::Liveness;
pub use message::Message;
pub use node::GroundNode;
pub use safety::{SafetyEnvelope, POWER_DENSITY_LIMIT};
pub use session::{KeyAgreement, PreSharedKey, SessionKey};
