//! Beam-enable output
//!
//! The authorization core never touches RF hardware. It asserts and clears
//! the per-node enable line through [`BeamOutput`]; whatever drives the
//! transmitter implements the trait. Calls are made while the node's state
//! lock is held, so implementations must not call back into the coordinator.
//!
//! `clear_enable` must take effect before it returns. The state machine
//! relies on that to guarantee the beam is off before a revocation is
//! recorded.

use std::collections::HashSet;

use log::info;
use parking_lot::Mutex;

pub trait BeamOutput: Send + Sync {
    /// Enable the beam toward `node_id`
    fn assert_enable(&self, node_id: &str);

    /// Disable the beam toward `node_id`; idempotent
    fn clear_enable(&self, node_id: &str);
}

/// Output that only logs, for dry runs and simulation
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggedBeam;

impl BeamOutput for LoggedBeam {
    fn assert_enable(&self, node_id: &str) {
        info!("BEAM ENABLE -> {}", node_id);
    }

    fn clear_enable(&self, node_id: &str) {
        info!("BEAM DISABLE -> {}", node_id);
    }
}

/// A command issued to a [`BeamOutput`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BeamCommand {
    Enable(String),
    Disable(String),
}

/// Output that records every command and the resulting enable set
#[derive(Debug, Default)]
pub struct RecordingBeam {
    inner: Mutex<Recorded>,
}

#[derive(Debug, Default)]
struct Recorded {
    commands: Vec<BeamCommand>,
    enabled: HashSet<String>,
}

impl RecordingBeam {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self, node_id: &str) -> bool {
        self.inner.lock().enabled.contains(node_id)
    }

    pub fn commands(&self) -> Vec<BeamCommand> {
        self.inner.lock().commands.clone()
    }
}

impl BeamOutput for RecordingBeam {
    fn assert_enable(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        inner.commands.push(BeamCommand::Enable(node_id.to_owned()));
        inner.enabled.insert(node_id.to_owned());
    }

    fn clear_enable(&self, node_id: &str) {
        let mut inner = self.inner.lock();
        inner.commands.push(BeamCommand::Disable(node_id.to_owned()));
        inner.enabled.remove(node_id);
    }
}
