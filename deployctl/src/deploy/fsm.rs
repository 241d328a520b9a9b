//! Finite state machine for a rebuild cycle

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rebuild phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPhase {
    /// Nothing done yet
    Pending,

    /// Stopping the previous container
    Stopping,

    /// Removing the stopped container
    Removing,

    /// Removing the deployment's previous image
    RemovingImage,

    /// Applying build patches to the build context
    Patching,

    /// Building the new image
    Building,

    /// Starting the new container
    Starting,

    /// Confirming exactly one container is running
    Verifying,

    /// Fresh container up
    Running,

    Failed,
}

impl fmt::Display for RebuildPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RebuildPhase::Pending => "pending",
            RebuildPhase::Stopping => "stopping",
            RebuildPhase::Removing => "removing container",
            RebuildPhase::RemovingImage => "removing image",
            RebuildPhase::Patching => "patching",
            RebuildPhase::Building => "building",
            RebuildPhase::Starting => "starting",
            RebuildPhase::Verifying => "verifying",
            RebuildPhase::Running => "running",
            RebuildPhase::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Rebuild event
#[derive(Debug, Clone)]
pub enum RebuildEvent {
    Stop,
    Remove,
    RemoveImage,
    Patch,
    Build,
    Start,
    Verify,
    Complete,
    Fail,
}

/// Rebuild FSM
#[derive(Debug, Clone)]
pub struct RebuildFsm {
    phase: RebuildPhase,
    history: Vec<RebuildPhase>,
}

impl RebuildFsm {
    pub fn new() -> Self {
        Self {
            phase: RebuildPhase::Pending,
            history: vec![RebuildPhase::Pending],
        }
    }

    pub fn phase(&self) -> RebuildPhase {
        self.phase
    }

    /// Every phase entered so far, in order
    pub fn history(&self) -> &[RebuildPhase] {
        &self.history
    }

    /// Process an event and transition phase
    pub fn process(&mut self, event: RebuildEvent) -> Result<RebuildPhase, String> {
        use RebuildEvent as E;
        use RebuildPhase as P;

        let next = match (self.phase, &event) {
            (P::Pending | P::Running | P::Failed, E::Stop) => P::Stopping,
            (P::Stopping, E::Remove) => P::Removing,
            (P::Removing, E::RemoveImage) => P::RemovingImage,
            (P::Removing | P::RemovingImage, E::Patch) => P::Patching,
            (P::Patching, E::Build) => P::Building,
            (P::Building, E::Start) => P::Starting,

            // restart without rebuilding
            (P::Pending | P::Running, E::Start) => P::Starting,

            (P::Starting, E::Verify) => P::Verifying,
            (P::Verifying, E::Complete) => P::Running,

            (phase, E::Fail) if phase != P::Running && phase != P::Failed => P::Failed,

            (phase, event) => {
                return Err(format!("Invalid transition: {:?} -> {:?}", phase, event));
            }
        };

        self.phase = next;
        self.history.push(next);
        Ok(next)
    }
}

impl Default for RebuildFsm {
    fn default() -> Self {
        Self::new()
    }
}
