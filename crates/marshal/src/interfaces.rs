//! The contracts between the coordinator core and the robotics middleware.
//!
//! The middleware side (message bus, transform tree, fleet bringup) is out
//! of scope for this crate; the coordinator only consumes these traits and
//! the loopback implementation in [`crate::sim`] exercises them.

use std::collections::BTreeSet;

use rvo_geometry::{are_same, Float, Pose, Vector2};
use serde::{Deserialize, Serialize};

/// A differential-drive command: forward speed plus rotation about +z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Command {
    pub linear: Float,
    pub angular: Float,
}

impl Command {
    /// The explicit stop command.
    pub const STOP: Self = Self {
        linear: 0.0,
        angular: 0.0,
    };

    #[must_use]
    pub fn is_zero(self) -> bool {
        are_same(self.linear, 0.0) && are_same(self.angular, 0.0)
    }
}

/// Lifecycle status an agent reports on its status topic.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Busy,
    Succeeded,
    Failed,
}

/// Task category attached to a path assignment.
///
/// An assignment without a goal type is treated as a homing task with the
/// relaxed goal threshold. A `Search` assignment triggers the in-place
/// rotation pattern and is the one request allowed to carry an empty path.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumString,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "snake_case")]
pub enum GoalType {
    Navigate,
    Home,
    Search,
}

/// Status broadcast payload: one per agent per full tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerStatus {
    pub agent_id: String,
    pub status: AgentStatus,
    pub goal_id: Option<String>,
}

/// Arrow marker of an agent's preferred velocity, for visualization.
#[derive(Debug, Clone, PartialEq)]
pub struct VelocityMarker {
    /// Frame the marker is expressed in (the map frame).
    pub frame: String,
    pub origin: Vector2,
    pub velocity: Vector2,
}

/// One path assignment entry of a controller service request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathRequest {
    pub agent_id: String,
    /// Ordered waypoints, first to last.
    pub path: Vec<Vector2>,
    #[serde(default)]
    pub goal_type: Option<GoalType>,
    #[serde(default)]
    pub goal_id: Option<String>,
}

/// The controller service: either an emergency stop or a batch of path
/// assignments.
#[derive(Debug, Clone)]
pub enum ControllerRequest {
    Stop,
    AssignPaths(Vec<PathRequest>),
}

/// Controller service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerResponse {
    pub success: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("transform for frame `{frame}` unavailable: {reason}")]
    Unavailable { frame: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum FleetError {
    #[error("fleet service unavailable: {0}")]
    Unavailable(String),
}

/// Transform tree lookups: pose of a frame in the map frame, now.
pub trait TransformSource: Send + Sync {
    fn lookup(&self, frame: &str) -> Result<Pose, TransformError>;
}

/// The fleet-membership service.
pub trait FleetSource: Send + Sync {
    fn active_agents(&self) -> Result<BTreeSet<String>, FleetError>;
}

/// Outbound topics: per-agent velocity commands and controller statuses.
pub trait CommandSink: Send + Sync {
    fn publish_velocity(&self, agent_id: &str, command: Command);

    fn publish_status(&self, status: &ControllerStatus);

    /// Optional visualization output; sinks that have nowhere to draw an
    /// arrow can keep the default no-op.
    fn publish_marker(&self, agent_id: &str, marker: &VelocityMarker) {
        let _ = (agent_id, marker);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_command_is_zero_uses_tolerance() {
        assert!(Command::STOP.is_zero());
        assert!(Command {
            linear: 1e-9,
            angular: -1e-9
        }
        .is_zero());
        assert!(!Command {
            linear: 0.1,
            angular: 0.0
        }
        .is_zero());
    }

    #[test]
    fn test_status_display() {
        assert_eq!(AgentStatus::Idle.to_string(), "idle");
        assert_eq!(AgentStatus::Succeeded.to_string(), "succeeded");
    }

    #[test]
    fn test_goal_type_round_trips_through_serde() {
        let text = "goal-type = \"search\"\nagent-id = \"a1\"\npath = []\n";
        let request: PathRequest = toml::from_str(text).expect("valid request");
        assert_eq!(request.goal_type, Some(GoalType::Search));
        assert_eq!(request.agent_id, "a1");
        assert!(request.path.is_empty());
    }
}
