//! Loopback middleware for scenario runs and tests.
//!
//! Published commands are integrated with unicycle kinematics at the
//! control period, and transform lookups answer from the integrated poses,
//! closing the control loop without any robotics middleware underneath.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex,
    },
};

use rvo_geometry::{Float, Pose, Vector2};
use serde::Deserialize;

use crate::interfaces::{
    AgentStatus, Command, CommandSink, ControllerStatus, FleetError, FleetSource, GoalType,
    PathRequest, TransformError, TransformSource, VelocityMarker,
};

#[derive(Default)]
struct SimState {
    poses: BTreeMap<String, Pose>,
    statuses: BTreeMap<String, ControllerStatus>,
    commands: BTreeMap<String, Vec<Command>>,
    markers: BTreeMap<String, Vec<VelocityMarker>>,
}

/// A simulated world shared between the coordinator's middleware seams.
pub struct SimWorld {
    state: Mutex<SimState>,
    control_period: Float,
    map_frame: String,
    fleet_service_up: AtomicBool,
}

impl SimWorld {
    pub fn new(control_period: Float, map_frame: impl Into<String>) -> Self {
        Self {
            state: Mutex::new(SimState::default()),
            control_period,
            map_frame: map_frame.into(),
            fleet_service_up: AtomicBool::new(true),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, SimState> {
        self.state.lock().expect("sim state mutex poisoned")
    }

    pub fn map_frame(&self) -> &str {
        &self.map_frame
    }

    /// Add a robot to the simulated fleet at the given pose.
    pub fn add_agent(&self, id: impl Into<String>, pose: Pose) {
        self.state().poses.insert(id.into(), pose);
    }

    /// Drop a robot from the simulated fleet.
    pub fn remove_agent(&self, id: &str) {
        self.state().poses.remove(id);
    }

    /// Toggle the simulated fleet service; while down, membership queries
    /// fail and the coordinator keeps its previous fleet.
    pub fn set_fleet_service_up(&self, up: bool) {
        self.fleet_service_up.store(up, Ordering::SeqCst);
    }

    pub fn pose(&self, id: &str) -> Option<Pose> {
        self.state().poses.get(id).copied()
    }

    pub fn status(&self, id: &str) -> Option<AgentStatus> {
        self.state().statuses.get(id).map(|status| status.status)
    }

    /// Every command published for the agent, in publish order.
    pub fn commands(&self, id: &str) -> Vec<Command> {
        self.state().commands.get(id).cloned().unwrap_or_default()
    }

    pub fn last_command(&self, id: &str) -> Option<Command> {
        self.state()
            .commands
            .get(id)
            .and_then(|commands| commands.last().copied())
    }

    pub fn markers(&self, id: &str) -> Vec<VelocityMarker> {
        self.state().markers.get(id).cloned().unwrap_or_default()
    }

    fn frame_to_id(frame: &str) -> &str {
        frame.split_once('/').map_or(frame, |(id, _)| id)
    }
}

impl TransformSource for SimWorld {
    fn lookup(&self, frame: &str) -> Result<Pose, TransformError> {
        let id = Self::frame_to_id(frame);
        self.state()
            .poses
            .get(id)
            .copied()
            .ok_or_else(|| TransformError::Unavailable {
                frame: frame.to_owned(),
                reason: "frame not in simulated world".to_owned(),
            })
    }
}

impl FleetSource for SimWorld {
    fn active_agents(&self) -> Result<BTreeSet<String>, FleetError> {
        if !self.fleet_service_up.load(Ordering::SeqCst) {
            return Err(FleetError::Unavailable("simulated outage".to_owned()));
        }
        Ok(self.state().poses.keys().cloned().collect())
    }
}

impl CommandSink for SimWorld {
    fn publish_velocity(&self, agent_id: &str, command: Command) {
        let mut state = self.state();
        if let Some(pose) = state.poses.get_mut(agent_id) {
            // forward Euler over one control period
            let step = pose.heading() * (command.linear * self.control_period);
            pose.position += step;
            pose.yaw += command.angular * self.control_period;
        }
        state
            .commands
            .entry(agent_id.to_owned())
            .or_default()
            .push(command);
    }

    fn publish_status(&self, status: &ControllerStatus) {
        self.state()
            .statuses
            .insert(status.agent_id.clone(), status.clone());
    }

    fn publish_marker(&self, agent_id: &str, marker: &VelocityMarker) {
        self.state()
            .markers
            .entry(agent_id.to_owned())
            .or_default()
            .push(marker.clone());
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// One robot of a scenario file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ScenarioAgent {
    pub id: String,
    pub start: Pose,
    #[serde(default)]
    pub path: Vec<Vector2>,
    #[serde(default)]
    pub goal_type: Option<GoalType>,
    #[serde(default)]
    pub goal_id: Option<String>,
}

impl ScenarioAgent {
    /// The path assignment this scenario entry expands to.
    pub fn request(&self) -> PathRequest {
        PathRequest {
            agent_id: self.id.clone(),
            path: self.path.clone(),
            goal_type: self.goal_type,
            goal_id: self.goal_id.clone(),
        }
    }
}

/// A TOML scenario: the simulated fleet and its tasks.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Scenario {
    #[serde(default)]
    pub name: Option<String>,
    pub agents: Vec<ScenarioAgent>,
    /// Wall-clock budget before the run is abandoned.
    #[serde(default = "Scenario::default_max_time_s")]
    pub max_time_s: f64,
}

impl Scenario {
    fn default_max_time_s() -> f64 {
        60.0
    }

    pub fn from_file<P>(path: P) -> Result<Self, ScenarioError>
    where
        P: AsRef<std::path::Path>,
    {
        std::fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|contents| Self::parse(contents.as_str()))
    }

    pub fn parse(contents: &str) -> Result<Self, ScenarioError> {
        toml::from_str(contents).map_err(Into::into)
    }
}
