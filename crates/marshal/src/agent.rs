//! Per-robot state and the per-tick control pipeline stages.

use std::collections::VecDeque;

use rvo_config::Config;
use rvo_environment::{extract_static_obstacles, ExtractionParams, OccupancyGrid, StaticObstacle};
use rvo_geometry::{Float, Pose, Vector2};
use rvo_solver::{compute_new_velocity, RvoAgent, RvoNeighbour, RvoParams};
use tracing::{debug, info};

use crate::{
    interfaces::{AgentStatus, Command, ControllerStatus, GoalType, VelocityMarker},
    neighbours::{select_neighbours, PeerSnapshot},
};

/// Per-agent copy of the configuration every robot is created with.
#[derive(Debug, Clone, Copy)]
pub struct AgentConfig {
    pub max_speed: Float,
    pub max_angular_speed: Float,
    pub lookahead_distance: Float,
    pub goal_threshold: Float,
    pub homing_goal_threshold: Float,
    pub control_angle_threshold: Float,
    pub search_angular_velocity: Float,
    pub search_rotation_timesteps: u32,
    pub search_pause_timesteps: u32,
    pub search_num_rotations: u32,
}

impl From<&Config> for AgentConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_speed: config.robot.max_speed.get(),
            max_angular_speed: config.robot.max_angular_speed.get(),
            lookahead_distance: config.robot.lookahead_distance.get(),
            goal_threshold: config.robot.goal_threshold.get(),
            homing_goal_threshold: config.robot.homing_goal_threshold.get(),
            control_angle_threshold: config.robot.control_angle_threshold.get(),
            search_angular_velocity: config.search.angular_velocity.get(),
            search_rotation_timesteps: config.search.rotation_timesteps,
            search_pause_timesteps: config.search.pause_timesteps,
            search_num_rotations: config.search.num_rotations,
        }
    }
}

/// Search-rotation sub-state machine.
///
/// `Tracking` is the normal pursuit mode; the rotation variants carry their
/// own tick counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    Tracking,
    Rotation { ticks_left: u32, rotations_done: u32 },
    Searching { ticks_left: u32, rotations_done: u32 },
    RotationCompleted,
    GoalReached,
}

/// What one full pipeline pass wants published.
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub command: Option<Command>,
    pub status: ControllerStatus,
    pub marker: Option<VelocityMarker>,
}

/// One robot of the fleet, as the coordinator sees it.
pub struct Agent {
    id: String,
    frame_id: String,
    config: AgentConfig,
    pose: Pose,
    pose_valid: bool,
    velocity: Vector2,
    preferred_velocity: Vector2,
    rvo_velocity: Vector2,
    path: VecDeque<Vector2>,
    lookahead: Option<Vector2>,
    goal_type: Option<GoalType>,
    goal_id: Option<String>,
    goal_threshold: Float,
    homing: bool,
    status: AgentStatus,
    behaviour: Behaviour,
    at_rest: bool,
    last_command: Command,
    neighbours: Vec<PeerSnapshot>,
    static_obstacles: Vec<StaticObstacle>,
}

impl Agent {
    pub fn new(id: impl Into<String>, base_frame: &str, config: AgentConfig) -> Self {
        let id = id.into();
        let frame_id = format!("{id}/{base_frame}");
        Self {
            id,
            frame_id,
            config,
            pose: Pose::default(),
            pose_valid: false,
            velocity: Vector2::ZERO,
            preferred_velocity: Vector2::ZERO,
            rvo_velocity: Vector2::ZERO,
            path: VecDeque::new(),
            lookahead: None,
            goal_type: None,
            goal_id: None,
            goal_threshold: config.goal_threshold,
            homing: false,
            status: AgentStatus::Idle,
            behaviour: Behaviour::Tracking,
            at_rest: true,
            last_command: Command::STOP,
            neighbours: Vec::new(),
            static_obstacles: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// The transform frame the agent's pose is looked up under.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn behaviour(&self) -> Behaviour {
        self.behaviour
    }

    pub fn pose(&self) -> Pose {
        self.pose
    }

    pub fn current_velocity(&self) -> Vector2 {
        self.velocity
    }

    pub fn preferred_velocity(&self) -> Vector2 {
        self.preferred_velocity
    }

    pub fn rvo_velocity(&self) -> Vector2 {
        self.rvo_velocity
    }

    pub fn remaining_waypoints(&self) -> usize {
        self.path.len()
    }

    pub fn goal_threshold(&self) -> Float {
        self.goal_threshold
    }

    pub fn is_homing(&self) -> bool {
        self.homing
    }

    pub fn goal_type(&self) -> Option<GoalType> {
        self.goal_type
    }

    /// Peer and obstacle lists of the most recent full tick.
    pub fn neighbours(&self) -> &[PeerSnapshot] {
        &self.neighbours
    }

    pub fn static_obstacles(&self) -> &[StaticObstacle] {
        &self.static_obstacles
    }

    pub fn controller_status(&self) -> ControllerStatus {
        ControllerStatus {
            agent_id: self.id.clone(),
            status: self.status,
            goal_id: self.goal_id.clone(),
        }
    }

    /// Install a fresh pose sample, deriving the observed velocity from the
    /// previous one. `dt` is the time between refreshes.
    pub(crate) fn refresh_pose(&mut self, pose: Pose, dt: Float) {
        if self.pose_valid {
            self.velocity = (pose.position - self.pose.position) / dt;
        }
        self.pose = pose;
        self.pose_valid = true;
    }

    pub(crate) fn snapshot(&self) -> PeerSnapshot {
        PeerSnapshot {
            id: self.id.clone(),
            position: self.pose.position,
            velocity: self.velocity,
            preferred_velocity: self.preferred_velocity,
            max_speed: self.config.max_speed,
        }
    }

    /// Replace the waypoint queue and goal metadata.
    ///
    /// A missing goal type marks a homing task and relaxes the goal
    /// threshold; a `Search` goal type starts the rotation pattern instead
    /// of path tracking.
    pub fn assign_path(
        &mut self,
        path: Vec<Vector2>,
        goal_type: Option<GoalType>,
        goal_id: Option<String>,
    ) {
        self.path = path.into();
        self.lookahead = None;
        self.goal_id = goal_id;

        match goal_type {
            None | Some(GoalType::Home) => {
                self.goal_type = Some(GoalType::Home);
                self.homing = true;
                self.goal_threshold = self.config.homing_goal_threshold;
                self.behaviour = Behaviour::Tracking;
            }
            Some(GoalType::Navigate) => {
                self.goal_type = Some(GoalType::Navigate);
                self.homing = false;
                self.goal_threshold = self.config.goal_threshold;
                self.behaviour = Behaviour::Tracking;
            }
            Some(GoalType::Search) => {
                self.goal_type = Some(GoalType::Search);
                self.homing = false;
                self.goal_threshold = self.config.goal_threshold;
                self.behaviour = Behaviour::Rotation {
                    ticks_left: self.config.search_rotation_timesteps,
                    rotations_done: 0,
                };
            }
        }
        self.status = AgentStatus::Busy;
    }

    /// Drop the path and every derived velocity; the agent idles in place.
    pub fn clear_path(&mut self) {
        self.path.clear();
        self.lookahead = None;
        self.preferred_velocity = Vector2::ZERO;
        self.rvo_velocity = Vector2::ZERO;
        self.behaviour = Behaviour::Tracking;
        self.status = AgentStatus::Idle;
    }

    /// Unconditional stop. Returns the zero command to publish.
    pub fn halt(&mut self) -> Command {
        self.at_rest = true;
        self.last_command = Command::STOP;
        self.status = AgentStatus::Idle;
        Command::STOP
    }

    /// The command to re-publish on fast ticks. Zero commands are never
    /// republished.
    pub fn repeat_command(&self) -> Option<Command> {
        (!self.last_command.is_zero()).then_some(self.last_command)
    }

    /// One pass of the full per-agent pipeline: preferred velocity, RVO,
    /// command synthesis. While a search pattern is active it replaces the
    /// pipeline entirely.
    pub fn full_tick(
        &mut self,
        peers: &[PeerSnapshot],
        grid: Option<&OccupancyGrid>,
        config: &Config,
    ) -> TickOutput {
        let command = if self.search_active() {
            self.preferred_velocity = Vector2::ZERO;
            self.rvo_velocity = Vector2::ZERO;
            self.step_search()
        } else {
            self.update_preferred_velocity();
            self.compute_rvo(peers, grid, config);
            self.synthesise_command()
        };

        let marker = (!self.preferred_velocity.is_zero()).then(|| VelocityMarker {
            frame: config.controller.map_frame.clone(),
            origin: self.pose.position,
            velocity: self.preferred_velocity,
        });

        TickOutput {
            command,
            status: self.controller_status(),
            marker,
        }
    }

    fn search_active(&self) -> bool {
        matches!(
            self.behaviour,
            Behaviour::Rotation { .. } | Behaviour::Searching { .. } | Behaviour::RotationCompleted
        )
    }

    fn goal_reached(&self) -> bool {
        self.path
            .front()
            .is_some_and(|goal| self.pose.position.distance_to(*goal) <= self.goal_threshold)
    }

    /// Advance the waypoint queue past everything inside the lookahead
    /// radius and cache the resulting lookahead point.
    fn process_lookahead(&mut self) {
        while self.path.len() > 1 {
            let front = self.path[0];
            if self.pose.position.distance_to(front) > self.config.lookahead_distance {
                break;
            }
            self.path.pop_front();
        }
        self.lookahead = self.path.front().copied();
    }

    /// Pure-pursuit preferred velocity.
    fn update_preferred_velocity(&mut self) {
        if self.path.is_empty() {
            self.preferred_velocity = Vector2::ZERO;
        } else if self.path.len() == 1 && self.goal_reached() {
            self.path.pop_front();
            self.lookahead = None;
            self.preferred_velocity = Vector2::ZERO;
            self.status = AgentStatus::Succeeded;
            self.behaviour = Behaviour::GoalReached;
            info!(agent = %self.id, "goal reached");
        } else {
            self.process_lookahead();
            let Some(lookahead) = self.lookahead else {
                return;
            };
            self.preferred_velocity =
                (lookahead - self.pose.position).normalized() * self.config.max_speed;
            debug!(
                agent = %self.id,
                x = lookahead.x,
                y = lookahead.y,
                "lookahead point"
            );
        }
    }

    /// Neighbour selection, static obstacle extraction, and the RVO solve.
    fn compute_rvo(
        &mut self,
        peers: &[PeerSnapshot],
        grid: Option<&OccupancyGrid>,
        config: &Config,
    ) {
        // nothing to deconflict while the agent does not want to move
        if self.preferred_velocity.is_zero() || self.path.is_empty() {
            self.rvo_velocity = Vector2::ZERO;
            return;
        }

        let entity_radius = config.rvo.repulsion_radius.get() / 2.0;

        self.neighbours = select_neighbours(
            &self.id,
            self.pose.position,
            peers,
            config.rvo.max_neighbour_distance.get(),
            config.rvo.max_neighbours.get(),
        )
        .into_iter()
        .cloned()
        .collect();

        self.static_obstacles = match (config.static_obstacles.enabled, grid) {
            (true, Some(grid)) => extract_static_obstacles(
                grid,
                self.pose.position,
                &ExtractionParams {
                    collision_threshold: config.static_obstacles.collision_threshold,
                    max_distance: config.static_obstacles.max_distance.get(),
                    obstacle_radius: entity_radius,
                },
            ),
            _ => Vec::new(),
        };

        let mut constraints: Vec<RvoNeighbour> = self
            .neighbours
            .iter()
            .map(|peer| RvoNeighbour {
                id: peer.id.clone(),
                position: peer.position,
                velocity: peer.velocity,
                radius: entity_radius,
            })
            .collect();
        constraints.extend(self.static_obstacles.iter().map(|obstacle| RvoNeighbour {
            id: format!("wall/{}/{}", obstacle.cell.col, obstacle.cell.row),
            position: obstacle.position,
            velocity: Vector2::ZERO,
            radius: obstacle.radius,
        }));

        let me = RvoAgent {
            position: self.pose.position,
            velocity: self.velocity,
            preferred_velocity: self.preferred_velocity,
            max_speed: self.config.max_speed,
            radius: entity_radius,
        };
        let params = RvoParams {
            time_horizon: config.rvo.time_horizon.get(),
            speed_samples: config.rvo.speed_samples.get(),
            angle_samples: config.rvo.angle_samples.get(),
            avoidance_weight: config.rvo.avoidance_weight.get(),
        };
        self.rvo_velocity = compute_new_velocity(&me, &constraints, &params);
    }

    /// Map the planar RVO velocity onto the differential drive.
    fn synthesise_command(&mut self) -> Option<Command> {
        if self.rvo_velocity.is_zero() {
            if self.at_rest {
                return None;
            }
            // the robot was moving; an explicit stop must go out, once
            self.at_rest = true;
            self.last_command = Command::STOP;
            return Some(Command::STOP);
        }

        let heading = self.pose.heading();
        let direction = self.rvo_velocity.normalized();
        let heading_error = heading.dot(direction).clamp(-1.0, 1.0).acos();
        let turn = heading.cross_z(direction);

        let threshold = self.config.control_angle_threshold;
        let linear = if heading_error > threshold {
            0.0
        } else {
            self.config.max_speed * (1.0 - heading_error / threshold)
        };
        let angular = heading_error.min(self.config.max_angular_speed).copysign(turn);

        self.status = AgentStatus::Busy;
        self.at_rest = false;
        let command = Command { linear, angular };
        self.last_command = command;
        Some(command)
    }

    /// Advance the search pattern by one tick.
    fn step_search(&mut self) -> Option<Command> {
        match self.behaviour {
            Behaviour::Rotation {
                ticks_left,
                rotations_done,
            } => {
                self.behaviour = if ticks_left > 1 {
                    Behaviour::Rotation {
                        ticks_left: ticks_left - 1,
                        rotations_done,
                    }
                } else {
                    Behaviour::Searching {
                        ticks_left: self.config.search_pause_timesteps,
                        rotations_done,
                    }
                };
                self.status = AgentStatus::Busy;
                let command = Command {
                    linear: 0.0,
                    angular: self.config.search_angular_velocity,
                };
                self.at_rest = false;
                self.last_command = command;
                Some(command)
            }
            Behaviour::Searching {
                ticks_left,
                rotations_done,
            } => {
                if ticks_left > 1 {
                    self.behaviour = Behaviour::Searching {
                        ticks_left: ticks_left - 1,
                        rotations_done,
                    };
                } else {
                    let rotations_done = rotations_done + 1;
                    if rotations_done < self.config.search_num_rotations {
                        self.behaviour = Behaviour::Rotation {
                            ticks_left: self.config.search_rotation_timesteps,
                            rotations_done,
                        };
                    } else {
                        self.behaviour = Behaviour::RotationCompleted;
                        self.status = AgentStatus::Succeeded;
                        info!(agent = %self.id, "search rotations completed");
                    }
                }
                // hold still so perception can grab a frame
                self.at_rest = true;
                self.last_command = Command::STOP;
                Some(Command::STOP)
            }
            // a completed search parks here until the next path assignment
            Behaviour::RotationCompleted | Behaviour::Tracking | Behaviour::GoalReached => None,
        }
    }
}
