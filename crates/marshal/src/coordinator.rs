//! The fleet coordinator: agent registry, tick scheduling, and membership.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
    thread,
    time::Duration,
};

use rvo_config::Config;
use rvo_environment::OccupancyGrid;
use rvo_geometry::are_same;
use tracing::{error, info, warn};

use crate::{
    agent::{Agent, AgentConfig},
    interfaces::{
        AgentStatus, CommandSink, ControllerRequest, ControllerResponse, FleetSource, GoalType,
        PathRequest, TransformSource,
    },
    neighbours::PeerSnapshot,
};

struct Registry {
    agents: BTreeMap<String, Agent>,
    active_agents: BTreeSet<String>,
    grid: Option<Arc<OccupancyGrid>>,
    grid_generation: u64,
    fast_ticks: u32,
}

struct Shared {
    config: Config,
    agent_config: AgentConfig,
    registry: Mutex<Registry>,
    transforms: Arc<dyn TransformSource>,
    fleet: Arc<dyn FleetSource>,
    sink: Arc<dyn CommandSink>,
    active: AtomicBool,
    fleet_outdated: AtomicBool,
}

/// Owns the agent registry and drives the control loop.
///
/// External callbacks (path assignment, emergency stop, map updates, fleet
/// notifications) may arrive from any thread; every mutation and the tick
/// body itself serialise on the single registry mutex. Within one tick each
/// agent computes against an immutable snapshot of its peers, so iteration
/// order cannot leak one agent's fresh output into another's input.
#[derive(Clone)]
pub struct FleetCoordinator {
    shared: Arc<Shared>,
}

impl FleetCoordinator {
    pub fn new(
        config: Config,
        transforms: Arc<dyn TransformSource>,
        fleet: Arc<dyn FleetSource>,
        sink: Arc<dyn CommandSink>,
    ) -> Self {
        let agent_config = AgentConfig::from(&config);

        // bootstrap membership from the fleet service; an unavailable
        // service degrades to an empty fleet until the first notification
        let active_agents = match fleet.active_agents() {
            Ok(agents) => agents,
            Err(err) => {
                error!(error = %err, "failed to query fleet service at startup");
                BTreeSet::new()
            }
        };
        info!(fleet_size = active_agents.len(), "active fleet");

        let agents = active_agents
            .iter()
            .map(|id| {
                info!(agent = %id, "initialising agent");
                (
                    id.clone(),
                    Agent::new(id.clone(), &config.controller.base_frame, agent_config),
                )
            })
            .collect();

        Self {
            shared: Arc::new(Shared {
                config,
                agent_config,
                registry: Mutex::new(Registry {
                    agents,
                    active_agents,
                    grid: None,
                    grid_generation: 0,
                    fast_ticks: 0,
                }),
                transforms,
                fleet,
                sink,
                active: AtomicBool::new(true),
                fleet_outdated: AtomicBool::new(false),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Registry> {
        self.shared
            .registry
            .lock()
            .expect("registry mutex poisoned")
    }

    /// The set of agent ids currently in the registry.
    pub fn active_agents(&self) -> BTreeSet<String> {
        self.lock().active_agents.clone()
    }

    pub fn agent_status(&self, agent_id: &str) -> Option<AgentStatus> {
        self.lock().agents.get(agent_id).map(Agent::status)
    }

    pub fn remaining_waypoints(&self, agent_id: &str) -> Option<usize> {
        self.lock()
            .agents
            .get(agent_id)
            .map(Agent::remaining_waypoints)
    }

    pub fn grid_generation(&self) -> u64 {
        self.lock().grid_generation
    }

    /// The controller service entry point.
    pub fn handle_request(&self, request: ControllerRequest) -> ControllerResponse {
        match request {
            ControllerRequest::Stop => self.emergency_stop(),
            ControllerRequest::AssignPaths(requests) => self.assign_paths(requests),
        }
        ControllerResponse { success: true }
    }

    /// Replace waypoint queues for the named agents. Bad entries are logged
    /// and skipped; the remainder of the batch still applies.
    pub fn assign_paths(&self, requests: Vec<PathRequest>) {
        let mut registry = self.lock();
        info!(count = requests.len(), "new paths received");

        for request in requests {
            let Some(agent) = registry.agents.get_mut(&request.agent_id) else {
                error!(agent = %request.agent_id, "agent not found in registry, skipping assignment");
                continue;
            };
            // a search request is the one assignment allowed to be pathless
            if request.path.is_empty() && request.goal_type != Some(GoalType::Search) {
                error!(agent = %request.agent_id, "empty path received, skipping assignment");
                continue;
            }
            agent.assign_path(request.path, request.goal_type, request.goal_id);
        }
    }

    /// Stop every agent and clear every path.
    pub fn emergency_stop(&self) {
        let mut registry = self.lock();
        info!("emergency stop requested");
        for (id, agent) in &mut registry.agents {
            agent.clear_path();
            let command = agent.halt();
            self.shared.sink.publish_velocity(id, command);
        }
    }

    /// Swap in a freshly received occupancy grid.
    pub fn on_map_update(&self, grid: OccupancyGrid) {
        let mut registry = self.lock();
        registry.grid = Some(Arc::new(grid));
        registry.grid_generation += 1;
    }

    /// Note that fleet membership changed; the next tick re-queries the
    /// fleet service and applies the diff.
    pub fn notify_fleet_change(&self) {
        self.shared.fleet_outdated.store(true, Ordering::SeqCst);
    }

    fn refresh_fleet(&self) {
        let new_fleet = match self.shared.fleet.active_agents() {
            Ok(agents) => agents,
            Err(err) => {
                // keep the previous membership until the service recovers
                warn!(error = %err, "failed to query fleet service");
                return;
            }
        };

        let mut registry = self.lock();
        let additions: Vec<String> = new_fleet
            .difference(&registry.active_agents)
            .cloned()
            .collect();
        let removals: Vec<String> = registry
            .active_agents
            .difference(&new_fleet)
            .cloned()
            .collect();

        for id in &additions {
            info!(agent = %id, "initialising agent");
            registry.agents.insert(
                id.clone(),
                Agent::new(
                    id.clone(),
                    &self.shared.config.controller.base_frame,
                    self.shared.agent_config,
                ),
            );
        }
        for id in &removals {
            info!(agent = %id, "agent removed from the fleet");
            if let Some(mut agent) = registry.agents.remove(id) {
                agent.clear_path();
                let command = agent.halt();
                self.shared.sink.publish_velocity(id, command);
            }
        }
        registry.active_agents = new_fleet;
    }

    /// One iteration of the fast control loop. Every
    /// `velocity_calc_period_s / controller_period_s` iterations the full
    /// pipeline runs; in between, the last commands are republished.
    pub fn run_tick(&self) {
        if self.shared.fleet_outdated.swap(false, Ordering::SeqCst) {
            info!("fleet status outdated, updating");
            self.refresh_fleet();
        }

        let mut registry = self.lock();
        registry.fast_ticks += 1;
        if registry.fast_ticks >= self.full_tick_divisor() {
            registry.fast_ticks = 0;
            self.full_tick(&mut registry);
        } else {
            self.fast_tick(&registry);
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn full_tick_divisor(&self) -> u32 {
        let controller = &self.shared.config.controller;
        let ratio = controller.velocity_calc_period_s.get() / controller.controller_period_s.get();
        (ratio.round() as u32).max(1)
    }

    fn full_tick(&self, registry: &mut Registry) {
        let dt = self
            .shared
            .config
            .controller
            .velocity_calc_period_s
            .get();
        if are_same(dt, 0.0) {
            warn!("degenerate tick, aborting velocity computation");
            return;
        }

        self.update_poses(registry, dt);

        let peers: Vec<PeerSnapshot> = registry.agents.values().map(Agent::snapshot).collect();
        let grid = registry.grid.clone();

        for (id, agent) in &mut registry.agents {
            let output = agent.full_tick(&peers, grid.as_deref(), &self.shared.config);
            if let Some(command) = output.command {
                self.shared.sink.publish_velocity(id, command);
            }
            if let Some(marker) = &output.marker {
                self.shared.sink.publish_marker(id, marker);
            }
            self.shared.sink.publish_status(&output.status);
        }
    }

    fn fast_tick(&self, registry: &Registry) {
        for (id, agent) in &registry.agents {
            if let Some(command) = agent.repeat_command() {
                self.shared.sink.publish_velocity(id, command);
            }
        }
    }

    fn update_poses(&self, registry: &mut Registry, dt: f64) {
        for (id, agent) in &mut registry.agents {
            match self.shared.transforms.lookup(agent.frame_id()) {
                Ok(pose) => agent.refresh_pose(pose, dt),
                Err(err) => {
                    // keep the previous pose; the agent is skipped, not failed
                    warn!(agent = %id, error = %err, "transform lookup failed");
                }
            }
        }
    }

    /// Spawn the control loop thread. The thread exits after the current
    /// iteration once [`FleetCoordinator::shutdown`] is called.
    pub fn start(&self) -> thread::JoinHandle<()> {
        self.shared.active.store(true, Ordering::SeqCst);
        let coordinator = self.clone();
        thread::spawn(move || {
            let period = Duration::from_secs_f64(
                coordinator
                    .shared
                    .config
                    .controller
                    .controller_period_s
                    .get(),
            );
            info!("controller loop started");
            while coordinator.shared.active.load(Ordering::SeqCst) {
                coordinator.run_tick();
                thread::sleep(period);
            }
            info!("controller loop stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rvo_geometry::{Pose, Vector2};

    use super::*;
    use crate::sim::SimWorld;

    fn world_with(ids: &[&str]) -> Arc<SimWorld> {
        let world = Arc::new(SimWorld::new(0.2, "map"));
        for id in ids {
            world.add_agent(*id, Pose::default());
        }
        world
    }

    fn coordinator(world: &Arc<SimWorld>) -> FleetCoordinator {
        FleetCoordinator::new(
            Config::default(),
            world.clone(),
            world.clone(),
            world.clone(),
        )
    }

    #[test]
    fn test_bootstrap_registers_fleet() {
        let world = world_with(&["a1", "a2"]);
        let coordinator = coordinator(&world);
        let agents: Vec<String> = coordinator.active_agents().into_iter().collect();
        assert_eq!(agents, vec!["a1", "a2"]);
        assert_eq!(coordinator.agent_status("a1"), Some(AgentStatus::Idle));
    }

    #[test]
    fn test_assignment_to_unknown_agent_is_skipped() {
        let world = world_with(&["a1"]);
        let coordinator = coordinator(&world);

        let response = coordinator.handle_request(ControllerRequest::AssignPaths(vec![
            PathRequest {
                agent_id: "ghost".to_owned(),
                path: vec![Vector2::new(1.0, 0.0)],
                goal_type: Some(GoalType::Navigate),
                goal_id: None,
            },
            PathRequest {
                agent_id: "a1".to_owned(),
                path: vec![Vector2::new(1.0, 0.0)],
                goal_type: Some(GoalType::Navigate),
                goal_id: None,
            },
        ]));

        // the bad entry is skipped, the rest of the batch applies
        assert!(response.success);
        assert_eq!(coordinator.remaining_waypoints("ghost"), None);
        assert_eq!(coordinator.remaining_waypoints("a1"), Some(1));
    }

    #[test]
    fn test_empty_path_rejected_except_for_search() {
        let world = world_with(&["a1", "a2"]);
        let coordinator = coordinator(&world);

        coordinator.assign_paths(vec![
            PathRequest {
                agent_id: "a1".to_owned(),
                path: Vec::new(),
                goal_type: Some(GoalType::Navigate),
                goal_id: None,
            },
            PathRequest {
                agent_id: "a2".to_owned(),
                path: Vec::new(),
                goal_type: Some(GoalType::Search),
                goal_id: None,
            },
        ]);

        assert_eq!(coordinator.agent_status("a1"), Some(AgentStatus::Idle));
        assert_eq!(coordinator.agent_status("a2"), Some(AgentStatus::Busy));
    }

    #[test]
    fn test_emergency_stop_idles_everyone() {
        let world = world_with(&["a1"]);
        let coordinator = coordinator(&world);
        coordinator.assign_paths(vec![PathRequest {
            agent_id: "a1".to_owned(),
            path: vec![Vector2::new(1.0, 0.0)],
            goal_type: Some(GoalType::Navigate),
            goal_id: None,
        }]);
        coordinator.run_tick();

        coordinator.handle_request(ControllerRequest::Stop);

        assert_eq!(coordinator.agent_status("a1"), Some(AgentStatus::Idle));
        assert_eq!(coordinator.remaining_waypoints("a1"), Some(0));
        assert_eq!(world.last_command("a1"), Some(crate::interfaces::Command::STOP));
    }

    #[test]
    fn test_map_update_bumps_generation() {
        let world = world_with(&[]);
        let coordinator = coordinator(&world);
        assert_eq!(coordinator.grid_generation(), 0);

        let grid =
            rvo_environment::OccupancyGrid::new(2, 2, 0.1, Vector2::ZERO, vec![0; 4])
                .expect("valid grid");
        coordinator.on_map_update(grid);
        assert_eq!(coordinator.grid_generation(), 1);
    }
}
