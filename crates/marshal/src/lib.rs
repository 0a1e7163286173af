//! Multi-robot motion coordination.
//!
//! The coordinator keeps a registry of fleet agents and, at a fixed control
//! rate, turns each agent's assigned waypoint path into a differential-drive
//! velocity command: pure pursuit proposes a preferred velocity, reciprocal
//! velocity obstacles deconflict it against nearby peers and occupancy-grid
//! obstacles, and a heading-aware mapping produces the final linear/angular
//! pair. Everything the coordinator needs from the outside world (transform
//! lookups, fleet membership, command/status topics) is behind the traits
//! in [`interfaces`].

pub mod agent;
pub mod cli;
pub mod coordinator;
pub mod interfaces;
pub mod neighbours;
pub mod sim;

pub use agent::{Agent, Behaviour};
pub use coordinator::FleetCoordinator;
pub use interfaces::{
    AgentStatus, Command, ControllerRequest, ControllerResponse, ControllerStatus, GoalType,
    PathRequest,
};
