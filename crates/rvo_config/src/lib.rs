//! Runtime configuration for the coordinator.
//!
//! TOML, kebab-case sections, every section optional with defaults equal to
//! the tuned constants of the deployed controller.

use std::num::NonZeroUsize;

use serde::{Deserialize, Serialize};
use typed_floats::StrictlyPositiveFinite;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// **Controller section**
/// Tick scheduling and frame naming.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ControllerSection {
    /// Period of the fast control loop.
    /// SI unit: s
    pub controller_period_s: StrictlyPositiveFinite<f64>,
    /// Period of the full velocity-computation pipeline. Must be at least
    /// the controller period; it is rounded to a whole multiple of it.
    /// SI unit: s
    pub velocity_calc_period_s: StrictlyPositiveFinite<f64>,
    /// Fixed frame every pose is expressed in.
    pub map_frame: String,
    /// Per-robot frame, resolved as `<agent-id>/<base-frame>`.
    pub base_frame: String,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            controller_period_s: 0.2.try_into().expect("0.2 > 0.0"),
            velocity_calc_period_s: 0.2.try_into().expect("0.2 > 0.0"),
            map_frame: "map".to_string(),
            base_frame: "base_link".to_string(),
        }
    }
}

/// **Robot section**
/// Kinematic limits and pure-pursuit parameters shared by every agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RobotSection {
    /// SI unit: m/s
    pub max_speed: StrictlyPositiveFinite<f64>,
    /// SI unit: rad/s
    pub max_angular_speed: StrictlyPositiveFinite<f64>,
    /// Pure-pursuit lookahead distance.
    /// SI unit: m
    pub lookahead_distance: StrictlyPositiveFinite<f64>,
    /// Distance to the final waypoint below which the goal counts as
    /// reached.
    /// SI unit: m
    pub goal_threshold: StrictlyPositiveFinite<f64>,
    /// Relaxed goal threshold applied to homing tasks.
    /// SI unit: m
    pub homing_goal_threshold: StrictlyPositiveFinite<f64>,
    /// Heading error above which the robot rotates in place instead of
    /// driving forward.
    /// SI unit: rad
    pub control_angle_threshold: StrictlyPositiveFinite<f64>,
}

impl Default for RobotSection {
    fn default() -> Self {
        Self {
            max_speed: 0.3.try_into().expect("0.3 > 0.0"),
            max_angular_speed: 0.5.try_into().expect("0.5 > 0.0"),
            lookahead_distance: 0.4.try_into().expect("0.4 > 0.0"),
            goal_threshold: 0.2.try_into().expect("0.2 > 0.0"),
            homing_goal_threshold: 0.4.try_into().expect("0.4 > 0.0"),
            control_angle_threshold: std::f64::consts::FRAC_PI_2
                .try_into()
                .expect("pi/2 > 0.0"),
        }
    }
}

/// **Rvo section**
/// Parameters of the reciprocal velocity obstacle solver and of neighbour
/// selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RvoSection {
    /// Top-K neighbours entering the solver.
    pub max_neighbours: NonZeroUsize,
    /// Peers beyond this distance are ignored.
    /// SI unit: m
    pub max_neighbour_distance: StrictlyPositiveFinite<f64>,
    /// Combined radius of the Minkowski disk between two robots.
    /// SI unit: m
    pub repulsion_radius: StrictlyPositiveFinite<f64>,
    /// Velocity-obstacle look-ahead horizon.
    /// SI unit: s
    pub time_horizon: StrictlyPositiveFinite<f64>,
    /// Speed magnitudes sampled per direction.
    pub speed_samples: NonZeroUsize,
    /// Direction offsets sampled around the preferred direction.
    pub angle_samples: NonZeroUsize,
    /// Weight of the time-to-collision penalty used when every candidate
    /// collides within the horizon.
    pub avoidance_weight: StrictlyPositiveFinite<f64>,
}

impl Default for RvoSection {
    fn default() -> Self {
        Self {
            max_neighbours: NonZeroUsize::new(5).expect("5 > 0"),
            max_neighbour_distance: 2.0.try_into().expect("2.0 > 0.0"),
            repulsion_radius: 0.5.try_into().expect("0.5 > 0.0"),
            time_horizon: 2.0.try_into().expect("2.0 > 0.0"),
            speed_samples: NonZeroUsize::new(4).expect("4 > 0"),
            angle_samples: NonZeroUsize::new(36).expect("36 > 0"),
            avoidance_weight: 1.0.try_into().expect("1.0 > 0.0"),
        }
    }
}

/// **Static obstacle section**
/// Occupancy-grid sweep parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StaticObstacleSection {
    /// Master switch for static obstacle avoidance.
    pub enabled: bool,
    /// Occupancy value at or above which a cell is an obstacle.
    pub collision_threshold: i8,
    /// Euclidean bound of the sweep around the robot.
    /// SI unit: m
    pub max_distance: StrictlyPositiveFinite<f64>,
}

impl Default for StaticObstacleSection {
    fn default() -> Self {
        Self {
            enabled: true,
            collision_threshold: 50,
            max_distance: 0.5.try_into().expect("0.5 > 0.0"),
        }
    }
}

/// **Search section**
/// In-place rotation pattern used for perception sweeps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SearchSection {
    /// SI unit: rad/s
    pub angular_velocity: StrictlyPositiveFinite<f64>,
    /// Ticks spent rotating per segment.
    pub rotation_timesteps: u32,
    /// Ticks spent holding still between segments, long enough for the
    /// camera to capture at least one frame.
    pub pause_timesteps: u32,
    /// Number of rotate/pause segments per search request.
    pub num_rotations: u32,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            angular_velocity: 0.5.try_into().expect("0.5 > 0.0"),
            rotation_timesteps: 16,
            pause_timesteps: 10,
            num_rotations: 8,
        }
    }
}

/// Collection of all the sections in the config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub robot: RobotSection,
    #[serde(default)]
    pub rvo: RvoSection,
    #[serde(default)]
    pub static_obstacles: StaticObstacleSection,
    #[serde(default)]
    pub search: SearchSection,
}

impl Config {
    /// Parse a config file from a given path.
    pub fn from_file<P>(path: P) -> Result<Self, ParseError>
    where
        P: AsRef<std::path::Path>,
    {
        std::fs::read_to_string(path)
            .map_err(Into::into)
            .and_then(|contents| Self::parse(contents.as_str()))
    }

    /// Parse a config from TOML text.
    pub fn parse(contents: &str) -> Result<Self, ParseError> {
        toml::from_str(contents).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_defaults_match_deployed_constants() {
        let config = Config::default();
        assert_abs_diff_eq!(config.controller.controller_period_s.get(), 0.2);
        assert_abs_diff_eq!(config.robot.max_speed.get(), 0.3);
        assert_abs_diff_eq!(config.robot.max_angular_speed.get(), 0.5);
        assert_abs_diff_eq!(config.robot.lookahead_distance.get(), 0.4);
        assert_abs_diff_eq!(config.robot.goal_threshold.get(), 0.2);
        assert_abs_diff_eq!(config.robot.homing_goal_threshold.get(), 0.4);
        assert_eq!(config.rvo.max_neighbours.get(), 5);
        assert_abs_diff_eq!(config.rvo.max_neighbour_distance.get(), 2.0);
        assert_abs_diff_eq!(config.rvo.repulsion_radius.get(), 0.5);
        assert!(config.static_obstacles.enabled);
        assert_eq!(config.static_obstacles.collision_threshold, 50);
        assert_abs_diff_eq!(config.static_obstacles.max_distance.get(), 0.5);
        assert_abs_diff_eq!(config.search.angular_velocity.get(), 0.5);
        assert_eq!(config.search.rotation_timesteps, 16);
        assert_eq!(config.search.pause_timesteps, 10);
        assert_eq!(config.search.num_rotations, 8);
    }

    #[test]
    fn test_empty_document_parses_to_defaults() {
        let config = Config::parse("").expect("empty document is valid");
        assert_eq!(config.controller.map_frame, "map");
        assert_eq!(config.controller.base_frame, "base_link");
    }

    #[test]
    fn test_section_overrides() {
        let config = Config::parse(
            r#"
            [robot]
            max-speed = 1.5
            max-angular-speed = 2.0
            lookahead-distance = 0.8
            goal-threshold = 0.3
            homing-goal-threshold = 0.6
            control-angle-threshold = 1.2

            [static-obstacles]
            enabled = false
            collision-threshold = 80
            max-distance = 1.0
            "#,
        )
        .expect("valid overrides");

        assert_abs_diff_eq!(config.robot.max_speed.get(), 1.5);
        assert!(!config.static_obstacles.enabled);
        assert_eq!(config.static_obstacles.collision_threshold, 80);
        // untouched sections keep their defaults
        assert_eq!(config.rvo.max_neighbours.get(), 5);
    }

    #[test]
    fn test_rejects_non_positive_quantities() {
        let result = Config::parse(
            r#"
            [robot]
            max-speed = -1.0
            max-angular-speed = 0.5
            lookahead-distance = 0.4
            goal-threshold = 0.2
            homing-goal-threshold = 0.4
            control-angle-threshold = 1.57
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = Config::default();
        let serialised = toml::to_string(&config).expect("serialisable");
        let reparsed = Config::parse(&serialised).expect("round trip");
        assert_eq!(
            reparsed.controller.map_frame,
            config.controller.map_frame
        );
        assert_abs_diff_eq!(
            reparsed.robot.max_speed.get(),
            config.robot.max_speed.get()
        );
    }
}
