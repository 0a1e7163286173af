//! Reciprocal velocity obstacle (RVO) velocity selection.
//!
//! Given an agent, its preferred velocity, and a set of velocity-obstacle
//! inducing entities (peer robots, or static obstacle points modelled as
//! zero-velocity peers), pick the velocity closest to the preferred one that
//! stays collision-free over the look-ahead horizon. Peers are assumed to
//! take reciprocal action, hence the candidate ray direction `2v - v_a - v_b`.

use itertools::iproduct;
use rvo_geometry::{are_same, Float, Vector2};

/// The agent a new velocity is being selected for.
#[derive(Debug, Clone)]
pub struct RvoAgent {
    pub position: Vector2,
    pub velocity: Vector2,
    pub preferred_velocity: Vector2,
    pub max_speed: Float,
    pub radius: Float,
}

/// One velocity-obstacle inducing entity.
///
/// Peer robots carry their observed velocity; static obstacle points carry
/// zero velocity and a small inflation radius.
#[derive(Debug, Clone)]
pub struct RvoNeighbour {
    /// Stable identifier, used to order constraints deterministically.
    pub id: String,
    pub position: Vector2,
    pub velocity: Vector2,
    pub radius: Float,
}

/// Tuning knobs of the sampling search.
#[derive(Debug, Clone, Copy)]
pub struct RvoParams {
    /// Look-ahead horizon tau in seconds. A velocity is infeasible when it
    /// leads into a Minkowski disk within this horizon.
    pub time_horizon: Float,
    /// Number of speed magnitudes sampled in (0, max_speed].
    pub speed_samples: usize,
    /// Number of direction offsets sampled around the preferred direction.
    pub angle_samples: usize,
    /// Weight of the time-to-collision penalty when no feasible candidate
    /// exists and the least-bad one must be chosen.
    pub avoidance_weight: Float,
}

impl Default for RvoParams {
    fn default() -> Self {
        Self {
            time_horizon: 2.0,
            speed_samples: 4,
            angle_samples: 36,
            avoidance_weight: 1.0,
        }
    }
}

/// Time at which the ray `t -> t * direction` from `origin` first enters the
/// disk of radius `radius` centred at `centre`, if that happens within
/// `horizon`. An origin already inside the disk collides at `Some(0.0)`
/// unless the ray points strictly out of it.
#[must_use]
pub fn time_to_collision(
    origin: Vector2,
    direction: Vector2,
    centre: Vector2,
    radius: Float,
    horizon: Float,
) -> Option<Float> {
    let relative = centre - origin;
    if relative.length_squared() <= radius * radius {
        // already overlapping: only strictly outbound rays resolve it
        return (direction.dot(relative) >= 0.0).then_some(0.0);
    }

    let a = direction.length_squared();
    if are_same(a, 0.0) {
        return None;
    }

    // |t*d - r|^2 = R^2 reduces to a*t^2 - 2(d.r)t + (|r|^2 - R^2) = 0
    let b = direction.dot(relative);
    let discriminant = b * b - a * (relative.length_squared() - radius * radius);
    if discriminant < 0.0 {
        return None;
    }

    let entry = (b - discriminant.sqrt()) / a;
    (0.0..=horizon).contains(&entry).then_some(entry)
}

/// Earliest collision any neighbour induces for the candidate velocity, or
/// `None` when the candidate is feasible over the whole horizon.
fn earliest_collision(
    agent: &RvoAgent,
    candidate: Vector2,
    neighbours: &[&RvoNeighbour],
    horizon: Float,
) -> Option<Float> {
    neighbours
        .iter()
        .filter_map(|neighbour| {
            let ray = candidate * 2.0 - agent.velocity - neighbour.velocity;
            time_to_collision(
                agent.position,
                ray,
                neighbour.position,
                agent.radius + neighbour.radius,
                horizon,
            )
        })
        .min_by(Float::total_cmp)
}

/// Candidate velocities in deterministic order: the preferred direction
/// first, then direction offsets by increasing magnitude (positive before
/// negative), each at every sampled speed, and finally the zero velocity.
fn candidates(agent: &RvoAgent, params: &RvoParams) -> Vec<(Float, Vector2)> {
    let preferred_angle = agent.preferred_velocity.angle();
    let half = params.angle_samples / 2;
    let step = std::f64::consts::TAU / params.angle_samples as Float;

    let mut offsets = Vec::with_capacity(params.angle_samples);
    offsets.push(0.0);
    for k in 1..=half {
        let delta = k as Float * step;
        offsets.push(delta);
        // skip the mirrored duplicate of the diametric direction
        if !are_same(delta, std::f64::consts::PI) {
            offsets.push(-delta);
        }
    }

    let mut all = Vec::with_capacity(offsets.len() * params.speed_samples + 1);
    for (&delta, k) in iproduct!(offsets.iter(), 1..=params.speed_samples) {
        let speed = agent.max_speed * k as Float / params.speed_samples as Float;
        let velocity = Vector2::from_angle(preferred_angle + delta) * speed;
        all.push((delta.abs(), velocity));
    }
    all.push((0.0, Vector2::ZERO));
    all
}

/// Select a new velocity for `agent`.
///
/// Properties:
/// - equals the (speed-clamped) preferred velocity when nothing constrains it
/// - otherwise the feasible candidate with the smallest deviation from the
///   preferred velocity, ties broken toward the smallest direction offset
/// - when every candidate collides within the horizon, the candidate with the
///   least `weight / time-to-collision + deviation` penalty
/// - magnitude never exceeds `agent.max_speed`
#[must_use]
pub fn compute_new_velocity(
    agent: &RvoAgent,
    neighbours: &[RvoNeighbour],
    params: &RvoParams,
) -> Vector2 {
    let preferred = agent.preferred_velocity.clamped(agent.max_speed);

    let mut ordered: Vec<&RvoNeighbour> = neighbours.iter().collect();
    ordered.sort_by(|a, b| a.id.cmp(&b.id));

    if earliest_collision(agent, preferred, &ordered, params.time_horizon).is_none() {
        return preferred;
    }

    let mut best_feasible: Option<(Float, Float, Vector2)> = None;
    let mut best_penalised: Option<(Float, Vector2)> = None;

    for (offset, candidate) in candidates(agent, params) {
        let deviation = (candidate - preferred).length();
        match earliest_collision(agent, candidate, &ordered, params.time_horizon) {
            None => {
                let better = best_feasible.map_or(true, |(dev, off, _)| {
                    deviation < dev || (are_same(deviation, dev) && offset < off)
                });
                if better {
                    best_feasible = Some((deviation, offset, candidate));
                }
            }
            Some(ttc) => {
                let penalty = params.avoidance_weight / ttc.max(1e-3) + deviation;
                if best_penalised.map_or(true, |(best, _)| penalty < best) {
                    best_penalised = Some((penalty, candidate));
                }
            }
        }
    }

    best_feasible
        .map(|(_, _, velocity)| velocity)
        .or(best_penalised.map(|(_, velocity)| velocity))
        .unwrap_or(Vector2::ZERO)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    fn agent_at(position: Vector2, preferred: Vector2) -> RvoAgent {
        RvoAgent {
            position,
            velocity: preferred,
            preferred_velocity: preferred,
            max_speed: 0.3,
            radius: 0.25,
        }
    }

    fn peer(id: &str, position: Vector2, velocity: Vector2) -> RvoNeighbour {
        RvoNeighbour {
            id: id.to_owned(),
            position,
            velocity,
            radius: 0.25,
        }
    }

    #[test]
    fn test_ttc_head_on() {
        // ray going straight at a disk 2 m away with combined radius 0.5
        let ttc = time_to_collision(
            Vector2::ZERO,
            Vector2::new(1.0, 0.0),
            Vector2::new(2.0, 0.0),
            0.5,
            10.0,
        );
        assert_abs_diff_eq!(ttc.expect("hits the disk"), 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_ttc_already_inside() {
        let ttc = time_to_collision(
            Vector2::ZERO,
            Vector2::new(1.0, 0.0),
            Vector2::new(0.1, 0.0),
            0.5,
            10.0,
        );
        assert_eq!(ttc, Some(0.0));
    }

    #[test]
    fn test_ttc_inside_but_outbound_escapes() {
        let ttc = time_to_collision(
            Vector2::ZERO,
            Vector2::new(-1.0, 0.0),
            Vector2::new(0.1, 0.0),
            0.5,
            10.0,
        );
        assert_eq!(ttc, None);
    }

    #[test]
    fn test_ttc_moving_away() {
        let ttc = time_to_collision(
            Vector2::ZERO,
            Vector2::new(-1.0, 0.0),
            Vector2::new(2.0, 0.0),
            0.5,
            10.0,
        );
        assert_eq!(ttc, None);
    }

    #[test]
    fn test_ttc_outside_horizon() {
        let ttc = time_to_collision(
            Vector2::ZERO,
            Vector2::new(1.0, 0.0),
            Vector2::new(2.0, 0.0),
            0.5,
            1.0,
        );
        assert_eq!(ttc, None);
    }

    #[test]
    fn test_identity_without_neighbours() {
        let agent = agent_at(Vector2::ZERO, Vector2::new(0.3, 0.0));
        let velocity = compute_new_velocity(&agent, &[], &RvoParams::default());
        assert_eq!(velocity, Vector2::new(0.3, 0.0));
    }

    #[test]
    fn test_identity_with_distant_neighbour() {
        let agent = agent_at(Vector2::ZERO, Vector2::new(0.3, 0.0));
        let far = peer("a2", Vector2::new(50.0, 0.0), Vector2::ZERO);
        let velocity = compute_new_velocity(&agent, &[far], &RvoParams::default());
        assert_eq!(velocity, Vector2::new(0.3, 0.0));
    }

    #[test]
    fn test_preferred_velocity_is_speed_clamped() {
        let mut agent = agent_at(Vector2::ZERO, Vector2::new(3.0, 0.0));
        agent.velocity = Vector2::ZERO;
        let velocity = compute_new_velocity(&agent, &[], &RvoParams::default());
        assert_abs_diff_eq!(velocity.length(), 0.3, epsilon = 1e-9);
    }

    #[test]
    fn test_avoids_static_obstacle_ahead() {
        let agent = agent_at(Vector2::ZERO, Vector2::new(0.3, 0.0));
        let obstacle = peer("obs", Vector2::new(0.8, 0.0), Vector2::ZERO);
        let params = RvoParams::default();
        let velocity = compute_new_velocity(&agent, &[obstacle], &params);

        assert!(velocity.length() <= agent.max_speed + 1e-9);
        assert!(velocity != agent.preferred_velocity);
    }

    #[test]
    fn test_head_on_pair_mirrors() {
        let params = RvoParams::default();
        let left = agent_at(Vector2::ZERO, Vector2::new(0.3, 0.0));
        let right = agent_at(Vector2::new(1.05, 0.0), Vector2::new(-0.3, 0.0));

        let left_sees = peer("right", right.position, right.velocity);
        let right_sees = peer("left", left.position, left.velocity);

        let v_left = compute_new_velocity(&left, &[left_sees], &params);
        let v_right = compute_new_velocity(&right, &[right_sees], &params);

        // mirrored through the midpoint: equal and opposite components
        assert_abs_diff_eq!(v_left.x, -v_right.x, epsilon = 1e-9);
        assert_abs_diff_eq!(v_left.y, -v_right.y, epsilon = 1e-9);
        // both sidestep laterally
        assert!(!are_same(v_left.y, 0.0));
    }

    #[test]
    fn test_deterministic() {
        let agent = agent_at(Vector2::ZERO, Vector2::new(0.3, 0.0));
        let blocker = peer("a2", Vector2::new(0.6, 0.05), Vector2::new(-0.3, 0.0));
        let params = RvoParams::default();
        let first = compute_new_velocity(&agent, &[blocker.clone()], &params);
        let second = compute_new_velocity(&agent, &[blocker], &params);
        assert_eq!(first, second);
    }
}
