//! Per-tick peer snapshots and nearest-neighbour selection.

use rvo_geometry::{Float, Vector2};

/// Immutable snapshot of one peer at a tick boundary.
///
/// Built once per tick from the registry and shared read-only across every
/// agent's velocity computation, so no agent can observe a peer's
/// newly-computed output within the same tick.
#[derive(Debug, Clone)]
pub struct PeerSnapshot {
    pub id: String,
    pub position: Vector2,
    pub velocity: Vector2,
    pub preferred_velocity: Vector2,
    pub max_speed: Float,
}

/// Distance-ranked top-K peer selection.
///
/// Keeps peers strictly closer than `max_distance`, orders them by ascending
/// distance with ties broken by id, and truncates to `max_count`.
pub fn select_neighbours<'a>(
    self_id: &str,
    position: Vector2,
    peers: &'a [PeerSnapshot],
    max_distance: Float,
    max_count: usize,
) -> Vec<&'a PeerSnapshot> {
    let mut candidates: Vec<(Float, &PeerSnapshot)> = peers
        .iter()
        .filter(|peer| peer.id != self_id)
        .map(|peer| (position.distance_to(peer.position), peer))
        .filter(|(distance, _)| *distance < max_distance)
        .collect();

    candidates.sort_by(|(da, a), (db, b)| da.total_cmp(db).then_with(|| a.id.cmp(&b.id)));
    candidates.truncate(max_count);
    candidates.into_iter().map(|(_, peer)| peer).collect()
}
