//! Occupancy grid storage and static obstacle extraction.
//!
//! The grid is the standard row-major `i8` raster: a cell at or above the
//! collision threshold is occupied, anything else is free. Static obstacles
//! are extracted by a bounded breadth-first sweep around a query position,
//! keeping the first occupied cell reached through each of the eight compass
//! directions.

use std::collections::{HashSet, VecDeque};

use rvo_geometry::{Float, Vector2};
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("expected {expected} cells for a {width}x{height} grid, got {actual}")]
    CellCountMismatch {
        width: usize,
        height: usize,
        expected: usize,
        actual: usize,
    },
    #[error("grid resolution must be positive, got {0}")]
    NonPositiveResolution(Float),
}

/// Column/row index of a grid cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellIndex {
    pub col: usize,
    pub row: usize,
}

impl CellIndex {
    #[must_use]
    pub const fn new(col: usize, row: usize) -> Self {
        Self { col, row }
    }
}

/// A rectangular occupancy raster in the world frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OccupancyGrid {
    width: usize,
    height: usize,
    /// Side length of one cell in meters.
    resolution: Float,
    /// World position of cell (0, 0).
    origin: Vector2,
    /// Row-major occupancy confidences.
    cells: Vec<i8>,
}

impl OccupancyGrid {
    /// Build a grid, validating that the cell buffer matches the dimensions.
    pub fn new(
        width: usize,
        height: usize,
        resolution: Float,
        origin: Vector2,
        cells: Vec<i8>,
    ) -> Result<Self, GridError> {
        if resolution <= 0.0 {
            return Err(GridError::NonPositiveResolution(resolution));
        }
        let expected = width * height;
        if cells.len() != expected {
            return Err(GridError::CellCountMismatch {
                width,
                height,
                expected,
                actual: cells.len(),
            });
        }
        Ok(Self {
            width,
            height,
            resolution,
            origin,
            cells,
        })
    }

    #[inline]
    pub const fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub const fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub const fn resolution(&self) -> Float {
        self.resolution
    }

    #[inline]
    pub const fn origin(&self) -> Vector2 {
        self.origin
    }

    /// Occupancy value at the given cell, if inside the grid.
    pub fn cell(&self, index: CellIndex) -> Option<i8> {
        (index.col < self.width && index.row < self.height)
            .then(|| self.cells[index.row * self.width + index.col])
    }

    pub fn is_occupied(&self, index: CellIndex, threshold: i8) -> bool {
        self.cell(index).is_some_and(|value| value >= threshold)
    }

    /// Nearest cell to a world position, if the position maps into the grid.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn world_to_cell(&self, position: Vector2) -> Option<CellIndex> {
        let col = ((position.x - self.origin.x) / self.resolution).round();
        let row = ((position.y - self.origin.y) / self.resolution).round();
        if col < 0.0 || row < 0.0 {
            return None;
        }
        let index = CellIndex::new(col as usize, row as usize);
        (index.col < self.width && index.row < self.height).then_some(index)
    }

    /// World position the cell index maps back to.
    #[allow(clippy::cast_precision_loss)]
    pub fn cell_centre(&self, index: CellIndex) -> Vector2 {
        self.origin
            + Vector2::new(
                index.col as Float * self.resolution,
                index.row as Float * self.resolution,
            )
    }
}

/// Parameters of the static obstacle sweep.
#[derive(Debug, Clone, Copy)]
pub struct ExtractionParams {
    /// Occupancy value at or above which a cell counts as an obstacle.
    pub collision_threshold: i8,
    /// Euclidean bound of the sweep, measured from the query position.
    pub max_distance: Float,
    /// Inflation radius attached to each extracted obstacle point.
    pub obstacle_radius: Float,
}

/// An occupied cell turned into a point obstacle.
#[derive(Debug, Clone, PartialEq)]
pub struct StaticObstacle {
    pub cell: CellIndex,
    pub position: Vector2,
    pub radius: Float,
}

/// Offsets of the eight compass directions, used both to expand the sweep
/// and to attribute the first occupied hit per direction.
const COMPASS: [(i64, i64); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

/// Breadth-first sweep around `position`, bounded by
/// `params.max_distance`, that yields the first occupied cell reached
/// through each compass direction. Duplicate cells are suppressed, so a
/// single wall cell reachable two ways is reported once.
///
/// Returns an empty list when `position` falls outside the grid.
pub fn extract_static_obstacles(
    grid: &OccupancyGrid,
    position: Vector2,
    params: &ExtractionParams,
) -> Vec<StaticObstacle> {
    let Some(start) = grid.world_to_cell(position) else {
        return Vec::new();
    };

    let mut obstacles: Vec<StaticObstacle> = Vec::with_capacity(COMPASS.len());
    let mut reported: HashSet<CellIndex> = HashSet::new();
    let mut direction_done = [false; COMPASS.len()];

    let mut visited: HashSet<CellIndex> = HashSet::new();
    let mut frontier: VecDeque<CellIndex> = VecDeque::new();
    visited.insert(start);
    frontier.push_back(start);

    while let Some(current) = frontier.pop_front() {
        for (slot, &(dc, dr)) in COMPASS.iter().enumerate() {
            let col = current.col as i64 + dc;
            let row = current.row as i64 + dr;
            if col < 0 || row < 0 {
                continue;
            }
            #[allow(clippy::cast_sign_loss)]
            let next = CellIndex::new(col as usize, row as usize);
            if grid.cell(next).is_none() || visited.contains(&next) {
                continue;
            }
            if grid.cell_centre(next).distance_to(position) > params.max_distance {
                continue;
            }
            visited.insert(next);

            if grid.is_occupied(next, params.collision_threshold) {
                if !direction_done[slot] && reported.insert(next) {
                    obstacles.push(StaticObstacle {
                        cell: next,
                        position: grid.cell_centre(next),
                        radius: params.obstacle_radius,
                    });
                }
                direction_done[slot] = true;
            } else {
                frontier.push_back(next);
            }
        }
        if direction_done.iter().all(|&done| done) {
            break;
        }
    }

    obstacles
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    use super::*;

    const THRESHOLD: i8 = 50;

    fn params() -> ExtractionParams {
        ExtractionParams {
            collision_threshold: THRESHOLD,
            max_distance: 0.5,
            obstacle_radius: 0.25,
        }
    }

    /// 10x10 grid at 0.1 m resolution with origin at the world origin.
    fn empty_grid() -> OccupancyGrid {
        OccupancyGrid::new(10, 10, 0.1, Vector2::ZERO, vec![0; 100]).expect("valid grid")
    }

    fn grid_with_occupied(cells: &[(usize, usize)]) -> OccupancyGrid {
        let mut data = vec![0i8; 100];
        for &(col, row) in cells {
            data[row * 10 + col] = 100;
        }
        OccupancyGrid::new(10, 10, 0.1, Vector2::ZERO, data).expect("valid grid")
    }

    #[test]
    fn test_cell_count_validation() {
        let result = OccupancyGrid::new(10, 10, 0.1, Vector2::ZERO, vec![0; 99]);
        assert!(matches!(
            result,
            Err(GridError::CellCountMismatch { expected: 100, actual: 99, .. })
        ));
    }

    #[test]
    fn test_world_to_cell_round_trip() {
        let grid = empty_grid();
        let index = grid.world_to_cell(Vector2::new(0.52, 0.31)).expect("inside");
        assert_eq!(index, CellIndex::new(5, 3));
        let centre = grid.cell_centre(index);
        assert_abs_diff_eq!(centre.x, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(centre.y, 0.3, epsilon = 1e-12);
    }

    #[test]
    fn test_world_to_cell_outside() {
        let grid = empty_grid();
        assert_eq!(grid.world_to_cell(Vector2::new(-0.2, 0.0)), None);
        assert_eq!(grid.world_to_cell(Vector2::new(0.0, 5.0)), None);
    }

    #[test]
    fn test_extraction_outside_grid_is_empty() {
        let grid = grid_with_occupied(&[(5, 5)]);
        let obstacles = extract_static_obstacles(&grid, Vector2::new(-1.0, -1.0), &params());
        assert_eq!(obstacles, vec![]);
    }

    #[test]
    fn test_extraction_free_space_is_empty() {
        let grid = empty_grid();
        let obstacles = extract_static_obstacles(&grid, Vector2::new(0.5, 0.5), &params());
        assert_eq!(obstacles, vec![]);
    }

    #[test]
    fn test_extraction_finds_adjacent_wall() {
        // wall cell one cell east of the query position
        let grid = grid_with_occupied(&[(7, 5)]);
        let obstacles = extract_static_obstacles(&grid, Vector2::new(0.6, 0.5), &params());
        assert_eq!(obstacles.len(), 1);
        assert_eq!(obstacles[0].cell, CellIndex::new(7, 5));
        assert_abs_diff_eq!(obstacles[0].position.x, 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(obstacles[0].position.y, 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(obstacles[0].radius, 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_extraction_respects_distance_bound() {
        // occupied cell 0.6 m away, past the 0.5 m bound
        let grid = grid_with_occupied(&[(9, 3)]);
        let obstacles = extract_static_obstacles(&grid, Vector2::new(0.3, 0.3), &params());
        assert_eq!(obstacles, vec![]);
    }

    #[test]
    fn test_extraction_deduplicates_cells() {
        let grid = grid_with_occupied(&[(5, 6)]);
        let obstacles = extract_static_obstacles(&grid, Vector2::new(0.5, 0.5), &params());
        let hits = obstacles
            .iter()
            .filter(|o| o.cell == CellIndex::new(5, 6))
            .count();
        assert_eq!(hits, 1);
    }

    #[test]
    fn test_extraction_caps_at_eight_directions() {
        // query surrounded by a ring of wall cells
        let ring: Vec<(usize, usize)> = (3..=7)
            .flat_map(|c| [(c, 3), (c, 7)])
            .chain((4..=6).flat_map(|r| [(3, r), (7, r)]))
            .collect();
        let grid = grid_with_occupied(&ring);
        let obstacles = extract_static_obstacles(&grid, Vector2::new(0.5, 0.5), &params());
        assert!(!obstacles.is_empty());
        assert!(obstacles.len() <= 8);
    }
}
