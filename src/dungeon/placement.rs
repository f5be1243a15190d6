//! Square-spiral placement of instances on the backing world's grid.
//!
//! Cell 0 is the world spawn. Each ring then runs right, down (+z), left and
//! up (−z), every run one cell longer than the ring before, so cell indices
//! follow the usual spiral numbering of a 2-D grid.

use glam::{DVec3, IVec2, IVec3};

/// Anchors closer than this to an existing anchor are considered taken.
pub const MIN_ANCHOR_SPACING: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Run {
    Right,
    Down,
    Left,
    Up,
}

/// Grid cell of spiral index `index`.
pub fn spiral_cell(index: usize) -> IVec2 {
    let mut cell = IVec2::ZERO;
    let mut run = Run::Right;
    let mut n: usize = 1;
    for i in 0..index {
        if i == n * n - n {
            run = Run::Right;
        } else if i == n * n {
            run = Run::Down;
        } else if i == n * n + n {
            run = Run::Left;
        } else if i == n * n + 2 * n + 1 {
            run = Run::Up;
            n += 2;
        }
        match run {
            Run::Right => cell.x += 1,
            Run::Left => cell.x -= 1,
            Run::Down => cell.y += 1,
            Run::Up => cell.y -= 1,
        }
    }
    cell
}

/// World anchor of spiral index `index` for a grid of `grid_size` around `spawn`.
pub fn anchor_for(index: usize, grid_size: i32, spawn: IVec3) -> IVec3 {
    let cell = spiral_cell(index);
    IVec3::new(
        spawn.x + cell.x * grid_size,
        spawn.y,
        spawn.z + cell.y * grid_size,
    )
}

fn is_taken(candidate: IVec3, existing: &[IVec3]) -> bool {
    let c = candidate.as_dvec3();
    existing
        .iter()
        .any(|e| DVec3::distance(e.as_dvec3(), c) < MIN_ANCHOR_SPACING)
}

/// Anchor for the next instance when `existing` anchors are live.
///
/// Starts at spiral index `existing.len()` and steps down while the cell is
/// taken. If every lower cell is taken too, scans upward past the start.
pub fn next_anchor(existing: &[IVec3], grid_size: i32, spawn: IVec3) -> IVec3 {
    let start = existing.len();
    let mut index = start;
    loop {
        let candidate = anchor_for(index, grid_size, spawn);
        if !is_taken(candidate, existing) {
            return candidate;
        }
        if index == 0 {
            break;
        }
        index -= 1;
    }
    let mut index = start + 1;
    loop {
        let candidate = anchor_for(index, grid_size, spawn);
        if !is_taken(candidate, existing) {
            return candidate;
        }
        index += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn first_ring_follows_spiral_numbering() {
        let cells: Vec<(i32, i32)> = (0..10).map(spiral_cell).map(|c| (c.x, c.y)).collect();
        assert_eq!(
            cells,
            vec![
                (0, 0),
                (1, 0),
                (1, 1),
                (0, 1),
                (-1, 1),
                (-1, 0),
                (-1, -1),
                (0, -1),
                (1, -1),
                (2, -1),
            ]
        );
    }

    #[test]
    fn anchors_are_distinct_lattice_points() {
        let grid = 1000;
        let spawn = IVec3::new(0, 64, 0);
        let anchors: Vec<IVec3> = (0..200).map(|i| anchor_for(i, grid, spawn)).collect();
        let unique: HashSet<IVec3> = anchors.iter().copied().collect();
        assert_eq!(unique.len(), anchors.len());
        for a in &anchors {
            assert_eq!(a.x % grid, 0);
            assert_eq!(a.z % grid, 0);
            assert_eq!(a.y, 64);
        }
    }

    #[test]
    fn collision_retries_lower_index() {
        let spawn = IVec3::ZERO;
        // index 0 was removed, index 1 still live
        let existing = vec![anchor_for(1, 100, spawn)];
        assert_eq!(next_anchor(&existing, 100, spawn), anchor_for(0, 100, spawn));
    }

    #[test]
    fn free_lower_cells_are_reused_first() {
        let spawn = IVec3::ZERO;
        let existing = vec![anchor_for(0, 100, spawn), anchor_for(1, 100, spawn)];
        assert_eq!(next_anchor(&existing, 100, spawn), anchor_for(2, 100, spawn));
        let crowded = vec![anchor_for(2, 100, spawn), anchor_for(1, 100, spawn), anchor_for(0, 100, spawn)];
        assert_eq!(next_anchor(&crowded[..2], 100, spawn), anchor_for(0, 100, spawn));
        assert_eq!(next_anchor(&crowded, 100, spawn), anchor_for(3, 100, spawn));
    }
}
