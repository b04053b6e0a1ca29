//! The fixed arena every match is played on.

use serde::{Deserialize, Serialize};

/// Grid of character rows where `#` is a wall and anything else is floor.
///
/// Positions are continuous; a point belongs to the cell found by flooring
/// each coordinate. Anything outside the grid counts as wall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArenaMap {
    pub rows: Vec<String>,
}

impl Default for ArenaMap {
    fn default() -> Self {
        Self::default_arena()
    }
}

impl ArenaMap {
    /// The 16x11 arena shipped with the server.
    pub fn default_arena() -> Self {
        let rows = [
            "################",
            "#..............#",
            "#..####..####..#",
            "#..#......#....#",
            "#..#..##..#..#.#",
            "#......#.......#",
            "#..##..#..##...#",
            "#..#......#....#",
            "#..####..####..#",
            "#..............#",
            "################",
        ];
        Self {
            rows: rows.iter().map(|row| row.to_string()).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.rows.iter().map(|row| row.len()).max().unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn is_wall(&self, x: f64, y: f64) -> bool {
        if !x.is_finite() || !y.is_finite() {
            return true;
        }
        let (cx, cy) = (x.floor(), y.floor());
        if cx < 0.0 || cy < 0.0 {
            return true;
        }
        let row = match self.rows.get(cy as usize) {
            Some(row) => row,
            None => return true,
        };
        match row.as_bytes().get(cx as usize) {
            Some(cell) => *cell == b'#',
            None => true,
        }
    }
}
