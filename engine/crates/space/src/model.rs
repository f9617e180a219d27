use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one tile-grid map instance. Entities are co-located iff their
/// coordinates are equal.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct MapCoord {
    pub x: i32,
    pub y: i32,
}

impl MapCoord {
    pub const ORIGIN: MapCoord = MapCoord { x: 0, y: 0 };

    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

impl fmt::Display for MapCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

/// Pixel position inside a map.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

impl Position {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Position) -> f32 {
        ((other.x - self.x).powi(2) + (other.y - self.y).powi(2)).sqrt()
    }
}

/// Pixel velocity, in pixels per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Velocity {
    pub x: f32,
    pub y: f32,
}

impl Velocity {
    pub const ZERO: Velocity = Velocity { x: 0.0, y: 0.0 };

    pub fn toward(direction: Direction, speed: f32) -> Self {
        let (dx, dy) = direction.delta();
        Self {
            x: dx as f32 * speed,
            y: dy as f32 * speed,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0
    }
}

/// Tile coordinate inside a map.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TilePos {
    pub x: i32,
    pub y: i32,
}

impl TilePos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Facing direction. Screen space: `up` is negative y.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::Up => (0, -1),
            Self::Down => (0, 1),
            Self::Left => (-1, 0),
            Self::Right => (1, 0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Up => "up",
            Self::Down => "down",
            Self::Left => "left",
            Self::Right => "right",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flag per side. Used for blocked-side collision reports and map-edge
/// contact reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeFlags {
    pub up: bool,
    pub down: bool,
    pub left: bool,
    pub right: bool,
}

impl EdgeFlags {
    pub const NONE: EdgeFlags = EdgeFlags {
        up: false,
        down: false,
        left: false,
        right: false,
    };

    pub fn contains(&self, direction: Direction) -> bool {
        match direction {
            Direction::Up => self.up,
            Direction::Down => self.down,
            Direction::Left => self.left,
            Direction::Right => self.right,
        }
    }

    pub fn set(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Up => self.up = value,
            Direction::Down => self.down = value,
            Direction::Left => self.left = value,
            Direction::Right => self.right = value,
        }
    }

    pub fn any(&self) -> bool {
        self.up || self.down || self.left || self.right
    }

    pub fn iter(&self) -> impl Iterator<Item = Direction> + '_ {
        Direction::ALL.into_iter().filter(|d| self.contains(*d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_coord_display() {
        assert_eq!(MapCoord::new(2, -1).to_string(), "2,-1");
    }

    #[test]
    fn map_coord_wire_shape() {
        let json = serde_json::to_string(&MapCoord::new(1, 0)).unwrap();
        assert_eq!(json, r#"{"x":1,"y":0}"#);
    }

    #[test]
    fn direction_lowercase_on_wire() {
        assert_eq!(serde_json::to_string(&Direction::Left).unwrap(), r#""left""#);
        let d: Direction = serde_json::from_str(r#""up""#).unwrap();
        assert_eq!(d, Direction::Up);
    }

    #[test]
    fn direction_deltas_follow_screen_axes() {
        assert_eq!(Direction::Up.delta(), (0, -1));
        assert_eq!(Direction::Right.delta(), (1, 0));
        assert_eq!(Velocity::toward(Direction::Left, 60.0), Velocity { x: -60.0, y: 0.0 });
    }

    #[test]
    fn edge_flags_partial_json_defaults() {
        let flags: EdgeFlags = serde_json::from_str(r#"{"left":true}"#).unwrap();
        assert!(flags.left);
        assert!(!flags.up);
        assert_eq!(flags.iter().collect::<Vec<_>>(), vec![Direction::Left]);
    }

    #[test]
    fn velocity_toward() {
        let v = Velocity::toward(Direction::Up, 60.0);
        assert_eq!(v, Velocity { x: 0.0, y: -60.0 });
        assert!(Velocity::ZERO.is_zero());
    }
}
