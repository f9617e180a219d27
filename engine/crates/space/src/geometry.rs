use serde::{Deserialize, Serialize};

use crate::model::{Direction, EdgeFlags, Position, TilePos};

/// Dimensions of a single map. Every map instance shares the same geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapGeometry {
    /// Edge length of one tile in pixels.
    pub tile_size: u32,
    /// Map width in tiles.
    pub width_tiles: u32,
    /// Map height in tiles.
    pub height_tiles: u32,
}

impl Default for MapGeometry {
    fn default() -> Self {
        Self {
            tile_size: 32,
            width_tiles: 40,
            height_tiles: 30,
        }
    }
}

impl MapGeometry {
    pub fn pixel_width(&self) -> f32 {
        (self.width_tiles * self.tile_size) as f32
    }

    pub fn pixel_height(&self) -> f32 {
        (self.height_tiles * self.tile_size) as f32
    }

    /// Tile containing a pixel position.
    pub fn tile_of(&self, pos: Position) -> TilePos {
        let size = self.tile_size as f32;
        TilePos::new((pos.x / size).floor() as i32, (pos.y / size).floor() as i32)
    }

    /// Pixel center of a tile.
    pub fn tile_center(&self, tile: TilePos) -> Position {
        let size = self.tile_size as f32;
        Position::new(
            tile.x as f32 * size + size / 2.0,
            tile.y as f32 * size + size / 2.0,
        )
    }

    /// True when the tile is outside the map or within `buffer` tiles of
    /// any boundary.
    pub fn within_edge_buffer(&self, tile: TilePos, buffer: u32) -> bool {
        let b = buffer as i32;
        tile.x < b
            || tile.y < b
            || tile.x >= self.width_tiles as i32 - b
            || tile.y >= self.height_tiles as i32 - b
    }

    /// Sides of the map the pixel position touches or crosses.
    pub fn edges_touched(&self, pos: Position) -> EdgeFlags {
        let mut flags = EdgeFlags::NONE;
        flags.set(Direction::Left, pos.x <= 0.0);
        flags.set(Direction::Up, pos.y <= 0.0);
        flags.set(Direction::Right, pos.x >= self.pixel_width());
        flags.set(Direction::Down, pos.y >= self.pixel_height());
        flags
    }

    /// Clamp a pixel position into the map.
    pub fn clamp(&self, pos: Position) -> Position {
        Position::new(
            pos.x.clamp(0.0, self.pixel_width()),
            pos.y.clamp(0.0, self.pixel_height()),
        )
    }
}
