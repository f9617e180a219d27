pub mod geometry;
pub mod map_index;
pub mod model;

pub use geometry::MapGeometry;
pub use map_index::{IndexError, MapIndex};
pub use model::{Direction, EdgeFlags, MapCoord, Position, TilePos, Velocity};
