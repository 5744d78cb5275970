pub mod elevation;
pub mod error;
pub mod grid;
pub mod mesh;
pub mod mosaic;
pub mod params;
pub mod preset;
pub mod pyramid;
pub mod shear;
pub mod stats;
pub mod store;
pub mod tile;
pub mod view;

pub use elevation::{ElevationEncoding, decode, encode};
pub use error::{ConfigError, TileError};
pub use grid::{Extent, TileGrid};
pub use mosaic::{FrameInput, FrameOutcome, FrameState, MosaicBackend, MosaicRenderer};
pub use params::{RenderParameters, TileSourceState};
pub use pyramid::{Substitute, TilePyramidResolver, UvWindow};
pub use shear::{DragStart, ShearMode, ShearPhase, ShearState, ShearStrategy};
pub use stats::{MinMax, TileElevationStats, TileStatsCache};
pub use store::TileStore;
pub use tile::{Tile, TileCache, TileCoord, TileImage, TileLayer, TileRange, TileState};
pub use view::ViewState;
