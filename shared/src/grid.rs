use serde::{Deserialize, Serialize};

use crate::tile::{TileCoord, TileRange};

/// Half the circumference of the spherical mercator world, in meters.
const MERCATOR_HALF_EXTENT: f64 = 20_037_508.342_789_244;
pub const DEFAULT_TILE_SIZE: u32 = 256;
pub const DEFAULT_MAX_ZOOM: u8 = 18;

/// Axis-aligned rectangle in world coordinates (x east, y north).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Extent {
    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, coord: [f64; 2]) -> bool {
        coord[0] >= self.min_x
            && coord[0] <= self.max_x
            && coord[1] >= self.min_y
            && coord[1] <= self.max_y
    }

    /// Smallest extent covering all points.
    pub fn bounding(points: &[[f64; 2]]) -> Option<Self> {
        let (first, rest) = points.split_first()?;
        let mut extent = Self {
            min_x: first[0],
            min_y: first[1],
            max_x: first[0],
            max_y: first[1],
        };
        for p in rest {
            extent.min_x = extent.min_x.min(p[0]);
            extent.min_y = extent.min_y.min(p[1]);
            extent.max_x = extent.max_x.max(p[0]);
            extent.max_y = extent.max_y.max(p[1]);
        }
        Some(extent)
    }
}

/// Square XYZ tile grid: zoom 0 is a single tile covering the whole extent,
/// every zoom level doubles the tile count per axis. Rows grow southward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TileGrid {
    pub origin: [f64; 2],
    pub size: f64,
    pub tile_size: u32,
    pub max_zoom: u8,
}

impl Default for TileGrid {
    fn default() -> Self {
        Self::web_mercator(DEFAULT_TILE_SIZE)
    }
}

impl TileGrid {
    pub fn web_mercator(tile_size: u32) -> Self {
        Self {
            origin: [-MERCATOR_HALF_EXTENT, MERCATOR_HALF_EXTENT],
            size: MERCATOR_HALF_EXTENT * 2.0,
            tile_size,
            max_zoom: DEFAULT_MAX_ZOOM,
        }
    }

    pub fn extent(&self) -> Extent {
        Extent {
            min_x: self.origin[0],
            min_y: self.origin[1] - self.size,
            max_x: self.origin[0] + self.size,
            max_y: self.origin[1],
        }
    }

    /// Ground size of one tile at `zoom`.
    pub fn tile_span(&self, zoom: u8) -> f64 {
        self.size / f64::from(1u32 << zoom.min(31))
    }

    /// Meters per tile pixel at `zoom`.
    pub fn resolution(&self, zoom: u8) -> f64 {
        self.tile_span(zoom) / self.tile_size as f64
    }

    /// Nearest zoom level whose native resolution matches `resolution`.
    pub fn zoom_for_resolution(&self, resolution: f64) -> u8 {
        if !(resolution.is_finite() && resolution > 0.0) {
            return 0;
        }
        let zoom = (self.resolution(0) / resolution).log2().round();
        zoom.clamp(0.0, self.max_zoom as f64) as u8
    }

    /// Tile containing `coord` at `zoom`, or `None` outside the grid.
    pub fn tile_at(&self, coord: [f64; 2], zoom: u8) -> Option<TileCoord> {
        if !self.extent().contains(coord) {
            return None;
        }
        let span = self.tile_span(zoom);
        let last = (1u32 << zoom) - 1;
        let x = (((coord[0] - self.origin[0]) / span).floor() as u32).min(last);
        let y = (((self.origin[1] - coord[1]) / span).floor() as u32).min(last);
        Some(TileCoord::new(zoom, x, y))
    }

    pub fn tile_extent(&self, tile: TileCoord) -> Extent {
        let span = self.tile_span(tile.zoom);
        let min_x = self.origin[0] + tile.x as f64 * span;
        let max_y = self.origin[1] - tile.y as f64 * span;
        Extent {
            min_x,
            min_y: max_y - span,
            max_x: min_x + span,
            max_y,
        }
    }

    /// Inclusive tile range covering `extent`, clamped to the grid.
    pub fn range_for_extent(&self, extent: &Extent, zoom: u8) -> TileRange {
        let span = self.tile_span(zoom);
        let last = ((1u64 << zoom) - 1) as f64;
        let col = |x: f64| ((x - self.origin[0]) / span).floor().clamp(0.0, last) as u32;
        let row = |y: f64| ((self.origin[1] - y) / span).floor().clamp(0.0, last) as u32;
        TileRange {
            zoom,
            min_x: col(extent.min_x),
            min_y: row(extent.max_y),
            max_x: col(extent.max_x),
            max_y: row(extent.min_y),
        }
    }

    /// Pixel of `tile`'s image lying under `coord`, clamped to the tile edge.
    pub fn tile_pixel(&self, coord: [f64; 2], tile: TileCoord) -> (u32, u32) {
        let extent = self.tile_extent(tile);
        let res = self.resolution(tile.zoom);
        let last = self.tile_size.saturating_sub(1) as f64;
        let px = ((coord[0] - extent.min_x) / res).floor().clamp(0.0, last);
        let py = ((extent.max_y - coord[1]) / res).floor().clamp(0.0, last);
        (px as u32, py as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zoom_zero_is_one_tile() {
        let grid = TileGrid::default();
        assert_eq!(grid.tile_at([0.0, 0.0], 0), Some(TileCoord::new(0, 0, 0)));
        assert_eq!(grid.tile_at([1.0, 1.0], 1), Some(TileCoord::new(1, 1, 0)));
        assert_eq!(grid.tile_at([-1.0, -1.0], 1), Some(TileCoord::new(1, 0, 1)));
    }

    #[test]
    fn outside_the_grid_has_no_tile() {
        let grid = TileGrid::default();
        assert_eq!(grid.tile_at([0.0, MERCATOR_HALF_EXTENT * 2.0], 3), None);
    }

    #[test]
    fn resolution_round_trips_through_zoom() {
        let grid = TileGrid::default();
        for zoom in 0..=grid.max_zoom {
            assert_eq!(grid.zoom_for_resolution(grid.resolution(zoom)), zoom);
        }
        assert_eq!(grid.zoom_for_resolution(grid.resolution(7) * 0.9), 7);
        assert_eq!(grid.zoom_for_resolution(1e-9), grid.max_zoom);
    }

    #[test]
    fn tile_extent_and_pixel_agree() {
        let grid = TileGrid::default();
        let tile = TileCoord::new(4, 9, 5);
        let extent = grid.tile_extent(tile);
        let res = grid.resolution(4);
        let coord = [extent.min_x + res * 10.5, extent.max_y - res * 200.5];
        assert_eq!(grid.tile_at(coord, 4), Some(tile));
        assert_eq!(grid.tile_pixel(coord, tile), (10, 200));
    }

    #[test]
    fn range_covers_extent() {
        let grid = TileGrid::default();
        let a = grid.tile_extent(TileCoord::new(5, 3, 4));
        let b = grid.tile_extent(TileCoord::new(5, 6, 8));
        let extent = Extent {
            min_x: a.min_x + 1.0,
            min_y: b.min_y + 1.0,
            max_x: b.max_x - 1.0,
            max_y: a.max_y - 1.0,
        };
        let range = grid.range_for_extent(&extent, 5);
        assert_eq!((range.min_x, range.min_y, range.max_x, range.max_y), (3, 4, 6, 8));
        assert_eq!(range.columns(), 4);
        assert_eq!(range.rows(), 5);
    }
}
