use std::cell::Cell;

use serde::{Deserialize, Serialize};

use crate::elevation::{ELEV_MAX, ELEV_MIN, ElevationEncoding, decode};
use crate::tile::{Tile, TileCache, TileImage, TileRange};

/// Elevation extremes in meters. An inverted pair means "no data".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    pub const UNKNOWN: Self = Self {
        min: ELEV_MAX,
        max: ELEV_MIN,
    };

    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn is_known(&self) -> bool {
        self.min <= self.max
    }

    pub fn include(&mut self, meters: f64) {
        self.min = self.min.min(meters);
        self.max = self.max.max(meters);
    }

    pub fn merge(self, other: Self) -> Self {
        Self {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    pub fn midpoint(&self) -> Option<f64> {
        self.is_known().then(|| (self.min + self.max) / 2.0)
    }
}

impl Default for MinMax {
    fn default() -> Self {
        Self::UNKNOWN
    }
}

/// Global and per-segment elevation extremes of one terrain tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TileElevationStats {
    pub global: MinMax,
    pub segments_per_axis: u32,
    /// Row-major `segments_per_axis²` entries.
    pub segments: Vec<MinMax>,
}

impl TileElevationStats {
    pub fn segment(&self, sx: u32, sy: u32) -> MinMax {
        if sx >= self.segments_per_axis || sy >= self.segments_per_axis {
            return MinMax::UNKNOWN;
        }
        self.segments[(sy * self.segments_per_axis + sx) as usize]
    }
}

/// Scan every pixel once, folding decoded elevations into `n×n` equal blocks.
///
/// Blocks are `width / n` pixels wide; the last row and column absorb any remainder.
pub fn compute_stats(image: &TileImage, zoom: u8, segments_per_axis: u32) -> TileElevationStats {
    let n = segments_per_axis.clamp(1, image.width().min(image.height()));
    let block_w = image.width() / n;
    let block_h = image.height() / n;
    let mut segments = vec![MinMax::UNKNOWN; (n * n) as usize];
    let mut global = MinMax::UNKNOWN;

    let width = image.width() as usize;
    for (i, px) in image.pixels().chunks_exact(4).enumerate() {
        let x = (i % width) as u32;
        let y = (i / width) as u32;
        let meters = decode(px[0], px[1], zoom);
        let sx = (x / block_w).min(n - 1);
        let sy = (y / block_h).min(n - 1);
        segments[(sy * n + sx) as usize].include(meters);
        global.include(meters);
    }

    TileElevationStats {
        global,
        segments_per_axis: n,
        segments,
    }
}

/// Computes tile statistics on load and serves min/max queries.
///
/// Results live in the tile itself, so they share its lifetime and are never recomputed.
#[derive(Debug, Default)]
pub struct TileStatsCache {
    encoding: ElevationEncoding,
    scans: Cell<u64>,
}

impl TileStatsCache {
    pub fn new(encoding: ElevationEncoding) -> Self {
        Self {
            encoding,
            scans: Cell::new(0),
        }
    }

    pub fn encoding(&self) -> &ElevationEncoding {
        &self.encoding
    }

    pub fn encoding_mut(&mut self) -> &mut ElevationEncoding {
        &mut self.encoding
    }

    /// Number of pixel scans performed so far.
    pub fn scans(&self) -> u64 {
        self.scans.get()
    }

    /// Stats of `tile`, computing them the first time. `None` until the tile has pixels.
    pub fn ensure_stats<'t>(&self, tile: &'t Tile) -> Option<&'t TileElevationStats> {
        let image = tile.image()?;
        Some(tile.stats_cell().get_or_init(|| {
            self.scans.set(self.scans.get() + 1);
            let stats = compute_stats(image, tile.coord().zoom, self.encoding.segments_per_axis());
            tracing::debug!(
                tile = %tile.coord(),
                min = stats.global.min,
                max = stats.global.max,
                "computed tile elevation stats"
            );
            stats
        }))
    }

    pub fn global_min_max(&self, tile: &Tile) -> MinMax {
        tile.global_min_max()
    }

    pub fn segment_min_max(&self, tile: &Tile, segment: (u32, u32)) -> MinMax {
        tile.stats_cell()
            .get()
            .map(|stats| stats.segment(segment.0, segment.1))
            .unwrap_or(MinMax::UNKNOWN)
    }

    /// Segment extremes around a tile pixel.
    pub fn local_min_max(&self, tile: &Tile, pixel: (u32, u32)) -> MinMax {
        let (Some(stats), Some(image)) = (tile.stats_cell().get(), tile.image()) else {
            return MinMax::UNKNOWN;
        };
        let n = stats.segments_per_axis;
        let sx = (pixel.0 / (image.width() / n).max(1)).min(n - 1);
        let sy = (pixel.1 / (image.height() / n).max(1)).min(n - 1);
        stats.segment(sx, sy)
    }

    /// Extremes over the loaded tiles of `range`, skipping tiles without stats
    /// and blank stand-ins for failed loads.
    pub fn visible_min_max(&self, cache: &TileCache, range: &TileRange) -> MinMax {
        range
            .iter()
            .filter_map(|coord| cache.get(&coord))
            .filter(|tile| !tile.is_blank())
            .map(Tile::global_min_max)
            .filter(MinMax::is_known)
            .fold(MinMax::UNKNOWN, MinMax::merge)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::encode;
    use crate::tile::{TileCoord, TileLayer};

    fn image_with(size: u32, zoom: u8, f: impl Fn(u32, u32) -> f64) -> TileImage {
        let mut pixels = Vec::with_capacity((size * size * 4) as usize);
        for y in 0..size {
            for x in 0..size {
                let (a, b) = encode(f(x, y), zoom);
                pixels.extend_from_slice(&[a, b, 0, 255]);
            }
        }
        TileImage::new(size, size, pixels).expect("valid image")
    }

    fn loaded_tile(coord: TileCoord, image: TileImage) -> Tile {
        let mut tile = Tile::new(coord, TileLayer::Terrain);
        tile.set_image(image, false);
        tile
    }

    #[test]
    fn single_peak_sets_global_and_one_segment_max() {
        let image = image_with(256, 5, |x, y| if (x, y) == (200, 70) { 4_321.0 } else { 100.0 });
        let stats = compute_stats(&image, 5, 4);

        assert_eq!(stats.segments.len(), 16);
        assert_eq!(stats.global, MinMax::new(100.0, 4_321.0));
        let max_of_segments = stats.segments.iter().map(|s| s.max).fold(f64::MIN, f64::max);
        assert_eq!(stats.global.max, max_of_segments);
        // 64x64 blocks: pixel (200, 70) falls in segment (3, 1).
        assert_eq!(stats.segment(3, 1).max, 4_321.0);
        assert_eq!(stats.segment(0, 0), MinMax::new(100.0, 100.0));
    }

    #[test]
    fn global_bounds_every_segment() {
        let image = image_with(64, 7, |x, y| x as f64 * 10.0 - y as f64 * 7.0);
        let stats = compute_stats(&image, 7, 8);
        for segment in &stats.segments {
            assert!(stats.global.min <= segment.min);
            assert!(stats.global.max >= segment.max);
        }
        let folded = stats.segments.iter().copied().fold(MinMax::UNKNOWN, MinMax::merge);
        assert_eq!(folded, stats.global);
    }

    #[test]
    fn remainder_pixels_join_the_last_segment() {
        let image = image_with(10, 3, |x, y| if (x, y) == (9, 9) { 50.0 } else { 1.0 });
        let stats = compute_stats(&image, 3, 3);
        assert_eq!(stats.segment(2, 2).max, 50.0);
        assert_eq!(stats.segment(1, 1).max, 1.0);
    }

    #[test]
    fn stats_are_computed_once() {
        let engine = TileStatsCache::default();
        let tile = loaded_tile(TileCoord::new(5, 1, 1), image_with(16, 5, |x, _| x as f64));

        let first = engine.ensure_stats(&tile).expect("tile has pixels").clone();
        let second = engine.ensure_stats(&tile).expect("tile has pixels");
        assert_eq!(engine.scans(), 1);
        assert_eq!(&first, second);
        assert_eq!(first.global.min.to_bits(), second.global.min.to_bits());
    }

    #[test]
    fn segment_size_change_spares_statted_tiles() {
        let mut engine = TileStatsCache::default();
        let old = loaded_tile(TileCoord::new(4, 0, 0), image_with(16, 4, |_, _| 3.0));
        engine.ensure_stats(&old);
        engine.encoding_mut().set_segment_grid_size(4).expect("2x2");
        let new = loaded_tile(TileCoord::new(4, 1, 0), image_with(16, 4, |_, _| 3.0));

        assert_eq!(engine.ensure_stats(&old).map(|s| s.segments_per_axis), Some(4));
        assert_eq!(engine.ensure_stats(&new).map(|s| s.segments_per_axis), Some(2));
    }

    #[test]
    fn missing_pixels_report_inverted_pair() {
        let engine = TileStatsCache::default();
        let tile = Tile::new(TileCoord::new(2, 0, 0), TileLayer::Terrain);
        assert!(engine.ensure_stats(&tile).is_none());
        let pair = engine.global_min_max(&tile);
        assert_eq!(pair, MinMax::new(ELEV_MAX, ELEV_MIN));
        assert!(!pair.is_known());
        assert!(!engine.segment_min_max(&tile, (0, 0)).is_known());
    }

    #[test]
    fn local_min_max_follows_segment_under_pixel() {
        let engine = TileStatsCache::default();
        let tile = loaded_tile(
            TileCoord::new(6, 0, 0),
            image_with(32, 6, |x, y| if x >= 24 && y < 8 { 900.0 } else { 10.0 }),
        );
        engine.ensure_stats(&tile);
        assert_eq!(engine.local_min_max(&tile, (30, 2)), MinMax::new(900.0, 900.0));
        assert_eq!(engine.local_min_max(&tile, (2, 30)), MinMax::new(10.0, 10.0));
    }
}
