use crate::elevation::ElevationEncoding;
use crate::grid::TileGrid;
use crate::params::TileSourceState;
use crate::stats::{MinMax, TileStatsCache};
use crate::tile::{TileCache, TileCoord, TileImage, TileLayer, TileRange, TileState};

pub const DEFAULT_TILE_CAPACITY: usize = 512;

/// Terrain and overlay caches plus the revision the renderer memoizes against.
///
/// Load completions are the only writers.
#[derive(Debug)]
pub struct TileStore {
    terrain: TileCache,
    overlay: TileCache,
    stats: TileStatsCache,
    source: TileSourceState,
    blank_size: u32,
}

impl Default for TileStore {
    fn default() -> Self {
        Self::new(ElevationEncoding::default(), DEFAULT_TILE_CAPACITY, 256)
    }
}

impl TileStore {
    pub fn new(encoding: ElevationEncoding, capacity: usize, tile_size: u32) -> Self {
        Self {
            terrain: TileCache::new(TileLayer::Terrain, capacity),
            overlay: TileCache::new(TileLayer::Overlay, capacity),
            stats: TileStatsCache::new(encoding),
            source: TileSourceState::default(),
            blank_size: tile_size.max(1),
        }
    }

    pub fn cache(&self, layer: TileLayer) -> &TileCache {
        match layer {
            TileLayer::Terrain => &self.terrain,
            TileLayer::Overlay => &self.overlay,
        }
    }

    fn cache_mut(&mut self, layer: TileLayer) -> &mut TileCache {
        match layer {
            TileLayer::Terrain => &mut self.terrain,
            TileLayer::Overlay => &mut self.overlay,
        }
    }

    pub fn terrain(&self) -> &TileCache {
        &self.terrain
    }

    pub fn overlay(&self) -> &TileCache {
        &self.overlay
    }

    pub fn stats(&self) -> &TileStatsCache {
        &self.stats
    }

    pub fn revision(&self) -> u64 {
        self.source.revision()
    }

    /// Marks a parameter change; the next frame redraws.
    pub fn redraw(&mut self) -> u64 {
        self.source.bump()
    }

    /// Changes the segment grid for tiles whose stats are not computed yet.
    pub fn set_segment_grid_size(&mut self, count: u32) -> Result<(), crate::error::ConfigError> {
        self.stats.encoding_mut().set_segment_grid_size(count)
    }

    /// Tiles of `range` worth requesting. Failed tiles in view are re-armed first.
    pub fn request(&mut self, layer: TileLayer, range: &TileRange) -> Vec<TileCoord> {
        let cache = self.cache_mut(layer);
        let rearmed = cache.reset_errors_in(range);
        if rearmed > 0 {
            tracing::debug!(?layer, rearmed, "retrying failed tiles in view");
        }
        cache.touch_range(range);
        cache.wanted(range)
    }

    pub fn mark_loading(&mut self, layer: TileLayer, coord: TileCoord) {
        self.cache_mut(layer).entry(coord).mark_loading();
    }

    /// A queued load was dropped before it started; the tile can be requested again.
    pub fn cancel_load(&mut self, layer: TileLayer, coord: TileCoord) {
        let cache = self.cache_mut(layer);
        if cache.state(&coord) == TileState::Loading {
            cache.entry(coord).reset();
        }
    }

    /// Installs the result of a tile load.
    ///
    /// A terrain failure installs a blank no-data tile in place so the mosaic can complete.
    /// An overlay failure leaves the tile in `Error` until the camera revisits it.
    pub fn complete_load<E: std::fmt::Display>(
        &mut self,
        layer: TileLayer,
        coord: TileCoord,
        result: Result<TileImage, E>,
    ) {
        let blank_size = self.blank_size;
        let tile = self.cache_mut(layer).entry(coord);
        match (layer, result) {
            (_, Ok(image)) => tile.set_image(image, false),
            (TileLayer::Terrain, Err(err)) => {
                tracing::warn!(tile = %coord, %err, "terrain tile failed, using blank tile");
                tile.set_image(TileImage::blank(blank_size, coord.zoom), true);
            }
            (TileLayer::Overlay, Err(err)) => {
                tracing::warn!(tile = %coord, %err, "overlay tile failed");
                tile.mark_error();
            }
        }
        if layer == TileLayer::Terrain
            && let Some(tile) = self.terrain.get(&coord)
        {
            self.stats.ensure_stats(tile);
        }
        self.source.bump();
    }

    /// The server has no tile here; nothing will be drawn for it.
    pub fn complete_empty(&mut self, layer: TileLayer, coord: TileCoord) {
        self.cache_mut(layer).entry(coord).mark_empty();
        self.source.bump();
    }

    /// Evicts tiles outside `keep` from both layers; returns the evicted terrain and overlay tiles.
    pub fn prune(&mut self, keep: &TileRange) -> (Vec<TileCoord>, Vec<TileCoord>) {
        (self.terrain.prune(keep), self.overlay.prune(keep))
    }

    /// Segment extremes of the terrain around a world coordinate, from the tile at `zoom`.
    pub fn local_min_max_at(&self, grid: &TileGrid, coord: [f64; 2], zoom: u8) -> MinMax {
        let Some(tile) = grid
            .tile_at(coord, zoom)
            .and_then(|c| self.terrain.get(&c))
            .filter(|t| t.is_loaded() && !t.is_blank())
        else {
            return MinMax::UNKNOWN;
        };
        let Some(image) = tile.image() else {
            return MinMax::UNKNOWN;
        };
        let (px, py) = grid.tile_pixel(coord, tile.coord());
        let scale = grid.tile_size.max(1);
        self.stats
            .local_min_max(tile, (px * image.width() / scale, py * image.height() / scale))
    }

    pub fn visible_min_max(&self, range: &TileRange) -> MinMax {
        self.stats.visible_min_max(&self.terrain, range)
    }

    pub fn state(&self, layer: TileLayer, coord: &TileCoord) -> TileState {
        self.cache(layer).state(coord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::encode;

    fn flat(size: u32, zoom: u8, meters: f64) -> TileImage {
        let (a, b) = encode(meters, zoom);
        TileImage::new(size, size, [a, b, 0, 255].repeat((size * size) as usize)).expect("image")
    }

    fn range(zoom: u8) -> TileRange {
        TileRange {
            zoom,
            min_x: 0,
            min_y: 0,
            max_x: 1,
            max_y: 0,
        }
    }

    #[test]
    fn load_computes_stats_and_bumps_revision() {
        let mut store = TileStore::default();
        let coord = TileCoord::new(1, 0, 0);
        store.mark_loading(TileLayer::Terrain, coord);
        assert_eq!(store.state(TileLayer::Terrain, &coord), TileState::Loading);

        store.complete_load::<String>(TileLayer::Terrain, coord, Ok(flat(8, 1, 420.0)));
        assert_eq!(store.revision(), 1);
        assert_eq!(store.stats().scans(), 1);
        assert_eq!(store.visible_min_max(&range(1)), MinMax::new(420.0, 420.0));
    }

    #[test]
    fn terrain_failure_installs_blank_tile() {
        let mut store = TileStore::new(ElevationEncoding::default(), 16, 4);
        let coord = TileCoord::new(2, 1, 1);
        store.complete_load(TileLayer::Terrain, coord, Err("404"));

        let tile = store.terrain().get(&coord).expect("tile present");
        assert!(tile.is_loaded());
        assert!(tile.is_blank());
        assert_eq!(tile.global_min_max(), MinMax::new(0.0, 0.0));
    }

    #[test]
    fn blank_tiles_stay_out_of_the_extremes() {
        let grid = TileGrid::web_mercator(4);
        let mut store = TileStore::new(ElevationEncoding::default(), 16, 4);
        store.complete_load::<String>(TileLayer::Terrain, TileCoord::new(1, 0, 0), Ok(flat(4, 1, 1_500.0)));
        store.complete_load(TileLayer::Terrain, TileCoord::new(1, 1, 0), Err("404"));

        // The failed tile would otherwise drag the minimum down to 0 m.
        assert_eq!(store.visible_min_max(&range(1)), MinMax::new(1_500.0, 1_500.0));

        let failed = grid.tile_extent(TileCoord::new(1, 1, 0));
        let inside = [failed.min_x + failed.width() * 0.5, failed.max_y - failed.height() * 0.5];
        assert!(!store.local_min_max_at(&grid, inside, 1).is_known());
    }

    #[test]
    fn overlay_failure_is_retried_on_revisit() {
        let mut store = TileStore::default();
        let coord = TileCoord::new(1, 1, 0);
        store.complete_load(TileLayer::Overlay, coord, Err("timeout"));
        assert_eq!(store.state(TileLayer::Overlay, &coord), TileState::Error);

        let wanted = store.request(TileLayer::Overlay, &range(1));
        assert!(wanted.contains(&coord));
    }

    #[test]
    fn loading_tiles_are_not_requested_twice() {
        let mut store = TileStore::default();
        store.mark_loading(TileLayer::Terrain, TileCoord::new(1, 0, 0));
        assert_eq!(store.request(TileLayer::Terrain, &range(1)), vec![TileCoord::new(1, 1, 0)]);
    }

    #[test]
    fn local_extremes_follow_the_pointer() {
        let grid = TileGrid::web_mercator(8);
        let mut store = TileStore::new(ElevationEncoding::default(), 16, 8);
        let coord = TileCoord::new(1, 0, 0);
        // Left half low, right half high; segments are 2x2 texels on an 8x8 image.
        let mut pixels = Vec::new();
        for _y in 0..8 {
            for x in 0..8 {
                let (a, b) = encode(if x < 4 { 100.0 } else { 900.0 }, 1);
                pixels.extend_from_slice(&[a, b, 0, 255]);
            }
        }
        let image = TileImage::new(8, 8, pixels).expect("image");
        store.complete_load::<String>(TileLayer::Terrain, coord, Ok(image));

        let extent = grid.tile_extent(coord);
        let west = [extent.min_x + extent.width() * 0.1, extent.max_y - extent.height() * 0.5];
        let east = [extent.max_x - extent.width() * 0.1, west[1]];
        assert_eq!(store.local_min_max_at(&grid, west, 1), MinMax::new(100.0, 100.0));
        assert_eq!(store.local_min_max_at(&grid, east, 1), MinMax::new(900.0, 900.0));
        assert!(!store.local_min_max_at(&grid, east, 2).is_known());
    }

    #[test]
    fn cancelled_load_is_requested_again() {
        let mut store = TileStore::default();
        let coord = TileCoord::new(1, 0, 0);
        store.mark_loading(TileLayer::Terrain, coord);
        store.cancel_load(TileLayer::Terrain, coord);
        assert_eq!(store.state(TileLayer::Terrain, &coord), TileState::Idle);
        assert_eq!(store.request(TileLayer::Terrain, &range(1)).len(), 2);

        // Finished tiles are left alone.
        store.complete_load::<String>(TileLayer::Terrain, coord, Ok(flat(4, 1, 0.0)));
        store.cancel_load(TileLayer::Terrain, coord);
        assert_eq!(store.state(TileLayer::Terrain, &coord), TileState::Loaded);
    }
}
