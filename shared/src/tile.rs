use std::cell::OnceCell;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::elevation::encode;
use crate::error::TileError;
use crate::stats::{MinMax, TileElevationStats};

/// XYZ tile address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TileCoord {
    pub zoom: u8,
    pub x: u32,
    pub y: u32,
}

impl TileCoord {
    pub const fn new(zoom: u8, x: u32, y: u32) -> Self {
        Self { zoom, x, y }
    }

    pub fn parent(&self) -> Option<Self> {
        self.ancestor(1)
    }

    /// Ancestor `steps` levels up, halving column and row per level.
    pub fn ancestor(&self, steps: u8) -> Option<Self> {
        if steps > self.zoom {
            return None;
        }
        Some(Self::new(self.zoom - steps, self.x >> steps, self.y >> steps))
    }

    pub fn children(&self) -> [Self; 4] {
        let (zoom, x, y) = (self.zoom + 1, self.x * 2, self.y * 2);
        [
            Self::new(zoom, x, y),
            Self::new(zoom, x + 1, y),
            Self::new(zoom, x, y + 1),
            Self::new(zoom, x + 1, y + 1),
        ]
    }

    /// Every descendant exactly `depth` levels down, row-major.
    pub fn descendants_at(&self, depth: u8) -> impl Iterator<Item = Self> + use<> {
        let side = 1u32 << depth;
        let (zoom, x0, y0) = (self.zoom + depth, self.x << depth, self.y << depth);
        (0..side).flat_map(move |dy| (0..side).map(move |dx| Self::new(zoom, x0 + dx, y0 + dy)))
    }

    /// Whether `other` lies inside this tile (or is this tile).
    pub fn contains(&self, other: &Self) -> bool {
        other.zoom >= self.zoom
            && other.ancestor(other.zoom - self.zoom).as_ref() == Some(self)
    }
}

impl std::fmt::Display for TileCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.zoom, self.x, self.y)
    }
}

/// Inclusive rectangle of tiles at one zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TileRange {
    pub zoom: u8,
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl TileRange {
    pub fn columns(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn rows(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn len(&self) -> usize {
        self.columns() as usize * self.rows() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, coord: &TileCoord) -> bool {
        coord.zoom == self.zoom
            && (self.min_x..=self.max_x).contains(&coord.x)
            && (self.min_y..=self.max_y).contains(&coord.y)
    }

    /// True when `coord` is inside the range, above it, or below it in the pyramid.
    pub fn overlaps(&self, coord: &TileCoord) -> bool {
        if coord.zoom <= self.zoom {
            let d = self.zoom - coord.zoom;
            (self.min_x >> d..=self.max_x >> d).contains(&coord.x)
                && (self.min_y >> d..=self.max_y >> d).contains(&coord.y)
        } else {
            coord
                .ancestor(coord.zoom - self.zoom)
                .is_some_and(|a| self.contains(&a))
        }
    }

    /// Row-major walk.
    pub fn iter(&self) -> impl Iterator<Item = TileCoord> + use<> {
        let range = *self;
        (range.min_y..=range.max_y)
            .flat_map(move |y| (range.min_x..=range.max_x).map(move |x| TileCoord::new(range.zoom, x, y)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TileLayer {
    Terrain,
    Overlay,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TileState {
    #[default]
    Idle,
    Loading,
    Loaded,
    Error,
    Empty,
}

/// Decoded RGBA8 image of one tile.
#[derive(Debug, Clone, PartialEq)]
pub struct TileImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl TileImage {
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, TileError> {
        if width == 0 || height == 0 {
            return Err(TileError::EmptyImage);
        }
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(TileError::PixelBufferSize {
                width,
                height,
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A terrain image whose every pixel decodes to 0 m, the no-data level.
    pub fn blank(size: u32, zoom: u8) -> Self {
        let (a, b) = encode(0.0, zoom);
        let pixels = [a, b, 0, 255].repeat(size as usize * size as usize);
        Self {
            width: size,
            height: size,
            pixels,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        self.pixels.get(i..i + 4).and_then(|p| p.try_into().ok())
    }
}

/// What the renderer and the interaction need from a tile.
pub trait ElevationSource {
    fn elevation_stats(&self) -> Option<&TileElevationStats>;
    fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]>;
}

#[derive(Debug, Clone)]
pub struct Tile {
    coord: TileCoord,
    layer: TileLayer,
    state: TileState,
    image: Option<TileImage>,
    stats: OnceCell<TileElevationStats>,
    blank: bool,
    last_used: u64,
}

impl Tile {
    pub fn new(coord: TileCoord, layer: TileLayer) -> Self {
        Self {
            coord,
            layer,
            state: TileState::Idle,
            image: None,
            stats: OnceCell::new(),
            blank: false,
            last_used: 0,
        }
    }

    pub fn coord(&self) -> TileCoord {
        self.coord
    }

    pub fn layer(&self) -> TileLayer {
        self.layer
    }

    pub fn state(&self) -> TileState {
        self.state
    }

    pub fn is_loaded(&self) -> bool {
        self.state == TileState::Loaded && self.image.is_some()
    }

    pub fn is_blank(&self) -> bool {
        self.blank
    }

    pub fn image(&self) -> Option<&TileImage> {
        self.image.as_ref()
    }

    pub fn last_used(&self) -> u64 {
        self.last_used
    }

    pub(crate) fn stats_cell(&self) -> &OnceCell<TileElevationStats> {
        &self.stats
    }

    pub fn global_min_max(&self) -> MinMax {
        self.stats.get().map(|s| s.global).unwrap_or(MinMax::UNKNOWN)
    }

    pub(crate) fn mark_loading(&mut self) {
        self.state = TileState::Loading;
    }

    pub(crate) fn set_image(&mut self, image: TileImage, blank: bool) {
        self.image = Some(image);
        self.blank = blank;
        self.state = TileState::Loaded;
    }

    pub(crate) fn mark_error(&mut self) {
        self.state = TileState::Error;
    }

    pub(crate) fn mark_empty(&mut self) {
        self.state = TileState::Empty;
    }

    pub(crate) fn reset(&mut self) {
        self.state = TileState::Idle;
    }
}

impl ElevationSource for Tile {
    fn elevation_stats(&self) -> Option<&TileElevationStats> {
        self.stats.get()
    }

    fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        self.image.as_ref()?.pixel(x, y)
    }
}

/// Tiles of one layer keyed by coordinate. A tile lives until it is evicted.
#[derive(Debug, Clone)]
pub struct TileCache {
    layer: TileLayer,
    tiles: HashMap<TileCoord, Tile>,
    capacity: usize,
    clock: u64,
}

impl TileCache {
    pub fn new(layer: TileLayer, capacity: usize) -> Self {
        Self {
            layer,
            tiles: HashMap::new(),
            capacity: capacity.max(1),
            clock: 0,
        }
    }

    pub fn layer(&self) -> TileLayer {
        self.layer
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    pub fn get(&self, coord: &TileCoord) -> Option<&Tile> {
        self.tiles.get(coord)
    }

    pub fn state(&self, coord: &TileCoord) -> TileState {
        self.tiles.get(coord).map(Tile::state).unwrap_or_default()
    }

    pub fn is_loaded(&self, coord: &TileCoord) -> bool {
        self.tiles.get(coord).is_some_and(Tile::is_loaded)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tile> {
        self.tiles.values()
    }

    pub(crate) fn entry(&mut self, coord: TileCoord) -> &mut Tile {
        self.clock += 1;
        let clock = self.clock;
        let tile = self
            .tiles
            .entry(coord)
            .or_insert_with(|| Tile::new(coord, self.layer));
        tile.last_used = clock;
        tile
    }

    /// Mark every tile of `range` as recently used.
    pub fn touch_range(&mut self, range: &TileRange) {
        self.clock += 1;
        let clock = self.clock;
        for coord in range.iter() {
            if let Some(tile) = self.tiles.get_mut(&coord) {
                tile.last_used = clock;
            }
        }
    }

    /// Tiles of `range` that are not loaded and not currently loading.
    pub fn wanted(&self, range: &TileRange) -> Vec<TileCoord> {
        range
            .iter()
            .filter(|coord| self.state(coord) == TileState::Idle)
            .collect()
    }

    /// Re-arm failed tiles of `range` so that the next request retries them.
    pub fn reset_errors_in(&mut self, range: &TileRange) -> usize {
        let mut reset = 0;
        for coord in range.iter() {
            if let Some(tile) = self.tiles.get_mut(&coord)
                && tile.state == TileState::Error
            {
                tile.reset();
                reset += 1;
            }
        }
        reset
    }

    /// Evict least recently used tiles outside `keep` until the cache fits its capacity.
    pub fn prune(&mut self, keep: &TileRange) -> Vec<TileCoord> {
        if self.tiles.len() <= self.capacity {
            return Vec::new();
        }
        let mut candidates: Vec<(u64, TileCoord)> = self
            .tiles
            .values()
            .filter(|tile| tile.state != TileState::Loading && !keep.overlaps(&tile.coord))
            .map(|tile| (tile.last_used, tile.coord))
            .collect();
        candidates.sort_unstable();
        let excess = self.tiles.len() - self.capacity;
        let evicted: Vec<TileCoord> = candidates.into_iter().take(excess).map(|(_, c)| c).collect();
        for coord in &evicted {
            self.tiles.remove(coord);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loaded(cache: &mut TileCache, coord: TileCoord) {
        cache.entry(coord).set_image(TileImage::blank(4, coord.zoom), false);
    }

    #[test]
    fn ancestors_halve_coordinates() {
        let tile = TileCoord::new(5, 13, 22);
        assert_eq!(tile.parent(), Some(TileCoord::new(4, 6, 11)));
        assert_eq!(tile.ancestor(3), Some(TileCoord::new(2, 1, 2)));
        assert_eq!(tile.ancestor(5), Some(TileCoord::new(0, 0, 0)));
        assert_eq!(tile.ancestor(6), None);
    }

    #[test]
    fn descendants_stay_inside_parent() {
        let tile = TileCoord::new(3, 2, 5);
        let children: Vec<_> = tile.descendants_at(2).collect();
        assert_eq!(children.len(), 16);
        assert!(children.iter().all(|c| tile.contains(c)));
        assert_eq!(tile.children().to_vec(), tile.descendants_at(1).collect::<Vec<_>>());
        assert!(!tile.contains(&TileCoord::new(4, 0, 0)));
    }

    #[test]
    fn pixel_buffer_size_is_checked() {
        assert!(TileImage::new(2, 2, vec![0; 16]).is_ok());
        assert_eq!(
            TileImage::new(2, 2, vec![0; 15]),
            Err(TileError::PixelBufferSize {
                width: 2,
                height: 2,
                expected: 16,
                actual: 15
            })
        );
        assert_eq!(TileImage::new(0, 2, Vec::new()), Err(TileError::EmptyImage));
    }

    #[test]
    fn range_overlap_includes_pyramid_neighbours() {
        let range = TileRange {
            zoom: 4,
            min_x: 4,
            min_y: 4,
            max_x: 5,
            max_y: 5,
        };
        assert!(range.overlaps(&TileCoord::new(3, 2, 2)));
        assert!(range.overlaps(&TileCoord::new(5, 11, 10)));
        assert!(!range.overlaps(&TileCoord::new(4, 6, 4)));
        assert_eq!(range.iter().count(), 4);
    }

    #[test]
    fn prune_evicts_oldest_tiles_outside_view() {
        let mut cache = TileCache::new(TileLayer::Terrain, 2);
        let keep = TileRange {
            zoom: 2,
            min_x: 0,
            min_y: 0,
            max_x: 0,
            max_y: 0,
        };
        loaded(&mut cache, TileCoord::new(2, 3, 3));
        loaded(&mut cache, TileCoord::new(2, 2, 2));
        loaded(&mut cache, TileCoord::new(2, 0, 0));
        loaded(&mut cache, TileCoord::new(2, 1, 1));

        let evicted = cache.prune(&keep);
        assert_eq!(evicted, vec![TileCoord::new(2, 3, 3), TileCoord::new(2, 2, 2)]);
        assert!(cache.is_loaded(&TileCoord::new(2, 0, 0)));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn errors_are_rearmed_on_revisit() {
        let mut cache = TileCache::new(TileLayer::Overlay, 8);
        let coord = TileCoord::new(1, 0, 0);
        cache.entry(coord).mark_error();
        let range = TileRange {
            zoom: 1,
            min_x: 0,
            min_y: 0,
            max_x: 1,
            max_y: 1,
        };
        assert_eq!(cache.wanted(&range).len(), 3);
        assert_eq!(cache.reset_errors_in(&range), 1);
        assert_eq!(cache.state(&coord), TileState::Idle);
        assert_eq!(cache.wanted(&range).len(), 4);
    }
}
