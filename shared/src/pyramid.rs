use serde::{Deserialize, Serialize};

use crate::elevation::decode;
use crate::grid::TileGrid;
use crate::tile::{ElevationSource, TileCache, TileCoord};

/// Sub-rectangle of a texture (or of a cell) in normalized `[0, 1]` units.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UvWindow {
    pub offset: [f32; 2],
    pub scale: f32,
}

impl UvWindow {
    pub const FULL: Self = Self {
        offset: [0.0, 0.0],
        scale: 1.0,
    };

    /// Where `inner` (relative to this window) lands in this window's parent space.
    pub fn compose(&self, inner: &Self) -> Self {
        Self {
            offset: [
                self.offset[0] + inner.offset[0] * self.scale,
                self.offset[1] + inner.offset[1] * self.scale,
            ],
            scale: self.scale * inner.scale,
        }
    }

    /// Window of `descendant` inside `ancestor`.
    pub fn of_descendant(ancestor: TileCoord, descendant: TileCoord) -> Self {
        let depth = descendant.zoom.saturating_sub(ancestor.zoom);
        let side = (1u32 << depth) as f32;
        Self {
            offset: [
                (descendant.x - (ancestor.x << depth)) as f32 / side,
                (descendant.y - (ancestor.y << depth)) as f32 / side,
            ],
            scale: 1.0 / side,
        }
    }
}

/// A stand-in for a tile that is not ready yet.
#[derive(Debug, Clone, PartialEq)]
pub enum Substitute {
    /// A coarser tile; draw the part of it covering the wanted tile.
    Ancestor { coord: TileCoord, window: UvWindow },
    /// Finer tiles; each covers `window` of the wanted cell.
    Descendants(Vec<(TileCoord, UvWindow)>),
    None,
}

impl Substitute {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Finds exact or substitute tiles in the pyramid of cached tiles.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilePyramidResolver {
    pub max_ancestor_steps: u8,
    pub search_descendants: bool,
    pub max_descendant_depth: u8,
}

impl Default for TilePyramidResolver {
    fn default() -> Self {
        Self {
            max_ancestor_steps: 8,
            search_descendants: true,
            max_descendant_depth: 1,
        }
    }
}

impl TilePyramidResolver {
    /// Elevation under `coord` from the exact tile at `zoom`, if it is loaded.
    pub fn resolve_elevation_at(
        &self,
        grid: &TileGrid,
        cache: &TileCache,
        coord: [f64; 2],
        zoom: u8,
    ) -> Option<f64> {
        let tile_coord = grid.tile_at(coord, zoom)?;
        let tile = cache.get(&tile_coord).filter(|t| t.is_loaded())?;
        let image = tile.image()?;
        let (px, py) = grid.tile_pixel(coord, tile_coord);
        // Images need not match the grid's nominal tile size.
        let px = px * image.width() / grid.tile_size.max(1);
        let py = py * image.height() / grid.tile_size.max(1);
        let [a, b, ..] = tile.pixel(px, py)?;
        Some(decode(a, b, zoom))
    }

    /// Best loaded stand-in for `tile`, judged by the cache alone.
    pub fn find_substitute_for_render(&self, cache: &TileCache, tile: TileCoord) -> Substitute {
        self.find_substitute_with(tile, |coord| cache.is_loaded(&coord))
    }

    /// Ancestors first (coarse but immediately drawable), then descendants when enabled.
    ///
    /// `ready` decides whether a candidate can be drawn right now.
    pub fn find_substitute_with(
        &self,
        tile: TileCoord,
        mut ready: impl FnMut(TileCoord) -> bool,
    ) -> Substitute {
        for steps in 1..=self.max_ancestor_steps.min(tile.zoom) {
            let Some(ancestor) = tile.ancestor(steps) else {
                break;
            };
            if ready(ancestor) {
                tracing::debug!(%tile, %ancestor, "ancestor substitute");
                return Substitute::Ancestor {
                    coord: ancestor,
                    window: UvWindow::of_descendant(ancestor, tile),
                };
            }
        }

        if !self.search_descendants {
            return Substitute::None;
        }
        for depth in 1..=self.max_descendant_depth {
            let found: Vec<(TileCoord, UvWindow)> = tile
                .descendants_at(depth)
                .filter(|child| ready(*child))
                .map(|child| (child, UvWindow::of_descendant(tile, child)))
                .collect();
            if !found.is_empty() {
                tracing::debug!(%tile, count = found.len(), "descendant substitutes");
                return Substitute::Descendants(found);
            }
        }
        Substitute::None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::elevation::encode;
    use crate::tile::{TileImage, TileLayer};

    fn cache_with(coords: &[TileCoord]) -> TileCache {
        let mut cache = TileCache::new(TileLayer::Terrain, 64);
        for coord in coords {
            cache.entry(*coord).set_image(TileImage::blank(4, coord.zoom), false);
        }
        cache
    }

    #[test]
    fn ancestor_is_preferred_over_descendants() {
        let wanted = TileCoord::new(6, 21, 42);
        let cache = cache_with(&[TileCoord::new(4, 5, 10), TileCoord::new(7, 42, 84)]);
        let resolver = TilePyramidResolver::default();

        match resolver.find_substitute_for_render(&cache, wanted) {
            Substitute::Ancestor { coord, window } => {
                assert_eq!(coord, TileCoord::new(4, 5, 10));
                assert_eq!(window.scale, 0.25);
                assert_eq!(window.offset, [0.25, 0.5]);
            }
            other => panic!("expected ancestor, got {other:?}"),
        }
    }

    #[test]
    fn descendants_fill_in_when_no_ancestor_is_loaded() {
        let wanted = TileCoord::new(6, 21, 42);
        let cache = cache_with(&[TileCoord::new(7, 43, 85), TileCoord::new(7, 42, 84)]);
        let resolver = TilePyramidResolver::default();

        let Substitute::Descendants(found) = resolver.find_substitute_for_render(&cache, wanted)
        else {
            panic!("expected descendants");
        };
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, TileCoord::new(7, 42, 84));
        assert_eq!(found[0].1.offset, [0.0, 0.0]);
        assert_eq!(found[1].1.offset, [0.5, 0.5]);
    }

    #[test]
    fn descendant_search_can_be_disabled() {
        let wanted = TileCoord::new(3, 1, 1);
        let cache = cache_with(&[TileCoord::new(4, 2, 2)]);
        let resolver = TilePyramidResolver {
            search_descendants: false,
            ..TilePyramidResolver::default()
        };
        assert!(resolver.find_substitute_for_render(&cache, wanted).is_none());
    }

    #[test]
    fn ancestor_walk_is_bounded() {
        let wanted = TileCoord::new(10, 1023, 1023);
        let cache = cache_with(&[TileCoord::new(0, 0, 0)]);
        let resolver = TilePyramidResolver {
            max_ancestor_steps: 4,
            search_descendants: false,
            ..TilePyramidResolver::default()
        };
        assert!(resolver.find_substitute_for_render(&cache, wanted).is_none());
        let far = TilePyramidResolver {
            max_ancestor_steps: 10,
            ..resolver
        };
        assert!(matches!(
            far.find_substitute_for_render(&cache, wanted),
            Substitute::Ancestor { .. }
        ));
    }

    #[test]
    fn elevation_needs_the_exact_tile() {
        let grid = TileGrid::default();
        let zoom = 3;
        let tile = TileCoord::new(zoom, 4, 3);
        let mut cache = TileCache::new(TileLayer::Terrain, 8);
        let (a, b) = encode(1_250.0, zoom);
        let pixels = [a, b, 0, 255].repeat(16);
        cache
            .entry(tile)
            .set_image(TileImage::new(4, 4, pixels).expect("4x4"), false);

        let extent = grid.tile_extent(tile);
        let inside = [extent.min_x + 1.0, extent.max_y - 1.0];
        let resolver = TilePyramidResolver::default();
        assert_eq!(resolver.resolve_elevation_at(&grid, &cache, inside, zoom), Some(1_250.0));
        assert_eq!(resolver.resolve_elevation_at(&grid, &cache, inside, zoom + 1), None);
        let elsewhere = [extent.max_x + 10.0, extent.max_y - 1.0];
        assert_eq!(resolver.resolve_elevation_at(&grid, &cache, elsewhere, zoom), None);
    }

    #[test]
    fn windows_compose() {
        let outer = UvWindow {
            offset: [0.5, 0.0],
            scale: 0.5,
        };
        let inner = UvWindow {
            offset: [0.5, 0.5],
            scale: 0.5,
        };
        let composed = outer.compose(&inner);
        assert_eq!(composed.offset, [0.75, 0.25]);
        assert_eq!(composed.scale, 0.25);
    }
}
