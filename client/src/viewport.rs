use terrashear_shared::grid::{Extent, TileGrid};
use terrashear_shared::view::ViewState;

const ZOOM_SENSITIVITY: f64 = 0.001;

/// Camera over the tile grid: center in world meters, meters per CSS pixel,
/// clockwise rotation in radians.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub view: ViewState,
    min_resolution: f64,
    max_resolution: f64,
}

impl Viewport {
    pub fn new(grid: &TileGrid, view: ViewState) -> Self {
        let mut vp = Self {
            view,
            // Allow some overzoom past the deepest level.
            min_resolution: grid.resolution(grid.max_zoom) / 4.0,
            max_resolution: grid.resolution(0) * 2.0,
        };
        vp.view.resolution = vp.clamp_resolution(view.resolution);
        vp
    }

    fn clamp_resolution(&self, resolution: f64) -> f64 {
        if resolution.is_finite() {
            resolution.clamp(self.min_resolution, self.max_resolution)
        } else {
            self.max_resolution
        }
    }

    pub fn screen_to_world(&self, sx: f64, sy: f64) -> [f64; 2] {
        self.view.screen_to_world([sx, sy])
    }

    pub fn world_to_screen(&self, world: [f64; 2]) -> [f64; 2] {
        self.view.world_to_screen(world)
    }

    /// World bounding box of the rotated screen.
    pub fn extent(&self) -> Extent {
        self.view.extent()
    }

    pub fn set_size(&mut self, width: f64, height: f64) {
        self.view.size = [width.max(1.0), height.max(1.0)];
    }

    /// Zoom toward a focus point (screen coordinates), keeping the point under it fixed.
    pub fn zoom_at(&mut self, delta: f64, sx: f64, sy: f64) {
        let anchor = self.screen_to_world(sx, sy);
        let factor = (delta * ZOOM_SENSITIVITY).exp();
        self.view.resolution = self.clamp_resolution(self.view.resolution * factor);
        let moved = self.screen_to_world(sx, sy);
        self.view.center[0] += anchor[0] - moved[0];
        self.view.center[1] += anchor[1] - moved[1];
    }

    /// Pan by a screen-space delta: the map follows the pointer.
    pub fn pan_px(&mut self, dx: f64, dy: f64) {
        let shift = self.view.screen_delta_to_world([dx, dy]);
        self.view.center[0] -= shift[0];
        self.view.center[1] -= shift[1];
    }

    pub fn rotate_by(&mut self, angle: f64) {
        self.view.rotation = (self.view.rotation + angle).rem_euclid(std::f64::consts::TAU);
    }

    /// Integer zoom level whose tiles best match the current resolution.
    pub fn tile_zoom(&self, grid: &TileGrid) -> u8 {
        grid.zoom_for_resolution(self.view.resolution)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Viewport {
        let grid = TileGrid::default();
        Viewport::new(
            &grid,
            ViewState {
                center: [1_000.0, 2_000.0],
                resolution: grid.resolution(8),
                rotation: 0.4,
                size: [800.0, 600.0],
            },
        )
    }

    #[test]
    fn zoom_keeps_focus_point() {
        let mut vp = viewport();
        let before = vp.screen_to_world(120.0, 480.0);
        vp.zoom_at(-300.0, 120.0, 480.0);
        let after = vp.screen_to_world(120.0, 480.0);
        assert!((before[0] - after[0]).abs() < 1e-6);
        assert!((before[1] - after[1]).abs() < 1e-6);
        assert!(vp.view.resolution < viewport().view.resolution);
    }

    #[test]
    fn pan_moves_world_with_pointer() {
        let mut vp = viewport();
        let grabbed = vp.screen_to_world(300.0, 200.0);
        vp.pan_px(25.0, -40.0);
        let now = vp.world_to_screen(grabbed);
        assert!((now[0] - 325.0).abs() < 1e-6);
        assert!((now[1] - 160.0).abs() < 1e-6);
    }

    #[test]
    fn resolution_is_bounded() {
        let grid = TileGrid::default();
        let mut vp = viewport();
        vp.zoom_at(1e6, 0.0, 0.0);
        assert_eq!(vp.view.resolution, grid.resolution(0) * 2.0);
        assert_eq!(vp.tile_zoom(&grid), 0);
    }

    #[test]
    fn rotation_wraps() {
        let mut vp = viewport();
        vp.rotate_by(std::f64::consts::TAU);
        assert!((vp.view.rotation - 0.4).abs() < 1e-12);
    }
}
