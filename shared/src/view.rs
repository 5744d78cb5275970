use serde::{Deserialize, Serialize};

use crate::grid::Extent;

/// Rotate a 2D vector clockwise by `angle` radians (compass convention).
pub fn rotate_cw(v: [f64; 2], angle: f64) -> [f64; 2] {
    let (sin, cos) = angle.sin_cos();
    [v[0] * cos + v[1] * sin, -v[0] * sin + v[1] * cos]
}

pub fn length(v: [f64; 2]) -> f64 {
    v[0].hypot(v[1])
}

/// Scale `v` down so its length does not exceed `max`.
pub fn clamp_length(v: [f64; 2], max: f64) -> [f64; 2] {
    let len = length(v);
    if len > max && len > 0.0 {
        [v[0] * max / len, v[1] * max / len]
    } else {
        v
    }
}

/// Camera state the host view hands to the core each frame.
///
/// World coordinates have y pointing north; screen coordinates have y pointing down.
/// A positive `rotation` turns the map clockwise on screen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ViewState {
    pub center: [f64; 2],
    /// Meters per screen pixel.
    pub resolution: f64,
    pub rotation: f64,
    pub size: [f64; 2],
}

impl Default for ViewState {
    fn default() -> Self {
        Self {
            center: [0.0, 0.0],
            resolution: 2_445.984_905_125,
            rotation: 0.0,
            size: [1200.0, 800.0],
        }
    }
}

impl ViewState {
    /// World offset of a screen-space pixel delta.
    pub fn screen_delta_to_world(&self, delta: [f64; 2]) -> [f64; 2] {
        let north_up = [delta[0] * self.resolution, -delta[1] * self.resolution];
        rotate_cw(north_up, -self.rotation)
    }

    /// Screen-space pixel delta of a world offset.
    pub fn world_delta_to_screen(&self, delta: [f64; 2]) -> [f64; 2] {
        let north_up = rotate_cw(delta, self.rotation);
        [north_up[0] / self.resolution, -north_up[1] / self.resolution]
    }

    pub fn screen_to_world(&self, px: [f64; 2]) -> [f64; 2] {
        let d = self.screen_delta_to_world([px[0] - self.size[0] / 2.0, px[1] - self.size[1] / 2.0]);
        [self.center[0] + d[0], self.center[1] + d[1]]
    }

    pub fn world_to_screen(&self, coord: [f64; 2]) -> [f64; 2] {
        let d = self.world_delta_to_screen([coord[0] - self.center[0], coord[1] - self.center[1]]);
        [d[0] + self.size[0] / 2.0, d[1] + self.size[1] / 2.0]
    }

    /// World bounding box of the (possibly rotated) screen.
    pub fn extent(&self) -> Extent {
        let [w, h] = self.size;
        let corners = [[0.0, 0.0], [w, 0.0], [0.0, h], [w, h]].map(|c| self.screen_to_world(c));
        Extent::bounding(&corners).unwrap_or(Extent {
            min_x: self.center[0],
            min_y: self.center[1],
            max_x: self.center[0],
            max_y: self.center[1],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: [f64; 2], b: [f64; 2]) -> bool {
        (a[0] - b[0]).abs() < 1e-6 && (a[1] - b[1]).abs() < 1e-6
    }

    #[test]
    fn screen_center_is_view_center() {
        let view = ViewState {
            center: [1_000.0, -500.0],
            resolution: 10.0,
            rotation: 0.7,
            size: [800.0, 600.0],
        };
        assert!(close(view.screen_to_world([400.0, 300.0]), view.center));
    }

    #[test]
    fn screen_down_is_south_without_rotation() {
        let view = ViewState {
            center: [0.0, 0.0],
            resolution: 2.0,
            rotation: 0.0,
            size: [100.0, 100.0],
        };
        assert!(close(view.screen_to_world([50.0, 60.0]), [0.0, -20.0]));
        assert!(close(view.screen_to_world([60.0, 50.0]), [20.0, 0.0]));
    }

    #[test]
    fn conversions_invert_each_other() {
        let view = ViewState {
            center: [12.0, 34.0],
            resolution: 3.5,
            rotation: -1.1,
            size: [640.0, 480.0],
        };
        let px = [17.0, 401.0];
        assert!(close(view.world_to_screen(view.screen_to_world(px)), px));
        let d = [3.0, -8.0];
        assert!(close(view.world_delta_to_screen(view.screen_delta_to_world(d)), d));
    }

    #[test]
    fn rotated_extent_grows() {
        let mut view = ViewState {
            center: [0.0, 0.0],
            resolution: 1.0,
            rotation: 0.0,
            size: [100.0, 100.0],
        };
        let flat = view.extent();
        view.rotation = std::f64::consts::FRAC_PI_4;
        let rotated = view.extent();
        assert!((flat.width() - 100.0).abs() < 1e-9);
        assert!((rotated.width() - 100.0 * 2f64.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn clamp_length_keeps_direction() {
        assert_eq!(clamp_length([3.0, 4.0], 2.5), [1.5, 2.0]);
        assert_eq!(clamp_length([0.3, 0.4], 2.5), [0.3, 0.4]);
    }
}
