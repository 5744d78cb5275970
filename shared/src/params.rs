use serde::{Deserialize, Serialize};

use crate::view::{clamp_length, rotate_cw};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ColorScale {
    pub min: f64,
    pub max: f64,
    /// Follow the visible min/max instead of the fixed bounds.
    pub auto: bool,
}

impl Default for ColorScale {
    fn default() -> Self {
        Self {
            min: -100.0,
            max: 3_000.0,
            auto: true,
        }
    }
}

/// Everything the renderer reads from configuration, passed in by value each frame.
///
/// Changing any field must be paired with a [`TileSourceState::bump`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderParameters {
    pub light_azimuth_deg: f64,
    pub light_zenith_deg: f64,
    pub ambient: f64,
    pub color_scale: ColorScale,
    /// 90° looks straight down.
    pub oblique_inclination_deg: f64,
    /// Upper bound on the live shear, in screen px per meter of elevation.
    pub max_shear_magnitude: f64,
    pub mesh_resolution: u32,
    pub overlay_enabled: bool,
    pub overlay_opacity: f64,
    pub vertical_exaggeration: f64,
}

impl Default for RenderParameters {
    fn default() -> Self {
        Self {
            light_azimuth_deg: 315.0,
            light_zenith_deg: 45.0,
            ambient: 0.25,
            color_scale: ColorScale::default(),
            oblique_inclination_deg: 90.0,
            max_shear_magnitude: 2.0,
            mesh_resolution: 64,
            overlay_enabled: false,
            overlay_opacity: 0.6,
            vertical_exaggeration: 1.0,
        }
    }
}

impl RenderParameters {
    /// Unit vector towards the light in screen orientation (x right, y up, z out of the screen).
    ///
    /// The azimuth turns with the view so the light stays fixed to the ground.
    pub fn light_direction(&self, rotation: f64) -> [f32; 3] {
        let azimuth = self.light_azimuth_deg.to_radians() + rotation;
        let zenith = self.light_zenith_deg.clamp(0.0, 90.0).to_radians();
        [
            (zenith.sin() * azimuth.sin()) as f32,
            (zenith.sin() * azimuth.cos()) as f32,
            zenith.cos() as f32,
        ]
    }

    /// Screen px per meter of elevation that fakes an oblique view.
    ///
    /// Terrain leans towards the top of the screen whatever the rotation.
    pub fn oblique_shear(&self, resolution: f64) -> [f64; 2] {
        let inclination = self.oblique_inclination_deg.clamp(1.0, 90.0);
        if (90.0 - inclination).abs() < 1e-9 || resolution <= 0.0 {
            return [0.0, 0.0];
        }
        let cot = 1.0 / inclination.to_radians().tan();
        [0.0, -cot / resolution]
    }

    /// Shear to draw this frame as map-frame meters of offset per meter of elevation (y north).
    ///
    /// `live` is the interaction offset in screen px per meter, when a drag is active.
    pub fn effective_shear(&self, live: Option<[f64; 2]>, rotation: f64, resolution: f64) -> [f64; 2] {
        let screen = match live {
            Some(offset) => clamp_length(offset, self.max_shear_magnitude),
            None => self.oblique_shear(resolution),
        };
        let map = rotate_cw([screen[0], -screen[1]], -rotation);
        [map[0] * resolution, map[1] * resolution]
    }

    pub fn mesh_resolution(&self) -> u32 {
        self.mesh_resolution.clamp(2, 256)
    }
}

/// Single change counter shared by tiles and configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileSourceState {
    revision: u64,
}

impl TileSourceState {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Marks the source as changed so the next frame redraws.
    pub fn bump(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn light_turns_with_view() {
        let params = RenderParameters {
            light_azimuth_deg: 0.0,
            light_zenith_deg: 90.0,
            ..RenderParameters::default()
        };
        let north = params.light_direction(0.0);
        assert!((north[1] - 1.0).abs() < 1e-6);
        let turned = params.light_direction(std::f64::consts::FRAC_PI_2);
        assert!((turned[0] - 1.0).abs() < 1e-6);
        assert!(turned[1].abs() < 1e-6);
    }

    #[test]
    fn light_is_unit_length() {
        let dir = RenderParameters::default().light_direction(0.3);
        let len = dir.iter().map(|c| c * c).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-6);
        assert!(dir[2] > 0.0);
    }

    #[test]
    fn vertical_view_has_no_oblique_shear() {
        let params = RenderParameters::default();
        assert_eq!(params.oblique_shear(10.0), [0.0, 0.0]);
        assert_eq!(params.effective_shear(None, 1.0, 10.0), [0.0, 0.0]);
    }

    #[test]
    fn oblique_shear_points_up_the_screen() {
        let params = RenderParameters {
            oblique_inclination_deg: 45.0,
            ..RenderParameters::default()
        };
        let shear = params.oblique_shear(2.0);
        assert!(shear[0].abs() < 1e-12);
        assert!((shear[1] + 0.5).abs() < 1e-9);
        // Unrotated, screen up is north: one meter of offset per meter of elevation.
        let map = params.effective_shear(None, 0.0, 2.0);
        assert!(map[0].abs() < 1e-9);
        assert!((map[1] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn live_shear_is_clamped() {
        let params = RenderParameters::default();
        let map = params.effective_shear(Some([30.0, 40.0]), 0.0, 1.0);
        let len = map[0].hypot(map[1]);
        assert!((len - params.max_shear_magnitude).abs() < 1e-9);
        assert!(map[1] < 0.0);
    }

    #[test]
    fn bump_advances_revision() {
        let mut state = TileSourceState::default();
        assert_eq!(state.bump(), 1);
        assert_eq!(state.bump(), 2);
        assert_eq!(state.revision(), 2);
    }

    #[test]
    fn old_settings_fill_in_defaults() {
        let params: RenderParameters =
            serde_json::from_str(r#"{"ambient":0.5}"#).expect("partial params");
        assert_eq!(params.ambient, 0.5);
        assert_eq!(params.mesh_resolution, 64);
    }
}
