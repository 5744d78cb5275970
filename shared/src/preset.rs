use serde::{Deserialize, Serialize};

use crate::params::RenderParameters;
use crate::shear::ShearMode;

/// A named camera and styling snapshot. Storage is up to the application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPreset {
    pub name: String,
    pub center: [f64; 2],
    pub resolution: f64,
    pub rotation: f64,
    pub params: RenderParameters,
    pub shear_mode: ShearMode,
}

impl Default for ViewPreset {
    fn default() -> Self {
        Self {
            name: String::new(),
            center: [0.0, 0.0],
            resolution: 2_445.984_905_125,
            rotation: 0.0,
            params: RenderParameters::default(),
            shear_mode: ShearMode::default(),
        }
    }
}

impl ViewPreset {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stored_preset_loads() {
        let json = r#"{
            "name": "Alps, evening",
            "center": [1020000.0, 5900000.0],
            "resolution": 38.2,
            "rotation": 0.35,
            "params": { "light_azimuth_deg": 260.0, "light_zenith_deg": 70.0 },
            "shear_mode": "Static"
        }"#;
        let preset = ViewPreset::from_json(json).expect("valid preset");
        assert_eq!(preset.name, "Alps, evening");
        assert_eq!(preset.shear_mode, ShearMode::Static);
        assert_eq!(preset.params.light_azimuth_deg, 260.0);
        assert_eq!(preset.params.ambient, RenderParameters::default().ambient);

        let again = ViewPreset::from_json(&preset.to_json().expect("serializes")).expect("parses");
        assert_eq!(again, preset);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(ViewPreset::from_json("{\"resolution\": \"far\"}").is_err());
    }
}
