use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Lowest elevation the encoding can represent, in meters.
pub const ELEV_MIN: f64 = -11_000.0;
/// Highest physically plausible elevation. Anything decoded above it is no-data.
pub const ELEV_MAX: f64 = 9_000.0;
/// Offset subtracted from the raw 16-bit channel value.
pub const DECODE_OFFSET: f64 = 11_000.0;
/// Zoom levels strictly above this one carry centimeter precision.
pub const PRECISION_ZOOM_THRESHOLD: u8 = 12;
pub const HIGH_PRECISION_SCALE: f64 = 0.01;
/// Total segments per tile; 16 means a 4x4 grid.
pub const DEFAULT_SEGMENT_COUNT: u32 = 16;

/// Decode factor for a given zoom level. A property of the encoding, not of the terrain.
pub fn scale_for_zoom(zoom: u8) -> f64 {
    if zoom > PRECISION_ZOOM_THRESHOLD {
        HIGH_PRECISION_SCALE
    } else {
        1.0
    }
}

/// Decode the two elevation-bearing channels into meters.
///
/// `a` is the low byte (red), `b` the high byte (green). Values above
/// [`ELEV_MAX`] collapse to `0.0`, the no-data sentinel.
pub fn decode(a: u8, b: u8, zoom: u8) -> f64 {
    let raw = a as f64 + b as f64 * 256.0;
    let meters = (raw - DECODE_OFFSET) * scale_for_zoom(zoom);
    if meters > ELEV_MAX { 0.0 } else { meters }
}

/// Inverse of [`decode`], rounding to the nearest representable step.
pub fn encode(meters: f64, zoom: u8) -> (u8, u8) {
    let raw = (meters / scale_for_zoom(zoom) + DECODE_OFFSET)
        .round()
        .clamp(0.0, u16::MAX as f64) as u16;
    ((raw & 0xff) as u8, (raw >> 8) as u8)
}

/// Codec settings shared by the stats engine and the renderer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElevationEncoding {
    segment_count: u32,
}

impl Default for ElevationEncoding {
    fn default() -> Self {
        Self {
            segment_count: DEFAULT_SEGMENT_COUNT,
        }
    }
}

impl ElevationEncoding {
    pub fn decode(&self, a: u8, b: u8, zoom: u8) -> f64 {
        decode(a, b, zoom)
    }

    pub fn segment_count(&self) -> u32 {
        self.segment_count
    }

    pub fn segments_per_axis(&self) -> u32 {
        self.segment_count.isqrt()
    }

    /// Configure the segment grid for tiles that have not been statted yet.
    ///
    /// `count` is the total number of segments and must be a non-zero perfect square.
    pub fn set_segment_grid_size(&mut self, count: u32) -> Result<(), ConfigError> {
        let side = count.isqrt();
        if count == 0 || side * side != count {
            return Err(ConfigError::SegmentCount(count));
        }
        self.segment_count = count;
        Ok(())
    }
}
