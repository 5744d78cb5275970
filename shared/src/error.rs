use thiserror::Error;

/// Construction-time contract violations. These are not recoverable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("segment count {0} is not a non-zero perfect square")]
    SegmentCount(u32),
    #[error("shear parameter `{name}` must be finite and positive, got {value}")]
    ShearParameter { name: &'static str, value: f64 },
    #[error("friction force must lie in (0, 1), got {0}")]
    Friction(f64),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TileError {
    #[error("pixel buffer holds {actual} bytes, expected {expected} for {width}x{height} RGBA")]
    PixelBufferSize {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
    #[error("tile has zero width or height")]
    EmptyImage,
}
