//! Pointer-driven terrain shearing.
//!
//! A drag distorts the terrain in proportion to elevation and springs back on release.
//! Two strategies exist with their own physics constants: [`IntegratedShear`], a
//! spring-damper that also pans the view, and [`StaticShear`], a direct mapping with a
//! fixed-duration release.

mod integrated;
mod static_drag;

use serde::{Deserialize, Serialize};

pub use integrated::{IntegratedShear, ShearConfig};
pub use static_drag::{StaticShear, StaticShearConfig};

use crate::error::ConfigError;
use crate::stats::MinMax;
use crate::view::ViewState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShearMode {
    #[default]
    Integrated,
    Static,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShearPhase {
    #[default]
    Idle,
    Dragging,
    Releasing,
}

/// Which side of the critical elevation the drag started on. Fixed for the whole drag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShearBranch {
    /// A high point: the terrain slides out from under it.
    High,
    /// A low point: it tracks the cursor.
    Low,
}

/// Everything known when the pointer goes down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragStart {
    /// Screen px.
    pub pointer: [f64; 2],
    /// Elevation under the pointer, or `0.0` when its tile is not loaded.
    pub elevation: f64,
    /// Min/max of the terrain around the pointer.
    pub local: MinMax,
    pub center: [f64; 2],
}

/// Critical and maximum elevation for a drag starting at `start`.
///
/// Unknown extremes give a critical elevation of zero and a maximum equal to `start`.
pub fn drag_extremes(local: MinMax, start: f64) -> (f64, f64) {
    if local.is_known() {
        ((local.max - local.min) / 2.0, local.max)
    } else {
        (0.0, start)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ShearState {
    pub phase: ShearPhase,
    pub branch: Option<ShearBranch>,
    /// Shear in screen px per meter of elevation.
    pub offset: [f64; 2],
    /// Screen px per tick.
    pub velocity: [f64; 2],
    pub start_pointer: [f64; 2],
    pub pointer: [f64; 2],
    pub start_elevation: f64,
    pub critical_elevation: f64,
    pub max_elevation: f64,
    pub spring_length: f64,
    pub start_center: [f64; 2],
    /// Integrated view center, world coordinates.
    pub center: [f64; 2],
}

impl ShearState {
    pub(crate) fn started(start: &DragStart) -> Self {
        let (critical, max) = drag_extremes(start.local, start.elevation);
        let branch = if start.elevation > critical {
            ShearBranch::High
        } else {
            ShearBranch::Low
        };
        tracing::debug!(
            elevation = start.elevation,
            critical,
            max,
            ?branch,
            "shear drag started"
        );
        Self {
            phase: ShearPhase::Dragging,
            branch: Some(branch),
            start_pointer: start.pointer,
            pointer: start.pointer,
            start_elevation: start.elevation,
            critical_elevation: critical,
            max_elevation: max,
            start_center: start.center,
            center: start.center,
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase != ShearPhase::Idle
    }

    /// Shear the renderer should draw, if any.
    pub fn live_offset(&self) -> Option<[f64; 2]> {
        self.is_active().then_some(self.offset)
    }
}

/// One way of turning a drag into a shear. Only one writer touches the state per frame.
pub trait ShearStrategy {
    /// Starts a drag, cancelling any release still running.
    fn begin(&mut self, start: DragStart);
    /// Records the pointer. Physics runs on the next [`tick`](Self::tick).
    fn drag_to(&mut self, pointer: [f64; 2]);
    fn end(&mut self);
    /// Another camera interaction took over: drop the shear immediately.
    fn cancel(&mut self);
    /// Advances by `dt` seconds, possibly moving `view.center`. Returns whether to keep animating.
    fn tick(&mut self, dt: f64, view: &mut ViewState) -> bool;
    fn state(&self) -> &ShearState;
}

pub fn strategy_for(
    mode: ShearMode,
    integrated: ShearConfig,
    fixed: StaticShearConfig,
) -> Result<Box<dyn ShearStrategy>, ConfigError> {
    Ok(match mode {
        ShearMode::Integrated => Box::new(IntegratedShear::new(integrated)?),
        ShearMode::Static => Box::new(StaticShear::new(fixed)?),
    })
}

pub(crate) fn require_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::ShearParameter { name, value })
    }
}

pub(crate) fn require_friction(value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Friction(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extremes_fall_back_when_unknown() {
        assert_eq!(drag_extremes(MinMax::UNKNOWN, 120.0), (0.0, 120.0));
        assert_eq!(drag_extremes(MinMax::new(0.0, 600.0), 500.0), (300.0, 600.0));
    }

    #[test]
    fn both_modes_build_with_defaults() {
        for mode in [ShearMode::Integrated, ShearMode::Static] {
            let strategy = strategy_for(mode, ShearConfig::default(), StaticShearConfig::default())
                .expect("defaults are valid");
            assert_eq!(strategy.state().phase, ShearPhase::Idle);
            assert_eq!(strategy.state().live_offset(), None);
        }
    }

    #[test]
    fn invalid_physics_is_rejected() {
        let config = ShearConfig {
            friction: 1.5,
            ..ShearConfig::default()
        };
        assert!(matches!(
            strategy_for(ShearMode::Integrated, config, StaticShearConfig::default()),
            Err(ConfigError::Friction(_))
        ));
    }
}
