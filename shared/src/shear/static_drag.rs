use serde::{Deserialize, Serialize};

use super::{DragStart, ShearPhase, ShearState, ShearStrategy, require_friction, require_positive};
use crate::error::ConfigError;
use crate::view::{ViewState, clamp_length};

/// Frame length the friction factor is tuned for.
const REFERENCE_DT: f64 = 1.0 / 60.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticShearConfig {
    /// Floor for the elevation divisor, so flat lowlands do not explode.
    pub min_elevation: f64,
    /// Largest shear, in screen px per meter.
    pub max_offset: f64,
    pub release_duration_ms: f64,
    /// Fraction of the shear lost per reference frame during release.
    pub friction: f64,
}

impl Default for StaticShearConfig {
    fn default() -> Self {
        Self {
            min_elevation: 10.0,
            max_offset: 1.5,
            release_duration_ms: 600.0,
            friction: 0.1,
        }
    }
}

impl StaticShearConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("min_elevation", self.min_elevation)?;
        require_positive("max_offset", self.max_offset)?;
        require_positive("release_duration_ms", self.release_duration_ms)?;
        require_friction(self.friction)
    }
}

/// Shear proportional to the pointer delta, no velocity and no panning.
#[derive(Debug, Clone)]
pub struct StaticShear {
    config: StaticShearConfig,
    state: ShearState,
    released_ms: f64,
}

impl StaticShear {
    pub fn new(config: StaticShearConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ShearState::default(),
            released_ms: 0.0,
        })
    }

    pub fn config(&self) -> &StaticShearConfig {
        &self.config
    }

    fn reset(&mut self) {
        self.state.phase = ShearPhase::Idle;
        self.state.offset = [0.0, 0.0];
        self.released_ms = 0.0;
    }
}

impl ShearStrategy for StaticShear {
    fn begin(&mut self, start: DragStart) {
        self.state = ShearState::started(&start);
        self.released_ms = 0.0;
    }

    fn drag_to(&mut self, pointer: [f64; 2]) {
        let s = &mut self.state;
        if s.phase != ShearPhase::Dragging {
            return;
        }
        s.pointer = pointer;
        let divisor = s.start_elevation.max(self.config.min_elevation);
        let delta = [
            (pointer[0] - s.start_pointer[0]) / divisor,
            (pointer[1] - s.start_pointer[1]) / divisor,
        ];
        s.offset = clamp_length(delta, self.config.max_offset);
    }

    fn end(&mut self) {
        if self.state.phase == ShearPhase::Dragging {
            self.state.phase = ShearPhase::Releasing;
            self.released_ms = 0.0;
        }
    }

    fn cancel(&mut self) {
        self.reset();
    }

    fn tick(&mut self, dt: f64, _view: &mut ViewState) -> bool {
        match self.state.phase {
            ShearPhase::Idle => false,
            ShearPhase::Dragging => true,
            ShearPhase::Releasing => {
                self.released_ms += dt.max(0.0) * 1_000.0;
                if self.released_ms >= self.config.release_duration_ms {
                    self.reset();
                    return false;
                }
                let keep = (1.0 - self.config.friction).powf(dt.max(0.0) / REFERENCE_DT);
                let offset = &mut self.state.offset;
                *offset = [offset[0] * keep, offset[1] * keep];
                true
            }
        }
    }

    fn state(&self) -> &ShearState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MinMax;

    fn begin_at(shear: &mut StaticShear, elevation: f64) {
        shear.begin(DragStart {
            pointer: [100.0, 100.0],
            elevation,
            local: MinMax::new(0.0, 1_000.0),
            center: [0.0, 0.0],
        });
    }

    #[test]
    fn shear_scales_with_elevation() {
        let mut shear = StaticShear::new(StaticShearConfig::default()).expect("valid");
        begin_at(&mut shear, 400.0);
        shear.drag_to([140.0, 80.0]);
        assert_eq!(shear.state().offset, [0.1, -0.05]);
        assert_eq!(shear.state().live_offset(), Some([0.1, -0.05]));
    }

    #[test]
    fn low_elevation_is_floored_and_clamped() {
        let mut shear = StaticShear::new(StaticShearConfig::default()).expect("valid");
        begin_at(&mut shear, 0.0);
        shear.drag_to([400.0, 100.0]);
        assert_eq!(shear.state().offset, [1.5, 0.0]);
    }

    #[test]
    fn release_lasts_a_fixed_duration() {
        let mut shear = StaticShear::new(StaticShearConfig::default()).expect("valid");
        let mut view = ViewState::default();
        begin_at(&mut shear, 400.0);
        shear.drag_to([180.0, 100.0]);
        shear.end();

        let mut frames = 0;
        let mut last = shear.state().offset[0];
        while shear.tick(REFERENCE_DT, &mut view) {
            frames += 1;
            let now = shear.state().offset[0];
            assert!(now < last);
            last = now;
        }
        // 600 ms at 60 fps.
        assert!((35..=36).contains(&frames));
        assert_eq!(shear.state().phase, ShearPhase::Idle);
        assert_eq!(shear.state().offset, [0.0, 0.0]);
    }

    #[test]
    fn view_is_left_alone() {
        let mut shear = StaticShear::new(StaticShearConfig::default()).expect("valid");
        let mut view = ViewState::default();
        let before = view;
        begin_at(&mut shear, 400.0);
        shear.drag_to([300.0, 300.0]);
        assert!(shear.tick(REFERENCE_DT, &mut view));
        assert_eq!(view, before);
    }
}
