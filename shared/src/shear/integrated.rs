use serde::{Deserialize, Serialize};

use super::{
    DragStart, ShearBranch, ShearPhase, ShearState, ShearStrategy, require_friction,
    require_positive,
};
use crate::error::ConfigError;
use crate::view::{ViewState, clamp_length, length};

/// Scales the spring coefficient into a human-friendly range.
const SPRING_SCALE: f64 = 50.0;
/// Longest tick the integrator accepts, in seconds.
const MAX_DT: f64 = 0.1;

/// Largest per-tick spring gain for which the damped integrator has real
/// eigenvalues, `(2 - f - g)² >= 4(1 - f)`. Above it the shear rings through zero.
fn critical_gain(friction: f64) -> f64 {
    let r = 1.0 - (1.0 - friction).sqrt();
    r * r
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShearConfig {
    pub spring_coefficient: f64,
    /// Fraction of velocity lost per tick.
    pub friction: f64,
    /// Velocity components and spring lengths below this are treated as zero.
    pub threshold: f64,
    /// Drag distance (px) beyond which the view starts to follow.
    pub max_outer_shearing_px: f64,
    /// Drag distance (px) beyond which the shear stops growing.
    pub max_inner_shearing_px: f64,
    /// Release ticks after which the shear is dropped regardless of motion.
    pub max_release_ticks: u32,
}

impl Default for ShearConfig {
    fn default() -> Self {
        Self {
            spring_coefficient: 0.04,
            friction: 0.4,
            threshold: 0.01,
            max_outer_shearing_px: 120.0,
            max_inner_shearing_px: 80.0,
            max_release_ticks: 600,
        }
    }
}

impl ShearConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_positive("spring_coefficient", self.spring_coefficient)?;
        require_friction(self.friction)?;
        require_positive("threshold", self.threshold)?;
        require_positive("max_outer_shearing_px", self.max_outer_shearing_px)?;
        require_positive("max_inner_shearing_px", self.max_inner_shearing_px)?;
        require_positive("max_release_ticks", f64::from(self.max_release_ticks))
    }
}

/// Spring-damper shear. The spring pulls the view center so the dragged point
/// follows the pointer; the stretch left over shears the terrain.
#[derive(Debug, Clone)]
pub struct IntegratedShear {
    config: ShearConfig,
    state: ShearState,
    release_ticks: u32,
}

impl IntegratedShear {
    pub fn new(config: ShearConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            state: ShearState::default(),
            release_ticks: 0,
        })
    }

    pub fn config(&self) -> &ShearConfig {
        &self.config
    }

    /// Drag distance in screen px, measured through the integrated center.
    fn distance(&self, view: &ViewState) -> [f64; 2] {
        let s = &self.state;
        let panned = view.world_delta_to_screen([
            s.center[0] - s.start_center[0],
            s.center[1] - s.start_center[1],
        ]);
        [
            s.pointer[0] - s.start_pointer[0] + panned[0],
            s.pointer[1] - s.start_pointer[1] + panned[1],
        ]
    }

    fn apply_shear(&mut self, distance: [f64; 2], view: &mut ViewState) {
        let shear = clamp_length(distance, self.config.max_inner_shearing_px);
        let s = &mut self.state;
        match s.branch {
            Some(ShearBranch::High) => {
                let start = s.start_elevation;
                s.offset = [shear[0] / start, shear[1] / start];
                view.center = s.center;
            }
            _ => {
                let headroom = s.max_elevation - s.start_elevation;
                s.offset = if headroom > f64::EPSILON {
                    [-shear[0] / headroom, -shear[1] / headroom]
                } else {
                    [0.0, 0.0]
                };
                let follow = view.screen_delta_to_world(distance);
                view.center = [s.center[0] - follow[0], s.center[1] - follow[1]];
            }
        }
    }

    fn finish(&mut self, view: &mut ViewState) {
        view.center = self.state.center;
        self.state.phase = ShearPhase::Idle;
        self.state.offset = [0.0, 0.0];
        self.state.velocity = [0.0, 0.0];
        self.state.spring_length = 0.0;
        self.release_ticks = 0;
    }
}

impl ShearStrategy for IntegratedShear {
    fn begin(&mut self, start: DragStart) {
        if self.state.phase == ShearPhase::Releasing {
            tracing::debug!("cancelling release for a new drag");
        }
        self.state = ShearState::started(&start);
        self.release_ticks = 0;
    }

    fn drag_to(&mut self, pointer: [f64; 2]) {
        if self.state.phase == ShearPhase::Dragging {
            self.state.pointer = pointer;
        }
    }

    fn end(&mut self) {
        if self.state.phase == ShearPhase::Dragging {
            self.state.phase = ShearPhase::Releasing;
            self.release_ticks = 0;
        }
    }

    fn cancel(&mut self) {
        self.state.phase = ShearPhase::Idle;
        self.state.offset = [0.0, 0.0];
        self.state.velocity = [0.0, 0.0];
        self.state.spring_length = 0.0;
        self.release_ticks = 0;
    }

    fn tick(&mut self, dt: f64, view: &mut ViewState) -> bool {
        let phase = self.state.phase;
        if phase == ShearPhase::Idle {
            return false;
        }
        let dt = dt.clamp(0.0, MAX_DT);
        let cfg = self.config;
        let gain = (cfg.spring_coefficient * SPRING_SCALE * dt).min(critical_gain(cfg.friction));

        let distance = self.distance(view);
        let reach = length(distance);
        let s = &mut self.state;
        s.spring_length = match phase {
            ShearPhase::Dragging => reach.min(cfg.max_outer_shearing_px),
            _ => {
                let decayed = s.spring_length * (1.0 - cfg.friction);
                if decayed < cfg.threshold { 0.0 } else { decayed }
            }
        };

        // Only the part of the drag beyond the spring's rest length pulls.
        let stretch = if reach > 0.0 {
            let excess = (reach - s.spring_length) / reach;
            [distance[0] * excess, distance[1] * excess]
        } else {
            [0.0, 0.0]
        };
        for i in 0..2 {
            let v = s.velocity[i] * (1.0 - cfg.friction) + stretch[i] * gain;
            s.velocity[i] = if v.abs() < cfg.threshold { 0.0 } else { v };
        }
        let pan = view.screen_delta_to_world(s.velocity);
        s.center = [s.center[0] - pan[0], s.center[1] - pan[1]];

        let distance = self.distance(view);
        self.apply_shear(distance, view);

        if phase == ShearPhase::Dragging {
            return true;
        }
        self.release_ticks += 1;
        let s = &self.state;
        let at_rest = s.velocity.iter().all(|v| v.abs() <= cfg.threshold)
            && s.spring_length <= cfg.threshold;
        if at_rest || self.release_ticks >= cfg.max_release_ticks {
            if !at_rest {
                tracing::debug!(ticks = self.release_ticks, "release did not settle, stopping");
            }
            self.finish(view);
            return false;
        }
        true
    }

    fn state(&self) -> &ShearState {
        &self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::MinMax;

    const DT: f64 = 1.0 / 60.0;

    fn view() -> ViewState {
        ViewState {
            center: [5_000.0, -2_000.0],
            resolution: 10.0,
            rotation: 0.0,
            size: [800.0, 600.0],
        }
    }

    fn start(view: &ViewState, elevation: f64, local: MinMax) -> DragStart {
        DragStart {
            pointer: [400.0, 300.0],
            elevation,
            local,
            center: view.center,
        }
    }

    fn shear() -> IntegratedShear {
        IntegratedShear::new(ShearConfig::default()).expect("default config")
    }

    #[test]
    fn high_point_pans_to_integrated_center() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        assert_eq!(shear.state().critical_elevation, 300.0);
        assert_eq!(shear.state().branch, Some(ShearBranch::High));

        shear.drag_to([440.0, 300.0]);
        assert!(shear.tick(DT, &mut view));
        assert_eq!(shear.state().offset, [40.0 / 500.0, 0.0]);
        assert_eq!(view.center, shear.state().start_center);

        shear.drag_to([600.0, 300.0]);
        assert!(shear.tick(DT, &mut view));
        let state = *shear.state();
        assert_eq!(view.center, state.center);
        assert!(state.center[0] < state.start_center[0]);
        // Past the inner limit the shear saturates at 80 px over the start elevation.
        assert!((state.offset[0] - 80.0 / 500.0).abs() < 1e-12);
        assert_eq!(state.offset[1], 0.0);
    }

    #[test]
    fn low_point_tracks_the_cursor() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 100.0, MinMax::new(0.0, 600.0)));
        assert_eq!(shear.state().branch, Some(ShearBranch::Low));

        shear.drag_to([400.0, 350.0]);
        shear.tick(DT, &mut view);
        let state = *shear.state();
        assert_eq!(state.offset, [0.0, -50.0 / 500.0]);
        // 50 px down the screen is 500 m south; the view moves north by as much.
        assert!((view.center[1] - (state.center[1] + 500.0)).abs() < 1e-9);
    }

    #[test]
    fn branch_is_fixed_at_drag_start() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        for step in 0..30 {
            shear.drag_to([400.0 + step as f64 * 10.0, 300.0 - step as f64 * 5.0]);
            shear.tick(DT, &mut view);
            assert_eq!(shear.state().branch, Some(ShearBranch::High));
        }
    }

    #[test]
    fn release_decays_to_rest_in_bounded_ticks() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        shear.drag_to([700.0, 150.0]);
        for _ in 0..20 {
            shear.tick(DT, &mut view);
        }
        shear.end();
        assert_eq!(shear.state().phase, ShearPhase::Releasing);

        let mut ticks = 0;
        while shear.tick(DT, &mut view) {
            ticks += 1;
            assert!(ticks < 400, "release did not settle");
        }
        let state = shear.state();
        assert_eq!(state.phase, ShearPhase::Idle);
        assert_eq!(state.offset, [0.0, 0.0]);
        assert_eq!(state.velocity, [0.0, 0.0]);
        assert_eq!(state.live_offset(), None);
    }

    #[test]
    fn release_shrinks_without_changing_sign() {
        for pointer in [[700.0, 300.0], [700.0, 150.0], [430.0, 300.0], [200.0, 390.0]] {
            for dt in [DT, MAX_DT] {
                let mut view = view();
                let mut shear = shear();
                shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
                shear.drag_to(pointer);
                for _ in 0..20 {
                    shear.tick(dt, &mut view);
                }
                // Still leaning the way the pointer went after holding it.
                let held = shear.state().offset;
                assert!(held[0] * (pointer[0] - 400.0) >= 0.0, "{pointer:?} held {held:?}");
                assert!(held[1] * (pointer[1] - 300.0) >= 0.0, "{pointer:?} held {held:?}");

                shear.end();
                let mut previous = held;
                while shear.tick(dt, &mut view) {
                    let offset = shear.state().offset;
                    assert!(length(offset) <= length(previous) + 1e-12, "{pointer:?} grew to {offset:?}");
                    assert!(offset[0] * previous[0] >= 0.0 && offset[1] * previous[1] >= 0.0);
                    previous = offset;
                }
                assert_eq!(shear.state().offset, [0.0, 0.0]);
            }
        }
    }

    #[test]
    fn gain_is_capped_at_critical_damping() {
        assert!((critical_gain(0.4) - 0.050_807).abs() < 1e-6);
        let cfg = ShearConfig::default();
        assert!(cfg.spring_coefficient * SPRING_SCALE * DT < critical_gain(cfg.friction));
    }

    #[test]
    fn release_is_cut_off_after_max_ticks() {
        let mut view = view();
        let mut shear = IntegratedShear::new(ShearConfig {
            max_release_ticks: 5,
            ..ShearConfig::default()
        })
        .expect("valid config");
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        shear.drag_to([700.0, 300.0]);
        shear.tick(DT, &mut view);
        shear.end();

        let ticks = std::iter::from_fn(|| shear.tick(DT, &mut view).then_some(())).count();
        assert_eq!(ticks, 4);
        assert_eq!(shear.state().phase, ShearPhase::Idle);
    }

    #[test]
    fn other_camera_interaction_drops_shear() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        shear.drag_to([450.0, 320.0]);
        shear.tick(DT, &mut view);
        assert_ne!(shear.state().offset, [0.0, 0.0]);

        shear.cancel();
        assert_eq!(shear.state().offset, [0.0, 0.0]);
        assert!(!shear.tick(DT, &mut view));
    }

    #[test]
    fn new_drag_replaces_running_release() {
        let mut view = view();
        let mut shear = shear();
        shear.begin(start(&view, 500.0, MinMax::new(0.0, 600.0)));
        shear.drag_to([600.0, 300.0]);
        shear.tick(DT, &mut view);
        shear.end();
        shear.tick(DT, &mut view);

        shear.begin(start(&view, 50.0, MinMax::new(0.0, 600.0)));
        let state = shear.state();
        assert_eq!(state.phase, ShearPhase::Dragging);
        assert_eq!(state.velocity, [0.0, 0.0]);
        assert_eq!(state.branch, Some(ShearBranch::Low));
    }

    #[test]
    fn flat_summit_has_no_low_branch_shear() {
        let mut view = view();
        let mut shear = shear();
        // No loaded stats: critical 0, max = start, so a zero start is low with no headroom.
        shear.begin(start(&view, 0.0, MinMax::UNKNOWN));
        shear.drag_to([420.0, 300.0]);
        shear.tick(DT, &mut view);
        assert_eq!(shear.state().offset, [0.0, 0.0]);
    }
}
