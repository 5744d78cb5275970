use std::cell::{Cell, RefCell};
use std::rc::Rc;

use leptos::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{HtmlCanvasElement, KeyboardEvent, PointerEvent, WheelEvent};

use terrashear_shared::mosaic::visible_range;
use terrashear_shared::shear::strategy_for;
use terrashear_shared::store::DEFAULT_TILE_CAPACITY;
use terrashear_shared::{
    DragStart, ElevationEncoding, FrameInput, MosaicBackend, MosaicRenderer, ShearMode, ShearStrategy,
    TileGrid, TileLayer, TileRange, TileStore,
};

use crate::app::{Params, SessionSettings, Settings, ShearModeSetting, Status, StatusReadout};
use crate::gpu::GpuMosaic;
use crate::render_loop::FrameScheduler;
use crate::tiles::{TileLoader, TileSources};
use crate::viewport::Viewport;

const ROTATE_STEP: f64 = std::f64::consts::PI / 12.0;
/// A longer gap between frames (hidden tab, idle loop) restarts the physics clock.
const MAX_FRAME_GAP_MS: f64 = 250.0;
const NOMINAL_DT: f64 = 1.0 / 60.0;

type SharedShear = Rc<RefCell<Option<Box<dyn ShearStrategy>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DragKind {
    Idle,
    Shear,
    Pan,
}

fn build_shear(mode: ShearMode, settings: &Settings) -> Option<Box<dyn ShearStrategy>> {
    match strategy_for(mode, settings.shear, settings.static_shear) {
        Ok(strategy) => Some(strategy),
        Err(err) => {
            tracing::error!(%err, ?mode, "invalid shear settings, dragging will pan instead");
            None
        }
    }
}

fn build_store(grid: &TileGrid, settings: &Settings) -> TileStore {
    let mut store = TileStore::new(ElevationEncoding::default(), DEFAULT_TILE_CAPACITY, grid.tile_size);
    if let Err(err) = store.set_segment_grid_size(settings.segment_count) {
        tracing::warn!(%err, "keeping the default segment grid");
    }
    store
}

/// Everything the shear needs to know at pointer-down.
fn drag_start(grid: &TileGrid, store: &TileStore, renderer: &MosaicRenderer, vp: &Viewport, zoom: u8, pointer: [f64; 2]) -> DragStart {
    let world = vp.screen_to_world(pointer[0], pointer[1]);
    let elevation = renderer
        .resolver()
        .resolve_elevation_at(grid, store.terrain(), world, zoom)
        .unwrap_or(0.0);
    let mut local = store.local_min_max_at(grid, world, zoom);
    if !local.is_known()
        && let Some(frame) = renderer.memo()
    {
        local = store.visible_min_max(&frame.range);
    }
    DragStart {
        pointer,
        elevation,
        local,
        center: vp.view.center,
    }
}

fn local_pos(canvas_ref: NodeRef<leptos::html::Canvas>, client_x: f64, client_y: f64) -> [f64; 2] {
    canvas_ref
        .get_untracked()
        .map(|el| {
            let rect = el.get_bounding_client_rect();
            [client_x - rect.left(), client_y - rect.top()]
        })
        .unwrap_or([client_x, client_y])
}

#[component]
pub fn MapCanvas() -> impl IntoView {
    let viewport: RwSignal<Viewport> = expect_context();
    let Params(params) = expect_context();
    let ShearModeSetting(shear_mode) = expect_context();
    let StatusReadout(status) = expect_context();
    let SessionSettings(session) = expect_context();

    let canvas_ref = NodeRef::<leptos::html::Canvas>::new();
    let settings = session.get_value();
    let grid = TileGrid::default();

    let store = Rc::new(RefCell::new(build_store(&grid, &settings)));
    let renderer = Rc::new(RefCell::new(MosaicRenderer::new(
        settings.resolver,
        settings.max_render_retries,
    )));
    let shear: SharedShear = Rc::new(RefCell::new(None));

    // Bumped by every tile completion; the repaint effect below tracks it.
    let tile_epoch: RwSignal<u64> = RwSignal::new(0);
    let loader = TileLoader::new(
        store.clone(),
        TileSources {
            terrain: settings.terrain_url.clone(),
            overlay: settings.overlay_url.clone(),
        },
        move || tile_epoch.update(|n| *n = n.wrapping_add(1)),
    );

    // GPU backend (initialized async, None until ready)
    let gpu: Rc<RefCell<Option<GpuMosaic>>> = Rc::new(RefCell::new(None));
    let gpu_init_started = Rc::new(Cell::new(false));

    let drag = Rc::new(Cell::new(DragKind::Idle));
    let last_pointer = Rc::new(Cell::new([0.0f64; 2]));
    let hover: Rc<Cell<Option<[f64; 2]>>> = Rc::new(Cell::new(None));
    let last_zoom = Rc::new(Cell::new(viewport.get_untracked().tile_zoom(&grid)));
    let last_ts: Rc<Cell<Option<f64>>> = Rc::new(Cell::new(None));
    let requested: Rc<Cell<Option<(TileRange, bool)>>> = Rc::new(Cell::new(None));

    // Render function
    let scheduler = FrameScheduler::new({
        let store = store.clone();
        let renderer = renderer.clone();
        let shear = shear.clone();
        let gpu = gpu.clone();
        let hover = hover.clone();
        let last_zoom = last_zoom.clone();
        let last_ts = last_ts.clone();
        move |timestamp: f64| {
            let Some(canvas) = canvas_ref.get_untracked() else {
                return false;
            };
            let canvas: &HtmlCanvasElement = &canvas;
            let Some(parent) = canvas.parent_element() else {
                return false;
            };
            let css_w = f64::from(parent.client_width());
            let css_h = f64::from(parent.client_height());
            if css_w <= 0.0 || css_h <= 0.0 {
                return false;
            }
            let dpr = web_sys::window()
                .map(|w| w.device_pixel_ratio())
                .unwrap_or(1.0)
                .max(1.0);
            let (w, h) = ((css_w * dpr).round() as u32, (css_h * dpr).round() as u32);
            if canvas.width() != w || canvas.height() != h {
                canvas.set_width(w);
                canvas.set_height(h);
            }

            let dt = match last_ts.replace(Some(timestamp)) {
                Some(prev) if timestamp > prev && timestamp - prev < MAX_FRAME_GAP_MS => (timestamp - prev) / 1000.0,
                _ => NOMINAL_DT,
            };

            let mut vp = viewport.get_untracked();
            vp.set_size(css_w, css_h);
            let (shear_animating, live_shear) = match shear.borrow_mut().as_mut() {
                Some(strategy) => {
                    let animating = strategy.tick(dt, &mut vp.view);
                    (animating, strategy.state().live_offset())
                }
                None => (false, None),
            };
            if vp != viewport.get_untracked() {
                viewport.update_untracked(|v| *v = vp);
            }

            let mut gpu_slot = gpu.borrow_mut();
            let Some(backend) = gpu_slot.as_mut() else {
                last_ts.set(None);
                return false;
            };
            backend.resize(w, h);

            let p = params.get_untracked();
            let range = visible_range(&grid, &vp.view, backend.max_framebuffer_extent());
            last_zoom.set(range.zoom);
            // Only a new range (or overlay toggle) re-arms failed tiles.
            let wanted = (range, p.overlay_enabled);
            if requested.get() != Some(wanted) {
                requested.set(Some(wanted));
                loader.request(&range, p.overlay_enabled);
                let (terrain, overlay) = store.borrow_mut().prune(&range);
                for coord in terrain {
                    backend.evict(TileLayer::Terrain, coord);
                }
                for coord in overlay {
                    backend.evict(TileLayer::Overlay, coord);
                }
            }

            let store = store.borrow();
            let mut renderer = renderer.borrow_mut();
            let outcome = renderer.render_frame(
                &FrameInput {
                    grid: &grid,
                    view: &vp.view,
                    store: &store,
                    params: &p,
                    live_shear,
                },
                backend,
            );

            let elevation = hover.get().and_then(|[x, y]| {
                let world = vp.screen_to_world(x, y);
                renderer
                    .resolver()
                    .resolve_elevation_at(&grid, store.terrain(), world, range.zoom)
            });
            let visible = store.visible_min_max(&range);
            let next = Status {
                elevation,
                visible: visible.is_known().then_some((visible.min, visible.max)),
                frame: outcome.state,
                draw_calls: outcome.draw_calls,
                substitutes: outcome.substitutes,
                shearing: live_shear.is_some(),
            };
            if status.get_untracked() != next {
                status.set(next);
            }

            let keep_going = outcome.animate || shear_animating;
            if !keep_going {
                last_ts.set(None);
            }
            keep_going
        }
    });

    let scheduler = Rc::new(scheduler);

    // Initialize GPU backend asynchronously
    let sched_for_init = scheduler.clone();
    Effect::new({
        let gpu = gpu.clone();
        let renderer = renderer.clone();
        move || {
            if gpu_init_started.get() {
                return;
            }
            let Some(canvas_el) = canvas_ref.get() else {
                return;
            };
            gpu_init_started.set(true);

            let canvas: &HtmlCanvasElement = &canvas_el;
            let canvas: HtmlCanvasElement = canvas.clone();
            let gpu = gpu.clone();
            let renderer = renderer.clone();
            let sched = sched_for_init.clone();

            wasm_bindgen_futures::spawn_local(async move {
                match GpuMosaic::init(canvas).await {
                    Ok(backend) => {
                        *gpu.borrow_mut() = Some(backend);
                        renderer.borrow_mut().reset_backend();
                        sched.mark_dirty();
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "wgpu init failed, terrain will not render");
                    }
                }
            });
        }
    });

    // Shear strategy follows the mode setting; switching drops any shear in flight.
    let sched_mode = scheduler.clone();
    Effect::new({
        let shear = shear.clone();
        move || {
            let mode = shear_mode.get();
            *shear.borrow_mut() = session.with_value(|s| build_shear(mode, s));
            sched_mode.mark_dirty();
        }
    });

    // Styling changes count as a data change for the frame memo.
    let sched_params = scheduler.clone();
    Effect::new({
        let store = store.clone();
        move || {
            params.track();
            store.borrow_mut().redraw();
            sched_params.mark_dirty();
        }
    });

    // Viewport/tile changes need a repaint.
    let sched_vp = scheduler.clone();
    Effect::new(move || {
        viewport.track();
        tile_epoch.track();
        sched_vp.mark_dirty();
    });

    // --- Input handlers ---

    let cancel_shear = {
        let shear = shear.clone();
        move || {
            if let Some(strategy) = shear.borrow_mut().as_mut() {
                strategy.cancel();
            }
        }
    };

    let on_wheel = {
        let cancel_shear = cancel_shear.clone();
        let drag = drag.clone();
        move |e: WheelEvent| {
            e.prevent_default();
            cancel_shear();
            if drag.get() == DragKind::Shear {
                drag.set(DragKind::Idle);
            }
            let [x, y] = local_pos(canvas_ref, f64::from(e.client_x()), f64::from(e.client_y()));
            viewport.update(|vp| vp.zoom_at(e.delta_y(), x, y));
        }
    };

    let on_pointer_down = {
        let drag = drag.clone();
        let last_pointer = last_pointer.clone();
        let shear = shear.clone();
        let store = store.clone();
        let renderer = renderer.clone();
        let last_zoom = last_zoom.clone();
        let sched = scheduler.clone();
        let cancel_shear = cancel_shear.clone();
        move |e: PointerEvent| {
            let pointer = local_pos(canvas_ref, f64::from(e.client_x()), f64::from(e.client_y()));
            last_pointer.set(pointer);

            if let Some(target) = e.target()
                && let Ok(el) = target.dyn_into::<web_sys::HtmlElement>()
            {
                el.set_pointer_capture(e.pointer_id()).ok();
                el.style().set_property("cursor", "grabbing").ok();
            }

            let pan = e.button() != 0 || e.shift_key() || shear.borrow().is_none();
            if pan {
                cancel_shear();
                drag.set(DragKind::Pan);
                return;
            }

            let vp = viewport.get_untracked();
            let start = drag_start(&grid, &store.borrow(), &renderer.borrow(), &vp, last_zoom.get(), pointer);
            if let Some(strategy) = shear.borrow_mut().as_mut() {
                strategy.begin(start);
            }
            drag.set(DragKind::Shear);
            sched.mark_dirty();
        }
    };

    let on_pointer_move = {
        let drag = drag.clone();
        let last_pointer = last_pointer.clone();
        let hover = hover.clone();
        let shear = shear.clone();
        let sched = scheduler.clone();
        move |e: PointerEvent| {
            let pointer = local_pos(canvas_ref, f64::from(e.client_x()), f64::from(e.client_y()));
            hover.set(Some(pointer));
            match drag.get() {
                DragKind::Pan => {
                    let [lx, ly] = last_pointer.get();
                    last_pointer.set(pointer);
                    viewport.update(|vp| vp.pan_px(pointer[0] - lx, pointer[1] - ly));
                }
                DragKind::Shear => {
                    if let Some(strategy) = shear.borrow_mut().as_mut() {
                        strategy.drag_to(pointer);
                    }
                    sched.mark_dirty();
                }
                // Refresh the elevation readout.
                DragKind::Idle => sched.mark_dirty(),
            }
        }
    };

    let on_pointer_up = {
        let drag = drag.clone();
        let shear = shear.clone();
        let sched = scheduler.clone();
        move |e: PointerEvent| {
            if drag.replace(DragKind::Idle) == DragKind::Shear
                && let Some(strategy) = shear.borrow_mut().as_mut()
            {
                strategy.end();
            }
            if let Some(target) = e.target()
                && let Ok(el) = target.dyn_into::<web_sys::HtmlElement>()
            {
                el.style().set_property("cursor", "grab").ok();
            }
            sched.mark_dirty();
        }
    };

    let on_pointer_leave = {
        let hover = hover.clone();
        move |_: PointerEvent| hover.set(None)
    };

    let on_key_down = {
        let drag = drag.clone();
        move |e: KeyboardEvent| {
            let angle = match e.key().as_str() {
                "q" | "Q" => -ROTATE_STEP,
                "e" | "E" => ROTATE_STEP,
                _ => return,
            };
            cancel_shear();
            if drag.get() == DragKind::Shear {
                drag.set(DragKind::Idle);
            }
            viewport.update(|vp| vp.rotate_by(angle));
        }
    };

    let on_pointer_cancel = on_pointer_up.clone();

    view! {
        <div
            tabindex="0"
            style="position: relative; width: 100%; height: 100%; overflow: hidden; outline: none;"
            on:wheel=on_wheel
            on:pointerdown=on_pointer_down
            on:pointermove=on_pointer_move
            on:pointerup=on_pointer_up
            on:pointercancel=on_pointer_cancel
            on:pointerleave=on_pointer_leave
            on:keydown=on_key_down
        >
            <canvas
                node_ref=canvas_ref
                style="position: absolute; inset: 0; width: 100%; height: 100%; touch-action: none; cursor: grab;"
            />
        </div>
    }
}
