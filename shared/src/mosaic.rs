use crate::elevation::scale_for_zoom;
use crate::grid::TileGrid;
use crate::mesh::TileMesh;
use crate::params::RenderParameters;
use crate::pyramid::{Substitute, TilePyramidResolver, UvWindow};
use crate::stats::MinMax;
use crate::store::TileStore;
use crate::tile::{Tile, TileCache, TileCoord, TileLayer, TileRange, TileState};
use crate::view::ViewState;

pub const DEFAULT_MAX_RENDER_RETRIES: u32 = 120;

// --- GPU data types ---

/// Per-frame shader parameters. 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub light: [f32; 4],       // x, y, z direction, ambient
    pub color_scale: [f32; 4], // min, max, vertical exaggeration, overlay opacity
    pub shear: [f32; 4],       // u, v framebuffer units per meter, view rotation, 0
}

/// Per-draw shader parameters. 48 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CellUniforms {
    pub cell: [f32; 4],    // offset u, offset v, scale (framebuffer space), decode scale
    pub base_uv: [f32; 4], // offset u, offset v, scale, meters per texel
    pub overlay_uv: [f32; 4], // offset u, offset v, scale, 1.0 when an overlay is bound
}

/// Maps screen pixels onto the framebuffer for the present pass. 32 bytes.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PresentUniforms {
    pub center: [f32; 4], // framebuffer uv under the screen center, half screen size
    pub axes: [f32; 4],   // uv step per screen px along x (u, v) and along y (u, v)
}

/// One textured mesh draw into the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellDraw {
    /// Cell of the visible range being filled.
    pub cell: TileCoord,
    /// Terrain texture sampled for this draw.
    pub base: TileCoord,
    pub overlay: Option<TileCoord>,
    pub uniforms: CellUniforms,
}

/// Where the framebuffer sits in the world, plus the view it is presented through.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FramePlacement {
    /// World coordinate of the framebuffer's top-left corner.
    pub origin: [f64; 2],
    /// World width (and height) covered by the framebuffer.
    pub world_size: f64,
    pub view: ViewState,
}

impl FramePlacement {
    pub fn uv_of(&self, world: [f64; 2]) -> [f64; 2] {
        [
            (world[0] - self.origin[0]) / self.world_size,
            (self.origin[1] - world[1]) / self.world_size,
        ]
    }

    pub fn uniforms(&self) -> PresentUniforms {
        let center = self.uv_of(self.view.center);
        let step = |d: [f64; 2]| {
            let w = self.view.screen_delta_to_world(d);
            [(w[0] / self.world_size) as f32, (-w[1] / self.world_size) as f32]
        };
        let ax = step([1.0, 0.0]);
        let ay = step([0.0, 1.0]);
        PresentUniforms {
            center: [
                center[0] as f32,
                center[1] as f32,
                (self.view.size[0] / 2.0) as f32,
                (self.view.size[1] / 2.0) as f32,
            ],
            axes: [ax[0], ax[1], ay[0], ay[1]],
        }
    }
}

/// What the renderer needs from the GPU side.
pub trait MosaicBackend {
    /// Largest square framebuffer the device supports.
    fn max_framebuffer_extent(&self) -> u32;
    fn is_resident(&self, layer: TileLayer, coord: TileCoord) -> bool;
    /// Uploads the tile's pixels as a texture. `false` when the tile has none.
    fn make_resident(&mut self, tile: &Tile) -> bool;
    fn evict(&mut self, layer: TileLayer, coord: TileCoord);
    /// Binds (resizing if needed) the framebuffer and clears colour and depth.
    fn begin_pass(&mut self, extent: u32);
    fn set_frame_uniforms(&mut self, uniforms: &FrameUniforms);
    fn upload_mesh(&mut self, mesh: &TileMesh);
    fn draw_cell(&mut self, draw: &CellDraw);
    fn end_pass(&mut self);
    /// Draws the framebuffer to the screen.
    fn present(&mut self, placement: &FramePlacement);
}

pub struct FrameInput<'a> {
    pub grid: &'a TileGrid,
    pub view: &'a ViewState,
    pub store: &'a TileStore,
    pub params: &'a RenderParameters,
    /// Interaction shear in screen px per meter, while a drag is active.
    pub live_shear: Option<[f64; 2]>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrameState {
    #[default]
    Cached,
    Rendering,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOutcome {
    pub state: FrameState,
    /// The host should schedule another frame.
    pub animate: bool,
    pub draw_calls: u32,
    pub substitutes: u32,
}

/// Memo of the last fully resolved framebuffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderedFrame {
    pub range: TileRange,
    pub extent: u32,
    pub revision: u64,
}

/// Smallest power of two holding `cells` tiles per axis, capped by the device.
pub fn framebuffer_extent(cells: u32, tile_size: u32, max_extent: u32) -> u32 {
    let wanted = cells.max(1).saturating_mul(tile_size.max(1));
    wanted.checked_next_power_of_two().unwrap_or(u32::MAX).min(max_extent.max(1))
}

/// Tile range to draw for `view`, coarsened until it fits the framebuffer limit.
pub fn visible_range(grid: &TileGrid, view: &ViewState, max_extent: u32) -> TileRange {
    let extent = view.extent();
    let mut zoom = grid.zoom_for_resolution(view.resolution);
    loop {
        let range = grid.range_for_extent(&extent, zoom);
        let cells = range.columns().max(range.rows());
        if zoom == 0 || cells.saturating_mul(grid.tile_size) <= max_extent {
            return range;
        }
        zoom -= 1;
    }
}

fn ensure_resident<B: MosaicBackend + ?Sized>(
    backend: &mut B,
    cache: &TileCache,
    coord: TileCoord,
) -> bool {
    match cache.get(&coord) {
        Some(tile) if tile.is_loaded() => {
            backend.is_resident(cache.layer(), coord) || backend.make_resident(tile)
        }
        _ => false,
    }
}

enum OverlayBinding {
    Off,
    Bound(TileCoord, UvWindow),
    /// The overlay failed; the cell stays empty.
    Failed,
}

/// Composites the visible tile pyramid into one framebuffer and skips the work when nothing changed.
pub struct MosaicRenderer {
    resolver: TilePyramidResolver,
    max_render_retries: u32,
    memo: Option<RenderedFrame>,
    last_uniforms: Option<FrameUniforms>,
    mesh_resolution: Option<u32>,
    state: FrameState,
    retries: u32,
}

impl Default for MosaicRenderer {
    fn default() -> Self {
        Self::new(TilePyramidResolver::default(), DEFAULT_MAX_RENDER_RETRIES)
    }
}

impl MosaicRenderer {
    pub fn new(resolver: TilePyramidResolver, max_render_retries: u32) -> Self {
        Self {
            resolver,
            max_render_retries: max_render_retries.max(1),
            memo: None,
            last_uniforms: None,
            mesh_resolution: None,
            state: FrameState::Rendering,
            retries: 0,
        }
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    pub fn memo(&self) -> Option<&RenderedFrame> {
        self.memo.as_ref()
    }

    pub fn resolver(&self) -> &TilePyramidResolver {
        &self.resolver
    }

    /// Forget the memoized frame, e.g. after a resize.
    pub fn invalidate(&mut self) {
        self.memo = None;
        self.last_uniforms = None;
        self.state = FrameState::Rendering;
    }

    /// Forget everything the backend holds, e.g. after the device was recreated.
    pub fn reset_backend(&mut self) {
        self.invalidate();
        self.mesh_resolution = None;
    }

    pub fn frame_uniforms(&self, input: &FrameInput<'_>, range: &TileRange, world_size: f64) -> FrameUniforms {
        let params = input.params;
        let light = params.light_direction(input.view.rotation);
        let scale = match input.store.visible_min_max(range) {
            visible if params.color_scale.auto && visible.is_known() => visible,
            _ => MinMax::new(params.color_scale.min, params.color_scale.max),
        };
        let shear = params.effective_shear(input.live_shear, input.view.rotation, input.view.resolution);
        FrameUniforms {
            light: [light[0], light[1], light[2], params.ambient as f32],
            color_scale: [
                scale.min as f32,
                scale.max as f32,
                params.vertical_exaggeration as f32,
                params.overlay_opacity as f32,
            ],
            shear: [
                (shear[0] / world_size) as f32,
                (-shear[1] / world_size) as f32,
                input.view.rotation as f32,
                0.0,
            ],
        }
    }

    pub fn render_frame<B: MosaicBackend + ?Sized>(
        &mut self,
        input: &FrameInput<'_>,
        backend: &mut B,
    ) -> FrameOutcome {
        let grid = input.grid;
        let max_extent = backend.max_framebuffer_extent();
        let range = visible_range(grid, input.view, max_extent);
        let cells = range.columns().max(range.rows());
        let extent = framebuffer_extent(cells, grid.tile_size, max_extent);
        let origin_tile = grid.tile_extent(TileCoord::new(range.zoom, range.min_x, range.min_y));
        let world_size = grid.tile_span(range.zoom) * f64::from(cells);
        let placement = FramePlacement {
            origin: [origin_tile.min_x, origin_tile.max_y],
            world_size,
            view: *input.view,
        };
        let uniforms = self.frame_uniforms(input, &range, world_size);
        let revision = input.store.revision();

        let frame = RenderedFrame {
            range,
            extent,
            revision,
        };
        if self.memo == Some(frame) && self.last_uniforms == Some(uniforms) {
            backend.present(&placement);
            self.state = FrameState::Cached;
            return FrameOutcome {
                state: FrameState::Cached,
                animate: false,
                draw_calls: 0,
                substitutes: 0,
            };
        }

        backend.begin_pass(extent);
        backend.set_frame_uniforms(&uniforms);
        self.last_uniforms = Some(uniforms);

        let mesh_resolution = input.params.mesh_resolution();
        if self.mesh_resolution != Some(mesh_resolution) {
            tracing::info!(mesh_resolution, "regenerating tile mesh");
            backend.upload_mesh(&TileMesh::grid(mesh_resolution));
            self.mesh_resolution = Some(mesh_resolution);
        }

        let cell_scale = 1.0 / cells as f32;
        let mut draw_calls = 0;
        let mut substitutes = 0;
        let mut complete = true;

        for coord in range.iter() {
            let cell_window = UvWindow {
                offset: [
                    (coord.x - range.min_x) as f32 * cell_scale,
                    (coord.y - range.min_y) as f32 * cell_scale,
                ],
                scale: cell_scale,
            };

            let overlay = self.bind_overlay(input, backend, coord, &mut complete);
            if matches!(overlay, OverlayBinding::Failed) {
                continue;
            }
            let (overlay_coord, overlay_window) = match overlay {
                OverlayBinding::Bound(c, w) => (Some(c), w),
                _ => (None, UvWindow::FULL),
            };
            let draw = |base: TileCoord, cell: UvWindow, base_uv: UvWindow, overlay_uv: UvWindow| {
                Self::cell_draw(input, coord, base, cell, base_uv, overlay_coord, overlay_uv)
            };

            let terrain = input.store.terrain();
            if terrain.state(&coord) == TileState::Empty {
                continue;
            }
            if ensure_resident(backend, terrain, coord) {
                backend.draw_cell(&draw(coord, cell_window, UvWindow::FULL, overlay_window));
                draw_calls += 1;
                continue;
            }

            complete = false;
            let substitute = self
                .resolver
                .find_substitute_with(coord, |c| ensure_resident(backend, terrain, c));
            match substitute {
                Substitute::Ancestor { coord: ancestor, window } => {
                    backend.draw_cell(&draw(ancestor, cell_window, window, overlay_window));
                    draw_calls += 1;
                    substitutes += 1;
                }
                Substitute::Descendants(children) => {
                    for (child, window) in children {
                        let placed = cell_window.compose(&window);
                        let overlay_uv = overlay_window.compose(&window);
                        backend.draw_cell(&draw(child, placed, UvWindow::FULL, overlay_uv));
                        draw_calls += 1;
                        substitutes += 1;
                    }
                }
                Substitute::None => {}
            }
        }

        backend.end_pass();
        backend.present(&placement);

        if complete {
            self.accept(frame);
        } else {
            self.retries += 1;
            if self.retries >= self.max_render_retries {
                tracing::warn!(
                    retries = self.retries,
                    range = ?range,
                    "tiles still missing, accepting partial frame"
                );
                self.accept(frame);
            } else {
                self.state = FrameState::Rendering;
            }
        }

        FrameOutcome {
            state: self.state,
            animate: self.state == FrameState::Rendering,
            draw_calls,
            substitutes,
        }
    }

    fn accept(&mut self, frame: RenderedFrame) {
        self.memo = Some(frame);
        self.retries = 0;
        self.state = FrameState::Cached;
    }

    fn bind_overlay<B: MosaicBackend + ?Sized>(
        &self,
        input: &FrameInput<'_>,
        backend: &mut B,
        coord: TileCoord,
        complete: &mut bool,
    ) -> OverlayBinding {
        if !input.params.overlay_enabled {
            return OverlayBinding::Off;
        }
        let overlay = input.store.overlay();
        match overlay.state(&coord) {
            TileState::Error => OverlayBinding::Failed,
            TileState::Empty => OverlayBinding::Off,
            _ if ensure_resident(backend, overlay, coord) => OverlayBinding::Bound(coord, UvWindow::FULL),
            _ => {
                *complete = false;
                match self
                    .resolver
                    .find_substitute_with(coord, |c| c.zoom < coord.zoom && ensure_resident(backend, overlay, c))
                {
                    Substitute::Ancestor { coord, window } => OverlayBinding::Bound(coord, window),
                    _ => OverlayBinding::Off,
                }
            }
        }
    }

    fn cell_draw(
        input: &FrameInput<'_>,
        cell: TileCoord,
        base: TileCoord,
        placed: UvWindow,
        base_uv: UvWindow,
        overlay: Option<TileCoord>,
        overlay_uv: UvWindow,
    ) -> CellDraw {
        let grid = input.grid;
        let image_width = input
            .store
            .terrain()
            .get(&base)
            .and_then(Tile::image)
            .map_or(grid.tile_size, |image| image.width());
        // A window into the texture shrinks the ground covered by each texel.
        let texel_meters = grid.tile_span(base.zoom) / image_width.max(1) as f64;
        CellDraw {
            cell,
            base,
            overlay,
            uniforms: CellUniforms {
                cell: [
                    placed.offset[0],
                    placed.offset[1],
                    placed.scale,
                    scale_for_zoom(base.zoom) as f32,
                ],
                base_uv: [base_uv.offset[0], base_uv.offset[1], base_uv.scale, texel_meters as f32],
                overlay_uv: [
                    overlay_uv.offset[0],
                    overlay_uv.offset[1],
                    overlay_uv.scale,
                    if overlay.is_some() { 1.0 } else { 0.0 },
                ],
            },
        }
    }
}
