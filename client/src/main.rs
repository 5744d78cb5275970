mod app;
mod canvas;
#[cfg(target_arch = "wasm32")]
mod gpu;
mod logging;
mod render_loop;
mod tiles;
mod viewport;

#[cfg(not(target_arch = "wasm32"))]
mod gpu {
    use terrashear_shared::mesh::TileMesh;
    use terrashear_shared::mosaic::{CellDraw, FramePlacement, FrameUniforms};
    use terrashear_shared::{MosaicBackend, Tile, TileCoord, TileLayer};

    pub struct GpuMosaic;

    impl GpuMosaic {
        pub async fn init(_canvas: web_sys::HtmlCanvasElement) -> Result<Self, String> {
            Err("not wasm".into())
        }
        pub fn resize(&mut self, _w: u32, _h: u32) {}
    }

    impl MosaicBackend for GpuMosaic {
        fn max_framebuffer_extent(&self) -> u32 {
            1
        }
        fn is_resident(&self, _layer: TileLayer, _coord: TileCoord) -> bool {
            false
        }
        fn make_resident(&mut self, _tile: &Tile) -> bool {
            false
        }
        fn evict(&mut self, _layer: TileLayer, _coord: TileCoord) {}
        fn begin_pass(&mut self, _extent: u32) {}
        fn set_frame_uniforms(&mut self, _uniforms: &FrameUniforms) {}
        fn upload_mesh(&mut self, _mesh: &TileMesh) {}
        fn draw_cell(&mut self, _draw: &CellDraw) {}
        fn end_pass(&mut self) {}
        fn present(&mut self, _placement: &FramePlacement) {}
    }
}

use leptos::mount::mount_to;
use std::any::Any;
use std::cell::RefCell;
use wasm_bindgen::JsCast;

thread_local! {
    static APP_MOUNT_HANDLE: RefCell<Option<Box<dyn Any>>> = RefCell::new(None);
}

fn main() {
    console_error_panic_hook::set_once();
    logging::init(&app::Settings::load().log_level);

    let Some(window) = web_sys::window() else {
        return;
    };
    let Some(document) = window.document() else {
        return;
    };
    let mount_target = document
        .get_element_by_id("app")
        .and_then(|node| node.dyn_into::<web_sys::HtmlElement>().ok())
        .or_else(|| document.body());
    let Some(target) = mount_target else {
        tracing::error!("no mount point for the map");
        return;
    };

    APP_MOUNT_HANDLE.with(move |slot| {
        // A re-entered main() drops the previous mount so its effects stop.
        let _old = slot.borrow_mut().take();
        let handle = mount_to(target, app::App);
        *slot.borrow_mut() = Some(Box::new(handle));
    });
}
