#![cfg_attr(not(target_arch = "wasm32"), allow(dead_code))]

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use js_sys::Reflect;
use terrashear_shared::{TileCoord, TileImage, TileLayer, TileRange, TileStore};
use wasm_bindgen::JsCast;
use wasm_bindgen::JsValue;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::JsFuture;
use web_sys::{CanvasRenderingContext2d, HtmlCanvasElement, HtmlImageElement};

const MAX_CONCURRENCY: usize = 6;
const ONLOAD_HANDLE_KEY: &str = "__terrashearTileOnload";
const ONERROR_HANDLE_KEY: &str = "__terrashearTileOnerror";

/// URL templates with `{z}`, `{x}` and `{y}` placeholders. An empty overlay
/// template disables the overlay layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileSources {
    pub terrain: String,
    pub overlay: String,
}

impl TileSources {
    fn template(&self, layer: TileLayer) -> &str {
        match layer {
            TileLayer::Terrain => &self.terrain,
            TileLayer::Overlay => &self.overlay,
        }
    }
}

pub fn tile_url(template: &str, coord: TileCoord) -> String {
    template
        .replace("{z}", &coord.zoom.to_string())
        .replace("{x}", &coord.x.to_string())
        .replace("{y}", &coord.y.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadJob {
    layer: TileLayer,
    coord: TileCoord,
}

struct LoaderInner {
    store: Rc<RefCell<TileStore>>,
    sources: TileSources,
    queue: RefCell<VecDeque<LoadJob>>,
    in_flight: Cell<usize>,
    scratch: RefCell<Option<(HtmlCanvasElement, CanvasRenderingContext2d)>>,
    on_loaded: Box<dyn Fn()>,
}

/// Fetches tile images into the shared `TileStore`, a few at a time.
///
/// Tiles nearest the middle of the requested range load first. Jobs still
/// queued when the camera moves away are dropped.
#[derive(Clone)]
pub struct TileLoader {
    inner: Rc<LoaderInner>,
}

impl TileLoader {
    pub fn new(
        store: Rc<RefCell<TileStore>>,
        sources: TileSources,
        on_loaded: impl Fn() + 'static,
    ) -> Self {
        Self {
            inner: Rc::new(LoaderInner {
                store,
                sources,
                queue: RefCell::new(VecDeque::new()),
                in_flight: Cell::new(0),
                scratch: RefCell::new(None),
                on_loaded: Box::new(on_loaded),
            }),
        }
    }

    /// Queues every tile of `range` that is neither loaded nor loading.
    pub fn request(&self, range: &TileRange, overlay: bool) {
        let inner = &self.inner;
        let mut layers = vec![TileLayer::Terrain];
        if overlay && !inner.sources.overlay.is_empty() {
            layers.push(TileLayer::Overlay);
        }

        let mut queued = 0usize;
        {
            let mut store = inner.store.borrow_mut();
            let mut queue = inner.queue.borrow_mut();
            queue.retain(|job| {
                let keep = range.contains(&job.coord) && layers.contains(&job.layer);
                if !keep {
                    store.cancel_load(job.layer, job.coord);
                }
                keep
            });
            for &layer in &layers {
                for coord in store.request(layer, range) {
                    store.mark_loading(layer, coord);
                    queue.push_back(LoadJob { layer, coord });
                    queued += 1;
                }
            }
            if queued > 0 {
                let mut jobs: Vec<LoadJob> = queue.drain(..).collect();
                jobs.sort_by(|a, b| {
                    distance_sq_to_center(range, a.coord)
                        .total_cmp(&distance_sq_to_center(range, b.coord))
                        .then_with(|| (a.layer == TileLayer::Overlay).cmp(&(b.layer == TileLayer::Overlay)))
                });
                queue.extend(jobs);
            }
        }

        if queued > 0 {
            tracing::debug!(queued, range = ?range, "tile loads queued");
            pump_queue(inner.clone());
        }
    }
}

fn distance_sq_to_center(range: &TileRange, coord: TileCoord) -> f64 {
    let cx = (f64::from(range.min_x) + f64::from(range.max_x)) * 0.5;
    let cy = (f64::from(range.min_y) + f64::from(range.max_y)) * 0.5;
    let dx = f64::from(coord.x) - cx;
    let dy = f64::from(coord.y) - cy;
    dx * dx + dy * dy
}

fn pump_queue(inner: Rc<LoaderInner>) {
    while inner.in_flight.get() < MAX_CONCURRENCY {
        let Some(job) = inner.queue.borrow_mut().pop_front() else {
            break;
        };
        inner.in_flight.set(inner.in_flight.get() + 1);

        let inner_next = inner.clone();
        let on_done: Rc<dyn Fn()> = Rc::new(move || {
            inner_next.in_flight.set(inner_next.in_flight.get().saturating_sub(1));
            pump_queue(inner_next.clone());
        });

        load_tile_job(inner.clone(), job, on_done);
    }
}

enum LoadResult {
    Image(TileImage),
    Empty,
    Failed(String),
}

fn finish(inner: &LoaderInner, job: LoadJob, result: LoadResult) {
    {
        let mut store = inner.store.borrow_mut();
        match result {
            LoadResult::Image(image) => store.complete_load::<String>(job.layer, job.coord, Ok(image)),
            LoadResult::Empty => store.complete_empty(job.layer, job.coord),
            LoadResult::Failed(err) => store.complete_load(job.layer, job.coord, Err(err)),
        }
    }
    (inner.on_loaded)();
}

fn load_tile_job(inner: Rc<LoaderInner>, job: LoadJob, on_done: Rc<dyn Fn()>) {
    let src = tile_url(inner.sources.template(job.layer), job.coord);
    let img = match HtmlImageElement::new() {
        Ok(img) => img,
        Err(_) => {
            finish(&inner, job, LoadResult::Failed("cannot create image element".into()));
            on_done();
            return;
        }
    };
    img.set_cross_origin(Some("anonymous"));

    let img_for_load = img.clone();
    let inner_load = inner.clone();
    let on_done_load = on_done.clone();
    let onload = Closure::<dyn FnMut()>::new(move || {
        clear_image_handlers(&img_for_load);

        let img_for_decode = img_for_load.clone();
        let inner = inner_load.clone();
        let on_done_load = on_done_load.clone();

        wasm_bindgen_futures::spawn_local(async move {
            let _ = JsFuture::from(img_for_decode.decode()).await;
            let result = match read_pixels(&inner, &img_for_decode) {
                Ok(Some(image)) => LoadResult::Image(image),
                Ok(None) => LoadResult::Empty,
                Err(err) => LoadResult::Failed(err),
            };
            finish(&inner, job, result);
            on_done_load();
        });
    });

    let img_for_error = img.clone();
    let inner_error = inner.clone();
    let on_done_error = on_done.clone();
    let src_for_error = src.clone();
    let onerror = Closure::<dyn FnMut()>::new(move || {
        clear_image_handlers(&img_for_error);
        finish(
            &inner_error,
            job,
            LoadResult::Failed(format!("failed to load {src_for_error}")),
        );
        on_done_error();
    });

    let onload_js = onload.into_js_value();
    let onerror_js = onerror.into_js_value();
    img.set_onload(Some(onload_js.unchecked_ref()));
    img.set_onerror(Some(onerror_js.unchecked_ref()));
    let _ = Reflect::set(img.as_ref(), &JsValue::from_str(ONLOAD_HANDLE_KEY), &onload_js);
    let _ = Reflect::set(img.as_ref(), &JsValue::from_str(ONERROR_HANDLE_KEY), &onerror_js);
    img.set_src(&src);
}

fn clear_image_handlers(img: &HtmlImageElement) {
    img.set_onload(None);
    img.set_onerror(None);
    let _ = Reflect::delete_property(img.as_ref(), &JsValue::from_str(ONLOAD_HANDLE_KEY));
    let _ = Reflect::delete_property(img.as_ref(), &JsValue::from_str(ONERROR_HANDLE_KEY));
}

/// Copies the decoded image's RGBA bytes through a reused 2D canvas.
/// `Ok(None)` for a zero-sized image.
fn read_pixels(inner: &LoaderInner, img: &HtmlImageElement) -> Result<Option<TileImage>, String> {
    let (width, height) = (img.natural_width(), img.natural_height());
    if width == 0 || height == 0 {
        return Ok(None);
    }

    let mut scratch = inner.scratch.borrow_mut();
    if scratch.is_none() {
        *scratch = Some(scratch_canvas()?);
    }
    let Some((canvas, ctx)) = scratch.as_ref() else {
        return Err("scratch canvas unavailable".into());
    };
    if canvas.width() != width || canvas.height() != height {
        canvas.set_width(width);
        canvas.set_height(height);
    }
    ctx.clear_rect(0.0, 0.0, f64::from(width), f64::from(height));
    ctx.draw_image_with_html_image_element(img, 0.0, 0.0)
        .map_err(|e| format!("drawImage failed: {e:?}"))?;
    let data = ctx
        .get_image_data(0.0, 0.0, f64::from(width), f64::from(height))
        .map_err(|e| format!("pixels unreadable (cross-origin?): {e:?}"))?;
    TileImage::new(width, height, data.data().0)
        .map(Some)
        .map_err(|e| e.to_string())
}

fn scratch_canvas() -> Result<(HtmlCanvasElement, CanvasRenderingContext2d), String> {
    let document = web_sys::window()
        .and_then(|w| w.document())
        .ok_or("no document")?;
    let canvas: HtmlCanvasElement = document
        .create_element("canvas")
        .map_err(|e| format!("create canvas: {e:?}"))?
        .dyn_into()
        .map_err(|_| "element is not a canvas".to_string())?;
    let ctx: CanvasRenderingContext2d = canvas
        .get_context("2d")
        .map_err(|e| format!("getContext: {e:?}"))?
        .ok_or("no 2d context")?
        .dyn_into()
        .map_err(|_| "context is not 2d".to_string())?;
    Ok((canvas, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_template_substitutes_coordinates() {
        let url = tile_url("https://tiles.example/dem/{z}/{x}/{y}.png", TileCoord::new(12, 2150, 1436));
        assert_eq!(url, "https://tiles.example/dem/12/2150/1436.png");
    }

    #[test]
    fn jobs_sort_from_the_middle_out() {
        let range = TileRange {
            zoom: 4,
            min_x: 2,
            min_y: 2,
            max_x: 6,
            max_y: 4,
        };
        let middle = distance_sq_to_center(&range, TileCoord::new(4, 4, 3));
        let corner = distance_sq_to_center(&range, TileCoord::new(4, 2, 2));
        assert_eq!(middle, 0.0);
        assert!(corner > middle);
    }
}
