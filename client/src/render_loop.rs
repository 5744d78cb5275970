use std::cell::{Cell, RefCell};
use std::rc::Rc;

use wasm_bindgen::prelude::*;

/// Batches frame requests via `requestAnimationFrame`.
///
/// Call `mark_dirty()` whenever state changes. The frame function fires at most
/// once per vsync with the rAF timestamp (ms), coalescing all dirty marks.
///
/// When the frame function returns `true`, another frame is scheduled
/// automatically (shear physics, partially loaded mosaics).
pub struct FrameScheduler {
    inner: Rc<Inner>,
}

struct Inner {
    window: Option<web_sys::Window>,
    /// Cleared on drop; a callback already queued by the browser checks it and bails.
    alive: Cell<bool>,
    dirty: Cell<bool>,
    scheduled: Cell<bool>,
    raf_id: Cell<Option<i32>>,
    callback: RefCell<Option<Closure<dyn FnMut(f64)>>>,
}

impl Inner {
    fn request_frame(&self) {
        if self.scheduled.get() || !self.alive.get() {
            return;
        }
        self.scheduled.set(true);
        let cb_ref = self.callback.borrow();
        let (Some(cb), Some(window)) = (cb_ref.as_ref(), self.window.as_ref()) else {
            self.scheduled.set(false);
            return;
        };
        match window.request_animation_frame(cb.as_ref().unchecked_ref()) {
            Ok(id) => self.raf_id.set(Some(id)),
            Err(_) => self.scheduled.set(false),
        }
    }
}

impl FrameScheduler {
    /// `frame_fn` receives the frame timestamp and returns `true` while it needs more frames.
    pub fn new(frame_fn: impl Fn(f64) -> bool + 'static) -> Self {
        let inner = Rc::new(Inner {
            window: web_sys::window(),
            alive: Cell::new(true),
            dirty: Cell::new(false),
            scheduled: Cell::new(false),
            raf_id: Cell::new(None),
            callback: RefCell::new(None),
        });

        let inner_cb = inner.clone();
        let cb = Closure::<dyn FnMut(f64)>::new(move |timestamp: f64| {
            inner_cb.scheduled.set(false);
            inner_cb.raf_id.set(None);
            if !inner_cb.alive.get() || !inner_cb.dirty.get() {
                return;
            }
            inner_cb.dirty.set(false);
            if frame_fn(timestamp) {
                inner_cb.dirty.set(true);
                inner_cb.request_frame();
            }
        });
        *inner.callback.borrow_mut() = Some(cb);

        Self { inner }
    }

    /// Request a frame. Cheap: sets a flag and schedules one rAF if none is pending.
    pub fn mark_dirty(&self) {
        self.inner.dirty.set(true);
        self.inner.request_frame();
    }
}

impl Drop for FrameScheduler {
    fn drop(&mut self) {
        self.inner.alive.set(false);
        if let Some(raf_id) = self.inner.raf_id.replace(None)
            && let Some(window) = self.inner.window.as_ref()
        {
            let _ = window.cancel_animation_frame(raf_id);
        }
        self.inner.scheduled.set(false);
        self.inner.dirty.set(false);
        // Break the callback->inner reference cycle on teardown.
        self.inner.callback.borrow_mut().take();
    }
}
