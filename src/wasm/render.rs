use std::cell::RefCell;
use std::rc::{Rc, Weak};

use wasm_bindgen::{closure::Closure, JsCast, JsValue};
use web_sys::{window, WebGlRenderingContext as GL};

use super::context::WebContext;
use super::surface::{with_surface, CanvasSurface};
use crate::error::{GlError, Result};
use crate::quality::QualityProfile;
use crate::surface::Scene;

// Slate background and the accent it pulses towards.
const BASE: [f32; 3] = [15.0 / 255.0, 23.0 / 255.0, 42.0 / 255.0];
const ACCENT: [f32; 3] = [59.0 / 255.0, 130.0 / 255.0, 246.0 / 255.0];

/// Placeholder hero scene: the clear colour drifts between two tones.
#[derive(Debug, Default)]
pub(crate) struct PulseScene {
    alpha: f32,
    speed: f64,
}

impl Scene<WebContext> for PulseScene {
    fn setup(&mut self, context: &WebContext, quality: &QualityProfile) -> Result<()> {
        let gl = context.gl();
        // A pulse that never redraws is just a still frame.
        self.speed = if quality.degraded { 0.0 } else { 0.0006 };
        self.alpha = if quality.degraded { 0.6 } else { 1.0 };
        gl.disable(GL::DEPTH_TEST);
        gl.viewport(0, 0, gl.drawing_buffer_width(), gl.drawing_buffer_height());
        check(gl)
    }

    fn draw(&mut self, context: &WebContext, time_ms: f64) -> Result<()> {
        let gl = context.gl();
        let t = ((time_ms * self.speed).sin() * 0.5 + 0.5) as f32 * 0.35;
        let [r, g, b] = std::array::from_fn(|i| BASE[i] + (ACCENT[i] - BASE[i]) * t);
        gl.viewport(0, 0, gl.drawing_buffer_width(), gl.drawing_buffer_height());
        gl.clear_color(r, g, b, self.alpha);
        gl.clear(GL::COLOR_BUFFER_BIT);
        check(gl)
    }
}

fn check(gl: &GL) -> Result<()> {
    match gl.get_error() {
        GL::NO_ERROR => Ok(()),
        GL::CONTEXT_LOST_WEBGL => Err(GlError::ContextLost),
        code => Err(GlError::Draw(format!("GL error {code:#06x}"))),
    }
}

type FrameCallback = Rc<RefCell<Option<Closure<dyn FnMut(f64)>>>>;

/// requestAnimationFrame loop feeding one surface. Stops when dropped or when
/// the surface goes away.
pub(crate) struct RenderLoop {
    callback: FrameCallback,
    handle: Rc<RefCell<Option<i32>>>,
}

impl RenderLoop {
    pub(crate) fn start(surface: Weak<RefCell<CanvasSurface>>) -> std::result::Result<Self, JsValue> {
        // `f` holds the frame closure so it can keep re-requesting itself.
        let f: FrameCallback = Rc::new(RefCell::new(None));
        let handle = Rc::new(RefCell::new(None));
        let g = Rc::downgrade(&f);
        let next = Rc::clone(&handle);
        *f.borrow_mut() = Some(Closure::wrap(Box::new(move |time: f64| {
            if surface.strong_count() == 0 {
                next.borrow_mut().take();
                return;
            }
            with_surface(&surface, move |surface| surface.render_frame(time));
            let Some(f) = g.upgrade() else {
                return;
            };
            let requested = match (window(), f.borrow().as_ref()) {
                (Some(window), Some(callback)) => window
                    .request_animation_frame(callback.as_ref().unchecked_ref())
                    .ok(),
                _ => None,
            };
            *next.borrow_mut() = requested;
        }) as Box<dyn FnMut(f64)>));

        let window = window().ok_or("no window")?;
        let first = match f.borrow().as_ref() {
            Some(callback) => window.request_animation_frame(callback.as_ref().unchecked_ref())?,
            None => return Err("frame callback missing".into()),
        };
        *handle.borrow_mut() = Some(first);
        Ok(Self { callback: f, handle })
    }
}

impl Drop for RenderLoop {
    fn drop(&mut self) {
        if let (Some(window), Some(id)) = (window(), self.handle.borrow_mut().take()) {
            let _ = window.cancel_animation_frame(id);
        }
        self.callback.borrow_mut().take();
    }
}
