use std::cell::RefCell;
use std::rc::{Rc, Weak};

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, HtmlCanvasElement, HtmlElement, Window};

use super::context::{self, WebContext};
use super::render::{PulseScene, RenderLoop};
use super::scheduler::TimeoutScheduler;
use crate::config::GuardConfig;
use crate::error::Result;
use crate::monitor::CapabilityMonitor;
use crate::quality::ContextAttributes;
use crate::surface::{ResilientRenderSurface, SurfaceMode, SurfaceView};

pub(crate) type CanvasSurface = ResilientRenderSurface<CanvasView, TimeoutScheduler, PulseScene>;

thread_local! {
    static SURFACES: RefCell<Vec<Weak<RefCell<CanvasSurface>>>> = const { RefCell::new(Vec::new()) };
}

/// Runs `f` against the surface if it is still alive. Platform events can
/// fire while the surface is already borrowed (`loseContext()` dispatches
/// synchronously), so a busy surface gets the call on the next task.
pub(crate) fn with_surface<F>(surface: &Weak<RefCell<CanvasSurface>>, f: F)
where
    F: FnOnce(&mut CanvasSurface) + 'static,
{
    let Some(strong) = surface.upgrade() else {
        return;
    };
    let Ok(mut guard) = strong.try_borrow_mut() else {
        let surface = surface.clone();
        defer(move || with_surface(&surface, f));
        return;
    };
    f(&mut guard);
}

fn defer(f: impl FnOnce() + 'static) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let callback = Closure::once_into_js(f);
    if let Err(err) = window.set_timeout_with_callback_and_timeout_and_arguments_0(callback.unchecked_ref(), 0) {
        log::error!("could not defer surface call: {err:?}");
    }
}

/// Calls `f` on every live surface, pruning dead ones.
pub(crate) fn for_each_surface(mut f: impl FnMut(&Weak<RefCell<CanvasSurface>>)) {
    let live: Vec<_> = SURFACES.with(|surfaces| {
        let mut surfaces = surfaces.borrow_mut();
        surfaces.retain(|surface| surface.strong_count() > 0);
        surfaces.clone()
    });
    for surface in &live {
        f(surface);
    }
}

/// The hero canvas and the element shown in its place.
pub(crate) struct CanvasView {
    canvas: HtmlCanvasElement,
    fallback: HtmlElement,
}

impl CanvasView {
    /// Without an explicit fallback element a CSS-animated placeholder is
    /// inserted right after the canvas.
    pub(crate) fn new(canvas: HtmlCanvasElement, fallback: Option<HtmlElement>) -> std::result::Result<Self, JsValue> {
        let fallback = match fallback {
            Some(fallback) => fallback,
            None => {
                let document = canvas.owner_document().ok_or("canvas is not in a document")?;
                let placeholder = document.create_element("div")?.dyn_into::<HtmlElement>()?;
                placeholder.set_class_name("gl-fallback");
                placeholder.set_attribute("aria-hidden", "true")?;
                canvas.after_with_node_1(&placeholder)?;
                placeholder
            }
        };
        fallback.set_hidden(true);
        Ok(Self { canvas, fallback })
    }
}

impl SurfaceView for CanvasView {
    type Context = WebContext;

    fn acquire(&mut self, attributes: &ContextAttributes) -> Result<Option<WebContext>> {
        context::acquire(&self.canvas, Some(attributes), false)
    }

    fn set_canvas_visible(&mut self, visible: bool) {
        self.canvas.set_hidden(!visible);
    }

    fn set_fallback_visible(&mut self, visible: bool) {
        self.fallback.set_hidden(!visible);
    }

    fn apply_pixel_ratio(&mut self, ratio: f64) {
        let width = (f64::from(self.canvas.client_width()) * ratio).round().max(1.0);
        let height = (f64::from(self.canvas.client_height()) * ratio).round().max(1.0);
        self.canvas.set_width(width as u32);
        self.canvas.set_height(height as u32);
    }
}

type EventCallback = Closure<dyn FnMut(Event)>;

/// DOM listeners owned by one mounted surface, removed on drop.
struct Listeners {
    window: Window,
    canvas: HtmlCanvasElement,
    lost: EventCallback,
    restored: EventCallback,
    resize: EventCallback,
}

impl Listeners {
    fn attach(window: &Window, canvas: &HtmlCanvasElement, surface: &Rc<RefCell<CanvasSurface>>) -> std::result::Result<Self, JsValue> {
        let weak = Rc::downgrade(surface);
        let lost = Closure::wrap(Box::new(move |event: Event| {
            // Without this the browser never fires `webglcontextrestored`.
            event.prevent_default();
            with_surface(&weak, |surface| surface.handle_context_lost());
        }) as Box<dyn FnMut(Event)>);

        let weak = Rc::downgrade(surface);
        let restored = Closure::wrap(Box::new(move |_: Event| {
            with_surface(&weak, |surface| surface.handle_context_restored());
        }) as Box<dyn FnMut(Event)>);

        let weak = Rc::downgrade(surface);
        let resize = Closure::wrap(Box::new(move |_: Event| {
            let ratio = web_sys::window().map_or(1.0, |window| window.device_pixel_ratio());
            with_surface(&weak, move |surface| surface.set_device_pixel_ratio(ratio));
        }) as Box<dyn FnMut(Event)>);

        canvas.add_event_listener_with_callback("webglcontextlost", lost.as_ref().unchecked_ref())?;
        canvas.add_event_listener_with_callback("webglcontextrestored", restored.as_ref().unchecked_ref())?;
        window.add_event_listener_with_callback("resize", resize.as_ref().unchecked_ref())?;
        Ok(Self {
            window: window.clone(),
            canvas: canvas.clone(),
            lost,
            restored,
            resize,
        })
    }
}

impl Drop for Listeners {
    fn drop(&mut self) {
        let _ = self
            .canvas
            .remove_event_listener_with_callback("webglcontextlost", self.lost.as_ref().unchecked_ref());
        let _ = self
            .canvas
            .remove_event_listener_with_callback("webglcontextrestored", self.restored.as_ref().unchecked_ref());
        let _ = self
            .window
            .remove_event_listener_with_callback("resize", self.resize.as_ref().unchecked_ref());
    }
}

/// A mounted WebGL surface, as seen from JavaScript.
#[wasm_bindgen]
pub struct WebSurface {
    surface: Rc<RefCell<CanvasSurface>>,
    listeners: Option<Listeners>,
    frames: Option<RenderLoop>,
}

impl WebSurface {
    pub(crate) fn mount(
        monitor: &CapabilityMonitor,
        config: &GuardConfig,
        canvas: HtmlCanvasElement,
        fallback: Option<HtmlElement>,
    ) -> std::result::Result<Self, JsValue> {
        let window = web_sys::window().ok_or("no window")?;
        let view = CanvasView::new(canvas.clone(), fallback)?;
        let surface = Rc::new_cyclic(|weak: &Weak<RefCell<CanvasSurface>>| {
            let timers = weak.clone();
            let scheduler = TimeoutScheduler::new(
                window.clone(),
                Rc::new(move |token| with_surface(&timers, move |surface| surface.handle_timer(token))),
            );
            RefCell::new(ResilientRenderSurface::new(monitor, config, view, PulseScene::default(), scheduler))
        });

        let listeners = Listeners::attach(&window, &canvas, &surface)?;
        {
            let mut surface = surface.borrow_mut();
            surface.set_device_pixel_ratio(window.device_pixel_ratio());
            surface.mount();
        }
        let frames = RenderLoop::start(Rc::downgrade(&surface))?;
        SURFACES.with(|surfaces| surfaces.borrow_mut().push(Rc::downgrade(&surface)));

        Ok(Self {
            surface,
            listeners: Some(listeners),
            frames: Some(frames),
        })
    }

    pub(crate) fn handle(&self) -> Weak<RefCell<CanvasSurface>> {
        Rc::downgrade(&self.surface)
    }
}

#[wasm_bindgen]
impl WebSurface {
    /// Retries WebGL after the surface gave up.
    #[wasm_bindgen(js_name = forceRecovery)]
    pub fn force_recovery(&self) {
        with_surface(&self.handle(), |surface| surface.force_recovery());
    }

    #[wasm_bindgen(getter, js_name = recoveryAttempts)]
    pub fn recovery_attempts(&self) -> u32 {
        self.surface.try_borrow().map_or(0, |surface| surface.recovery_attempts())
    }

    /// `{ losses, recoveriesAttempted, recoveriesSucceeded, forced }`
    #[wasm_bindgen(getter, js_name = recoveryStats)]
    pub fn recovery_stats(&self) -> std::result::Result<JsValue, JsValue> {
        let stats = self.surface.try_borrow().map(|surface| surface.recovery_stats()).unwrap_or_default();
        Ok(serde_wasm_bindgen::to_value(&stats)?)
    }

    /// `"Rendering"`, `"Recovering"` or `"FallbackPermanent"`.
    #[wasm_bindgen(getter)]
    pub fn mode(&self) -> std::result::Result<JsValue, JsValue> {
        let mode = self
            .surface
            .try_borrow()
            .map_or(SurfaceMode::Recovering, |surface| surface.mode());
        Ok(serde_wasm_bindgen::to_value(&mode)?)
    }

    /// Stops rendering and releases the context, listeners and timers.
    pub fn unmount(&mut self) {
        self.frames = None;
        self.listeners = None;
        with_surface(&self.handle(), |surface| surface.unmount());
    }
}
