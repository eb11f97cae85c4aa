//! WebGL capability detection, CSS fallback and context-loss recovery for
//! the portfolio's 3D visuals.
//!
//! The core ([`monitor`], [`recovery`], [`surface`]) is platform-neutral and
//! runs on the host under `cargo test`. The browser glue lives in the
//! wasm-only `wasm` module.

pub mod config;
pub mod error;
pub mod monitor;
pub mod platform;
pub mod quality;
pub mod recovery;
pub mod signal;
pub mod status;
pub mod surface;

#[cfg(test)]
mod testing;

pub use config::{Environment, GuardConfig};
pub use error::{FailureKind, GlError};
pub use monitor::{CapabilityMonitor, ProbeReport};
pub use recovery::{Diagnostics, RecoveryCoordinator, RecoveryPhase};
pub use signal::{CapabilityReader, CapabilitySignal, Subscription};
pub use surface::{ResilientRenderSurface, Scene, SurfaceMode, SurfaceView};

// Only compile wasm-specific code when targeting wasm32. Public so the
// browser tests can drive the exports.
#[cfg(target_arch = "wasm32")]
pub mod wasm {
    use std::cell::RefCell;
    use std::rc::Rc;

    use wasm_bindgen::prelude::*;
    use wasm_bindgen::JsCast;
    use web_sys::{Event, HtmlCanvasElement, HtmlElement};

    use crate::config::GuardConfig;
    use crate::monitor::CapabilityMonitor;
    use crate::platform::ContextProvider;
    use crate::recovery::{self, is_context_healthy, Diagnostics};

    mod context;
    mod render;
    mod scheduler;
    mod status;
    mod surface;

    use context::OffscreenProvider;
    pub use surface::WebSurface;

    const HERO_CANVAS: &str = "hero-canvas";
    const HERO_FALLBACK: &str = "hero-fallback";
    const STATUS_BANNER: &str = "webgl-status";

    thread_local! {
        static CONFIG: GuardConfig = GuardConfig::default();
        static MONITOR: RefCell<Option<Rc<CapabilityMonitor>>> = const { RefCell::new(None) };
        static HERO: RefCell<Option<WebSurface>> = const { RefCell::new(None) };
        static STATUS: RefCell<Option<status::StatusPanel>> = const { RefCell::new(None) };
    }

    fn config() -> GuardConfig {
        CONFIG.with(GuardConfig::clone)
    }

    /// The page-session monitor, probing on first use.
    fn monitor() -> Result<Rc<CapabilityMonitor>, JsValue> {
        if let Some(monitor) = MONITOR.with(|slot| slot.borrow().clone()) {
            return Ok(monitor);
        }
        let monitor = match OffscreenProvider::from_window() {
            Ok(provider) => CapabilityMonitor::probe(&provider, &config()),
            Err(err) => {
                log::error!("WebGL support check failed: {err}");
                CapabilityMonitor::new(crate::monitor::ProbeReport::unsupported())
            }
        };
        let monitor = Rc::new(monitor);
        watch_window(&monitor)?;
        MONITOR.with(|slot| *slot.borrow_mut() = Some(Rc::clone(&monitor)));
        Ok(monitor)
    }

    /// Window-scope loss events feed the monitor. A restore only counts once a
    /// fresh context passes the health check.
    fn watch_window(monitor: &CapabilityMonitor) -> Result<(), JsValue> {
        let window = web_sys::window().ok_or("no window")?;

        let reporter = monitor.window_reporter();
        let lost = Closure::wrap(Box::new(move |_: Event| {
            log::warn!("WebGL context lost");
            reporter.lost();
        }) as Box<dyn FnMut(Event)>);

        let reporter = monitor.window_reporter();
        let restored = Closure::wrap(Box::new(move |_: Event| {
            let healthy = OffscreenProvider::from_window()
                .and_then(|provider| provider.acquire_offscreen())
                .map(|context| context.as_ref().is_some_and(is_context_healthy))
                .unwrap_or(false);
            if healthy {
                log::info!("WebGL context restored");
                reporter.restored();
            } else {
                log::warn!("WebGL restore reported but the context is unusable");
            }
        }) as Box<dyn FnMut(Event)>);

        window.add_event_listener_with_callback("webglcontextlost", lost.as_ref().unchecked_ref())?;
        window.add_event_listener_with_callback("webglcontextrestored", restored.as_ref().unchecked_ref())?;
        // The monitor lives for the page session.
        lost.forget();
        restored.forget();
        Ok(())
    }

    #[wasm_bindgen(start)]
    pub fn main() -> Result<(), JsValue> {
        console_error_panic_hook::set_once();
        let config = config();
        let level = if config.environment.is_development() {
            log::Level::Debug
        } else {
            log::Level::Info
        };
        // A second init (tests, hot reload) is harmless.
        console_log::init_with_level(level).ok();

        let window = web_sys::window().ok_or("no window")?;
        let document = window.document().ok_or("no document")?;
        let monitor = monitor()?;

        if let Some(root) = document.get_element_by_id(STATUS_BANNER) {
            let panel = status::StatusPanel::attach(&window, root.dyn_into::<HtmlElement>()?, &monitor, config.banner)?;
            STATUS.with(|slot| *slot.borrow_mut() = Some(panel));
        }

        let Some(canvas) = document.get_element_by_id(HERO_CANVAS) else {
            log::debug!("no #{HERO_CANVAS} on this page");
            return Ok(());
        };
        let canvas = canvas.dyn_into::<HtmlCanvasElement>()?;
        let fallback = document
            .get_element_by_id(HERO_FALLBACK)
            .and_then(|element| element.dyn_into::<HtmlElement>().ok());
        let hero = WebSurface::mount(&monitor, &config, canvas, fallback)?;
        HERO.with(|slot| *slot.borrow_mut() = Some(hero));

        if config.environment.is_development() {
            log::info!("WebGL dev tools: simulateWebGLContextLoss(), webglDiagnostics(), webglStatus()");
        }
        Ok(())
    }

    /// Mounts another resilient surface on `canvas_id`.
    #[wasm_bindgen(js_name = mountSurface)]
    pub fn mount_surface(canvas_id: &str, fallback_id: Option<String>) -> Result<WebSurface, JsValue> {
        let document = web_sys::window()
            .and_then(|window| window.document())
            .ok_or("no document")?;
        let canvas = document
            .get_element_by_id(canvas_id)
            .ok_or("canvas not found")?
            .dyn_into::<HtmlCanvasElement>()?;
        let fallback = fallback_id
            .and_then(|id| document.get_element_by_id(&id))
            .and_then(|element| element.dyn_into::<HtmlElement>().ok());
        WebSurface::mount(&*monitor()?, &config(), canvas, fallback)
    }

    /// The hero surface mounted at startup, if the page has one.
    #[wasm_bindgen(js_name = heroRecoveryAttempts)]
    pub fn hero_recovery_attempts() -> u32 {
        HERO.with(|slot| slot.borrow().as_ref().map_or(0, WebSurface::recovery_attempts))
    }

    /// `{ isSupported, isContextLost, canRender }`
    #[wasm_bindgen(js_name = webglStatus)]
    pub fn webgl_status() -> Result<JsValue, JsValue> {
        let signal = monitor()?.signal();
        Ok(serde_wasm_bindgen::to_value(&signal)?)
    }

    /// Renderer details from a throwaway context, or `{ error }`.
    #[wasm_bindgen(js_name = webglDiagnostics)]
    pub fn webgl_diagnostics() -> Result<JsValue, JsValue> {
        let report = match OffscreenProvider::from_window() {
            Ok(provider) => recovery::diagnostics(&provider),
            Err(err) => Diagnostics::Unavailable { error: err.to_string() },
        };
        Ok(serde_wasm_bindgen::to_value(&report)?)
    }

    /// Loses every mounted surface's context. Development builds only;
    /// returns whether anything was lost.
    #[wasm_bindgen(js_name = simulateWebGLContextLoss)]
    pub fn simulate_webgl_context_loss() -> bool {
        let mut simulated = false;
        surface::for_each_surface(|surface| {
            if let Some(surface) = surface.upgrade() {
                if let Ok(mut surface) = surface.try_borrow_mut() {
                    simulated |= surface.simulate_loss();
                }
            }
        });
        simulated
    }

    /// Retries every surface that fell back permanently.
    #[wasm_bindgen(js_name = forceWebGLRecovery)]
    pub fn force_webgl_recovery() {
        surface::for_each_surface(|surface| {
            surface::with_surface(surface, |surface| surface.force_recovery());
        });
    }
}
