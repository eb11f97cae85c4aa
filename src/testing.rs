//! In-memory stand-ins for the browser, used by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{GlError, Result};
use crate::platform::{ContextProvider, GlContext, IntParam, Scheduler, StringParam, TimerToken};
use crate::quality::ContextAttributes;
use crate::surface::SurfaceView;

/// Shared state behind every [`FakeContext`] handed out by one fake GPU.
#[derive(Debug, Default)]
pub(crate) struct FakeGpu {
    pub renderer: RefCell<Option<String>>,
    pub lost: Cell<bool>,
    pub version_fails: Cell<bool>,
    pub lose_extension: Cell<bool>,
    pub unbind_fails: Cell<bool>,
    pub live_contexts: Cell<usize>,
    pub calls: RefCell<Vec<String>>,
}

impl FakeGpu {
    pub(crate) fn new(renderer: Option<&str>) -> Rc<Self> {
        let gpu = Self::default();
        *gpu.renderer.borrow_mut() = renderer.map(String::from);
        gpu.lose_extension.set(true);
        Rc::new(gpu)
    }

    pub(crate) fn context(self: &Rc<Self>) -> FakeContext {
        self.live_contexts.set(self.live_contexts.get() + 1);
        FakeContext {
            gpu: Rc::clone(self),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.borrow_mut().push(call.into());
    }
}

#[derive(Debug)]
pub(crate) struct FakeContext {
    gpu: Rc<FakeGpu>,
}

impl Drop for FakeContext {
    fn drop(&mut self) {
        self.gpu.live_contexts.set(self.gpu.live_contexts.get() - 1);
    }
}

impl FakeContext {
    fn unbind(&self, call: String) -> Result<()> {
        self.gpu.record(call);
        if self.gpu.unbind_fails.get() {
            Err(GlError::Query("unbind rejected".into()))
        } else {
            Ok(())
        }
    }
}

impl GlContext for FakeContext {
    fn is_context_lost(&self) -> bool {
        self.gpu.lost.get()
    }

    fn string_parameter(&self, param: StringParam) -> Result<String> {
        if self.gpu.version_fails.get() {
            return Err(GlError::Query("getParameter threw".into()));
        }
        Ok(match param {
            StringParam::Version => "WebGL 1.0 (fake)".into(),
            StringParam::Vendor => "WebKit".into(),
            StringParam::Renderer => "WebKit WebGL".into(),
            StringParam::ShadingLanguageVersion => "WebGL GLSL ES 1.0".into(),
        })
    }

    fn int_parameter(&self, param: IntParam) -> Result<i32> {
        Ok(match param {
            IntParam::MaxTextureSize => 4096,
            IntParam::MaxVertexAttribs => 16,
            IntParam::MaxTextureImageUnits => 4,
        })
    }

    fn max_viewport_dims(&self) -> Result<[i32; 2]> {
        Ok([4096, 4096])
    }

    fn unmasked_renderer(&self) -> Option<String> {
        self.gpu.renderer.borrow().clone()
    }

    fn unmasked_vendor(&self) -> Option<String> {
        self.gpu.renderer.borrow().as_ref().map(|_| "Fake Vendor".to_string())
    }

    fn supported_extensions(&self) -> Vec<String> {
        vec!["WEBGL_lose_context".into(), "WEBGL_debug_renderer_info".into()]
    }

    fn unbind_texture_unit(&self, unit: u32) -> Result<()> {
        self.unbind(format!("texture_unit:{unit}"))
    }

    fn unbind_buffers(&self) -> Result<()> {
        self.unbind("buffers".into())
    }

    fn unbind_framebuffers(&self) -> Result<()> {
        self.unbind("framebuffers".into())
    }

    fn clear_program(&self) -> Result<()> {
        self.unbind("program".into())
    }

    fn lose_context(&self) -> bool {
        if !self.gpu.lose_extension.get() {
            return false;
        }
        self.gpu.record("lose_context");
        self.gpu.lost.set(true);
        true
    }

    fn restore_context(&self) -> bool {
        if !self.gpu.lose_extension.get() {
            return false;
        }
        self.gpu.record("restore_context");
        true
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ProviderOutcome {
    Throws,
    Missing,
    Available(Rc<FakeGpu>),
}

#[derive(Debug, Clone)]
pub(crate) struct FakeProvider {
    pub outcome: ProviderOutcome,
}

impl FakeProvider {
    pub(crate) fn with_gpu(gpu: &Rc<FakeGpu>) -> Self {
        Self {
            outcome: ProviderOutcome::Available(Rc::clone(gpu)),
        }
    }
}

impl ContextProvider for FakeProvider {
    type Context = FakeContext;

    fn acquire_offscreen(&self) -> Result<Option<FakeContext>> {
        match &self.outcome {
            ProviderOutcome::Throws => Err(GlError::Acquire("getContext threw".into())),
            ProviderOutcome::Missing => Ok(None),
            ProviderOutcome::Available(gpu) => Ok(Some(gpu.context())),
        }
    }
}

#[derive(Debug, Default)]
struct Clock {
    now: Duration,
    next: u64,
    pending: BTreeMap<TimerToken, Duration>,
}

/// Manually advanced scheduler. Clones share one clock.
#[derive(Debug, Clone, Default)]
pub(crate) struct FakeScheduler {
    clock: Rc<RefCell<Clock>>,
}

impl FakeScheduler {
    pub(crate) fn pending(&self) -> usize {
        self.clock.borrow().pending.len()
    }

    /// Moves time forward and returns the tokens that came due, earliest first.
    pub(crate) fn advance(&self, by: Duration) -> Vec<TimerToken> {
        let mut clock = self.clock.borrow_mut();
        clock.now += by;
        let now = clock.now;
        let mut due: Vec<(Duration, TimerToken)> = clock
            .pending
            .iter()
            .filter(|(_, at)| **at <= now)
            .map(|(token, at)| (*at, *token))
            .collect();
        due.sort();
        for (_, token) in &due {
            clock.pending.remove(token);
        }
        due.into_iter().map(|(_, token)| token).collect()
    }
}

impl Scheduler for FakeScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerToken {
        let mut clock = self.clock.borrow_mut();
        let token = TimerToken(clock.next);
        clock.next += 1;
        let at = clock.now + delay;
        clock.pending.insert(token, at);
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        self.clock.borrow_mut().pending.remove(&token);
    }
}

#[derive(Debug, Default)]
pub(crate) struct ViewState {
    pub canvas_visible: Cell<bool>,
    pub fallback_visible: Cell<bool>,
    pub acquisitions: Cell<u32>,
    pub fail_acquire: Cell<bool>,
    pub pixel_ratio: Cell<f64>,
}

/// A canvas + fallback pair backed by a [`FakeGpu`].
#[derive(Debug, Clone)]
pub(crate) struct FakeView {
    pub gpu: Rc<FakeGpu>,
    pub state: Rc<ViewState>,
}

impl FakeView {
    pub(crate) fn new(gpu: &Rc<FakeGpu>) -> Self {
        Self {
            gpu: Rc::clone(gpu),
            state: Rc::new(ViewState::default()),
        }
    }
}

impl SurfaceView for FakeView {
    type Context = FakeContext;

    fn acquire(&mut self, _attributes: &ContextAttributes) -> Result<Option<FakeContext>> {
        self.state.acquisitions.set(self.state.acquisitions.get() + 1);
        if self.state.fail_acquire.get() {
            return Err(GlError::Acquire("canvas refused a context".into()));
        }
        Ok(Some(self.gpu.context()))
    }

    fn set_canvas_visible(&mut self, visible: bool) {
        self.state.canvas_visible.set(visible);
    }

    fn set_fallback_visible(&mut self, visible: bool) {
        self.state.fallback_visible.set(visible);
    }

    fn apply_pixel_ratio(&mut self, ratio: f64) {
        self.state.pixel_ratio.set(ratio);
    }
}
