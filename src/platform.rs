//! Host platform seams.
//!
//! The browser implementations live in `wasm/`; unit tests swap in the fakes
//! from `testing`.

use std::time::Duration;

use crate::error::Result;

/// String-valued `getParameter` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringParam {
    Version,
    Vendor,
    Renderer,
    ShadingLanguageVersion,
}

/// Integer-valued `getParameter` queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntParam {
    MaxTextureSize,
    MaxVertexAttribs,
    MaxTextureImageUnits,
}

/// A live rendering context.
///
/// Dropping the value releases the context. Every query returns an error
/// instead of throwing, so callers decide what a failure means.
pub trait GlContext {
    fn is_context_lost(&self) -> bool;

    fn string_parameter(&self, param: StringParam) -> Result<String>;

    fn int_parameter(&self, param: IntParam) -> Result<i32>;

    fn max_viewport_dims(&self) -> Result<[i32; 2]>;

    /// Unmasked renderer through `WEBGL_debug_renderer_info`, when exposed.
    fn unmasked_renderer(&self) -> Option<String>;

    /// Unmasked vendor through `WEBGL_debug_renderer_info`, when exposed.
    fn unmasked_vendor(&self) -> Option<String>;

    fn supported_extensions(&self) -> Vec<String>;

    /// Unbinds the 2D and cube-map textures of one texture unit.
    fn unbind_texture_unit(&self, unit: u32) -> Result<()>;

    /// Unbinds the array and element-array buffers.
    fn unbind_buffers(&self) -> Result<()>;

    /// Unbinds the framebuffer and renderbuffer.
    fn unbind_framebuffers(&self) -> Result<()>;

    fn clear_program(&self) -> Result<()>;

    /// Forces a loss through `WEBGL_lose_context`. Returns `false` when the
    /// extension is missing.
    fn lose_context(&self) -> bool;

    /// Asks `WEBGL_lose_context` to restore. Returns `false` when the
    /// extension is missing.
    fn restore_context(&self) -> bool;
}

/// Source of throwaway off-screen contexts used for probing and diagnostics.
pub trait ContextProvider {
    type Context: GlContext;

    /// `Ok(None)` means the platform has no WebGL at all.
    fn acquire_offscreen(&self) -> Result<Option<Self::Context>>;
}

/// Identifies a pending timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerToken(pub u64);

/// Fixed-delay one-shot timers.
///
/// The owner is called back with the token when the timer fires; the
/// scheduler itself never runs application logic.
pub trait Scheduler {
    fn schedule(&mut self, delay: Duration) -> TimerToken;

    /// Cancelling an unknown or already-fired token is a no-op.
    fn cancel(&mut self, token: TimerToken);
}
