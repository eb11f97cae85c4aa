//! The resilient rendering boundary.
//!
//! Visual components draw through a [`ResilientRenderSurface`] and nothing
//! else. Whatever goes wrong (no WebGL, a throwing setup, a lost context, a
//! failing draw), the surface ends up showing either the scene or the
//! fallback visual, never a broken canvas.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use serde::Serialize;

use crate::config::GuardConfig;
use crate::error::{GlError, Result};
use crate::monitor::CapabilityMonitor;
use crate::platform::{GlContext, Scheduler, TimerToken};
use crate::quality::{ContextAttributes, FrameLoop, QualityProfile};
use crate::recovery::{
    cleanup_resources, is_context_healthy, RecoveryAction, RecoveryCoordinator, RecoveryPhase,
    RecoveryStats,
};
use crate::signal::{CapabilityReader, LossReporter, Subscription};

/// Something to draw. Constructing one must not touch the GPU; all GPU work
/// happens in [`Scene::setup`] and [`Scene::draw`].
pub trait Scene<C: GlContext> {
    /// Creates GPU resources. Called again after every restore, since a lost
    /// context takes its resources with it.
    fn setup(&mut self, context: &C, quality: &QualityProfile) -> Result<()>;

    fn draw(&mut self, context: &C, time_ms: f64) -> Result<()>;
}

/// The canvas and the fallback element the surface toggles between.
pub trait SurfaceView {
    type Context: GlContext;

    /// Creates (or re-fetches) the canvas context.
    fn acquire(&mut self, attributes: &ContextAttributes) -> Result<Option<Self::Context>>;

    /// Hides or shows the canvas without removing it.
    fn set_canvas_visible(&mut self, visible: bool);

    fn set_fallback_visible(&mut self, visible: bool);

    fn apply_pixel_ratio(&mut self, ratio: f64);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SurfaceMode {
    Rendering,
    Recovering,
    FallbackPermanent,
}

pub struct ResilientRenderSurface<V, S, C>
where
    V: SurfaceView,
    S: Scheduler,
    C: Scene<V::Context>,
{
    view: V,
    scene: C,
    context: Option<V::Context>,
    coordinator: RecoveryCoordinator<S>,
    reader: CapabilityReader,
    reporter: LossReporter,
    quality: QualityProfile,
    device_pixel_ratio: f64,
    subscription: Option<Subscription>,
    signal_changed: Rc<Cell<bool>>,
    mounted: bool,
    dirty: bool,
}

impl<V, S, C> ResilientRenderSurface<V, S, C>
where
    V: SurfaceView,
    S: Scheduler,
    C: Scene<V::Context>,
{
    pub fn new(monitor: &CapabilityMonitor, config: &GuardConfig, view: V, scene: C, scheduler: S) -> Self {
        Self {
            view,
            scene,
            context: None,
            coordinator: RecoveryCoordinator::new(config.recovery, config.environment, scheduler),
            reader: monitor.reader(),
            reporter: monitor.surface_reporter(),
            quality: QualityProfile::for_probe(monitor.report(), config),
            device_pixel_ratio: 1.0,
            subscription: None,
            signal_changed: Rc::new(Cell::new(false)),
            mounted: false,
            dirty: false,
        }
    }

    /// Overrides the probe-derived quality profile.
    pub fn with_quality(mut self, quality: QualityProfile) -> Self {
        self.quality = quality;
        self
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f64) {
        self.device_pixel_ratio = ratio;
        if self.context.is_some() {
            self.view.apply_pixel_ratio(self.quality.clamp_pixel_ratio(ratio));
            self.dirty = true;
        }
    }

    pub fn mode(&self) -> SurfaceMode {
        let signal = self.reader.signal();
        if !signal.is_supported {
            return SurfaceMode::FallbackPermanent;
        }
        match self.coordinator.phase() {
            RecoveryPhase::FallbackPermanent => SurfaceMode::FallbackPermanent,
            RecoveryPhase::Lost | RecoveryPhase::Recovering => SurfaceMode::Recovering,
            RecoveryPhase::Healthy if signal.is_context_lost => SurfaceMode::Recovering,
            RecoveryPhase::Healthy => SurfaceMode::Rendering,
        }
    }

    pub fn recovery_attempts(&self) -> u32 {
        self.coordinator.attempts()
    }

    pub fn recovery_stats(&self) -> RecoveryStats {
        self.coordinator.stats()
    }

    pub fn quality(&self) -> &QualityProfile {
        &self.quality
    }

    pub fn reporter(&self) -> &LossReporter {
        &self.reporter
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn has_context(&self) -> bool {
        self.context.is_some()
    }

    /// Shows the scene if the platform can render, the fallback otherwise.
    pub fn mount(&mut self) {
        if self.mounted {
            return;
        }
        self.mounted = true;
        let flag = Rc::clone(&self.signal_changed);
        let flag_restored = Rc::clone(&self.signal_changed);
        self.subscription = Some(
            self.reader
                .subscribe_fn(move |_| flag.set(true), move |_| flag_restored.set(true)),
        );

        let signal = self.reader.signal();
        if self.coordinator.phase() == RecoveryPhase::FallbackPermanent {
            self.show_fallback();
            return;
        }
        if !signal.can_render() {
            log::info!(
                "{:?}: rendering fallback ({})",
                self.reporter.source(),
                if signal.is_supported { "context lost" } else { "WebGL unavailable" }
            );
            self.show_fallback();
            return;
        }
        if let Err(err) = self.establish() {
            self.setup_failed(err);
        }
    }

    /// Releases the context, timers and subscription. A fallback pinned by
    /// exhausted retries stays pinned across remounts.
    pub fn unmount(&mut self) {
        if !self.mounted {
            return;
        }
        self.mounted = false;
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
        self.coordinator.shutdown();
        self.reporter.release();
        self.context = None;
        self.show_fallback();
    }

    /// Marks the scene for redraw in [`FrameLoop::Demand`] mode.
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    /// Draws one frame if the surface is rendering. Draw errors are caught
    /// and handled like a context loss.
    pub fn render_frame(&mut self, time_ms: f64) {
        self.sync();
        if !self.mounted || self.mode() != SurfaceMode::Rendering {
            return;
        }
        if self.quality.frame_loop == FrameLoop::Demand && !self.dirty {
            return;
        }
        let Some(context) = self.context.as_ref() else {
            return;
        };
        match self.scene.draw(context, time_ms) {
            Ok(()) => {
                self.dirty = false;
                self.coordinator.frame_drawn();
            }
            Err(err) => {
                log::error!("{:?}: draw failed: {err}", self.reporter.source());
                self.handle_context_lost();
            }
        }
    }

    /// The canvas reported `webglcontextlost`.
    pub fn handle_context_lost(&mut self) {
        if !self.mounted {
            return;
        }
        if let Some(context) = self.context.as_ref() {
            cleanup_resources(context);
        }
        self.show_fallback();
        self.reporter.lost();
        let action = self.coordinator.context_lost();
        self.apply(action);
    }

    /// The canvas reported `webglcontextrestored`.
    pub fn handle_context_restored(&mut self) {
        if !self.mounted
            || matches!(
                self.coordinator.phase(),
                RecoveryPhase::Healthy | RecoveryPhase::FallbackPermanent
            )
        {
            return;
        }
        let healthy = match self.context.as_ref() {
            Some(context) if is_context_healthy(context) => {
                match self.scene.setup(context, &self.quality) {
                    Ok(()) => true,
                    Err(err) => {
                        log::error!("scene setup after restore failed: {err}");
                        false
                    }
                }
            }
            _ => false,
        };
        let action = self.coordinator.context_restored(healthy);
        self.apply(action);
    }

    /// Routes a fired timer back into recovery.
    pub fn handle_timer(&mut self, token: TimerToken) {
        let action = self.coordinator.timer_fired(token);
        self.apply(action);
    }

    /// Manual escape hatch after recovery gave up.
    pub fn force_recovery(&mut self) {
        if !self.mounted {
            return;
        }
        let action = self.coordinator.force_recovery();
        self.apply(action);
    }

    /// Development-only context loss for exercising recovery.
    pub fn simulate_loss(&mut self) -> bool {
        match self.context.as_ref() {
            Some(context) => self.coordinator.simulate_loss(context),
            None => false,
        }
    }

    /// Picks up capability changes published since the last call.
    ///
    /// Losses reported elsewhere (the window, a sibling surface) swap in the
    /// fallback but keep this surface's context; their restore swaps the
    /// canvas back once the context checks out. Episodes of this surface's
    /// own are left to the coordinator.
    pub fn sync(&mut self) {
        if !self.signal_changed.replace(false) {
            return;
        }
        if !self.mounted || self.coordinator.phase() != RecoveryPhase::Healthy {
            return;
        }
        let can_render = self.reader.signal().can_render();
        match self.context.as_ref() {
            Some(_) if !can_render => {
                log::info!("{:?}: capability lost elsewhere, showing fallback", self.reporter.source());
                self.show_fallback();
            }
            Some(context) if is_context_healthy(context) => self.show_canvas(),
            Some(_) => {
                log::warn!("{:?}: context unusable after restore", self.reporter.source());
                self.handle_context_lost();
            }
            // Mounted while another source was lost: try again once it's back.
            None if can_render => {
                log::info!("{:?}: capability restored, mounting scene", self.reporter.source());
                if let Err(err) = self.establish() {
                    self.setup_failed(err);
                }
            }
            None => {}
        }
    }

    fn apply(&mut self, action: RecoveryAction) {
        match action {
            RecoveryAction::None | RecoveryAction::AwaitRestore => {}
            RecoveryAction::Resume => {
                self.reporter.restored();
                // Another source may still hold the signal; `sync` catches up.
                if self.reader.signal().can_render() {
                    self.show_canvas();
                }
            }
            RecoveryAction::Retry { attempt } => self.retry(attempt),
            RecoveryAction::PinFallback => {
                self.context = None;
                self.show_fallback();
                // A pinned surface no longer holds the shared signal down.
                self.reporter.release();
            }
            RecoveryAction::RestoreSimulated => {
                if let Some(context) = self.context.as_ref() {
                    if context.restore_context() {
                        log::info!("simulated loss: context restore requested");
                    }
                }
            }
        }
    }

    fn retry(&mut self, attempt: u32) {
        log::info!("{:?}: recovery attempt {}", self.reporter.source(), attempt + 1);
        if let Some(context) = self.context.as_ref() {
            cleanup_resources(context);
            if context.is_context_lost() {
                // The restored event will report back.
                if !context.restore_context() {
                    log::debug!("WEBGL_lose_context unavailable, waiting on the platform");
                }
                return;
            }
        }
        // No context, or one that is alive but broken: start over.
        self.context = None;
        match self.establish() {
            Ok(()) => {
                let action = self.coordinator.context_restored(true);
                self.apply(action);
            }
            Err(err) => {
                // The armed window will count this attempt.
                log::warn!("recovery attempt {} failed: {err}", attempt + 1);
            }
        }
    }

    fn establish(&mut self) -> Result<()> {
        let attributes = self.quality.attributes();
        let context = self
            .view
            .acquire(&attributes)?
            .ok_or_else(|| GlError::Acquire("canvas returned no WebGL context".into()))?;
        if !is_context_healthy(&context) {
            return Err(GlError::ContextLost);
        }
        self.view
            .apply_pixel_ratio(self.quality.clamp_pixel_ratio(self.device_pixel_ratio));
        self.scene.setup(&context, &self.quality)?;
        self.context = Some(context);
        self.dirty = true;
        if self.coordinator.phase() == RecoveryPhase::Healthy {
            self.show_canvas();
        }
        Ok(())
    }

    fn setup_failed(&mut self, err: GlError) {
        self.context = None;
        self.show_fallback();
        self.reporter.lost();
        let action = self.coordinator.setup_failed(&err);
        self.apply(action);
    }

    fn show_canvas(&mut self) {
        self.view.set_fallback_visible(false);
        self.view.set_canvas_visible(true);
        self.dirty = true;
    }

    fn show_fallback(&mut self) {
        self.view.set_canvas_visible(false);
        self.view.set_fallback_visible(true);
    }
}

impl<V, S, C> Drop for ResilientRenderSurface<V, S, C>
where
    V: SurfaceView,
    S: Scheduler,
    C: Scene<V::Context>,
{
    fn drop(&mut self) {
        self.unmount();
    }
}

impl<V, S, C> fmt::Debug for ResilientRenderSurface<V, S, C>
where
    V: SurfaceView,
    S: Scheduler,
    C: Scene<V::Context>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResilientRenderSurface")
            .field("source", &self.reporter.source())
            .field("mode", &self.mode())
            .field("coordinator", &self.coordinator)
            .field("mounted", &self.mounted)
            .finish()
    }
}
