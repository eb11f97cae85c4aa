//! Context-loss recovery.
//!
//! [`RecoveryCoordinator`] is the retry state machine. It never touches a
//! context on its own: it arms timers through its [`Scheduler`] and answers
//! every input with a [`RecoveryAction`] for the owning surface to carry out.
//! The free functions below are the context-side helpers the surface uses
//! around a recovery attempt.

use std::fmt;

use serde::Serialize;

use crate::config::{Environment, RecoveryPolicy};
use crate::error::GlError;
use crate::platform::{ContextProvider, GlContext, IntParam, Scheduler, StringParam, TimerToken};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryPhase {
    Healthy,
    Lost,
    Recovering,
    /// Retries exhausted. Terminal for the session unless forced.
    FallbackPermanent,
}

/// What the owner should do after feeding the coordinator an input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    None,
    /// A wait window started; the platform may restore on its own.
    AwaitRestore,
    /// The context was confirmed healthy; show it and draw again.
    Resume,
    /// The previous attempt failed and a new window started. The owner should
    /// actively try to get a context back.
    Retry { attempt: u32 },
    /// Give up and keep the fallback.
    PinFallback,
    /// A simulated loss is due to be restored.
    RestoreSimulated,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryStats {
    pub losses: u64,
    pub recoveries_attempted: u64,
    pub recoveries_succeeded: u64,
    pub forced: u64,
}

/// Bounded retry state machine for one render surface.
pub struct RecoveryCoordinator<S: Scheduler> {
    policy: RecoveryPolicy,
    environment: Environment,
    scheduler: S,
    phase: RecoveryPhase,
    attempts: u32,
    wait_timer: Option<TimerToken>,
    simulated_restore: Option<TimerToken>,
    /// Resumes not yet followed by a successfully drawn frame.
    unconfirmed_resumes: u32,
    stats: RecoveryStats,
}

impl<S: Scheduler> RecoveryCoordinator<S> {
    pub fn new(policy: RecoveryPolicy, environment: Environment, scheduler: S) -> Self {
        Self {
            policy,
            environment,
            scheduler,
            phase: RecoveryPhase::Healthy,
            attempts: 0,
            wait_timer: None,
            simulated_restore: None,
            unconfirmed_resumes: 0,
            stats: RecoveryStats::default(),
        }
    }

    pub fn phase(&self) -> RecoveryPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.policy.max_attempts
    }

    pub fn is_recovering(&self) -> bool {
        self.phase == RecoveryPhase::Recovering
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.policy.max_attempts
    }

    pub fn stats(&self) -> RecoveryStats {
        self.stats
    }

    /// Whether a wait window is armed.
    pub fn has_pending_timer(&self) -> bool {
        self.wait_timer.is_some()
    }

    /// A loss notification arrived.
    ///
    /// A loss right after resuming, before any frame was drawn, counts
    /// against the same ceiling as failed restores: a context that keeps
    /// coming back healthy but never draws ends up pinned.
    pub fn context_lost(&mut self) -> RecoveryAction {
        match self.phase {
            RecoveryPhase::Healthy if self.unconfirmed_resumes >= self.policy.max_attempts => {
                self.stats.losses += 1;
                self.attempts = self.unconfirmed_resumes;
                self.phase = RecoveryPhase::FallbackPermanent;
                log::warn!(
                    "WebGL resumed {} times without drawing a frame, keeping fallback visuals",
                    self.unconfirmed_resumes
                );
                RecoveryAction::PinFallback
            }
            RecoveryPhase::Healthy => {
                self.stats.losses += 1;
                log::warn!("WebGL context lost, waiting for restore");
                self.begin_cycle();
                RecoveryAction::AwaitRestore
            }
            // Same episode: the running window already accounts for it.
            RecoveryPhase::Lost | RecoveryPhase::Recovering | RecoveryPhase::FallbackPermanent => {
                RecoveryAction::None
            }
        }
    }

    /// Surface setup threw.
    ///
    /// From `Healthy` this opens an episode like a loss. During recovery the
    /// armed window decides the attempt's fate, so nothing is counted twice.
    pub fn setup_failed(&mut self, err: &GlError) -> RecoveryAction {
        log::error!("render surface setup failed: {err}");
        self.context_lost()
    }

    /// A restore notification arrived; `healthy` is the health check result.
    pub fn context_restored(&mut self, healthy: bool) -> RecoveryAction {
        match (self.phase, healthy) {
            (RecoveryPhase::Lost | RecoveryPhase::Recovering, true) => {
                self.cancel_wait();
                self.attempts = 0;
                self.unconfirmed_resumes += 1;
                self.phase = RecoveryPhase::Healthy;
                self.stats.recoveries_succeeded += 1;
                log::info!("WebGL context restored and healthy");
                RecoveryAction::Resume
            }
            (RecoveryPhase::Lost | RecoveryPhase::Recovering, false) => {
                log::warn!("restored context failed its health check");
                self.fail_attempt()
            }
            (RecoveryPhase::Healthy, false) => self.context_lost(),
            (RecoveryPhase::Healthy, true) | (RecoveryPhase::FallbackPermanent, _) => {
                RecoveryAction::None
            }
        }
    }

    /// The owner drew a frame successfully; the last resume held.
    pub fn frame_drawn(&mut self) {
        if self.phase == RecoveryPhase::Healthy {
            self.unconfirmed_resumes = 0;
        }
    }

    /// Routes a fired timer. Tokens the coordinator does not own are ignored.
    pub fn timer_fired(&mut self, token: TimerToken) -> RecoveryAction {
        if self.simulated_restore == Some(token) {
            self.simulated_restore = None;
            return RecoveryAction::RestoreSimulated;
        }
        if self.wait_timer != Some(token) {
            return RecoveryAction::None;
        }
        self.wait_timer = None;
        if self.phase != RecoveryPhase::Recovering {
            return RecoveryAction::None;
        }
        log::warn!(
            "no restore within {}ms (attempt {})",
            self.policy.recovery_delay.as_millis(),
            self.attempts + 1
        );
        self.fail_attempt()
    }

    /// Manually re-enters `Recovering`, past the attempt ceiling if needed.
    ///
    /// `attempts` is left alone, so a forced cycle that fails pins the
    /// fallback again straight away.
    pub fn force_recovery(&mut self) -> RecoveryAction {
        if self.phase == RecoveryPhase::Healthy {
            return RecoveryAction::None;
        }
        self.stats.forced += 1;
        log::info!("forced recovery after {} attempts", self.attempts);
        self.cancel_wait();
        self.begin_cycle();
        RecoveryAction::Retry {
            attempt: self.attempts,
        }
    }

    /// Development-only: loses `context` through `WEBGL_lose_context` and
    /// schedules its restore. Returns whether a loss was triggered.
    pub fn simulate_loss<C: GlContext>(&mut self, context: &C) -> bool {
        if !self.environment.is_development() {
            log::debug!("context loss simulation is disabled outside development builds");
            return false;
        }
        if !context.lose_context() {
            log::warn!("WEBGL_lose_context extension not available");
            return false;
        }
        log::warn!("simulated WebGL context loss");
        if let Some(token) = self.simulated_restore.take() {
            self.scheduler.cancel(token);
        }
        self.simulated_restore = Some(self.scheduler.schedule(self.policy.simulated_restore_delay));
        true
    }

    /// Cancels every pending timer and abandons an episode in flight. A
    /// pinned fallback and the attempt count survive.
    pub fn shutdown(&mut self) {
        self.cancel_wait();
        if let Some(token) = self.simulated_restore.take() {
            self.scheduler.cancel(token);
        }
        if matches!(self.phase, RecoveryPhase::Lost | RecoveryPhase::Recovering) {
            self.phase = RecoveryPhase::Healthy;
        }
    }

    fn begin_cycle(&mut self) {
        self.phase = RecoveryPhase::Recovering;
        self.stats.recoveries_attempted += 1;
        self.wait_timer = Some(self.scheduler.schedule(self.policy.recovery_delay));
    }

    fn cancel_wait(&mut self) {
        if let Some(token) = self.wait_timer.take() {
            self.scheduler.cancel(token);
        }
    }

    fn fail_attempt(&mut self) -> RecoveryAction {
        self.cancel_wait();
        self.attempts += 1;
        self.phase = RecoveryPhase::Lost;
        if self.is_exhausted() {
            self.phase = RecoveryPhase::FallbackPermanent;
            log::warn!(
                "WebGL recovery gave up after {} attempts, keeping fallback visuals",
                self.attempts
            );
            return RecoveryAction::PinFallback;
        }
        self.begin_cycle();
        RecoveryAction::Retry {
            attempt: self.attempts,
        }
    }
}

impl<S: Scheduler> Drop for RecoveryCoordinator<S> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<S: Scheduler> fmt::Debug for RecoveryCoordinator<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecoveryCoordinator")
            .field("phase", &self.phase)
            .field("attempts", &self.attempts)
            .field("max_attempts", &self.policy.max_attempts)
            .field("wait_timer", &self.wait_timer)
            .field("unconfirmed_resumes", &self.unconfirmed_resumes)
            .finish()
    }
}

/// Unbinds every texture unit, buffer, framebuffer and the active program so
/// nothing references GPU objects that died with the context. Failures are
/// logged and skipped.
pub fn cleanup_resources<C: GlContext>(context: &C) {
    let units = match context.int_parameter(IntParam::MaxTextureImageUnits) {
        Ok(units) => u32::try_from(units).unwrap_or(0),
        Err(err) => {
            log::error!("error during WebGL cleanup: {err}");
            0
        }
    };
    let mut failures = 0usize;
    for unit in 0..units {
        if let Err(err) = context.unbind_texture_unit(unit) {
            log::debug!("texture unit {unit}: {err}");
            failures += 1;
        }
    }
    for result in [
        context.unbind_buffers(),
        context.unbind_framebuffers(),
        context.clear_program(),
    ] {
        if let Err(err) = result {
            log::debug!("{err}");
            failures += 1;
        }
    }
    if failures == 0 {
        log::debug!("WebGL resources cleaned up for recovery");
    } else {
        log::error!("WebGL cleanup skipped {failures} bindings");
    }
}

/// A context is healthy when a trivial query works and it is not lost.
pub fn is_context_healthy<C: GlContext>(context: &C) -> bool {
    context.string_parameter(StringParam::Version).is_ok() && !context.is_context_lost()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlInfo {
    pub version: String,
    pub vendor: String,
    pub renderer: String,
    pub shading_language_version: String,
    pub max_texture_size: i32,
    pub max_viewport_dims: [i32; 2],
    pub max_vertex_attribs: i32,
    pub extensions: Vec<String>,
    pub context_lost: bool,
}

/// Debug snapshot. Either complete or an explicit error, never partial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Diagnostics {
    Available(GlInfo),
    Unavailable { error: String },
}

impl Diagnostics {
    pub fn is_available(&self) -> bool {
        matches!(self, Diagnostics::Available(_))
    }
}

/// Builds a [`Diagnostics`] snapshot from a fresh off-screen context.
pub fn diagnostics<P: ContextProvider>(provider: &P) -> Diagnostics {
    match gather_info(provider) {
        Ok(info) => Diagnostics::Available(info),
        Err(err) => Diagnostics::Unavailable {
            error: err.to_string(),
        },
    }
}

fn gather_info<P: ContextProvider>(provider: &P) -> Result<GlInfo, GlError> {
    let context = provider.acquire_offscreen()?.ok_or(GlError::Unavailable)?;
    Ok(GlInfo {
        version: context.string_parameter(StringParam::Version)?,
        vendor: context.string_parameter(StringParam::Vendor)?,
        renderer: context
            .unmasked_renderer()
            .unwrap_or_else(|| "Unknown".to_string()),
        shading_language_version: context.string_parameter(StringParam::ShadingLanguageVersion)?,
        max_texture_size: context.int_parameter(IntParam::MaxTextureSize)?,
        max_viewport_dims: context.max_viewport_dims()?,
        max_vertex_attribs: context.int_parameter(IntParam::MaxVertexAttribs)?,
        extensions: context.supported_extensions(),
        context_lost: context.is_context_lost(),
    })
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::{FakeGpu, FakeProvider, FakeScheduler, ProviderOutcome};

    fn coordinator(max_attempts: u32) -> (RecoveryCoordinator<FakeScheduler>, FakeScheduler) {
        let scheduler = FakeScheduler::default();
        let policy = RecoveryPolicy {
            max_attempts,
            ..RecoveryPolicy::default()
        };
        let coordinator = RecoveryCoordinator::new(policy, Environment::Development, scheduler.clone());
        (coordinator, scheduler)
    }

    #[test]
    fn healthy_restore_resets_attempts() {
        let (mut rc, clock) = coordinator(3);
        assert_eq!(rc.context_lost(), RecoveryAction::AwaitRestore);
        assert!(rc.is_recovering());
        assert_eq!(clock.pending(), 1);

        assert_eq!(rc.context_restored(false), RecoveryAction::Retry { attempt: 1 });
        assert_eq!(rc.context_restored(true), RecoveryAction::Resume);
        assert_eq!(rc.phase(), RecoveryPhase::Healthy);
        assert_eq!(rc.attempts(), 0);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn restore_within_window_resumes() {
        let (mut rc, clock) = coordinator(3);
        rc.context_lost();
        assert!(clock.advance(Duration::from_millis(500)).is_empty());
        assert_eq!(rc.context_restored(true), RecoveryAction::Resume);
        assert_eq!(rc.attempts(), 0);
    }

    #[test]
    fn unhealthy_restores_exhaust_attempts() {
        let (mut rc, clock) = coordinator(3);
        for attempt in 1..=2 {
            rc.context_lost();
            assert_eq!(rc.context_restored(false), RecoveryAction::Retry { attempt });
        }
        rc.context_lost();
        assert_eq!(rc.context_restored(false), RecoveryAction::PinFallback);
        assert_eq!(rc.phase(), RecoveryPhase::FallbackPermanent);
        assert_eq!(clock.pending(), 0, "no further automatic timer");

        assert_eq!(rc.context_lost(), RecoveryAction::None);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn overdue_restore_counts_as_failed_attempt() {
        let (mut rc, clock) = coordinator(2);
        rc.context_lost();
        let fired = clock.advance(Duration::from_millis(2000));
        assert_eq!(fired.len(), 1);
        assert_eq!(rc.timer_fired(fired[0]), RecoveryAction::Retry { attempt: 1 });

        let fired = clock.advance(Duration::from_millis(2000));
        assert_eq!(rc.timer_fired(fired[0]), RecoveryAction::PinFallback);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn stale_timer_tokens_are_ignored() {
        let (mut rc, clock) = coordinator(3);
        rc.context_lost();
        let token = TimerToken(0);
        rc.context_restored(true);
        assert_eq!(rc.timer_fired(token), RecoveryAction::None);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn force_recovery_reenters_once_per_call() {
        let (mut rc, clock) = coordinator(2);
        rc.context_lost();
        rc.context_restored(false);
        rc.context_restored(false);
        assert_eq!(rc.phase(), RecoveryPhase::FallbackPermanent);

        assert_eq!(rc.force_recovery(), RecoveryAction::Retry { attempt: 2 });
        assert!(rc.is_recovering());
        assert_eq!(clock.pending(), 1);

        assert_eq!(rc.context_restored(false), RecoveryAction::PinFallback);
        assert_eq!(rc.attempts(), 3);
        assert_eq!(clock.pending(), 0);

        assert_eq!(rc.force_recovery(), RecoveryAction::Retry { attempt: 3 });
        assert_eq!(rc.context_restored(true), RecoveryAction::Resume);
        assert_eq!(rc.attempts(), 0);
        assert_eq!(rc.stats().forced, 2);
    }

    #[test]
    fn resumes_that_never_draw_pin_fallback() {
        let (mut rc, clock) = coordinator(2);
        for _ in 0..2 {
            assert_eq!(rc.context_lost(), RecoveryAction::AwaitRestore);
            assert_eq!(rc.context_restored(true), RecoveryAction::Resume);
            assert_eq!(rc.attempts(), 0);
        }
        assert_eq!(rc.context_lost(), RecoveryAction::PinFallback);
        assert_eq!(rc.phase(), RecoveryPhase::FallbackPermanent);
        assert!(rc.is_exhausted());
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn drawn_frame_confirms_resume() {
        let (mut rc, _clock) = coordinator(2);
        for _ in 0..5 {
            assert_eq!(rc.context_lost(), RecoveryAction::AwaitRestore);
            assert_eq!(rc.context_restored(true), RecoveryAction::Resume);
            rc.frame_drawn();
        }
        assert_eq!(rc.phase(), RecoveryPhase::Healthy);
        assert_eq!(rc.stats().losses, 5);
    }

    #[test]
    fn force_recovery_is_noop_when_healthy() {
        let (mut rc, clock) = coordinator(3);
        assert_eq!(rc.force_recovery(), RecoveryAction::None);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn setup_failure_opens_an_episode_once() {
        let (mut rc, clock) = coordinator(3);
        let err = GlError::Setup("shader compile".into());
        assert_eq!(rc.setup_failed(&err), RecoveryAction::AwaitRestore);
        assert_eq!(rc.setup_failed(&err), RecoveryAction::None);
        assert_eq!(rc.attempts(), 0);
        assert_eq!(clock.pending(), 1);
    }

    #[test]
    fn simulate_loss_is_noop_in_production() {
        let clock = FakeScheduler::default();
        let mut rc = RecoveryCoordinator::new(RecoveryPolicy::default(), Environment::Production, clock.clone());
        let gpu = FakeGpu::new(None);
        let context = gpu.context();

        assert!(!rc.simulate_loss(&context));
        assert!(!gpu.lost.get());
        assert!(gpu.calls().is_empty());
        assert_eq!(clock.pending(), 0);
        assert_eq!(rc.phase(), RecoveryPhase::Healthy);
    }

    #[test]
    fn simulate_loss_schedules_restore_in_development() {
        let (mut rc, clock) = coordinator(3);
        let gpu = FakeGpu::new(None);
        let context = gpu.context();

        assert!(rc.simulate_loss(&context));
        assert!(gpu.lost.get());
        let fired = clock.advance(Duration::from_millis(2000));
        assert_eq!(rc.timer_fired(fired[0]), RecoveryAction::RestoreSimulated);
    }

    #[test]
    fn simulate_loss_without_extension_does_nothing() {
        let (mut rc, clock) = coordinator(3);
        let gpu = FakeGpu::new(None);
        gpu.lose_extension.set(false);
        assert!(!rc.simulate_loss(&gpu.context()));
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn shutdown_keeps_pinned_fallback() {
        let (mut rc, clock) = coordinator(1);
        rc.context_lost();
        rc.context_restored(false);
        rc.shutdown();
        assert_eq!(rc.phase(), RecoveryPhase::FallbackPermanent);

        let (mut rc, _) = coordinator(3);
        rc.context_lost();
        rc.shutdown();
        assert_eq!(rc.phase(), RecoveryPhase::Healthy);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn dropping_coordinator_cancels_timers() {
        let (mut rc, clock) = coordinator(3);
        rc.context_lost();
        drop(rc);
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn cleanup_unbinds_everything() {
        let gpu = FakeGpu::new(None);
        cleanup_resources(&gpu.context());
        assert_eq!(
            gpu.calls(),
            [
                "texture_unit:0",
                "texture_unit:1",
                "texture_unit:2",
                "texture_unit:3",
                "buffers",
                "framebuffers",
                "program",
            ]
        );
    }

    #[test]
    fn cleanup_swallows_failures() {
        let gpu = FakeGpu::new(None);
        gpu.unbind_fails.set(true);
        cleanup_resources(&gpu.context());
        assert_eq!(gpu.calls().len(), 7, "every binding is still attempted");
    }

    #[test]
    fn health_check_detects_lost_and_broken_contexts() {
        let gpu = FakeGpu::new(None);
        let context = gpu.context();
        assert!(is_context_healthy(&context));
        gpu.lost.set(true);
        assert!(!is_context_healthy(&context));
        gpu.lost.set(false);
        gpu.version_fails.set(true);
        assert!(!is_context_healthy(&context));
    }

    #[test]
    fn diagnostics_report_error_marker() {
        let provider = FakeProvider {
            outcome: ProviderOutcome::Missing,
        };
        assert_eq!(
            diagnostics(&provider),
            Diagnostics::Unavailable {
                error: "WebGL not supported".into()
            }
        );

        let gpu = FakeGpu::new(Some("Fake GPU"));
        gpu.version_fails.set(true);
        assert!(!diagnostics(&FakeProvider::with_gpu(&gpu)).is_available());
    }

    #[test]
    fn diagnostics_snapshot() {
        let gpu = FakeGpu::new(Some("Fake GPU"));
        let Diagnostics::Available(info) = diagnostics(&FakeProvider::with_gpu(&gpu)) else {
            panic!("expected diagnostics");
        };
        assert_eq!(info.renderer, "Fake GPU");
        assert_eq!(info.max_viewport_dims, [4096, 4096]);
        assert!(!info.context_lost);
        assert_eq!(gpu.live_contexts.get(), 0);
    }
}
