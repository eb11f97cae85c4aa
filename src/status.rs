//! Passive, dismissible status banner describing WebGL state.

use serde::Serialize;

use crate::config::BannerTiming;
use crate::monitor::ProbeReport;
use crate::platform::{Scheduler, TimerToken};
use crate::signal::CapabilitySignal;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    pub title: String,
    pub detail: String,
    /// Green indicator when true, amber otherwise.
    pub healthy: bool,
}

impl StatusMessage {
    pub fn describe(signal: CapabilitySignal, report: &ProbeReport) -> Self {
        let title = if let Some(label) = &report.denylisted {
            format!("{label} detected")
        } else if !signal.is_supported {
            "WebGL not supported".to_string()
        } else if signal.is_context_lost {
            "WebGL context lost".to_string()
        } else {
            "WebGL running normally".to_string()
        };
        let detail = if !signal.can_render() || report.denylisted.is_some() {
            "Using optimized 2D animations for better compatibility"
        } else {
            "3D graphics running smoothly"
        };
        Self {
            title,
            detail: detail.to_string(),
            healthy: signal.can_render(),
        }
    }
}

pub struct StatusBanner<S: Scheduler> {
    timing: BannerTiming,
    scheduler: S,
    message: StatusMessage,
    visible: bool,
    hide_timer: Option<TimerToken>,
}

impl<S: Scheduler> StatusBanner<S> {
    pub fn new(timing: BannerTiming, scheduler: S, signal: CapabilitySignal, report: &ProbeReport) -> Self {
        let mut banner = Self {
            timing,
            scheduler,
            message: StatusMessage::describe(signal, report),
            visible: false,
            hide_timer: None,
        };
        banner.update(signal, report);
        banner
    }

    /// Re-evaluates the message and shows the banner when there is something
    /// worth telling the visitor.
    pub fn update(&mut self, signal: CapabilitySignal, report: &ProbeReport) {
        self.message = StatusMessage::describe(signal, report);
        let show_for = if report.denylisted.is_some() {
            Some(self.timing.denylisted)
        } else if !signal.can_render() {
            Some(self.timing.problem)
        } else {
            None
        };
        self.cancel_timer();
        match show_for {
            Some(duration) => {
                self.visible = true;
                self.hide_timer = Some(self.scheduler.schedule(duration));
            }
            None => self.visible = false,
        }
    }

    pub fn dismiss(&mut self) {
        self.cancel_timer();
        self.visible = false;
    }

    pub fn timer_fired(&mut self, token: TimerToken) {
        if self.hide_timer == Some(token) {
            self.hide_timer = None;
            self.visible = false;
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn message(&self) -> &StatusMessage {
        &self.message
    }

    fn cancel_timer(&mut self) {
        if let Some(token) = self.hide_timer.take() {
            self.scheduler.cancel(token);
        }
    }
}

impl<S: Scheduler> Drop for StatusBanner<S> {
    fn drop(&mut self) {
        self.cancel_timer();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::testing::FakeScheduler;

    fn report(denylisted: Option<&str>, supported: bool) -> ProbeReport {
        ProbeReport {
            supported,
            renderer: None,
            vendor: None,
            denylisted: denylisted.map(String::from),
            software: false,
        }
    }

    #[test]
    fn healthy_platform_stays_quiet() {
        let clock = FakeScheduler::default();
        let banner = StatusBanner::new(
            BannerTiming::default(),
            clock.clone(),
            CapabilitySignal::new(true, false),
            &report(None, true),
        );
        assert!(!banner.is_visible());
        assert_eq!(banner.message().title, "WebGL running normally");
        assert_eq!(banner.message().detail, "3D graphics running smoothly");
        assert_eq!(clock.pending(), 0);
    }

    #[test]
    fn context_loss_shows_banner_for_five_seconds() {
        let clock = FakeScheduler::default();
        let mut banner = StatusBanner::new(
            BannerTiming::default(),
            clock.clone(),
            CapabilitySignal::new(true, true),
            &report(None, true),
        );
        assert!(banner.is_visible());
        assert_eq!(banner.message().title, "WebGL context lost");
        assert!(!banner.message().healthy);

        assert!(clock.advance(Duration::from_millis(4999)).is_empty());
        for token in clock.advance(Duration::from_millis(1)) {
            banner.timer_fired(token);
        }
        assert!(!banner.is_visible());
    }

    #[test]
    fn denylisted_hardware_is_named() {
        let clock = FakeScheduler::default();
        let mut banner = StatusBanner::new(
            BannerTiming::default(),
            clock.clone(),
            CapabilitySignal::new(false, false),
            &report(Some("Intel UHD Graphics 620"), false),
        );
        assert_eq!(banner.message().title, "Intel UHD Graphics 620 detected");
        assert_eq!(
            banner.message().detail,
            "Using optimized 2D animations for better compatibility"
        );
        assert!(clock.advance(Duration::from_millis(5000)).is_empty());

        banner.dismiss();
        assert!(!banner.is_visible());
        assert_eq!(clock.pending(), 0);
    }
}
