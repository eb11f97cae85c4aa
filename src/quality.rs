//! Proactive quality degradation for constrained hardware.

use crate::config::GuardConfig;
use crate::monitor::ProbeReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerPreference {
    Default,
    HighPerformance,
    LowPower,
}

/// Attributes passed to `getContext`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContextAttributes {
    pub alpha: bool,
    pub antialias: bool,
    pub power_preference: PowerPreference,
    pub fail_if_major_performance_caveat: bool,
    pub preserve_drawing_buffer: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLoop {
    /// Draw every animation frame.
    Always,
    /// Draw only after the scene was invalidated.
    Demand,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityProfile {
    /// Device-pixel-ratio clamp, `(min, max)`.
    pub pixel_ratio: (f64, f64),
    pub antialias: bool,
    /// Frame-rate fraction the scene may fall to before it throttles itself.
    pub performance_min: f32,
    pub frame_loop: FrameLoop,
    pub degraded: bool,
}

impl QualityProfile {
    pub fn full() -> Self {
        Self {
            pixel_ratio: (1.0, 2.0),
            antialias: true,
            performance_min: 0.3,
            frame_loop: FrameLoop::Always,
            degraded: false,
        }
    }

    pub fn reduced() -> Self {
        Self {
            pixel_ratio: (1.0, 1.0),
            antialias: false,
            performance_min: 0.5,
            frame_loop: FrameLoop::Demand,
            degraded: true,
        }
    }

    pub fn for_probe(report: &ProbeReport, config: &GuardConfig) -> Self {
        let low_end = report.software
            || report
                .renderer
                .as_deref()
                .is_some_and(|renderer| config.is_low_end(renderer));
        if low_end {
            log::info!("low-end renderer detected, reducing render quality");
            Self::reduced()
        } else {
            Self::full()
        }
    }

    pub fn clamp_pixel_ratio(&self, device_pixel_ratio: f64) -> f64 {
        let (min, max) = self.pixel_ratio;
        if device_pixel_ratio.is_finite() {
            device_pixel_ratio.clamp(min, max)
        } else {
            min
        }
    }

    pub fn attributes(&self) -> ContextAttributes {
        ContextAttributes {
            alpha: true,
            antialias: self.antialias,
            power_preference: PowerPreference::HighPerformance,
            fail_if_major_performance_caveat: false,
            preserve_drawing_buffer: false,
        }
    }
}

impl Default for QualityProfile {
    fn default() -> Self {
        Self::full()
    }
}
