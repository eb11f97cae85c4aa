//! WebGL capability probing and the owner of the capability signal.

use std::fmt;

use serde::Serialize;

use crate::config::GuardConfig;
use crate::platform::{ContextProvider, GlContext};
use crate::signal::{
    CapabilityListener, CapabilityReader, CapabilitySignal, LossReporter, LossSource, SharedSignal,
    SignalState, Subscription,
};

/// What the probe found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeReport {
    pub supported: bool,
    pub renderer: Option<String>,
    pub vendor: Option<String>,
    /// Label of the denylist rule that matched, e.g. `"Intel UHD Graphics 620"`.
    pub denylisted: Option<String>,
    pub software: bool,
}

impl ProbeReport {
    pub fn unsupported() -> Self {
        Self {
            supported: false,
            renderer: None,
            vendor: None,
            denylisted: None,
            software: false,
        }
    }
}

/// Acquires a throwaway context and decides whether WebGL may be used.
///
/// Never fails: an error or a missing context yields an unsupported report,
/// and a denylisted renderer overrides a successful acquisition. The probe
/// context is dropped before returning.
pub fn probe<P: ContextProvider>(provider: &P, config: &GuardConfig) -> ProbeReport {
    let context = match provider.acquire_offscreen() {
        Ok(Some(context)) => context,
        Ok(None) => {
            log::warn!("WebGL is not available on this platform");
            return ProbeReport::unsupported();
        }
        Err(err) => {
            log::error!("WebGL support check failed: {err}");
            return ProbeReport::unsupported();
        }
    };

    let renderer = context.unmasked_renderer();
    let vendor = context.unmasked_vendor();
    drop(context);

    let Some(name) = renderer.as_deref() else {
        // No debug extension; nothing to match against.
        return ProbeReport {
            supported: true,
            renderer: None,
            vendor,
            denylisted: None,
            software: false,
        };
    };
    log::info!("WebGL renderer: {name}");

    let software = config.is_software(name);
    if software {
        log::warn!("software rendering detected, 3D performance may be limited");
    }

    let denylisted = config.denylist.find(name).map(|rule| rule.all_of.join(" "));
    if let Some(label) = &denylisted {
        log::warn!("{label} is denylisted, using fallback visuals");
    }

    ProbeReport {
        supported: denylisted.is_none(),
        renderer,
        vendor,
        denylisted,
        software,
    }
}

/// Single source of truth for "can we attempt GPU rendering right now".
///
/// One monitor exists per page session. Consumers read through
/// [`CapabilityMonitor::reader`]; loss and restore reports arrive through
/// [`LossReporter`]s handed out here.
pub struct CapabilityMonitor {
    report: ProbeReport,
    state: SharedSignal,
}

impl CapabilityMonitor {
    pub fn new(report: ProbeReport) -> Self {
        let state = SignalState::shared(report.supported);
        Self { report, state }
    }

    pub fn probe<P: ContextProvider>(provider: &P, config: &GuardConfig) -> Self {
        Self::new(probe(provider, config))
    }

    pub fn report(&self) -> &ProbeReport {
        &self.report
    }

    pub fn signal(&self) -> CapabilitySignal {
        self.reader().signal()
    }

    pub fn reader(&self) -> CapabilityReader {
        CapabilityReader::new(self.state.clone())
    }

    pub fn subscribe(&self, listener: std::rc::Rc<dyn CapabilityListener>) -> Subscription {
        self.reader().subscribe(listener)
    }

    pub fn subscribe_fn<L, R>(&self, on_lost: L, on_restored: R) -> Subscription
    where
        L: Fn(CapabilitySignal) + 'static,
        R: Fn(CapabilitySignal) + 'static,
    {
        self.reader().subscribe_fn(on_lost, on_restored)
    }

    /// Reporter for window-scope notifications.
    pub fn window_reporter(&self) -> LossReporter {
        LossReporter::new(self.state.clone(), LossSource::Window)
    }

    /// Registers a new render surface and returns its reporter.
    pub fn surface_reporter(&self) -> LossReporter {
        let id = self.state.borrow_mut().allocate_surface();
        LossReporter::new(self.state.clone(), LossSource::Surface(id))
    }
}

impl fmt::Debug for CapabilityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityMonitor")
            .field("report", &self.report)
            .field("signal", &self.signal())
            .finish()
    }
}
