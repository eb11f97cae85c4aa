//! The process-wide capability signal and its subscription handles.
//!
//! [`CapabilityMonitor`](crate::monitor::CapabilityMonitor) owns the state.
//! Consumers get a [`CapabilityReader`], which can read and subscribe but
//! never write. Loss and restore reports come in through a [`LossReporter`]
//! bound to one [`LossSource`].

use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::Serialize;

/// Snapshot of what the platform can do right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitySignal {
    pub is_supported: bool,
    pub is_context_lost: bool,
    pub can_render: bool,
}

impl CapabilitySignal {
    pub fn new(is_supported: bool, is_context_lost: bool) -> Self {
        Self {
            is_supported,
            is_context_lost,
            can_render: is_supported && !is_context_lost,
        }
    }

    pub fn can_render(&self) -> bool {
        self.can_render
    }
}

/// Identifies a render surface registered with the monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(pub u32);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Where a loss notification came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LossSource {
    /// Window-scope `webglcontextlost` / `webglcontextrestored`.
    Window,
    Surface(SurfaceId),
}

/// Receives aggregate loss / restore transitions.
pub trait CapabilityListener {
    fn context_lost(&self, signal: CapabilitySignal);

    fn context_restored(&self, signal: CapabilitySignal);
}

struct FnListener<L, R> {
    on_lost: L,
    on_restored: R,
}

impl<L, R> CapabilityListener for FnListener<L, R>
where
    L: Fn(CapabilitySignal),
    R: Fn(CapabilitySignal),
{
    fn context_lost(&self, signal: CapabilitySignal) {
        (self.on_lost)(signal);
    }

    fn context_restored(&self, signal: CapabilitySignal) {
        (self.on_restored)(signal);
    }
}

struct Registration {
    id: u64,
    /// Live `Subscription` handles sharing this registration.
    handles: usize,
    listener: Rc<dyn CapabilityListener>,
}

pub(crate) struct SignalState {
    is_supported: bool,
    lost: BTreeSet<LossSource>,
    registrations: Vec<Registration>,
    next_registration: u64,
    next_surface: u32,
}

pub(crate) type SharedSignal = Rc<RefCell<SignalState>>;

enum Transition {
    Lost,
    Restored,
}

impl SignalState {
    pub(crate) fn shared(is_supported: bool) -> SharedSignal {
        Rc::new(RefCell::new(SignalState {
            is_supported,
            lost: BTreeSet::new(),
            registrations: Vec::new(),
            next_registration: 0,
            next_surface: 0,
        }))
    }

    fn signal(&self) -> CapabilitySignal {
        CapabilitySignal::new(self.is_supported, !self.lost.is_empty())
    }

    pub(crate) fn allocate_surface(&mut self) -> SurfaceId {
        let id = SurfaceId(self.next_surface);
        self.next_surface += 1;
        id
    }
}

fn same_listener(a: &Rc<dyn CapabilityListener>, b: &Rc<dyn CapabilityListener>) -> bool {
    // Compare data pointers only; vtables may be duplicated across codegen units.
    Rc::as_ptr(a) as *const () == Rc::as_ptr(b) as *const ()
}

fn subscribe(state: &SharedSignal, listener: Rc<dyn CapabilityListener>) -> Subscription {
    let mut inner = state.borrow_mut();
    let id = match inner
        .registrations
        .iter_mut()
        .find(|reg| same_listener(&reg.listener, &listener))
    {
        Some(reg) => {
            reg.handles += 1;
            reg.id
        }
        None => {
            let id = inner.next_registration;
            inner.next_registration += 1;
            inner.registrations.push(Registration {
                id,
                handles: 1,
                listener,
            });
            id
        }
    };
    Subscription {
        state: Rc::downgrade(state),
        id: Cell::new(Some(id)),
    }
}

/// Applies a loss or restore for `source` and notifies listeners when the
/// aggregate flag flips. No borrow is held while listeners run.
fn report(state: &SharedSignal, source: LossSource, lost: bool) {
    let (transition, signal, listeners) = {
        let mut inner = state.borrow_mut();
        let was_lost = !inner.lost.is_empty();
        if lost {
            inner.lost.insert(source);
        } else {
            inner.lost.remove(&source);
        }
        let is_lost = !inner.lost.is_empty();
        let transition = match (was_lost, is_lost) {
            (false, true) => Transition::Lost,
            (true, false) => Transition::Restored,
            _ => return,
        };
        let listeners: Vec<_> = inner
            .registrations
            .iter()
            .map(|reg| Rc::clone(&reg.listener))
            .collect();
        (transition, inner.signal(), listeners)
    };

    match transition {
        Transition::Lost => {
            log::warn!("WebGL context lost ({source:?})");
            for listener in &listeners {
                listener.context_lost(signal);
            }
        }
        Transition::Restored => {
            log::info!("WebGL context restored ({source:?})");
            for listener in &listeners {
                listener.context_restored(signal);
            }
        }
    }
}

/// Read-only view of the capability signal.
#[derive(Clone)]
pub struct CapabilityReader {
    state: SharedSignal,
}

impl CapabilityReader {
    pub(crate) fn new(state: SharedSignal) -> Self {
        Self { state }
    }

    pub fn signal(&self) -> CapabilitySignal {
        self.state.borrow().signal()
    }

    /// Registers `listener`. Subscribing the same `Rc` again shares the
    /// existing registration instead of adding a second one.
    pub fn subscribe(&self, listener: Rc<dyn CapabilityListener>) -> Subscription {
        subscribe(&self.state, listener)
    }

    pub fn subscribe_fn<L, R>(&self, on_lost: L, on_restored: R) -> Subscription
    where
        L: Fn(CapabilitySignal) + 'static,
        R: Fn(CapabilitySignal) + 'static,
    {
        self.subscribe(Rc::new(FnListener { on_lost, on_restored }))
    }

    /// Number of distinct registered listeners.
    pub fn listener_count(&self) -> usize {
        self.state.borrow().registrations.len()
    }
}

impl fmt::Debug for CapabilityReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityReader")
            .field("signal", &self.signal())
            .finish()
    }
}

/// Deregistration handle returned by [`CapabilityReader::subscribe`].
///
/// Dropping it unsubscribes.
pub struct Subscription {
    state: Weak<RefCell<SignalState>>,
    id: Cell<Option<u64>>,
}

impl Subscription {
    /// Safe to call any number of times, including after the monitor is gone.
    pub fn unsubscribe(&self) {
        let Some(id) = self.id.take() else {
            return;
        };
        let Some(state) = self.state.upgrade() else {
            return;
        };
        let mut inner = state.borrow_mut();
        if let Some(pos) = inner.registrations.iter().position(|reg| reg.id == id) {
            inner.registrations[pos].handles -= 1;
            if inner.registrations[pos].handles == 0 {
                inner.registrations.remove(pos);
            }
        }
    }

    pub fn is_active(&self) -> bool {
        self.id.get().is_some()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}

/// Feeds loss / restore notifications for one source into the monitor.
#[derive(Clone)]
pub struct LossReporter {
    state: SharedSignal,
    source: LossSource,
}

impl LossReporter {
    pub(crate) fn new(state: SharedSignal, source: LossSource) -> Self {
        Self { state, source }
    }

    pub fn source(&self) -> LossSource {
        self.source
    }

    pub fn lost(&self) {
        report(&self.state, self.source, true);
    }

    /// Only call after the context passed a health check.
    pub fn restored(&self) {
        report(&self.state, self.source, false);
    }

    /// The source is going away; drop whatever loss it still holds.
    pub fn release(&self) {
        report(&self.state, self.source, false);
    }
}

impl fmt::Debug for LossReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LossReporter")
            .field("source", &self.source)
            .finish()
    }
}
