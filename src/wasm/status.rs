use std::cell::RefCell;
use std::rc::{Rc, Weak};

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Event, HtmlElement, Window};

use super::scheduler::TimeoutScheduler;
use crate::config::BannerTiming;
use crate::monitor::CapabilityMonitor;
use crate::signal::Subscription;
use crate::status::StatusBanner;

type SharedBanner = Rc<RefCell<StatusBanner<TimeoutScheduler>>>;

/// The `#webgl-status` element kept in step with a [`StatusBanner`].
///
/// Expects `.title`, `.detail` and `.dismiss` children; missing ones are
/// skipped.
pub(crate) struct StatusPanel {
    root: HtmlElement,
    banner: SharedBanner,
    dismiss: Closure<dyn FnMut(Event)>,
    _subscription: Subscription,
}

fn paint(root: &HtmlElement, banner: &StatusBanner<TimeoutScheduler>) {
    let message = banner.message();
    for (selector, text) in [(".title", &message.title), (".detail", &message.detail)] {
        if let Ok(Some(element)) = root.query_selector(selector) {
            element.set_text_content(Some(text));
        }
    }
    let classes = root.class_list();
    let _ = classes.toggle_with_force("healthy", message.healthy);
    let _ = classes.toggle_with_force("degraded", !message.healthy);
    root.set_hidden(!banner.is_visible());
}

fn with_banner(banner: &Weak<RefCell<StatusBanner<TimeoutScheduler>>>, root: &HtmlElement, f: impl FnOnce(&mut StatusBanner<TimeoutScheduler>)) {
    let Some(banner) = banner.upgrade() else {
        return;
    };
    let Ok(mut banner) = banner.try_borrow_mut() else {
        return;
    };
    f(&mut banner);
    paint(root, &banner);
}

impl StatusPanel {
    pub(crate) fn attach(window: &Window, root: HtmlElement, monitor: &CapabilityMonitor, timing: BannerTiming) -> Result<Self, JsValue> {
        let banner: SharedBanner = Rc::new_cyclic(|weak: &Weak<RefCell<StatusBanner<TimeoutScheduler>>>| {
            let timers = weak.clone();
            let timer_root = root.clone();
            let scheduler = TimeoutScheduler::new(
                window.clone(),
                Rc::new(move |token| with_banner(&timers, &timer_root, |banner| banner.timer_fired(token))),
            );
            RefCell::new(StatusBanner::new(timing, scheduler, monitor.signal(), monitor.report()))
        });
        paint(&root, &banner.borrow());

        let report = monitor.report().clone();
        let (lost_banner, lost_root, lost_report) = (Rc::downgrade(&banner), root.clone(), report.clone());
        let (restored_banner, restored_root) = (Rc::downgrade(&banner), root.clone());
        let subscription = monitor.subscribe_fn(
            move |signal| with_banner(&lost_banner, &lost_root, |banner| banner.update(signal, &lost_report)),
            move |signal| with_banner(&restored_banner, &restored_root, |banner| banner.update(signal, &report)),
        );

        let (dismiss_banner, dismiss_root) = (Rc::downgrade(&banner), root.clone());
        let dismiss = Closure::wrap(Box::new(move |_: Event| {
            with_banner(&dismiss_banner, &dismiss_root, |banner| banner.dismiss());
        }) as Box<dyn FnMut(Event)>);
        if let Some(button) = root.query_selector(".dismiss")? {
            button.add_event_listener_with_callback("click", dismiss.as_ref().unchecked_ref())?;
        }

        Ok(Self {
            root,
            banner,
            dismiss,
            _subscription: subscription,
        })
    }
}

impl Drop for StatusPanel {
    fn drop(&mut self) {
        if let Ok(Some(button)) = self.root.query_selector(".dismiss") {
            let _ = button.remove_event_listener_with_callback("click", self.dismiss.as_ref().unchecked_ref());
        }
        if let Ok(mut banner) = self.banner.try_borrow_mut() {
            banner.dismiss();
        }
        self.root.set_hidden(true);
    }
}
