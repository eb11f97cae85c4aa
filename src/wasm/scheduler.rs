//! `setTimeout` behind the [`Scheduler`] seam.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::Window;

use crate::platform::{Scheduler, TimerToken};

/// Called with the token of every timer that fires.
pub(crate) type Dispatch = Rc<dyn Fn(TimerToken)>;

struct PendingTimer {
    handle: i32,
    _callback: Closure<dyn FnMut()>,
}

type PendingTimers = Rc<RefCell<HashMap<TimerToken, PendingTimer>>>;

pub(crate) struct TimeoutScheduler {
    window: Window,
    dispatch: Dispatch,
    next_token: u64,
    pending: PendingTimers,
}

impl TimeoutScheduler {
    pub(crate) fn new(window: Window, dispatch: Dispatch) -> Self {
        Self {
            window,
            dispatch,
            next_token: 0,
            pending: Rc::default(),
        }
    }
}

impl Scheduler for TimeoutScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerToken {
        self.next_token += 1;
        let token = TimerToken(self.next_token);

        let pending = Rc::downgrade(&self.pending);
        let dispatch = Rc::clone(&self.dispatch);
        let callback = Closure::wrap(Box::new(move || {
            let Some(pending) = pending.upgrade() else {
                return;
            };
            // Keep the entry alive until the dispatch returns; wasm-bindgen
            // defers freeing a closure that is still running.
            let entry = pending.borrow_mut().remove(&token);
            if entry.is_some() {
                dispatch(token);
            }
        }) as Box<dyn FnMut()>);

        let millis = i32::try_from(delay.as_millis()).unwrap_or(i32::MAX);
        match self
            .window
            .set_timeout_with_callback_and_timeout_and_arguments_0(callback.as_ref().unchecked_ref(), millis)
        {
            Ok(handle) => {
                self.pending.borrow_mut().insert(
                    token,
                    PendingTimer {
                        handle,
                        _callback: callback,
                    },
                );
            }
            Err(err) => log::error!("setTimeout failed: {err:?}"),
        }
        token
    }

    fn cancel(&mut self, token: TimerToken) {
        let removed = self.pending.borrow_mut().remove(&token);
        if let Some(timer) = removed {
            self.window.clear_timeout_with_handle(timer.handle);
        }
    }
}

impl Drop for TimeoutScheduler {
    fn drop(&mut self) {
        let drained: Vec<PendingTimer> = self.pending.borrow_mut().drain().map(|(_, timer)| timer).collect();
        for timer in drained {
            self.window.clear_timeout_with_handle(timer.handle);
        }
    }
}

impl fmt::Debug for TimeoutScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutScheduler")
            .field("pending", &self.pending.borrow().len())
            .finish()
    }
}
