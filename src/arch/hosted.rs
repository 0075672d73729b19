//! # Hosted Simulation Port
//!
//! Stand-in port used when the crate is compiled for a hosted target
//! (anything that is not bare-metal ARM), primarily to run the kernel's
//! logic under the host test harness. Critical sections come from the
//! `critical-section/std` implementation; there is no real context
//! switch, so a reschedule request instead invokes an installable yield
//! hook that plays the role of "the rest of the system runs now".
//!
//! [`advance_ticks`] is the simulation clock: it drives the kernel tick
//! machinery (sleep wakeups, timer expiry) without charging the running
//! task's time slice.

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

/// Invoked on every reschedule request. Installed by the test driver.
static YIELD_HOOK: critical_section::Mutex<Cell<Option<fn()>>> =
    critical_section::Mutex::new(Cell::new(None));

/// Guards against the hook re-entering itself through the tick machinery.
static IN_HOOK: AtomicBool = AtomicBool::new(false);

/// Install (or clear) the yield hook.
pub fn set_yield_hook(hook: Option<fn()>) {
    critical_section::with(|cs| YIELD_HOOK.borrow(cs).set(hook));
}

/// A reschedule request on the hosted port runs the yield hook, if one
/// is installed and we are not already inside it.
pub(crate) fn request_reschedule() {
    let hook = critical_section::with(|cs| YIELD_HOOK.borrow(cs).get());
    if let Some(hook) = hook {
        if !IN_HOOK.swap(true, Ordering::Acquire) {
            hook();
            IN_HOOK.store(false, Ordering::Release);
        }
    }
}

/// Nothing to wait for on a hosted target.
pub(crate) fn idle_wait() {}

/// Advance the simulated clock by `n` ticks, running wakeups and timer
/// expiry exactly as the tick ISR would, without billing the running
/// task.
pub fn advance_ticks(n: u32) {
    for _ in 0..n {
        crate::kernel::tick_core(false);
    }
}
