//! # Software Timer Service
//!
//! One-shot and auto-reload timers driven by the kernel tick. Active
//! timers sit in a singly linked list sorted by ascending expiry, so the
//! per-tick scan only looks at the head until it finds an unexpired
//! timer.
//!
//! Callbacks run in tick (interrupt) context, outside the critical
//! section: they must be short and non-blocking. A callback may call
//! `set_bits`, `post`, or `signal` to hand work to task context, and may
//! start or stop timers — including its own.

use crate::config::MAX_TIMERS;
use crate::error::{KernelError, Result};
use crate::kernel;
use crate::time;

/// Opaque handle naming one slot in the kernel's timer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerId(pub(crate) u8);

impl TimerId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Expiry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerMode {
    /// Fire once, then go inactive.
    OneShot,
    /// Re-arm for another period after every expiry.
    AutoReload,
}

/// Timer callback. Runs in tick context with the opaque parameter given
/// at creation; returns nothing, and any error it encounters is its own
/// problem — the timer service carries on regardless.
pub type TimerCallback = fn(usize);

// ---------------------------------------------------------------------------
// Timer table
// ---------------------------------------------------------------------------

struct TimerSlot {
    name: &'static str,
    mode: TimerMode,
    /// Period in ticks.
    period: u32,
    /// Absolute expiry tick; meaningful while `active`.
    expiry: u32,
    active: bool,
    in_use: bool,
    callback: Option<TimerCallback>,
    param: usize,
    /// Link in the sorted active list.
    next: Option<TimerId>,
}

impl TimerSlot {
    const EMPTY: TimerSlot = TimerSlot {
        name: "",
        mode: TimerMode::OneShot,
        period: 0,
        expiry: 0,
        active: false,
        in_use: false,
        callback: None,
        param: 0,
        next: None,
    };
}

/// An expired timer, detached from the active list with its callback
/// captured so the callback can run outside the critical section.
#[derive(Clone, Copy)]
pub(crate) struct Expired {
    pub(crate) id: TimerId,
    pub(crate) callback: TimerCallback,
    pub(crate) param: usize,
    pub(crate) reload: bool,
}

/// The timer table plus the sorted active list. Lives inside the global
/// kernel cell.
pub(crate) struct TimerService {
    slots: [TimerSlot; MAX_TIMERS],
    head: Option<TimerId>,
    active_count: u32,
}

impl TimerService {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [TimerSlot::EMPTY; MAX_TIMERS],
            head: None,
            active_count: 0,
        }
    }

    fn check(&self, id: TimerId) -> Result<()> {
        if id.index() < MAX_TIMERS && self.slots[id.index()].in_use {
            Ok(())
        } else {
            Err(KernelError::InvalidParam)
        }
    }

    pub(crate) fn create(
        &mut self,
        name: &'static str,
        mode: TimerMode,
        period: u32,
        callback: TimerCallback,
        param: usize,
    ) -> Result<TimerId> {
        if period == 0 {
            return Err(KernelError::InvalidParam);
        }
        let slot = (0..MAX_TIMERS)
            .find(|&i| !self.slots[i].in_use)
            .ok_or(KernelError::NoMemory)?;
        self.slots[slot] = TimerSlot {
            name,
            mode,
            period,
            expiry: 0,
            active: false,
            in_use: true,
            callback: Some(callback),
            param,
            next: None,
        };
        Ok(TimerId(slot as u8))
    }

    pub(crate) fn delete(&mut self, id: TimerId) -> Result<()> {
        self.check(id)?;
        if self.slots[id.index()].active {
            self.unlink(id);
        }
        self.slots[id.index()] = TimerSlot::EMPTY;
        Ok(())
    }

    /// Arm the timer `period` ticks from `now`. An already-active timer
    /// is stopped first, so start doubles as restart.
    pub(crate) fn start(&mut self, id: TimerId, now: u32) -> Result<()> {
        self.check(id)?;
        if self.slots[id.index()].active {
            self.unlink(id);
        }
        let expiry = now.wrapping_add(self.slots[id.index()].period);
        self.slots[id.index()].expiry = expiry;
        self.slots[id.index()].active = true;
        self.insert_sorted(id, now);
        self.active_count += 1;
        Ok(())
    }

    /// Disarm the timer. Stopping an inactive timer is a no-op.
    pub(crate) fn stop(&mut self, id: TimerId) -> Result<()> {
        self.check(id)?;
        if !self.slots[id.index()].active {
            return Ok(());
        }
        self.unlink(id);
        self.slots[id.index()].active = false;
        Ok(())
    }

    pub(crate) fn change_period(&mut self, id: TimerId, period: u32, now: u32) -> Result<()> {
        if period == 0 {
            return Err(KernelError::InvalidParam);
        }
        self.check(id)?;
        let was_active = self.slots[id.index()].active;
        self.stop(id)?;
        self.slots[id.index()].period = period;
        if was_active {
            self.start(id, now)?;
        }
        Ok(())
    }

    pub(crate) fn is_active(&self, id: TimerId) -> Result<bool> {
        self.check(id)?;
        Ok(self.slots[id.index()].active)
    }

    pub(crate) fn active_count(&self) -> u32 {
        self.active_count
    }

    /// Unlink an active timer from the sorted list. Decrements the
    /// active counter; the caller owns the `active` flag.
    fn unlink(&mut self, id: TimerId) {
        let mut prev: Option<TimerId> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            let next = self.slots[c.index()].next;
            if c == id {
                match prev {
                    None => self.head = next,
                    Some(p) => self.slots[p.index()].next = next,
                }
                self.slots[c.index()].next = None;
                self.active_count -= 1;
                return;
            }
            prev = cursor;
            cursor = next;
        }
    }

    /// Insert an active timer keeping the list sorted by time-to-expiry.
    /// Comparison is on the wrapping delta from `now`, so ordering stays
    /// correct across tick wraparound. Equal expiries keep insertion
    /// order.
    fn insert_sorted(&mut self, id: TimerId, now: u32) {
        let key = self.slots[id.index()].expiry.wrapping_sub(now);

        let mut prev: Option<TimerId> = None;
        let mut cursor = self.head;
        while let Some(c) = cursor {
            if self.slots[c.index()].expiry.wrapping_sub(now) > key {
                break;
            }
            prev = cursor;
            cursor = self.slots[c.index()].next;
        }
        self.slots[id.index()].next = cursor;
        match prev {
            None => self.head = Some(id),
            Some(p) => self.slots[p.index()].next = Some(id),
        }
    }

    /// Detach every timer due at `now`, in expiry order, marking each
    /// inactive. The callbacks are returned for invocation outside the
    /// critical section.
    pub(crate) fn take_expired(&mut self, now: u32) -> [Option<Expired>; MAX_TIMERS] {
        let mut out = [None; MAX_TIMERS];
        let mut n = 0;
        while let Some(head) = self.head {
            if !time::reached(now, self.slots[head.index()].expiry) {
                break; // sorted list: nothing further is due either
            }
            self.head = self.slots[head.index()].next;
            let slot = &mut self.slots[head.index()];
            slot.next = None;
            slot.active = false;
            self.active_count -= 1;
            if let Some(callback) = slot.callback {
                out[n] = Some(Expired {
                    id: head,
                    callback,
                    param: slot.param,
                    reload: slot.mode == TimerMode::AutoReload,
                });
                n += 1;
            }
        }
        out
    }

    /// Re-arm an auto-reload timer after its callback ran. Skipped when
    /// the callback already restarted (or deleted) the timer itself.
    pub(crate) fn rearm(&mut self, id: TimerId, now: u32) {
        let slot = &self.slots[id.index()];
        if slot.in_use && !slot.active && slot.mode == TimerMode::AutoReload {
            let _ = self.start(id, now);
        }
    }

    #[cfg(test)]
    fn name_of(&self, id: TimerId) -> &'static str {
        self.slots[id.index()].name
    }
}

// ---------------------------------------------------------------------------
// Public API
// ---------------------------------------------------------------------------

/// Create a timer. Fails with `InvalidParam` for a zero period and
/// `NoMemory` when the timer table is full. The timer starts disarmed.
pub fn create(
    name: &'static str,
    mode: TimerMode,
    period: u32,
    callback: TimerCallback,
    param: usize,
) -> Result<TimerId> {
    critical_section::with(|cs| {
        kernel::borrow_mut(cs)
            .timers
            .create(name, mode, period, callback, param)
    })
}

/// Delete a timer, disarming it first, and free its slot.
pub fn delete(id: TimerId) -> Result<()> {
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.delete(id))
}

/// Arm a timer to fire one period from now. Restarts it if already
/// armed.
pub fn start(id: TimerId) -> Result<()> {
    let now = kernel::tick_count();
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.start(id, now))
}

/// Disarm a timer. A no-op when it is not armed.
pub fn stop(id: TimerId) -> Result<()> {
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.stop(id))
}

/// Restart a timer: equivalent to `stop` followed by `start`.
pub fn reset(id: TimerId) -> Result<()> {
    let now = kernel::tick_count();
    critical_section::with(|cs| {
        let mut k = kernel::borrow_mut(cs);
        k.timers.stop(id)?;
        k.timers.start(id, now)
    })
}

/// Change a timer's period. An armed timer is restarted with the new
/// period; a disarmed one stays disarmed.
pub fn change_period(id: TimerId, period: u32) -> Result<()> {
    let now = kernel::tick_count();
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.change_period(id, period, now))
}

/// Whether the timer is currently armed.
pub fn is_active(id: TimerId) -> Result<bool> {
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.is_active(id))
}

/// Number of armed timers.
pub fn active_count() -> u32 {
    critical_section::with(|cs| kernel::borrow_mut(cs).timers.active_count())
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted;
    use crate::config::{PRIORITY_HIGH, MAX_TIMERS};
    use crate::sync::Semaphore;
    use crate::testutil;
    use core::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::vec::Vec;

    fn nop_cb(_param: usize) {}

    #[test]
    fn create_rejects_zero_period_and_exhausts_pool() {
        let _guard = testutil::fresh_kernel();
        assert_eq!(
            create("bad", TimerMode::OneShot, 0, nop_cb, 0),
            Err(KernelError::InvalidParam)
        );
        let mut ids = Vec::new();
        for _ in 0..MAX_TIMERS {
            ids.push(create("t", TimerMode::OneShot, 5, nop_cb, 0).unwrap());
        }
        assert_eq!(
            create("extra", TimerMode::OneShot, 5, nop_cb, 0),
            Err(KernelError::NoMemory)
        );
        // Deleting frees a slot for reuse.
        delete(ids[0]).unwrap();
        let again = create("again", TimerMode::OneShot, 5, nop_cb, 0).unwrap();
        assert_eq!(again, ids[0]);
    }

    #[test]
    fn stop_is_idempotent_and_stale_handles_fail() {
        let _guard = testutil::fresh_kernel();
        let t = create("t", TimerMode::OneShot, 5, nop_cb, 0).unwrap();
        assert!(!is_active(t).unwrap());
        assert_eq!(stop(t), Ok(())); // never started
        start(t).unwrap();
        assert!(is_active(t).unwrap());
        stop(t).unwrap();
        stop(t).unwrap(); // second stop is a no-op
        assert!(!is_active(t).unwrap());

        delete(t).unwrap();
        assert_eq!(start(t), Err(KernelError::InvalidParam));
    }

    #[test]
    fn reset_behaves_like_a_fresh_start() {
        let _guard = testutil::fresh_kernel();
        let t = create("t", TimerMode::OneShot, 50, nop_cb, 0).unwrap();
        start(t).unwrap();
        hosted::advance_ticks(20);
        reset(t).unwrap();
        // Fires 50 ticks after the reset, not 50 after the start.
        hosted::advance_ticks(49);
        assert!(is_active(t).unwrap());
        hosted::advance_ticks(1);
        assert!(!is_active(t).unwrap());
    }

    #[test]
    fn start_while_active_restarts() {
        let _guard = testutil::fresh_kernel();
        let t = create("t", TimerMode::OneShot, 30, nop_cb, 0).unwrap();
        start(t).unwrap();
        hosted::advance_ticks(25);
        start(t).unwrap(); // restart; expiry moves out to tick 55
        hosted::advance_ticks(29);
        assert!(is_active(t).unwrap());
        hosted::advance_ticks(1);
        assert!(!is_active(t).unwrap());
        assert_eq!(active_count(), 0);
    }

    #[test]
    fn change_period_preserves_armed_state() {
        let _guard = testutil::fresh_kernel();
        let armed = create("armed", TimerMode::OneShot, 10, nop_cb, 0).unwrap();
        let idle = create("idle", TimerMode::OneShot, 10, nop_cb, 0).unwrap();
        start(armed).unwrap();

        change_period(armed, 40).unwrap();
        assert!(is_active(armed).unwrap());
        change_period(idle, 40).unwrap();
        assert!(!is_active(idle).unwrap());
        assert_eq!(change_period(armed, 0), Err(KernelError::InvalidParam));

        hosted::advance_ticks(39);
        assert!(is_active(armed).unwrap());
        hosted::advance_ticks(1);
        assert!(!is_active(armed).unwrap());
    }

    #[test]
    fn one_shot_fires_once_auto_reload_rearms() {
        static ONE: AtomicU32 = AtomicU32::new(0);
        static AUTO: AtomicU32 = AtomicU32::new(0);
        fn one_cb(_p: usize) {
            ONE.fetch_add(1, Ordering::Relaxed);
        }
        fn auto_cb(_p: usize) {
            AUTO.fetch_add(1, Ordering::Relaxed);
        }

        let _guard = testutil::fresh_kernel();
        ONE.store(0, Ordering::Relaxed);
        AUTO.store(0, Ordering::Relaxed);

        let once = create("once", TimerMode::OneShot, 10, one_cb, 0).unwrap();
        let auto = create("auto", TimerMode::AutoReload, 10, auto_cb, 0).unwrap();
        start(once).unwrap();
        start(auto).unwrap();

        hosted::advance_ticks(35);
        assert_eq!(ONE.load(Ordering::Relaxed), 1);
        assert_eq!(AUTO.load(Ordering::Relaxed), 3);
        assert!(!is_active(once).unwrap());
        assert!(is_active(auto).unwrap());
        assert_eq!(active_count(), 1);
    }

    #[test]
    fn period_of_one_fires_every_tick() {
        static FIRES: AtomicU32 = AtomicU32::new(0);
        fn cb(_p: usize) {
            FIRES.fetch_add(1, Ordering::Relaxed);
        }

        let _guard = testutil::fresh_kernel();
        FIRES.store(0, Ordering::Relaxed);
        let t = create("everytick", TimerMode::AutoReload, 1, cb, 0).unwrap();
        start(t).unwrap();
        hosted::advance_ticks(5);
        assert_eq!(FIRES.load(Ordering::Relaxed), 5);
        delete(t).unwrap();
        assert_eq!(active_count(), 0);
    }

    #[test]
    fn expiry_counts_and_interleaving_over_a_thousand_ticks() {
        static FIRE_LOG: StdMutex<Vec<(usize, u32)>> = StdMutex::new(Vec::new());
        fn log_cb(which: usize) {
            FIRE_LOG
                .lock()
                .unwrap()
                .push((which, crate::kernel::tick_count()));
        }

        let _guard = testutil::fresh_kernel();
        FIRE_LOG.lock().unwrap().clear();

        let a = create("a", TimerMode::AutoReload, 100, log_cb, 0).unwrap();
        let b = create("b", TimerMode::AutoReload, 250, log_cb, 1).unwrap();
        let c = create("c", TimerMode::AutoReload, 300, log_cb, 2).unwrap();
        for t in [a, b, c] {
            start(t).unwrap();
        }

        hosted::advance_ticks(1000);

        let log = FIRE_LOG.lock().unwrap();
        let count = |which| log.iter().filter(|(w, _)| *w == which).count();
        assert_eq!(count(0), 10); // 100, 200, ..., 1000
        assert_eq!(count(1), 4); // 250, 500, 750, 1000
        assert_eq!(count(2), 3); // 300, 600, 900

        // Callbacks run in ascending expiry order.
        let mut last_tick = 0;
        for &(_, tick) in log.iter() {
            assert!(tick >= last_tick);
            last_tick = tick;
        }
        assert_eq!(log.first(), Some(&(0, 100)));
    }

    #[test]
    fn active_list_stays_sorted_by_time_to_expiry() {
        let _guard = testutil::fresh_kernel();
        let periods = [70u32, 10, 40, 90, 20];
        for &p in periods.iter() {
            let t = create("t", TimerMode::OneShot, p, nop_cb, 0).unwrap();
            start(t).unwrap();
        }
        critical_section::with(|cs| {
            let k = crate::kernel::borrow_mut(cs);
            let now = crate::kernel::tick_count();
            let mut cursor = k.timers.head;
            let mut last = 0u32;
            let mut seen = 0;
            while let Some(c) = cursor {
                let delta = k.timers.slots[c.index()].expiry.wrapping_sub(now);
                assert!(delta >= last);
                last = delta;
                seen += 1;
                cursor = k.timers.slots[c.index()].next;
            }
            assert_eq!(seen, periods.len());
        });
    }

    #[test]
    fn callback_hands_work_to_a_waiting_task() {
        // A timer callback posts a semaphore; the high-priority waiter
        // observes the post within the same tick.
        static EVT: Semaphore = Semaphore::new(0);
        fn post_cb(_p: usize) {
            EVT.post();
        }

        let _guard = testutil::fresh_kernel();
        extern "C" fn nop_entry(_arg: usize) {}
        kernel::create_task("hp", nop_entry, 0, PRIORITY_HIGH).unwrap();
        critical_section::with(|cs| crate::kernel::borrow_mut(cs).sched.reschedule()).unwrap();
        while EVT.try_wait() {}

        let t = create("kick", TimerMode::OneShot, 100, post_cb, 0).unwrap();
        start(t).unwrap();

        hosted::set_yield_hook(Some(|| hosted::advance_ticks(1)));
        let before = kernel::tick_count();
        assert_eq!(EVT.wait(0), Ok(()));
        hosted::set_yield_hook(None);

        assert_eq!(kernel::tick_count().wrapping_sub(before), 100);
        assert_eq!(EVT.count(), 0);
    }

    #[test]
    fn timer_names_are_kept() {
        let _guard = testutil::fresh_kernel();
        let t = create("heartbeat", TimerMode::AutoReload, 10, nop_cb, 0).unwrap();
        critical_section::with(|cs| {
            assert_eq!(kernel::borrow_mut(cs).timers.name_of(t), "heartbeat");
        });
    }
}
