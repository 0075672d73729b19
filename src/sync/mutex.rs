//! Mutex with basic priority inheritance.
//!
//! When a waiter outranks the lock holder, the holder is transiently
//! raised to the waiter's priority until it unlocks, which bounds the
//! classic priority-inversion window. Inheritance is one hop: a chain of
//! tasks each blocked on the next one's mutex is only resolved link by
//! link, not propagated transitively.

use core::cell::Cell;

use crate::config::{Priority, PRIORITY_IDLE};
use crate::error::{KernelError, Result};
use crate::kernel;
use crate::task::TaskId;
use crate::time::Deadline;

#[derive(Clone, Copy)]
struct MutexState {
    locked: bool,
    /// Lock holder; `None` when unlocked, or when the lock was taken
    /// before the scheduler dispatched a task.
    owner: Option<TaskId>,
    /// Highest priority (lowest numeric value) any holder has had while
    /// holding the lock. Diagnostic.
    ceiling: Priority,
}

enum Attempt {
    Acquired,
    Busy,
    Recursive,
}

/// A non-recursive mutex. Locking a mutex the caller already holds is
/// rejected with `InvalidParam` rather than deadlocking.
pub struct Mutex {
    state: critical_section::Mutex<Cell<MutexState>>,
}

impl Mutex {
    pub const fn new() -> Self {
        Self {
            state: critical_section::Mutex::new(Cell::new(MutexState {
                locked: false,
                owner: None,
                ceiling: PRIORITY_IDLE,
            })),
        }
    }

    /// One acquisition attempt. On failure, applies priority inheritance
    /// to the owner before reporting Busy.
    fn try_acquire(&self) -> Attempt {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut st = cell.get();
            let mut k = kernel::borrow_mut(cs);
            let me = k.sched.current;

            if !st.locked {
                st.locked = true;
                st.owner = me;
                st.ceiling = match me {
                    Some(id) => k.sched.tasks[id.index()].priority,
                    None => PRIORITY_IDLE,
                };
                cell.set(st);
                return Attempt::Acquired;
            }
            if st.owner == me {
                return Attempt::Recursive;
            }
            // One-hop inheritance: raise the owner to the waiter's
            // priority. Best-effort; never fails.
            if let (Some(me_id), Some(owner)) = (me, st.owner) {
                let my_prio = k.sched.tasks[me_id.index()].priority;
                if my_prio < k.sched.tasks[owner.index()].priority {
                    let _ = k.sched.raise_priority(owner, my_prio);
                    if my_prio < st.ceiling {
                        st.ceiling = my_prio;
                        cell.set(st);
                    }
                }
            }
            Attempt::Busy
        })
    }

    /// Lock the mutex, waiting up to `timeout` ticks (0 = wait forever).
    ///
    /// The wait polls: each failed attempt yields the CPU, so the
    /// highest-priority waiter is selected implicitly by the scheduler.
    pub fn lock(&self, timeout: u32) -> Result<()> {
        let deadline = Deadline::start(timeout);
        loop {
            match self.try_acquire() {
                Attempt::Acquired => return Ok(()),
                Attempt::Recursive => return Err(KernelError::InvalidParam),
                Attempt::Busy => {
                    if deadline.expired() {
                        return Err(KernelError::Timeout);
                    }
                    kernel::yield_now();
                }
            }
        }
    }

    /// Unlock the mutex. Fails with `PermissionDenied`, leaving the lock
    /// untouched, when the caller is not the owner. Drops the releasing
    /// task back to its base priority and yields so a waiting task can
    /// acquire.
    pub fn unlock(&self) -> Result<()> {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut st = cell.get();
            let mut k = kernel::borrow_mut(cs);
            let me = k.sched.current;

            if !st.locked || st.owner != me {
                return Err(KernelError::PermissionDenied);
            }
            st.locked = false;
            st.owner = None;
            cell.set(st);
            if let Some(me_id) = me {
                let _ = k.sched.reset_priority(me_id);
            }
            Ok(())
        })?;
        kernel::yield_now();
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        critical_section::with(|cs| self.state.borrow(cs).get().locked)
    }

    /// The current lock holder, if any.
    pub fn owner(&self) -> Option<TaskId> {
        critical_section::with(|cs| self.state.borrow(cs).get().owner)
    }

    /// Highest priority observed on a holder of this mutex.
    pub fn ceiling(&self) -> Priority {
        critical_section::with(|cs| self.state.borrow(cs).get().ceiling)
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
