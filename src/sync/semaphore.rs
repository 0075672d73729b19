//! Counting semaphore.
//!
//! A signed counter: `wait` takes a unit when the count is positive and
//! otherwise polls until one arrives or the deadline passes; `post`
//! releases a unit and yields so waiters observe it. Fairness among
//! waiters falls out of the scheduler's priority ordering rather than a
//! ranked wait list.

use core::cell::Cell;

use crate::error::{KernelError, Result};
use crate::kernel;
use crate::time::Deadline;

pub struct Semaphore {
    count: critical_section::Mutex<Cell<i32>>,
}

impl Semaphore {
    /// A semaphore holding `initial` units. A negative initial count is
    /// permitted: that many extra posts are needed before a wait can
    /// succeed.
    pub const fn new(initial: i32) -> Self {
        Self {
            count: critical_section::Mutex::new(Cell::new(initial)),
        }
    }

    /// Take a unit if one is available, without blocking.
    pub fn try_wait(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.count.borrow(cs);
            let count = cell.get();
            if count > 0 {
                cell.set(count - 1);
                true
            } else {
                false
            }
        })
    }

    /// Take a unit, waiting up to `timeout` ticks (0 = wait forever).
    pub fn wait(&self, timeout: u32) -> Result<()> {
        let deadline = Deadline::start(timeout);
        loop {
            if self.try_wait() {
                return Ok(());
            }
            if deadline.expired() {
                return Err(KernelError::Timeout);
            }
            kernel::yield_now();
        }
    }

    /// Release a unit and yield so a waiter can take it. The count
    /// saturates at `i32::MAX`.
    pub fn post(&self) {
        critical_section::with(|cs| {
            let cell = self.count.borrow(cs);
            cell.set(cell.get().saturating_add(1));
        });
        kernel::yield_now();
    }

    pub fn count(&self) -> i32 {
        critical_section::with(|cs| self.count.borrow(cs).get())
    }
}
