//! Event group: a 32-bit bitset tasks can wait on.
//!
//! Setters OR bits in and yield; waiters poll for ANY or ALL of a mask,
//! optionally clearing the matched bits as they leave. Set, clear, and
//! wait are each atomic with respect to one another.

use core::cell::Cell;

use crate::error::{KernelError, Result};
use crate::kernel;
use crate::time::Deadline;

/// How a waiter's mask is matched against the event bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    /// Satisfied when any bit of the mask is set.
    Any,
    /// Satisfied only when every bit of the mask is set.
    All,
}

pub struct EventGroup {
    bits: critical_section::Mutex<Cell<u32>>,
}

impl EventGroup {
    pub const fn new() -> Self {
        Self {
            bits: critical_section::Mutex::new(Cell::new(0)),
        }
    }

    /// OR `mask` into the event bits and yield so waiters can observe
    /// the update. Callable from timer callbacks.
    pub fn set_bits(&self, mask: u32) {
        critical_section::with(|cs| {
            let cell = self.bits.borrow(cs);
            cell.set(cell.get() | mask);
        });
        kernel::yield_now();
    }

    /// Clear `mask` unconditionally.
    pub fn clear_bits(&self, mask: u32) {
        critical_section::with(|cs| {
            let cell = self.bits.borrow(cs);
            cell.set(cell.get() & !mask);
        });
    }

    /// Non-blocking snapshot of the event bits.
    pub fn get_bits(&self) -> u32 {
        critical_section::with(|cs| self.bits.borrow(cs).get())
    }

    /// Wait until the mask is matched per `mode`, up to `timeout` ticks
    /// (0 = wait forever). Returns the matched bits; when
    /// `clear_on_exit` is set they are cleared before release. On
    /// timeout no bits are cleared.
    ///
    /// An empty mask is rejected with `InvalidParam`.
    pub fn wait_bits(
        &self,
        mask: u32,
        mode: WaitMode,
        clear_on_exit: bool,
        timeout: u32,
    ) -> Result<u32> {
        if mask == 0 {
            return Err(KernelError::InvalidParam);
        }
        let deadline = Deadline::start(timeout);
        loop {
            let matched = critical_section::with(|cs| {
                let cell = self.bits.borrow(cs);
                let bits = cell.get();
                let matched = bits & mask;
                let satisfied = match mode {
                    WaitMode::Any => matched != 0,
                    WaitMode::All => matched == mask,
                };
                if satisfied {
                    if clear_on_exit {
                        cell.set(bits & !matched);
                    }
                    Some(matched)
                } else {
                    None
                }
            });
            if let Some(matched) = matched {
                return Ok(matched);
            }
            if deadline.expired() {
                return Err(KernelError::Timeout);
            }
            kernel::yield_now();
        }
    }
}

impl Default for EventGroup {
    fn default() -> Self {
        Self::new()
    }
}
