//! Condition variable.
//!
//! Waiters park in a FIFO of task handles; `signal` wakes the oldest,
//! `broadcast` wakes them all. A waiter must hold the companion mutex
//! when calling `wait`: the wait atomically queues the caller, releases
//! the mutex, and blocks, then reacquires the mutex before returning —
//! on every exit path, timeout included.
//!
//! There is no associated predicate: callers re-test their condition in
//! a loop around `wait`.

use core::cell::Cell;

use crate::config::MAX_TASKS;
use crate::error::{KernelError, Result};
use crate::kernel;
use crate::sync::Mutex;
use crate::task::TaskId;
use crate::time;

// ---------------------------------------------------------------------------
// Wait queue
// ---------------------------------------------------------------------------

/// Fixed-capacity FIFO of waiting tasks. Capacity is `MAX_TASKS`, which
/// no condition variable can exceed since each entry is a distinct
/// blocked task. Held by value in a `Cell`, so all surgery is
/// copy-modify-write under a critical section.
#[derive(Clone, Copy)]
struct WaitRing {
    slots: [Option<TaskId>; MAX_TASKS],
    head: usize,
    len: usize,
}

impl WaitRing {
    const fn new() -> Self {
        Self {
            slots: [None; MAX_TASKS],
            head: 0,
            len: 0,
        }
    }

    fn push(&mut self, id: TaskId) -> bool {
        if self.len == MAX_TASKS {
            return false;
        }
        self.slots[(self.head + self.len) % MAX_TASKS] = Some(id);
        self.len += 1;
        true
    }

    fn pop_front(&mut self) -> Option<TaskId> {
        if self.len == 0 {
            return None;
        }
        let id = self.slots[self.head].take();
        self.head = (self.head + 1) % MAX_TASKS;
        self.len -= 1;
        id
    }

    fn contains(&self, id: TaskId) -> bool {
        (0..self.len).any(|i| self.slots[(self.head + i) % MAX_TASKS] == Some(id))
    }

    /// Remove `id` wherever it sits, closing the gap so FIFO order of
    /// the remaining waiters is preserved.
    fn remove(&mut self, id: TaskId) -> bool {
        let Some(pos) = (0..self.len).find(|&i| self.slots[(self.head + i) % MAX_TASKS] == Some(id))
        else {
            return false;
        };
        for i in pos..self.len - 1 {
            self.slots[(self.head + i) % MAX_TASKS] = self.slots[(self.head + i + 1) % MAX_TASKS];
        }
        self.slots[(self.head + self.len - 1) % MAX_TASKS] = None;
        self.len -= 1;
        true
    }
}

// ---------------------------------------------------------------------------
// Condition variable
// ---------------------------------------------------------------------------

pub struct CondVar {
    ring: critical_section::Mutex<Cell<WaitRing>>,
}

enum WaitStatus {
    Signaled,
    TimedOut,
    Waiting,
}

impl CondVar {
    pub const fn new() -> Self {
        Self {
            ring: critical_section::Mutex::new(Cell::new(WaitRing::new())),
        }
    }

    /// Number of tasks currently parked on this condition variable.
    pub fn waiting(&self) -> u32 {
        critical_section::with(|cs| self.ring.borrow(cs).get().len as u32)
    }

    /// Park the caller until signaled or `timeout` ticks pass (0 = wait
    /// forever). The caller must hold `mutex`; it is released while
    /// parked and reacquired before this returns, timeout included.
    pub fn wait(&self, mutex: &Mutex, timeout: u32) -> Result<()> {
        let me = kernel::current_task().ok_or(KernelError::InvalidParam)?;
        let start = kernel::tick_count();
        let wake_at = (timeout != 0).then(|| start.wrapping_add(timeout));

        // Queue up and block in one critical section, so a signal that
        // lands between the mutex release and the first sleep still
        // finds us parked.
        let queued = critical_section::with(|cs| {
            let cell = self.ring.borrow(cs);
            let mut ring = cell.get();
            if !ring.push(me) {
                return false;
            }
            cell.set(ring);
            kernel::borrow_mut(cs).sched.block_current(wake_at);
            true
        });
        if !queued {
            return Err(KernelError::NoMemory);
        }

        if let Err(e) = mutex.unlock() {
            // Caller didn't hold the mutex: roll the wait back.
            critical_section::with(|cs| {
                let cell = self.ring.borrow(cs);
                let mut ring = cell.get();
                ring.remove(me);
                cell.set(ring);
                kernel::borrow_mut(cs).sched.unblock_current();
            });
            return Err(e);
        }

        let result = loop {
            let status = critical_section::with(|cs| {
                let cell = self.ring.borrow(cs);
                let mut ring = cell.get();
                if !ring.contains(me) {
                    return WaitStatus::Signaled;
                }
                if timeout != 0 && time::elapsed_since(start) >= timeout {
                    ring.remove(me);
                    cell.set(ring);
                    return WaitStatus::TimedOut;
                }
                WaitStatus::Waiting
            });
            match status {
                WaitStatus::Signaled => break Ok(()),
                WaitStatus::TimedOut => break Err(KernelError::Timeout),
                WaitStatus::Waiting => kernel::yield_now(),
            }
        };

        critical_section::with(|cs| {
            kernel::borrow_mut(cs).sched.resume_after_wait(me);
        });
        // Unconditional, unbounded reacquisition — also on timeout.
        mutex.lock(0)?;
        result
    }

    /// Wake the oldest waiter, if any, and yield so it can run.
    pub fn signal(&self) {
        critical_section::with(|cs| {
            let cell = self.ring.borrow(cs);
            let mut ring = cell.get();
            if let Some(id) = ring.pop_front() {
                cell.set(ring);
                kernel::borrow_mut(cs).sched.ready_task(id);
            }
        });
        kernel::yield_now();
    }

    /// Wake every waiter in FIFO order and yield.
    pub fn broadcast(&self) {
        critical_section::with(|cs| {
            let cell = self.ring.borrow(cs);
            let mut ring = cell.get();
            let mut k = kernel::borrow_mut(cs);
            while let Some(id) = ring.pop_front() {
                k.sched.ready_task(id);
            }
            cell.set(ring);
        });
        kernel::yield_now();
    }
}

impl Default for CondVar {
    fn default() -> Self {
        Self::new()
    }
}
