//! # Task Control Block
//!
//! Defines the task model for FemtOS. Each task is one schedulable flow of
//! control: an entry function, a fixed-size stack, a pair of priorities
//! (current and base), and the bookkeeping the scheduler needs to run it.
//!
//! TCBs live in a fixed table inside the scheduler — no heap allocation.
//! Application code never touches a TCB directly; it holds a [`TaskId`]
//! handle returned by `kernel::create_task`.

use crate::config::{Priority, PRIORITY_IDLE, STACK_WORDS, TIME_SLICE_TICKS};

// ---------------------------------------------------------------------------
// Handles and state machine
// ---------------------------------------------------------------------------

/// Opaque handle naming one slot in the kernel's task table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Execution state of a task.
///
/// ```text
///   ┌─────────┐    dispatch     ┌─────────┐
///   │  Ready  │ ──────────────► │ Running │
///   └─────────┘                 └─────────┘
///        ▲      preempt / yield      │
///        ├───────────────────────────┤
///        │                           │ delay / cond_wait
///        │   wake / signal      ┌─────────┐
///        └───────────────────── │ Blocked │
///                               └─────────┘
/// ```
///
/// `Suspended` and `Terminated` tasks are linked into no queue and are
/// never scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in a ready list for its priority level.
    Ready,
    /// Currently executing. Exactly one task is ever in this state.
    Running,
    /// Sleeping on a wake tick or parked on a condition variable.
    Blocked,
    /// Removed from scheduling by `task_suspend`.
    Suspended,
    /// Finished; the slot is reclaimable.
    Terminated,
}

/// Task entry point. Receives the opaque parameter passed at creation.
///
/// The signature is `extern "C"` because the initial context frame places
/// the parameter in R0 per the AAPCS; the first context switch "returns"
/// straight into this function.
pub type TaskEntry = extern "C" fn(usize);

// ---------------------------------------------------------------------------
// Task control block
// ---------------------------------------------------------------------------

/// Per-task stack. Aligned to 8 bytes as required by the AAPCS.
#[repr(align(8))]
pub(crate) struct TaskStack(pub(crate) [u32; STACK_WORDS]);

/// Task Control Block — the kernel's record of one task.
///
/// The `next` link is intrusive and shared: a task sits in at most one
/// ready list at a time, so a single link suffices. Condition-variable
/// wait queues record `TaskId`s in their own ring instead of threading
/// through this link (a blocked task is never in a ready list, but the
/// wake-on-timeout path would otherwise have to unlink it from a queue
/// whose head only the application knows).
pub(crate) struct Tcb {
    /// Stack memory. The initial context frame is primed at creation so
    /// the first switch into the task starts at `entry`.
    pub(crate) stack: TaskStack,
    /// Saved stack pointer, written by the context switcher.
    pub(crate) stack_ptr: *mut u32,
    /// Current execution state.
    pub(crate) state: TaskState,
    /// Effective priority. May sit above `base_priority` (numerically
    /// below it) while priority inheritance is applied.
    pub(crate) priority: Priority,
    /// Priority assigned at creation or by `set_priority`; restored when
    /// inheritance is released.
    pub(crate) base_priority: Priority,
    /// Remaining ticks in the current quantum.
    pub(crate) time_slice: u32,
    /// Short human-readable name for diagnostics.
    pub(crate) name: &'static str,
    /// Entry function; `None` for a free slot.
    pub(crate) entry: Option<TaskEntry>,
    /// Opaque parameter handed to `entry`.
    pub(crate) param: usize,
    /// Total ticks observed in the Running state.
    pub(crate) run_time: u32,
    /// Tick at which a delayed task becomes Ready again; also carries a
    /// condition-variable wait deadline. `None` when not sleeping.
    pub(crate) wake_at: Option<u32>,
    /// Intrusive ready-list link.
    pub(crate) next: Option<TaskId>,
    /// Whether this slot holds a live task.
    pub(crate) active: bool,
}

// Safety: the raw stack pointer always points into this TCB's own stack
// array, and TCBs are only touched inside critical sections.
unsafe impl Send for Tcb {}

impl Tcb {
    /// An unoccupied slot. Used to build the static task table.
    pub(crate) const EMPTY: Tcb = Tcb {
        stack: TaskStack([0; STACK_WORDS]),
        stack_ptr: core::ptr::null_mut(),
        state: TaskState::Terminated,
        priority: PRIORITY_IDLE,
        base_priority: PRIORITY_IDLE,
        time_slice: 0,
        name: "",
        entry: None,
        param: 0,
        run_time: 0,
        wake_at: None,
        next: None,
        active: false,
    };

    /// Claim this slot for a new task. The stack frame is primed
    /// separately by the scheduler.
    pub(crate) fn init(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
        param: usize,
        priority: Priority,
    ) {
        self.state = TaskState::Ready;
        self.priority = priority;
        self.base_priority = priority;
        self.time_slice = TIME_SLICE_TICKS;
        self.name = name;
        self.entry = Some(entry);
        self.param = param;
        self.run_time = 0;
        self.wake_at = None;
        self.next = None;
        self.active = true;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PRIORITY_NORMAL;

    extern "C" fn nop_entry(_arg: usize) {}

    #[test]
    fn empty_slot_is_inert() {
        let tcb = Tcb::EMPTY;
        assert!(!tcb.active);
        assert_eq!(tcb.state, TaskState::Terminated);
        assert!(tcb.entry.is_none());
        assert!(tcb.stack_ptr.is_null());
    }

    #[test]
    fn init_marks_ready_with_fresh_slice() {
        let mut tcb = Tcb::EMPTY;
        tcb.init("worker", nop_entry, 42, PRIORITY_NORMAL);

        assert!(tcb.active);
        assert_eq!(tcb.state, TaskState::Ready);
        assert_eq!(tcb.priority, PRIORITY_NORMAL);
        assert_eq!(tcb.base_priority, PRIORITY_NORMAL);
        assert_eq!(tcb.time_slice, TIME_SLICE_TICKS);
        assert_eq!(tcb.name, "worker");
        assert_eq!(tcb.param, 42);
        assert_eq!(tcb.run_time, 0);
        assert!(tcb.wake_at.is_none());
    }

    #[test]
    fn stack_is_eight_byte_aligned() {
        let tcb = Tcb::EMPTY;
        assert_eq!(tcb.stack.0.as_ptr() as usize % 8, 0);
    }
}
