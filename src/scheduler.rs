//! # Scheduler
//!
//! Core scheduling logic for FemtOS: a preemptive, priority-based scheduler
//! with round-robin time slicing inside each priority level.
//!
//! ## Ready-queue discipline
//!
//! The ready queue is a table of 256 singly-linked FIFO lists, one per
//! priority level, threaded through the intrusive `next` link in each TCB.
//! `pick_next` scans from priority 0 (highest) upward and pops the head of
//! the first non-empty list; the idle task is the fallback when every list
//! is empty. Enqueueing always appends at the tail, which yields FIFO
//! rotation among equal-priority tasks.
//!
//! ## Per-tick algorithm
//!
//! On every tick the scheduler:
//! 1. Wakes sleeping tasks whose wake tick has arrived, flagging a
//!    reschedule if a woken task outranks the running one
//! 2. Charges the running task one tick of run time and one tick of its
//!    time slice
//! 3. Flags a reschedule when the slice reaches zero
//!
//! The actual switch is performed by the platform port (PendSV on
//! Cortex-M): it saves the outgoing context, calls [`Scheduler::reschedule`],
//! and restores the incoming context.

use crate::config::{Priority, MAX_TASKS, NUM_PRIORITIES, STACK_WORDS, TIME_SLICE_TICKS};
use crate::error::{KernelError, Result};
use crate::task::{TaskEntry, TaskId, TaskState, Tcb};
use crate::time;

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The scheduler state: the task table, the per-priority ready lists, and
/// the identity of the running task. One instance lives inside the global
/// kernel cell; every access goes through a critical section.
pub(crate) struct Scheduler {
    /// Fixed task table. Slots are claimed by `create_task` and reclaimed
    /// by `delete`.
    pub(crate) tasks: [Tcb; MAX_TASKS],
    /// Head of the ready list for each priority level.
    ready: [Option<TaskId>; NUM_PRIORITIES],
    /// The task currently in the Running state, if any.
    pub(crate) current: Option<TaskId>,
    /// The idle task, used as the scheduling fallback.
    pub(crate) idle: Option<TaskId>,
    /// Number of live tasks (including idle).
    pub(crate) task_count: usize,
    /// Total context switches performed.
    pub(crate) context_switches: u32,
}

impl Scheduler {
    pub(crate) const fn new() -> Self {
        Self {
            tasks: [Tcb::EMPTY; MAX_TASKS],
            ready: [None; NUM_PRIORITIES],
            current: None,
            idle: None,
            task_count: 0,
            context_switches: 0,
        }
    }

    /// Validate a task handle: it must name an occupied slot.
    pub(crate) fn check(&self, id: TaskId) -> Result<()> {
        if id.index() < MAX_TASKS && self.tasks[id.index()].active {
            Ok(())
        } else {
            Err(KernelError::InvalidParam)
        }
    }

    // -----------------------------------------------------------------------
    // Task creation and teardown
    // -----------------------------------------------------------------------

    /// Claim a free slot, prime the initial stack frame, and enqueue the
    /// task as Ready.
    pub(crate) fn create_task(
        &mut self,
        name: &'static str,
        entry: TaskEntry,
        param: usize,
        priority: Priority,
    ) -> Result<TaskId> {
        let slot = (0..MAX_TASKS)
            .find(|&i| !self.tasks[i].active)
            .ok_or(KernelError::NoMemory)?;
        let id = TaskId(slot as u8);

        self.tasks[slot].init(name, entry, param, priority);
        prime_stack(&mut self.tasks[slot]);
        self.enqueue_ready(id);
        self.task_count += 1;
        Ok(id)
    }

    /// Tear down a task: unlink it from the ready lists and free the slot.
    /// Returns whether the caller should yield (the victim was running).
    pub(crate) fn delete(&mut self, id: TaskId) -> Result<bool> {
        self.check(id)?;
        if self.idle == Some(id) {
            return Err(KernelError::InvalidParam);
        }
        self.remove_from_ready(id);
        let t = &mut self.tasks[id.index()];
        t.state = TaskState::Terminated;
        t.active = false;
        t.entry = None;
        t.wake_at = None;
        t.next = None;
        self.task_count -= 1;
        Ok(self.current == Some(id))
    }

    /// Terminate the running task. Invoked when a task returns from its
    /// entry function.
    pub(crate) fn exit_current(&mut self) {
        if let Some(cur) = self.current {
            let t = &mut self.tasks[cur.index()];
            t.state = TaskState::Terminated;
            t.active = false;
            t.entry = None;
            t.wake_at = None;
            t.next = None;
            self.task_count -= 1;
        }
    }

    /// Remove a task from scheduling. Returns whether the caller should
    /// yield (the victim was running).
    pub(crate) fn suspend(&mut self, id: TaskId) -> Result<bool> {
        self.check(id)?;
        self.remove_from_ready(id);
        let t = &mut self.tasks[id.index()];
        t.state = TaskState::Suspended;
        t.wake_at = None;
        Ok(self.current == Some(id))
    }

    /// Make a suspended task Ready again. Resuming a task that is not
    /// suspended is a no-op. Returns whether the resumed task outranks
    /// the running one.
    pub(crate) fn resume(&mut self, id: TaskId) -> Result<bool> {
        self.check(id)?;
        if self.tasks[id.index()].state != TaskState::Suspended {
            return Ok(false);
        }
        self.enqueue_ready(id);
        Ok(self.outranks_current(id))
    }

    // -----------------------------------------------------------------------
    // Ready lists
    // -----------------------------------------------------------------------

    /// Append a task at the tail of its priority's ready list.
    pub(crate) fn enqueue_ready(&mut self, id: TaskId) {
        let prio = self.tasks[id.index()].priority as usize;
        self.tasks[id.index()].state = TaskState::Ready;
        self.tasks[id.index()].next = None;

        match self.ready[prio] {
            None => self.ready[prio] = Some(id),
            Some(head) => {
                let mut tail = head;
                while let Some(n) = self.tasks[tail.index()].next {
                    tail = n;
                }
                self.tasks[tail.index()].next = Some(id);
            }
        }
    }

    /// Unlink a task from whichever ready list holds it, if any.
    fn remove_from_ready(&mut self, id: TaskId) -> bool {
        for prio in 0..NUM_PRIORITIES {
            let mut prev: Option<TaskId> = None;
            let mut cursor = self.ready[prio];
            while let Some(c) = cursor {
                let next = self.tasks[c.index()].next;
                if c == id {
                    match prev {
                        None => self.ready[prio] = next,
                        Some(p) => self.tasks[p.index()].next = next,
                    }
                    self.tasks[c.index()].next = None;
                    return true;
                }
                prev = cursor;
                cursor = next;
            }
        }
        false
    }

    /// Pop the highest-priority ready task; fall back to the idle task
    /// when every list is empty.
    fn pick_next(&mut self) -> Option<TaskId> {
        for prio in 0..NUM_PRIORITIES {
            if let Some(head) = self.ready[prio] {
                self.ready[prio] = self.tasks[head.index()].next;
                self.tasks[head.index()].next = None;
                return Some(head);
            }
        }
        self.idle.filter(|i| self.tasks[i.index()].active)
    }

    /// Whether `id` has a strictly higher priority than the running task.
    fn outranks_current(&self, id: TaskId) -> bool {
        match self.current {
            Some(cur) => self.tasks[id.index()].priority < self.tasks[cur.index()].priority,
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    /// Make `next` the running task and grant it a fresh time slice.
    fn dispatch(&mut self, next: TaskId) {
        if self.current != Some(next) {
            self.context_switches = self.context_switches.wrapping_add(1);
        }
        self.tasks[next.index()].state = TaskState::Running;
        self.tasks[next.index()].time_slice = TIME_SLICE_TICKS;
        self.current = Some(next);
    }

    /// The scheduling decision proper: requeue the outgoing task at the
    /// tail of its priority level (round-robin) if it is still Running,
    /// then dispatch the highest-priority ready task.
    ///
    /// Returns the new running task so the port can load its stack
    /// pointer. Returns `None` only before the idle task exists.
    pub(crate) fn reschedule(&mut self) -> Option<TaskId> {
        if let Some(cur) = self.current {
            if self.tasks[cur.index()].state == TaskState::Running {
                self.enqueue_ready(cur);
            }
        }
        let next = self.pick_next()?;
        self.dispatch(next);
        Some(next)
    }

    /// Record the outgoing task's stack pointer. Called by the context
    /// switcher before the scheduling decision.
    #[cfg_attr(not(all(target_arch = "arm", target_os = "none")), allow(dead_code))]
    pub(crate) fn save_context(&mut self, psp: *mut u32) {
        if let Some(cur) = self.current {
            self.tasks[cur.index()].stack_ptr = psp;
        }
    }

    #[cfg_attr(not(all(target_arch = "arm", target_os = "none")), allow(dead_code))]
    pub(crate) fn stack_ptr_of(&self, id: TaskId) -> *mut u32 {
        self.tasks[id.index()].stack_ptr
    }

    // -----------------------------------------------------------------------
    // Tick handling
    // -----------------------------------------------------------------------

    /// Per-tick bookkeeping. `charge` controls whether the running task is
    /// billed for the tick (the hosted simulation advances time without
    /// charging anyone). Returns whether a reschedule is needed.
    pub(crate) fn handle_tick(&mut self, now: u32, charge: bool) -> bool {
        let mut resched = false;

        // Wake sleepers whose tick has arrived.
        for i in 0..MAX_TASKS {
            let due = {
                let t = &self.tasks[i];
                t.active
                    && t.state == TaskState::Blocked
                    && t.wake_at.is_some_and(|wake| time::reached(now, wake))
            };
            if due && self.ready_task(TaskId(i as u8)) {
                resched = true;
            }
        }

        if charge {
            if let Some(cur) = self.current {
                let t = &mut self.tasks[cur.index()];
                if t.active {
                    t.run_time = t.run_time.wrapping_add(1);
                    if t.time_slice > 0 {
                        t.time_slice -= 1;
                    }
                    if t.time_slice == 0 {
                        resched = true;
                    }
                }
            }
        }

        resched
    }

    /// Zero the running task's slice so the next scheduling point switches.
    pub(crate) fn expire_slice(&mut self) {
        if let Some(cur) = self.current {
            self.tasks[cur.index()].time_slice = 0;
        }
    }

    /// Put the running task to sleep. `wake_at` of `None` sleeps until
    /// another task or ISR readies it explicitly.
    pub(crate) fn block_current(&mut self, wake_at: Option<u32>) {
        if let Some(cur) = self.current {
            let t = &mut self.tasks[cur.index()];
            t.state = TaskState::Blocked;
            t.wake_at = wake_at;
        }
    }

    /// Cancel a block placed on the running task before it ever yielded.
    /// Used to roll back a wait whose setup failed partway.
    pub(crate) fn unblock_current(&mut self) {
        if let Some(cur) = self.current {
            let t = &mut self.tasks[cur.index()];
            if t.state == TaskState::Blocked {
                t.state = TaskState::Running;
                t.wake_at = None;
            }
        }
    }

    /// Ready a blocked or suspended task. Returns whether it outranks the
    /// running task (the caller should then force a reschedule).
    pub(crate) fn ready_task(&mut self, id: TaskId) -> bool {
        let t = &mut self.tasks[id.index()];
        if !t.active || t.state == TaskState::Ready || t.state == TaskState::Running {
            return false;
        }
        t.wake_at = None;
        self.enqueue_ready(id);
        self.outranks_current(id)
    }

    /// Re-adopt `id` as the running task after a wait completes. On ports
    /// with a real context switch the dispatcher has already done this and
    /// the call is a no-op; on the hosted port it models the dispatch.
    pub(crate) fn resume_after_wait(&mut self, id: TaskId) -> bool {
        match self.tasks[id.index()].state {
            TaskState::Running => self.current == Some(id),
            TaskState::Ready => {
                self.remove_from_ready(id);
                self.tasks[id.index()].state = TaskState::Running;
                self.current = Some(id);
                true
            }
            _ => false,
        }
    }

    // -----------------------------------------------------------------------
    // Dynamic priority adjustment
    // -----------------------------------------------------------------------

    /// Permanently change a task's priority: both current and base move.
    /// A Ready task is re-queued at the tail of its new level. Returns
    /// whether the caller should yield (the running task dropped below a
    /// peer, or another task now outranks the running one).
    pub(crate) fn set_priority(&mut self, id: TaskId, priority: Priority) -> Result<bool> {
        self.check(id)?;
        let old = self.tasks[id.index()].priority;
        self.tasks[id.index()].priority = priority;
        self.tasks[id.index()].base_priority = priority;
        self.requeue_if_ready(id);

        if self.current == Some(id) {
            // The running task lowered itself below potential peers.
            return Ok(priority > old);
        }
        Ok(self.outranks_current(id))
    }

    /// Transiently raise a task's priority (numerically lower). The base
    /// priority is untouched; `reset_priority` undoes the raise. Used by
    /// the mutex to apply priority inheritance.
    pub(crate) fn raise_priority(&mut self, id: TaskId, priority: Priority) -> Result<bool> {
        self.check(id)?;
        if priority >= self.tasks[id.index()].priority {
            return Ok(false); // only ever raise
        }
        self.tasks[id.index()].priority = priority;
        self.requeue_if_ready(id);
        Ok(self.current != Some(id) && self.outranks_current(id))
    }

    /// Drop a task back to its base priority, releasing any inheritance.
    pub(crate) fn reset_priority(&mut self, id: TaskId) -> Result<bool> {
        self.check(id)?;
        let old = self.tasks[id.index()].priority;
        let base = self.tasks[id.index()].base_priority;
        self.tasks[id.index()].priority = base;
        self.requeue_if_ready(id);
        Ok(self.current == Some(id) && base > old)
    }

    fn requeue_if_ready(&mut self, id: TaskId) {
        if self.tasks[id.index()].state == TaskState::Ready {
            self.remove_from_ready(id);
            self.enqueue_ready(id);
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    pub(crate) fn count_state(&self, state: TaskState) -> u32 {
        self.tasks
            .iter()
            .filter(|t| t.active && t.state == state)
            .count() as u32
    }
}

// ---------------------------------------------------------------------------
// Stack initialization helper
// ---------------------------------------------------------------------------

/// Prime a task's stack with the synthetic initial context frame.
///
/// The Cortex-M4 hardware pushes an exception frame on interrupt entry;
/// we pre-populate that frame so the first context switch into the task
/// "returns" straight into its entry function, with the task parameter
/// in R0 per the AAPCS.
///
/// ## Stack layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (exit trampoline — runs if the entry function returns)
///   R12, R3, R2, R1 (0)
///   R0    (task parameter)
/// [Software saved context]
///   R11..R4 (0)             <- stack_ptr after priming
/// ```
fn prime_stack(tcb: &mut Tcb) {
    let Some(entry) = tcb.entry else {
        return;
    };
    // TaskStack is 8-aligned and STACK_WORDS * 4 is a multiple of 8, so
    // the frame lands on an 8-byte boundary as the AAPCS requires.
    let base = tcb.stack.0.as_mut_ptr();
    let frame = unsafe { base.add(STACK_WORDS - 16) };

    let exit: extern "C" fn() -> ! = crate::kernel::task_exit;
    unsafe {
        for i in 0..8 {
            *frame.add(i) = 0; // R4-R11
        }
        *frame.add(8) = tcb.param as u32; // R0 — entry parameter
        for i in 9..13 {
            *frame.add(i) = 0; // R1-R3, R12
        }
        *frame.add(13) = exit as usize as u32; // LR
        *frame.add(14) = entry as usize as u32; // PC
        *frame.add(15) = 0x0100_0000; // xPSR — Thumb bit
    }
    tcb.stack_ptr = frame;
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
