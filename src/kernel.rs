//! # Kernel
//!
//! Top-level kernel state and the public API surface of FemtOS.
//!
//! All mutable kernel state lives in a single cell guarded by the
//! `critical-section` crate; [`borrow_mut`] is the one access point, so
//! every mutation is auditable and interrupt-safe by construction. On
//! Cortex-M the critical-section implementation masks PRIMASK
//! (single-core); on hosted builds the `critical-section/std`
//! implementation stands in.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset handler
//!   └─► main()
//!         ├─► kernel::init()        ← idle task, heap, tick counter
//!         ├─► kernel::create_task() ← register tasks (×N)
//!         └─► kernel::start()       ← SysTick on, launch first task (no return)
//! ```
//!
//! The tick ISR calls [`tick`] at `TICK_HZ`; it performs scheduler
//! accounting, wakes sleeping tasks, runs the software-timer expiry scan,
//! and requests a context switch when the running task must change.

use core::cell::{RefCell, RefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::CriticalSection;

use crate::arch;
use crate::config::{Priority, MAX_TASKS, PRIORITY_IDLE, TICK_HZ};
use crate::error::{KernelError, Result};
use crate::heap;
use crate::scheduler::Scheduler;
use crate::task::{TaskEntry, TaskId, TaskState};
use crate::timer::TimerService;

// ---------------------------------------------------------------------------
// Global kernel state
// ---------------------------------------------------------------------------

/// Monotonic tick counter, written by the tick ISR. Kept outside the
/// kernel cell so timeout polling can read it without taking a critical
/// section.
static TICK: AtomicU32 = AtomicU32::new(0);

/// Everything the kernel mutates: the scheduler (task table, ready
/// lists) and the software timer service. The heap keeps its own cell
/// in [`crate::heap`].
pub(crate) struct Kernel {
    pub(crate) sched: Scheduler,
    pub(crate) timers: TimerService,
    pub(crate) idle_hook: Option<fn()>,
}

impl Kernel {
    const fn new() -> Self {
        Self {
            sched: Scheduler::new(),
            timers: TimerService::new(),
            idle_hook: None,
        }
    }
}

static KERNEL: critical_section::Mutex<RefCell<Kernel>> =
    critical_section::Mutex::new(RefCell::new(Kernel::new()));

/// Borrow the kernel. The only access point to kernel state; callable
/// exclusively inside a critical section, which on a single core makes
/// the borrow exclusive against both tasks and ISRs.
pub(crate) fn borrow_mut(cs: CriticalSection<'_>) -> RefMut<'_, Kernel> {
    KERNEL.borrow_ref_mut(cs)
}

// ---------------------------------------------------------------------------
// Initialization and startup
// ---------------------------------------------------------------------------

/// The idle task: runs at the lowest priority whenever nothing else is
/// ready, parking the CPU until the next interrupt (or running the
/// registered idle hook).
extern "C" fn idle_main(_arg: usize) {
    loop {
        let hook = critical_section::with(|cs| borrow_mut(cs).idle_hook);
        match hook {
            Some(hook) => hook(),
            None => arch::idle_wait(),
        }
    }
}

/// Initialize the kernel: reset all kernel state, create the idle task,
/// and format the heap pool.
///
/// Must be called once before any other kernel function, from the main
/// thread, before [`start`].
pub fn init() {
    critical_section::with(|cs| {
        let mut k = borrow_mut(cs);
        *k = Kernel::new();
        if let Ok(id) = k.sched.create_task("idle", idle_main, 0, PRIORITY_IDLE) {
            k.sched.idle = Some(id);
        }
    });
    TICK.store(0, Ordering::Relaxed);
    heap::init();
}

/// Start the scheduler. **Does not return.**
///
/// Configures SysTick, sets the exception priorities, dispatches the
/// highest-priority ready task, and switches into it.
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;

    cortex_m4::configure_systick(&mut peripherals.SYST);
    cortex_m4::set_interrupt_priorities();

    let first_sp = critical_section::with(|cs| {
        let mut k = borrow_mut(cs);
        match k.sched.reschedule() {
            Some(first) => k.sched.stack_ptr_of(first),
            None => core::ptr::null_mut(),
        }
    });

    if first_sp.is_null() {
        // init() was never called; nothing to run.
        loop {
            arch::idle_wait();
        }
    }
    unsafe { cortex_m4::start_first_task(first_sp) }
}

/// Install a hook the idle task runs instead of plain wait-for-interrupt.
/// Lets applications substitute a deeper sleep routine.
pub fn set_idle_hook(hook: Option<fn()>) {
    critical_section::with(|cs| borrow_mut(cs).idle_hook = hook);
}

// ---------------------------------------------------------------------------
// Task management
// ---------------------------------------------------------------------------

/// Create a task and enqueue it as Ready.
///
/// Fails with `NoMemory` when the task table is full.
pub fn create_task(
    name: &'static str,
    entry: TaskEntry,
    param: usize,
    priority: Priority,
) -> Result<TaskId> {
    critical_section::with(|cs| borrow_mut(cs).sched.create_task(name, entry, param, priority))
}

/// Delete a task and free its slot. Deleting the running task switches
/// away immediately and never returns into it.
pub fn task_delete(id: TaskId) -> Result<()> {
    let was_current = critical_section::with(|cs| borrow_mut(cs).sched.delete(id))?;
    if was_current {
        yield_now();
    }
    Ok(())
}

/// Remove a task from scheduling until [`task_resume`].
pub fn task_suspend(id: TaskId) -> Result<()> {
    let was_current = critical_section::with(|cs| borrow_mut(cs).sched.suspend(id))?;
    if was_current {
        yield_now();
    }
    Ok(())
}

/// Make a suspended task Ready. Preempts the caller if the resumed task
/// has a higher priority.
pub fn task_resume(id: TaskId) -> Result<()> {
    let preempt = critical_section::with(|cs| borrow_mut(cs).sched.resume(id))?;
    if preempt {
        yield_now();
    }
    Ok(())
}

/// The running task's handle, if the scheduler has dispatched one.
pub fn current_task() -> Option<TaskId> {
    critical_section::with(|cs| borrow_mut(cs).sched.current)
}

/// A task's current (possibly inherited) priority.
pub fn task_priority(id: TaskId) -> Result<Priority> {
    critical_section::with(|cs| {
        let k = borrow_mut(cs);
        k.sched.check(id)?;
        Ok(k.sched.tasks[id.index()].priority)
    })
}

/// A task's name as given at creation.
pub fn task_name(id: TaskId) -> Result<&'static str> {
    critical_section::with(|cs| {
        let k = borrow_mut(cs);
        k.sched.check(id)?;
        Ok(k.sched.tasks[id.index()].name)
    })
}

/// Permanently change a task's priority (both current and base).
pub fn set_priority(id: TaskId, priority: Priority) -> Result<()> {
    let must_yield = critical_section::with(|cs| borrow_mut(cs).sched.set_priority(id, priority))?;
    if must_yield {
        yield_now();
    }
    Ok(())
}

/// Transiently raise a task's priority; the base priority is untouched
/// and [`reset_priority`] restores it. This is the priority-inheritance
/// hook used by the mutex; it never lowers a priority.
pub fn raise_priority(id: TaskId, priority: Priority) -> Result<()> {
    let must_yield = critical_section::with(|cs| borrow_mut(cs).sched.raise_priority(id, priority))?;
    if must_yield {
        yield_now();
    }
    Ok(())
}

/// Restore a task to its base priority, releasing any inheritance.
pub fn reset_priority(id: TaskId) -> Result<()> {
    let must_yield = critical_section::with(|cs| borrow_mut(cs).sched.reset_priority(id))?;
    if must_yield {
        yield_now();
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Yield and delay
// ---------------------------------------------------------------------------

/// Give up the remainder of the current time slice.
pub fn yield_now() {
    critical_section::with(|cs| borrow_mut(cs).sched.expire_slice());
    arch::request_reschedule();
}

/// Sleep for `ticks` ticks. The task blocks and the tick handler wakes
/// it when the counter reaches the wake tick; a delay of zero yields
/// without blocking.
pub fn delay(ticks: u32) {
    if ticks == 0 {
        yield_now();
        return;
    }
    let Some(me) = current_task() else {
        // No task context yet (scheduler not started): nothing to block.
        return;
    };
    let wake = tick_count().wrapping_add(ticks);
    critical_section::with(|cs| borrow_mut(cs).sched.block_current(Some(wake)));
    loop {
        arch::request_reschedule();
        let resumed = critical_section::with(|cs| borrow_mut(cs).sched.resume_after_wait(me));
        if resumed {
            return;
        }
    }
}

/// Trampoline installed as the LR of every initial frame: runs when a
/// task returns from its entry function.
pub(crate) extern "C" fn task_exit() -> ! {
    critical_section::with(|cs| borrow_mut(cs).sched.exit_current());
    loop {
        arch::request_reschedule();
    }
}

// ---------------------------------------------------------------------------
// Tick handling
// ---------------------------------------------------------------------------

/// Kernel tick entry point. Call from the tick ISR at `TICK_HZ`.
pub fn tick() {
    tick_core(true);
}

/// Advance the kernel by one tick. `charge` controls whether the running
/// task is billed (the hosted simulation clock advances time without
/// charging anyone).
pub(crate) fn tick_core(charge: bool) {
    let now = TICK.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

    let mut resched = critical_section::with(|cs| borrow_mut(cs).sched.handle_tick(now, charge));

    // Software-timer expiry scan. Callbacks run in tick context but
    // outside the critical section; auto-reload timers are re-armed
    // afterwards so a callback restarting its own timer wins.
    let expired = critical_section::with(|cs| borrow_mut(cs).timers.take_expired(now));
    for e in expired.iter().flatten() {
        (e.callback)(e.param);
    }
    critical_section::with(|cs| {
        let mut k = borrow_mut(cs);
        for e in expired.iter().flatten() {
            if e.reload {
                k.timers.rearm(e.id, now);
            }
        }
        // A callback may have readied a higher-priority task.
        if let (Some(cur), true) = (k.sched.current, !resched) {
            let cur_prio = k.sched.tasks[cur.index()].priority;
            resched = k
                .sched
                .tasks
                .iter()
                .any(|t| t.active && t.state == TaskState::Ready && t.priority < cur_prio);
        }
    });

    if resched {
        arch::request_reschedule();
    }
}

/// Current value of the tick counter. Wraps at 32 bits.
pub fn tick_count() -> u32 {
    TICK.load(Ordering::Relaxed)
}

/// Uptime in milliseconds, derived from the tick counter.
pub fn uptime_ms() -> u32 {
    (tick_count() as u64 * 1000 / TICK_HZ as u64) as u32
}

// ---------------------------------------------------------------------------
// Statistics and monitoring
// ---------------------------------------------------------------------------

/// A snapshot of kernel-wide counters.
#[derive(Debug, Clone, Copy)]
pub struct KernelStats {
    pub total_tasks: u32,
    pub running_tasks: u32,
    pub blocked_tasks: u32,
    pub context_switches: u32,
    pub uptime_ticks: u32,
    pub free_heap: usize,
    pub used_heap: usize,
}

/// Collect a consistent snapshot of the kernel counters.
pub fn stats() -> KernelStats {
    let (total, running, blocked, switches) = critical_section::with(|cs| {
        let k = borrow_mut(cs);
        (
            k.sched.task_count as u32,
            k.sched.count_state(TaskState::Running),
            k.sched.count_state(TaskState::Blocked),
            k.sched.context_switches,
        )
    });
    let heap = heap::stats();
    KernelStats {
        total_tasks: total,
        running_tasks: running,
        blocked_tasks: blocked,
        context_switches: switches,
        uptime_ticks: tick_count(),
        free_heap: heap.free_bytes,
        used_heap: heap.used_bytes,
    }
}

/// Percentage of all ticks this task has spent Running (0–100).
pub fn cpu_usage(id: TaskId) -> Result<u8> {
    if id.index() >= MAX_TASKS {
        return Err(KernelError::InvalidParam);
    }
    let run_time = critical_section::with(|cs| {
        let k = borrow_mut(cs);
        k.sched.check(id)?;
        Ok(k.sched.tasks[id.index()].run_time)
    })?;
    let ticks = tick_count();
    if ticks == 0 {
        return Ok(0);
    }
    Ok((run_time as u64 * 100 / ticks as u64) as u8)
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
