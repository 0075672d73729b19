//! # FemtOS Configuration
//!
//! Compile-time constants governing kernel behavior. All limits are fixed
//! at compile time — the kernel performs no dynamic allocation of its own
//! structures (the block heap in [`crate::heap`] exists for applications).

use static_assertions::const_assert;

/// Maximum number of tasks, including the idle task. Bounds the static
/// TCB table. Increase with care — each slot carries `STACK_WORDS * 4`
/// bytes of stack.
pub const MAX_TASKS: usize = 8;

/// Maximum number of software timers.
pub const MAX_TIMERS: usize = 8;

/// Tick frequency in Hz. The tick is the unit of all timeouts, delays,
/// and timer periods.
pub const TICK_HZ: u32 = 1000;

/// Scheduling quantum in ticks. A running task is preempted in favor of
/// an equal-priority peer after this many ticks.
pub const TIME_SLICE_TICKS: u32 = 10;

/// Per-task stack size in 32-bit words (1 KiB). Must leave room for the
/// 16-word initial context frame plus the deepest call chain.
pub const STACK_WORDS: usize = 256;

/// Number of distinct priority levels. Priorities are `u8`-valued, so
/// this is fixed at 256.
pub const NUM_PRIORITIES: usize = 256;

/// Total size of the block heap pool in bytes.
pub const HEAP_SIZE: usize = 4096;

/// Allocation granule of the block heap. Every allocation is rounded up
/// to a multiple of this.
pub const HEAP_BLOCK_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Priority ladder
// ---------------------------------------------------------------------------

/// Task priority. Lower numeric value means higher priority.
pub type Priority = u8;

/// Highest priority, reserved for truly latency-critical work.
pub const PRIORITY_CRITICAL: Priority = 0;
/// High priority.
pub const PRIORITY_HIGH: Priority = 64;
/// Default priority for ordinary tasks.
pub const PRIORITY_NORMAL: Priority = 128;
/// Low priority for background work.
pub const PRIORITY_LOW: Priority = 192;
/// Idle priority. Only the idle task should run here.
pub const PRIORITY_IDLE: Priority = 255;

// ---------------------------------------------------------------------------
// Compile-time sanity checks
// ---------------------------------------------------------------------------

const_assert!(MAX_TASKS >= 2); // idle task plus at least one user task
const_assert!(MAX_TASKS <= 255);
const_assert!(MAX_TIMERS >= 1);
const_assert!(MAX_TIMERS <= 255);
const_assert!(STACK_WORDS >= 32);
const_assert!(STACK_WORDS % 2 == 0); // keeps primed frames 8-byte aligned
const_assert!(HEAP_SIZE % HEAP_BLOCK_SIZE == 0);
const_assert!(HEAP_BLOCK_SIZE >= 16);
const_assert!(HEAP_BLOCK_SIZE % 8 == 0);
