//! # FemtOS — Featherweight Operating System
//!
//! A minimal preemptive RTOS kernel for ARM Cortex-M microcontrollers:
//! priority scheduling with round-robin time slicing, synchronization
//! primitives with priority inheritance, software timers, and a
//! deterministic block heap — in a code footprint measured in single-digit
//! kilobytes.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                    Application Tasks                       │
//! ├───────────────────────────────────────────────────────────┤
//! │                Kernel API (kernel.rs)                      │
//! │   init · create_task · start · yield_now · delay · stats  │
//! ├──────────────┬──────────────────────┬─────────────────────┤
//! │  Scheduler   │   Synchronization    │  Timers & Heap      │
//! │ scheduler.rs │   sync/              │  timer.rs, heap.rs  │
//! │ ─ ready lists│   ─ Mutex (PI)       │  ─ sorted expiry    │
//! │ ─ tick()     │   ─ Semaphore        │    list             │
//! │ ─ reschedule │   ─ EventGroup       │  ─ first-fit block  │
//! │ ─ priorities │   ─ CondVar · Queue  │    allocator        │
//! ├──────────────┴──────────────────────┴─────────────────────┤
//! │              Task Model (task.rs)                          │
//! │       TCB · TaskState · priorities · stack frames          │
//! ├───────────────────────────────────────────────────────────┤
//! │         Port Layer (arch/cortex_m4.rs, arch/hosted.rs)     │
//! │     PendSV · SysTick · first-task launch · WFI idle        │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency Model
//!
//! One CPU, one address space. Tasks share everything; the tick
//! interrupt preempts the running task when its time slice expires or a
//! higher-priority task becomes ready. Every kernel structure is guarded
//! by critical sections (interrupt masking via the `critical-section`
//! crate), and the single kernel cell has exactly one access point, so
//! there is no fine-grained locking to reason about.
//!
//! Blocking APIs take a timeout in ticks, with `0` meaning wait forever;
//! timeout arithmetic wraps, so the 32-bit tick counter rolling over does
//! not produce false timeouts.
//!
//! ## Memory Model
//!
//! - **No implicit allocation**: the task table, timer table, and all
//!   primitives are statically sized; applications embed primitives in
//!   their own `static`s
//! - **Per-task stacks** live inline in the TCB, primed with a synthetic
//!   context frame at creation
//! - **The block heap** ([`heap`]) is the only dynamic memory, and it is
//!   a fixed pool with deterministic first-fit behavior

#![no_std]

#[cfg(test)]
extern crate std;

pub mod arch;
pub mod config;
pub mod error;
pub mod heap;
pub mod kernel;
pub mod sync;
pub mod task;
pub mod timer;

mod scheduler;
mod time;

// ---------------------------------------------------------------------------
// Test support
// ---------------------------------------------------------------------------
