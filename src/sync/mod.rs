//! # Synchronization Primitives
//!
//! Mutex with priority inheritance, counting semaphore, event group,
//! condition variable, and bounded message queue.
//!
//! All primitives are caller-allocated value types with `const fn new`,
//! intended to be embedded in `static`s or application structures; the
//! kernel never owns them. Internal state sits behind critical sections,
//! so every method takes `&self` and is callable from task context (and,
//! for the non-blocking operations, from timer callbacks).
//!
//! Blocking follows the polling-plus-yield discipline: a waiter checks
//! its condition inside a critical section, and on failure yields the
//! CPU and retries until the condition holds or the deadline passes.
//! The scheduler's priority ordering decides which of several pollers
//! wins. The condition variable is the exception: its waiters genuinely
//! block and are woken by `signal`/`broadcast` (or by the tick handler
//! on timeout), preserving FIFO wake order.

mod condvar;
mod event;
mod mutex;
mod queue;
mod semaphore;

pub use condvar::CondVar;
pub use event::{EventGroup, WaitMode};
pub use mutex::Mutex;
pub use queue::Queue;
pub use semaphore::Semaphore;
