//! # Architecture Abstraction Layer
//!
//! The kernel is portable through a narrow port surface: a critical-
//! section primitive (supplied by the `critical-section` crate), a
//! context-switch request, and a wait-for-interrupt idle hint.
//!
//! Two ports exist: the Cortex-M4 port (PendSV/SysTick, bare metal) and
//! a hosted simulation port used when the crate is built for an
//! operating-system target, e.g. while running the unit tests.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(not(all(target_arch = "arm", target_os = "none")))]
pub mod hosted;

/// Ask the port to perform a context switch at the next opportunity.
/// On Cortex-M this pends PendSV; the switch happens once no other
/// exception is active (immediately, from thread mode).
#[inline]
pub(crate) fn request_reschedule() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m4::request_reschedule();
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    hosted::request_reschedule();
}

/// Park the CPU until the next interrupt. Used by the idle task.
#[inline]
pub(crate) fn idle_wait() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m4::idle_wait();
    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    hosted::idle_wait();
}
