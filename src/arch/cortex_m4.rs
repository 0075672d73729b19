//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick configuration, the PendSV context switch, and the first-task
//! launch sequence.
//!
//! ## Context Switch Mechanism
//!
//! Tasks run in Thread mode on the process stack (PSP); the kernel and
//! all handlers use the main stack (MSP). On exception entry the hardware
//! stacks R0–R3, R12, LR, PC, and xPSR onto the process stack; the PendSV
//! handler saves and restores R4–R11 manually, completing the context.
//!
//! Both PendSV and SysTick run at the lowest exception priority, so a
//! context switch never preempts another handler.

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::syst::SystClkSource;

use crate::config::TICK_HZ;

/// Core clock frequency the SysTick reload is derived from (16 MHz HSI
/// default on STM32F4-class parts).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure SysTick to fire at `TICK_HZ` from the core clock. Each tick
/// enters `SysTick()` below, which drives the scheduler.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Reschedule request and idle
// ---------------------------------------------------------------------------

/// Pend a PendSV exception to perform a context switch. PendSV runs at
/// the lowest priority, so the switch is deferred past any active ISR.
#[inline]
pub(crate) fn request_reschedule() {
    // ICSR address: 0xE000_ED04, PENDSVSET = bit 28
    const ICSR: *mut u32 = 0xE000_ED04 as *mut u32;
    unsafe {
        core::ptr::write_volatile(ICSR, 1 << 28);
    }
}

/// Wait for the next interrupt.
#[inline]
pub(crate) fn idle_wait() {
    cortex_m::asm::wfi();
}

/// Set PendSV and SysTick to the lowest exception priority so context
/// switches never preempt application ISRs.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority, [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3) | (0xFF << 16) | (0xFF << 24);
        core::ptr::write_volatile(shpr3, val);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Switch Thread mode onto the process stack and branch into the first
/// task via its primed frame. Called once from `kernel::start`; never
/// returns.
///
/// # Safety
/// `psp` must point at a frame primed by the scheduler, and the caller
/// must not be in an exception context.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Skip the software-saved R4-R11 slots of the primed frame.
        "adds r0, #32",
        "msr psp, r0",
        // Thread mode uses PSP from here on (CONTROL.SPSEL = 1).
        "movs r0, #2",
        "msr control, r0",
        "isb",
        // Pop the hardware frame by hand; this is a launch, not a real
        // exception return.
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR slot (exit trampoline)
        "pop {{r5}}",          // PC (task entry)
        "pop {{r6}}",          // xPSR (discarded)
        "mov lr, r4",
        "cpsie i",
        "bx r5",
        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — the context switch itself.
///
/// 1. Push R4–R11 onto the outgoing task's process stack
/// 2. Record the resulting PSP in the outgoing TCB
/// 3. Run the scheduling decision, obtaining the incoming PSP
/// 4. Pop R4–R11 from the incoming stack and return; the hardware
///    restores the rest of the frame
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",
        "bl {switch_context}",
        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",
        // Return to Thread mode on the process stack.
        "ldr r0, =0xFFFFFFFD",
        "bx r0",
        save_context = sym save_context,
        switch_context = sym switch_context,
    );
}

/// Record the outgoing task's stack pointer. Called from PendSV.
#[no_mangle]
unsafe extern "C" fn save_context(psp: *mut u32) {
    critical_section::with(|cs| crate::kernel::borrow_mut(cs).sched.save_context(psp));
}

/// Run the scheduling decision and return the incoming task's PSP.
/// Called from PendSV.
#[no_mangle]
unsafe extern "C" fn switch_context() -> *mut u32 {
    critical_section::with(|cs| {
        let mut k = crate::kernel::borrow_mut(cs);
        match k.sched.reschedule() {
            Some(next) => k.sched.stack_ptr_of(next),
            // No dispatchable task: resume the interrupted one.
            None => match k.sched.current {
                Some(cur) => k.sched.stack_ptr_of(cur),
                None => core::ptr::null_mut(),
            },
        }
    })
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — the kernel tick entry point.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    crate::kernel::tick();
}
