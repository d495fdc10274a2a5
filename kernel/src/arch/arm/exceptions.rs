//! ARM Exception Handling
//!
//! Entry stub for the software interrupt vector.
//!
//! # Exception Handling Process
//!
//! 1. **Hardware Response**: `svc #0` enters Supervisor mode, LR_svc holds the return address
//! 2. **Vector Handler**: the stub pushes r0-r12 and LR_svc as one block
//! 3. **Rust Handler**: [`crate::syscalls::trap_entry`] gets a pointer to that block
//! 4. **Context Restore**: the block is popped back, `^` restores CPSR from SPSR_svc
//!
//! SVC entry masks IRQs, and nothing in the handler re-enables them, so
//! the save and restore are never interleaved with another trap.

use core::arch::naked_asm;

use crate::syscalls::TrapFrame;

static_assertions::const_assert_eq!(core::mem::size_of::<TrapFrame>(), 14 * 4);

/// SWI vector target.
///
/// Saves the caller's registers into a [`TrapFrame`] on the supervisor
/// stack, calls the dispatcher with its address, then restores every
/// register from the frame and returns to the caller's mode.
#[unsafe(naked)]
#[unsafe(no_mangle)]
pub unsafe extern "C" fn swi_handler() {
    naked_asm!(
        "stmfd sp!, {{r0-r12, lr}}",
        "mov r0, sp",
        "bl {entry}",
        "ldmfd sp!, {{r0-r12, pc}}^",
        entry = sym crate::syscalls::trap_entry,
    );
}
