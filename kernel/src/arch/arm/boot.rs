//! ARM Boot Sequence
//!
//! Reset entry and exception vector table.
//!
//! # Boot Process Overview
//!
//! 1. **Hardware Reset**: the loader jumps to `_start` in Supervisor mode
//! 2. **Interrupts**: IRQ and FIQ are masked
//! 3. **Stack Setup**: SP_svc points at the top of [`BOOT_STACK`]
//! 4. **Exception Vectors**: VBAR is loaded with `trapvm_vectors`
//! 5. **Kernel Entry**: control passes to `kmain`, which never returns
//!
//! Only the SWI slot has a handler. Every other exception parks the core,
//! since nothing in the kernel can recover from it.

use core::arch::global_asm;
use core::cell::UnsafeCell;

/// Size of the supervisor stack used from reset onwards
pub const BOOT_STACK_SIZE: usize = 16 * 1024;

/// Supervisor-mode stack
#[repr(C, align(8))]
pub struct BootStack(UnsafeCell<[u8; BOOT_STACK_SIZE]>);

// SAFETY: Only ever touched through SP_svc by the single core
unsafe impl Sync for BootStack {}

/// Stack handed to SP_svc by `_start`
#[unsafe(no_mangle)]
pub static BOOT_STACK: BootStack = BootStack(UnsafeCell::new([0; BOOT_STACK_SIZE]));

global_asm!(
    r#"
.section ".text.boot", "ax"
.arm
.balign 32
.global trapvm_vectors
trapvm_vectors:
    ldr     pc, =_start             /* reset */
    ldr     pc, =trapvm_park        /* undefined instruction */
    ldr     pc, =swi_handler        /* software interrupt */
    ldr     pc, =trapvm_park        /* prefetch abort */
    ldr     pc, =trapvm_park        /* data abort */
    ldr     pc, =trapvm_park        /* reserved */
    ldr     pc, =trapvm_park        /* IRQ */
    ldr     pc, =trapvm_park        /* FIQ */
.ltorg

.global _start
_start:
    cpsid   if, #0x13               /* SVC mode, IRQ and FIQ masked */

    ldr     sp, =BOOT_STACK
    add     sp, sp, #{stack_size}

    ldr     r0, =trapvm_vectors
    mcr     p15, 0, r0, c12, c0, 0  /* VBAR */
    mov     r0, #0
    mcr     p15, 0, r0, c7, c5, 4   /* prefetch flush */

    bl      kmain

trapvm_park:
    mcr     p15, 0, r0, c7, c0, 4   /* wait for interrupt */
    b       trapvm_park
.ltorg
"#,
    stack_size = const BOOT_STACK_SIZE,
);
