//! ARM Architecture Implementation
//!
//! This module provides the ARM1176 / ARMv7-A side of the architecture
//! layer: CP15 access for the MMU, the SWI entry stub and a PL011 debug
//! console.
//!
//! # Exception Vector Table
//!
//! The table lives wherever [`boot`] places it; VBAR points the core at it.
//! Offsets within the table:
//! - 0x00: Reset
//! - 0x04: Undefined Instruction
//! - 0x08: Software Interrupt (SWI/SVC) -> [`exceptions::swi_handler`]
//! - 0x0C: Prefetch Abort
//! - 0x10: Data Abort
//! - 0x14: Reserved
//! - 0x18: IRQ
//! - 0x1C: FIQ

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

#[cfg(target_os = "none")]
pub mod boot;
pub mod exceptions;
pub mod mmu;

pub use mmu::ArmMmu;

/// PL011 UART0 of the selected board
pub const UART_BASE: usize = super::board::UART_BASE.as_usize();

const UART_DR: usize = 0x00;
const UART_FR: usize = 0x18;
const UART_LCRH: usize = 0x2C;
const UART_CR: usize = 0x30;
const UART_FR_TXFF: u32 = 1 << 5;

/// ARM-specific debug writer implementation
pub struct DebugWriterImpl {
    /// UART base address for debug output
    uart_base: usize,
}

impl DebugWriterImpl {
    /// Create a new ARM debug writer
    pub const fn new() -> Self {
        Self {
            uart_base: UART_BASE,
        }
    }

    /// Initialize UART for debug output
    fn init_uart(&self) {
        // SAFETY: The UART window is identity mapped with device attributes
        unsafe {
            let uart_base = self.uart_base as *mut u32;

            // UART Line Control Register - 8 bits, no parity, 1 stop bit, FIFOs on
            uart_base.add(UART_LCRH / 4).write_volatile(0x70);

            // UART Control Register - enable UART, TX, RX
            uart_base.add(UART_CR / 4).write_volatile(0x301);
        }
    }

    /// Write a single character to UART
    fn write_char(&self, c: u8) {
        // SAFETY: The UART window is identity mapped with device attributes
        unsafe {
            let uart_base = self.uart_base as *mut u32;
            let data_register = uart_base.add(UART_DR / 4);
            let flag_register = uart_base.add(UART_FR / 4);

            while (flag_register.read_volatile() & UART_FR_TXFF) != 0 {
                core::hint::spin_loop();
            }

            data_register.write_volatile(u32::from(c));
        }
    }
}

impl Default for DebugWriterImpl {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Write for DebugWriterImpl {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        for byte in s.bytes() {
            // Convert LF to CRLF for proper terminal output
            if byte == b'\n' {
                self.write_char(b'\r');
            }
            self.write_char(byte);
        }
        Ok(())
    }
}

/// Initialize early debugging support
pub fn early_debug_init() {
    DebugWriterImpl::new().init_uart();
}

/// Memory barrier implementations
pub mod barriers {
    use core::arch::asm;

    /// Data synchronization barrier
    pub fn dsb() {
        // SAFETY: Memory barrier instructions are safe
        unsafe {
            asm!("mcr p15, 0, {}, c7, c10, 4", in(reg) 0u32, options(nostack, preserves_flags));
        }
    }

    /// Instruction synchronization barrier
    pub fn isb() {
        // SAFETY: Memory barrier instructions are safe
        unsafe {
            asm!("mcr p15, 0, {}, c7, c5, 4", in(reg) 0u32, options(nostack, preserves_flags));
        }
    }
}

/// Restart the board through the power-management watchdog
#[cfg(feature = "raspberry-pi")]
pub fn reboot() -> ! {
    const PM_RSTC: usize = 0x2010_001C;
    const PM_WDOG: usize = 0x2010_0024;
    const PM_PASSWORD: u32 = 0x5A00_0000;
    const PM_RSTC_WRCFG_FULL_RESET: u32 = 0x20;

    // SAFETY: The PM block lies in the identity-mapped device window
    unsafe {
        (PM_WDOG as *mut u32).write_volatile(PM_PASSWORD | 1);
        (PM_RSTC as *mut u32).write_volatile(PM_PASSWORD | PM_RSTC_WRCFG_FULL_RESET);
    }
    halt()
}

/// Restart by jumping to the reset vector
#[cfg(not(feature = "raspberry-pi"))]
pub fn reboot() -> ! {
    // SAFETY: The reset vector is identity mapped and never returns
    unsafe {
        core::arch::asm!("mov pc, #0", options(noreturn));
    }
}

/// Halt the core
pub fn halt() -> ! {
    loop {
        // SAFETY: Wait-for-interrupt has no memory effects
        unsafe {
            core::arch::asm!("mcr p15, 0, {}, c7, c0, 4", in(reg) 0u32, options(nomem, nostack));
        }
    }
}
