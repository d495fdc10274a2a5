//! Architecture Abstraction Layer
//!
//! This module isolates the CP15 register traffic and the debug console from
//! the rest of the kernel. The memory manager drives the MMU only through
//! the [`Mmu`] trait, so the same table-building and enable sequence runs
//! against real hardware (`arm::ArmMmu`) or a register model
//! (`hosted::SimulatedMmu`).
//!
//! # Supported Targets
//!
//! - ARM1176JZF-S and later ARMv6/ARMv7-A cores with VMSA and XP=1 tables
//! - Hosted builds (any OS target) for tests and the smoke-boot binary

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

use thiserror::Error;

use crate::memory::PageTableBase;

#[cfg(target_arch = "arm")]
pub mod arm;

#[cfg(not(target_os = "none"))]
pub mod hosted;

#[cfg(all(target_os = "none", not(target_arch = "arm")))]
compile_error!("bare-metal builds support 32-bit ARM only");

/// Debug console writer for the current target
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use arm::DebugWriterImpl as DebugWriter;

/// Debug console writer for the current target
#[cfg(not(target_os = "none"))]
pub use hosted::DebugWriterImpl as DebugWriter;

/// Architecture-specific error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ArchError {
    /// Privileged register access attempted outside a privileged mode
    #[error("privileged operation attempted from user mode")]
    PrivilegeViolation,
    /// The core lacks the VMSA features the page-table format needs
    #[error("MMU does not support ARMv6 extended page tables")]
    UnsupportedMmu,
}

/// Result type for architecture operations
pub type ArchResult<T> = Result<T, ArchError>;

/// CP15 values written while bringing up the MMU
pub mod control {
    /// TTBCR: every address translates through TTBR0
    pub const TTBCR_TTBR0_ONLY: u32 = 0;

    /// DACR: domain 0 is manager (permission checks bypassed), others no access
    pub const DACR_DOMAIN0_MANAGER: u32 = 0x3;

    /// SCTLR with MMU, caches and write buffer off
    pub const SCTLR_ALL_OFF: u32 = 0;

    /// SCTLR.M: MMU enable
    pub const SCTLR_MMU: u32 = 1 << 0;
    /// SCTLR bit 4, should be one on ARM1176
    pub const SCTLR_SBO: u32 = 1 << 4;
    /// SCTLR.L4: ARMv4 behaviour for loads to PC
    pub const SCTLR_L4: u32 = 1 << 15;
    /// SCTLR.XP: ARMv6 extended page table format, subpages off
    pub const SCTLR_XP: u32 = 1 << 23;

    /// SCTLR value that turns translation on with the ARMv6 descriptor format
    pub const SCTLR_TRANSLATION_ON: u32 = SCTLR_XP | SCTLR_L4 | SCTLR_SBO | SCTLR_MMU;

    static_assertions::const_assert_eq!(SCTLR_TRANSLATION_ON, 0x0080_8011);
}

/// Board the kernel image is built for.
///
/// The debug UART and the memory layout are chosen together so that the
/// console stays inside the identity-mapped device window once
/// translation is on.
pub mod board {
    use crate::memory::{MemoryLayout, PhysicalAddress};

    /// PL011 UART0 on QEMU versatilepb
    pub const VERSATILE_PB_UART: PhysicalAddress = PhysicalAddress::new(0x101F_1000);

    /// PL011 UART0 on the BCM2835
    pub const BCM2835_UART: PhysicalAddress = PhysicalAddress::new(0x2020_1000);

    /// Debug UART of the selected board
    #[cfg(not(feature = "raspberry-pi"))]
    pub const UART_BASE: PhysicalAddress = VERSATILE_PB_UART;

    /// Layout `kmain` boots with on the selected board
    #[cfg(not(feature = "raspberry-pi"))]
    pub const LAYOUT: MemoryLayout = MemoryLayout::VERSATILE_PB;

    /// Debug UART of the selected board
    #[cfg(feature = "raspberry-pi")]
    pub const UART_BASE: PhysicalAddress = BCM2835_UART;

    /// Layout `kmain` boots with on the selected board
    #[cfg(feature = "raspberry-pi")]
    pub const LAYOUT: MemoryLayout = MemoryLayout::DEFAULT;

    const _: () = assert!(LAYOUT.in_device_window(UART_BASE));
}

/// Translation-control registers of the memory management unit.
///
/// Each method is a single register write or maintenance operation; the
/// ordering that makes them a valid enable sequence lives in
/// [`crate::memory::VirtualMemoryManager`].
pub trait Mmu {
    /// Directory the table walker currently uses (TTBR0)
    fn active_table(&self) -> PageTableBase;

    /// Load TTBR0 and TTBR1 with `table`
    fn set_translation_bases(&mut self, table: PageTableBase);

    /// Write TTBCR
    fn set_translation_control(&mut self, ttbcr: u32);

    /// Write DACR
    fn set_domain_access(&mut self, dacr: u32);

    /// Write SCTLR
    fn write_control(&mut self, sctlr: u32);

    /// Invalidate instruction and data caches
    fn invalidate_caches(&mut self);

    /// Invalidate the unified TLB
    fn invalidate_tlb(&mut self);
}
