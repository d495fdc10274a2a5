//! ARM Memory Management Unit (MMU) Implementation
//!
//! CP15 accessors behind the [`Mmu`] trait. The ARMv6 CP15 encodings are
//! used throughout (barriers and WFI through c7) so the same code runs on
//! the ARM1176 and on ARMv7-A cores.
//!
//! # Registers
//!
//! ```text
//! c1,  c0, 0 : SCTLR  system control
//! c2,  c0, 0 : TTBR0  translation table base 0
//! c2,  c0, 1 : TTBR1  translation table base 1
//! c2,  c0, 2 : TTBCR  translation table base control
//! c3,  c0, 0 : DACR   domain access control
//! c7,  c7, 0 : invalidate both caches
//! c8,  c7, 0 : invalidate unified TLB
//! ```

use core::arch::asm;

use super::barriers;
use crate::arch::{ArchError, ArchResult, Mmu};
use crate::memory::PageTableBase;

const CPSR_MODE_MASK: u32 = 0x1F;
const CPSR_MODE_USER: u32 = 0x10;
const ID_MMFR0_VMSA_MASK: u32 = 0xF;
/// VMSAv6 with the extended (XP) descriptor format
const VMSA_V6_EXTENDED: u32 = 3;

/// The CP15 MMU of the running core
pub struct ArmMmu {
    _private: (),
}

impl ArmMmu {
    /// Take control of the MMU.
    ///
    /// # Safety
    ///
    /// At most one `ArmMmu` may exist; it owns the translation registers.
    pub unsafe fn new() -> ArchResult<Self> {
        let cpsr: u32;
        let mmfr0: u32;
        // SAFETY: Reading CPSR and ID_MMFR0 has no side effects
        unsafe {
            asm!("mrs {}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags));
        }
        if cpsr & CPSR_MODE_MASK == CPSR_MODE_USER {
            return Err(ArchError::PrivilegeViolation);
        }
        // SAFETY: Privileged mode confirmed above
        unsafe {
            asm!("mrc p15, 0, {}, c0, c1, 4", out(reg) mmfr0, options(nomem, nostack, preserves_flags));
        }
        if mmfr0 & ID_MMFR0_VMSA_MASK < VMSA_V6_EXTENDED {
            return Err(ArchError::UnsupportedMmu);
        }
        Ok(Self { _private: () })
    }
}

impl Mmu for ArmMmu {
    fn active_table(&self) -> PageTableBase {
        let ttbr0: u32;
        // SAFETY: Reading TTBR0 in a privileged mode has no side effects
        unsafe {
            asm!("mrc p15, 0, {}, c2, c0, 0", out(reg) ttbr0, options(nomem, nostack, preserves_flags));
        }
        PageTableBase::from_register(ttbr0)
    }

    fn set_translation_bases(&mut self, table: PageTableBase) {
        let base = table.address().as_u32();
        // SAFETY: `table` is a 16KB aligned directory mapping the running kernel
        unsafe {
            asm!(
                "mcr p15, 0, {base}, c2, c0, 0",
                "mcr p15, 0, {base}, c2, c0, 1",
                base = in(reg) base,
                options(nostack, preserves_flags)
            );
        }
        barriers::isb();
    }

    fn set_translation_control(&mut self, ttbcr: u32) {
        // SAFETY: Privileged register write owned by this MMU instance
        unsafe {
            asm!("mcr p15, 0, {}, c2, c0, 2", in(reg) ttbcr, options(nostack, preserves_flags));
        }
    }

    fn set_domain_access(&mut self, dacr: u32) {
        // SAFETY: Privileged register write owned by this MMU instance
        unsafe {
            asm!("mcr p15, 0, {}, c3, c0, 0", in(reg) dacr, options(nostack, preserves_flags));
        }
    }

    fn write_control(&mut self, sctlr: u32) {
        barriers::dsb();
        // SAFETY: Privileged register write; the kernel is identity mapped so
        // execution continues at the same address across the switch
        unsafe {
            asm!("mcr p15, 0, {}, c1, c0, 0", in(reg) sctlr, options(nostack, preserves_flags));
        }
        barriers::isb();
    }

    fn invalidate_caches(&mut self) {
        // SAFETY: Caches are off while this runs during bring-up
        unsafe {
            asm!("mcr p15, 0, {}, c7, c7, 0", in(reg) 0u32, options(nostack, preserves_flags));
        }
    }

    fn invalidate_tlb(&mut self) {
        // SAFETY: TLB maintenance only drops cached translations
        unsafe {
            asm!("mcr p15, 0, {}, c8, c7, 0", in(reg) 0u32, options(nostack, preserves_flags));
        }
        barriers::dsb();
        barriers::isb();
    }
}
