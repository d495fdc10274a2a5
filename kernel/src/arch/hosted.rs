//! Hosted backends.
//!
//! A register model of the MMU that records every operation in order, and
//! a debug writer that prints to the host's standard error. Used by the
//! test suites and the hosted smoke-boot binary.

use core::fmt;

use heapless::Vec;

use super::Mmu;
use crate::memory::PageTableBase;

/// Operations recorded before the log is full
pub const MMU_LOG_CAPACITY: usize = 64;

/// One recorded MMU operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MmuOp {
    /// TTBR0 and TTBR1 loaded with the given raw value
    TranslationBases(u32),
    /// TTBCR written
    TranslationControl(u32),
    /// DACR written
    DomainAccess(u32),
    /// SCTLR written
    Control(u32),
    /// Caches invalidated
    InvalidateCaches,
    /// TLB invalidated
    InvalidateTlb,
}

/// Register model of the ARMv6 MMU
#[derive(Debug, Default, Clone)]
pub struct SimulatedMmu {
    /// TTBR0
    pub ttbr0: u32,
    /// TTBR1
    pub ttbr1: u32,
    /// TTBCR
    pub ttbcr: u32,
    /// DACR
    pub dacr: u32,
    /// SCTLR
    pub sctlr: u32,
    log: Vec<MmuOp, MMU_LOG_CAPACITY>,
}

impl SimulatedMmu {
    /// MMU in its reset state
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations in the order they were issued
    pub fn log(&self) -> &[MmuOp] {
        &self.log
    }

    /// Whether translation is switched on
    pub fn translation_enabled(&self) -> bool {
        self.sctlr & super::control::SCTLR_MMU != 0
    }

    fn record(&mut self, op: MmuOp) {
        // Operations past capacity are dropped; tests only look at the boot sequence
        let _ = self.log.push(op);
    }
}

impl Mmu for SimulatedMmu {
    fn active_table(&self) -> PageTableBase {
        PageTableBase::from_register(self.ttbr0)
    }

    fn set_translation_bases(&mut self, table: PageTableBase) {
        self.ttbr0 = table.address().as_u32();
        self.ttbr1 = table.address().as_u32();
        self.record(MmuOp::TranslationBases(self.ttbr0));
    }

    fn set_translation_control(&mut self, ttbcr: u32) {
        self.ttbcr = ttbcr;
        self.record(MmuOp::TranslationControl(ttbcr));
    }

    fn set_domain_access(&mut self, dacr: u32) {
        self.dacr = dacr;
        self.record(MmuOp::DomainAccess(dacr));
    }

    fn write_control(&mut self, sctlr: u32) {
        self.sctlr = sctlr;
        self.record(MmuOp::Control(sctlr));
    }

    fn invalidate_caches(&mut self) {
        self.record(MmuOp::InvalidateCaches);
    }

    fn invalidate_tlb(&mut self) {
        self.record(MmuOp::InvalidateTlb);
    }
}

/// Debug writer printing to standard error
#[derive(Debug, Default)]
pub struct DebugWriterImpl;

impl DebugWriterImpl {
    /// Create a writer
    pub const fn new() -> Self {
        Self
    }
}

impl fmt::Write for DebugWriterImpl {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        use std::io::Write as _;
        std::io::stderr()
            .write_all(s.as_bytes())
            .map_err(|_| fmt::Error)
    }
}
