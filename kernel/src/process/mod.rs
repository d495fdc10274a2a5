//! Process-side view of address spaces
//!
//! Scheduling and process lifecycle live outside this crate. What the
//! memory manager and trap dispatcher need from a process is small: an
//! identifier and the directory that translates its addresses. This module
//! defines that contract and a minimal control block that satisfies it.

#![deny(missing_docs)]

use crate::memory::PageTableBase;

/// Process identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(u32);

impl ProcessId {
    /// Create a new process ID
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Special process ID for the kernel
    pub const KERNEL: ProcessId = ProcessId(0);

    /// Special process ID for the init process
    pub const INIT: ProcessId = ProcessId(1);
}

/// Anything that owns an address space
pub trait ProcessHandle {
    /// Identifier of the process
    fn id(&self) -> ProcessId;

    /// Directory translating the process's addresses
    fn page_table(&self) -> PageTableBase;
}

/// Which directory a memory operation walks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableSelector {
    /// The directory of a specific process
    Process(PageTableBase),
    /// Whatever directory TTBR0 currently holds
    CurrentHardwareTable,
}

impl TableSelector {
    /// Selector for `process`, or the hardware table when there is none
    pub fn of<P: ProcessHandle + ?Sized>(process: Option<&P>) -> Self {
        process.map_or(Self::CurrentHardwareTable, |process| {
            Self::Process(process.page_table())
        })
    }
}

/// Minimal process control block: identity plus address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Process {
    /// Process identifier
    pub id: ProcessId,
    /// Process directory
    pub page_table: PageTableBase,
}

impl Process {
    /// Create a control block
    pub const fn new(id: ProcessId, page_table: PageTableBase) -> Self {
        Self { id, page_table }
    }
}

impl ProcessHandle for Process {
    fn id(&self) -> ProcessId {
        self.id
    }

    fn page_table(&self) -> PageTableBase {
        self.page_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::PhysicalAddress;

    #[test]
    fn selector_prefers_the_process_table() {
        let table = PageTableBase::new(PhysicalAddress::new(0x0080_8000)).unwrap();
        let process = Process::new(ProcessId::INIT, table);
        assert_eq!(process.id().as_u32(), 1);

        assert_eq!(TableSelector::of(Some(&process)), TableSelector::Process(table));
        assert_eq!(
            TableSelector::of::<Process>(None),
            TableSelector::CurrentHardwareTable
        );
    }
}
