//! Memory Management Subsystem
//!
//! This module provides the memory management core of the TrapVM kernel.
//! It is built from four layers, leaves first:
//!
//! - Physical frame allocator (first-fit occupancy bitmap)
//! - Page table manager (ARMv6 short-descriptor L1/L2 tables)
//! - Address translator (table walk with typed "unmapped" results)
//! - Virtual memory manager (user region allocation and release)
//!
//! Page-table storage comes from a [`TableHeap`]; the kernel uses an
//! identity-mapped [`KernelHeap`], hosted builds use an [`ArenaHeap`].
//!
//! # Memory Layout
//!
//! ```text
//! Physical == virtual for the kernel and device windows:
//! 0x00000000 - 0x00FFFFFF : Kernel image and heap (identity, kernel flags)
//! 0x01000000 - 0x1FFFFFFF : User window (per-process, lazily mapped)
//! 0x20000000 - 0x20FFFFFF : Peripherals (identity, device flags)
//! ```

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod address;
mod descriptor;
mod frame;
mod heap;
mod layout;
mod page_table;
mod virtual_memory;

pub use address::{Frame, PhysicalAddress, VirtualAddress};
pub use descriptor::{FORBIDDEN_ADDRESS, FirstLevelDescriptor, PageFlags, SecondLevelDescriptor};
pub use frame::{FRAME_TABLE_ENTRIES, FrameAllocator, FrameState};
#[cfg(not(target_os = "none"))]
pub use heap::ArenaHeap;
pub use heap::{KernelHeap, TableHeap};
pub use layout::MemoryLayout;
pub use page_table::{PageTableBase, PageTableManager, RECYCLED_TABLE_POOL};
pub use virtual_memory::{Translation, Unmapped, VirtualMemoryManager, VmmStats};

use thiserror::Error;

/// Page size (one small page, one frame)
pub const PAGE_SIZE: u32 = 4096;
/// Bits of a virtual address below the page number
pub const PAGE_SHIFT: u32 = 12;
/// Mask selecting the offset inside a page
pub const PAGE_OFFSET_MASK: u32 = PAGE_SIZE - 1;

/// Size of the region governed by one first-level descriptor (1MB)
pub const SECTION_SIZE: u32 = 1 << SECTION_SHIFT;
/// Bits of a virtual address below the first-level index
pub const SECTION_SHIFT: u32 = 20;

/// Number of first-level descriptors
pub const FIRST_LEVEL_ENTRIES: usize = 4096;
/// Size of the first-level directory in bytes
pub const FIRST_LEVEL_TABLE_SIZE: usize = 16 * 1024;
/// log2 of the first-level directory alignment
pub const FIRST_LEVEL_ALIGN_SHIFT: u32 = 14;

/// Number of descriptors in a second-level table
pub const SECOND_LEVEL_ENTRIES: usize = 256;
/// Size of a second-level table in bytes
pub const SECOND_LEVEL_TABLE_SIZE: usize = 1024;
/// log2 of the second-level table alignment
pub const SECOND_LEVEL_ALIGN_SHIFT: u32 = 10;

/// Size in bytes of one table descriptor
pub const DESCRIPTOR_SIZE: u32 = 4;

static_assertions::const_assert_eq!(FIRST_LEVEL_ENTRIES * 4, FIRST_LEVEL_TABLE_SIZE);
static_assertions::const_assert_eq!(SECOND_LEVEL_ENTRIES * 4, SECOND_LEVEL_TABLE_SIZE);
static_assertions::const_assert_eq!(1usize << FIRST_LEVEL_ALIGN_SHIFT, FIRST_LEVEL_TABLE_SIZE);
static_assertions::const_assert_eq!(1usize << SECOND_LEVEL_ALIGN_SHIFT, SECOND_LEVEL_TABLE_SIZE);
static_assertions::const_assert_eq!(SECOND_LEVEL_ENTRIES as u32 * PAGE_SIZE, SECTION_SIZE);

/// Memory management errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum MemoryError {
    /// No free physical frame is left
    #[error("physical frames exhausted")]
    OutOfFrames,
    /// No run of unmapped pages of the requested length in the user window
    #[error("no free virtual region of the requested size")]
    NoFreeRegion,
    /// The table heap cannot provide more page-table storage
    #[error("page-table storage exhausted")]
    OutOfTableStorage,
    /// Size is zero or does not fit the user window
    #[error("invalid region size")]
    InvalidSize,
    /// Address outside the window the operation is allowed to touch
    #[error("invalid address")]
    InvalidAddress,
    /// Address or layout boundary is not suitably aligned
    #[error("misaligned address or layout boundary")]
    AlignmentError,
    /// A page is bound into a region whose second-level table is absent
    #[error("second-level table missing")]
    MissingTable,
    /// `init` ran twice
    #[error("memory manager already initialized")]
    AlreadyInitialized,
    /// Operation requires `init` to have run
    #[error("memory manager not initialized")]
    NotInitialized,
}

/// Result type for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Number of pages needed to hold `size` bytes.
pub fn pages_for(size: usize) -> MemoryResult<u32> {
    if size == 0 {
        return Err(MemoryError::InvalidSize);
    }
    let pages = size.div_ceil(PAGE_SIZE as usize);
    u32::try_from(pages).map_err(|_| MemoryError::InvalidSize)
}
