//! Address and frame newtypes.
//!
//! ```text
//! 31        20 19      12 11        0
//! | L1 index  | L2 index |  offset   |
//! ```

use core::fmt;

use super::{PAGE_OFFSET_MASK, PAGE_SHIFT, PAGE_SIZE, SECTION_SHIFT};

/// A 32-bit virtual address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtualAddress(u32);

impl VirtualAddress {
    /// Create a virtual address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Raw value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Index into the first-level directory (bits 31:20)
    pub const fn first_level_index(self) -> usize {
        (self.0 >> SECTION_SHIFT) as usize
    }

    /// Index into a second-level table (bits 19:12)
    pub const fn second_level_index(self) -> usize {
        ((self.0 >> PAGE_SHIFT) & 0xFF) as usize
    }

    /// Offset inside the page (bits 11:0)
    pub const fn page_offset(self) -> u32 {
        self.0 & PAGE_OFFSET_MASK
    }

    /// Start of the containing page
    pub const fn page_base(self) -> Self {
        Self(self.0 & !PAGE_OFFSET_MASK)
    }

    /// Start of the containing 1MB section
    pub const fn section_base(self) -> Self {
        Self(self.0 & !((1 << SECTION_SHIFT) - 1))
    }

    /// Whether the address starts a page
    pub const fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }

    /// Address `pages` pages further on, if it does not wrap
    pub fn checked_add_pages(self, pages: u32) -> Option<Self> {
        pages
            .checked_mul(PAGE_SIZE)
            .and_then(|bytes| self.0.checked_add(bytes))
            .map(Self)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VA({:#010x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A 32-bit physical address
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct PhysicalAddress(u32);

impl PhysicalAddress {
    /// Create a physical address
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Raw value
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Raw value widened for pointer arithmetic
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Whether the address is a multiple of `1 << shift`
    pub const fn is_aligned(self, shift: u32) -> bool {
        self.0 & ((1 << shift) - 1) == 0
    }

    /// Address `bytes` further on
    pub const fn offset(self, bytes: u32) -> Self {
        Self(self.0 + bytes)
    }
}

impl fmt::Debug for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PA({:#010x})", self.0)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A 4KB physical frame, identified by its index (`base / PAGE_SIZE`)
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Frame(u32);

impl Frame {
    /// Frame with the given index
    pub const fn from_index(index: u32) -> Self {
        Self(index)
    }

    /// Frame containing `addr`
    pub const fn containing(addr: PhysicalAddress) -> Self {
        Self(addr.as_u32() >> PAGE_SHIFT)
    }

    /// Index in the frame occupancy table
    pub const fn index(self) -> u32 {
        self.0
    }

    /// Physical base address
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame#{}@{:#010x}", self.0, self.base().as_u32())
    }
}
