//! ARMv6 short-format translation table descriptors (XP = 1).
//!
//! ```text
//! First level, coarse page table:
//! 31                      10 9  5 4 3 2 1 0
//! |  L2 table base address  | .. | . . . 0 1 |
//!
//! Second level, small page:
//! 31           12 11 10  9  8 6  5 4  3 2  1  0
//! | frame base   | nG | S | APX | TEX | AP | C B | 1 | XN |
//! ```
//!
//! A descriptor whose two low bits are zero is treated as absent. The
//! decoders return typed variants, so the rest of the kernel never
//! compares raw words against a sentinel.

use bitflags::bitflags;

use super::{Frame, PhysicalAddress};

/// Raw value written to a second-level entry that maps nothing
pub const FORBIDDEN_ADDRESS: u32 = 0x0000_0000;

const DESCRIPTOR_TYPE_MASK: u32 = 0b11;
const COARSE_TABLE_TYPE: u32 = 0b01;
const COARSE_TABLE_BASE_MASK: u32 = 0xFFFF_FC00;
const SMALL_PAGE_BASE_MASK: u32 = 0xFFFF_F000;
const SMALL_PAGE_ATTR_MASK: u32 = 0x0000_0FFF;

bitflags! {
    /// Attribute bits of a small-page descriptor
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PageFlags: u32 {
        /// Execute never
        const EXECUTE_NEVER = 1 << 0;
        /// Descriptor type: small page
        const SMALL_PAGE = 1 << 1;
        /// Bufferable
        const BUFFERABLE = 1 << 2;
        /// Cacheable
        const CACHEABLE = 1 << 3;
        /// Access permission bit 0
        const AP0 = 1 << 4;
        /// Access permission bit 1
        const AP1 = 1 << 5;
        /// Type extension bit 0
        const TEX0 = 1 << 6;
        /// Type extension bit 1
        const TEX1 = 1 << 7;
        /// Type extension bit 2
        const TEX2 = 1 << 8;
        /// Access permission extension (read-only when set)
        const APX = 1 << 9;
        /// Shareable
        const SHARED = 1 << 10;
        /// Not global (ASID tagged)
        const NOT_GLOBAL = 1 << 11;
    }
}

impl PageFlags {
    /// Kernel RAM: privileged read/write, normal memory, no user access
    pub const KERNEL: Self = Self::SMALL_PAGE.union(Self::AP0).union(Self::TEX0);

    /// Peripherals: privileged read/write, shared device memory
    pub const DEVICE: Self = Self::SMALL_PAGE
        .union(Self::BUFFERABLE)
        .union(Self::AP0)
        .union(Self::SHARED);

    /// User RAM: full access from user mode, normal memory
    pub const USER: Self = Self::SMALL_PAGE
        .union(Self::AP0)
        .union(Self::AP1)
        .union(Self::TEX0);

    /// Whether unprivileged code may touch the page
    pub const fn user_accessible(self) -> bool {
        self.contains(Self::AP1)
    }
}

static_assertions::const_assert_eq!(PageFlags::KERNEL.bits(), 0x052);
static_assertions::const_assert_eq!(PageFlags::DEVICE.bits(), 0x416);
static_assertions::const_assert_eq!(PageFlags::USER.bits(), 0x072);

/// Entry of the first-level directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirstLevelDescriptor {
    /// No second-level table governs this 1MB region
    Absent,
    /// Points to a second-level table (1KB aligned)
    Table(PhysicalAddress),
}

impl FirstLevelDescriptor {
    /// Decode a raw descriptor word
    pub const fn decode(raw: u32) -> Self {
        if raw & DESCRIPTOR_TYPE_MASK == 0 {
            Self::Absent
        } else {
            Self::Table(PhysicalAddress::new(raw & COARSE_TABLE_BASE_MASK))
        }
    }

    /// Raw descriptor word
    pub const fn encode(self) -> u32 {
        match self {
            Self::Absent => 0,
            Self::Table(base) => (base.as_u32() & COARSE_TABLE_BASE_MASK) | COARSE_TABLE_TYPE,
        }
    }

    /// Whether the descriptor points to a table
    pub const fn is_present(self) -> bool {
        matches!(self, Self::Table(_))
    }
}

/// Entry of a second-level table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SecondLevelDescriptor {
    /// The page maps nothing
    Unmapped,
    /// The page maps a frame with the given attributes
    Page {
        /// Backing frame
        frame: Frame,
        /// Attribute bits
        flags: PageFlags,
    },
}

impl SecondLevelDescriptor {
    /// Decode a raw descriptor word
    pub const fn decode(raw: u32) -> Self {
        if raw & DESCRIPTOR_TYPE_MASK == 0 {
            Self::Unmapped
        } else {
            Self::Page {
                frame: Frame::containing(PhysicalAddress::new(raw & SMALL_PAGE_BASE_MASK)),
                flags: PageFlags::from_bits_truncate(raw & SMALL_PAGE_ATTR_MASK),
            }
        }
    }

    /// Raw descriptor word
    pub const fn encode(self) -> u32 {
        match self {
            Self::Unmapped => FORBIDDEN_ADDRESS,
            Self::Page { frame, flags } => frame.base().as_u32() | flags.bits(),
        }
    }

    /// Backing frame, if mapped
    pub const fn frame(self) -> Option<Frame> {
        match self {
            Self::Unmapped => None,
            Self::Page { frame, .. } => Some(frame),
        }
    }
}
