//! Board memory layout.

use super::{MemoryError, MemoryResult, PAGE_SHIFT, PhysicalAddress, SECTION_SHIFT, VirtualAddress};
use super::frame::FRAME_TABLE_ENTRIES;

/// Physical and virtual windows the memory manager works with.
///
/// The kernel and device windows are identity mapped into every address
/// space; the user window is handed out page by page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLayout {
    /// End (exclusive) of the kernel image and heap, identity mapped from 0
    pub kernel_heap_end: PhysicalAddress,
    /// End (exclusive) of installed RAM; frames above it are never handed out
    pub ram_end: PhysicalAddress,
    /// First byte of the peripheral window
    pub device_start: PhysicalAddress,
    /// Last byte (inclusive) of the peripheral window
    pub device_end: PhysicalAddress,
    /// First byte of the user window
    pub user_start: VirtualAddress,
    /// End (exclusive) of the user window
    pub user_end: VirtualAddress,
}

impl MemoryLayout {
    /// Raspberry Pi (BCM2835) layout: 16MB kernel, 512MB RAM, 16MB of peripherals
    pub const DEFAULT: Self = Self {
        kernel_heap_end: PhysicalAddress::new(0x0100_0000),
        ram_end: PhysicalAddress::new(0x2000_0000),
        device_start: PhysicalAddress::new(0x2000_0000),
        device_end: PhysicalAddress::new(0x20FF_FFFF),
        user_start: VirtualAddress::new(0x0100_0000),
        user_end: VirtualAddress::new(0x1FFF_FFFF),
    };

    /// QEMU versatilepb layout: 16MB kernel, 128MB RAM, 16MB of peripherals at 0x10000000
    pub const VERSATILE_PB: Self = Self {
        kernel_heap_end: PhysicalAddress::new(0x0100_0000),
        ram_end: PhysicalAddress::new(0x0800_0000),
        device_start: PhysicalAddress::new(0x1000_0000),
        device_end: PhysicalAddress::new(0x10FF_FFFF),
        user_start: VirtualAddress::new(0x0100_0000),
        user_end: VirtualAddress::new(0x0800_0000),
    };

    /// Whether `addr` lies inside the identity-mapped device window
    pub const fn in_device_window(&self, addr: PhysicalAddress) -> bool {
        addr.as_u32() >= self.device_start.as_u32() && addr.as_u32() <= self.device_end.as_u32()
    }

    /// End (exclusive) of the device window
    pub const fn device_end_exclusive(&self) -> u32 {
        self.device_end.as_u32() + 1
    }

    /// Whether `va` lies inside the user window
    pub const fn in_user_window(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.user_start.as_u32() && va.as_u32() < self.user_end.as_u32()
    }

    /// Number of pages whose base lies in the user window
    pub const fn user_pages(&self) -> u32 {
        (self.user_end.as_u32() - self.user_start.as_u32()).div_ceil(1 << PAGE_SHIFT)
    }

    /// Check the layout against what the page-table builder can express.
    ///
    /// Identity windows must start and end on 1MB boundaries, the user
    /// window must be page aligned and must not overlap either identity
    /// window, and every frame must fit the occupancy table.
    pub fn validate(&self) -> MemoryResult<()> {
        let section_aligned = |addr: u32| addr & ((1 << SECTION_SHIFT) - 1) == 0;

        if self.device_end.as_u32() == u32::MAX {
            return Err(MemoryError::InvalidAddress);
        }
        if !section_aligned(self.kernel_heap_end.as_u32())
            || !section_aligned(self.device_start.as_u32())
            || !section_aligned(self.device_end_exclusive())
            || !self.user_start.is_page_aligned()
        {
            return Err(MemoryError::AlignmentError);
        }
        if self.user_start.as_u32() >= self.user_end.as_u32()
            || self.user_start.as_u32() < self.kernel_heap_end.as_u32()
            || self.user_end.as_u32() > self.device_start.as_u32()
            || self.ram_end.as_u32() < self.kernel_heap_end.as_u32()
            || self.ram_end.as_u32() > self.device_start.as_u32()
        {
            return Err(MemoryError::InvalidAddress);
        }
        if (self.device_end_exclusive() >> PAGE_SHIFT) as usize > FRAME_TABLE_ENTRIES {
            return Err(MemoryError::InvalidAddress);
        }
        Ok(())
    }
}

impl Default for MemoryLayout {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_layout_is_valid() {
        assert_eq!(MemoryLayout::DEFAULT.validate(), Ok(()));
        assert_eq!(MemoryLayout::DEFAULT.device_end_exclusive(), 0x2100_0000);
        assert_eq!(MemoryLayout::DEFAULT.user_pages(), 126_976);
    }

    #[test]
    fn versatile_layout_is_valid() {
        let layout = MemoryLayout::VERSATILE_PB;
        assert_eq!(layout.validate(), Ok(()));
        assert_eq!(layout.user_pages(), 28_672);
        assert!(layout.in_device_window(PhysicalAddress::new(0x101F_1000)));
        assert!(!layout.in_device_window(PhysicalAddress::new(0x1100_0000)));
        assert!(!layout.in_user_window(VirtualAddress::new(0x1000_0000)));
    }

    #[test]
    fn kernel_window_must_be_section_aligned() {
        let layout = MemoryLayout {
            kernel_heap_end: PhysicalAddress::new(0x00F0_1000),
            ..MemoryLayout::DEFAULT
        };
        assert_eq!(layout.validate(), Err(MemoryError::AlignmentError));
    }

    #[test]
    fn user_window_may_not_overlap_kernel() {
        let layout = MemoryLayout {
            user_start: VirtualAddress::new(0x00F0_0000),
            ..MemoryLayout::DEFAULT
        };
        assert_eq!(layout.validate(), Err(MemoryError::InvalidAddress));
    }

    #[test]
    fn user_window_membership() {
        let layout = MemoryLayout::DEFAULT;
        assert!(!layout.in_user_window(VirtualAddress::new(0x00FF_FFFF)));
        assert!(layout.in_user_window(VirtualAddress::new(0x0100_0000)));
        assert!(layout.in_user_window(VirtualAddress::new(0x1FFF_F000)));
        assert!(!layout.in_user_window(VirtualAddress::new(0x2000_0000)));
    }
}
