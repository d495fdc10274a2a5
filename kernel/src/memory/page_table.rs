//! Two-level translation tables.
//!
//! A directory holds 4096 first-level descriptors, one per 1MB section.
//! Sections in use point at a 256-entry second-level table of small-page
//! descriptors. Second-level tables are created on first use and recycled
//! when a section becomes empty again.

use heapless::Vec;
use log::{debug, trace};

use super::{
    DESCRIPTOR_SIZE, FIRST_LEVEL_ALIGN_SHIFT, FIRST_LEVEL_ENTRIES, FIRST_LEVEL_TABLE_SIZE,
    FirstLevelDescriptor, Frame, MemoryError, MemoryLayout, MemoryResult, PAGE_SIZE, PageFlags,
    PhysicalAddress, SECOND_LEVEL_ALIGN_SHIFT, SECOND_LEVEL_ENTRIES, SECOND_LEVEL_TABLE_SIZE,
    SECTION_SIZE, SecondLevelDescriptor, TableHeap, VirtualAddress,
};

/// Second-level tables kept for reuse before storage goes back to the heap
pub const RECYCLED_TABLE_POOL: usize = 64;

const TTBR_BASE_MASK: u32 = 0xFFFF_C000;

/// Physical address of a first-level directory (16KB aligned)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageTableBase(PhysicalAddress);

impl PageTableBase {
    /// Wrap a directory address
    pub const fn new(addr: PhysicalAddress) -> MemoryResult<Self> {
        if addr.is_aligned(FIRST_LEVEL_ALIGN_SHIFT) {
            Ok(Self(addr))
        } else {
            Err(MemoryError::AlignmentError)
        }
    }

    /// Directory named by a raw TTBR value (walk attribute bits dropped)
    pub const fn from_register(raw: u32) -> Self {
        Self(PhysicalAddress::new(raw & TTBR_BASE_MASK))
    }

    /// Physical address of the directory
    pub const fn address(self) -> PhysicalAddress {
        self.0
    }
}

/// Builds and edits translation tables stored in a [`TableHeap`]
pub struct PageTableManager<H: TableHeap> {
    heap: H,
    recycled: Vec<PhysicalAddress, RECYCLED_TABLE_POOL>,
    live_tables: usize,
    directories: usize,
}

impl<H: TableHeap> PageTableManager<H> {
    /// Manager drawing table storage from `heap`
    pub const fn new(heap: H) -> Self {
        Self {
            heap,
            recycled: Vec::new(),
            live_tables: 0,
            directories: 0,
        }
    }

    /// Underlying storage
    pub fn heap(&self) -> &H {
        &self.heap
    }

    /// Second-level tables currently linked into a directory
    pub fn live_tables(&self) -> usize {
        self.live_tables
    }

    /// Second-level tables waiting in the reuse pool
    pub fn recycled_tables(&self) -> usize {
        self.recycled.len()
    }

    /// Directories built so far
    pub fn directories(&self) -> usize {
        self.directories
    }

    fn first_level_slot(table: PageTableBase, va: VirtualAddress) -> PhysicalAddress {
        table.address().offset(va.first_level_index() as u32 * DESCRIPTOR_SIZE)
    }

    fn second_level_slot(l2_table: PhysicalAddress, va: VirtualAddress) -> PhysicalAddress {
        l2_table.offset(va.second_level_index() as u32 * DESCRIPTOR_SIZE)
    }

    /// First-level descriptor governing `va`
    pub fn first_level_entry(&self, table: PageTableBase, va: VirtualAddress) -> FirstLevelDescriptor {
        FirstLevelDescriptor::decode(self.heap.read_word(Self::first_level_slot(table, va)))
    }

    /// Replace the first-level descriptor governing `va`
    pub fn set_first_level_entry(
        &mut self,
        table: PageTableBase,
        va: VirtualAddress,
        descriptor: FirstLevelDescriptor,
    ) {
        self.heap
            .write_word(Self::first_level_slot(table, va), descriptor.encode());
    }

    /// Second-level descriptor for `va` inside the table at `l2_table`
    pub fn second_level_entry(&self, l2_table: PhysicalAddress, va: VirtualAddress) -> SecondLevelDescriptor {
        SecondLevelDescriptor::decode(self.heap.read_word(Self::second_level_slot(l2_table, va)))
    }

    /// Replace the second-level descriptor for `va` inside the table at `l2_table`
    pub fn set_second_level_entry(
        &mut self,
        l2_table: PhysicalAddress,
        va: VirtualAddress,
        descriptor: SecondLevelDescriptor,
    ) {
        self.heap
            .write_word(Self::second_level_slot(l2_table, va), descriptor.encode());
    }

    /// Walk both levels; `None` when no second-level table covers `va`
    pub fn lookup(&self, table: PageTableBase, va: VirtualAddress) -> Option<SecondLevelDescriptor> {
        match self.first_level_entry(table, va) {
            FirstLevelDescriptor::Absent => None,
            FirstLevelDescriptor::Table(l2) => Some(self.second_level_entry(l2, va)),
        }
    }

    /// Fresh second-level table with every entry unmapped
    pub fn allocate_second_level_table(&mut self) -> MemoryResult<PhysicalAddress> {
        let l2 = match self.recycled.pop() {
            Some(l2) => l2,
            None => self
                .heap
                .allocate(SECOND_LEVEL_TABLE_SIZE, SECOND_LEVEL_ALIGN_SHIFT)?,
        };
        for index in 0..SECOND_LEVEL_ENTRIES {
            self.heap.write_word(
                l2.offset(index as u32 * DESCRIPTOR_SIZE),
                SecondLevelDescriptor::Unmapped.encode(),
            );
        }
        self.live_tables += 1;
        trace!("second-level table at {l2}");
        Ok(l2)
    }

    /// Fresh directory with every section absent
    pub fn allocate_directory(&mut self) -> MemoryResult<PageTableBase> {
        let addr = self
            .heap
            .allocate(FIRST_LEVEL_TABLE_SIZE, FIRST_LEVEL_ALIGN_SHIFT)?;
        for index in 0..FIRST_LEVEL_ENTRIES {
            self.heap.write_word(
                addr.offset(index as u32 * DESCRIPTOR_SIZE),
                FirstLevelDescriptor::Absent.encode(),
            );
        }
        self.directories += 1;
        PageTableBase::new(addr)
    }

    /// Second-level table covering `va`, created if the section has none
    pub fn ensure_second_level_table(
        &mut self,
        table: PageTableBase,
        va: VirtualAddress,
    ) -> MemoryResult<PhysicalAddress> {
        match self.first_level_entry(table, va) {
            FirstLevelDescriptor::Table(l2) => Ok(l2),
            FirstLevelDescriptor::Absent => {
                let l2 = self.allocate_second_level_table()?;
                self.set_first_level_entry(table, va, FirstLevelDescriptor::Table(l2));
                Ok(l2)
            }
        }
    }

    /// Map the page at `va` to `frame`; the section must already have a table
    pub fn bind(
        &mut self,
        table: PageTableBase,
        va: VirtualAddress,
        frame: Frame,
        flags: PageFlags,
    ) -> MemoryResult<()> {
        match self.first_level_entry(table, va) {
            FirstLevelDescriptor::Absent => Err(MemoryError::MissingTable),
            FirstLevelDescriptor::Table(l2) => {
                self.set_second_level_entry(l2, va, SecondLevelDescriptor::Page { frame, flags });
                Ok(())
            }
        }
    }

    /// Unmap the page at `va`, returning the frame it mapped
    pub fn unbind(&mut self, table: PageTableBase, va: VirtualAddress) -> Option<Frame> {
        let FirstLevelDescriptor::Table(l2) = self.first_level_entry(table, va) else {
            return None;
        };
        let frame = self.second_level_entry(l2, va).frame()?;
        self.set_second_level_entry(l2, va, SecondLevelDescriptor::Unmapped);
        Some(frame)
    }

    /// Whether no entry of the second-level table maps anything
    pub fn is_table_empty(&self, l2_table: PhysicalAddress) -> bool {
        (0..SECOND_LEVEL_ENTRIES).all(|index| {
            let word = self
                .heap
                .read_word(l2_table.offset(index as u32 * DESCRIPTOR_SIZE));
            SecondLevelDescriptor::decode(word) == SecondLevelDescriptor::Unmapped
        })
    }

    /// Drop the section's table if it maps nothing; returns whether it did
    pub fn collapse_section(&mut self, table: PageTableBase, va: VirtualAddress) -> bool {
        let FirstLevelDescriptor::Table(l2) = self.first_level_entry(table, va) else {
            return false;
        };
        if !self.is_table_empty(l2) {
            return false;
        }
        self.set_first_level_entry(table, va, FirstLevelDescriptor::Absent);
        self.live_tables -= 1;
        if self.recycled.push(l2).is_err() {
            self.heap
                .release(l2, SECOND_LEVEL_TABLE_SIZE, SECOND_LEVEL_ALIGN_SHIFT);
        }
        trace!("section {} collapsed", va.section_base());
        true
    }

    fn identity_map(
        &mut self,
        table: PageTableBase,
        start: u32,
        end: u32,
        flags: PageFlags,
    ) -> MemoryResult<()> {
        for section in (start..end).step_by(SECTION_SIZE as usize) {
            let l2 = self.ensure_second_level_table(table, VirtualAddress::new(section))?;
            for page in (section..section + SECTION_SIZE).step_by(PAGE_SIZE as usize) {
                let descriptor = SecondLevelDescriptor::Page {
                    frame: Frame::containing(PhysicalAddress::new(page)),
                    flags,
                };
                self.set_second_level_entry(l2, VirtualAddress::new(page), descriptor);
            }
        }
        Ok(())
    }

    /// Build the kernel directory.
    ///
    /// Identity maps the kernel window with [`PageFlags::KERNEL`] and the
    /// peripheral window with [`PageFlags::DEVICE`]; everything else,
    /// including the whole user window, starts absent.
    pub fn build_kernel_table(&mut self, layout: &MemoryLayout) -> MemoryResult<PageTableBase> {
        layout.validate()?;
        let table = self.allocate_directory()?;
        self.identity_map(table, 0, layout.kernel_heap_end.as_u32(), PageFlags::KERNEL)?;
        self.identity_map(
            table,
            layout.device_start.as_u32(),
            layout.device_end_exclusive(),
            PageFlags::DEVICE,
        )?;
        debug!(
            "kernel directory at {} with {} second-level tables",
            table.address(),
            self.live_tables
        );
        Ok(table)
    }

    /// Directory for a new process sharing the kernel and device sections of `kernel`
    pub fn new_address_space(
        &mut self,
        kernel: PageTableBase,
        layout: &MemoryLayout,
    ) -> MemoryResult<PageTableBase> {
        let table = self.allocate_directory()?;
        let shared = (0..layout.kernel_heap_end.as_u32())
            .step_by(SECTION_SIZE as usize)
            .chain(
                (layout.device_start.as_u32()..layout.device_end_exclusive())
                    .step_by(SECTION_SIZE as usize),
            );
        for section in shared {
            let va = VirtualAddress::new(section);
            let descriptor = self.first_level_entry(kernel, va);
            self.set_first_level_entry(table, va, descriptor);
        }
        debug!("address space at {}", table.address());
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::ArenaHeap;

    fn manager() -> PageTableManager<ArenaHeap> {
        let heap = ArenaHeap::new(PhysicalAddress::new(0x0080_0000), 256 * 1024).unwrap();
        PageTableManager::new(heap)
    }

    #[test]
    fn kernel_table_identity_maps_kernel_and_devices() {
        let mut tables = manager();
        let layout = MemoryLayout::DEFAULT;
        let kernel = tables.build_kernel_table(&layout).unwrap();

        assert!(kernel.address().is_aligned(FIRST_LEVEL_ALIGN_SHIFT));
        assert_eq!(tables.live_tables(), 32);

        let code = tables.lookup(kernel, VirtualAddress::new(0x0000_8000)).unwrap();
        assert_eq!(
            code,
            SecondLevelDescriptor::Page {
                frame: Frame::from_index(8),
                flags: PageFlags::KERNEL
            }
        );
        let uart = tables.lookup(kernel, VirtualAddress::new(0x2020_1000)).unwrap();
        assert_eq!(
            uart,
            SecondLevelDescriptor::Page {
                frame: Frame::from_index(0x20201),
                flags: PageFlags::DEVICE
            }
        );
        let last = tables.lookup(kernel, VirtualAddress::new(0x20FF_F000)).unwrap();
        assert_eq!(last.frame(), Some(Frame::from_index(0x20FFF)));

        for va in [0x0100_0000, 0x1000_0000, 0x1FF0_0000, 0x2100_0000, 0xFFF0_0000] {
            assert_eq!(tables.lookup(kernel, VirtualAddress::new(va)), None);
        }
    }

    #[test]
    fn fresh_second_level_table_is_all_unmapped() {
        let mut tables = manager();
        let l2 = tables.allocate_second_level_table().unwrap();
        assert!(l2.is_aligned(SECOND_LEVEL_ALIGN_SHIFT));
        assert!(tables.is_table_empty(l2));
    }

    #[test]
    fn bind_requires_a_second_level_table() {
        let mut tables = manager();
        let dir = tables.allocate_directory().unwrap();
        let va = VirtualAddress::new(0x0130_2000);
        let frame = Frame::from_index(0x1234);

        assert_eq!(
            tables.bind(dir, va, frame, PageFlags::USER),
            Err(MemoryError::MissingTable)
        );

        tables.ensure_second_level_table(dir, va).unwrap();
        tables.bind(dir, va, frame, PageFlags::USER).unwrap();
        assert_eq!(tables.lookup(dir, va).and_then(SecondLevelDescriptor::frame), Some(frame));

        assert_eq!(tables.unbind(dir, va), Some(frame));
        assert_eq!(tables.unbind(dir, va), None);
    }

    #[test]
    fn empty_sections_are_recycled() {
        let mut tables = manager();
        let dir = tables.allocate_directory().unwrap();
        let va = VirtualAddress::new(0x0150_0000);

        let l2 = tables.ensure_second_level_table(dir, va).unwrap();
        tables.bind(dir, va, Frame::from_index(0x1500), PageFlags::USER).unwrap();
        assert!(!tables.collapse_section(dir, va));

        tables.unbind(dir, va);
        assert!(tables.collapse_section(dir, va));
        assert_eq!(tables.first_level_entry(dir, va), FirstLevelDescriptor::Absent);
        assert_eq!(tables.recycled_tables(), 1);
        assert_eq!(tables.live_tables(), 0);

        let reused = tables.ensure_second_level_table(dir, VirtualAddress::new(0x0170_0000)).unwrap();
        assert_eq!(reused, l2);
        assert!(tables.is_table_empty(reused));
    }

    #[test]
    fn tables_beyond_the_pool_go_back_to_the_heap() {
        const OVERFLOW: usize = 3;
        let mut tables = manager();
        let dir = tables.allocate_directory().unwrap();
        let sections: std::vec::Vec<_> = (0..RECYCLED_TABLE_POOL + OVERFLOW)
            .map(|index| VirtualAddress::new(0x0100_0000 + index as u32 * SECTION_SIZE))
            .collect();

        for &va in &sections {
            tables.ensure_second_level_table(dir, va).unwrap();
        }
        let free_while_live = tables.heap().free_bytes();

        for &va in &sections {
            assert!(tables.collapse_section(dir, va));
        }
        assert_eq!(tables.recycled_tables(), RECYCLED_TABLE_POOL);
        assert_eq!(tables.live_tables(), 0);
        assert_eq!(
            tables.heap().free_bytes() - free_while_live,
            OVERFLOW * SECOND_LEVEL_TABLE_SIZE
        );

        for &va in &sections {
            let l2 = tables.ensure_second_level_table(dir, va).unwrap();
            assert!(tables.is_table_empty(l2));
        }
        assert_eq!(tables.recycled_tables(), 0);
        assert_eq!(tables.live_tables(), sections.len());
        assert_eq!(tables.heap().free_bytes(), free_while_live);
    }

    #[test]
    fn address_spaces_share_kernel_sections_only() {
        let mut tables = manager();
        let layout = MemoryLayout::DEFAULT;
        let kernel = tables.build_kernel_table(&layout).unwrap();
        let process = tables.new_address_space(kernel, &layout).unwrap();

        assert_ne!(kernel, process);
        for va in [0x0000_0000, 0x00F0_0000, 0x2000_0000, 0x20F0_0000] {
            let va = VirtualAddress::new(va);
            assert_eq!(tables.first_level_entry(process, va), tables.first_level_entry(kernel, va));
        }

        let user = VirtualAddress::new(0x0100_0000);
        tables.ensure_second_level_table(process, user).unwrap();
        assert!(tables.first_level_entry(process, user).is_present());
        assert!(!tables.first_level_entry(kernel, user).is_present());
    }

    #[test]
    fn table_register_value_is_masked() {
        let base = PageTableBase::from_register(0x0080_4059);
        assert_eq!(base.address(), PhysicalAddress::new(0x0080_4000));
        assert_eq!(
            PageTableBase::new(PhysicalAddress::new(0x0080_1000)),
            Err(MemoryError::AlignmentError)
        );
    }
}
