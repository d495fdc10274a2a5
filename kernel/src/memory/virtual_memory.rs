//! Virtual Memory Manager
//!
//! Owns the frame allocator, the page-table manager and the MMU, and
//! implements the operations the rest of the kernel sees:
//!
//! - `init` builds the kernel directory and switches translation on
//! - `translate` walks a directory and reports why an address is unmapped
//! - `allocate_region` maps the lowest free run of user pages to fresh frames
//! - `free_region` unmaps a run, returns its frames and collapses empty sections
//!
//! Operations take a [`TableSelector`]: a process's own directory, or
//! whatever directory the hardware currently walks.

use log::{debug, info, trace, warn};

use super::{
    FirstLevelDescriptor, FrameAllocator, MemoryError, MemoryLayout, MemoryResult, PAGE_SHIFT,
    PAGE_SIZE, PageFlags, PageTableBase, PageTableManager, PhysicalAddress, SECTION_SIZE,
    SecondLevelDescriptor, TableHeap, VirtualAddress, pages_for,
};
use crate::arch::{Mmu, control};
use crate::process::TableSelector;

/// Why an address has no physical counterpart
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unmapped {
    /// The governing first-level descriptor is absent
    NoTable,
    /// The second-level table exists but the page maps nothing
    NoFrame,
}

/// Outcome of walking the tables for one address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Translation {
    /// Physical address, page offset preserved
    Mapped(PhysicalAddress),
    /// No mapping
    Unmapped(Unmapped),
}

impl Translation {
    /// Physical address, if mapped
    pub const fn physical(self) -> Option<PhysicalAddress> {
        match self {
            Self::Mapped(pa) => Some(pa),
            Self::Unmapped(_) => None,
        }
    }

    /// Whether the address is mapped
    pub const fn is_mapped(self) -> bool {
        matches!(self, Self::Mapped(_))
    }
}

/// Memory manager statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VmmStats {
    /// User pages currently mapped, across all address spaces
    pub mapped_user_pages: usize,
    /// Frames available for allocation
    pub free_frames: usize,
    /// Second-level tables linked into a directory
    pub live_tables: usize,
    /// Second-level tables waiting for reuse
    pub recycled_tables: usize,
    /// Directories built
    pub directories: usize,
    /// Successful `allocate_region` calls
    pub regions_allocated: u64,
    /// Successful `free_region` calls
    pub regions_freed: u64,
    /// Failed `allocate_region` calls
    pub failed_allocations: u64,
}

/// Virtual memory manager
pub struct VirtualMemoryManager<H: TableHeap, M: Mmu> {
    layout: MemoryLayout,
    tables: PageTableManager<H>,
    frames: FrameAllocator,
    mmu: M,
    kernel_table: Option<PageTableBase>,
    mapped_user_pages: usize,
    regions_allocated: u64,
    regions_freed: u64,
    failed_allocations: u64,
}

impl<H: TableHeap, M: Mmu> VirtualMemoryManager<H, M> {
    /// Manager over `layout`, drawing tables from `heap`; call [`Self::init`] next
    pub fn new(layout: MemoryLayout, heap: H, mmu: M) -> Self {
        Self {
            layout,
            tables: PageTableManager::new(heap),
            frames: FrameAllocator::new(),
            mmu,
            kernel_table: None,
            mapped_user_pages: 0,
            regions_allocated: 0,
            regions_freed: 0,
            failed_allocations: 0,
        }
    }

    /// Boot-time setup.
    ///
    /// Builds the kernel directory, reserves the frames the layout claims,
    /// points the MMU at the directory and turns translation on. Must run
    /// exactly once, before any other operation.
    pub fn init(&mut self) -> MemoryResult<PageTableBase> {
        if self.kernel_table.is_some() {
            return Err(MemoryError::AlreadyInitialized);
        }
        self.layout.validate()?;

        let table = self.tables.build_kernel_table(&self.layout)?;
        self.frames = FrameAllocator::with_layout(&self.layout);
        self.configure_mmu(table);
        self.start_mmu();
        self.kernel_table = Some(table);

        info!(
            "VMM up: kernel directory at {}, {} frames free",
            table.address(),
            self.frames.free_frames()
        );
        Ok(table)
    }

    /// Load both translation bases with `table`, route every address
    /// through TTBR0 and make domain 0 a manager domain
    pub fn configure_mmu(&mut self, table: PageTableBase) {
        self.mmu.set_translation_bases(table);
        self.mmu.set_translation_control(control::TTBCR_TTBR0_ONLY);
        self.mmu.set_domain_access(control::DACR_DOMAIN0_MANAGER);
    }

    /// Caches off, invalidate caches and TLB, then enable translation
    pub fn start_mmu(&mut self) {
        self.mmu.write_control(control::SCTLR_ALL_OFF);
        self.mmu.invalidate_caches();
        self.mmu.invalidate_tlb();
        self.mmu.write_control(control::SCTLR_TRANSLATION_ON);
    }

    /// Point the table walker at another directory (scheduler hook)
    pub fn switch_address_space(&mut self, table: PageTableBase) {
        self.mmu.set_translation_bases(table);
        self.mmu.invalidate_tlb();
        trace!("switched to directory at {}", table.address());
    }

    /// Directory for a new process: kernel and devices shared, user window empty
    pub fn new_address_space(&mut self) -> MemoryResult<PageTableBase> {
        let kernel = self.kernel_table.ok_or(MemoryError::NotInitialized)?;
        self.tables.new_address_space(kernel, &self.layout)
    }

    /// Kernel directory, once initialized
    pub fn kernel_table(&self) -> Option<PageTableBase> {
        self.kernel_table
    }

    /// Layout in use
    pub fn layout(&self) -> &MemoryLayout {
        &self.layout
    }

    /// Frame allocator state
    pub fn frames(&self) -> &FrameAllocator {
        &self.frames
    }

    /// Page-table manager
    pub fn tables(&self) -> &PageTableManager<H> {
        &self.tables
    }

    /// MMU backend
    pub fn mmu(&self) -> &M {
        &self.mmu
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> VmmStats {
        VmmStats {
            mapped_user_pages: self.mapped_user_pages,
            free_frames: self.frames.free_frames(),
            live_tables: self.tables.live_tables(),
            recycled_tables: self.tables.recycled_tables(),
            directories: self.tables.directories(),
            regions_allocated: self.regions_allocated,
            regions_freed: self.regions_freed,
            failed_allocations: self.failed_allocations,
        }
    }

    fn table_for(&self, selector: TableSelector) -> MemoryResult<PageTableBase> {
        if self.kernel_table.is_none() {
            return Err(MemoryError::NotInitialized);
        }
        Ok(match selector {
            TableSelector::Process(table) => table,
            TableSelector::CurrentHardwareTable => self.mmu.active_table(),
        })
    }

    /// Translate `va` through the directory named by `selector`.
    ///
    /// Before [`init`](Self::init) there is no directory to walk and every
    /// address reports [`Unmapped::NoTable`]; use
    /// [`try_translate`](Self::try_translate) to tell the two apart.
    pub fn translate(&self, selector: TableSelector, va: VirtualAddress) -> Translation {
        self.try_translate(selector, va).unwrap_or_else(|err| {
            warn!("translate({va}) before init: {err}");
            Translation::Unmapped(Unmapped::NoTable)
        })
    }

    /// Translate `va`, failing with [`MemoryError::NotInitialized`] before `init`
    pub fn try_translate(
        &self,
        selector: TableSelector,
        va: VirtualAddress,
    ) -> MemoryResult<Translation> {
        let table = self.table_for(selector)?;
        Ok(self.translate_in(table, va))
    }

    fn translate_in(&self, table: PageTableBase, va: VirtualAddress) -> Translation {
        match self.tables.lookup(table, va) {
            None => Translation::Unmapped(Unmapped::NoTable),
            Some(SecondLevelDescriptor::Unmapped) => Translation::Unmapped(Unmapped::NoFrame),
            Some(SecondLevelDescriptor::Page { frame, .. }) => {
                Translation::Mapped(frame.base().offset(va.page_offset()))
            }
        }
    }

    /// Map `size` bytes of fresh frames at the lowest free run of user pages.
    ///
    /// Fails without side effects: on exhaustion every page bound so far is
    /// unmapped, its frame released, and any section left empty collapsed.
    pub fn allocate_region(&mut self, selector: TableSelector, size: usize) -> MemoryResult<VirtualAddress> {
        let result = self.try_allocate_region(selector, size);
        match result {
            Ok(base) => {
                self.regions_allocated += 1;
                debug!("allocated {size:#x} bytes at {base}");
            }
            Err(err) => {
                self.failed_allocations += 1;
                warn!("allocation of {size:#x} bytes failed: {err}");
            }
        }
        result
    }

    fn try_allocate_region(&mut self, selector: TableSelector, size: usize) -> MemoryResult<VirtualAddress> {
        let table = self.table_for(selector)?;
        let pages = pages_for(size)?;
        if pages > self.layout.user_pages() {
            return Err(MemoryError::InvalidSize);
        }
        if pages as usize > self.frames.free_frames() {
            return Err(MemoryError::OutOfFrames);
        }

        let base = self.find_free_run(table, pages)?;
        for index in 0..pages {
            let va = page_at(base, index);
            if let Err(err) = self.map_page(table, va) {
                self.unmap_pages(table, base, index);
                self.collapse_sections(table, base, index + 1);
                return Err(err);
            }
        }
        self.mapped_user_pages += pages as usize;
        Ok(base)
    }

    /// Lowest user address starting `pages` consecutive unmapped pages
    fn find_free_run(&self, table: PageTableBase, pages: u32) -> MemoryResult<VirtualAddress> {
        let start = self.layout.user_start.as_u32();
        let end = start + (self.layout.user_pages() << PAGE_SHIFT);

        let mut run_start = start;
        let mut run_len = 0;
        let mut va = start;
        while va < end {
            let free_here = match self.tables.first_level_entry(table, VirtualAddress::new(va)) {
                // The whole remainder of an absent section is free
                FirstLevelDescriptor::Absent => {
                    let section_end = (va & !(SECTION_SIZE - 1)).saturating_add(SECTION_SIZE);
                    (section_end.min(end) - va) >> PAGE_SHIFT
                }
                FirstLevelDescriptor::Table(l2) => {
                    match self.tables.second_level_entry(l2, VirtualAddress::new(va)) {
                        SecondLevelDescriptor::Unmapped => 1,
                        SecondLevelDescriptor::Page { .. } => 0,
                    }
                }
            };

            if free_here == 0 {
                run_len = 0;
                va += PAGE_SIZE;
                continue;
            }
            if run_len == 0 {
                run_start = va;
            }
            run_len += free_here;
            if run_len >= pages {
                return Ok(VirtualAddress::new(run_start));
            }
            va += free_here << PAGE_SHIFT;
        }
        Err(MemoryError::NoFreeRegion)
    }

    fn map_page(&mut self, table: PageTableBase, va: VirtualAddress) -> MemoryResult<()> {
        self.tables.ensure_second_level_table(table, va)?;
        let frame = self.frames.allocate_frame()?;
        self.tables.bind(table, va, frame, PageFlags::USER)?;
        trace!("{va} -> {:?}", frame);
        Ok(())
    }

    /// Unmap `pages` pages from `base`, returning frames; unmapped pages are skipped
    fn unmap_pages(&mut self, table: PageTableBase, base: VirtualAddress, pages: u32) -> usize {
        let mut released = 0;
        for index in 0..pages {
            if let Some(frame) = self.tables.unbind(table, page_at(base, index)) {
                self.frames.release_frame(frame);
                released += 1;
            }
        }
        released
    }

    /// Collapse every section overlapping `pages` pages from `base` that maps nothing
    fn collapse_sections(&mut self, table: PageTableBase, base: VirtualAddress, pages: u32) {
        if pages == 0 {
            return;
        }
        let first = base.section_base().as_u32();
        let last = page_at(base, pages - 1).section_base().as_u32();
        for section in (first..=last).step_by(SECTION_SIZE as usize) {
            self.tables.collapse_section(table, VirtualAddress::new(section));
        }
    }

    /// Unmap `size` bytes from `base`, release the frames and collapse empty sections.
    ///
    /// `base` must be page aligned and the whole range must lie in the user
    /// window. Pages in the range that are already unmapped are skipped.
    pub fn free_region(&mut self, selector: TableSelector, base: VirtualAddress, size: usize) -> MemoryResult<()> {
        let table = self.table_for(selector)?;
        if !base.is_page_aligned() {
            return Err(MemoryError::AlignmentError);
        }
        let pages = pages_for(size)?;
        let last = base.checked_add_pages(pages - 1).ok_or(MemoryError::InvalidAddress)?;
        if !self.layout.in_user_window(base) || !self.layout.in_user_window(last) {
            return Err(MemoryError::InvalidAddress);
        }

        let released = self.unmap_pages(table, base, pages);
        self.collapse_sections(table, base, pages);
        self.mapped_user_pages -= released;
        self.regions_freed += 1;
        debug!("freed {size:#x} bytes at {base} ({released} frames released)");
        Ok(())
    }
}

#[cfg(not(target_os = "none"))]
impl VirtualMemoryManager<super::ArenaHeap, crate::arch::hosted::SimulatedMmu> {
    /// Default fake physical base of the hosted table arena
    pub const HOSTED_ARENA_BASE: PhysicalAddress = PhysicalAddress::new(0x0080_0000);

    /// Initialized manager over a host-memory table arena and a simulated MMU
    pub fn hosted(layout: MemoryLayout, arena_size: usize) -> MemoryResult<Self> {
        let heap = super::ArenaHeap::new(Self::HOSTED_ARENA_BASE, arena_size)?;
        let mut vmm = Self::new(layout, heap, crate::arch::hosted::SimulatedMmu::new());
        vmm.init()?;
        Ok(vmm)
    }
}

fn page_at(base: VirtualAddress, index: u32) -> VirtualAddress {
    VirtualAddress::new(base.as_u32() + (index << PAGE_SHIFT))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::hosted::{MmuOp, SimulatedMmu};
    use crate::memory::{ArenaHeap, Frame, FrameState};

    type HostedVmm = VirtualMemoryManager<ArenaHeap, SimulatedMmu>;

    const ARENA: usize = 512 * 1024;
    const USER_BASE: u32 = 0x0100_0000;

    fn booted() -> HostedVmm {
        HostedVmm::hosted(MemoryLayout::DEFAULT, ARENA).unwrap()
    }

    fn booted_with_frames(frames: u32) -> HostedVmm {
        let layout = MemoryLayout {
            ram_end: PhysicalAddress::new(0x0100_0000 + frames * PAGE_SIZE),
            ..MemoryLayout::DEFAULT
        };
        HostedVmm::hosted(layout, ARENA).unwrap()
    }

    fn kernel(vmm: &HostedVmm) -> TableSelector {
        TableSelector::Process(vmm.kernel_table().unwrap())
    }

    #[test]
    fn init_runs_the_enable_sequence_in_order() {
        let vmm = booted();
        let table = vmm.kernel_table().unwrap().address().as_u32();
        assert_eq!(
            vmm.mmu().log(),
            &[
                MmuOp::TranslationBases(table),
                MmuOp::TranslationControl(0),
                MmuOp::DomainAccess(0x3),
                MmuOp::Control(0),
                MmuOp::InvalidateCaches,
                MmuOp::InvalidateTlb,
                MmuOp::Control(0x0080_8011),
            ]
        );
        assert!(vmm.mmu().translation_enabled());
    }

    #[test]
    fn init_twice_is_rejected() {
        let mut vmm = booted();
        assert_eq!(vmm.init(), Err(MemoryError::AlreadyInitialized));
    }

    #[test]
    fn operations_before_init_report_not_initialized() {
        let heap = ArenaHeap::new(PhysicalAddress::new(0x0080_0000), ARENA).unwrap();
        let mut vmm = HostedVmm::new(MemoryLayout::DEFAULT, heap, SimulatedMmu::new());
        let selector = TableSelector::CurrentHardwareTable;

        assert_eq!(
            vmm.translate(selector, VirtualAddress::new(0x8000)),
            Translation::Unmapped(Unmapped::NoTable)
        );
        assert_eq!(
            vmm.try_translate(selector, VirtualAddress::new(0x8000)),
            Err(MemoryError::NotInitialized)
        );
        assert_eq!(vmm.allocate_region(selector, 4096), Err(MemoryError::NotInitialized));
        assert_eq!(vmm.new_address_space(), Err(MemoryError::NotInitialized));

        vmm.init().unwrap();
        assert_eq!(
            vmm.try_translate(selector, VirtualAddress::new(0x8000)),
            Ok(Translation::Mapped(PhysicalAddress::new(0x8000)))
        );
    }

    #[test]
    fn kernel_and_device_windows_translate_to_themselves() {
        let vmm = booted();
        for va in [0x0000_0000, 0x0000_8123, 0x00FF_FFFF, 0x2000_0000, 0x2020_1018, 0x20FF_FFFC] {
            assert_eq!(
                vmm.translate(TableSelector::CurrentHardwareTable, VirtualAddress::new(va)),
                Translation::Mapped(PhysicalAddress::new(va))
            );
        }
    }

    #[test]
    fn unmapped_results_distinguish_missing_table_from_missing_frame() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        assert_eq!(
            vmm.translate(selector, VirtualAddress::new(USER_BASE)),
            Translation::Unmapped(Unmapped::NoTable)
        );

        let va = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();
        assert_eq!(
            vmm.translate(selector, page_at(va, 1)),
            Translation::Unmapped(Unmapped::NoFrame)
        );
    }

    #[test]
    fn first_allocation_lands_at_the_user_base() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let va = vmm.allocate_region(selector, 100).unwrap();

        assert_eq!(va, VirtualAddress::new(USER_BASE));
        let pa = vmm.translate(selector, VirtualAddress::new(USER_BASE + 0x42)).physical().unwrap();
        assert_eq!(pa, PhysicalAddress::new(0x0100_0042));
        assert_eq!(vmm.stats().mapped_user_pages, 1);
    }

    #[test]
    fn page_aligned_sizes_map_exactly_that_many_pages() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let free = vmm.frames().free_frames();

        let va = vmm.allocate_region(selector, 2 * PAGE_SIZE as usize).unwrap();
        assert_eq!(vmm.frames().free_frames(), free - 2);
        assert!(vmm.translate(selector, page_at(va, 1)).is_mapped());
        assert!(!vmm.translate(selector, page_at(va, 2)).is_mapped());
    }

    #[test]
    fn freed_hole_is_reused_first() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let a = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();
        let b = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();
        let c = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();
        assert_eq!(b, page_at(a, 1));
        assert_eq!(c, page_at(a, 2));

        vmm.free_region(selector, b, PAGE_SIZE as usize).unwrap();
        assert_eq!(vmm.allocate_region(selector, PAGE_SIZE as usize), Ok(b));

        // A hole too small for the request is skipped
        vmm.free_region(selector, b, PAGE_SIZE as usize).unwrap();
        assert_eq!(
            vmm.allocate_region(selector, 2 * PAGE_SIZE as usize),
            Ok(page_at(a, 3))
        );
    }

    #[test]
    fn free_releases_frames_and_collapses_the_section() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let free = vmm.frames().free_frames();

        let va = vmm.allocate_region(selector, 3 * PAGE_SIZE as usize).unwrap();
        let frame = Frame::containing(vmm.translate(selector, va).physical().unwrap());
        assert_eq!(vmm.frames().state(frame), FrameState::Occupied);

        vmm.free_region(selector, va, 3 * PAGE_SIZE as usize).unwrap();
        assert_eq!(vmm.frames().state(frame), FrameState::Free);
        assert_eq!(vmm.frames().free_frames(), free);
        assert_eq!(
            vmm.translate(selector, va),
            Translation::Unmapped(Unmapped::NoTable)
        );
        assert_eq!(vmm.stats().recycled_tables, 1);
        assert_eq!(vmm.stats().mapped_user_pages, 0);
    }

    #[test]
    fn section_with_remaining_pages_stays_present() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let a = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();
        let b = vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();

        vmm.free_region(selector, a, PAGE_SIZE as usize).unwrap();
        assert_eq!(
            vmm.translate(selector, a),
            Translation::Unmapped(Unmapped::NoFrame)
        );
        assert!(vmm.translate(selector, b).is_mapped());
    }

    #[test]
    fn regions_spanning_sections_get_a_table_per_section() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let tables = vmm.stats().live_tables;
        let size = (SECTION_SIZE + 2 * PAGE_SIZE) as usize;

        let va = vmm.allocate_region(selector, size).unwrap();
        assert_eq!(vmm.stats().live_tables, tables + 2);
        assert!(vmm.translate(selector, page_at(va, 257)).is_mapped());

        vmm.free_region(selector, va, size).unwrap();
        assert_eq!(vmm.stats().live_tables, tables);
        assert_eq!(
            vmm.translate(selector, page_at(va, 257)),
            Translation::Unmapped(Unmapped::NoTable)
        );
    }

    #[test]
    fn frame_exhaustion_leaves_state_untouched() {
        let mut vmm = booted_with_frames(4);
        let selector = kernel(&vmm);
        vmm.allocate_region(selector, PAGE_SIZE as usize).unwrap();

        let frames = vmm.frames().clone();
        let tables = vmm.stats().live_tables;
        assert_eq!(
            vmm.allocate_region(selector, 4 * PAGE_SIZE as usize),
            Err(MemoryError::OutOfFrames)
        );
        assert!(vmm.frames() == &frames);
        assert_eq!(vmm.stats().live_tables, tables);
        assert_eq!(vmm.stats().failed_allocations, 1);
    }

    #[test]
    fn table_storage_exhaustion_rolls_back_bound_pages() {
        // Kernel directory and its 32 tables fit; a second user section does not
        let layout = MemoryLayout::DEFAULT;
        let arena = 16 * 1024 + 33 * 1024;
        let mut vmm = HostedVmm::hosted(layout, arena).unwrap();
        let selector = kernel(&vmm);
        let free = vmm.frames().free_frames();

        let size = (SECTION_SIZE + PAGE_SIZE) as usize;
        assert_eq!(
            vmm.allocate_region(selector, size),
            Err(MemoryError::OutOfTableStorage)
        );
        assert_eq!(vmm.frames().free_frames(), free);
        assert_eq!(
            vmm.translate(selector, VirtualAddress::new(USER_BASE)),
            Translation::Unmapped(Unmapped::NoTable)
        );
        // The table built for the first section went to the reuse pool
        assert_eq!(vmm.allocate_region(selector, PAGE_SIZE as usize), Ok(VirtualAddress::new(USER_BASE)));
    }

    #[test]
    fn zero_and_oversized_requests_are_rejected() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        assert_eq!(vmm.allocate_region(selector, 0), Err(MemoryError::InvalidSize));
        assert_eq!(
            vmm.allocate_region(selector, 0x2000_0000),
            Err(MemoryError::InvalidSize)
        );
    }

    #[test]
    fn free_outside_the_user_window_is_refused() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        assert_eq!(
            vmm.free_region(selector, VirtualAddress::new(0x0000_8000), PAGE_SIZE as usize),
            Err(MemoryError::InvalidAddress)
        );
        assert_eq!(
            vmm.free_region(selector, VirtualAddress::new(USER_BASE + 1), PAGE_SIZE as usize),
            Err(MemoryError::AlignmentError)
        );
        assert!(vmm.translate(selector, VirtualAddress::new(0x8000)).is_mapped());
    }

    #[test]
    fn freeing_unmapped_pages_is_harmless() {
        let mut vmm = booted();
        let selector = kernel(&vmm);
        let free = vmm.frames().free_frames();
        vmm.free_region(selector, VirtualAddress::new(0x0500_0000), 8 * PAGE_SIZE as usize).unwrap();
        assert_eq!(vmm.frames().free_frames(), free);
    }

    #[test]
    fn process_spaces_are_isolated() {
        let mut vmm = booted();
        let a = TableSelector::Process(vmm.new_address_space().unwrap());
        let b = TableSelector::Process(vmm.new_address_space().unwrap());

        let va_a = vmm.allocate_region(a, PAGE_SIZE as usize).unwrap();
        let va_b = vmm.allocate_region(b, PAGE_SIZE as usize).unwrap();
        assert_eq!(va_a, va_b);
        assert_ne!(vmm.translate(a, va_a), vmm.translate(b, va_b));

        // Both still see the kernel
        assert!(vmm.translate(a, VirtualAddress::new(0x8000)).is_mapped());
        assert!(vmm.translate(b, VirtualAddress::new(0x2020_1000)).is_mapped());
    }

    #[test]
    fn current_hardware_table_follows_switches() {
        let mut vmm = booted();
        let process = vmm.new_address_space().unwrap();
        let va = vmm.allocate_region(TableSelector::Process(process), 64).unwrap();

        let current = TableSelector::CurrentHardwareTable;
        assert!(!vmm.translate(current, va).is_mapped());
        vmm.switch_address_space(process);
        assert!(vmm.translate(current, va).is_mapped());
        assert_eq!(vmm.mmu().log().last(), Some(&MmuOp::InvalidateTlb));
    }
}
