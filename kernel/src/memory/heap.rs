//! Page-table storage.
//!
//! Translation tables live in kernel memory that the MMU walks by physical
//! address. [`TableHeap`] hands out aligned blocks of that memory and gives
//! word access to them by physical address, so the page-table code never
//! touches raw pointers itself.

use core::alloc::Layout;
use core::ptr::NonNull;

use linked_list_allocator::Heap;

use super::{MemoryError, MemoryResult, PhysicalAddress};

/// Source of aligned page-table storage, addressed physically
pub trait TableHeap {
    /// Reserve `size` bytes aligned to `1 << align_shift`
    fn allocate(&mut self, size: usize, align_shift: u32) -> MemoryResult<PhysicalAddress>;

    /// Read the descriptor word at `addr`
    fn read_word(&self, addr: PhysicalAddress) -> u32;

    /// Write the descriptor word at `addr`
    fn write_word(&mut self, addr: PhysicalAddress, value: u32);

    /// Give back a block obtained from [`TableHeap::allocate`] with the same size and alignment
    fn release(&mut self, addr: PhysicalAddress, size: usize, align_shift: u32);

    /// Bytes still available
    fn free_bytes(&self) -> usize;
}

fn table_layout(size: usize, align_shift: u32) -> MemoryResult<Layout> {
    Layout::from_size_align(size, 1 << align_shift).map_err(|_| MemoryError::AlignmentError)
}

/// Identity-mapped kernel heap used on the target
pub struct KernelHeap {
    heap: Heap,
}

impl KernelHeap {
    /// Heap with no backing memory yet
    pub const fn empty() -> Self {
        Self { heap: Heap::empty() }
    }

    /// Hand `[bottom, bottom + size)` to the heap.
    ///
    /// # Safety
    ///
    /// The region must be unused RAM, identity mapped (or the MMU off),
    /// writable, and must stay reserved for page tables for the lifetime
    /// of the kernel. Must be called at most once.
    pub unsafe fn init(&mut self, bottom: PhysicalAddress, size: usize) {
        // SAFETY: Caller guarantees the region is exclusively ours and identity mapped
        unsafe {
            self.heap.init(bottom.as_usize() as *mut u8, size);
        }
    }
}

impl TableHeap for KernelHeap {
    fn allocate(&mut self, size: usize, align_shift: u32) -> MemoryResult<PhysicalAddress> {
        let layout = table_layout(size, align_shift)?;
        let block = self
            .heap
            .allocate_first_fit(layout)
            .map_err(|()| MemoryError::OutOfTableStorage)?;
        Ok(PhysicalAddress::new(block.as_ptr() as usize as u32))
    }

    fn read_word(&self, addr: PhysicalAddress) -> u32 {
        // SAFETY: Table storage comes from this heap, which is identity mapped
        unsafe { (addr.as_usize() as *const u32).read_volatile() }
    }

    fn write_word(&mut self, addr: PhysicalAddress, value: u32) {
        // SAFETY: Table storage comes from this heap, which is identity mapped
        unsafe { (addr.as_usize() as *mut u32).write_volatile(value) }
    }

    fn release(&mut self, addr: PhysicalAddress, size: usize, align_shift: u32) {
        let (Ok(layout), Some(block)) = (
            table_layout(size, align_shift),
            NonNull::new(addr.as_usize() as *mut u8),
        ) else {
            return;
        };
        // SAFETY: Block was handed out by this heap with the same layout
        unsafe { self.heap.deallocate(block, layout) }
    }

    fn free_bytes(&self) -> usize {
        self.heap.free()
    }
}

#[cfg(not(target_os = "none"))]
pub use arena::ArenaHeap;

#[cfg(not(target_os = "none"))]
mod arena {
    use core::alloc::Layout;
    use core::ptr::NonNull;

    use linked_list_allocator::Heap;
    use std::alloc::{alloc_zeroed, dealloc};

    use super::{TableHeap, table_layout};
    use crate::memory::{FIRST_LEVEL_ALIGN_SHIFT, MemoryError, MemoryResult, PhysicalAddress};

    /// Table heap backed by host memory, presented at a fake physical base.
    ///
    /// Offsets into the arena map one to one onto `[phys_base, phys_base + size)`,
    /// and the backing block is aligned like a first-level directory, so every
    /// alignment the tables need carries over to the physical addresses.
    pub struct ArenaHeap {
        heap: Heap,
        storage: NonNull<u8>,
        layout: Layout,
        phys_base: PhysicalAddress,
    }

    impl ArenaHeap {
        /// Allocate a zeroed arena of `size` bytes presented at `phys_base`
        pub fn new(phys_base: PhysicalAddress, size: usize) -> MemoryResult<Self> {
            if !phys_base.is_aligned(FIRST_LEVEL_ALIGN_SHIFT) {
                return Err(MemoryError::AlignmentError);
            }
            if size == 0 || phys_base.as_usize() + size > u32::MAX as usize {
                return Err(MemoryError::InvalidSize);
            }
            let layout = table_layout(size, FIRST_LEVEL_ALIGN_SHIFT)?;
            // SAFETY: Layout has a non-zero size
            let storage = NonNull::new(unsafe { alloc_zeroed(layout) })
                .ok_or(MemoryError::OutOfTableStorage)?;
            // SAFETY: The block is freshly allocated, owned by this arena and outlives `heap`
            let heap = unsafe { Heap::new(storage.as_ptr(), size) };
            Ok(Self {
                heap,
                storage,
                layout,
                phys_base,
            })
        }

        /// Fake physical address of the first arena byte
        pub const fn phys_base(&self) -> PhysicalAddress {
            self.phys_base
        }

        fn word_offset(&self, addr: PhysicalAddress) -> usize {
            let offset = addr.as_usize().wrapping_sub(self.phys_base.as_usize());
            assert!(
                addr >= self.phys_base && offset + 4 <= self.layout.size() && offset % 4 == 0,
                "table access at {addr:?} outside the arena"
            );
            offset
        }
    }

    impl TableHeap for ArenaHeap {
        fn allocate(&mut self, size: usize, align_shift: u32) -> MemoryResult<PhysicalAddress> {
            let layout = table_layout(size, align_shift)?;
            let block = self
                .heap
                .allocate_first_fit(layout)
                .map_err(|()| MemoryError::OutOfTableStorage)?;
            let offset = block.as_ptr() as usize - self.storage.as_ptr() as usize;
            Ok(self.phys_base.offset(offset as u32))
        }

        fn read_word(&self, addr: PhysicalAddress) -> u32 {
            let offset = self.word_offset(addr);
            // SAFETY: Offset checked against the arena bounds and word aligned
            unsafe { self.storage.as_ptr().add(offset).cast::<u32>().read() }
        }

        fn write_word(&mut self, addr: PhysicalAddress, value: u32) {
            let offset = self.word_offset(addr);
            // SAFETY: Offset checked against the arena bounds and word aligned
            unsafe { self.storage.as_ptr().add(offset).cast::<u32>().write(value) }
        }

        fn release(&mut self, addr: PhysicalAddress, size: usize, align_shift: u32) {
            let Ok(layout) = table_layout(size, align_shift) else {
                return;
            };
            let offset = self.word_offset(addr);
            // SAFETY: Offset lies inside the arena, so the pointer is in bounds and non-null
            let block = unsafe { NonNull::new_unchecked(self.storage.as_ptr().add(offset)) };
            // SAFETY: Block was handed out by this heap with the same layout
            unsafe { self.heap.deallocate(block, layout) }
        }

        fn free_bytes(&self) -> usize {
            self.heap.free()
        }
    }

    impl Drop for ArenaHeap {
        fn drop(&mut self) {
            // SAFETY: `storage` was allocated with `layout` in `new` and is released once
            unsafe { dealloc(self.storage.as_ptr(), self.layout) }
        }
    }

    impl core::fmt::Debug for ArenaHeap {
        fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
            f.debug_struct("ArenaHeap")
                .field("phys_base", &self.phys_base)
                .field("size", &self.layout.size())
                .field("free", &self.heap.free())
                .finish()
        }
    }
}
