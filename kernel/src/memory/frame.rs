//! Physical frame allocator.
//!
//! One occupancy bit per 4KB frame of the addressable physical range
//! (RAM plus the peripheral window). Allocation is first-fit from frame 0
//! so the lowest free frame is always handed out next.

use log::{debug, warn};

use super::{Frame, MemoryError, MemoryLayout, MemoryResult, PAGE_SHIFT, PhysicalAddress};

/// Number of frames tracked: everything below the end of the device window
pub const FRAME_TABLE_ENTRIES: usize = 0x2_1000;

const WORD_BITS: usize = u32::BITS as usize;
const FRAME_TABLE_WORDS: usize = FRAME_TABLE_ENTRIES / WORD_BITS;

static_assertions::const_assert_eq!(FRAME_TABLE_WORDS * WORD_BITS, FRAME_TABLE_ENTRIES);

/// Occupancy of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    /// Available for allocation
    Free,
    /// Reserved or handed out
    Occupied,
}

/// First-fit bitmap frame allocator
#[derive(Clone, PartialEq, Eq)]
pub struct FrameAllocator {
    /// Bit set means occupied
    occupancy: [u32; FRAME_TABLE_WORDS],
    free_frames: usize,
}

impl FrameAllocator {
    /// Allocator with every frame free
    pub const fn new() -> Self {
        Self {
            occupancy: [0; FRAME_TABLE_WORDS],
            free_frames: FRAME_TABLE_ENTRIES,
        }
    }

    /// Allocator with the kernel image, missing RAM and the peripherals reserved
    pub fn with_layout(layout: &MemoryLayout) -> Self {
        let mut frames = Self::new();
        frames.reserve_range(PhysicalAddress::new(0), layout.kernel_heap_end);
        frames.reserve_range(layout.ram_end, layout.device_start);
        frames.reserve_range(
            layout.device_start,
            PhysicalAddress::new(layout.device_end_exclusive()),
        );
        debug!(
            "frame table: {} of {} frames free",
            frames.free_frames, FRAME_TABLE_ENTRIES
        );
        frames
    }

    /// Mark every frame overlapping `[start, end)` occupied
    pub fn reserve_range(&mut self, start: PhysicalAddress, end: PhysicalAddress) {
        let first = (start.as_u32() >> PAGE_SHIFT) as usize;
        let last = (end.as_u32().div_ceil(1 << PAGE_SHIFT) as usize).min(FRAME_TABLE_ENTRIES);
        for index in first..last {
            if self.set_occupied(index) {
                self.free_frames -= 1;
            }
        }
    }

    /// Claim the lowest free frame
    pub fn allocate_frame(&mut self) -> MemoryResult<Frame> {
        let (word_index, word) = self
            .occupancy
            .iter()
            .enumerate()
            .find(|(_, word)| **word != u32::MAX)
            .ok_or(MemoryError::OutOfFrames)?;

        let index = word_index * WORD_BITS + word.trailing_ones() as usize;
        self.set_occupied(index);
        self.free_frames -= 1;
        Ok(Frame::from_index(index as u32))
    }

    /// Return a frame to the free pool
    pub fn release_frame(&mut self, frame: Frame) {
        let index = frame.index() as usize;
        if index >= FRAME_TABLE_ENTRIES {
            warn!("release of untracked {frame:?}");
            return;
        }
        let (word, bit) = Self::position(index);
        if self.occupancy[word] & bit == 0 {
            warn!("double release of {frame:?}");
            return;
        }
        self.occupancy[word] &= !bit;
        self.free_frames += 1;
    }

    /// Occupancy of `frame`; untracked frames read as occupied
    pub fn state(&self, frame: Frame) -> FrameState {
        let index = frame.index() as usize;
        if index >= FRAME_TABLE_ENTRIES {
            return FrameState::Occupied;
        }
        let (word, bit) = Self::position(index);
        if self.occupancy[word] & bit == 0 {
            FrameState::Free
        } else {
            FrameState::Occupied
        }
    }

    /// Whether `frame` can be handed out
    pub fn is_free(&self, frame: Frame) -> bool {
        self.state(frame) == FrameState::Free
    }

    /// Frames currently available
    pub const fn free_frames(&self) -> usize {
        self.free_frames
    }

    const fn position(index: usize) -> (usize, u32) {
        (index / WORD_BITS, 1 << (index % WORD_BITS))
    }

    /// Returns true if the frame was free before
    fn set_occupied(&mut self, index: usize) -> bool {
        let (word, bit) = Self::position(index);
        let was_free = self.occupancy[word] & bit == 0;
        self.occupancy[word] |= bit;
        was_free
    }
}

impl Default for FrameAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FrameAllocator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FrameAllocator")
            .field("free_frames", &self.free_frames)
            .field("total_frames", &FRAME_TABLE_ENTRIES)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_reserves_kernel_and_devices() {
        let layout = MemoryLayout::DEFAULT;
        let frames = FrameAllocator::with_layout(&layout);

        assert!(!frames.is_free(Frame::from_index(0)));
        assert!(!frames.is_free(Frame::from_index(0x0FFF)));
        assert!(frames.is_free(Frame::from_index(0x1000)));
        assert!(frames.is_free(Frame::from_index(0x1FFFF)));
        assert!(!frames.is_free(Frame::from_index(0x20000)));
        assert!(!frames.is_free(Frame::from_index(0x20FFF)));
        assert_eq!(frames.free_frames(), 0x20000 - 0x1000);
    }

    #[test]
    fn first_fit_hands_out_lowest_free_frame() {
        let mut frames = FrameAllocator::with_layout(&MemoryLayout::DEFAULT);

        let a = frames.allocate_frame().unwrap();
        let b = frames.allocate_frame().unwrap();
        let c = frames.allocate_frame().unwrap();
        assert_eq!(a.base(), PhysicalAddress::new(0x0100_0000));
        assert_eq!(b.index(), a.index() + 1);
        assert_eq!(c.index(), a.index() + 2);

        frames.release_frame(b);
        assert_eq!(frames.allocate_frame(), Ok(b));
    }

    #[test]
    fn exhaustion_is_reported_without_side_effects() {
        let layout = MemoryLayout {
            ram_end: PhysicalAddress::new(0x0100_2000),
            ..MemoryLayout::DEFAULT
        };
        let mut frames = FrameAllocator::with_layout(&layout);
        assert_eq!(frames.free_frames(), 2);

        frames.allocate_frame().unwrap();
        frames.allocate_frame().unwrap();
        let before = frames.clone();
        assert_eq!(frames.allocate_frame(), Err(MemoryError::OutOfFrames));
        assert!(frames == before);
    }

    #[test]
    fn double_release_is_ignored() {
        let mut frames = FrameAllocator::with_layout(&MemoryLayout::DEFAULT);
        let frame = frames.allocate_frame().unwrap();
        let free = frames.free_frames();

        frames.release_frame(frame);
        frames.release_frame(frame);
        assert_eq!(frames.free_frames(), free + 1);
        assert_eq!(frames.state(frame), FrameState::Free);
    }

    #[test]
    fn reserve_range_counts_each_frame_once() {
        let mut frames = FrameAllocator::new();
        frames.reserve_range(PhysicalAddress::new(0), PhysicalAddress::new(0x3000));
        frames.reserve_range(PhysicalAddress::new(0x1000), PhysicalAddress::new(0x5001));
        assert_eq!(frames.free_frames(), FRAME_TABLE_ENTRIES - 6);
        assert_eq!(frames.state(Frame::from_index(5)), FrameState::Occupied);
        assert_eq!(frames.state(Frame::from_index(6)), FrameState::Free);
    }
}
