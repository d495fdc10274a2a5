//! Randomized checks of the memory manager over the hosted backends.

use std::collections::HashSet;

use proptest::prelude::*;
use trapvm_kernel::arch::hosted::SimulatedMmu;
use trapvm_kernel::memory::{
    ArenaHeap, MemoryLayout, PAGE_SIZE, Translation, Unmapped, VirtualAddress, VirtualMemoryManager,
};
use trapvm_kernel::process::TableSelector;

type HostedVmm = VirtualMemoryManager<ArenaHeap, SimulatedMmu>;

const ARENA: usize = 512 * 1024;
const CURRENT: TableSelector = TableSelector::CurrentHardwareTable;

fn booted() -> HostedVmm {
    HostedVmm::hosted(MemoryLayout::DEFAULT, ARENA).unwrap()
}

fn region_sizes() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..=(6 * PAGE_SIZE as usize), 1..12)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn mapped_pages_never_alias_and_keep_offsets(sizes in region_sizes(), offset in 0u32..PAGE_SIZE) {
        let mut vmm = booted();
        let layout = *vmm.layout();
        let mut seen = HashSet::new();

        for size in sizes {
            let base = vmm.allocate_region(CURRENT, size).unwrap();
            prop_assert!(layout.in_user_window(base));
            prop_assert!(base.is_page_aligned());

            let pages = size.div_ceil(PAGE_SIZE as usize) as u32;
            for page in 0..pages {
                let va = VirtualAddress::new(base.as_u32() + page * PAGE_SIZE + offset);
                let pa = vmm.translate(CURRENT, va).physical().unwrap();
                prop_assert_eq!(pa.as_u32() % PAGE_SIZE, offset);

                let frame_base = pa.as_u32() - offset;
                prop_assert!(frame_base >= layout.kernel_heap_end.as_u32());
                prop_assert!(frame_base < layout.ram_end.as_u32());
                prop_assert!(seen.insert(frame_base), "frame {frame_base:#x} mapped twice");
            }
        }
    }

    #[test]
    fn freeing_everything_restores_the_boot_state(sizes in region_sizes()) {
        let mut vmm = booted();
        let before = vmm.stats();
        let frames_before = vmm.frames().clone();

        let regions: Vec<_> = sizes
            .iter()
            .map(|&size| (vmm.allocate_region(CURRENT, size).unwrap(), size))
            .collect();
        prop_assert!(vmm.stats().free_frames < before.free_frames);

        for &(base, size) in regions.iter().rev() {
            vmm.free_region(CURRENT, base, size).unwrap();
            prop_assert!(!vmm.translate(CURRENT, base).is_mapped());
        }
        prop_assert_eq!(
            vmm.translate(CURRENT, regions[0].0),
            Translation::Unmapped(Unmapped::NoTable)
        );

        let after = vmm.stats();
        prop_assert_eq!(after.free_frames, before.free_frames);
        prop_assert_eq!(after.live_tables, before.live_tables);
        prop_assert_eq!(after.mapped_user_pages, 0);
        prop_assert_eq!(vmm.frames(), &frames_before);
    }

    #[test]
    fn freed_holes_are_reused_first_fit(sizes in prop::collection::vec(1u32..=4, 3..8), victim in any::<prop::sample::Index>()) {
        let mut vmm = booted();
        let regions: Vec<_> = sizes
            .iter()
            .map(|&pages| {
                let size = (pages * PAGE_SIZE) as usize;
                (vmm.allocate_region(CURRENT, size).unwrap(), size)
            })
            .collect();

        let (hole, size) = regions[victim.index(regions.len())];
        vmm.free_region(CURRENT, hole, size).unwrap();
        prop_assert_eq!(vmm.allocate_region(CURRENT, size).unwrap(), hole);
    }

    #[test]
    fn every_directory_shares_kernel_and_devices(page in 0u32..(0x0100_0000 / PAGE_SIZE), device_page in 0u32..256, offset in 0u32..PAGE_SIZE) {
        let mut vmm = booted();
        let process = TableSelector::Process(vmm.new_address_space().unwrap());
        let layout = *vmm.layout();

        let kernel = VirtualAddress::new(page * PAGE_SIZE + offset);
        prop_assert_eq!(vmm.translate(process, kernel).physical().map(|pa| pa.as_u32()), Some(kernel.as_u32()));

        let device = VirtualAddress::new(layout.device_start.as_u32() + (device_page << 12) + offset);
        prop_assert_eq!(vmm.translate(process, device).physical().map(|pa| pa.as_u32()), Some(device.as_u32()));

        let user = VirtualAddress::new(layout.user_start.as_u32() + page * PAGE_SIZE);
        prop_assert!(!vmm.translate(process, user).is_mapped());
    }
}

#[test]
fn address_spaces_are_isolated() {
    let mut vmm = booted();
    let first = TableSelector::Process(vmm.new_address_space().unwrap());
    let second = TableSelector::Process(vmm.new_address_space().unwrap());

    let a = vmm.allocate_region(first, 2 * PAGE_SIZE as usize).unwrap();
    let b = vmm.allocate_region(second, 2 * PAGE_SIZE as usize).unwrap();

    assert_eq!(a, b, "both spaces start from the bottom of the user window");
    assert_ne!(vmm.translate(first, a).physical(), vmm.translate(second, b).physical());
    assert!(!vmm.translate(CURRENT, a).is_mapped());

    vmm.free_region(first, a, 2 * PAGE_SIZE as usize).unwrap();
    assert!(!vmm.translate(first, a).is_mapped());
    assert!(vmm.translate(second, b).is_mapped());
}
