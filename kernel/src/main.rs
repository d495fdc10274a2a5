//! TrapVM - boot binary
//!
//! On the bare-metal target this is the kernel image: `kmain` builds the
//! kernel directory, turns the MMU on and opens the `svc` gateway. On a
//! hosted target the same core boots over the simulated backends and
//! replays a short sequence of traps, which makes the boot path easy to
//! exercise without hardware.

#![cfg_attr(target_os = "none", no_std)]
#![cfg_attr(target_os = "none", no_main)]

use trapvm_kernel::process::ProcessHandle;
use trapvm_kernel::syscalls::{SchedulerServices, TrapFrame};

/// Scheduler stand-in for a kernel running a single task.
///
/// Keeps the wall clock, treats yields as no-ops and refuses process
/// creation; the real scheduler replaces it.
struct SingleTask {
    date_ms: u64,
    policy: i32,
}

impl SingleTask {
    const fn new() -> Self {
        Self {
            date_ms: 0,
            policy: 0,
        }
    }
}

impl SchedulerServices for SingleTask {
    fn reboot(&mut self) {
        log::warn!("reboot requested");
        #[cfg(target_os = "none")]
        trapvm_kernel::arch::arm::reboot();
    }

    fn set_date_ms(&mut self, date_ms: u64) {
        self.date_ms = date_ms;
    }

    fn date_ms(&self) -> u64 {
        self.date_ms
    }

    fn yield_to(&mut self, target: u32, _frame: &mut TrapFrame) {
        log::debug!("yield to {target}: single task keeps running");
    }

    fn yield_now(&mut self, _frame: &mut TrapFrame) {}

    fn exit(&mut self, status: i32, _frame: &mut TrapFrame) {
        log::info!("task exited with status {status}");
        #[cfg(target_os = "none")]
        trapvm_kernel::arch::arm::halt();
    }

    fn set_scheduler(&mut self, policy: i32) -> i32 {
        core::mem::replace(&mut self.policy, policy)
    }

    fn fork(&mut self, frame: &mut TrapFrame) {
        frame.registers[0] = u32::MAX;
    }

    fn wait_pid(&mut self, _pid: i32, _status: u32, frame: &mut TrapFrame) {
        frame.registers[0] = u32::MAX;
    }

    fn current_process(&self) -> Option<&dyn ProcessHandle> {
        None
    }
}

#[cfg(target_os = "none")]
mod kernel {
    use core::cell::UnsafeCell;
    use core::mem::MaybeUninit;
    use core::panic::PanicInfo;

    use log::{error, info};
    use trapvm_kernel::arch::arm::{self, ArmMmu};
    use trapvm_kernel::arch::board;
    use trapvm_kernel::memory::{KernelHeap, PhysicalAddress, VirtualMemoryManager};
    use trapvm_kernel::syscalls::{SystemCallGate, install_handler};
    use trapvm_kernel::{KernelResult, debug_print};

    use super::SingleTask;

    /// Room for the kernel directory, the 32 identity tables and user tables
    const TABLE_HEAP_SIZE: usize = 256 * 1024;

    #[repr(C, align(16384))]
    struct TableStorage(UnsafeCell<[u8; TABLE_HEAP_SIZE]>);

    // SAFETY: Handed to the table heap once during single-threaded boot
    unsafe impl Sync for TableStorage {}

    static TABLE_STORAGE: TableStorage = TableStorage(UnsafeCell::new([0; TABLE_HEAP_SIZE]));

    type Gate = SystemCallGate<KernelHeap, ArmMmu, SingleTask>;

    fn boot() -> KernelResult<&'static mut Gate> {
        let mut heap = KernelHeap::empty();
        let bottom = PhysicalAddress::new(TABLE_STORAGE.0.get() as usize as u32);
        // SAFETY: TABLE_STORAGE is a kernel static inside the identity-mapped
        // kernel window and is used for nothing else
        unsafe { heap.init(bottom, TABLE_HEAP_SIZE) };

        // SAFETY: The only MMU instance in the system
        let mmu = unsafe { ArmMmu::new() }?;
        let mut vmm = VirtualMemoryManager::new(board::LAYOUT, heap, mmu);
        vmm.init()?;

        Ok(store_gate(SystemCallGate::new(vmm, SingleTask::new())))
    }

    struct GateSlot(UnsafeCell<MaybeUninit<Gate>>);

    // SAFETY: Written once during boot before traps are enabled
    unsafe impl Sync for GateSlot {}

    static GATE: GateSlot = GateSlot(UnsafeCell::new(MaybeUninit::uninit()));

    fn store_gate(gate: Gate) -> &'static mut Gate {
        // SAFETY: Called once from `boot`, before any reference to the slot exists
        unsafe { (*GATE.0.get()).write(gate) }
    }

    /// Kernel entry, called by the reset code with a valid SVC stack
    #[unsafe(no_mangle)]
    pub extern "C" fn kmain() -> ! {
        arm::early_debug_init();
        if trapvm_kernel::logging::init().is_err() {
            debug_print!("logger already installed");
        }
        info!("TrapVM booting");

        match boot() {
            Ok(gate) => {
                // SAFETY: Traps are not yet possible; the gate lives forever in GATE
                unsafe { install_handler(gate) };
                info!("svc gateway open");
            }
            Err(err) => error!("boot failed: {err}"),
        }
        arm::halt()
    }

    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        debug_print!("KERNEL PANIC: {}", info.message());
        if let Some(location) = info.location() {
            debug_print!(
                "Location: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        arm::halt()
    }
}

#[cfg(not(target_os = "none"))]
fn main() {
    use trapvm_kernel::arch::board;
    use trapvm_kernel::memory::VirtualMemoryManager;
    use trapvm_kernel::syscalls::{Request, SystemCallGate, TrapHandler};

    if trapvm_kernel::logging::init().is_err() {
        trapvm_kernel::debug_print!("logger already installed");
    }

    let vmm = match VirtualMemoryManager::hosted(board::LAYOUT, 256 * 1024) {
        Ok(vmm) => vmm,
        Err(err) => {
            log::error!("boot failed: {err}");
            std::process::exit(1);
        }
    };
    let mut gate = SystemCallGate::new(vmm, SingleTask::new());

    let script = [
        Request::Nop,
        Request::SetTime { date_ms: 123_456_789 },
        Request::GetTime,
        Request::Mmap { size: 3 * 4096 },
    ];
    let mut mapped = 0;
    for request in script {
        let mut frame = TrapFrame::default();
        request.marshal(&mut frame);
        gate.handle_trap(&mut frame);
        match request {
            Request::GetTime => log::info!("gettime -> {}", frame.wide_result()),
            Request::Mmap { .. } => {
                mapped = frame.result();
                log::info!("mmap -> {mapped:#010x}");
            }
            _ => {}
        }
    }

    let mut frame = TrapFrame::default();
    Request::Munmap {
        address: trapvm_kernel::memory::VirtualAddress::new(mapped),
        size: 3 * 4096,
    }
    .marshal(&mut frame);
    gate.handle_trap(&mut frame);

    let stats = gate.vmm().stats();
    log::info!(
        "served {} traps; {} user pages mapped, {} frames free, {} tables live",
        gate.served(),
        stats.mapped_user_pages,
        stats.free_frames,
        stats.live_tables
    );
}
