//! Hardware-facing side of the trap gateway.
//!
//! The entry stub calls [`trap_entry`] with the frame it pushed. The frame
//! is forwarded to the installed [`TrapHandler`], normally a
//! [`SystemCallGate`] bundling the memory manager with the scheduler
//! services. Protocol violations stop here: the gate panics rather than
//! resuming a caller whose calling convention is corrupt.

use core::cell::UnsafeCell;

use log::error;

use super::{SchedulerServices, TrapFrame, dispatch};
use crate::arch::Mmu;
use crate::memory::{TableHeap, VirtualMemoryManager};

/// Receiver of saved trap frames
pub trait TrapHandler {
    /// Serve the request in `frame`, updating its result registers
    fn handle_trap(&mut self, frame: &mut TrapFrame);
}

/// Memory manager and scheduler services behind the `svc` gateway
pub struct SystemCallGate<H: TableHeap, M: Mmu, S: SchedulerServices> {
    vmm: VirtualMemoryManager<H, M>,
    services: S,
    served: u64,
}

impl<H: TableHeap, M: Mmu, S: SchedulerServices> SystemCallGate<H, M, S> {
    /// Gate over an initialized memory manager
    pub fn new(vmm: VirtualMemoryManager<H, M>, services: S) -> Self {
        Self {
            vmm,
            services,
            served: 0,
        }
    }

    /// Memory manager
    pub fn vmm(&self) -> &VirtualMemoryManager<H, M> {
        &self.vmm
    }

    /// Memory manager, mutably (process creation, address-space switches)
    pub fn vmm_mut(&mut self) -> &mut VirtualMemoryManager<H, M> {
        &mut self.vmm
    }

    /// Scheduler services
    pub fn services(&self) -> &S {
        &self.services
    }

    /// Scheduler services, mutably
    pub fn services_mut(&mut self) -> &mut S {
        &mut self.services
    }

    /// Requests served so far
    pub fn served(&self) -> u64 {
        self.served
    }
}

impl<H: TableHeap, M: Mmu, S: SchedulerServices> TrapHandler for SystemCallGate<H, M, S> {
    fn handle_trap(&mut self, frame: &mut TrapFrame) {
        match dispatch(frame, &mut self.vmm, &mut self.services) {
            Ok(_) => self.served += 1,
            Err(err) => {
                error!(
                    "fatal trap from pid {} at {:#010x}: {err}",
                    self.services.current_pid().as_u32(),
                    frame.lr
                );
                panic!("trap protocol violation: {err}");
            }
        }
    }
}

struct HandlerSlot(UnsafeCell<Option<&'static mut dyn TrapHandler>>);

// SAFETY: Single core; the slot is written once at boot before traps are
// enabled and read only from the SVC entry path, which does not nest.
unsafe impl Sync for HandlerSlot {}

static HANDLER: HandlerSlot = HandlerSlot(UnsafeCell::new(None));

/// Install the handler the entry stub forwards to.
///
/// # Safety
///
/// Must be called before the first `svc` can occur and never while a trap
/// is being served.
pub unsafe fn install_handler(handler: &'static mut dyn TrapHandler) {
    // SAFETY: Caller guarantees no trap is in flight, so nobody else holds the slot
    unsafe {
        *HANDLER.0.get() = Some(handler);
    }
}

/// Entry point called by the `svc` stub with the saved register image.
///
/// # Safety
///
/// `frame` must point at a valid, exclusively owned [`TrapFrame`] (the
/// registers pushed by the stub) and traps of this class must be masked for
/// the duration of the call.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn trap_entry(frame: *mut TrapFrame) {
    // SAFETY: Caller guarantees the frame is valid and exclusively ours
    let frame = unsafe { &mut *frame };
    // SAFETY: Traps do not nest, so this is the only live reference to the slot
    let handler = unsafe { (*HANDLER.0.get()).as_deref_mut() };
    match handler {
        Some(handler) => handler.handle_trap(frame),
        None => panic!("trap request {} before a handler was installed", frame.request_code()),
    }
}
