//! TrapVM Kernel Library
//!
//! Memory-management and system-call core of a small 32-bit ARM kernel.
//! This library owns the two pieces of the kernel that every process
//! depends on for isolation:
//!
//! - the virtual memory manager: hardware two-level page tables, address
//!   translation and the physical frame allocator backing user regions
//! - the synchronous trap dispatcher: the `svc` gateway through which
//!   unprivileged code requests time, scheduling, memory and process services
//!
//! # Architecture
//!
//! ```text
//!   user code --svc #0--> swi_handler (saves r0-r12, lr)
//!                              |
//!                              v
//!                     syscalls::dispatch(TrapFrame)
//!                       |                    |
//!             MMAP/MUNMAP                 everything else
//!                       v                    v
//!        memory::VirtualMemoryManager   SchedulerServices (external)
//!           |          |         |
//!   FrameAllocator  PageTableManager  Mmu (TTBR/DACR/SCTLR)
//! ```
//!
//! The scheduler, process lifecycle and drivers are collaborators that plug
//! in through [`syscalls::SchedulerServices`] and [`process::ProcessHandle`].
//!
//! # Safety
//!
//! Hardware access is confined to `arch::arm` and [`memory::KernelHeap`].
//! Everything else manipulates typed descriptors and can run on a host
//! against the simulated backends in `arch::hosted`.

#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]
#![warn(clippy::unwrap_used)]

#[cfg(all(not(test), not(target_os = "none")))]
extern crate std;

#[macro_use]
mod macros;

pub mod arch;
pub mod logging;
pub mod memory;
pub mod process;
pub mod syscalls;

use thiserror::Error;

/// Core kernel error types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum KernelError {
    /// Memory management failure
    #[error(transparent)]
    Memory(#[from] memory::MemoryError),
    /// Trap protocol violation
    #[error(transparent)]
    Trap(#[from] syscalls::TrapError),
    /// Architecture-level failure
    #[error(transparent)]
    Arch(#[from] arch::ArchError),
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
