//! System call Interface
//!
//! This module implements the synchronous trap gateway of the kernel.
//! Unprivileged code places a request code and its operands in registers
//! and executes `svc #0`; the entry stub saves r0-r12 and the return
//! address into a [`TrapFrame`] and hands it to [`dispatch`], which decodes
//! a typed [`Request`], routes it, and writes results back into the frame.
//! The stub then restores every register from the (possibly updated) frame
//! and returns to the caller.
//!
//! # Calling Convention (ARM)
//!
//! ```text
//! r0          request code
//! r1, r2      operands (64-bit values split high/low)
//! r0, r1      results, where the request has any
//! ```
//!
//! | code | request      | operands                 | results            |
//! |------|--------------|--------------------------|--------------------|
//! | 0    | REBOOT       |                          |                    |
//! | 1    | NOP          |                          |                    |
//! | 2    | SETTIME      | r1 = ms high, r2 = low   |                    |
//! | 3    | GETTIME      |                          | r0 = high, r1 = low|
//! | 4    | YIELDTO      | r1 = target pid          |                    |
//! | 5    | YIELD        |                          |                    |
//! | 6    | EXIT         | r1 = status              |                    |
//! | 7    | MMAP         | r1 = size                | r0 = address or 0  |
//! | 8    | MUNMAP       | r1 = address, r2 = size  | r0 = 0 or -1       |
//! | 9    | SETSCHEDULER | r1 = policy              | r0 = status        |
//! | 10   | FORK         |                          | r0 = child pid     |
//! | 11   | WAIT         | r1 = status pointer      | r0 = pid           |
//! | 12   | WAITPID      | r1 = pid, r2 = status ptr| r0 = pid           |
//!
//! Any other code is a protocol violation and halts the kernel.

#![deny(missing_docs)]
#![warn(clippy::undocumented_unsafe_blocks)]

mod gate;
#[cfg(target_arch = "arm")]
pub mod user;

pub use gate::{SystemCallGate, TrapHandler, install_handler, trap_entry};

use log::{trace, warn};
use thiserror::Error;

use crate::arch::Mmu;
use crate::memory::{TableHeap, VirtualAddress, VirtualMemoryManager};
use crate::process::{ProcessHandle, ProcessId, TableSelector};

/// Number of general purpose registers saved on trap entry (r0-r12)
pub const SAVED_REGISTERS: usize = 13;

/// MMAP result when no region could be mapped
pub const MMAP_FAILED: u32 = 0;

/// MUNMAP result on success
pub const MUNMAP_OK: u32 = 0;

/// MUNMAP result on failure (-1)
pub const MUNMAP_FAILED: u32 = u32::MAX;

/// WAITPID target meaning "any child"
pub const ANY_CHILD: i32 = -1;

/// Request codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum RequestCode {
    /// Restart the machine
    Reboot = 0,
    /// Do nothing
    Nop = 1,
    /// Set the wall clock (milliseconds)
    SetTime = 2,
    /// Read the wall clock (milliseconds)
    GetTime = 3,
    /// Hand the CPU to a specific process
    YieldTo = 4,
    /// Hand the CPU to the scheduler's choice
    Yield = 5,
    /// Terminate the calling process
    Exit = 6,
    /// Map a fresh region of user memory
    Mmap = 7,
    /// Unmap a region of user memory
    Munmap = 8,
    /// Select the scheduling policy
    SetScheduler = 9,
    /// Duplicate the calling process
    Fork = 10,
    /// Wait for any child to terminate
    Wait = 11,
    /// Wait for a specific child to terminate
    WaitPid = 12,
}

impl TryFrom<u32> for RequestCode {
    type Error = TrapError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(RequestCode::Reboot),
            1 => Ok(RequestCode::Nop),
            2 => Ok(RequestCode::SetTime),
            3 => Ok(RequestCode::GetTime),
            4 => Ok(RequestCode::YieldTo),
            5 => Ok(RequestCode::Yield),
            6 => Ok(RequestCode::Exit),
            7 => Ok(RequestCode::Mmap),
            8 => Ok(RequestCode::Munmap),
            9 => Ok(RequestCode::SetScheduler),
            10 => Ok(RequestCode::Fork),
            11 => Ok(RequestCode::Wait),
            12 => Ok(RequestCode::WaitPid),
            _ => Err(TrapError::UnknownRequest(value)),
        }
    }
}

/// Trap protocol violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TrapError {
    /// r0 held a code outside the closed set
    #[error("unknown trap request code {0}")]
    UnknownRequest(u32),
}

/// Registers saved by the trap entry stub, in stack order.
///
/// The layout matches `stmfd sp!, {r0-r12, lr}`: the frame pointer handed
/// to the dispatcher is the stack pointer after the push.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct TrapFrame {
    /// r0-r12 of the caller
    pub registers: [u32; SAVED_REGISTERS],
    /// Return address in the caller
    pub lr: u32,
}

static_assertions::assert_eq_size!(TrapFrame, [u32; SAVED_REGISTERS + 1]);

impl TrapFrame {
    /// Frame with the given argument registers and everything else zero
    pub fn with_arguments(r0: u32, r1: u32, r2: u32) -> Self {
        let mut frame = Self::default();
        frame.registers[0] = r0;
        frame.registers[1] = r1;
        frame.registers[2] = r2;
        frame
    }

    /// Raw request code (r0)
    pub const fn request_code(&self) -> u32 {
        self.registers[0]
    }

    /// 64-bit value returned in r0 (high) and r1 (low)
    pub const fn wide_result(&self) -> u64 {
        join_u64(self.registers[0], self.registers[1])
    }

    /// Single-register result (r0)
    pub const fn result(&self) -> u32 {
        self.registers[0]
    }
}

/// Split a 64-bit value into (high, low) register halves
pub const fn split_u64(value: u64) -> (u32, u32) {
    ((value >> 32) as u32, value as u32)
}

/// Join (high, low) register halves into a 64-bit value
pub const fn join_u64(high: u32, low: u32) -> u64 {
    ((high as u64) << 32) | low as u64
}

/// A decoded trap request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// Restart the machine
    Reboot,
    /// Do nothing
    Nop,
    /// Set the wall clock
    SetTime {
        /// Milliseconds
        date_ms: u64,
    },
    /// Read the wall clock
    GetTime,
    /// Hand the CPU to `target`
    YieldTo {
        /// Target process id
        target: u32,
    },
    /// Hand the CPU to the scheduler's choice
    Yield,
    /// Terminate the caller
    Exit {
        /// Exit status
        status: i32,
    },
    /// Map `size` bytes of fresh memory
    Mmap {
        /// Bytes requested
        size: u32,
    },
    /// Unmap `size` bytes at `address`
    Munmap {
        /// Region base
        address: VirtualAddress,
        /// Region size in bytes
        size: u32,
    },
    /// Select a scheduling policy
    SetScheduler {
        /// Policy number, interpreted by the scheduler
        policy: i32,
    },
    /// Duplicate the caller
    Fork,
    /// Wait for a child; `pid` is [`ANY_CHILD`] for WAIT
    WaitPid {
        /// Child to wait for
        pid: i32,
        /// User address receiving the exit status
        status: u32,
    },
}

impl Request {
    /// Decode the request in `frame`
    pub fn decode(frame: &TrapFrame) -> Result<Self, TrapError> {
        let [_, r1, r2, ..] = frame.registers;
        let request = match RequestCode::try_from(frame.request_code())? {
            RequestCode::Reboot => Self::Reboot,
            RequestCode::Nop => Self::Nop,
            RequestCode::SetTime => Self::SetTime {
                date_ms: join_u64(r1, r2),
            },
            RequestCode::GetTime => Self::GetTime,
            RequestCode::YieldTo => Self::YieldTo { target: r1 },
            RequestCode::Yield => Self::Yield,
            RequestCode::Exit => Self::Exit { status: r1 as i32 },
            RequestCode::Mmap => Self::Mmap { size: r1 },
            RequestCode::Munmap => Self::Munmap {
                address: VirtualAddress::new(r1),
                size: r2,
            },
            RequestCode::SetScheduler => Self::SetScheduler { policy: r1 as i32 },
            RequestCode::Fork => Self::Fork,
            RequestCode::Wait => Self::WaitPid {
                pid: ANY_CHILD,
                status: r1,
            },
            RequestCode::WaitPid => Self::WaitPid {
                pid: r1 as i32,
                status: r2,
            },
        };
        Ok(request)
    }

    /// Code this request travels under
    pub const fn code(&self) -> RequestCode {
        match self {
            Self::Reboot => RequestCode::Reboot,
            Self::Nop => RequestCode::Nop,
            Self::SetTime { .. } => RequestCode::SetTime,
            Self::GetTime => RequestCode::GetTime,
            Self::YieldTo { .. } => RequestCode::YieldTo,
            Self::Yield => RequestCode::Yield,
            Self::Exit { .. } => RequestCode::Exit,
            Self::Mmap { .. } => RequestCode::Mmap,
            Self::Munmap { .. } => RequestCode::Munmap,
            Self::SetScheduler { .. } => RequestCode::SetScheduler,
            Self::Fork => RequestCode::Fork,
            Self::WaitPid { .. } => RequestCode::WaitPid,
        }
    }

    /// Argument registers (r0, r1, r2) carrying this request
    pub const fn arguments(&self) -> [u32; 3] {
        let code = self.code() as u32;
        match *self {
            Self::SetTime { date_ms } => {
                let (high, low) = split_u64(date_ms);
                [code, high, low]
            }
            Self::YieldTo { target } => [code, target, 0],
            Self::Exit { status } => [code, status as u32, 0],
            Self::Mmap { size } => [code, size, 0],
            Self::Munmap { address, size } => [code, address.as_u32(), size],
            Self::SetScheduler { policy } => [code, policy as u32, 0],
            Self::WaitPid { pid, status } => [code, pid as u32, status],
            Self::Reboot | Self::Nop | Self::GetTime | Self::Yield | Self::Fork => [code, 0, 0],
        }
    }

    /// Write this request into the argument registers of `frame`
    pub fn marshal(&self, frame: &mut TrapFrame) {
        let [r0, r1, r2] = self.arguments();
        frame.registers[0] = r0;
        frame.registers[1] = r1;
        frame.registers[2] = r2;
    }
}

/// Services the dispatcher forwards to the scheduler and process manager.
///
/// Calls that may switch context receive the saved frame: the scheduler
/// swaps register images in place and writes any result slot itself, since
/// after a switch the frame belongs to whichever process runs next.
pub trait SchedulerServices {
    /// Restart the machine
    fn reboot(&mut self);

    /// Set the wall clock
    fn set_date_ms(&mut self, date_ms: u64);

    /// Read the wall clock
    fn date_ms(&self) -> u64;

    /// Switch to `target`
    fn yield_to(&mut self, target: u32, frame: &mut TrapFrame);

    /// Switch to the next ready process
    fn yield_now(&mut self, frame: &mut TrapFrame);

    /// Terminate the caller and switch away
    fn exit(&mut self, status: i32, frame: &mut TrapFrame);

    /// Select a scheduling policy; the return value lands in r0
    fn set_scheduler(&mut self, policy: i32) -> i32;

    /// Duplicate the caller, writing the child id into the parent's r0
    fn fork(&mut self, frame: &mut TrapFrame);

    /// Wait for `pid` (or [`ANY_CHILD`]) and store its status at `status`
    fn wait_pid(&mut self, pid: i32, status: u32, frame: &mut TrapFrame);

    /// Control block of the caller, `None` while the kernel itself traps
    fn current_process(&self) -> Option<&dyn ProcessHandle>;

    /// Directory of the calling process
    fn current_table(&self) -> TableSelector {
        TableSelector::of(self.current_process())
    }

    /// Identifier of the caller, [`ProcessId::KERNEL`] when there is none
    fn current_pid(&self) -> ProcessId {
        self.current_process().map_or(ProcessId::KERNEL, |process| process.id())
    }
}

/// Route the request saved in `frame` to its handler.
///
/// Returns the code that was served. An unknown code is reported as
/// [`TrapError::UnknownRequest`] before any handler or service runs.
pub fn dispatch<H, M, S>(
    frame: &mut TrapFrame,
    vmm: &mut VirtualMemoryManager<H, M>,
    services: &mut S,
) -> Result<RequestCode, TrapError>
where
    H: TableHeap,
    M: Mmu,
    S: SchedulerServices + ?Sized,
{
    let request = Request::decode(frame)?;
    trace!("trap {request:?}");

    match request {
        Request::Reboot => services.reboot(),
        Request::Nop => {}
        Request::SetTime { date_ms } => services.set_date_ms(date_ms),
        Request::GetTime => {
            let (high, low) = split_u64(services.date_ms());
            frame.registers[0] = high;
            frame.registers[1] = low;
        }
        Request::YieldTo { target } => services.yield_to(target, frame),
        Request::Yield => services.yield_now(frame),
        Request::Exit { status } => services.exit(status, frame),
        Request::Mmap { size } => {
            let selector = services.current_table();
            frame.registers[0] = match vmm.allocate_region(selector, size as usize) {
                Ok(address) => address.as_u32(),
                Err(err) => {
                    warn!("mmap({size:#x}) refused: {err}");
                    MMAP_FAILED
                }
            };
        }
        Request::Munmap { address, size } => {
            let selector = services.current_table();
            frame.registers[0] = match vmm.free_region(selector, address, size as usize) {
                Ok(()) => MUNMAP_OK,
                Err(err) => {
                    warn!("munmap({address}, {size:#x}) refused: {err}");
                    MUNMAP_FAILED
                }
            };
        }
        Request::SetScheduler { policy } => {
            frame.registers[0] = services.set_scheduler(policy) as u32;
        }
        Request::Fork => services.fork(frame),
        Request::WaitPid { pid, status } => services.wait_pid(pid, status, frame),
    }

    Ok(request.code())
}
