//! Unprivileged call stubs.
//!
//! Each stub loads r0-r2 from [`Request::arguments`] and issues `svc #0`;
//! WAIT travels under its own code with the status pointer in r1.
//! The kernel restores every register except the result slots, so only r0
//! and r1 are treated as clobbered.

use core::arch::asm;

use super::{MMAP_FAILED, MUNMAP_OK, Request, RequestCode, join_u64};
use crate::memory::VirtualAddress;

fn trap(request: Request) -> (u32, u32) {
    raw_trap(request.arguments())
}

fn raw_trap([code, a1, a2]: [u32; 3]) -> (u32, u32) {
    let r0: u32;
    let r1: u32;
    // SAFETY: The kernel's entry stub preserves everything but the result registers
    unsafe {
        asm!(
            "svc #0",
            inlateout("r0") code => r0,
            inlateout("r1") a1 => r1,
            in("r2") a2,
            options(nostack)
        );
    }
    (r0, r1)
}

/// Restart the machine
pub fn sys_reboot() {
    trap(Request::Reboot);
}

/// Do nothing, through the kernel
pub fn sys_nop() {
    trap(Request::Nop);
}

/// Set the wall clock in milliseconds
pub fn sys_settime(date_ms: u64) {
    trap(Request::SetTime { date_ms });
}

/// Read the wall clock in milliseconds
pub fn sys_gettime() -> u64 {
    let (high, low) = trap(Request::GetTime);
    join_u64(high, low)
}

/// Give the CPU to `target`
pub fn sys_yieldto(target: u32) {
    trap(Request::YieldTo { target });
}

/// Give the CPU to the scheduler's choice
pub fn sys_yield() {
    trap(Request::Yield);
}

/// Terminate the calling process
pub fn sys_exit(status: i32) -> ! {
    trap(Request::Exit { status });
    // The scheduler never resumes an exited process
    loop {
        core::hint::spin_loop();
    }
}

/// Map `size` bytes of fresh memory
pub fn sys_mmap(size: u32) -> Option<VirtualAddress> {
    let (address, _) = trap(Request::Mmap { size });
    (address != MMAP_FAILED).then_some(VirtualAddress::new(address))
}

/// Unmap `size` bytes at `address`; true on success
pub fn sys_munmap(address: VirtualAddress, size: u32) -> bool {
    trap(Request::Munmap { address, size }).0 == MUNMAP_OK
}

/// Select a scheduling policy
pub fn sys_setscheduler(policy: i32) -> i32 {
    trap(Request::SetScheduler { policy }).0 as i32
}

/// Duplicate the calling process; 0 in the child, the child id in the parent
pub fn sys_fork() -> i32 {
    trap(Request::Fork).0 as i32
}

/// Wait for any child; its status is stored at `status`
pub fn sys_wait(status: *mut i32) -> i32 {
    raw_trap([RequestCode::Wait as u32, status as usize as u32, 0]).0 as i32
}

/// Wait for child `pid`; its status is stored at `status`
pub fn sys_waitpid(pid: i32, status: *mut i32) -> i32 {
    trap(Request::WaitPid {
        pid,
        status: status as usize as u32,
    })
    .0 as i32
}
