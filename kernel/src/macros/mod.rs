//! TrapVM Kernel Macros
//!
//! Raw console output that bypasses the `log` facade, for paths where the
//! logger may not be installed or usable (early boot, panics).

/// Print a line straight to the debug console, prefixed with `[KERNEL]`
#[macro_export]
macro_rules! debug_print {
    ($($arg:tt)*) => {{
        use core::fmt::Write as _;
        let mut debug_writer = $crate::arch::DebugWriter::new();
        let _ = write!(debug_writer, "[KERNEL] ");
        let _ = writeln!(debug_writer, $($arg)*);
    }};
}
