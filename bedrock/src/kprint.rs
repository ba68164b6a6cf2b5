//! Kernel console output.
//!
//! The kernel prints through a pluggable sink so that the core stays
//! independent of the actual console device. Early boot installs a sink once
//! the serial line is up; until then output is dropped. Builds with the
//! `std` feature (the host test harness) route everything to standard
//! output instead.

use core::fmt::Write;

use crate::spinlock::SpinLock;

/// A console byte sink.
///
/// Implementations must be interrupt-safe: the kernel may print from
/// anywhere, including fault paths.
pub type ConsoleSink = fn(&str);

static CONSOLE: SpinLock<Option<ConsoleSink>> = SpinLock::new(None);

/// Installs the console sink.
///
/// Replaces any previously installed sink. The sink receives already
/// formatted text fragments.
pub fn set_console(sink: ConsoleSink) {
    let mut guard = CONSOLE.lock();
    *guard = Some(sink);
    guard.unlock();
}

struct SinkWriter;

impl Write for SinkWriter {
    fn write_str(&mut self, s: &str) -> core::fmt::Result {
        #[cfg(any(test, feature = "std"))]
        {
            std::print!("{}", s);
        }
        #[cfg(not(any(test, feature = "std")))]
        {
            let guard = CONSOLE.lock();
            let sink = *guard;
            guard.unlock();
            if let Some(sink) = sink {
                sink(s);
            }
        }
        Ok(())
    }
}

#[doc(hidden)]
pub fn _print(args: core::fmt::Arguments) {
    let _ = SinkWriter.write_fmt(args);
}

/// Prints to the kernel console.
#[macro_export]
macro_rules! print {
    ($($arg:tt)*) => ($crate::kprint::_print(core::format_args!($($arg)*)));
}

/// Prints to the kernel console, with a trailing newline.
#[macro_export]
macro_rules! println {
    () => ($crate::print!("\n"));
    ($($arg:tt)*) => ($crate::print!("{}\n", core::format_args!($($arg)*)));
}

/// Prints an informational message to the kernel console.
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ($crate::println!("[INFO] {}", core::format_args!($($arg)*)));
}

/// Prints a warning to the kernel console.
#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ($crate::println!("[WARN] {}", core::format_args!($($arg)*)));
}
