//! Early logging for the KBoot loader.
//!
//! Everything the loader prints is also appended to a boot log ring
//! buffer, which is later handed to the kernel verbatim (the `Log`
//! tag). Serial sinks are optional and feature-gated per target so
//! that the loader can narrate before any console driver is probed.
//!
//! **IMPORTANT:** This crate is not interrupt-safe. The loader is
//! single-threaded and masks interrupts for its entire lifetime, so
//! the only locking here is a guard against accidental re-entrancy.
#![cfg_attr(not(test), no_std)]

mod ring;

#[cfg(all(target_arch = "aarch64", feature = "pl011"))]
mod pl011;
#[cfg(all(target_arch = "x86_64", feature = "uart16550"))]
mod uart16550;

use core::fmt::Write;

use kboot_sync::SpinMutex;

pub use self::ring::LogRing;

/// Capacity of the global boot log ring, in bytes.
pub const LOG_RING_SIZE: usize = 8192;

/// The global boot log ring. Filled by [`log`], drained once at
/// finalisation time into the kernel's `Log` tag.
static LOG_RING: SpinMutex<LogRing<LOG_RING_SIZE>> = SpinMutex::new(LogRing::new());

/// Initializes the serial sink, if one is enabled.
pub fn init() {
	#[cfg(all(target_arch = "aarch64", feature = "pl011"))]
	pl011::init();
	#[cfg(all(target_arch = "x86_64", feature = "uart16550"))]
	uart16550::init();
}

/// Logs a message to the serial sink (if any) and the boot log ring.
///
/// Shouldn't be used directly; use the `dbg!` macros instead.
pub fn log(message: core::fmt::Arguments<'_>) {
	#[cfg(all(target_arch = "aarch64", feature = "pl011"))]
	pl011::log(message);
	#[cfg(all(target_arch = "x86_64", feature = "uart16550"))]
	uart16550::log(message);

	let mut ring = LOG_RING.lock();
	// Formatting into the ring cannot fail; the ring overwrites.
	let _ = ring.write_fmt(message);
	let _ = ring.write_str("\n");
}

/// Copies the current contents of the boot log ring, oldest byte
/// first, into `out`. Returns the number of bytes written.
pub fn copy_log_ring(out: &mut [u8]) -> usize {
	LOG_RING.lock().copy_linearized(out)
}

/// Returns the number of bytes currently held in the boot log ring.
pub fn log_ring_len() -> usize {
	LOG_RING.lock().len()
}

/// Sends a general debug message to the debug endpoint.
#[macro_export]
macro_rules! dbg {
	($($arg:tt)*) => {{
		$crate::log(format_args!("I:{}", format_args!($($arg)*)));
	}};
}

/// Sends a warning debug message to the debug endpoint.
#[macro_export]
macro_rules! dbg_warn {
	($($arg:tt)*) => {{
		$crate::log(format_args!("W:{}", format_args!($($arg)*)));
	}};
}

/// Sends an error debug message to the debug endpoint.
#[macro_export]
macro_rules! dbg_err {
	($($arg:tt)*) => {{
		$crate::log(format_args!("E:{}", format_args!($($arg)*)));
	}};
}
