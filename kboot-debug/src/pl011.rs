//! PL011 sink for early debug output on ARM64 platforms.
//!
//! A deliberately primitive transmit-only driver; the real console
//! stack lives outside the loader core. Defaults target QEMU's
//! `virt` machine.

use core::fmt::{self, Write};

use kboot_sync::SpinMutex;
use volatile_register::{RO, RW};

/// Transmit FIFO full.
const FR_TXFF: u32 = 1 << 5;
/// UART busy.
const FR_BUSY: u32 = 1 << 3;

/// The shared serial port for the loader.
static SERIAL: SpinMutex<Option<Pl011>> = SpinMutex::new(None);

/// PL011 register block, transmit-relevant subset.
#[repr(C)]
struct RegisterBlock {
	/// Data register.
	dr:  RW<u32>,
	/// Receive status / error clear.
	rsr: RW<u32>,
	/// Reserved.
	_r:  [u32; 4],
	/// Flag register.
	fr:  RO<u32>,
}

/// A transmit-only PL011 handle.
struct Pl011 {
	/// The MMIO register block.
	registers: *const RegisterBlock,
}

// SAFETY: The register block is a fixed MMIO window; sharing the
// SAFETY: pointer between contexts is fine under the outer lock.
unsafe impl Send for Pl011 {}

impl Pl011 {
	/// Waits for FIFO space, then writes one byte.
	fn put(&self, byte: u8) {
		// SAFETY: `registers` points at the PL011 MMIO block.
		unsafe {
			while (*self.registers).fr.read() & FR_TXFF != 0 {
				core::hint::spin_loop();
			}
			(*self.registers).dr.write(u32::from(byte));
		}
	}

	/// Waits for any pending transmission to drain.
	fn flush(&self) {
		// SAFETY: `registers` points at the PL011 MMIO block.
		unsafe {
			while (*self.registers).fr.read() & FR_BUSY != 0 {
				core::hint::spin_loop();
			}
		}
	}
}

impl Write for Pl011 {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		for byte in s.bytes() {
			self.put(byte);
		}
		self.flush();
		Ok(())
	}
}

/// Initializes the PL011 sink at QEMU `virt`'s UART base.
///
/// Firmware is assumed to have configured line settings already;
/// the loader only ever transmits.
pub fn init() {
	*SERIAL.lock() = Some(Pl011 {
		registers: 0x0900_0000 as *const RegisterBlock,
	});
}

/// Logs a message to the PL011.
pub fn log(message: fmt::Arguments<'_>) {
	if let Some(serial) = SERIAL.lock().as_mut() {
		// Transmit-only polling writes cannot fail.
		let _ = writeln!(serial, "{message}");
	}
}
