//! 16550 UART sink for early debug output on x86 platforms.

use core::fmt::{self, Write};

use kboot_sync::SpinMutex;
use uart_16550::SerialPort;

/// The shared serial port for the loader (COM1).
// SAFETY: 0x3F8 is the standard COM1 I/O port base.
static SERIAL: SpinMutex<SerialPort> = SpinMutex::new(unsafe { SerialPort::new(0x3F8) });

/// Initializes the UART.
pub fn init() {
	SERIAL.lock().init();
}

/// Logs a message to the UART.
pub fn log(message: fmt::Arguments<'_>) {
	// Polled port writes cannot fail.
	let _ = writeln!(SERIAL.lock(), "{message}");
}
