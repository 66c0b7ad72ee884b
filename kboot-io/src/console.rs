//! Console contract. The core prints through `putc`; the menu
//! additionally polls for keys. Everything else (regions, cursor,
//! colour) belongs to the UI layer outside the core.

use crate::status::Result;

/// A loader console.
pub trait Console {
	/// Writes one byte to the console.
	fn putc(&mut self, byte: u8);

	/// Reads one byte, blocking until available.
	fn getc(&mut self) -> Result<u8>;

	/// Returns `true` if a byte is waiting to be read.
	fn poll(&mut self) -> bool;

	/// Writes a string via [`Self::putc`].
	fn put_str(&mut self, s: &str) {
		for byte in s.bytes() {
			self.putc(byte);
		}
	}
}
