//! The boot log ring buffer.
//!
//! A fixed-capacity byte ring: once full, the oldest bytes are
//! overwritten. The kernel receives the linearized contents through
//! the `Log` tag, so losing the head of a very chatty boot is by
//! construction the right failure mode.

use core::fmt;

/// A fixed-capacity byte ring buffer.
pub struct LogRing<const N: usize> {
	/// Backing storage.
	data:  [u8; N],
	/// Index of the oldest byte.
	start: usize,
	/// Number of valid bytes, `<= N`.
	len:   usize,
}

impl<const N: usize> LogRing<N> {
	/// Creates a new, empty ring.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			data:  [0; N],
			start: 0,
			len:   0,
		}
	}

	/// Returns the number of valid bytes held.
	#[must_use]
	pub fn len(&self) -> usize {
		self.len
	}

	/// Returns `true` if the ring holds no bytes.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len == 0
	}

	/// Appends `bytes`, overwriting the oldest contents on overflow.
	pub fn push_bytes(&mut self, bytes: &[u8]) {
		for &byte in bytes {
			let end = (self.start + self.len) % N;
			self.data[end] = byte;
			if self.len == N {
				// Full; the oldest byte just got overwritten.
				self.start = (self.start + 1) % N;
			} else {
				self.len += 1;
			}
		}
	}

	/// Copies the contents, oldest byte first, into `out`.
	///
	/// Copies at most `out.len()` bytes and returns the number copied.
	/// When `out` is too small the **newest** bytes are kept, matching
	/// the overwrite discipline of the ring itself.
	pub fn copy_linearized(&self, out: &mut [u8]) -> usize {
		let count = self.len.min(out.len());
		let skip = self.len - count;
		for (i, slot) in out.iter_mut().enumerate().take(count) {
			*slot = self.data[(self.start + skip + i) % N];
		}
		count
	}
}

impl<const N: usize> fmt::Write for LogRing<N> {
	fn write_str(&mut self, s: &str) -> fmt::Result {
		self.push_bytes(s.as_bytes());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn fills_and_reads_back() {
		let mut ring = LogRing::<16>::new();
		ring.push_bytes(b"hello");
		let mut out = [0_u8; 16];
		assert_eq!(ring.copy_linearized(&mut out), 5);
		assert_eq!(&out[..5], b"hello");
	}

	#[test]
	fn overwrites_oldest_on_wrap() {
		let mut ring = LogRing::<8>::new();
		ring.push_bytes(b"abcdefgh");
		assert_eq!(ring.len(), 8);
		ring.push_bytes(b"XY");
		assert_eq!(ring.len(), 8);
		let mut out = [0_u8; 8];
		assert_eq!(ring.copy_linearized(&mut out), 8);
		assert_eq!(&out, b"cdefghXY");
	}

	#[test]
	fn short_output_keeps_newest() {
		let mut ring = LogRing::<8>::new();
		ring.push_bytes(b"abcdef");
		let mut out = [0_u8; 4];
		assert_eq!(ring.copy_linearized(&mut out), 4);
		assert_eq!(&out, b"cdef");
	}

	#[test]
	fn formats_through_fmt_write() {
		use core::fmt::Write;

		let mut ring = LogRing::<32>::new();
		write!(ring, "base={:#x}", 0x1000).unwrap();
		let mut out = [0_u8; 32];
		let n = ring.copy_linearized(&mut out);
		assert_eq!(&out[..n], b"base=0x1000");
	}
}
