//! Vocabulary shared by the architecture page-table builders.
//!
//! Both architecture crates expose the same construction surface —
//! map, virtual-view memset/copy, lookup, finish — differing only in
//! table formats and attribute encodings. The flag set and error
//! type they share live here.

use bitflags::bitflags;

use crate::phys::AllocError;

bitflags! {
	/// Mapping attribute flags.
	///
	/// The default (empty) set is read-only, non-executable,
	/// write-back cacheable normal memory. [`MapFlags::UNCACHED`]
	/// takes priority over [`MapFlags::WRITE_THROUGH`] if both are
	/// given.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct MapFlags: u32 {
		/// Writable.
		const WRITE = 1 << 0;
		/// Executable.
		const EXEC = 1 << 1;
		/// Write-through normal memory instead of write-back.
		const WRITE_THROUGH = 1 << 2;
		/// Uncached / device memory.
		const UNCACHED = 1 << 3;
	}
}

/// Errors returned by the page-table builders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
	/// The page table entry is already present.
	Exists,
	/// A virtual page in the requested range is not mapped.
	NotMapped,
	/// The virtual address is out of range for the target address
	/// space (e.g. fails the canonical check, or exceeds 32 bits in a
	/// 32-bit mode).
	VirtOutOfRange,
	/// Out of memory while allocating an intermediate table.
	OutOfMemory,
}

impl From<AllocError> for MapError {
	fn from(err: AllocError) -> Self {
		match err {
			AllocError::OutOfMemory => Self::OutOfMemory,
		}
	}
}
