//! The loader-wide status codes returned by I/O-bearing operations.

use core::fmt;

/// Result alias used by every I/O-bearing operation in the loader.
pub type Result<T> = core::result::Result<T, Status>;

/// Status codes returned by I/O-bearing operations.
///
/// Programmer-contract violations (mis-aligned addresses, overlapping
/// inserts, use of a finalised context) are **not** represented here;
/// those trip assertions and halt the loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
	/// Operation not supported.
	NotSupported,
	/// Invalid argument supplied by configuration or caller.
	InvalidArgument,
	/// Timed out while waiting on a device.
	TimedOut,
	/// Out of memory.
	OutOfMemory,
	/// Requested entity not found.
	NotFound,
	/// Device contains no recognised filesystem.
	UnknownFilesystem,
	/// Filesystem structures are corrupt.
	CorruptFilesystem,
	/// Read past the end of a file.
	EndOfFile,
	/// Device-level I/O failure.
	DeviceError,
	/// File is not a recognised kernel image format.
	UnknownImage,
	/// File is a recognised image format but malformed for this target.
	MalformedImage,
	/// Internal error; indicates a loader bug.
	SystemError,
}

impl Status {
	/// Returns the human-readable description printed on the console.
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			Self::NotSupported => "operation not supported",
			Self::InvalidArgument => "invalid argument",
			Self::TimedOut => "timed out",
			Self::OutOfMemory => "out of memory",
			Self::NotFound => "not found",
			Self::UnknownFilesystem => "device has no recognised filesystem",
			Self::CorruptFilesystem => "filesystem is corrupt",
			Self::EndOfFile => "read beyond end of file",
			Self::DeviceError => "device error",
			Self::UnknownImage => "file is not a recognised image",
			Self::MalformedImage => "image is malformed",
			Self::SystemError => "internal error",
		}
	}
}

impl fmt::Display for Status {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}
