//! The firmware memory-map provider contract.
//!
//! BIOS E820, the EFI memory map and FDT `/memory` nodes all reduce
//! to a sequence of these descriptors, which platform initialisation
//! feeds into the physical memory manager.

/// Classification of a firmware-described physical region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FirmwareMemoryKind {
	/// General-purpose RAM, free for the loader and kernel.
	Usable,
	/// Firmware data the kernel may reclaim after consuming boot
	/// information (e.g. ACPI reclaimable).
	Reclaimable,
	/// Never to be touched.
	Reserved,
}

/// One physical region as described by firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FirmwareMemoryRegion {
	/// Physical start address. Not necessarily page-aligned.
	pub start:  u64,
	/// Length in bytes.
	pub length: u64,
	/// Region classification.
	pub kind:   FirmwareMemoryKind,
}
