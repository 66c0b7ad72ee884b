//! # KBoot boot protocol
//!
//! The kernel handoff interface: at entry the kernel receives the
//! boot magic and the virtual address of the *tag stream* — a
//! contiguous sequence of self-describing records, each led by a
//! `{ type: u32, size: u32 }` header, padded so every header sits on
//! an 8-byte boundary, terminated by a record of type
//! [`TagType::None`]. The `size` field counts the header and payload
//! but not the alignment padding.
//!
//! The stream lives in *Reclaimable* physical memory: once the kernel
//! has consumed it, the pages may be reused.
//!
//! Loader-side construction goes through [`TagListBuilder`], which
//! owns the byte buffer and maintains the alignment invariant
//! internally; nothing outside this crate does tag pointer
//! arithmetic.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod builder;

pub use builder::TagListBuilder;

/// The magic value handed to the kernel alongside the tag stream.
pub const BOOT_MAGIC: u64 = 0xB007_CAFE;

/// Tag stream record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TagType {
	/// Stream terminator.
	None           = 0,
	/// [`CoreTag`]: entry point, tag stream location, kernel image
	/// info. Always the first tag.
	Core           = 1,
	/// One per-image option echoed back to the kernel: two `u32`
	/// lengths followed by the name and value bytes.
	Option         = 2,
	/// [`MemoryTag`]: one kernel-visible physical range.
	Memory         = 3,
	/// [`VideoTag`]: the video mode set for the kernel.
	Video          = 4,
	/// Where the kernel was loaded from: a [`BootDeviceKind`] and a
	/// name-length `u32`, followed by the name bytes.
	BootDevice     = 5,
	/// One loaded boot module: physical base and size (`u64` each), a
	/// name-length `u32` and padding, followed by the name bytes.
	Module         = 6,
	/// [`PageTablesTag`]: the constructed translation tables.
	PageTables     = 7,
	/// The boot log ring contents: a length `u32` and padding,
	/// followed by the log bytes.
	Log            = 8,
	/// [`SerialTag`]: the serial console the loader was using.
	Serial         = 9,
	/// The raw BIOS E820 map, when booted via BIOS: an entry-count
	/// `u32` and padding, followed by the firmware bytes verbatim.
	BiosE820       = 10,
	/// [`EfiSystemTableTag`]: the EFI system table, when booted via
	/// EFI.
	EfiSystemTable = 11,
}

/// The record header common to every tag.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct TagHeader {
	/// The record type ([`TagType`] value).
	pub ty:   u32,
	/// Header plus payload size in bytes, excluding alignment
	/// padding.
	pub size: u32,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<TagHeader>(), 8);

/// The core tag payload. Always the first record of the stream.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct CoreTag {
	/// Virtual address the tag stream is mapped at.
	pub tags_virt:   u64,
	/// Total size of the tag stream, in bytes.
	pub tags_size:   u32,
	/// Reserved.
	pub _reserved:   u32,
	/// Physical base of the kernel image backing.
	pub kernel_phys: u64,
	/// Size of the kernel image span, in bytes.
	pub kernel_size: u64,
	/// The kernel entry point the loader jumped to.
	pub entry_virt:  u64,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<CoreTag>(), 40);

/// One kernel-visible physical memory range.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct MemoryTag {
	/// Physical start address.
	pub start:     u64,
	/// Size in bytes.
	pub size:      u64,
	/// Range type ([`MemoryTagType`] value).
	pub ty:        u8,
	/// Reserved.
	pub _reserved: [u8; 7],
}

static_assertions::const_assert_eq!(::core::mem::size_of::<MemoryTag>(), 24);

/// Memory range types as seen by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MemoryTagType {
	/// Free for kernel use.
	Free        = 0,
	/// Allocated to the kernel image or other long-lived data.
	Allocated   = 1,
	/// Boot-time data the kernel may reclaim after consuming it.
	Reclaimable = 2,
	/// The kernel's initial page tables.
	PageTables  = 3,
	/// The kernel's initial stack.
	Stack       = 4,
	/// Loaded boot modules.
	Modules     = 5,
}

/// The constructed translation tables.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct PageTablesTag {
	/// Physical address of the root table (CR3 / TTBR0).
	pub root_phys:       u64,
	/// Physical address of the upper-half root on targets with split
	/// roots (TTBR1); zero otherwise.
	pub upper_root_phys: u64,
	/// Virtual address of the trampoline page mapping.
	pub trampoline_virt: u64,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<PageTablesTag>(), 24);

/// The video mode handed to the kernel.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct VideoTag {
	/// Horizontal resolution in pixels.
	pub width:            u32,
	/// Vertical resolution in pixels.
	pub height:           u32,
	/// Bits per pixel.
	pub bpp:              u32,
	/// Reserved.
	pub _reserved:        u32,
	/// Physical address of the linear framebuffer.
	pub framebuffer_phys: u64,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<VideoTag>(), 24);

/// The serial console the loader was narrating to.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SerialTag {
	/// Register base: an I/O port or an MMIO physical address.
	pub addr: u64,
	/// Configured baud rate.
	pub baud: u32,
	/// 0 for port I/O, 1 for MMIO.
	pub io_kind: u32,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<SerialTag>(), 16);

/// The EFI system table pointer.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct EfiSystemTableTag {
	/// Physical address of the system table.
	pub table_phys: u64,
}

static_assertions::const_assert_eq!(::core::mem::size_of::<EfiSystemTableTag>(), 8);

/// Boot device transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BootDeviceKind {
	/// No boot device (e.g. a memory-loaded image).
	None    = 0,
	/// A local disk or partition.
	Disk    = 1,
	/// A network transport.
	Network = 2,
	/// Anything else.
	Other   = 3,
}
