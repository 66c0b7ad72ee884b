//! ELF kernel image parsing and loading.
//!
//! The parser reads headers through the filesystem handle contract
//! (nothing is assumed to be memory-mapped), classifies the image as
//! fixed or relocatable, and hands the loader a checked description.
//! The loader then secures physical backing, copies segments, zeroes
//! the BSS tail, maps the image and applies the minimal relocation
//! set relocatable kernels need at this stage.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub(crate) mod raw;

mod load;

use alloc::vec::Vec;
use core::mem::MaybeUninit;

use bitflags::bitflags;
use kboot_io::{FileHandle, Status};
use kboot_mem::{align_down, align_up, PAGE_SIZE};

pub use self::load::{load, LoadedImage, LoadedSegment, SegmentMapper};

/// The class of an ELF image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass {
	/// 32-bit ELF.
	Elf32,
	/// 64-bit ELF.
	Elf64,
}

/// The machines the loader knows how to enter kernels for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ElfMachine {
	/// 32-bit x86.
	X86     = 3,
	/// AMD x86-64.
	X86_64  = 0x3E,
	/// ARM AArch64.
	Aarch64 = 0xB7,
}

/// Placement policy of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
	/// The kernel pins its physical addresses; the exact range is
	/// demanded and failure to secure it is fatal.
	Fixed,
	/// The kernel may be placed at any sufficiently aligned physical
	/// range; the loader picks the highest free range that fits.
	Relocatable,
}

bitflags! {
	/// ELF segment permission flags (`p_flags` values).
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct SegmentFlags: u32 {
		/// Executable.
		const EXEC = 1 << 0;
		/// Writable.
		const WRITE = 1 << 1;
		/// Readable.
		const READ = 1 << 2;
	}
}

/// One `PT_LOAD` segment of a parsed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
	/// Offset of the segment contents in the file.
	pub file_offset: u64,
	/// Number of bytes provided by the file.
	pub file_size:   u64,
	/// Target virtual address.
	pub virt:        u64,
	/// Requested physical address.
	pub phys:        u64,
	/// Size of the segment in memory; any tail beyond
	/// [`Self::file_size`] is zero-filled.
	pub mem_size:    u64,
	/// Permission flags.
	pub flags:       SegmentFlags,
	/// Requested alignment.
	pub align:       u64,
}

/// RELA table location, from `PT_DYNAMIC`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelaInfo {
	/// Image-relative offset of the table.
	pub offset:     u64,
	/// Total size of the table, in bytes.
	pub size:       u64,
	/// Size of one entry, in bytes.
	pub entry_size: u64,
}

/// Errors that can occur when parsing or loading an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
	/// The file is not an ELF image at all.
	NotElf,
	/// Invalid or unsupported ELF class.
	UnsupportedClass(u8),
	/// The image is not little-endian.
	WrongEndianness(u8),
	/// Invalid ident or file version.
	BadVersion,
	/// The machine does not match the running architecture.
	WrongMachine(u16),
	/// The file type is neither `ET_EXEC` nor `ET_DYN`.
	BadFileType(u16),
	/// The entry point lies outside every executable segment.
	EntryOutsideImage,
	/// The program header table is malformed.
	BadProgramHeaders,
	/// The image has no `PT_LOAD` segments.
	NoSegments,
	/// Two segments overlap in virtual address space.
	OverlappingSegments,
	/// A 32-bit image asked for relocation, which is not supported.
	Unrelocatable32,
	/// A relocatable image carries a relocation type the loader
	/// cannot apply.
	UnsupportedRelocation(u32),
	/// The requested fixed physical range could not be secured, or
	/// no free range fits a relocatable image.
	NoPhysicalSpace,
	/// An I/O error from the underlying handle.
	Io(Status),
}

impl From<Status> for ElfError {
	fn from(status: Status) -> Self {
		Self::Io(status)
	}
}

impl From<ElfError> for Status {
	fn from(err: ElfError) -> Self {
		match err {
			ElfError::NotElf => Self::UnknownImage,
			ElfError::NoPhysicalSpace => Self::OutOfMemory,
			ElfError::Io(status) => status,
			_ => Self::MalformedImage,
		}
	}
}

/// A parsed, validated ELF image description.
#[derive(Debug)]
pub struct ElfImage {
	/// The image class.
	class:     ElfClass,
	/// The image machine.
	machine:   ElfMachine,
	/// The entry point as stored in the file.
	entry:     u64,
	/// Placement policy.
	placement: Placement,
	/// `PT_LOAD` segments, sorted by ascending virtual address.
	segments:  Vec<Segment>,
	/// RELA table location for relocatable images.
	rela:      Option<RelaInfo>,
}

impl ElfImage {
	/// Parses and validates an image from `handle`.
	///
	/// `machines` lists the machines acceptable on the running
	/// architecture (e.g. both `X86_64` and `X86` on an x86-64
	/// loader). An image whose machine is not listed is rejected.
	pub fn parse(
		handle: &mut dyn FileHandle,
		machines: &[ElfMachine],
	) -> Result<Self, ElfError> {
		// SAFETY: `ElfIdent` is a plain byte/integer record; any bit
		// SAFETY: pattern is a valid value.
		let ident: raw::ElfIdent = unsafe { read_struct(handle, 0)? };

		if ident.magic != raw::ELF_MAGIC {
			return Err(ElfError::NotElf);
		}
		if ident.endian != 1 {
			return Err(ElfError::WrongEndianness(ident.endian));
		}
		if ident.version != 1 {
			return Err(ElfError::BadVersion);
		}

		match ident.class {
			1 => Self::parse_elf32(handle, machines),
			2 => Self::parse_elf64(handle, machines),
			class => Err(ElfError::UnsupportedClass(class)),
		}
	}

	/// The image class.
	#[must_use]
	pub fn class(&self) -> ElfClass {
		self.class
	}

	/// The image machine.
	#[must_use]
	pub fn machine(&self) -> ElfMachine {
		self.machine
	}

	/// The entry point as stored in the file.
	#[must_use]
	pub fn entry(&self) -> u64 {
		self.entry
	}

	/// The placement policy.
	#[must_use]
	pub fn placement(&self) -> Placement {
		self.placement
	}

	/// The `PT_LOAD` segments, sorted by ascending virtual address.
	#[must_use]
	pub fn segments(&self) -> &[Segment] {
		&self.segments
	}

	/// RELA table location, if the image is relocatable and has one.
	#[must_use]
	pub fn rela(&self) -> Option<RelaInfo> {
		self.rela
	}

	/// The page-aligned virtual span `[base, base + size)` covering
	/// all segments.
	#[must_use]
	pub fn virt_span(&self) -> (u64, u64) {
		let lo = align_down(self.segments.first().map_or(0, |s| s.virt), PAGE_SIZE);
		let hi = self
			.segments
			.iter()
			.map(|s| align_up(s.virt + s.mem_size, PAGE_SIZE))
			.max()
			.unwrap_or(lo);
		(lo, hi - lo)
	}

	/// The preferred physical base: the lowest requested physical
	/// address, aligned down.
	#[must_use]
	pub fn preferred_phys(&self) -> u64 {
		align_down(
			self.segments.iter().map(|s| s.phys).min().unwrap_or(0),
			PAGE_SIZE,
		)
	}

	/// The strictest segment alignment, at least one page.
	#[must_use]
	pub fn max_align(&self) -> u64 {
		self.segments
			.iter()
			.map(|s| s.align)
			.filter(|&a| a.is_power_of_two())
			.max()
			.unwrap_or(PAGE_SIZE)
			.max(PAGE_SIZE)
	}

	/// Parses the 64-bit variant, after the ident block.
	fn parse_elf64(
		handle: &mut dyn FileHandle,
		machines: &[ElfMachine],
	) -> Result<Self, ElfError> {
		// SAFETY: Plain little-endian integer record.
		let header: raw::Elf64Header = unsafe { read_struct(handle, 16)? };

		let machine = check_machine(header.machine, machines)?;
		if header.version != 1 {
			return Err(ElfError::BadVersion);
		}
		if !matches!(header.ty, raw::ET_EXEC | raw::ET_DYN) {
			return Err(ElfError::BadFileType(header.ty));
		}
		if usize::from(header.ph_entry_size) != core::mem::size_of::<raw::Elf64ProgHeader>() {
			return Err(ElfError::BadProgramHeaders);
		}

		let mut segments = Vec::new();
		let mut dynamic: Option<raw::Elf64ProgHeader> = None;
		for i in 0..header.ph_entry_count {
			let offset = header.ph_offset
				+ u64::from(i) * u64::from(header.ph_entry_size);
			// SAFETY: Plain little-endian integer record.
			let phdr: raw::Elf64ProgHeader = unsafe { read_struct(handle, offset)? };

			match phdr.ty {
				raw::PT_LOAD => segments.push(Segment {
					file_offset: phdr.offset,
					file_size:   phdr.file_size,
					virt:        phdr.virt,
					phys:        phdr.phys,
					mem_size:    phdr.mem_size,
					flags:       SegmentFlags::from_bits_truncate(phdr.flags),
					align:       phdr.align,
				}),
				raw::PT_DYNAMIC => dynamic = Some(phdr),
				_ => {}
			}
		}

		let rela = match (header.ty, dynamic) {
			(raw::ET_DYN, Some(phdr)) => parse_dynamic(handle, &phdr)?,
			_ => None,
		};

		Self::assemble(
			ElfClass::Elf64,
			machine,
			header.entry,
			if header.ty == raw::ET_DYN {
				Placement::Relocatable
			} else {
				Placement::Fixed
			},
			segments,
			rela,
		)
	}

	/// Parses the 32-bit variant, after the ident block.
	fn parse_elf32(
		handle: &mut dyn FileHandle,
		machines: &[ElfMachine],
	) -> Result<Self, ElfError> {
		// SAFETY: Plain little-endian integer record.
		let header: raw::Elf32Header = unsafe { read_struct(handle, 16)? };

		let machine = check_machine(header.machine, machines)?;
		if header.version != 1 {
			return Err(ElfError::BadVersion);
		}
		if header.ty == raw::ET_DYN {
			// 32-bit kernels are always placed where they ask to be.
			return Err(ElfError::Unrelocatable32);
		}
		if header.ty != raw::ET_EXEC {
			return Err(ElfError::BadFileType(header.ty));
		}
		if usize::from(header.ph_entry_size) != core::mem::size_of::<raw::Elf32ProgHeader>() {
			return Err(ElfError::BadProgramHeaders);
		}

		let mut segments = Vec::new();
		for i in 0..header.ph_entry_count {
			let offset = u64::from(header.ph_offset)
				+ u64::from(i) * u64::from(header.ph_entry_size);
			// SAFETY: Plain little-endian integer record.
			let phdr: raw::Elf32ProgHeader = unsafe { read_struct(handle, offset)? };

			if phdr.ty == raw::PT_LOAD {
				segments.push(Segment {
					file_offset: u64::from(phdr.offset),
					file_size:   u64::from(phdr.file_size),
					virt:        u64::from(phdr.virt),
					phys:        u64::from(phdr.phys),
					mem_size:    u64::from(phdr.mem_size),
					flags:       SegmentFlags::from_bits_truncate(phdr.flags),
					align:       u64::from(phdr.align),
				});
			}
		}

		Self::assemble(
			ElfClass::Elf32,
			machine,
			u64::from(header.entry),
			Placement::Fixed,
			segments,
			None,
		)
	}

	/// Validates the collected segments and builds the description.
	fn assemble(
		class: ElfClass,
		machine: ElfMachine,
		entry: u64,
		placement: Placement,
		mut segments: Vec<Segment>,
		rela: Option<RelaInfo>,
	) -> Result<Self, ElfError> {
		if segments.is_empty() {
			return Err(ElfError::NoSegments);
		}

		segments.sort_unstable_by_key(|s| s.virt);
		for pair in segments.windows(2) {
			if pair[0].virt + pair[0].mem_size > pair[1].virt {
				return Err(ElfError::OverlappingSegments);
			}
		}
		for segment in &segments {
			if segment.file_size > segment.mem_size {
				return Err(ElfError::BadProgramHeaders);
			}
		}

		// The kernel is entered at this address; it must be backed by
		// executable bytes.
		if !segments.iter().any(|s| {
			s.flags.contains(SegmentFlags::EXEC)
				&& entry >= s.virt
				&& entry < s.virt + s.mem_size
		}) {
			return Err(ElfError::EntryOutsideImage);
		}

		Ok(Self {
			class,
			machine,
			entry,
			placement,
			segments,
			rela,
		})
	}
}

/// Validates the machine field against the acceptable set.
fn check_machine(machine: u16, machines: &[ElfMachine]) -> Result<ElfMachine, ElfError> {
	machines
		.iter()
		.copied()
		.find(|&m| m as u16 == machine)
		.ok_or(ElfError::WrongMachine(machine))
}

/// Extracts the RELA table location from a `PT_DYNAMIC` segment.
fn parse_dynamic(
	handle: &mut dyn FileHandle,
	phdr: &raw::Elf64ProgHeader,
) -> Result<Option<RelaInfo>, ElfError> {
	let entry_count = phdr.file_size / core::mem::size_of::<raw::Elf64Dyn>() as u64;

	let mut offset = None;
	let mut size = None;
	let mut entry_size = None;
	for i in 0..entry_count {
		let at = phdr.offset + i * core::mem::size_of::<raw::Elf64Dyn>() as u64;
		// SAFETY: Plain little-endian integer record.
		let entry: raw::Elf64Dyn = unsafe { read_struct(handle, at)? };

		match entry.tag {
			raw::DT_NULL => break,
			raw::DT_RELA => offset = Some(entry.val),
			raw::DT_RELASZ => size = Some(entry.val),
			raw::DT_RELAENT => entry_size = Some(entry.val),
			_ => {}
		}
	}

	match (offset, size) {
		(Some(offset), Some(size)) => {
			let entry_size = entry_size.unwrap_or(core::mem::size_of::<raw::Elf64Rela>() as u64);
			if entry_size != core::mem::size_of::<raw::Elf64Rela>() as u64 {
				return Err(ElfError::BadProgramHeaders);
			}
			Ok(Some(RelaInfo {
				offset,
				size,
				entry_size,
			}))
		}
		_ => Ok(None),
	}
}

/// Reads one `T` from `handle` at byte `offset`.
///
/// # Safety
/// `T` must be a plain integer record for which any bit pattern is a
/// valid value.
unsafe fn read_struct<T>(handle: &mut dyn FileHandle, offset: u64) -> Result<T, Status> {
	let mut value = MaybeUninit::<T>::uninit();
	// SAFETY: The buffer spans exactly the `T` being initialised.
	let buf = unsafe {
		core::slice::from_raw_parts_mut(
			value.as_mut_ptr().cast::<u8>(),
			core::mem::size_of::<T>(),
		)
	};
	handle.read_at(buf, offset)?;
	// SAFETY: Fully written by `read_at`; any bit pattern is valid
	// SAFETY: per this function's contract.
	Ok(unsafe { value.assume_init() })
}
