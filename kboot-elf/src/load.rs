//! Image loading: physical backing, segment copy, mapping and
//! relocation.

use alloc::vec::Vec;

use kboot_debug::dbg;
use kboot_io::FileHandle;
use kboot_mem::{
	align_down, align_up,
	mapper::{MapError, MapFlags},
	phys::{AllocFlags, PhysicalMemory, RangeType},
	translate::PhysicalAddressTranslator,
	vmem::VirtualAllocator,
	PAGE_SIZE,
};

use crate::{raw, ElfError, ElfImage, ElfMachine, Placement, Segment, SegmentFlags};

/// The mapping surface the loader drives.
///
/// Implemented by thin adapters over the architecture MMU contexts;
/// the image loader itself stays architecture-agnostic. The physical
/// memory manager is threaded through so the mapper can allocate
/// intermediate table pages.
pub trait SegmentMapper<T: PhysicalAddressTranslator> {
	/// Maps `[virt, virt + size)` onto `[phys, phys + size)`.
	fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError>;
}

/// One mapped segment of a loaded image, for the boot information
/// stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedSegment {
	/// Target virtual address.
	pub virt:  u64,
	/// Size in memory.
	pub size:  u64,
	/// ELF permission flags.
	pub flags: SegmentFlags,
}

/// The result of loading an image.
#[derive(Debug)]
pub struct LoadedImage {
	/// The entry point, displaced by the slide for relocatable
	/// images.
	pub entry:     u64,
	/// The chosen physical base of the contiguous backing range.
	pub phys_base: u64,
	/// The page-aligned virtual base of the image span.
	pub virt_base: u64,
	/// The page-aligned size of the image span.
	pub virt_size: u64,
	/// `chosen base − preferred base`; zero for fixed images.
	pub slide:     u64,
	/// The loaded segments.
	pub segments:  Vec<LoadedSegment>,
}

/// Loads a parsed image: secures physical backing, copies segment
/// contents, zero-fills BSS tails, maps the span and applies
/// relocations.
///
/// The image's virtual span is recorded in `vmem`, which must cover
/// it.
pub fn load<T: PhysicalAddressTranslator>(
	image: &ElfImage,
	handle: &mut dyn FileHandle,
	pmm: &mut PhysicalMemory<T>,
	vmem: &mut VirtualAllocator,
	mapper: &mut dyn SegmentMapper<T>,
) -> Result<LoadedImage, ElfError> {
	let (virt_base, virt_size) = image.virt_span();
	if virt_size == 0 {
		return Err(ElfError::NoSegments);
	}
	let translator = pmm.translator().clone();

	// Secure the contiguous physical backing.
	let phys_base = match image.placement() {
		Placement::Fixed => {
			let base = image.preferred_phys();
			for segment in image.segments() {
				// A fixed image demands its physical layout exactly;
				// the backing is one contiguous range, so the file's
				// phys/virt offsets must agree.
				if segment.phys != base + (segment.virt - virt_base) {
					return Err(ElfError::BadProgramHeaders);
				}
			}

			pmm.alloc(
				virt_size,
				0,
				base,
				base + virt_size,
				RangeType::Allocated,
				AllocFlags::empty(),
			)
			.map_err(|_| ElfError::NoPhysicalSpace)?
			.phys
		}
		Placement::Relocatable => {
			pmm.alloc(
				virt_size,
				image.max_align(),
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::HIGH,
			)
			.map_err(|_| ElfError::NoPhysicalSpace)?
			.phys
		}
	};

	let slide = match image.placement() {
		Placement::Fixed => 0,
		Placement::Relocatable => phys_base.wrapping_sub(image.preferred_phys()),
	};

	vmem.insert(virt_base, virt_size, Some(phys_base));

	// Copy file contents and zero the BSS tails.
	for segment in image.segments() {
		copy_segment(&translator, handle, segment, phys_base, virt_base)?;
	}

	// Map the span, segment permissions per segment. Segments are
	// sorted; the watermark keeps shared boundary pages from being
	// mapped twice.
	let mut segments = Vec::with_capacity(image.segments().len());
	let mut mapped_until = virt_base;
	for segment in image.segments() {
		let start = align_down(segment.virt, PAGE_SIZE).max(mapped_until);
		let end = align_up(segment.virt + segment.mem_size, PAGE_SIZE);
		if end > start {
			let mut flags = MapFlags::empty();
			if segment.flags.contains(SegmentFlags::WRITE) {
				flags |= MapFlags::WRITE;
			}
			if segment.flags.contains(SegmentFlags::EXEC) {
				flags |= MapFlags::EXEC;
			}

			mapper
				.map(pmm, start, phys_base + (start - virt_base), end - start, flags)
				.map_err(|err| {
					match err {
						MapError::OutOfMemory => ElfError::NoPhysicalSpace,
						_ => ElfError::BadProgramHeaders,
					}
				})?;
			mapped_until = end;
		}

		segments.push(LoadedSegment {
			virt:  segment.virt,
			size:  segment.mem_size,
			flags: segment.flags,
		});
	}

	// Apply relocations.
	if image.placement() == Placement::Relocatable {
		if let Some(rela) = image.rela() {
			apply_relocations(image, &translator, phys_base, virt_size, slide, &rela)?;
		}
	}

	let entry = image.entry().wrapping_add(slide);
	dbg!(
		"elf: loaded image at phys {:#x} (virt {:#x}, {:#x} bytes, slide {:#x}), entry {:#x}",
		phys_base,
		virt_base,
		virt_size,
		slide,
		entry
	);

	Ok(LoadedImage {
		entry,
		phys_base,
		virt_base,
		virt_size,
		slide,
		segments,
	})
}

/// Copies one segment's file bytes into the backing range and zeroes
/// the BSS tail.
fn copy_segment<T: PhysicalAddressTranslator>(
	translator: &T,
	handle: &mut dyn FileHandle,
	segment: &Segment,
	phys_base: u64,
	virt_base: u64,
) -> Result<(), ElfError> {
	let dest_phys = phys_base + (segment.virt - virt_base);

	if segment.file_size > 0 {
		// SAFETY: The destination lies within the freshly allocated
		// SAFETY: backing range, which the loader exclusively owns.
		let dest = unsafe {
			core::slice::from_raw_parts_mut(
				translator.to_ptr::<u8>(dest_phys),
				segment.file_size as usize,
			)
		};
		handle.read_at(dest, segment.file_offset)?;
	}

	let tail = segment.mem_size - segment.file_size;
	if tail > 0 {
		// SAFETY: As above; the tail is within the backing range.
		unsafe {
			core::ptr::write_bytes(
				translator.to_ptr::<u8>(dest_phys + segment.file_size),
				0,
				tail as usize,
			);
		}
	}

	Ok(())
}

/// Applies the RELA table of a relocatable image.
///
/// Only the relative relocation of the image's machine is accepted;
/// anything else in a relocatable kernel means the loader would hand
/// over a corrupt image, which is fatal.
fn apply_relocations<T: PhysicalAddressTranslator>(
	image: &ElfImage,
	translator: &T,
	phys_base: u64,
	virt_size: u64,
	slide: u64,
	rela: &crate::RelaInfo,
) -> Result<(), ElfError> {
	let relative_type = match image.machine() {
		ElfMachine::X86_64 => raw::R_X86_64_RELATIVE,
		ElfMachine::Aarch64 => raw::R_AARCH64_RELATIVE,
		ElfMachine::X86 => return Err(ElfError::Unrelocatable32),
	};

	if rela.offset + rela.size > virt_size {
		return Err(ElfError::BadProgramHeaders);
	}

	let count = rela.size / rela.entry_size;
	for i in 0..count {
		let at = phys_base + rela.offset + i * rela.entry_size;
		// SAFETY: Bounds-checked against the loaded span above; the
		// SAFETY: record is a plain integer struct.
		let entry = unsafe { translator.to_ptr::<raw::Elf64Rela>(at).read_unaligned() };

		if entry.ty() != relative_type {
			return Err(ElfError::UnsupportedRelocation(entry.ty()));
		}
		if entry.offset + 8 > virt_size {
			return Err(ElfError::BadProgramHeaders);
		}

		let value = slide.wrapping_add(entry.addend as u64);
		// SAFETY: Bounds-checked against the loaded span above.
		unsafe {
			translator
				.to_ptr::<u64>(phys_base + entry.offset)
				.write_unaligned(value);
		}
	}

	dbg!("elf: applied {} relative relocations", count);

	Ok(())
}

#[cfg(test)]
mod tests {
	use kboot_io::{DirEntry, Status};
	use kboot_mem::translate::OffsetTranslator;

	use super::*;
	use crate::ElfClass;

	/// A file handle over an in-memory byte image.
	struct MemFile {
		data: Vec<u8>,
	}

	impl FileHandle for MemFile {
		fn size(&self) -> u64 {
			self.data.len() as u64
		}

		fn is_directory(&self) -> bool {
			false
		}

		fn read_at(&mut self, buf: &mut [u8], offset: u64) -> kboot_io::Result<()> {
			let start = offset as usize;
			let end = start + buf.len();
			if end > self.data.len() {
				return Err(Status::EndOfFile);
			}
			buf.copy_from_slice(&self.data[start..end]);
			Ok(())
		}

		fn iterate(&mut self, _callback: &mut dyn FnMut(&DirEntry)) -> kboot_io::Result<()> {
			Err(Status::NotSupported)
		}
	}

	/// Records every mapping request.
	#[derive(Default)]
	struct RecordingMapper {
		maps: Vec<(u64, u64, u64, MapFlags)>,
	}

	impl SegmentMapper<OffsetTranslator> for RecordingMapper {
		fn map(
			&mut self,
			_pmm: &mut PhysicalMemory<OffsetTranslator>,
			virt: u64,
			phys: u64,
			size: u64,
			flags: MapFlags,
		) -> Result<(), MapError> {
			self.maps.push((virt, phys, size, flags));
			Ok(())
		}
	}

	/// Fake physical window backed by real host memory.
	fn arena_pmm(len: usize, fake_base: u64) -> PhysicalMemory<OffsetTranslator> {
		let layout = std::alloc::Layout::from_size_align(len, 4096).unwrap();
		// SAFETY: Valid, non-zero layout; intentionally leaked.
		let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
		assert!(!ptr.is_null());

		let mut pmm = PhysicalMemory::new(OffsetTranslator::new(
			(ptr as u64).wrapping_sub(fake_base),
		));
		pmm.add_range(fake_base, len as u64, RangeType::Free);
		pmm
	}

	fn bytes_of<T>(value: &T) -> &[u8] {
		// SAFETY: Test-only view of plain integer structs.
		unsafe {
			core::slice::from_raw_parts(
				core::ptr::from_ref(value).cast::<u8>(),
				core::mem::size_of::<T>(),
			)
		}
	}

	const IDENT64: [u8; 16] = [0x7F, b'E', b'L', b'F', 2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0];

	fn build_elf64(
		ty: u16,
		machine: u16,
		entry: u64,
		phdrs: &[raw::Elf64ProgHeader],
		file_len: usize,
		fills: &[(usize, &[u8])],
	) -> Vec<u8> {
		let header = raw::Elf64Header {
			ty,
			machine,
			version: 1,
			entry,
			ph_offset: 64,
			sh_offset: 0,
			flags: 0,
			header_size: 64,
			ph_entry_size: 56,
			ph_entry_count: phdrs.len() as u16,
			sh_entry_size: 0,
			sh_entry_count: 0,
			sh_str_index: 0,
		};

		let mut file = vec![0_u8; file_len];
		file[..16].copy_from_slice(&IDENT64);
		file[16..64].copy_from_slice(bytes_of(&header));
		for (i, phdr) in phdrs.iter().enumerate() {
			let at = 64 + i * 56;
			file[at..at + 56].copy_from_slice(bytes_of(phdr));
		}
		for (at, bytes) in fills {
			file[*at..*at + bytes.len()].copy_from_slice(bytes);
		}
		file
	}

	fn load_phdr(
		offset: u64,
		virt: u64,
		phys: u64,
		file_size: u64,
		mem_size: u64,
		flags: u32,
	) -> raw::Elf64ProgHeader {
		raw::Elf64ProgHeader {
			ty: raw::PT_LOAD,
			flags,
			offset,
			virt,
			phys,
			file_size,
			mem_size,
			align: 0x1000,
		}
	}

	#[test]
	fn rejects_non_elf() {
		let mut file = MemFile {
			data: vec![0_u8; 128],
		};
		assert_eq!(
			ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap_err(),
			ElfError::NotElf
		);
	}

	#[test]
	fn rejects_big_endian() {
		let mut data = build_elf64(
			raw::ET_EXEC,
			ElfMachine::X86_64 as u16,
			0,
			&[load_phdr(0x1000, 0x1000, 0x1000, 0x10, 0x10, 4)],
			0x2000,
			&[],
		);
		data[5] = 2;
		let mut file = MemFile { data };
		assert_eq!(
			ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap_err(),
			ElfError::WrongEndianness(2)
		);
	}

	#[test]
	fn rejects_wrong_machine() {
		let data = build_elf64(
			raw::ET_EXEC,
			ElfMachine::Aarch64 as u16,
			0,
			&[load_phdr(0x1000, 0x1000, 0x1000, 0x10, 0x10, 4)],
			0x2000,
			&[],
		);
		let mut file = MemFile { data };
		assert_eq!(
			ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap_err(),
			ElfError::WrongMachine(0xB7)
		);
	}

	#[test]
	fn rejects_overlapping_segments() {
		let data = build_elf64(
			raw::ET_EXEC,
			ElfMachine::X86_64 as u16,
			0,
			&[
				load_phdr(0x1000, 0x1000, 0x1000, 0x1000, 0x2000, 4),
				load_phdr(0x2000, 0x2000, 0x2000, 0x1000, 0x1000, 4),
			],
			0x4000,
			&[],
		);
		let mut file = MemFile { data };
		assert_eq!(
			ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap_err(),
			ElfError::OverlappingSegments
		);
	}

	#[test]
	fn fixed_image_loads_at_demanded_range() {
		let text = *b"kernel text here";
		let data_bytes = *b"data";
		let data = build_elf64(
			raw::ET_EXEC,
			ElfMachine::X86_64 as u16,
			0xFFFF_FFFF_8000_0010,
			&[
				load_phdr(0x1000, 0xFFFF_FFFF_8000_0000, 0x14_0000, 0x1000, 0x1000, 4 | 1),
				load_phdr(0x2000, 0xFFFF_FFFF_8000_1000, 0x14_1000, 0x200, 0x800, 4 | 2),
			],
			0x3000,
			&[(0x1000, &text), (0x2000, &data_bytes)],
		);
		let mut file = MemFile { data };

		let image = ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap();
		assert_eq!(image.class(), ElfClass::Elf64);
		assert_eq!(image.placement(), Placement::Fixed);

		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let translator = pmm.translator().clone();
		let mut vmem = VirtualAllocator::new(0xFFFF_FFFF_8000_0000, 0x8000_0000);
		let mut mapper = RecordingMapper::default();

		let loaded = load(&image, &mut file, &mut pmm, &mut vmem, &mut mapper).unwrap();
		assert_eq!(loaded.phys_base, 0x14_0000);
		assert_eq!(loaded.slide, 0);
		assert_eq!(loaded.entry, 0xFFFF_FFFF_8000_0010);
		assert_eq!(loaded.virt_size, 0x2000);

		// Backing recorded as Allocated.
		assert!(pmm
			.ranges()
			.iter()
			.any(|r| r.start == 0x14_0000 && r.size == 0x2000 && r.ty == RangeType::Allocated));

		// Contents copied; BSS tail zeroed.
		let mut copied = [0_u8; 16];
		// SAFETY: Test arena memory.
		unsafe {
			core::ptr::copy_nonoverlapping(
				translator.to_ptr::<u8>(0x14_0000),
				copied.as_mut_ptr(),
				16,
			);
		}
		assert_eq!(&copied, &text);
		// SAFETY: Test arena memory.
		let tail = unsafe { translator.to_ptr::<u8>(0x14_1000 + 0x200).read() };
		assert_eq!(tail, 0);

		// Per-segment mappings with per-segment permissions.
		assert_eq!(mapper.maps, vec![
			(
				0xFFFF_FFFF_8000_0000,
				0x14_0000,
				0x1000,
				MapFlags::EXEC
			),
			(
				0xFFFF_FFFF_8000_1000,
				0x14_1000,
				0x1000,
				MapFlags::WRITE
			),
		]);
	}

	#[test]
	fn fixed_image_conflict_is_fatal() {
		let data = build_elf64(
			raw::ET_EXEC,
			ElfMachine::X86_64 as u16,
			0xFFFF_FFFF_8000_0000,
			&[load_phdr(0x1000, 0xFFFF_FFFF_8000_0000, 0x14_0000, 0x1000, 0x1000, 4 | 1)],
			0x2000,
			&[],
		);
		let mut file = MemFile { data };
		let image = ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap();

		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		pmm.protect(0x14_0000, 0x1000);
		let mut vmem = VirtualAllocator::new(0xFFFF_FFFF_8000_0000, 0x8000_0000);
		let mut mapper = RecordingMapper::default();

		assert_eq!(
			load(&image, &mut file, &mut pmm, &mut vmem, &mut mapper).unwrap_err(),
			ElfError::NoPhysicalSpace
		);
	}

	#[test]
	fn relocatable_image_applies_relative_rela() {
		let rela = raw::Elf64Rela {
			offset: 0x800,
			info:   u64::from(raw::R_X86_64_RELATIVE),
			addend: 0x100,
		};
		let dynamic: [raw::Elf64Dyn; 4] = [
			raw::Elf64Dyn {
				tag: raw::DT_RELA,
				val: 0x900,
			},
			raw::Elf64Dyn {
				tag: raw::DT_RELASZ,
				val: 24,
			},
			raw::Elf64Dyn {
				tag: raw::DT_RELAENT,
				val: 24,
			},
			raw::Elf64Dyn {
				tag: raw::DT_NULL,
				val: 0,
			},
		];
		let mut dyn_bytes = Vec::new();
		for entry in &dynamic {
			dyn_bytes.extend_from_slice(bytes_of(entry));
		}

		let mut phdrs = vec![load_phdr(
			0x1000,
			0xFFFF_FFFF_8000_0000,
			0,
			0x1000,
			0x2000,
			4 | 2 | 1,
		)];
		phdrs.push(raw::Elf64ProgHeader {
			ty: raw::PT_DYNAMIC,
			flags: 4,
			offset: 0x3000,
			virt: 0,
			phys: 0,
			file_size: 64,
			mem_size: 64,
			align: 8,
		});

		let data = build_elf64(
			raw::ET_DYN,
			ElfMachine::X86_64 as u16,
			0xFFFF_FFFF_8000_0040,
			&phdrs,
			0x3100,
			&[(0x1900, bytes_of(&rela)), (0x3000, &dyn_bytes)],
		);
		let mut file = MemFile { data };

		let image = ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap();
		assert_eq!(image.placement(), Placement::Relocatable);
		assert_eq!(
			image.rela(),
			Some(crate::RelaInfo {
				offset:     0x900,
				size:       24,
				entry_size: 24,
			})
		);

		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let translator = pmm.translator().clone();
		// Dirty the arena so the BSS-zero path is actually observable.
		// SAFETY: Test arena memory, nothing allocated yet.
		unsafe {
			core::ptr::write_bytes(translator.to_ptr::<u8>(0x10_0000), 0xDD, 1024 * 1024);
		}

		let mut vmem = VirtualAllocator::new(0xFFFF_FFFF_8000_0000, 0x8000_0000);
		let mut mapper = RecordingMapper::default();
		let loaded = load(&image, &mut file, &mut pmm, &mut vmem, &mut mapper).unwrap();

		// Highest fit in the fake window.
		let base = 0x20_0000 - 0x2000;
		assert_eq!(loaded.phys_base, base);
		assert_eq!(loaded.slide, base);
		assert_eq!(loaded.entry, 0xFFFF_FFFF_8000_0040 + base);

		// The relocated field reads back `base + addend`.
		// SAFETY: Test arena memory.
		let value = unsafe { translator.to_ptr::<u64>(base + 0x800).read_unaligned() };
		assert_eq!(value, base + 0x100);

		// BSS tail was zeroed over the dirtied arena.
		// SAFETY: Test arena memory.
		let tail = unsafe { translator.to_ptr::<u8>(base + 0x1FFF).read() };
		assert_eq!(tail, 0);
	}

	#[test]
	fn unknown_relocation_type_is_fatal() {
		let rela = raw::Elf64Rela {
			offset: 0x800,
			info:   5,
			addend: 0,
		};
		let dynamic: [raw::Elf64Dyn; 3] = [
			raw::Elf64Dyn {
				tag: raw::DT_RELA,
				val: 0x900,
			},
			raw::Elf64Dyn {
				tag: raw::DT_RELASZ,
				val: 24,
			},
			raw::Elf64Dyn {
				tag: raw::DT_NULL,
				val: 0,
			},
		];
		let mut dyn_bytes = Vec::new();
		for entry in &dynamic {
			dyn_bytes.extend_from_slice(bytes_of(entry));
		}

		let phdrs = [
			load_phdr(0x1000, 0xFFFF_FFFF_8000_0000, 0, 0x1000, 0x2000, 4 | 1),
			raw::Elf64ProgHeader {
				ty: raw::PT_DYNAMIC,
				flags: 4,
				offset: 0x3000,
				virt: 0,
				phys: 0,
				file_size: 48,
				mem_size: 48,
				align: 8,
			},
		];
		let data = build_elf64(
			raw::ET_DYN,
			ElfMachine::X86_64 as u16,
			0xFFFF_FFFF_8000_0000,
			&phdrs,
			0x3100,
			&[(0x1900, bytes_of(&rela)), (0x3000, &dyn_bytes)],
		);
		let mut file = MemFile { data };
		let image = ElfImage::parse(&mut file, &[ElfMachine::X86_64]).unwrap();

		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut vmem = VirtualAllocator::new(0xFFFF_FFFF_8000_0000, 0x8000_0000);
		let mut mapper = RecordingMapper::default();

		assert_eq!(
			load(&image, &mut file, &mut pmm, &mut vmem, &mut mapper).unwrap_err(),
			ElfError::UnsupportedRelocation(5)
		);
	}
}
