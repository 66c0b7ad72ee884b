//! The typed tag stream builder.

use alloc::vec::Vec;

use crate::{
	BootDeviceKind, CoreTag, EfiSystemTableTag, MemoryTag, MemoryTagType, PageTablesTag,
	SerialTag, TagHeader, TagType, VideoTag,
};

/// Byte offset of the `tags_virt` field within the stream (right
/// after the core tag's header).
const CORE_TAGS_VIRT_OFFSET: usize = 8;
/// Byte offset of the `tags_size` field within the stream.
const CORE_TAGS_SIZE_OFFSET: usize = 16;

/// Builds a tag stream.
///
/// The first appended tag must be the core tag; the builder patches
/// its `tags_virt`/`tags_size` fields at [`TagListBuilder::finish`]
/// time, once the final size and mapping address are known. All
/// padding and size bookkeeping happens here; callers only append.
pub struct TagListBuilder {
	/// The stream bytes.
	buf: Vec<u8>,
}

impl TagListBuilder {
	/// Creates a builder, appending the core tag.
	///
	/// `core.tags_virt` and `core.tags_size` may be left zero; they
	/// are patched in [`Self::finish`].
	#[must_use]
	pub fn new(core: &CoreTag) -> Self {
		let mut this = Self { buf: Vec::new() };
		this.append(TagType::Core, bytes_of(core), &[]);
		this
	}

	/// The current stream size in bytes, including the terminator
	/// yet to be written.
	#[must_use]
	pub fn projected_size(&self) -> usize {
		align8(self.buf.len()) + core::mem::size_of::<TagHeader>()
	}

	/// Appends one kernel-visible memory range.
	pub fn push_memory(&mut self, start: u64, size: u64, ty: MemoryTagType) {
		self.append(
			TagType::Memory,
			bytes_of(&MemoryTag {
				start,
				size,
				ty: ty as u8,
				_reserved: [0; 7],
			}),
			&[],
		);
	}

	/// Appends the translation-table description.
	pub fn push_page_tables(&mut self, tag: &PageTablesTag) {
		self.append(TagType::PageTables, bytes_of(tag), &[]);
	}

	/// Appends one loaded module: its physical range and its name.
	pub fn push_module(&mut self, phys: u64, size: u64, name: &str) {
		let fixed: [u64; 2] = [phys, size];
		let name_len = name.len() as u32;
		let mut head = [0_u8; 24];
		head[..16].copy_from_slice(bytes_of(&fixed));
		head[16..20].copy_from_slice(&name_len.to_le_bytes());
		self.append(TagType::Module, &head, name.as_bytes());
	}

	/// Appends the boot device description.
	pub fn push_boot_device(&mut self, kind: BootDeviceKind, name: &str) {
		let mut head = [0_u8; 8];
		head[..4].copy_from_slice(&(kind as u32).to_le_bytes());
		head[4..8].copy_from_slice(&(name.len() as u32).to_le_bytes());
		self.append(TagType::BootDevice, &head, name.as_bytes());
	}

	/// Appends one echoed-back image option.
	pub fn push_option(&mut self, name: &str, value: &str) {
		let mut head = [0_u8; 8];
		head[..4].copy_from_slice(&(name.len() as u32).to_le_bytes());
		head[4..8].copy_from_slice(&(value.len() as u32).to_le_bytes());
		// Name and value are concatenated; the kernel splits on the
		// recorded lengths.
		let mut tail = Vec::with_capacity(name.len() + value.len());
		tail.extend_from_slice(name.as_bytes());
		tail.extend_from_slice(value.as_bytes());
		self.append(TagType::Option, &head, &tail);
	}

	/// Appends the video mode.
	pub fn push_video(&mut self, tag: &VideoTag) {
		self.append(TagType::Video, bytes_of(tag), &[]);
	}

	/// Appends the serial console description.
	pub fn push_serial(&mut self, tag: &SerialTag) {
		self.append(TagType::Serial, bytes_of(tag), &[]);
	}

	/// Appends the EFI system table pointer.
	pub fn push_efi_system_table(&mut self, table_phys: u64) {
		self.append(
			TagType::EfiSystemTable,
			bytes_of(&EfiSystemTableTag { table_phys }),
			&[],
		);
	}

	/// Appends the boot log contents.
	pub fn push_log(&mut self, log: &[u8]) {
		let mut head = [0_u8; 8];
		head[..4].copy_from_slice(&(log.len() as u32).to_le_bytes());
		self.append(TagType::Log, &head, log);
	}

	/// Appends the raw BIOS E820 map.
	pub fn push_bios_e820(&mut self, entry_count: u32, raw: &[u8]) {
		let mut head = [0_u8; 8];
		head[..4].copy_from_slice(&entry_count.to_le_bytes());
		self.append(TagType::BiosE820, &head, raw);
	}

	/// Terminates the stream and patches the core tag with the final
	/// size and the virtual address the stream will be mapped at.
	#[must_use]
	pub fn finish(mut self, tags_virt: u64) -> Vec<u8> {
		self.append(TagType::None, &[], &[]);

		let total = self.buf.len() as u32;
		self.buf[CORE_TAGS_VIRT_OFFSET..CORE_TAGS_VIRT_OFFSET + 8]
			.copy_from_slice(&tags_virt.to_le_bytes());
		self.buf[CORE_TAGS_SIZE_OFFSET..CORE_TAGS_SIZE_OFFSET + 4]
			.copy_from_slice(&total.to_le_bytes());

		self.buf
	}

	/// Appends one record: alignment padding, header, payload,
	/// trailer.
	fn append(&mut self, ty: TagType, payload: &[u8], trailer: &[u8]) {
		self.buf.resize(align8(self.buf.len()), 0);

		let size = (core::mem::size_of::<TagHeader>() + payload.len() + trailer.len()) as u32;
		self.buf.extend_from_slice(&(ty as u32).to_le_bytes());
		self.buf.extend_from_slice(&size.to_le_bytes());
		self.buf.extend_from_slice(payload);
		self.buf.extend_from_slice(trailer);
	}
}

/// Rounds `len` up to the next multiple of 8.
fn align8(len: usize) -> usize {
	(len + 7) & !7
}

/// A plain-struct byte view.
fn bytes_of<T>(value: &T) -> &[u8] {
	// SAFETY: Only used with `repr(C)` integer structs that have no
	// SAFETY: padding (layouts are asserted next to the types).
	unsafe {
		core::slice::from_raw_parts(
			core::ptr::from_ref(value).cast::<u8>(),
			core::mem::size_of::<T>(),
		)
	}
}
