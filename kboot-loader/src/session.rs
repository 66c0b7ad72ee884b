//! The load session: the top-level sequence from configuration to
//! handoff.
//!
//! A session is strictly one-way:
//!
//! ```text
//! Unconfigured → Parsed → LoaderSelected → Loaded → Finalised → Entered
//! ```
//!
//! Moving backwards is unrepresentable; transitions out of order trip
//! assertions. Finalisation consumes the physical memory manager, so
//! post-finalise allocation is a compile error rather than a runtime
//! bug.

use alloc::{boxed::Box, format, string::String, string::ToString, vec::Vec};
use core::fmt;

use kboot_config::{parse_str, Environment, ExecError, ParseError, Value};
use kboot_debug::{copy_log_ring, dbg, dbg_err, log_ring_len};
use kboot_elf::{load as elf_load, ElfImage, ElfMachine};
use kboot_io::{FileHandle, Filesystem, Status};
use kboot_mem::{
	align_up,
	mapper::{MapError, MapFlags},
	phys::{AllocFlags, MemoryRange, PhysicalMemory, RangeType},
	translate::PhysicalAddressTranslator,
	vmem::VirtualAllocator,
	PAGE_SIZE,
};
use kboot_protocol::{
	BootDeviceKind, CoreTag, MemoryTagType, PageTablesTag, SerialTag, TagListBuilder, VideoTag,
};

use crate::{
	commands::{ConfigCtx, ConfigSource},
	loader::Loader,
	mmu::{BootMmu, MmuSegmentMapper},
	video::VideoMode,
};

/// Virtual-window slack above the kernel image for the stack, tag
/// stream and trampoline mappings.
const VA_SLACK: u64 = 0x40_0000;
/// Size of the physical region reserved for the tag stream.
const TAG_REGION_SIZE: u64 = 0x4000;
/// Size of the kernel's initial stack.
const STACK_SIZE: u64 = 0x4000;

/// The session states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	/// Nothing parsed yet.
	Unconfigured,
	/// Configuration executed; menu built.
	Parsed,
	/// An entry was chosen and its loader selected.
	LoaderSelected,
	/// The kernel image is materialised in memory.
	Loaded,
	/// The memory map is finalised; no further mutation is legal.
	Finalised,
	/// Control has left for the kernel. Terminal.
	Entered,
}

/// Errors surfaced by the session.
#[derive(Debug, PartialEq)]
pub enum SessionError {
	/// The configuration file failed to parse.
	Parse(ParseError),
	/// A configuration command failed.
	Exec(ExecError),
	/// An I/O-bearing operation failed.
	Status(Status),
	/// The chosen entry selected no loader.
	NoLoader,
}

impl From<ParseError> for SessionError {
	fn from(err: ParseError) -> Self {
		Self::Parse(err)
	}
}

impl From<ExecError> for SessionError {
	fn from(err: ExecError) -> Self {
		Self::Exec(err)
	}
}

impl From<Status> for SessionError {
	fn from(status: Status) -> Self {
		Self::Status(status)
	}
}

impl fmt::Display for SessionError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Parse(err) => write!(f, "config parse error: {err}"),
			Self::Exec(err) => write!(f, "config error: {err}"),
			Self::Status(status) => write!(f, "{status}"),
			Self::NoLoader => f.write_str("no loader selected"),
		}
	}
}

/// One module to load, by name and open handle.
pub struct ModuleSource<'a> {
	/// The name recorded in the module tag.
	pub name:   String,
	/// The open file.
	pub handle: &'a mut dyn FileHandle,
}

/// What the platform layer knows and the handoff must carry.
pub struct PlatformInfo<'a> {
	/// The transport the kernel was loaded over.
	pub boot_device_kind: BootDeviceKind,
	/// The boot device's registry name.
	pub boot_device_name: &'a str,
	/// The EFI system table, when booted via EFI.
	pub efi_system_table: Option<u64>,
	/// The serial console in use, if any.
	pub serial:           Option<SerialTag>,
	/// The raw BIOS E820 map `(entry count, bytes)`, when booted via
	/// BIOS.
	pub bios_e820:        Option<(u32, &'a [u8])>,
	/// The architecture's transfer stub machine code.
	pub trampoline_stub:  &'a [u8],
}

/// Everything the kboot load path needs besides the kernel handle.
pub struct KbootRequest<'a, 'b> {
	/// ELF machines acceptable on this architecture.
	pub machines: &'a [ElfMachine],
	/// Modules to load as contiguous physical ranges.
	pub modules:  &'a mut [ModuleSource<'b>],
	/// The requested video mode, if any.
	pub video:    Option<VideoMode>,
	/// Options echoed back through `Option` tags.
	pub options:  &'a [(String, String)],
	/// The platform handoff information.
	pub platform: &'a PlatformInfo<'a>,
}

/// The addresses the trampoline jump needs. Produced at
/// finalisation; consumed by [`LoadSession::enter`].
#[derive(Debug, Clone, Copy)]
pub struct BootPlan {
	/// Physical address of the root table.
	pub root_phys:       u64,
	/// Physical address of the upper-half root, or zero.
	pub upper_root_phys: u64,
	/// The kernel entry point.
	pub entry_virt:      u64,
	/// Physical address of the tag stream.
	pub tags_phys:       u64,
	/// Virtual address the tag stream is mapped at.
	pub tags_virt:       u64,
	/// Physical address of the trampoline page.
	pub trampoline_phys: u64,
	/// Kernel-virtual address of the trampoline page.
	pub trampoline_virt: u64,
	/// Initial stack pointer for the kernel.
	pub stack_virt:      u64,
}

/// Converts a mapping failure into a session error.
fn map_failure(err: MapError) -> SessionError {
	SessionError::Status(match err {
		MapError::OutOfMemory => Status::OutOfMemory,
		_ => Status::SystemError,
	})
}

/// The kboot load path.
///
/// Consumes the physical memory manager: loading ends in
/// finalisation, after which no further physical allocation is
/// possible. Returns the boot plan and the finalised, kernel-visible
/// memory map.
pub fn load_kboot<T, M>(
	mut pmm: PhysicalMemory<T>,
	mmu: &mut M,
	kernel: &mut dyn FileHandle,
	request: &mut KbootRequest<'_, '_>,
) -> Result<(BootPlan, Vec<MemoryRange>), SessionError>
where
	T: PhysicalAddressTranslator,
	M: BootMmu<T>,
{
	let translator = pmm.translator().clone();

	// Parse and classify the kernel image.
	let image =
		ElfImage::parse(kernel, request.machines).map_err(|err| SessionError::Status(err.into()))?;

	// The kernel's virtual window: its own span plus room for the
	// stack, tag stream and trampoline mappings.
	let (virt_base, virt_size) = image.virt_span();
	let window_size = match virt_base.checked_add(virt_size + VA_SLACK) {
		Some(_) => virt_size + VA_SLACK,
		None => u64::MAX - virt_base + 1,
	};
	let mut vmem = VirtualAllocator::new(virt_base, window_size);

	// Materialise the image.
	let loaded = {
		let mut mapper = MmuSegmentMapper { mmu: &mut *mmu };
		elf_load(&image, kernel, &mut pmm, &mut vmem, &mut mapper)
			.map_err(|err| SessionError::Status(err.into()))?
	};

	// The kernel's initial stack, with its own physical range type.
	let stack = pmm
		.alloc(STACK_SIZE, 0, 0, u64::MAX, RangeType::Stack, AllocFlags::empty())
		.map_err(|_| SessionError::Status(Status::OutOfMemory))?;
	let stack_virt_base = vmem
		.alloc(STACK_SIZE, 0)
		.ok_or(SessionError::Status(Status::OutOfMemory))?;
	vmem.set_backing(stack_virt_base, stack.phys);
	mmu.map(&mut pmm, stack_virt_base, stack.phys, STACK_SIZE, MapFlags::WRITE)
		.map_err(map_failure)?;

	// Boot modules: contiguous physical ranges, not mapped — the
	// kernel reaches them through its own physical mapping.
	let mut loaded_modules = Vec::with_capacity(request.modules.len());
	for module in request.modules.iter_mut() {
		let size = module.handle.size();
		let allocation = pmm
			.alloc(
				align_up(size.max(1), PAGE_SIZE),
				0,
				0,
				u64::MAX,
				RangeType::Modules,
				AllocFlags::empty(),
			)
			.map_err(|_| SessionError::Status(Status::OutOfMemory))?;

		if size > 0 {
			// SAFETY: The destination is the freshly allocated,
			// SAFETY: exclusively owned module range.
			let dest = unsafe {
				core::slice::from_raw_parts_mut(allocation.as_mut_ptr::<u8>(), size as usize)
			};
			module.handle.read_at(dest, 0)?;
		}

		dbg!("loaded module '{}' at {:#x} ({} bytes)", module.name, allocation.phys, size);
		loaded_modules.push((allocation.phys, size, module.name.clone()));
	}

	// Physical homes for the tag stream and the trampoline, mapped
	// into the kernel window. Both are reclaimable once the kernel
	// has consumed them.
	let tags = pmm
		.alloc(
			TAG_REGION_SIZE,
			0,
			0,
			u64::MAX,
			RangeType::Reclaimable,
			AllocFlags::empty(),
		)
		.map_err(|_| SessionError::Status(Status::OutOfMemory))?;
	let tags_virt = vmem
		.alloc(TAG_REGION_SIZE, 0)
		.ok_or(SessionError::Status(Status::OutOfMemory))?;
	vmem.set_backing(tags_virt, tags.phys);
	mmu.map(&mut pmm, tags_virt, tags.phys, TAG_REGION_SIZE, MapFlags::WRITE)
		.map_err(map_failure)?;

	let trampoline = pmm
		.alloc(
			PAGE_SIZE,
			0,
			0,
			u64::MAX,
			RangeType::Reclaimable,
			AllocFlags::empty(),
		)
		.map_err(|_| SessionError::Status(Status::OutOfMemory))?;
	let stub = request.platform.trampoline_stub;
	assert!(
		stub.len() as u64 <= PAGE_SIZE,
		"transfer stubs must fit one page"
	);
	// SAFETY: The destination is the freshly allocated trampoline
	// SAFETY: page.
	unsafe {
		core::ptr::copy_nonoverlapping(stub.as_ptr(), trampoline.as_mut_ptr::<u8>(), stub.len());
	}

	// The trampoline executes across the MMU switch, so it is mapped
	// twice: at its kernel-virtual address and 1:1 at its physical
	// address.
	let trampoline_virt = vmem
		.alloc(PAGE_SIZE, 0)
		.ok_or(SessionError::Status(Status::OutOfMemory))?;
	vmem.set_backing(trampoline_virt, trampoline.phys);
	mmu.map(
		&mut pmm,
		trampoline_virt,
		trampoline.phys,
		PAGE_SIZE,
		MapFlags::EXEC,
	)
	.map_err(map_failure)?;
	mmu.map(
		&mut pmm,
		trampoline.phys,
		trampoline.phys,
		PAGE_SIZE,
		MapFlags::EXEC,
	)
	.map_err(map_failure)?;

	// The tables are complete; no further mapping is legal.
	let (root_phys, upper_root_phys) = mmu.finish();

	// Finalise: drop loader-internal ranges, snapshot the map the
	// kernel will see. The manager is consumed; nothing below can
	// allocate.
	let final_map = pmm.finalize();

	// Build the tag stream.
	let mut builder = TagListBuilder::new(&CoreTag {
		tags_virt:   0,
		tags_size:   0,
		_reserved:   0,
		kernel_phys: loaded.phys_base,
		kernel_size: loaded.virt_size,
		entry_virt:  loaded.entry,
	});

	for (name, value) in request.options {
		builder.push_option(name, value);
	}

	for range in &final_map {
		builder.push_memory(range.start, range.size, match range.ty {
			RangeType::Free => MemoryTagType::Free,
			RangeType::Reclaimable => MemoryTagType::Reclaimable,
			RangeType::Allocated => MemoryTagType::Allocated,
			RangeType::PageTables => MemoryTagType::PageTables,
			RangeType::Stack => MemoryTagType::Stack,
			RangeType::Modules => MemoryTagType::Modules,
			RangeType::Internal => unreachable!("internal range in finalised map"),
		});
	}

	builder.push_page_tables(&PageTablesTag {
		root_phys,
		upper_root_phys,
		trampoline_virt,
	});

	for (phys, size, name) in &loaded_modules {
		builder.push_module(*phys, *size, name);
	}

	builder.push_boot_device(
		request.platform.boot_device_kind,
		request.platform.boot_device_name,
	);

	if let Some(mode) = request.video {
		builder.push_video(&VideoTag {
			width:            mode.width,
			height:           mode.height,
			bpp:              mode.bpp,
			_reserved:        0,
			framebuffer_phys: 0,
		});
	}

	// The boot log, as it stands at this moment, closes the stream.
	let mut log = alloc::vec![0_u8; log_ring_len()];
	let copied = copy_log_ring(&mut log);
	builder.push_log(&log[..copied]);

	if let Some(serial) = request.platform.serial {
		builder.push_serial(&serial);
	}
	if let Some((entry_count, raw)) = request.platform.bios_e820 {
		builder.push_bios_e820(entry_count, raw);
	}
	if let Some(table_phys) = request.platform.efi_system_table {
		builder.push_efi_system_table(table_phys);
	}

	let bytes = builder.finish(tags_virt);
	assert!(
		bytes.len() as u64 <= TAG_REGION_SIZE,
		"tag stream exceeds the reserved region"
	);
	// SAFETY: The tag region was allocated above and is exclusively
	// SAFETY: ours; writing it mutates no loader state.
	unsafe {
		core::ptr::copy_nonoverlapping(
			bytes.as_ptr(),
			translator.to_ptr::<u8>(tags.phys),
			bytes.len(),
		);
	}

	Ok((
		BootPlan {
			root_phys,
			upper_root_phys,
			entry_virt: loaded.entry,
			tags_phys: tags.phys,
			tags_virt,
			trampoline_phys: trampoline.phys,
			trampoline_virt,
			stack_virt: stack_virt_base + STACK_SIZE,
		},
		final_map,
	))
}

/// A boot session.
pub struct LoadSession<T: PhysicalAddressTranslator> {
	/// Current state.
	state:    SessionState,
	/// The physical memory manager; consumed at finalisation.
	pmm:      Option<PhysicalMemory<T>>,
	/// The configuration engine state.
	pub config: ConfigCtx,
	/// The selected menu entry; `None` when the root environment
	/// selected the loader directly.
	selected: Option<usize>,
}

impl<T: PhysicalAddressTranslator> LoadSession<T> {
	/// Creates a session over a populated physical memory manager.
	#[must_use]
	pub fn new(pmm: PhysicalMemory<T>) -> Self {
		let mut config = ConfigCtx::new();
		config.root.insert("timeout", Value::Integer(5));
		config.root.insert("hidden", Value::Boolean(false));

		Self {
			state: SessionState::Unconfigured,
			pmm: Some(pmm),
			config,
			selected: None,
		}
	}

	/// The current session state.
	#[must_use]
	pub fn state(&self) -> SessionState {
		self.state
	}

	/// Mutable access to the physical memory manager, e.g. to create
	/// the MMU context.
	///
	/// # Panics
	/// Panics after finalisation.
	pub fn pmm_mut(&mut self) -> &mut PhysicalMemory<T> {
		self.pmm.as_mut().expect("physical memory already finalised")
	}

	/// Parses and executes the configuration, building the menu.
	///
	/// # Panics
	/// Panics if configuration was already parsed.
	pub fn parse_config(
		&mut self,
		text: &str,
		source: Option<Box<dyn ConfigSource>>,
	) -> Result<(), SessionError> {
		assert!(
			self.state == SessionState::Unconfigured,
			"configuration already parsed"
		);

		self.config.source = source;
		let commands = parse_str(text)?;
		self.config.run(&commands)?;

		self.state = SessionState::Parsed;
		dbg!("config: {} menu entries", self.config.menu.entries.len());
		Ok(())
	}

	/// Selects the default entry (or the root environment's loader
	/// when the configuration declared no entries), evaluating the
	/// entry's command block.
	///
	/// Returns the selected entry index, or `None` for the root.
	///
	/// # Panics
	/// Panics unless the session is in the `Parsed` state.
	pub fn select_default(&mut self) -> Result<Option<usize>, SessionError> {
		assert!(
			self.state == SessionState::Parsed,
			"selection before configuration"
		);

		if self.config.menu.entries.is_empty() {
			if self.config.root.loader.is_none() {
				return Err(SessionError::NoLoader);
			}
			self.selected = None;
		} else {
			let index = self.config.menu.default_index();
			self.config.evaluate_entry(index)?;
			if self.config.menu.entries[index].env.loader.is_none() {
				return Err(SessionError::NoLoader);
			}
			self.selected = Some(index);
		}

		self.state = SessionState::LoaderSelected;
		Ok(self.selected)
	}

	/// The environment of the selected entry (or the root).
	#[must_use]
	pub fn selected_env(&self) -> &Environment<Loader> {
		match self.selected {
			Some(index) => &self.config.menu.entries[index].env,
			None => &self.config.root,
		}
	}

	/// Chain lookup against the selected environment, then the root.
	#[must_use]
	pub fn lookup_value(&self, name: &str) -> Option<Value> {
		if let Some(index) = self.selected {
			if let Some(value) = self.config.menu.entries[index].env.lookup(name) {
				return Some(value.clone());
			}
		}
		self.config.root.lookup(name).cloned()
	}

	/// The menu timeout in seconds, from the environment chain.
	#[must_use]
	pub fn menu_timeout(&self) -> u64 {
		match self.config.root.lookup("timeout") {
			Some(Value::Integer(seconds)) => *seconds,
			_ => 0,
		}
	}

	/// Whether the menu starts hidden, from the environment chain.
	#[must_use]
	pub fn menu_hidden(&self) -> bool {
		matches!(
			self.config.root.lookup("hidden"),
			Some(Value::Boolean(true))
		)
	}

	/// Runs the selected loader, finalising memory.
	///
	/// Only the kboot loader is implemented by the core; the other
	/// loaders report [`Status::NotSupported`].
	///
	/// # Panics
	/// Panics unless the session is in the `LoaderSelected` state.
	pub fn load<M: BootMmu<T>>(
		&mut self,
		mmu: &mut M,
		fs: &mut dyn Filesystem,
		machines: &[ElfMachine],
		platform: &PlatformInfo<'_>,
	) -> Result<(BootPlan, Vec<MemoryRange>), SessionError> {
		assert!(
			self.state == SessionState::LoaderSelected,
			"load before loader selection"
		);

		let loader = self
			.selected_loader()
			.ok_or(SessionError::NoLoader)?
			.clone();

		match loader {
			Loader::Kboot { path, modules } => {
				dbg!("loading kboot kernel '{}'", path);
				let mut kernel = fs.open(&path, None)?;

				let mut module_handles: Vec<(String, Box<dyn FileHandle>)> =
					Vec::with_capacity(modules.len());
				for module in &modules {
					module_handles.push((module.clone(), fs.open(module, None)?));
				}
				let mut module_sources: Vec<ModuleSource<'_>> = module_handles
					.iter_mut()
					.map(|(name, handle)| {
						ModuleSource {
							name:   name.clone(),
							handle: &mut **handle,
						}
					})
					.collect();

				let video = match self.lookup_value("video_mode") {
					Some(Value::String(spec)) => VideoMode::parse(&spec),
					_ => None,
				};

				// Echo the effective option set: the root bindings,
				// overridden by the selected entry's own.
				let mut options: Vec<(String, String)> = Vec::new();
				let chain = self.config.root.iter().chain(
					self.selected
						.map(|index| self.config.menu.entries[index].env.iter())
						.into_iter()
						.flatten(),
				);
				for (name, value) in chain {
					let rendered = format!("{value}");
					if let Some(slot) = options.iter_mut().find(|(n, _)| n == name) {
						slot.1 = rendered;
					} else {
						options.push((name.to_string(), rendered));
					}
				}

				self.state = SessionState::Loaded;
				let pmm = self.pmm.take().expect("physical memory already finalised");
				let mut request = KbootRequest {
					machines,
					modules: &mut module_sources,
					video,
					options: &options,
					platform,
				};

				let result = load_kboot(pmm, mmu, &mut *kernel, &mut request)?;
				self.state = SessionState::Finalised;
				Ok(result)
			}
			other => {
				dbg_err!("loader '{}' is outside the loader core", other.name());
				Err(SessionError::Status(Status::NotSupported))
			}
		}
	}

	/// The selected loader, if any.
	#[must_use]
	pub fn selected_loader(&self) -> Option<&Loader> {
		self.selected_env().loader.as_ref()
	}

	/// Enters the kernel. The point of no return.
	///
	/// # Safety
	/// The plan must be the one produced by this session's
	/// [`Self::load`]; the machine state (interrupts masked, caches
	/// as the architecture expects) must be ready for handoff.
	///
	/// # Panics
	/// Panics unless the session is in the `Finalised` state.
	#[cfg(target_arch = "x86_64")]
	pub unsafe fn enter(mut self, plan: &BootPlan) -> ! {
		assert!(
			self.state == SessionState::Finalised,
			"enter before finalisation"
		);
		self.state = SessionState::Entered;
		dbg!("entering kernel at {:#x}", plan.entry_virt);

		// SAFETY: Requirements offloaded to the caller.
		unsafe {
			kboot_arch_x86_64::xfer::transfer(
				plan.trampoline_phys,
				plan.root_phys,
				plan.stack_virt,
				kboot_protocol::BOOT_MAGIC,
				plan.tags_virt,
				plan.entry_virt,
			)
		}
	}

	/// Enters the kernel. The point of no return.
	///
	/// # Safety
	/// As the x86-64 variant; additionally DAIF exceptions must be
	/// masked.
	///
	/// # Panics
	/// Panics unless the session is in the `Finalised` state.
	#[cfg(target_arch = "aarch64")]
	pub unsafe fn enter(mut self, plan: &BootPlan) -> ! {
		assert!(
			self.state == SessionState::Finalised,
			"enter before finalisation"
		);
		self.state = SessionState::Entered;
		dbg!("entering kernel at {:#x}", plan.entry_virt);

		// SAFETY: Requirements offloaded to the caller.
		unsafe {
			kboot_arch_aarch64::xfer::transfer(
				plan.trampoline_phys,
				plan.root_phys,
				plan.upper_root_phys,
				plan.stack_virt,
				kboot_protocol::BOOT_MAGIC,
				plan.tags_virt,
				plan.entry_virt,
			)
		}
	}
}

#[cfg(test)]
mod tests {
	use kboot_arch_x86_64::{MmuContext, PagingMode};
	use kboot_io::DirEntry;
	use kboot_mem::translate::OffsetTranslator;

	use super::*;

	/// A file handle over owned bytes.
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

	/// An in-memory filesystem.
	struct MemFs {
		files: Vec<(String, Vec<u8>)>,
	}

	impl Filesystem for MemFs {
		fn label(&self) -> Option<&str> {
			Some("boot")
		}

		fn open(
			&mut self,
			path: &str,
			_from: Option<&dyn FileHandle>,
		) -> kboot_io::Result<Box<dyn FileHandle>> {
			self.files
				.iter()
				.find(|(name, _)| name == path)
				.map(|(_, data)| {
					Box::new(MemFile { data: data.clone() }) as Box<dyn FileHandle>
				})
				.ok_or(Status::NotFound)
		}
	}

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

	/// Builds a minimal fixed ELF64 kernel: one RX text segment.
	fn fixed_kernel(virt: u64, phys: u64, entry: u64) -> Vec<u8> {
		#[repr(C)]
		struct Phdr {
			ty: u32,
			flags: u32,
			offset: u64,
			virt: u64,
			phys: u64,
			file_size: u64,
			mem_size: u64,
			align: u64,
		}
		#[repr(C)]
		struct Header {
			ty: u16,
			machine: u16,
			version: u32,
			entry: u64,
			ph_offset: u64,
			sh_offset: u64,
			flags: u32,
			header_size: u16,
			ph_entry_size: u16,
			ph_entry_count: u16,
			sh_entry_size: u16,
			sh_entry_count: u16,
			sh_str_index: u16,
		}

		let header = Header {
			ty: 2,
			machine: 0x3E,
			version: 1,
			entry,
			ph_offset: 64,
			sh_offset: 0,
			flags: 0,
			header_size: 64,
			ph_entry_size: 56,
			ph_entry_count: 1,
			sh_entry_size: 0,
			sh_entry_count: 0,
			sh_str_index: 0,
		};
		let phdr = Phdr {
			ty: 1,
			flags: 4 | 1,
			offset: 0x1000,
			virt,
			phys,
			file_size: 0x1000,
			mem_size: 0x2000,
			align: 0x1000,
		};

		let mut file = vec![0_u8; 0x2000];
		file[..4].copy_from_slice(&[0x7F, b'E', b'L', b'F']);
		file[4] = 2; // ELF64
		file[5] = 1; // little-endian
		file[6] = 1; // version
		file[16..64].copy_from_slice(bytes_of(&header));
		file[64..120].copy_from_slice(bytes_of(&phdr));
		file[0x1000..0x1010].copy_from_slice(b"kernel code here");
		file
	}

	const KERNEL_VIRT: u64 = 0xFFFF_FFFF_8000_0000;
	const KERNEL_PHYS: u64 = 0x14_0000;
	const KERNEL_ENTRY: u64 = KERNEL_VIRT + 0x40;
	const FAKE_STUB: &[u8] = &[0xEB, 0xFE, 0x90, 0x90];

	const PLATFORM: PlatformInfo<'static> = PlatformInfo {
		boot_device_kind: BootDeviceKind::Disk,
		boot_device_name: "hd0",
		efi_system_table: None,
		serial:           None,
		bios_e820:        None,
		trampoline_stub:  FAKE_STUB,
	};

	fn boot_fs() -> MemFs {
		MemFs {
			files: vec![
				(
					"/kernel".to_string(),
					fixed_kernel(KERNEL_VIRT, KERNEL_PHYS, KERNEL_ENTRY),
				),
				("/mod1".to_string(), b"module-one-payload".to_vec()),
			],
		}
	}

	/// Walks a tag stream, yielding `(type, payload)`.
	fn walk_tags(bytes: &[u8]) -> Vec<(u32, Vec<u8>)> {
		let mut tags = Vec::new();
		let mut at = 0_usize;
		loop {
			assert_eq!(at % 8, 0);
			let ty = u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap());
			let size = u32::from_le_bytes(bytes[at + 4..at + 8].try_into().unwrap());
			tags.push((ty, bytes[at + 8..at + size as usize].to_vec()));
			if ty == 0 {
				return tags;
			}
			at = (at + size as usize + 7) & !7;
		}
	}

	#[test]
	fn full_session_boots_a_kboot_kernel() {
		let mut pmm = arena_pmm(8 * 1024 * 1024, 0x10_0000);
		let translator = *pmm.translator();
		let mut mmu =
			MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		let mut session = LoadSession::new(pmm);
		session
			.parse_config(
				"set \"timeout\" 3\nvideo \"1024x768x32\"\nentry \"A\" { kboot \"/kernel\" [ \
				 \"/mod1\" ] }\n",
				None,
			)
			.unwrap();
		assert_eq!(session.state(), SessionState::Parsed);

		assert_eq!(session.select_default().unwrap(), Some(0));
		assert_eq!(session.state(), SessionState::LoaderSelected);

		let mut fs = boot_fs();
		let (plan, final_map) = session
			.load(&mut mmu, &mut fs, &[ElfMachine::X86_64], &PLATFORM)
			.unwrap();
		assert_eq!(session.state(), SessionState::Finalised);

		// The kernel landed at its demanded physical range.
		assert_eq!(plan.entry_virt, KERNEL_ENTRY);
		let mut code = [0_u8; 16];
		// SAFETY: Test arena memory.
		unsafe {
			core::ptr::copy_nonoverlapping(
				translator.to_ptr::<u8>(KERNEL_PHYS),
				code.as_mut_ptr(),
				16,
			);
		}
		assert_eq!(&code, b"kernel code here");

		// The finalised map surfaces no internal ranges and accounts
		// for every family the load produced.
		assert!(final_map.iter().all(|r| r.ty != RangeType::Internal));
		for ty in [
			RangeType::Allocated,
			RangeType::Stack,
			RangeType::Modules,
			RangeType::Reclaimable,
			RangeType::PageTables,
		] {
			assert!(final_map.iter().any(|r| r.ty == ty), "missing {ty:?}");
		}

		// The trampoline page holds the stub, doubly mapped.
		let mut stub = [0_u8; 4];
		// SAFETY: Test arena memory.
		unsafe {
			core::ptr::copy_nonoverlapping(
				translator.to_ptr::<u8>(plan.trampoline_phys),
				stub.as_mut_ptr(),
				4,
			);
		}
		assert_eq!(&stub, FAKE_STUB);
		assert_eq!(
			mmu.lookup(plan.trampoline_virt),
			Some((plan.trampoline_phys, 0x1000))
		);
		assert_eq!(
			mmu.lookup(plan.trampoline_phys),
			Some((plan.trampoline_phys, 0x1000))
		);

		// The tag stream: core first, then the handoff records.
		let mut raw = vec![0_u8; 0x4000];
		// SAFETY: Test arena memory.
		unsafe {
			core::ptr::copy_nonoverlapping(
				translator.to_ptr::<u8>(plan.tags_phys),
				raw.as_mut_ptr(),
				raw.len(),
			);
		}
		let tags = walk_tags(&raw);
		assert_eq!(tags[0].0, 1, "core tag first");

		let core_tag = &tags[0].1;
		assert_eq!(
			u64::from_le_bytes(core_tag[0..8].try_into().unwrap()),
			plan.tags_virt
		);
		assert_eq!(
			u64::from_le_bytes(core_tag[32..40].try_into().unwrap()),
			KERNEL_ENTRY
		);

		// One memory tag per finalised range, in order.
		let memory_tags: Vec<_> = tags.iter().filter(|(ty, _)| *ty == 3).collect();
		assert_eq!(memory_tags.len(), final_map.len());

		// The module tag records name and physical placement, and
		// the payload actually lives there.
		let module_tag = tags.iter().find(|(ty, _)| *ty == 6).unwrap();
		let module_phys = u64::from_le_bytes(module_tag.1[0..8].try_into().unwrap());
		let module_size = u64::from_le_bytes(module_tag.1[8..16].try_into().unwrap());
		assert_eq!(module_size, 18);
		assert_eq!(&module_tag.1[24..29], b"/mod1");
		let mut payload = vec![0_u8; module_size as usize];
		// SAFETY: Test arena memory.
		unsafe {
			core::ptr::copy_nonoverlapping(
				translator.to_ptr::<u8>(module_phys),
				payload.as_mut_ptr(),
				payload.len(),
			);
		}
		assert_eq!(&payload, b"module-one-payload");

		// Option, video and log tags made it in; the stream
		// terminates.
		let option_tag = tags.iter().find(|(ty, _)| *ty == 2).unwrap();
		let name_len =
			u32::from_le_bytes(option_tag.1[0..4].try_into().unwrap()) as usize;
		assert_eq!(&option_tag.1[8..8 + name_len], b"timeout");
		assert!(tags.iter().any(|(ty, _)| *ty == 4));
		assert!(tags.iter().any(|(ty, _)| *ty == 8));
		assert_eq!(tags.last().unwrap().0, 0);

		// The tag stream is mapped where the core tag says.
		assert_eq!(mmu.lookup(plan.tags_virt), Some((plan.tags_phys, 0x1000)));
	}

	#[test]
	fn unsupported_loaders_are_reported() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut mmu =
			MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		let mut session = LoadSession::new(pmm);
		session
			.parse_config("entry \"L\" { linux \"/vmlinuz\" }\n", None)
			.unwrap();
		session.select_default().unwrap();

		let mut fs = boot_fs();
		let err = session
			.load(&mut mmu, &mut fs, &[ElfMachine::X86_64], &PLATFORM)
			.unwrap_err();
		assert_eq!(err, SessionError::Status(Status::NotSupported));
	}

	#[test]
	fn selection_with_no_loader_fails() {
		let pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut session = LoadSession::new(pmm);
		session.parse_config("set \"x\" 1\n", None).unwrap();

		assert_eq!(session.select_default().unwrap_err(), SessionError::NoLoader);
	}

	#[test]
	fn root_level_loader_needs_no_entries() {
		let pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut session = LoadSession::new(pmm);
		session.parse_config("kboot \"/kernel\"\n", None).unwrap();

		assert_eq!(session.select_default().unwrap(), None);
		assert!(matches!(
			session.selected_loader(),
			Some(Loader::Kboot { .. })
		));
	}

	#[test]
	#[should_panic(expected = "selection before configuration")]
	fn selecting_before_parsing_panics() {
		let pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut session = LoadSession::new(pmm);
		let _ = session.select_default();
	}

	#[test]
	#[should_panic(expected = "configuration already parsed")]
	fn parsing_twice_panics() {
		let pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut session = LoadSession::new(pmm);
		session.parse_config("set \"x\" 1\n", None).unwrap();
		let _ = session.parse_config("set \"y\" 2\n", None);
	}

	#[test]
	fn default_timeout_and_hidden_are_seeded() {
		let pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let session = LoadSession::new(pmm);
		assert_eq!(
			session.config.root.lookup("timeout"),
			Some(&Value::Integer(5))
		);
		assert_eq!(
			session.config.root.lookup("hidden"),
			Some(&Value::Boolean(false))
		);
	}
}
