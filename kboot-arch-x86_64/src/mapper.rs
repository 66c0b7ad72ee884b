//! The x86 page-table builder.
//!
//! An [`MmuContext`] owns an in-construction table hierarchy for one
//! of the three paging modes. Every table page is allocated from the
//! physical memory manager with the context's range type (so the
//! final map attributes them correctly) and addressed through the
//! loader's physical address translator. Nothing is ever unmapped;
//! the loader builds exactly the world the kernel starts in.

use kboot_mem::{
	align_down,
	mapper::{MapError, MapFlags},
	phys::{AllocFlags, PhysicalMemory, RangeType},
	translate::PhysicalAddressTranslator,
	PAGE_SIZE,
};

use crate::paging::{PageTable, PageTable32, PageTableEntry, PageTableEntry32};

/// The paging mode a context builds tables for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PagingMode {
	/// 32-bit two-level paging, 4 MiB large pages.
	Legacy,
	/// 32-bit PAE three-level paging, 2 MiB large pages.
	Pae,
	/// 64-bit four-level long mode, 2 MiB large pages.
	Long,
}

impl PagingMode {
	/// The large page size of the mode, in bytes.
	#[must_use]
	pub fn large_page_size(self) -> u64 {
		match self {
			Self::Legacy => 0x40_0000,
			Self::Pae | Self::Long => 0x20_0000,
		}
	}

	/// The highest physical address table pages may be placed at.
	fn table_limit(self) -> u64 {
		match self {
			// 32-bit CR3 and legacy/PDPT entries address 32 bits.
			Self::Legacy | Self::Pae => 1 << 32,
			Self::Long => u64::MAX,
		}
	}
}

/// An x86 page-table hierarchy under construction.
pub struct MmuContext<T: PhysicalAddressTranslator> {
	/// The paging mode.
	mode:       PagingMode,
	/// Physical address of the root table (PD, PDPT or PML4).
	root_phys:  u64,
	/// The range type used for table-page allocations.
	table_type: RangeType,
	/// The loader's phys → virt conversion point.
	translator: T,
	/// Whether the context has been finalised.
	finished:   bool,
}

impl<T: PhysicalAddressTranslator> MmuContext<T> {
	/// Creates a context, allocating the zeroed root table.
	///
	/// Table pages (this one and all intermediates) are allocated from
	/// `pmm` with range type `table_type`, normally
	/// [`RangeType::PageTables`].
	pub fn new(
		pmm: &mut PhysicalMemory<T>,
		mode: PagingMode,
		table_type: RangeType,
	) -> Result<Self, MapError> {
		let translator = pmm.translator().clone();
		let root_phys = alloc_table(pmm, mode, table_type, &translator)?;

		Ok(Self {
			mode,
			root_phys,
			table_type,
			translator,
			finished: false,
		})
	}

	/// The paging mode of the context.
	#[must_use]
	pub fn mode(&self) -> PagingMode {
		self.mode
	}

	/// Physical address of the root table. This is the eventual CR3
	/// value (modulo PCID bits, which the loader never sets).
	#[must_use]
	pub fn root_phys(&self) -> u64 {
		self.root_phys
	}

	/// Marks the context final and returns the root table address.
	///
	/// All mutation after this point trips an assertion.
	pub fn finish(&mut self) -> u64 {
		self.finished = true;
		self.root_phys
	}

	/// Creates leaf entries covering `[virt, virt + size)` onto
	/// `[phys, phys + size)`.
	///
	/// Runs are promoted to large pages wherever `virt` and `phys`
	/// are congruent modulo the large page size and a full large page
	/// remains; leading and trailing sub-runs use 4 KiB pages.
	///
	/// # Panics
	/// Panics if any of `virt`, `phys` or `size` is not page-aligned,
	/// or if the context has been finalised.
	pub fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		assert!(!self.finished, "map on a finalised context");
		assert!(
			virt % PAGE_SIZE == 0 && phys % PAGE_SIZE == 0 && size % PAGE_SIZE == 0,
			"map inputs must be page-aligned"
		);
		if size == 0 {
			return Ok(());
		}
		self.check_virt_range(virt, size)?;

		let large = self.mode.large_page_size();
		let mut v = virt;
		let mut p = phys;
		let mut remaining = size;
		while remaining > 0 {
			if v % large == 0 && p % large == 0 && remaining >= large {
				self.map_large(pmm, v, p, flags)?;
				v += large;
				p += large;
				remaining -= large;
			} else {
				self.map_page(pmm, v, p, flags)?;
				v += PAGE_SIZE;
				p += PAGE_SIZE;
				remaining -= PAGE_SIZE;
			}
		}

		Ok(())
	}

	/// Walks the tables for the page containing `virt`.
	///
	/// Returns the physical base address of the backing page and the
	/// page size (4 KiB, 2 MiB or 4 MiB).
	#[must_use]
	pub fn lookup(&self, virt: u64) -> Option<(u64, u64)> {
		if self.check_virt_range(align_down(virt, PAGE_SIZE), PAGE_SIZE).is_err() {
			return None;
		}

		match self.mode {
			PagingMode::Long => {
				let mut table_phys = self.root_phys;
				for shift in [39_u32, 30, 21] {
					let entry = self.entry64(table_phys, ((virt >> shift) & 0x1FF) as usize);
					if !entry.present() {
						return None;
					}
					if shift == 21 && entry.huge() {
						return Some((entry.address(), self.mode.large_page_size()));
					}
					table_phys = entry.address();
				}
				let entry = self.entry64(table_phys, ((virt >> 12) & 0x1FF) as usize);
				entry.present().then(|| (entry.address(), PAGE_SIZE))
			}
			PagingMode::Pae => {
				let pdpte = self.entry64(self.root_phys, ((virt >> 30) & 0x3) as usize);
				if !pdpte.present() {
					return None;
				}
				let pde = self.entry64(pdpte.address(), ((virt >> 21) & 0x1FF) as usize);
				if !pde.present() {
					return None;
				}
				if pde.huge() {
					return Some((pde.address(), self.mode.large_page_size()));
				}
				let pte = self.entry64(pde.address(), ((virt >> 12) & 0x1FF) as usize);
				pte.present().then(|| (pte.address(), PAGE_SIZE))
			}
			PagingMode::Legacy => {
				let pde = self.entry32(self.root_phys, ((virt >> 22) & 0x3FF) as usize);
				if !pde.present() {
					return None;
				}
				if pde.huge() {
					return Some((pde.large_address(), self.mode.large_page_size()));
				}
				let pte = self.entry32(pde.address(), ((virt >> 12) & 0x3FF) as usize);
				pte.present().then(|| (pte.address(), PAGE_SIZE))
			}
		}
	}

	/// Fills `[virt, virt + len)` with `byte` through the mappings.
	///
	/// The range may straddle pages and needs no alignment. Hitting
	/// an unmapped page yields [`MapError::NotMapped`]; pages before
	/// the hole will already have been written.
	pub fn memset_virt(&mut self, virt: u64, byte: u8, len: usize) -> Result<(), MapError> {
		self.for_each_chunk(virt, len, |ptr, chunk, _| {
			// SAFETY: The chunk lies within one mapped, translated page.
			unsafe {
				core::ptr::write_bytes(ptr, byte, chunk);
			}
		})
	}

	/// Copies `src` to `[virt, virt + src.len())` through the mappings.
	pub fn copy_to_virt(&mut self, virt: u64, src: &[u8]) -> Result<(), MapError> {
		self.for_each_chunk(virt, src.len(), |ptr, chunk, off| {
			// SAFETY: The chunk lies within one mapped, translated page
			// SAFETY: and `off + chunk <= src.len()` by construction.
			unsafe {
				core::ptr::copy_nonoverlapping(src.as_ptr().add(off), ptr, chunk);
			}
		})
	}

	/// Copies `[virt, virt + dest.len())` into `dest` through the
	/// mappings.
	pub fn copy_from_virt(&self, virt: u64, dest: &mut [u8]) -> Result<(), MapError> {
		let dest_ptr = dest.as_mut_ptr();
		self.for_each_chunk(virt, dest.len(), |ptr, chunk, off| {
			// SAFETY: As in `copy_to_virt`, with the direction reversed.
			unsafe {
				core::ptr::copy_nonoverlapping(ptr, dest_ptr.add(off), chunk);
			}
		})
	}

	/// Walks `[virt, virt + len)` page by page, handing the callback
	/// the loader-virtual pointer, length and buffer offset of each
	/// contiguous chunk.
	fn for_each_chunk(
		&self,
		virt: u64,
		len: usize,
		mut f: impl FnMut(*mut u8, usize, usize),
	) -> Result<(), MapError> {
		let mut off = 0_usize;
		while off < len {
			let v = virt + off as u64;
			let Some((page_phys, page_size)) = self.lookup(v) else {
				return Err(MapError::NotMapped);
			};

			let page_off = v % page_size;
			let chunk = ((page_size - page_off) as usize).min(len - off);
			let phys = page_phys + page_off;
			f(self.translator.to_ptr::<u8>(phys), chunk, off);
			off += chunk;
		}

		Ok(())
	}

	/// Validates `[virt, virt + size)` against the mode's address
	/// space.
	fn check_virt_range(&self, virt: u64, size: u64) -> Result<(), MapError> {
		let Some(last) = virt.checked_add(size - 1) else {
			return Err(MapError::VirtOutOfRange);
		};

		match self.mode {
			PagingMode::Legacy | PagingMode::Pae => {
				if last >= 1 << 32 {
					return Err(MapError::VirtOutOfRange);
				}
			}
			PagingMode::Long => {
				// 48-bit canonical form, both ends in the same half.
				let canonical = |addr: u64| {
					let top = addr >> 47;
					top == 0 || top == 0x1_FFFF
				};
				if !canonical(virt) || !canonical(last) || (virt >> 47 != last >> 47) {
					return Err(MapError::VirtOutOfRange);
				}
			}
		}

		Ok(())
	}

	/// Maps one 4 KiB page.
	fn map_page(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		match self.mode {
			PagingMode::Long => {
				let mut table_phys = self.root_phys;
				for shift in [39_u32, 30, 21] {
					table_phys =
						self.descend64(pmm, table_phys, ((virt >> shift) & 0x1FF) as usize)?;
				}
				let entry = self.entry_mut64(table_phys, ((virt >> 12) & 0x1FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template64(flags).with_address(phys);
			}
			PagingMode::Pae => {
				let pd = self.descend_pdpt(pmm, virt)?;
				let pt = self.descend64(pmm, pd, ((virt >> 21) & 0x1FF) as usize)?;
				let entry = self.entry_mut64(pt, ((virt >> 12) & 0x1FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template64(flags).with_address(phys);
			}
			PagingMode::Legacy => {
				debug_assert!(phys < 1 << 32, "legacy mode physical address exceeds 32 bits");
				let pt = self.descend32(pmm, self.root_phys, ((virt >> 22) & 0x3FF) as usize)?;
				let entry = self.entry_mut32(pt, ((virt >> 12) & 0x3FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template32(flags).with_address(phys as u32);
			}
		}

		Ok(())
	}

	/// Maps one large page (2 MiB, or 4 MiB in legacy mode).
	fn map_large(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		match self.mode {
			PagingMode::Long => {
				let mut table_phys = self.root_phys;
				for shift in [39_u32, 30] {
					table_phys =
						self.descend64(pmm, table_phys, ((virt >> shift) & 0x1FF) as usize)?;
				}
				let entry = self.entry_mut64(table_phys, ((virt >> 21) & 0x1FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template64(flags).with_huge().with_address(phys);
			}
			PagingMode::Pae => {
				let pd = self.descend_pdpt(pmm, virt)?;
				let entry = self.entry_mut64(pd, ((virt >> 21) & 0x1FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template64(flags).with_huge().with_address(phys);
			}
			PagingMode::Legacy => {
				debug_assert!(phys < 1 << 32, "legacy mode physical address exceeds 32 bits");
				let entry = self.entry_mut32(self.root_phys, ((virt >> 22) & 0x3FF) as usize);
				if entry.present() {
					return Err(MapError::Exists);
				}
				*entry = leaf_template32(flags)
					.with_huge()
					.with_large_address(phys as u32);
			}
		}

		Ok(())
	}

	/// Returns the PD for `virt`'s PDPT slot, allocating it if absent.
	fn descend_pdpt(&self, pmm: &mut PhysicalMemory<T>, virt: u64) -> Result<u64, MapError> {
		let entry = self.entry_mut64(self.root_phys, ((virt >> 30) & 0x3) as usize);
		if entry.present() {
			Ok(entry.address())
		} else {
			let phys = alloc_table(pmm, self.mode, self.table_type, &self.translator)?;
			// PAE PDPT entries carry no write/user permission bits.
			*entry = PageTableEntry::new().with_present().with_address(phys);
			Ok(phys)
		}
	}

	/// Returns the next-level table for `table[index]`, allocating it
	/// if absent.
	fn descend64(
		&self,
		pmm: &mut PhysicalMemory<T>,
		table_phys: u64,
		index: usize,
	) -> Result<u64, MapError> {
		let entry = self.entry_mut64(table_phys, index);
		if entry.present() {
			if entry.huge() {
				// A large leaf already covers this run.
				return Err(MapError::Exists);
			}
			Ok(entry.address())
		} else {
			let phys = alloc_table(pmm, self.mode, self.table_type, &self.translator)?;
			*entry = PageTableEntry::new()
				.with_present()
				.with_writable()
				.with_address(phys);
			Ok(phys)
		}
	}

	/// As [`Self::descend64`], for legacy 32-bit tables.
	fn descend32(
		&self,
		pmm: &mut PhysicalMemory<T>,
		table_phys: u64,
		index: usize,
	) -> Result<u64, MapError> {
		let entry = self.entry_mut32(table_phys, index);
		if entry.present() {
			if entry.huge() {
				return Err(MapError::Exists);
			}
			Ok(entry.address())
		} else {
			let phys = alloc_table(pmm, self.mode, self.table_type, &self.translator)?;
			*entry = PageTableEntry32::new()
				.with_present()
				.with_writable()
				.with_address(phys as u32);
			Ok(phys)
		}
	}

	/// Reads `table[index]` of a 64-bit entry table.
	fn entry64(&self, table_phys: u64, index: usize) -> PageTableEntry {
		// SAFETY: Table pages are allocated, zeroed and exclusively
		// SAFETY: owned by this context; the translated pointer is
		// SAFETY: page-aligned by construction.
		unsafe { (&(*self.translator.to_ptr::<PageTable>(table_phys)))[index] }
	}

	/// Returns a mutable reference to `table[index]` of a 64-bit
	/// entry table.
	#[expect(clippy::mut_from_ref)]
	fn entry_mut64(&self, table_phys: u64, index: usize) -> &mut PageTableEntry {
		// SAFETY: As in `entry64`; the context is the only writer and
		// SAFETY: entry references never outlive the walk step.
		unsafe { &mut (&mut (*self.translator.to_ptr::<PageTable>(table_phys)))[index] }
	}

	/// Reads `table[index]` of a legacy 32-bit entry table.
	fn entry32(&self, table_phys: u64, index: usize) -> PageTableEntry32 {
		// SAFETY: As in `entry64`.
		unsafe { (&(*self.translator.to_ptr::<PageTable32>(table_phys)))[index] }
	}

	/// Returns a mutable reference to `table[index]` of a legacy
	/// 32-bit entry table.
	#[expect(clippy::mut_from_ref)]
	fn entry_mut32(&self, table_phys: u64, index: usize) -> &mut PageTableEntry32 {
		// SAFETY: As in `entry_mut64`.
		unsafe { &mut (&mut (*self.translator.to_ptr::<PageTable32>(table_phys)))[index] }
	}
}

/// Allocates one zeroed table page.
fn alloc_table<T: PhysicalAddressTranslator>(
	pmm: &mut PhysicalMemory<T>,
	mode: PagingMode,
	table_type: RangeType,
	translator: &T,
) -> Result<u64, MapError> {
	let allocation = pmm.alloc(
		PAGE_SIZE,
		0,
		0,
		mode.table_limit(),
		table_type,
		AllocFlags::empty(),
	)?;

	// SAFETY: Freshly allocated, exclusively owned page.
	unsafe {
		core::ptr::write_bytes(translator.to_ptr::<u8>(allocation.phys), 0, PAGE_SIZE as usize);
	}

	Ok(allocation.phys)
}

/// Builds the 64-bit leaf entry template for `flags`.
fn leaf_template64(flags: MapFlags) -> PageTableEntry {
	let mut entry = PageTableEntry::new().with_present();
	if flags.contains(MapFlags::WRITE) {
		entry = entry.with_writable();
	}
	if !flags.contains(MapFlags::EXEC) {
		entry = entry.with_no_exec();
	}
	if flags.contains(MapFlags::UNCACHED) {
		entry = entry.with_cache_disable();
	} else if flags.contains(MapFlags::WRITE_THROUGH) {
		entry = entry.with_write_through();
	}
	entry
}

/// Builds the legacy 32-bit leaf entry template for `flags`.
///
/// Legacy paging has no no-execute bit; executability is not
/// expressible there.
fn leaf_template32(flags: MapFlags) -> PageTableEntry32 {
	let mut entry = PageTableEntry32::new().with_present();
	if flags.contains(MapFlags::WRITE) {
		entry = entry.with_writable();
	}
	if flags.contains(MapFlags::UNCACHED) {
		entry = entry.with_cache_disable();
	} else if flags.contains(MapFlags::WRITE_THROUGH) {
		entry = entry.with_write_through();
	}
	entry
}

#[cfg(test)]
mod tests {
	use kboot_mem::translate::OffsetTranslator;

	use super::*;

	/// Fake physical window backed by real host memory: physical
	/// addresses `fake_base..fake_base + len` translate into a leaked,
	/// page-aligned arena.
	fn arena_pmm(len: usize, fake_base: u64) -> PhysicalMemory<OffsetTranslator> {
		let layout = std::alloc::Layout::from_size_align(len, 4096).unwrap();
		// SAFETY: Valid, non-zero layout. The arena is intentionally
		// SAFETY: leaked; tests treat it as the machine's RAM.
		let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
		assert!(!ptr.is_null());

		let mut pmm = PhysicalMemory::new(OffsetTranslator::new(
			(ptr as u64).wrapping_sub(fake_base),
		));
		pmm.add_range(fake_base, len as u64, RangeType::Free);
		pmm
	}

	#[test]
	fn long_mode_large_page_round_trip() {
		let mut pmm = arena_pmm(8 * 1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		let backing = pmm
			.alloc(
				0x20_0000,
				0x20_0000,
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::empty(),
			)
			.unwrap();

		ctx.map(
			&mut pmm,
			0x4000_0000,
			backing.phys,
			0x20_0000,
			MapFlags::WRITE,
		)
		.unwrap();

		// Exactly one large-page leaf covers the whole run.
		assert_eq!(ctx.lookup(0x4000_0000), Some((backing.phys, 0x20_0000)));
		assert_eq!(
			ctx.lookup(0x4000_0000 + 0x10_0000),
			Some((backing.phys, 0x20_0000))
		);

		ctx.memset_virt(0x4000_0000, 0xAA, 0x1000).unwrap();
		let mut readback = [0_u8; 16];
		ctx.copy_from_virt(0x4000_0000, &mut readback).unwrap();
		assert_eq!(readback, [0xAA; 16]);
	}

	#[test]
	fn long_mode_head_interior_tail_promotion() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		// virt and phys congruent modulo 2 MiB, neither aligned:
		// one head page, two large pages, one tail page.
		ctx.map(
			&mut pmm,
			0x3FFF_F000,
			0x7FFF_F000,
			0x40_2000,
			MapFlags::WRITE,
		)
		.unwrap();

		assert_eq!(ctx.lookup(0x3FFF_F000), Some((0x7FFF_F000, 0x1000)));
		assert_eq!(ctx.lookup(0x4000_0000), Some((0x8000_0000, 0x20_0000)));
		assert_eq!(ctx.lookup(0x4020_0000), Some((0x8020_0000, 0x20_0000)));
		assert_eq!(ctx.lookup(0x4040_0000), Some((0x8040_0000, 0x1000)));
		assert_eq!(ctx.lookup(0x4040_1000), None);
	}

	#[test]
	fn incongruent_offsets_never_promote() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		ctx.map(
			&mut pmm,
			0x4000_0000,
			0x8000_1000,
			0x20_0000,
			MapFlags::WRITE,
		)
		.unwrap();

		assert_eq!(ctx.lookup(0x4000_0000), Some((0x8000_1000, 0x1000)));
		assert_eq!(ctx.lookup(0x401F_F000), Some((0x8020_0000, 0x1000)));
	}

	#[test]
	fn double_map_is_an_error() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		ctx.map(&mut pmm, 0x4000_0000, 0x8000_0000, 0x1000, MapFlags::WRITE)
			.unwrap();
		assert_eq!(
			ctx.map(&mut pmm, 0x4000_0000, 0x8000_0000, 0x1000, MapFlags::WRITE),
			Err(MapError::Exists)
		);
	}

	#[test]
	fn non_canonical_is_out_of_range() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		assert_eq!(
			ctx.map(
				&mut pmm,
				0x0000_8000_0000_0000,
				0x8000_0000,
				0x1000,
				MapFlags::WRITE
			),
			Err(MapError::VirtOutOfRange)
		);

		// The canonical upper half is fine.
		ctx.map(
			&mut pmm,
			0xFFFF_8000_0000_0000,
			0x8000_0000,
			0x1000,
			MapFlags::WRITE,
		)
		.unwrap();
	}

	#[test]
	fn pae_round_trip_and_32bit_limit() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Pae, RangeType::PageTables).unwrap();

		assert_eq!(
			ctx.map(
				&mut pmm,
				0x1_0000_0000,
				0x8000_0000,
				0x1000,
				MapFlags::WRITE
			),
			Err(MapError::VirtOutOfRange)
		);

		let backing = pmm
			.alloc(
				PAGE_SIZE,
				0,
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::empty(),
			)
			.unwrap();
		ctx.map(&mut pmm, 0x4000_0000, backing.phys, 0x1000, MapFlags::WRITE)
			.unwrap();

		ctx.copy_to_virt(0x4000_0000, b"pae!").unwrap();
		let mut readback = [0_u8; 4];
		ctx.copy_from_virt(0x4000_0000, &mut readback).unwrap();
		assert_eq!(&readback, b"pae!");
	}

	#[test]
	fn legacy_promotes_to_4mib() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Legacy, RangeType::PageTables).unwrap();

		ctx.map(
			&mut pmm,
			0x4000_0000,
			0x8000_0000,
			0x40_0000,
			MapFlags::WRITE,
		)
		.unwrap();
		assert_eq!(ctx.lookup(0x4000_0000), Some((0x8000_0000, 0x40_0000)));
	}

	#[test]
	fn copy_spans_discontiguous_pages() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		let a = pmm
			.alloc(
				PAGE_SIZE,
				0,
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::empty(),
			)
			.unwrap();
		let b = pmm
			.alloc(
				PAGE_SIZE,
				0,
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::HIGH,
			)
			.unwrap();
		assert_ne!(a.phys + PAGE_SIZE, b.phys);

		ctx.map(&mut pmm, 0x4100_0000, a.phys, 0x1000, MapFlags::WRITE)
			.unwrap();
		ctx.map(&mut pmm, 0x4100_1000, b.phys, 0x1000, MapFlags::WRITE)
			.unwrap();

		let message = b"straddling the page boundary";
		ctx.copy_to_virt(0x4100_0FF0, message).unwrap();
		let mut readback = [0_u8; 28];
		ctx.copy_from_virt(0x4100_0FF0, &mut readback).unwrap();
		assert_eq!(&readback, message);
	}

	#[test]
	fn memset_over_hole_reports_not_mapped() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();

		let a = pmm
			.alloc(
				PAGE_SIZE,
				0,
				0,
				u64::MAX,
				RangeType::Allocated,
				AllocFlags::empty(),
			)
			.unwrap();
		ctx.map(&mut pmm, 0x4000_0000, a.phys, 0x1000, MapFlags::WRITE)
			.unwrap();

		assert_eq!(
			ctx.memset_virt(0x4000_0000, 0x55, 0x2000),
			Err(MapError::NotMapped)
		);
	}

	#[test]
	fn table_pages_are_recorded_in_the_map() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();
		ctx.map(&mut pmm, 0x4000_0000, 0x8000_0000, 0x1000, MapFlags::WRITE)
			.unwrap();

		// Root + three intermediate levels.
		let table_bytes: u64 = pmm
			.ranges()
			.iter()
			.filter(|r| r.ty == RangeType::PageTables)
			.map(|r| r.size)
			.sum();
		assert_eq!(table_bytes, 4 * PAGE_SIZE);
	}

	#[test]
	#[should_panic(expected = "map on a finalised context")]
	fn map_after_finish_panics() {
		let mut pmm = arena_pmm(1024 * 1024, 0x10_0000);
		let mut ctx = MmuContext::new(&mut pmm, PagingMode::Long, RangeType::PageTables).unwrap();
		let root = ctx.finish();
		assert_eq!(root, ctx.root_phys());

		let _ = ctx.map(&mut pmm, 0x4000_0000, 0x8000_0000, 0x1000, MapFlags::WRITE);
	}
}
