//! The physical memory manager.
//!
//! Physical memory is tracked as a sorted, pairwise-disjoint list of
//! typed ranges. Firmware teaches the loader what exists; everything
//! the loader then carves out — kernel image backing, page tables,
//! stacks, modules, its own working memory — is recorded here so the
//! finalised map handed to the kernel is exact.
//!
//! Range starts and sizes are always page-aligned. Mis-aligned input
//! to the allocation paths is a programmer error and trips an
//! assertion; [`PhysicalMemory::add_range`] instead truncates firmware
//! ranges inward to page boundaries, as partial pages are unusable.

use alloc::vec::Vec;

use bitflags::bitflags;
use kboot_debug::dbg;

use crate::{align_down, align_up, translate::PhysicalAddressTranslator, PAGE_SIZE};

/// The type of a physical memory range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeType {
	/// Available for allocation.
	Free,
	/// Boot-time data the kernel may reuse once it has consumed the
	/// boot information (tag stream, page-table metadata).
	Reclaimable,
	/// Allocated to the kernel image or other long-lived data.
	Allocated,
	/// Page tables constructed for the kernel.
	PageTables,
	/// The kernel's initial stack.
	Stack,
	/// Loaded boot modules.
	Modules,
	/// Loader-private memory. Never surfaced to the kernel.
	Internal,
}

impl RangeType {
	/// Overlap-resolution precedence. Higher wins; on a tie the range
	/// already in the map wins.
	fn precedence(self) -> u8 {
		match self {
			Self::Free => 0,
			Self::Reclaimable => 1,
			Self::Allocated | Self::PageTables | Self::Stack | Self::Modules => 2,
			Self::Internal => 3,
		}
	}

	/// Whether ranges of this type appear in the finalised map.
	#[must_use]
	pub fn kernel_visible(self) -> bool {
		self != Self::Internal
	}
}

bitflags! {
	/// Allocation policy flags.
	#[derive(Debug, Clone, Copy, PartialEq, Eq)]
	pub struct AllocFlags: u32 {
		/// Return the highest satisfying address instead of the lowest.
		const HIGH = 1 << 0;
	}
}

/// A half-open physical range `[start, start + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryRange {
	/// Physical start address. Page-aligned.
	pub start: u64,
	/// Size in bytes. Page-aligned, non-zero.
	pub size:  u64,
	/// Range type.
	pub ty:    RangeType,
}

impl MemoryRange {
	/// The exclusive end address of the range.
	#[must_use]
	pub fn end(&self) -> u64 {
		self.start + self.size
	}
}

/// A successful physical allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
	/// The physical base address.
	pub phys: u64,
	/// The loader-virtual address of the base, produced by the
	/// manager's translator.
	pub virt: usize,
}

impl Allocation {
	/// Returns the allocation as a mutable pointer of the given type.
	///
	/// The pointer is valid to dereference for the allocation's size,
	/// subject to alignment of `T`.
	#[must_use]
	pub fn as_mut_ptr<T>(&self) -> *mut T {
		self.virt as *mut T
	}
}

/// Errors returned by the allocation paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
	/// No free range satisfies the size/alignment/window constraints.
	OutOfMemory,
}

/// The physical memory manager.
pub struct PhysicalMemory<T: PhysicalAddressTranslator> {
	/// The range list. Sorted by ascending start, pairwise disjoint,
	/// no two adjacent entries of the same type.
	ranges:     Vec<MemoryRange>,
	/// The loader's phys → virt conversion point.
	translator: T,
}

impl<T: PhysicalAddressTranslator> PhysicalMemory<T> {
	/// Creates an empty manager.
	pub fn new(translator: T) -> Self {
		Self {
			ranges: Vec::new(),
			translator,
		}
	}

	/// Returns the current range list.
	#[must_use]
	pub fn ranges(&self) -> &[MemoryRange] {
		&self.ranges
	}

	/// Returns the translator used by this manager.
	pub fn translator(&self) -> &T {
		&self.translator
	}

	/// Records a physical range.
	///
	/// The range is truncated inward to page boundaries; a range that
	/// does not cover a full page is dropped. Where the new range
	/// overlaps existing ranges, the type with the higher precedence
	/// wins (`Free < Reclaimable < Allocated-family < Internal`); on a
	/// tie the existing range wins and the newcomer is split around
	/// it.
	pub fn add_range(&mut self, start: u64, size: u64, ty: RangeType) {
		let s = align_up(start, PAGE_SIZE);
		let e = align_down(start + size, PAGE_SIZE);
		if e <= s {
			return;
		}

		self.insert_aligned(s, e, ty);
	}

	/// Protects `[start, start + size)` as loader-internal memory.
	///
	/// Used for firmware data and the loader's own image. The region
	/// is widened outward to page boundaries so partial pages are
	/// covered.
	pub fn protect(&mut self, start: u64, size: u64) {
		let s = align_down(start, PAGE_SIZE);
		let e = align_up(start + size, PAGE_SIZE);
		if e <= s {
			return;
		}

		self.insert_aligned(s, e, RangeType::Internal);
	}

	/// Erases all coverage of `[start, start + size)`.
	///
	/// Unlike [`Self::protect`], the region afterwards appears in no
	/// range at all, of any type. The region is widened outward to
	/// page boundaries.
	pub fn remove(&mut self, start: u64, size: u64) {
		let s = align_down(start, PAGE_SIZE);
		let e = align_up(start + size, PAGE_SIZE);
		if e <= s {
			return;
		}

		self.carve(s, e);
		self.canonicalize();
	}

	/// Allocates `size` bytes of free physical memory.
	///
	/// The result is aligned to `align` (0 means page alignment) and
	/// lies entirely within `[min_addr, max_addr)`. The lowest
	/// satisfying address is returned, or the highest under
	/// [`AllocFlags::HIGH`]. The new range is recorded with type `ty`.
	///
	/// # Panics
	/// Panics if `size` is zero or not page-aligned, if `align` is not
	/// a page-multiple power of two, or if `ty` is [`RangeType::Free`].
	pub fn alloc(
		&mut self,
		size: u64,
		align: u64,
		min_addr: u64,
		max_addr: u64,
		ty: RangeType,
		flags: AllocFlags,
	) -> Result<Allocation, AllocError> {
		assert!(
			size > 0 && size % PAGE_SIZE == 0,
			"allocation size must be a non-zero page multiple"
		);
		let align = if align == 0 { PAGE_SIZE } else { align };
		assert!(
			align.is_power_of_two() && align >= PAGE_SIZE,
			"alignment must be a page-multiple power of two"
		);
		assert!(ty != RangeType::Free, "cannot allocate ranges as Free");

		let mut best: Option<u64> = None;
		for range in &self.ranges {
			if range.ty != RangeType::Free {
				continue;
			}

			let window_start = range.start.max(min_addr);
			let window_end = range.end().min(max_addr);
			if window_end <= window_start || window_end - window_start < size {
				continue;
			}

			if flags.contains(AllocFlags::HIGH) {
				let addr = align_down(window_end - size, align);
				if addr >= window_start {
					best = Some(best.map_or(addr, |b| b.max(addr)));
				}
			} else {
				let addr = align_up(window_start, align);
				if addr.checked_add(size).is_some_and(|end| end <= window_end) {
					// Ranges are sorted ascending; the first fit is the lowest.
					best = Some(addr);
					break;
				}
			}
		}

		let Some(addr) = best else {
			return Err(AllocError::OutOfMemory);
		};

		self.insert_aligned(addr, addr + size, ty);
		dbg!(
			"phys: allocated {:#x}..{:#x} ({:?})",
			addr,
			addr + size,
			ty
		);

		Ok(Allocation {
			phys: addr,
			virt: self.translator.to_virtual_addr(addr),
		})
	}

	/// Marks `[addr, addr + size)` as free again and re-coalesces.
	///
	/// # Panics
	/// Panics if `addr` or `size` is not page-aligned.
	pub fn free(&mut self, addr: u64, size: u64) {
		assert!(
			addr % PAGE_SIZE == 0 && size % PAGE_SIZE == 0,
			"freed range must be page-aligned"
		);
		if size == 0 {
			return;
		}

		self.carve(addr, addr + size);
		self.ranges.push(MemoryRange {
			start: addr,
			size,
			ty: RangeType::Free,
		});
		self.canonicalize();
	}

	/// Produces the kernel-visible memory map, consuming the manager.
	///
	/// Internal ranges are dropped; all other types, including
	/// Reclaimable, remain distinguishable. After this point no
	/// further physical allocation is possible — the type system
	/// enforces the state machine.
	#[must_use]
	pub fn finalize(mut self) -> Vec<MemoryRange> {
		self.ranges.retain(|r| r.ty.kernel_visible());
		self.canonicalize();
		dbg!("phys: finalised map with {} ranges", self.ranges.len());
		self.ranges
	}

	/// Inserts an aligned `[s, e)` range, resolving overlaps by
	/// precedence.
	fn insert_aligned(&mut self, s: u64, e: u64, ty: RangeType) {
		// Fragments of the newcomer that survive the ranges it must
		// yield to (strictly higher precedence, or equal — the
		// existing range wins ties).
		let winners: Vec<(u64, u64)> = self
			.ranges
			.iter()
			.filter(|r| r.ty.precedence() >= ty.precedence() && r.start < e && r.end() > s)
			.map(|r| (r.start, r.end()))
			.collect();

		let mut pieces: Vec<(u64, u64)> = Vec::with_capacity(winners.len() + 1);
		pieces.push((s, e));
		for (ws, we) in winners {
			let mut next = Vec::with_capacity(pieces.len() + 1);
			for (ps, pe) in pieces {
				if ws < pe && we > ps {
					if ps < ws {
						next.push((ps, ws));
					}
					if we < pe {
						next.push((we, pe));
					}
				} else {
					next.push((ps, pe));
				}
			}
			pieces = next;
			if pieces.is_empty() {
				return;
			}
		}

		// Whatever overlaps the surviving pieces now is strictly lower
		// precedence and yields.
		for &(ps, pe) in &pieces {
			self.carve(ps, pe);
		}
		for (ps, pe) in pieces {
			self.ranges.push(MemoryRange {
				start: ps,
				size: pe - ps,
				ty,
			});
		}

		self.canonicalize();
	}

	/// Removes all coverage of `[s, e)`, splitting ranges that
	/// straddle the boundaries. Does not re-sort.
	fn carve(&mut self, s: u64, e: u64) {
		let mut out = Vec::with_capacity(self.ranges.len() + 1);
		for r in self.ranges.drain(..) {
			let (rs, re) = (r.start, r.end());
			if re <= s || rs >= e {
				out.push(r);
				continue;
			}
			if rs < s {
				out.push(MemoryRange {
					start: rs,
					size:  s - rs,
					ty:    r.ty,
				});
			}
			if re > e {
				out.push(MemoryRange {
					start: e,
					size:  re - e,
					ty:    r.ty,
				});
			}
		}
		self.ranges = out;
	}

	/// Restores the list invariant: sorted by ascending start,
	/// disjoint, adjacent same-type ranges coalesced.
	fn canonicalize(&mut self) {
		self.ranges.sort_unstable_by_key(|r| r.start);

		let mut out: Vec<MemoryRange> = Vec::with_capacity(self.ranges.len());
		for r in self.ranges.drain(..) {
			if let Some(last) = out.last_mut() {
				debug_assert!(last.end() <= r.start, "physical range list overlaps");
				if last.ty == r.ty && last.end() == r.start {
					last.size += r.size;
					continue;
				}
			}
			out.push(r);
		}
		self.ranges = out;
	}
}
