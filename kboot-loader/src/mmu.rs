//! The MMU surface the orchestrator drives.
//!
//! Both architecture builders expose the same construction calls;
//! this trait lets the load path stay architecture-agnostic, with
//! one adapter implementation per target context.

use kboot_elf::SegmentMapper;
use kboot_mem::{
	mapper::{MapError, MapFlags},
	phys::PhysicalMemory,
	translate::PhysicalAddressTranslator,
};

/// An in-construction target address space.
pub trait BootMmu<T: PhysicalAddressTranslator> {
	/// Maps `[virt, virt + size)` onto `[phys, phys + size)`,
	/// allocating intermediate tables from `pmm`.
	fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError>;

	/// Copies `src` through the constructed mappings.
	fn copy_to_virt(&mut self, virt: u64, src: &[u8]) -> Result<(), MapError>;

	/// Marks the context final and returns `(root, upper_root)`
	/// physical addresses. `upper_root` is zero on targets with a
	/// single root.
	fn finish(&mut self) -> (u64, u64);
}

impl<T: PhysicalAddressTranslator> BootMmu<T> for kboot_arch_x86_64::MmuContext<T> {
	fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		Self::map(self, pmm, virt, phys, size, flags)
	}

	fn copy_to_virt(&mut self, virt: u64, src: &[u8]) -> Result<(), MapError> {
		Self::copy_to_virt(self, virt, src)
	}

	fn finish(&mut self) -> (u64, u64) {
		(Self::finish(self), 0)
	}
}

impl<T: PhysicalAddressTranslator> BootMmu<T> for kboot_arch_aarch64::MmuContext<T> {
	fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		Self::map(self, pmm, virt, phys, size, flags)
	}

	fn copy_to_virt(&mut self, virt: u64, src: &[u8]) -> Result<(), MapError> {
		Self::copy_to_virt(self, virt, src)
	}

	fn finish(&mut self) -> (u64, u64) {
		Self::finish(self)
	}
}

/// Adapts a [`BootMmu`] into the [`SegmentMapper`] surface the ELF
/// loader drives.
pub struct MmuSegmentMapper<'a, M> {
	/// The target context.
	pub mmu: &'a mut M,
}

impl<T: PhysicalAddressTranslator, M: BootMmu<T>> SegmentMapper<T> for MmuSegmentMapper<'_, M> {
	fn map(
		&mut self,
		pmm: &mut PhysicalMemory<T>,
		virt: u64,
		phys: u64,
		size: u64,
		flags: MapFlags,
	) -> Result<(), MapError> {
		self.mmu.map(pmm, virt, phys, size, flags)
	}
}
