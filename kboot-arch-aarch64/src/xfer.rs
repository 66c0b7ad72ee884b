//! Transfer stubs: the final instructions the loader ever executes.
//!
//! The orchestrator copies [`stub_bytes`] into a page that is mapped
//! both 1:1 at its physical address and at its kernel-virtual
//! address, then calls [`transfer`]. The stub tears the MMU down,
//! installs the kernel's translation regime (MAIR, TCR, both TTBRs),
//! turns the MMU back on and jumps to the entry point — all from the
//! doubly-mapped page, so the instruction stream survives the switch.
//!
//! Exceptions must already be masked (DAIF) when [`transfer`] runs;
//! the barrier sequence below is the only cross-agent ordering point
//! between the loader's writes and the kernel's first reads.

use core::arch::{asm, global_asm};

global_asm!(
	".pushsection .text.kboot_stubs, \"ax\"",
	".global kboot_transfer_stubs_start",
	"kboot_transfer_stubs_start:",
	// Disable the MMU.
	"mrs x9, sctlr_el1",
	"bic x9, x9, #1",
	"msr sctlr_el1, x9",
	"isb",
	// Install the kernel's translation regime.
	"msr mair_el1, x5",
	"msr tcr_el1, x6",
	"msr ttbr0_el1, x3",
	"msr ttbr1_el1, x4",
	"dsb ish",
	"isb",
	// Re-enable the MMU.
	"mrs x9, sctlr_el1",
	"orr x9, x9, #1",
	"msr sctlr_el1, x9",
	// Invalidate TLBs, the instruction cache, and synchronise.
	"tlbi vmalle1is",
	"ic iallu",
	"dsb nsh",
	"isb",
	// Kernel stack, then entry with x0/x1 carrying the protocol.
	"mov sp, x2",
	"br x7",
	".global kboot_transfer_stubs_end",
	"kboot_transfer_stubs_end:",
	".popsection",
);

unsafe extern "C" {
	/// First byte of the transfer stubs.
	static kboot_transfer_stubs_start: u8;
	/// One past the last byte of the transfer stubs.
	static kboot_transfer_stubs_end: u8;
}

/// Returns the transfer stub machine code.
#[must_use]
pub fn stub_bytes() -> &'static [u8] {
	// SAFETY: The two symbols bound the stub section emitted above;
	// SAFETY: the region between them is initialised immutable code.
	unsafe {
		let start = core::ptr::addr_of!(kboot_transfer_stubs_start);
		let end = core::ptr::addr_of!(kboot_transfer_stubs_end);
		let len = end.offset_from(start) as usize;
		debug_assert!(len > 0 && len <= 4096, "transfer stubs must fit one page");
		core::slice::from_raw_parts(start, len)
	}
}

/// The `TCR_EL1` value the kernel is entered with: 48-bit halves,
/// 4 KiB granules on both, write-back write-allocate inner-shareable
/// walks, 48-bit intermediate physical addresses.
#[must_use]
pub const fn tcr_el1_value() -> u64 {
	(16 << 0)          // T0SZ: 48-bit lower half
		| (0b01 << 8)  // IRGN0: write-back write-allocate
		| (0b01 << 10) // ORGN0: write-back write-allocate
		| (0b11 << 12) // SH0: inner shareable
		| (0b00 << 14) // TG0: 4KiB granule
		| (16 << 16)   // T1SZ: 48-bit upper half
		| (0b01 << 24) // IRGN1: write-back write-allocate
		| (0b01 << 26) // ORGN1: write-back write-allocate
		| (0b11 << 28) // SH1: inner shareable
		| (0b10 << 30) // TG1: 4KiB granule
		| (0b101 << 32) // IPS: 48-bit physical addresses
}

/// Jumps into the trampoline page, entering the kernel. Never
/// returns.
///
/// # Safety
/// The point of no return. `trampoline_phys` must hold a copy of
/// [`stub_bytes`], be accessible at its physical address with the
/// current translation regime and mapped in the target tables;
/// `stack_virt` and `entry_virt` must be valid in the target tables.
/// Exceptions must be masked via DAIF.
#[allow(clippy::too_many_arguments)]
pub unsafe fn transfer(
	trampoline_phys: u64,
	ttbr0_phys: u64,
	ttbr1_phys: u64,
	stack_virt: u64,
	magic: u64,
	tags_virt: u64,
	entry_virt: u64,
) -> ! {
	let mair = crate::mair::mair_value();
	let tcr = tcr_el1_value();

	// SAFETY: Assembly is unavoidable here; requirements offloaded
	// SAFETY: to the caller.
	unsafe {
		asm!(
			// Make the constructed tables visible before the walk
			// begins using them.
			"dsb sy",
			"isb",
			"br x8",
			in("x0") magic,
			in("x1") tags_virt,
			in("x2") stack_virt,
			in("x3") ttbr0_phys,
			in("x4") ttbr1_phys,
			in("x5") mair,
			in("x6") tcr,
			in("x7") entry_virt,
			in("x8") trampoline_phys,
			options(noreturn)
		);
	}
}
