//! Transfer stubs: the final instructions the loader ever executes.
//!
//! The orchestrator copies [`stub_bytes`] into a page that is mapped
//! both 1:1 at its physical address and at its kernel-virtual
//! address, then calls [`transfer`]. The stub switches CR3 while
//! executing from the doubly-mapped page, so the instruction stream
//! survives the address-space switch, then hands the kernel its
//! entry protocol registers.
//!
//! The loader is expected to already run in long mode with paging
//! enabled (EFI, or a BIOS stage that entered long mode); `mov cr3`
//! is a full serialising TLB flush for non-global entries, which is
//! the entire ordering requirement on this architecture.

use core::arch::{asm, global_asm};

global_asm!(
	".pushsection .text.kboot_stubs, \"ax\"",
	".global kboot_transfer_stubs_start",
	"kboot_transfer_stubs_start:",
	// Switch to the kernel's page tables.
	"mov cr3, r8",
	// Kernel stack.
	"mov rsp, r9",
	// Entry protocol: magic and tag list pointer.
	"mov rdi, r10",
	"mov rsi, r11",
	// Push a zero return address to catch accidental returns.
	"push 0",
	"jmp r12",
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

/// Jumps into the trampoline page, entering the kernel. Never
/// returns.
///
/// # Safety
/// The point of no return. `trampoline_phys` must hold a copy of
/// [`stub_bytes`], be identity-mapped in the current address space
/// and mapped in the target tables rooted at `root_phys`; `stack_virt`
/// and `entry_virt` must be valid in the target tables. Interrupts
/// must already be disabled.
pub unsafe fn transfer(
	trampoline_phys: u64,
	root_phys: u64,
	stack_virt: u64,
	magic: u64,
	tags_virt: u64,
	entry_virt: u64,
) -> ! {
	// SAFETY: Assembly is unavoidable here; requirements offloaded
	// SAFETY: to the caller.
	unsafe {
		asm!(
			"jmp r13",
			in("r8") root_phys,
			in("r9") stack_virt,
			in("r10") magic,
			in("r11") tags_virt,
			in("r12") entry_virt,
			in("r13") trampoline_phys,
			options(noreturn)
		);
	}
}
