//! The loader's own heap.
//!
//! `alloc::` collections (the range lists, config values, command
//! lists) are served by a buddy allocator over memory that is
//! *Internal* to the loader: a static bootstrap arena inside the
//! loader image, optionally grown with a carved-out physical range
//! once the physical memory manager is up. None of it survives into
//! the finalised map, so the kernel never sees loader heap structures.
//!
//! Hosted test builds (and the `std-alloc` feature) use the standard
//! library allocator instead; this module then only compiles its
//! interface.

use core::{
	alloc::{GlobalAlloc, Layout},
	ptr::NonNull,
};

use kboot_sync::SpinMutex;

/// Alias for a [`buddy_system_allocator::Heap`] with a pre-defined order.
type Heap = buddy_system_allocator::Heap<32>;

/// The global heap allocator for the loader.
#[cfg_attr(all(not(feature = "std-alloc"), not(test)), global_allocator)]
static ALLOCATOR: GlobalLockedHeap = GlobalLockedHeap(SpinMutex::new(Heap::empty()));

/// Newtype wrapper for the global allocator.
struct GlobalLockedHeap(SpinMutex<Heap>);

unsafe impl GlobalAlloc for GlobalLockedHeap {
	unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
		self.0
			.lock()
			.alloc(layout)
			.map(NonNull::as_ptr)
			.unwrap_or(core::ptr::null_mut())
	}

	unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
		if let Some(ptr) = NonNull::new(ptr) {
			self.0.lock().dealloc(ptr, layout);
		}
	}
}

/// Seeds the heap with the loader's static bootstrap arena.
///
/// Must run before the first `alloc::` use — in particular before the
/// physical memory manager records its first range.
///
/// # Safety
/// `start` must point at `size` bytes of unused, writable memory that
/// stays valid (and otherwise untouched) for the loader's lifetime.
/// Must be called at most once per region.
pub unsafe fn init(start: usize, size: usize) {
	// SAFETY: Requirements offloaded to the caller.
	unsafe {
		ALLOCATOR.0.lock().add_to_heap(start, start + size);
	}
}

/// Grows the heap with an additional region, typically an *Internal*
/// range carved from the physical memory manager.
///
/// # Safety
/// Identical to [`init`].
pub unsafe fn grow(start: usize, size: usize) {
	// SAFETY: Requirements offloaded to the caller.
	unsafe {
		ALLOCATOR.0.lock().add_to_heap(start, start + size);
	}
}
