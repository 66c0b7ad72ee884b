//! Synchronization primitives for the KBoot loader.
//!
//! The loader is single-threaded and runs with interrupts masked, so
//! there is no contention to arbitrate; the lock exists to make the
//! few process-wide statics (log ring, loader heap) sound `static`s
//! and to catch accidental re-entrancy.
#![cfg_attr(not(test), no_std)]

use core::{
	cell::UnsafeCell,
	ops::{Deref, DerefMut},
	sync::atomic::{
		AtomicBool,
		Ordering::{Acquire, Release},
	},
};

/// A simple unfair, greedy spinlock.
pub struct SpinMutex<T: Send + 'static> {
	/// The guarded value.
	value:  UnsafeCell<T>,
	/// Whether or not the lock is taken.
	locked: AtomicBool,
}

// SAFETY: We are implementing a safe interface around a mutex so we can assert `Sync`.
unsafe impl<T: Send + 'static> Sync for SpinMutex<T> {}

impl<T: Send + 'static> SpinMutex<T> {
	/// Creates a new spinlock mutex for the given value.
	pub const fn new(value: T) -> Self {
		Self {
			value:  UnsafeCell::new(value),
			locked: AtomicBool::new(false),
		}
	}

	/// Acquires the lock, blocking until it's available.
	pub fn lock(&self) -> SpinMutexGuard<'_, T> {
		loop {
			if !self.locked.swap(true, Acquire) {
				return SpinMutexGuard { lock: self };
			}

			core::hint::spin_loop();
		}
	}
}

/// Guard for [`SpinMutex`]; releases the lock on drop.
pub struct SpinMutexGuard<'a, T: Send + 'static> {
	/// A reference to the lock for which we have a guard.
	lock: &'a SpinMutex<T>,
}

impl<T: Send + 'static> Drop for SpinMutexGuard<'_, T> {
	fn drop(&mut self) {
		self.lock.locked.store(false, Release);
	}
}

impl<T: Send + 'static> Deref for SpinMutexGuard<'_, T> {
	type Target = T;

	fn deref(&self) -> &Self::Target {
		// SAFETY: We have guaranteed singular access as we're locked.
		unsafe { &*self.lock.value.get() }
	}
}

impl<T: Send + 'static> DerefMut for SpinMutexGuard<'_, T> {
	fn deref_mut(&mut self) -> &mut Self::Target {
		// SAFETY: We have guaranteed singular access as we're locked.
		unsafe { &mut *self.lock.value.get() }
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn lock_round_trip() {
		static COUNTER: SpinMutex<u32> = SpinMutex::new(0);

		*COUNTER.lock() += 1;
		*COUNTER.lock() += 1;
		assert_eq!(*COUNTER.lock(), 2);
	}
}
