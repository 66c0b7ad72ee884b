//! x86 target support for the KBoot loader: page-table construction
//! in all three paging modes (32-bit plain, 32-bit PAE, 64-bit long
//! mode) and the trampoline that carries the CPU across the
//! MMU-enable boundary into the kernel.
//!
//! Table construction is pure data manipulation through the loader's
//! physical address translator and runs (and is tested) on any host;
//! only the transfer stubs are target-gated.
#![cfg_attr(not(test), no_std)]

pub mod mapper;
pub(crate) mod paging;

#[cfg(target_arch = "x86_64")]
pub mod xfer;

pub use self::mapper::{MmuContext, PagingMode};
