//! I/O status taxonomy and the contracts through which the KBoot
//! loader core talks to the world around it.
//!
//! The core never owns a UART, a disk or a filesystem implementation;
//! those are collaborators supplied by the platform layer. This crate
//! pins down the exact surface the core consumes: block devices, the
//! filesystem handle/iterate/read contract, the console, and the
//! firmware memory-map provider.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod console;
mod device;
mod firmware;
mod fs;
mod status;

pub use self::{
	console::Console,
	device::{Device, DeviceRegistry},
	firmware::{FirmwareMemoryKind, FirmwareMemoryRegion},
	fs::{DirEntry, FileHandle, Filesystem, FilesystemDriver},
	status::{Result, Status},
};
