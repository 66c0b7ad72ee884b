//! Block device contract and the device registry.

use alloc::{boxed::Box, string::String, vec::Vec};

use crate::status::Result;

/// A block-addressable device the loader can read from.
///
/// Implementations live outside the core (disk, partition, network
/// image, firmware protocol). The core only ever reads.
pub trait Device {
	/// The registry name of the device, e.g. `hd0` or `net0`.
	fn name(&self) -> &str;

	/// A one-line identification string for diagnostics, e.g. the
	/// model string reported by the hardware.
	fn identify(&self) -> String;

	/// Reads `buf.len()` bytes starting at byte `offset`.
	///
	/// Short reads are errors; on success the whole buffer is filled.
	fn read(&mut self, buf: &mut [u8], offset: u64) -> Result<()>;
}

/// Owner of every device known to the loader.
///
/// The registry is created by platform initialisation and passed down
/// explicitly; there is no global device list.
#[derive(Default)]
pub struct DeviceRegistry {
	/// Registered devices, in discovery order.
	devices: Vec<Box<dyn Device>>,
}

impl DeviceRegistry {
	/// Creates an empty registry.
	#[must_use]
	pub fn new() -> Self {
		Self {
			devices: Vec::new(),
		}
	}

	/// Registers a device. Discovery order is preserved.
	pub fn register(&mut self, device: Box<dyn Device>) {
		self.devices.push(device);
	}

	/// Looks a device up by registry name.
	pub fn lookup(&mut self, name: &str) -> Option<&mut (dyn Device + 'static)> {
		self.devices
			.iter_mut()
			.find(|d| d.name() == name)
			.map(|d| &mut **d)
	}

	/// Returns the number of registered devices.
	#[must_use]
	pub fn len(&self) -> usize {
		self.devices.len()
	}

	/// Returns `true` if no devices are registered.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.devices.is_empty()
	}
}
