//! Platform glue: the seams between the loader core and the
//! firmware/driver layers around it.

use kboot_debug::{dbg, dbg_err};
use kboot_io::{Console, FirmwareMemoryKind, FirmwareMemoryRegion};
use kboot_mem::{
	phys::{PhysicalMemory, RangeType},
	translate::PhysicalAddressTranslator,
};

use crate::session::SessionError;

/// Feeds a firmware-described memory map into the physical memory
/// manager.
///
/// Usable memory becomes `Free`, firmware-reclaimable memory becomes
/// `Reclaimable`; reserved regions are never learned at all, so
/// nothing the loader does can ever place an allocation there. The
/// platform is expected to [`PhysicalMemory::protect`] the loader's
/// own image afterwards.
pub fn populate_physical_memory<T: PhysicalAddressTranslator>(
	pmm: &mut PhysicalMemory<T>,
	regions: impl IntoIterator<Item = FirmwareMemoryRegion>,
) {
	for region in regions {
		match region.kind {
			FirmwareMemoryKind::Usable => {
				pmm.add_range(region.start, region.length, RangeType::Free);
			}
			FirmwareMemoryKind::Reclaimable => {
				pmm.add_range(region.start, region.length, RangeType::Reclaimable);
			}
			FirmwareMemoryKind::Reserved => {}
		}
	}

	dbg!("phys: {} ranges learned from firmware", pmm.ranges().len());
}

/// Reports a session error on the main console and in the boot log.
///
/// This is the recoverable path: the caller re-enters its shell (or
/// halts) afterwards.
pub fn report_error(console: &mut dyn Console, error: &SessionError) {
	let line = alloc::format!("boot error: {error}");
	console.put_str(&line);
	console.putc(b'\n');
	dbg_err!("{}", line);
}

#[cfg(test)]
mod tests {
	use kboot_io::Status;
	use kboot_mem::translate::OffsetTranslator;

	use super::*;

	#[test]
	fn firmware_map_population() {
		let mut pmm = PhysicalMemory::new(OffsetTranslator::identity());
		populate_physical_memory(&mut pmm, [
			FirmwareMemoryRegion {
				start:  0x0,
				length: 0x8000,
				kind:   FirmwareMemoryKind::Usable,
			},
			FirmwareMemoryRegion {
				start:  0x8000,
				length: 0x2000,
				kind:   FirmwareMemoryKind::Reserved,
			},
			FirmwareMemoryRegion {
				start:  0xA000,
				length: 0x1000,
				kind:   FirmwareMemoryKind::Reclaimable,
			},
		]);

		let ranges = pmm.ranges();
		assert_eq!(ranges.len(), 2);
		assert_eq!(ranges[0].ty, RangeType::Free);
		assert_eq!(ranges[0].size, 0x8000);
		// The reserved region was never learned.
		assert_eq!(ranges[1].start, 0xA000);
		assert_eq!(ranges[1].ty, RangeType::Reclaimable);
	}

	#[test]
	fn errors_reach_the_console() {
		struct Sink(Vec<u8>);
		impl Console for Sink {
			fn putc(&mut self, byte: u8) {
				self.0.push(byte);
			}

			fn getc(&mut self) -> kboot_io::Result<u8> {
				Err(Status::NotSupported)
			}

			fn poll(&mut self) -> bool {
				false
			}
		}

		let mut console = Sink(Vec::new());
		report_error(&mut console, &SessionError::Status(Status::NotFound));
		assert_eq!(console.0, b"boot error: not found\n");
	}
}
