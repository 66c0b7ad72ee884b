//! The loader's MAIR layout.
//!
//! Every leaf entry selects its memory attributes through an index
//! into `MAIR_EL1`; the kernel is entered with the register holding
//! exactly this layout, so the indices baked into the page tables
//! stay meaningful.

/// The MAIR indices used by the loader's page tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MairIndex {
	/// Normal memory, write-back, read/write-allocate.
	NormalWriteBack    = 0,
	/// Normal memory, write-through.
	NormalWriteThrough = 1,
	/// Device-nGnRnE.
	Device             = 2,
}

impl MairIndex {
	/// Returns the index value for use in a descriptor's `AttrIndx`.
	#[inline]
	#[must_use]
	pub const fn index(self) -> u64 {
		self as u64
	}

	/// The attribute byte encoded at this index.
	const fn attribute(self) -> u64 {
		match self {
			// Outer/inner write-back non-transient, R/W allocate.
			Self::NormalWriteBack => 0xFF,
			// Outer/inner write-through non-transient.
			Self::NormalWriteThrough => 0xBB,
			// Device-nGnRnE.
			Self::Device => 0x00,
		}
	}
}

/// Builds the `MAIR_EL1` value matching [`MairIndex`].
#[must_use]
pub const fn mair_value() -> u64 {
	(MairIndex::NormalWriteBack.attribute() << (8 * MairIndex::NormalWriteBack.index()))
		| (MairIndex::NormalWriteThrough.attribute() << (8 * MairIndex::NormalWriteThrough.index()))
		| (MairIndex::Device.attribute() << (8 * MairIndex::Device.index()))
}
