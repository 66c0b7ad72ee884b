//! The loader selection.
//!
//! The set of loaders is closed and statically known, so it is a
//! plain sum carrying each loader's private state — what a config
//! command stored into the environment when it ran. Only the kboot
//! arm has a load path in the core; the others name well-understood
//! external implementations and report as unsupported here.

use alloc::{string::String, vec::Vec};

/// A selected loader with its private state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loader {
	/// Load a KBoot-protocol kernel, with optional boot modules.
	Kboot {
		/// Path to the kernel image.
		path:    String,
		/// Paths of the modules to load.
		modules: Vec<String>,
	},
	/// Load a Linux kernel.
	Linux {
		/// Path to the kernel image.
		path:    String,
		/// Path to the initial ramdisk, if any.
		initrd:  Option<String>,
		/// Kernel command line, if any.
		cmdline: Option<String>,
	},
	/// Load a Multiboot kernel, with optional modules.
	Multiboot {
		/// Path to the kernel image.
		path:    String,
		/// Paths of the modules to load.
		modules: Vec<String>,
	},
	/// Chain-load another boot sector or loader image.
	Chain {
		/// Path to the image; `None` chains the current device's
		/// boot sector.
		path: Option<String>,
	},
}

impl Loader {
	/// The loader's name, as used in configuration and diagnostics.
	#[must_use]
	pub fn name(&self) -> &'static str {
		match self {
			Self::Kboot { .. } => "kboot",
			Self::Linux { .. } => "linux",
			Self::Multiboot { .. } => "multiboot",
			Self::Chain { .. } => "chain",
		}
	}
}
