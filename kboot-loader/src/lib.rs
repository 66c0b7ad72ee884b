//! The KBoot loader core.
//!
//! This crate ties the pieces together: the physical memory manager
//! is populated from firmware, the configuration file is parsed and
//! executed to build the boot menu, the chosen entry selects a
//! loader, and the kboot loader path materialises the kernel —
//! MMU context, virtual window, ELF load, modules, memory
//! finalisation, tag stream, trampoline — before the one-way jump.
//!
//! The session is strictly serial and strictly ordered:
//! `Unconfigured → Parsed → LoaderSelected → Loaded → Finalised →
//! Entered`. Transitions are one-way; any fatal error before
//! `Finalised` is recoverable into the shell, after it the loader is
//! committed.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod commands;
pub mod loader;
pub mod menu;
pub mod mmu;
pub mod platform;
pub mod session;
pub mod video;

/// The configuration file looked for on the boot device when the
/// platform does not override it.
pub const DEFAULT_CONFIG_PATH: &str = "kboot.cfg";

pub use self::{
	commands::{builtin_registry, ConfigCtx, ConfigSource},
	loader::Loader,
	menu::{Menu, MenuEntry},
	mmu::BootMmu,
	platform::{populate_physical_memory, report_error},
	session::{
		load_kboot, BootPlan, KbootRequest, LoadSession, ModuleSource, PlatformInfo,
		SessionError, SessionState,
	},
	video::VideoMode,
};
