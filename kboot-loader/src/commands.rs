//! The built-in configuration command set.
//!
//! Commands execute against a [`ConfigCtx`]: the root environment,
//! the menu under construction, and the scope marker saying which
//! environment writes currently target. Entry blocks are *stored* at
//! declaration and evaluated at selection time, so a broken entry is
//! reported when it is chosen — the per-scope error capture the
//! configuration engine prescribes.

use alloc::{boxed::Box, string::String, vec::Vec};

use kboot_config::{
	parse_str, resolve_references, CommandDef, CommandError, CommandList, CommandRegistry,
	Environment, ExecError, Value,
};
use kboot_debug::{dbg, dbg_err};
use kboot_io::Status;

use crate::{loader::Loader, menu::Menu, menu::MenuEntry, video::VideoMode};

/// Maximum `include` nesting.
const MAX_INCLUDE_DEPTH: u32 = 8;

/// Access to further configuration files, for `include`.
pub trait ConfigSource {
	/// Reads the configuration file at `path` into a string.
	fn read_config(&mut self, path: &str) -> Result<String, Status>;
}

/// The execution context of the configuration engine.
pub struct ConfigCtx {
	/// The root environment.
	pub root:      Environment<Loader>,
	/// The menu under construction.
	pub menu:      Menu,
	/// Which menu entry's environment writes target; `None` at the
	/// root scope.
	current:       Option<usize>,
	/// Current `include` nesting depth.
	include_depth: u32,
	/// Where `include` reads from, when available.
	pub source:    Option<Box<dyn ConfigSource>>,
}

impl ConfigCtx {
	/// Creates a context with an empty root environment and menu.
	#[must_use]
	pub fn new() -> Self {
		Self {
			root:          Environment::new(),
			menu:          Menu::new(),
			current:       None,
			include_depth: 0,
			source:        None,
		}
	}

	/// Executes a top-level command list.
	pub fn run(&mut self, commands: &CommandList) -> Result<(), ExecError> {
		builtin_registry().execute(self, commands)
	}

	/// Evaluates the block of menu entry `index`.
	///
	/// An error is recorded against the entry (and returned); other
	/// entries and the root scope are unaffected.
	pub fn evaluate_entry(&mut self, index: usize) -> Result<(), ExecError> {
		let block = self.menu.entries[index].block.clone();

		self.current = Some(index);
		let result = builtin_registry().execute(self, &block);
		self.current = None;

		if let Err(err) = &result {
			dbg_err!("config: entry '{}': {}", self.menu.entries[index].title, err);
			self.menu.entries[index].error = Some(err.clone());
		}
		result
	}

	/// The environment writes currently target.
	pub fn write_env(&mut self) -> &mut Environment<Loader> {
		match self.current {
			Some(index) => &mut self.menu.entries[index].env,
			None => &mut self.root,
		}
	}

	/// Chain lookup: the current entry's environment first, then the
	/// root. Returns a deep copy.
	#[must_use]
	pub fn lookup_value(&self, name: &str) -> Option<Value> {
		if let Some(index) = self.current {
			if let Some(value) = self.menu.entries[index].env.lookup(name) {
				return Some(value.clone());
			}
		}
		self.root.lookup(name).cloned()
	}

	/// Resolves `$NAME` references in an argument list against the
	/// environment chain.
	pub fn resolve(&self, args: &[Value]) -> Result<Vec<Value>, CommandError> {
		resolve_references(args, &|name| self.lookup_value(name))
			.map_err(CommandError::UnresolvedReference)
	}
}

impl Default for ConfigCtx {
	fn default() -> Self {
		Self::new()
	}
}

/// Returns the built-in command registry.
#[must_use]
pub fn builtin_registry() -> CommandRegistry<ConfigCtx> {
	CommandRegistry::new(COMMANDS)
}

/// The built-in command table.
static COMMANDS: &[CommandDef<ConfigCtx>] = &[
	CommandDef {
		name:    "set",
		handler: cmd_set,
	},
	CommandDef {
		name:    "include",
		handler: cmd_include,
	},
	CommandDef {
		name:    "device",
		handler: cmd_device,
	},
	CommandDef {
		name:    "chain",
		handler: cmd_chain,
	},
	CommandDef {
		name:    "entry",
		handler: cmd_entry,
	},
	CommandDef {
		name:    "kboot",
		handler: cmd_kboot,
	},
	CommandDef {
		name:    "linux",
		handler: cmd_linux,
	},
	CommandDef {
		name:    "multiboot",
		handler: cmd_multiboot,
	},
	CommandDef {
		name:    "video",
		handler: cmd_video,
	},
	CommandDef {
		name:    "menu-style",
		handler: cmd_menu_style,
	},
	CommandDef {
		name:    "timeout",
		handler: cmd_timeout,
	},
	CommandDef {
		name:    "hidden",
		handler: cmd_hidden,
	},
	CommandDef {
		name:    "default",
		handler: cmd_default,
	},
];

/// `set NAME VALUE` — binds a value in the current environment.
fn cmd_set(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::String(name), value] = args.as_slice() else {
		return Err(CommandError::BadArguments("set \"NAME\" VALUE"));
	};
	if matches!(value, Value::CommandList(_)) {
		return Err(CommandError::BadArguments("set \"NAME\" VALUE"));
	}

	ctx.write_env().insert(name, value.clone());
	Ok(())
}

/// `include PATH` — parses and executes another configuration file
/// in the current scope.
fn cmd_include(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::String(path)] = args.as_slice() else {
		return Err(CommandError::BadArguments("include \"PATH\""));
	};
	if ctx.include_depth >= MAX_INCLUDE_DEPTH {
		return Err(CommandError::BadArguments("include nested too deeply"));
	}

	let Some(source) = ctx.source.as_mut() else {
		return Err(Status::NotSupported.into());
	};
	let text = source.read_config(path)?;
	let commands = parse_str(&text).map_err(|err| {
		dbg_err!("config: {}: {}", path, err);
		CommandError::Io(Status::InvalidArgument)
	})?;

	dbg!("config: including {}", path);
	ctx.include_depth += 1;
	let result = builtin_registry().execute(ctx, &commands);
	ctx.include_depth -= 1;
	result.map_err(|err| {
		dbg_err!("config: {}: line {}", path, err.line);
		err.error
	})
}

/// `device NAME` — switches the current device.
fn cmd_device(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::String(name)] = args.as_slice() else {
		return Err(CommandError::BadArguments("device \"NAME\""));
	};

	ctx.write_env().device = Some(name.clone());
	Ok(())
}

/// `chain [PATH]` — selects the chain loader.
fn cmd_chain(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let path = match args.as_slice() {
		[] => None,
		[Value::String(path)] => Some(path.clone()),
		_ => return Err(CommandError::BadArguments("chain [\"PATH\"]")),
	};

	ctx.write_env().loader = Some(Loader::Chain { path });
	Ok(())
}

/// `entry TITLE { … }` — declares a menu entry. The block is stored,
/// not executed; it runs when the entry is selected.
fn cmd_entry(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	if ctx.current.is_some() {
		return Err(CommandError::BadArguments("entry at the top level only"));
	}
	let [Value::String(title), Value::CommandList(block)] = args else {
		return Err(CommandError::BadArguments("entry \"TITLE\" { … }"));
	};

	let env = ctx.root.new_child();
	ctx.menu.entries.push(MenuEntry {
		title: title.clone(),
		env,
		block: block.clone(),
		error: None,
	});
	Ok(())
}

/// Extracts the `PATH [MODULES]` argument shape shared by `kboot`
/// and `multiboot`.
fn path_and_modules(args: &[Value]) -> Result<(String, Vec<String>), CommandError> {
	let (path, module_values) = match args {
		[Value::String(path)] => (path.clone(), &[] as &[Value]),
		[Value::String(path), Value::List(modules)] => (path.clone(), modules.as_slice()),
		_ => return Err(CommandError::BadArguments("\"PATH\" [MODULE-LIST]")),
	};

	let mut modules = Vec::with_capacity(module_values.len());
	for value in module_values {
		let Value::String(module) = value else {
			return Err(CommandError::BadArguments("\"PATH\" [MODULE-LIST]"));
		};
		modules.push(module.clone());
	}

	Ok((path, modules))
}

/// `kboot PATH [MODULES]` — selects the kboot loader.
fn cmd_kboot(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let (path, modules) = path_and_modules(&args)?;

	ctx.write_env().loader = Some(Loader::Kboot { path, modules });
	Ok(())
}

/// `linux PATH [INITRD [CMDLINE]]` — selects the Linux loader.
fn cmd_linux(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let (path, initrd, cmdline) = match args.as_slice() {
		[Value::String(path)] => (path.clone(), None, None),
		[Value::String(path), Value::String(initrd)] => {
			(path.clone(), Some(initrd.clone()), None)
		}
		[Value::String(path), Value::String(initrd), Value::String(cmdline)] => {
			(path.clone(), Some(initrd.clone()), Some(cmdline.clone()))
		}
		_ => {
			return Err(CommandError::BadArguments(
				"linux \"PATH\" [\"INITRD\" [\"CMDLINE\"]]",
			));
		}
	};

	ctx.write_env().loader = Some(Loader::Linux {
		path,
		initrd,
		cmdline,
	});
	Ok(())
}

/// `multiboot PATH [MODULES]` — selects the Multiboot loader.
fn cmd_multiboot(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let (path, modules) = path_and_modules(&args)?;

	ctx.write_env().loader = Some(Loader::Multiboot { path, modules });
	Ok(())
}

/// `video MODE` — requests a video mode for the kernel.
fn cmd_video(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::String(spec)] = args.as_slice() else {
		return Err(CommandError::BadArguments("video \"WIDTHxHEIGHT[xBPP]\""));
	};
	if VideoMode::parse(spec).is_none() {
		return Err(CommandError::BadArguments("video \"WIDTHxHEIGHT[xBPP]\""));
	}

	ctx.write_env().insert("video_mode", Value::String(spec.clone()));
	Ok(())
}

/// `menu-style { … }` — accepted and ignored; menu presentation is
/// outside the core.
fn cmd_menu_style(_ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let [Value::CommandList(_)] = args else {
		return Err(CommandError::BadArguments("menu-style { … }"));
	};
	Ok(())
}

/// `timeout SECONDS` — the menu timeout.
fn cmd_timeout(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::Integer(seconds)] = args.as_slice() else {
		return Err(CommandError::BadArguments("timeout SECONDS"));
	};

	ctx.write_env().insert("timeout", Value::Integer(*seconds));
	Ok(())
}

/// `hidden BOOL` — whether the menu starts hidden.
fn cmd_hidden(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	let args = ctx.resolve(args)?;
	let [Value::Boolean(hidden)] = args.as_slice() else {
		return Err(CommandError::BadArguments("hidden BOOL"));
	};

	ctx.write_env().insert("hidden", Value::Boolean(*hidden));
	Ok(())
}

/// `default TITLE-OR-INDEX` — the default menu entry.
fn cmd_default(ctx: &mut ConfigCtx, args: &[Value]) -> Result<(), CommandError> {
	if ctx.current.is_some() {
		return Err(CommandError::BadArguments("default at the top level only"));
	}
	let args = ctx.resolve(args)?;
	match args.as_slice() {
		[value @ (Value::String(_) | Value::Integer(_))] => {
			ctx.menu.default = Some(value.clone());
			Ok(())
		}
		_ => Err(CommandError::BadArguments("default TITLE-OR-INDEX")),
	}
}
