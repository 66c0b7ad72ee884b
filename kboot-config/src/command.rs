//! The command registry and dispatch.
//!
//! The command set is statically known; a registry is an explicit
//! table owned by whoever drives execution (there is no global
//! registry). Handlers are plain functions over a caller-supplied
//! context type, which carries the environment chain and whatever
//! else the handlers need.

use alloc::string::String;
use core::fmt;

use kboot_io::Status;

use crate::value::{CommandList, Value};

/// A command handler error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
	/// The command name is not in the registry.
	UnknownCommand(String),
	/// The arguments do not match what the command expects; the
	/// payload describes the expected shape.
	BadArguments(&'static str),
	/// A `$NAME` reference did not resolve; the payload is the name.
	UnresolvedReference(String),
	/// An I/O-bearing operation failed.
	Io(Status),
}

impl From<Status> for CommandError {
	fn from(status: Status) -> Self {
		Self::Io(status)
	}
}

impl fmt::Display for CommandError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::UnknownCommand(name) => write!(f, "unknown command '{name}'"),
			Self::BadArguments(expected) => write!(f, "expected {expected}"),
			Self::UnresolvedReference(name) => write!(f, "undefined variable '{name}'"),
			Self::Io(status) => write!(f, "{status}"),
		}
	}
}

/// A command execution error, annotated with the source line of the
/// failing command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecError {
	/// The 1-based source line of the failing command.
	pub line:  u32,
	/// What went wrong.
	pub error: CommandError,
}

impl fmt::Display for ExecError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}: {}", self.line, self.error)
	}
}

/// One command definition.
pub struct CommandDef<C> {
	/// The command name as written in configuration files.
	pub name:    &'static str,
	/// The handler. Receives the execution context and the command's
	/// argument values (references already resolved by the caller's
	/// context, see [`crate::resolve_references`]).
	pub handler: fn(&mut C, &[Value]) -> Result<(), CommandError>,
}

/// A static command registry over a context type.
pub struct CommandRegistry<C: 'static> {
	/// The command table.
	commands: &'static [CommandDef<C>],
}

impl<C> CommandRegistry<C> {
	/// Creates a registry over a static table.
	#[must_use]
	pub const fn new(commands: &'static [CommandDef<C>]) -> Self {
		Self { commands }
	}

	/// Looks a handler up by name.
	#[must_use]
	pub fn lookup(&self, name: &str) -> Option<&CommandDef<C>> {
		self.commands.iter().find(|def| def.name == name)
	}

	/// Executes a command list against `ctx`, stopping at the first
	/// error.
	///
	/// Callers running a nested scope (a menu entry's block) call
	/// this themselves and decide whether the error propagates or is
	/// captured against the scope — that is the error-handler stack.
	pub fn execute(&self, ctx: &mut C, commands: &CommandList) -> Result<(), ExecError> {
		for command in commands {
			let def = self.lookup(&command.name).ok_or_else(|| {
				ExecError {
					line:  command.line,
					error: CommandError::UnknownCommand(command.name.clone()),
				}
			})?;

			(def.handler)(ctx, &command.args).map_err(|error| {
				ExecError {
					line: command.line,
					error,
				}
			})?;
		}

		Ok(())
	}
}
