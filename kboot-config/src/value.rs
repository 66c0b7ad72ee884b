//! The configuration value model.

use alloc::{string::String, vec::Vec};
use core::fmt;

/// One parsed command: a name, its argument values and the source
/// line it started on.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
	/// The command name.
	pub name: String,
	/// The argument values.
	pub args: Vec<Value>,
	/// The 1-based source line.
	pub line: u32,
}

/// An ordered sequence of commands.
pub type CommandList = Vec<Command>;

/// A configuration value.
///
/// Values own their contents: cloning duplicates deeply, moving
/// transfers. Equality is structural.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	/// An integer.
	Integer(u64),
	/// A boolean.
	Boolean(bool),
	/// A string.
	String(String),
	/// A list of values.
	List(Vec<Value>),
	/// A block of commands.
	CommandList(CommandList),
	/// An unresolved `$NAME` reference. Resolved against the
	/// environment chain at execution time.
	Reference(String),
}

impl Value {
	/// A short name of the variant, for diagnostics.
	#[must_use]
	pub fn type_name(&self) -> &'static str {
		match self {
			Self::Integer(_) => "integer",
			Self::Boolean(_) => "boolean",
			Self::String(_) => "string",
			Self::List(_) => "list",
			Self::CommandList(_) => "block",
			Self::Reference(_) => "reference",
		}
	}

	/// Returns the integer payload, if this is an integer.
	#[must_use]
	pub fn as_integer(&self) -> Option<u64> {
		match self {
			Self::Integer(v) => Some(*v),
			_ => None,
		}
	}

	/// Returns the boolean payload, if this is a boolean.
	#[must_use]
	pub fn as_boolean(&self) -> Option<bool> {
		match self {
			Self::Boolean(v) => Some(*v),
			_ => None,
		}
	}

	/// Returns the string payload, if this is a string.
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(v) => Some(v),
			_ => None,
		}
	}

	/// Returns the list payload, if this is a list.
	#[must_use]
	pub fn as_list(&self) -> Option<&[Value]> {
		match self {
			Self::List(v) => Some(v),
			_ => None,
		}
	}

	/// Returns the command-list payload, if this is a block.
	#[must_use]
	pub fn as_command_list(&self) -> Option<&CommandList> {
		match self {
			Self::CommandList(v) => Some(v),
			_ => None,
		}
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Integer(v) => write!(f, "{v}"),
			Self::Boolean(v) => write!(f, "{v}"),
			Self::String(v) => {
				f.write_str("\"")?;
				for ch in v.chars() {
					match ch {
						'"' => f.write_str("\\\"")?,
						'\\' => f.write_str("\\\\")?,
						c => write!(f, "{c}")?,
					}
				}
				f.write_str("\"")
			}
			Self::List(items) => {
				f.write_str("[")?;
				for (i, item) in items.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					} else {
						f.write_str(" ")?;
					}
					write!(f, "{item}")?;
				}
				f.write_str(" ]")
			}
			Self::CommandList(commands) => {
				f.write_str("{")?;
				for command in commands {
					write!(f, " {}", command.name)?;
					for arg in &command.args {
						write!(f, " {arg}")?;
					}
					f.write_str(";")?;
				}
				f.write_str(" }")
			}
			Self::Reference(name) => write!(f, "${name}"),
		}
	}
}

/// Resolves `$NAME` references in an argument list, replacing each
/// with a deep copy of the value `lookup` yields.
///
/// Resolution recurses into lists but not into blocks: a block's
/// references resolve when (and if) the block itself executes.
/// Returns the name of the first reference `lookup` cannot supply.
pub fn resolve_references(
	args: &[Value],
	lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Vec<Value>, String> {
	let mut out = Vec::with_capacity(args.len());
	for arg in args {
		out.push(resolve_one(arg, lookup)?);
	}
	Ok(out)
}

/// Resolves one value; see [`resolve_references`].
fn resolve_one(
	value: &Value,
	lookup: &dyn Fn(&str) -> Option<Value>,
) -> Result<Value, String> {
	match value {
		Value::Reference(name) => lookup(name).ok_or_else(|| name.clone()),
		Value::List(items) => Ok(Value::List(resolve_references(items, lookup)?)),
		other => Ok(other.clone()),
	}
}
