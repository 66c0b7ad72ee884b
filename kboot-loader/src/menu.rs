//! The boot menu model.
//!
//! The interactive menu UI lives outside the core; this module owns
//! the entries, the default-selection rules and the per-entry error
//! capture. An entry's command block is evaluated when the entry is
//! *chosen*, not when it is declared — a broken entry surfaces its
//! error at selection time and the rest of the menu stays usable.

use alloc::string::String;
use alloc::vec::Vec;

use kboot_config::{CommandList, Environment, ExecError, Value};

use crate::loader::Loader;

/// One menu entry.
pub struct MenuEntry {
	/// The entry title.
	pub title: String,
	/// The entry's environment; child of the root environment.
	pub env:   Environment<Loader>,
	/// The entry's command block, evaluated at selection.
	pub block: CommandList,
	/// The error captured by the last evaluation, if any.
	pub error: Option<ExecError>,
}

/// The boot menu.
#[derive(Default)]
pub struct Menu {
	/// The entries, in declaration order.
	pub entries: Vec<MenuEntry>,
	/// The `default` directive, a title or an index.
	pub default: Option<Value>,
}

impl Menu {
	/// Creates an empty menu.
	#[must_use]
	pub fn new() -> Self {
		Self {
			entries: Vec::new(),
			default: None,
		}
	}

	/// Resolves the default entry index.
	///
	/// A string matches by title, an integer by position. Anything
	/// that does not resolve — including an out-of-range index —
	/// silently selects the first entry.
	#[must_use]
	pub fn default_index(&self) -> usize {
		match &self.default {
			Some(Value::String(title)) => self
				.entries
				.iter()
				.position(|entry| entry.title == *title)
				.unwrap_or(0),
			Some(Value::Integer(index)) => {
				let index = *index as usize;
				if index < self.entries.len() { index } else { 0 }
			}
			_ => 0,
		}
	}
}

#[cfg(test)]
mod tests {
	use alloc::string::ToString;
	use alloc::vec;

	use super::*;

	fn entry(title: &str) -> MenuEntry {
		MenuEntry {
			title: title.to_string(),
			env:   Environment::new(),
			block: vec![],
			error: None,
		}
	}

	#[test]
	fn default_resolves_by_title() {
		let mut menu = Menu::new();
		menu.entries.push(entry("A"));
		menu.entries.push(entry("B"));
		menu.default = Some(Value::String("B".to_string()));

		assert_eq!(menu.default_index(), 1);
	}

	#[test]
	fn default_resolves_by_index() {
		let mut menu = Menu::new();
		menu.entries.push(entry("A"));
		menu.entries.push(entry("B"));
		menu.default = Some(Value::Integer(1));

		assert_eq!(menu.default_index(), 1);
	}

	#[test]
	fn out_of_range_default_selects_first() {
		let mut menu = Menu::new();
		menu.entries.push(entry("A"));
		menu.entries.push(entry("B"));
		menu.default = Some(Value::Integer(2));

		assert_eq!(menu.default_index(), 0);
	}

	#[test]
	fn unknown_title_selects_first() {
		let mut menu = Menu::new();
		menu.entries.push(entry("A"));
		menu.default = Some(Value::String("missing".to_string()));

		assert_eq!(menu.default_index(), 0);
	}
}
