//! Environments: the mutable state configuration commands act on.

use alloc::{
	string::{String, ToString},
	vec::Vec,
};

use crate::value::Value;

/// An environment: an ordered name → value mapping plus the loader
/// slots.
///
/// Environments form a parent chain for lookup — a menu entry's
/// environment falls back to the root — while writes always target
/// the leaf. The chain is expressed at execution time by the caller
/// (which owns both ends); an environment itself only stores its own
/// bindings.
///
/// `L` is the selected-loader payload: the loader core instantiates
/// it with its closed loader sum, carrying both the operations and
/// their private state.
pub struct Environment<L> {
	/// Name → value bindings, in insertion order.
	values:        Vec<(String, Value)>,
	/// The current device name.
	pub device:    Option<String>,
	/// The current directory within the device.
	pub directory: Option<String>,
	/// The selected loader and its private state.
	pub loader:    Option<L>,
}

impl<L> Environment<L> {
	/// Creates an empty environment.
	#[must_use]
	pub fn new() -> Self {
		Self {
			values:    Vec::new(),
			device:    None,
			directory: None,
			loader:    None,
		}
	}

	/// Creates a child environment for a nested scope.
	///
	/// The child inherits the parent's device and directory; value
	/// lookups fall back to the parent through
	/// [`Environment::lookup_chained`].
	#[must_use]
	pub fn new_child(&self) -> Self {
		Self {
			values:    Vec::new(),
			device:    self.device.clone(),
			directory: self.directory.clone(),
			loader:    None,
		}
	}

	/// Looks a name up in this environment only.
	#[must_use]
	pub fn lookup(&self, name: &str) -> Option<&Value> {
		self.values
			.iter()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value)
	}

	/// Looks a name up in this environment, falling back through the
	/// given parent chain, innermost first.
	#[must_use]
	pub fn lookup_chained<'a>(
		&'a self,
		parents: &[&'a Environment<L>],
		name: &str,
	) -> Option<&'a Value> {
		self.lookup(name)
			.or_else(|| parents.iter().find_map(|env| env.lookup(name)))
	}

	/// Inserts or replaces a binding. Insertion order is preserved;
	/// replacement keeps the original position.
	pub fn insert(&mut self, name: &str, value: Value) {
		if let Some(slot) = self
			.values
			.iter_mut()
			.find(|(key, _)| key == name)
			.map(|(_, value)| value)
		{
			*slot = value;
		} else {
			self.values.push((name.to_string(), value));
		}
	}

	/// Removes a binding, returning its value.
	pub fn remove(&mut self, name: &str) -> Option<Value> {
		let index = self.values.iter().position(|(key, _)| key == name)?;
		Some(self.values.remove(index).1)
	}

	/// Iterates the bindings in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.values.iter().map(|(key, value)| (key.as_str(), value))
	}
}

impl<L> Default for Environment<L> {
	fn default() -> Self {
		Self::new()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn insert_preserves_order_and_replaces_in_place() {
		let mut env = Environment::<()>::new();
		env.insert("a", Value::Integer(1));
		env.insert("b", Value::Integer(2));
		env.insert("a", Value::Integer(3));

		let names: alloc::vec::Vec<&str> = env.iter().map(|(name, _)| name).collect();
		assert_eq!(names, ["a", "b"]);
		assert_eq!(env.lookup("a"), Some(&Value::Integer(3)));
	}

	#[test]
	fn chained_lookup_prefers_the_leaf() {
		let mut root = Environment::<()>::new();
		root.insert("timeout", Value::Integer(5));
		root.insert("hidden", Value::Boolean(false));

		let mut child = root.new_child();
		child.insert("timeout", Value::Integer(1));

		assert_eq!(
			child.lookup_chained(&[&root], "timeout"),
			Some(&Value::Integer(1))
		);
		assert_eq!(
			child.lookup_chained(&[&root], "hidden"),
			Some(&Value::Boolean(false))
		);
		assert_eq!(child.lookup_chained(&[&root], "missing"), None);
	}

	#[test]
	fn child_inherits_device_and_directory() {
		let mut root = Environment::<()>::new();
		root.device = Some("hd0".into());
		root.directory = Some("/boot".into());

		let child = root.new_child();
		assert_eq!(child.device.as_deref(), Some("hd0"));
		assert_eq!(child.directory.as_deref(), Some("/boot"));
	}
}
