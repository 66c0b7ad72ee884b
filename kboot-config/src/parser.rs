//! The recursive-descent parser and the pretty-printer.

use alloc::{
	format,
	string::String,
	vec::Vec,
};

use crate::{
	lexer::{CharSource, ParseError, StrSource, Token, Tokenizer},
	value::{Command, CommandList, Value},
};

/// Parses a whole configuration source into a [`CommandList`].
pub fn parse<S: CharSource>(source: S) -> Result<CommandList, ParseError> {
	let mut parser = Parser {
		tokenizer: Tokenizer::new(source),
		peeked:    None,
	};
	parser.parse_commands(false)
}

/// Parses an in-memory string into a [`CommandList`].
pub fn parse_str(input: &str) -> Result<CommandList, ParseError> {
	parse(StrSource::new(input))
}

/// The parser state.
struct Parser<S: CharSource> {
	/// The token source.
	tokenizer: Tokenizer<S>,
	/// One token of lookahead.
	peeked:    Option<Token>,
}

impl<S: CharSource> Parser<S> {
	/// Pulls the next token.
	fn next_token(&mut self) -> Result<Option<Token>, ParseError> {
		if let Some(token) = self.peeked.take() {
			return Ok(Some(token));
		}
		self.tokenizer.next_token()
	}

	/// Peeks at the next token without consuming it.
	fn peek_token(&mut self) -> Result<Option<&Token>, ParseError> {
		if self.peeked.is_none() {
			self.peeked = self.tokenizer.next_token()?;
		}
		Ok(self.peeked.as_ref())
	}

	/// Parses commands until end of input, or until the closing brace
	/// of a block when `in_block`.
	fn parse_commands(&mut self, in_block: bool) -> Result<CommandList, ParseError> {
		let mut commands = Vec::new();

		loop {
			match self.next_token()? {
				None => {
					if in_block {
						return Err(ParseError::UnexpectedEof {
							line: self.tokenizer.line(),
						});
					}
					return Ok(commands);
				}
				Some(Token::Terminator) => {}
				Some(Token::BlockEnd) if in_block => return Ok(commands),
				Some(Token::Ident(name)) => {
					let line = self.tokenizer.line();
					let (args, closed_block) = self.parse_arguments(in_block)?;
					commands.push(Command { name, args, line });
					if closed_block {
						return Ok(commands);
					}
				}
				Some(_) => {
					return Err(ParseError::UnexpectedToken {
						line: self.tokenizer.line(),
					});
				}
			}
		}
	}

	/// Parses the arguments of one command, up to its terminator.
	///
	/// Returns the values and whether the terminator was the closing
	/// brace of the enclosing block (which is consumed).
	fn parse_arguments(&mut self, in_block: bool) -> Result<(Vec<Value>, bool), ParseError> {
		let mut args = Vec::new();

		loop {
			match self.peek_token()? {
				None | Some(Token::Terminator) => {
					let _ = self.next_token()?;
					return Ok((args, false));
				}
				Some(Token::BlockEnd) if in_block => {
					let _ = self.next_token()?;
					return Ok((args, true));
				}
				_ => args.push(self.parse_argument()?),
			}
		}
	}

	/// Parses one argument value.
	fn parse_argument(&mut self) -> Result<Value, ParseError> {
		match self.next_token()? {
			Some(Token::Integer(v)) => Ok(Value::Integer(v)),
			Some(Token::Boolean(v)) => Ok(Value::Boolean(v)),
			Some(Token::Str(v)) => Ok(Value::String(v)),
			Some(Token::Reference(name)) => Ok(Value::Reference(name)),
			Some(Token::ListStart) => self.parse_list(),
			Some(Token::BlockStart) => Ok(Value::CommandList(self.parse_commands(true)?)),
			Some(_) => Err(ParseError::UnexpectedToken {
				line: self.tokenizer.line(),
			}),
			None => Err(ParseError::UnexpectedEof {
				line: self.tokenizer.line(),
			}),
		}
	}

	/// Parses a list, after the opening bracket.
	fn parse_list(&mut self) -> Result<Value, ParseError> {
		let mut items = Vec::new();
		let mut expect_item = true;

		loop {
			match self.peek_token()? {
				None => {
					return Err(ParseError::UnexpectedEof {
						line: self.tokenizer.line(),
					});
				}
				// Newlines are insignificant inside lists.
				Some(Token::Terminator) => {
					let _ = self.next_token()?;
				}
				Some(Token::ListEnd) => {
					let _ = self.next_token()?;
					return Ok(Value::List(items));
				}
				Some(Token::Comma) => {
					if expect_item {
						return Err(ParseError::UnexpectedToken {
							line: self.tokenizer.line(),
						});
					}
					let _ = self.next_token()?;
					expect_item = true;
				}
				_ => {
					if !expect_item {
						return Err(ParseError::UnexpectedToken {
							line: self.tokenizer.line(),
						});
					}
					items.push(self.parse_argument()?);
					expect_item = false;
				}
			}
		}
	}
}

/// Pretty-prints a command list back into parseable source text.
///
/// Parsing the result yields a command list structurally equal to the
/// input (source lines aside).
#[must_use]
pub fn pretty_print(commands: &CommandList) -> String {
	let mut out = String::new();
	print_commands(commands, 0, &mut out);
	out
}

/// Prints `commands` at the given indentation depth.
fn print_commands(commands: &CommandList, depth: usize, out: &mut String) {
	for command in commands {
		for _ in 0..depth {
			out.push('\t');
		}
		out.push_str(&command.name);
		for arg in &command.args {
			out.push(' ');
			print_value(arg, depth, out);
		}
		out.push('\n');
	}
}

/// Prints one value at the given indentation depth.
fn print_value(value: &Value, depth: usize, out: &mut String) {
	match value {
		Value::CommandList(commands) => {
			out.push_str("{\n");
			print_commands(commands, depth + 1, out);
			for _ in 0..depth {
				out.push('\t');
			}
			out.push('}');
		}
		Value::List(items) => {
			out.push('[');
			for (i, item) in items.iter().enumerate() {
				if i > 0 {
					out.push(',');
				}
				out.push(' ');
				print_value(item, depth, out);
			}
			out.push_str(" ]");
		}
		other => out.push_str(&format!("{other}")),
	}
}
