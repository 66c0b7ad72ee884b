//! Video mode specifications.
//!
//! The `video` command takes a textual mode specification of the
//! form `WIDTHxHEIGHT` or `WIDTHxHEIGHTxBPP`. Actually setting the
//! mode is the platform's business; the core validates the request,
//! carries it in the environment and echoes the result through the
//! `Video` tag.

use core::fmt;

/// A requested video mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
	/// Horizontal resolution in pixels.
	pub width:  u32,
	/// Vertical resolution in pixels.
	pub height: u32,
	/// Bits per pixel; 0 means "whatever the platform prefers".
	pub bpp:    u32,
}

impl VideoMode {
	/// Parses a `WIDTHxHEIGHT[xBPP]` specification.
	pub fn parse(spec: &str) -> Option<Self> {
		let mut parts = spec.split('x');
		let width = parts.next()?.parse().ok()?;
		let height = parts.next()?.parse().ok()?;
		let bpp = match parts.next() {
			Some(part) => part.parse().ok()?,
			None => 0,
		};
		if parts.next().is_some() || width == 0 || height == 0 {
			return None;
		}

		Some(Self { width, height, bpp })
	}
}

impl fmt::Display for VideoMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if self.bpp == 0 {
			write!(f, "{}x{}", self.width, self.height)
		} else {
			write!(f, "{}x{}x{}", self.width, self.height, self.bpp)
		}
	}
}
