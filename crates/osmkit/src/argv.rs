//! Argument vector composition from a small printf-like template.
//!
//! Only `%d`/`%i` (integers) and `%s` (strings) are conversions. Each one
//! consumes the next value and becomes exactly one argument. Any other text
//! in the template, unknown markers included, is description only and never
//! reaches the child.

use crate::error::ArgvError;

/// Total slots, the program name included.
pub const ARGV_SLOTS: usize = 10;
/// Longest single argument, in bytes.
pub const ARG_MAX_LEN: usize = 99;

pub const DEFAULT_PROGRAM: &str = "osm";
pub const DEFAULT_TEMPLATE: &str = "Get the pid of the programme %i";

/// A value consumed by a conversion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgValue {
	Int(i64),
	Str(String),
	/// The child's own pid, filled in after fork.
	ChildPid,
}

/// One entry of the composed vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arg {
	Text(String),
	ChildPid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conversion {
	Int,
	Str,
}

impl Conversion {
	fn from_marker(c: char) -> Option<Self> {
		match c {
			'd' | 'i' => Some(Conversion::Int),
			's' => Some(Conversion::Str),
			_ => None,
		}
	}
}

/// Program name plus composed arguments, bounded by [`ARGV_SLOTS`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArgumentVector {
	program: String,
	args: Vec<Arg>,
}

impl ArgumentVector {
	pub fn new(program: impl Into<String>) -> Result<Self, ArgvError> {
		let program = program.into();
		check_text(0, &program)?;
		Ok(Self {
			program,
			args: Vec::new(),
		})
	}

	/// Builds the vector for `program` from `template` and `values`.
	pub fn compose(
		program: impl Into<String>,
		template: &str,
		values: &[ArgValue],
	) -> Result<Self, ArgvError> {
		let mut argv = Self::new(program)?;
		let mut values = values.iter();
		let mut chars = template.char_indices().peekable();

		while let Some((pos, c)) = chars.next() {
			if c != '%' {
				continue;
			}
			let Some(&(_, marker)) = chars.peek() else {
				break;
			};
			let Some(conversion) = Conversion::from_marker(marker) else {
				continue;
			};
			chars.next();

			let value = values
				.next()
				.ok_or(ArgvError::MissingValue { marker, position: pos })?;
			let arg = match (conversion, value) {
				(_, ArgValue::ChildPid) => Arg::ChildPid,
				(Conversion::Int, ArgValue::Int(n)) => Arg::Text(n.to_string()),
				(Conversion::Str, ArgValue::Str(s)) => Arg::Text(s.clone()),
				_ => return Err(ArgvError::TypeMismatch { marker, position: pos }),
			};
			argv.push(arg)?;
		}

		let surplus = values.count();
		if surplus > 0 {
			return Err(ArgvError::SurplusValues { count: surplus });
		}
		Ok(argv)
	}

	pub fn push(&mut self, arg: Arg) -> Result<(), ArgvError> {
		if self.args.len() + 1 >= ARGV_SLOTS {
			return Err(ArgvError::CapacityExceeded { capacity: ARGV_SLOTS });
		}
		if let Arg::Text(ref text) = arg {
			check_text(self.args.len() + 1, text)?;
		}
		self.args.push(arg);
		Ok(())
	}

	pub fn program(&self) -> &str {
		&self.program
	}

	pub fn args(&self) -> &[Arg] {
		&self.args
	}

	/// Slot count including the program name.
	pub fn len(&self) -> usize {
		self.args.len() + 1
	}

	pub fn is_empty(&self) -> bool {
		false
	}

	/// The vector as text, with `pid` substituted when known.
	pub fn render(&self, pid: Option<i32>) -> Vec<String> {
		let mut out = Vec::with_capacity(self.len());
		out.push(self.program.clone());
		for arg in &self.args {
			out.push(match (arg, pid) {
				(Arg::Text(s), _) => s.clone(),
				(Arg::ChildPid, Some(pid)) => pid.to_string(),
				(Arg::ChildPid, None) => "<pid>".to_string(),
			});
		}
		out
	}
}

fn check_text(index: usize, text: &str) -> Result<(), ArgvError> {
	if text.len() > ARG_MAX_LEN {
		return Err(ArgvError::ArgumentTooLong {
			index,
			len: text.len(),
			limit: ARG_MAX_LEN,
		});
	}
	if text.contains('\0') {
		return Err(ArgvError::InteriorNul { index });
	}
	Ok(())
}
