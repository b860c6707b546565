//! Reader for the `key=value` environment file.
//!
//! One pair per line. Empty lines and lines starting with `#` or `;` are
//! skipped; any other line without a key is ignored with a warning. The line
//! is split on the first `=`; the value keeps every byte after it except the
//! line terminator. There is no quoting, escaping or encoding check.

use std::ffi::{OsStr, OsString};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/osm/osmconf.cfg";

/// Most entries a single file may hold.
pub const MAX_ENTRIES: usize = 128;
/// Longest key or value, in bytes.
pub const MAX_FIELD_LEN: usize = 254;

/// One pair, kept as raw bytes; the file's encoding is never checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigEntry {
	pub key: OsString,
	pub value: OsString,
}

/// Entries of one file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
	pub path: PathBuf,
	pub entries: Vec<ConfigEntry>,
}

impl EnvFile {
	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = &ConfigEntry> {
		self.entries.iter()
	}
}

#[derive(Debug, PartialEq, Eq)]
enum Line<'a> {
	Blank,
	Comment,
	Pair(&'a [u8], &'a [u8]),
	Malformed,
}

/// Strips one trailing `\n` and then one trailing `\r`.
fn strip_terminator(mut line: &[u8]) -> &[u8] {
	if let Some(rest) = line.strip_suffix(b"\n") {
		line = rest;
	}
	if let Some(rest) = line.strip_suffix(b"\r") {
		line = rest;
	}
	line
}

fn classify(line: &[u8]) -> Line<'_> {
	match line.first() {
		None => return Line::Blank,
		Some(b'#' | b';') => return Line::Comment,
		Some(_) => {}
	}
	let Some(eq) = line.iter().position(|&b| b == b'=') else {
		return Line::Malformed;
	};
	let (key, value) = (&line[..eq], &line[eq + 1..]);
	if key.is_empty() || line.contains(&0) {
		return Line::Malformed;
	}
	Line::Pair(key, value)
}

pub fn load(path: &Path) -> Result<EnvFile, ConfigError> {
	let file = File::open(path).map_err(|source| ConfigError::Open {
		path: path.to_path_buf(),
		source,
	})?;
	parse(BufReader::new(file), path)
}

/// Parses a whole file. Either every entry is returned or none is.
pub fn parse<R: BufRead>(mut reader: R, path: &Path) -> Result<EnvFile, ConfigError> {
	let mut entries = Vec::new();
	let mut buf = Vec::new();
	let mut lineno = 0;

	loop {
		buf.clear();
		lineno += 1;
		let read = reader.read_until(b'\n', &mut buf).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			line: lineno,
			source,
		})?;
		if read == 0 {
			break;
		}

		let (key, value) = match classify(strip_terminator(&buf)) {
			Line::Blank | Line::Comment => continue,
			Line::Malformed => {
				tracing::warn!("{}:{}: ignoring line without key=value", path.display(), lineno);
				continue;
			}
			Line::Pair(key, value) => (key, value),
		};

		check_field(lineno, "key", key)?;
		check_field(lineno, "value", value)?;
		if entries.len() == MAX_ENTRIES {
			return Err(ConfigError::TooManyEntries { limit: MAX_ENTRIES });
		}

		entries.push(ConfigEntry {
			key: OsStr::from_bytes(key).to_os_string(),
			value: OsStr::from_bytes(value).to_os_string(),
		});
	}

	Ok(EnvFile {
		path: path.to_path_buf(),
		entries,
	})
}

fn check_field(line: usize, field: &'static str, bytes: &[u8]) -> Result<(), ConfigError> {
	if bytes.len() > MAX_FIELD_LEN {
		return Err(ConfigError::FieldTooLong {
			line,
			field,
			len: bytes.len(),
			limit: MAX_FIELD_LEN,
		});
	}
	Ok(())
}
