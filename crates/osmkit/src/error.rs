use std::fmt;
use std::io;
use std::path::PathBuf;

/// Errors from reading the key=value environment file.
#[derive(Debug)]
pub enum ConfigError {
	/// The file could not be opened.
	Open { path: PathBuf, source: io::Error },
	/// The file opened but reading it failed, e.g. it is a directory.
	Read { path: PathBuf, line: usize, source: io::Error },
	/// More entries than the loader accepts.
	TooManyEntries { limit: usize },
	/// A key or value longer than the per-field limit.
	FieldTooLong { line: usize, field: &'static str, len: usize, limit: usize },
}

impl fmt::Display for ConfigError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ConfigError::Open { path, source } => {
				write!(f, "cannot open {}: {}", path.display(), source)
			}
			ConfigError::Read { path, line, source } => {
				write!(f, "{}:{}: read error: {}", path.display(), line, source)
			}
			ConfigError::TooManyEntries { limit } => {
				write!(f, "too many entries (limit {})", limit)
			}
			ConfigError::FieldTooLong { line, field, len, limit } => write!(
				f,
				"line {}: {} is {} bytes long (limit {})",
				line, field, len, limit
			),
		}
	}
}

impl std::error::Error for ConfigError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			ConfigError::Open { source, .. } | ConfigError::Read { source, .. } => Some(source),
			_ => None,
		}
	}
}

impl ConfigError {
	/// True when the file simply isn't there or can't be opened.
	pub fn is_open_failure(&self) -> bool {
		matches!(self, ConfigError::Open { .. })
	}

	/// Missing, unopenable or unreadable. Capacity violations are not.
	pub fn is_unreadable(&self) -> bool {
		matches!(self, ConfigError::Open { .. } | ConfigError::Read { .. })
	}
}

/// Errors from composing the child's argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgvError {
	/// More arguments than the vector has slots for.
	CapacityExceeded { capacity: usize },
	/// One rendered argument is longer than a slot.
	ArgumentTooLong { index: usize, len: usize, limit: usize },
	/// A conversion marker has no value to consume.
	MissingValue { marker: char, position: usize },
	/// The value given for a marker has the wrong type.
	TypeMismatch { marker: char, position: usize },
	/// Values were left over after the template was consumed.
	SurplusValues { count: usize },
	/// An argument contains an interior NUL byte.
	InteriorNul { index: usize },
}

impl fmt::Display for ArgvError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ArgvError::CapacityExceeded { capacity } => {
				write!(f, "argument vector full ({} slots)", capacity)
			}
			ArgvError::ArgumentTooLong { index, len, limit } => write!(
				f,
				"argument {} is {} bytes long (limit {})",
				index, len, limit
			),
			ArgvError::MissingValue { marker, position } => {
				write!(f, "no value for %{} at offset {}", marker, position)
			}
			ArgvError::TypeMismatch { marker, position } => {
				write!(f, "value for %{} at offset {} has the wrong type", marker, position)
			}
			ArgvError::SurplusValues { count } => {
				write!(f, "{} value(s) not consumed by the template", count)
			}
			ArgvError::InteriorNul { index } => {
				write!(f, "argument {} contains a NUL byte", index)
			}
		}
	}
}

impl std::error::Error for ArgvError {}

/// Errors from preparing or performing fork-then-exec.
#[derive(Debug)]
pub enum LaunchError {
	/// Program, argument or environment string contains a NUL byte.
	InvalidString { what: String },
	/// fork(2) failed; there is no child to supervise.
	Fork(nix::Error),
}

impl fmt::Display for LaunchError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			LaunchError::InvalidString { what } => write!(f, "{} contains a NUL byte", what),
			LaunchError::Fork(e) => write!(f, "fork failed: {}", e),
		}
	}
}

impl std::error::Error for LaunchError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			LaunchError::Fork(e) => Some(e),
			_ => None,
		}
	}
}

/// Errors from registering the signal reaper.
#[derive(Debug)]
pub enum ReaperError {
	/// A reaper is already installed in this process.
	AlreadyInstalled,
	/// sigaction(2) or sigprocmask(2) failed.
	Signal(nix::Error),
}

impl fmt::Display for ReaperError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			ReaperError::AlreadyInstalled => write!(f, "signal reaper already installed"),
			ReaperError::Signal(e) => write!(f, "signal setup failed: {}", e),
		}
	}
}

impl std::error::Error for ReaperError {}

impl From<nix::Error> for ReaperError {
	fn from(e: nix::Error) -> Self {
		ReaperError::Signal(e)
	}
}

/// Errors from the usage-history storage collaborator.
#[derive(Debug)]
pub enum StorageError {
	Open { path: PathBuf, source: rusqlite::Error },
	Schema { path: PathBuf, source: rusqlite::Error },
}

impl fmt::Display for StorageError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			StorageError::Open { path, source } => {
				write!(f, "failed to open database {}: {}", path.display(), source)
			}
			StorageError::Schema { path, source } => {
				write!(f, "failed to create schema in {}: {}", path.display(), source)
			}
		}
	}
}

impl std::error::Error for StorageError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			StorageError::Open { source, .. } | StorageError::Schema { source, .. } => Some(source),
		}
	}
}

/// Errors from loading the supervisor's own settings file.
#[derive(Debug)]
pub enum SettingsError {
	Read { path: PathBuf, source: io::Error },
	Parse { path: PathBuf, source: toml::de::Error },
}

impl fmt::Display for SettingsError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SettingsError::Read { path, source } => {
				write!(f, "failed to read {}: {}", path.display(), source)
			}
			SettingsError::Parse { path, source } => {
				write!(f, "failed to parse {}: {}", path.display(), source)
			}
		}
	}
}

impl std::error::Error for SettingsError {}

/// Every condition that stops the supervisor before (or instead of) a child.
#[derive(Debug)]
pub enum SupervisorError {
	Settings(SettingsError),
	Config(ConfigError),
	Argv(ArgvError),
	Storage(StorageError),
	Reaper(ReaperError),
	Launch(LaunchError),
}

/// Exit code for every fatal condition detected before a child exists.
pub const FATAL_EXIT_CODE: u8 = 1;

impl SupervisorError {
	pub fn exit_code(&self) -> u8 {
		FATAL_EXIT_CODE
	}
}

impl fmt::Display for SupervisorError {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SupervisorError::Settings(e) => write!(f, "settings: {}", e),
			SupervisorError::Config(e) => write!(f, "config: {}", e),
			SupervisorError::Argv(e) => write!(f, "arguments: {}", e),
			SupervisorError::Storage(e) => write!(f, "storage: {}", e),
			SupervisorError::Reaper(e) => write!(f, "signals: {}", e),
			SupervisorError::Launch(e) => write!(f, "launch: {}", e),
		}
	}
}

impl std::error::Error for SupervisorError {
	fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
		match self {
			SupervisorError::Settings(e) => Some(e),
			SupervisorError::Config(e) => Some(e),
			SupervisorError::Argv(e) => Some(e),
			SupervisorError::Storage(e) => Some(e),
			SupervisorError::Reaper(e) => Some(e),
			SupervisorError::Launch(e) => Some(e),
		}
	}
}

impl From<SettingsError> for SupervisorError {
	fn from(e: SettingsError) -> Self {
		SupervisorError::Settings(e)
	}
}

impl From<ConfigError> for SupervisorError {
	fn from(e: ConfigError) -> Self {
		SupervisorError::Config(e)
	}
}

impl From<ArgvError> for SupervisorError {
	fn from(e: ArgvError) -> Self {
		SupervisorError::Argv(e)
	}
}

impl From<StorageError> for SupervisorError {
	fn from(e: StorageError) -> Self {
		SupervisorError::Storage(e)
	}
}

impl From<ReaperError> for SupervisorError {
	fn from(e: ReaperError) -> Self {
		SupervisorError::Reaper(e)
	}
}

impl From<LaunchError> for SupervisorError {
	fn from(e: LaunchError) -> Self {
		SupervisorError::Launch(e)
	}
}
