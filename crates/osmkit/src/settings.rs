use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::argv::{ArgValue, DEFAULT_PROGRAM, DEFAULT_TEMPLATE};
use crate::envfile::DEFAULT_CONFIG_FILE;
use crate::environment::OverwritePolicy;
use crate::error::SettingsError;
use crate::launcher::DEFAULT_PID_ENV;
use crate::reaper::WaitMode;
use crate::storage::{DEFAULT_DATABASE_ENV, DEFAULT_DATABASE_FILE};

pub const SETTINGS_ENV: &str = "OSM_SETTINGS";
pub const APP_NAME: &str = "osm";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
	#[serde(default = "default_config_file")]
	pub config_file: PathBuf,
	#[serde(default)]
	pub config_required: bool,
	#[serde(default)]
	pub overwrite_env: bool,
	#[serde(default)]
	pub mode: WaitMode,
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	#[serde(default = "default_database_env")]
	pub database_env: String,
	#[serde(default = "default_database_file")]
	pub database_default: PathBuf,
	#[serde(default)]
	pub child: ChildSettings,
}

impl Default for Settings {
	fn default() -> Self {
		Self {
			config_file: default_config_file(),
			config_required: false,
			overwrite_env: false,
			mode: WaitMode::default(),
			poll_interval_ms: default_poll_interval_ms(),
			database_env: default_database_env(),
			database_default: default_database_file(),
			child: ChildSettings::default(),
		}
	}
}

impl Settings {
	pub fn overwrite_policy(&self) -> OverwritePolicy {
		OverwritePolicy::from(self.overwrite_env)
	}

	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms.max(1))
	}

	pub fn from_toml_str(content: &str, origin: &Path) -> Result<Self, SettingsError> {
		toml::from_str(content).map_err(|source| SettingsError::Parse {
			path: origin.to_path_buf(),
			source,
		})
	}
}

fn default_config_file() -> PathBuf {
	PathBuf::from(DEFAULT_CONFIG_FILE)
}
fn default_poll_interval_ms() -> u64 {
	100
}
fn default_database_env() -> String {
	DEFAULT_DATABASE_ENV.into()
}
fn default_database_file() -> PathBuf {
	PathBuf::from(DEFAULT_DATABASE_FILE)
}

/// What to launch and how to compose its arguments.
#[derive(Debug, Clone, Deserialize)]
pub struct ChildSettings {
	#[serde(default = "default_program")]
	pub program: String,
	#[serde(default = "default_template")]
	pub template: String,
	#[serde(default = "default_values")]
	pub values: Vec<ValueSpec>,
	#[serde(default = "default_pid_env")]
	pub pid_env: String,
}

impl Default for ChildSettings {
	fn default() -> Self {
		Self {
			program: default_program(),
			template: default_template(),
			values: default_values(),
			pid_env: default_pid_env(),
		}
	}
}

impl ChildSettings {
	pub fn arg_values(&self) -> Vec<ArgValue> {
		self.values.iter().map(ValueSpec::to_arg_value).collect()
	}
}

fn default_program() -> String {
	DEFAULT_PROGRAM.into()
}
fn default_template() -> String {
	DEFAULT_TEMPLATE.into()
}
fn default_values() -> Vec<ValueSpec> {
	vec![ValueSpec::Str(PID_PLACEHOLDER.into())]
}
fn default_pid_env() -> String {
	DEFAULT_PID_ENV.into()
}

/// Written in a value list to stand for the child's own pid.
pub const PID_PLACEHOLDER: &str = "{pid}";

/// A template value as written in TOML.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ValueSpec {
	Int(i64),
	Str(String),
}

impl ValueSpec {
	pub fn to_arg_value(&self) -> ArgValue {
		match self {
			ValueSpec::Int(n) => ArgValue::Int(*n),
			ValueSpec::Str(s) if s == PID_PLACEHOLDER => ArgValue::ChildPid,
			ValueSpec::Str(s) => ArgValue::Str(s.clone()),
		}
	}
}

/// Where settings are read from when no path is given explicitly:
/// `$OSM_SETTINGS`, then `$XDG_CONFIG_HOME/osm/supervisor.toml`, then
/// `~/.config/osm/supervisor.toml`.
pub fn settings_path() -> PathBuf {
	if let Ok(path) = std::env::var(SETTINGS_ENV) {
		return PathBuf::from(path);
	}
	config_dir().join("supervisor.toml")
}

pub fn config_dir() -> PathBuf {
	if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
		PathBuf::from(dir).join(APP_NAME)
	} else if let Some(home) = home_dir() {
		home.join(".config").join(APP_NAME)
	} else {
		PathBuf::from("/etc").join(APP_NAME)
	}
}

fn home_dir() -> Option<PathBuf> {
	std::env::var("HOME").ok().map(PathBuf::from)
}

/// Reads settings from `path`, or the default location. A missing file at the
/// default location yields defaults; a path from the caller or
/// `$OSM_SETTINGS` must exist.
pub fn load_settings(path: Option<&Path>) -> Result<Settings, SettingsError> {
	let (path, explicit) = match path {
		Some(p) => (p.to_path_buf(), true),
		None => (settings_path(), std::env::var_os(SETTINGS_ENV).is_some()),
	};

	if !explicit && !path.exists() {
		tracing::debug!("no settings at {}, using defaults", path.display());
		return Ok(Settings::default());
	}

	let content = std::fs::read_to_string(&path).map_err(|source| SettingsError::Read {
		path: path.clone(),
		source,
	})?;
	let settings = Settings::from_toml_str(&content, &path)?;
	tracing::debug!("settings loaded from {}", path.display());
	Ok(settings)
}
