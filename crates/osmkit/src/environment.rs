use std::collections::BTreeMap;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::envfile::{self, EnvFile};
use crate::error::ConfigError;

/// Whether a config entry may replace a variable that is already set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverwritePolicy {
	#[default]
	Keep,
	Replace,
}

impl From<bool> for OverwritePolicy {
	fn from(overwrite: bool) -> Self {
		if overwrite {
			OverwritePolicy::Replace
		} else {
			OverwritePolicy::Keep
		}
	}
}

/// The environment handed to the managed child.
///
/// Starts as a snapshot of the supervisor's own environment and receives the
/// config entries; the launcher passes it to the child as its whole `envp`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
	vars: BTreeMap<OsString, OsString>,
}

impl Environment {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn inherit() -> Self {
		Self {
			vars: std::env::vars_os().collect(),
		}
	}

	pub fn get(&self, key: impl AsRef<OsStr>) -> Option<&OsStr> {
		self.vars.get(key.as_ref()).map(|v| v.as_os_str())
	}

	pub fn get_str(&self, key: &str) -> Option<&str> {
		self.get(key).and_then(|v| v.to_str())
	}

	pub fn contains(&self, key: impl AsRef<OsStr>) -> bool {
		self.vars.contains_key(key.as_ref())
	}

	pub fn len(&self) -> usize {
		self.vars.len()
	}

	pub fn is_empty(&self) -> bool {
		self.vars.is_empty()
	}

	pub fn iter(&self) -> impl Iterator<Item = (&OsStr, &OsStr)> {
		self.vars.iter().map(|(k, v)| (k.as_os_str(), v.as_os_str()))
	}

	/// Sets `key` unless it exists and the policy keeps existing values.
	/// Returns whether the value was written.
	pub fn set(
		&mut self,
		key: impl Into<OsString>,
		value: impl Into<OsString>,
		policy: OverwritePolicy,
	) -> bool {
		let key = key.into();
		if policy == OverwritePolicy::Keep && self.vars.contains_key(&key) {
			return false;
		}
		self.vars.insert(key, value.into());
		true
	}

	pub fn remove(&mut self, key: impl AsRef<OsStr>) -> Option<OsString> {
		self.vars.remove(key.as_ref())
	}

	/// Applies every entry in file order and returns how many were processed.
	pub fn apply(&mut self, file: &EnvFile, policy: OverwritePolicy) -> usize {
		for entry in file.iter() {
			if !self.set(&entry.key, &entry.value, policy) {
				tracing::debug!("{} already set, keeping existing value", entry.key.to_string_lossy());
			}
		}
		file.len()
	}

	/// Loads `path` and applies it. On error nothing is changed.
	pub fn load_file(&mut self, path: &Path, policy: OverwritePolicy) -> Result<usize, ConfigError> {
		let file = envfile::load(path)?;
		Ok(self.apply(&file, policy))
	}

	/// Variables that are new or different compared to `base`.
	pub fn changes_from(&self, base: &Environment) -> Vec<(String, String)> {
		self.vars
			.iter()
			.filter(|(k, v)| base.vars.get(*k) != Some(*v))
			.map(|(k, v)| (k.to_string_lossy().into_owned(), v.to_string_lossy().into_owned()))
			.collect()
	}

	/// `KEY=VALUE` strings for execve. Fails on the first variable with a NUL byte.
	pub fn to_envp(&self) -> Result<Vec<CString>, String> {
		self.vars
			.iter()
			.map(|(k, v)| {
				let mut pair = Vec::with_capacity(k.len() + v.len() + 1);
				pair.extend_from_slice(k.as_bytes());
				pair.push(b'=');
				pair.extend_from_slice(v.as_bytes());
				CString::new(pair).map_err(|_| k.to_string_lossy().into_owned())
			})
			.collect()
	}
}

impl<K: Into<OsString>, V: Into<OsString>> FromIterator<(K, V)> for Environment {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		Self {
			vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::envfile::ConfigEntry;

	fn file(pairs: &[(&str, &str)]) -> EnvFile {
		EnvFile {
			path: "test.cfg".into(),
			entries: pairs
				.iter()
				.map(|(k, v)| ConfigEntry { key: (*k).into(), value: (*v).into() })
				.collect(),
		}
	}

	#[test]
	fn test_keep_policy_preserves_existing() {
		let mut env: Environment = [("HOME", "/root")].into_iter().collect();
		let n = env.apply(&file(&[("HOME", "/tmp"), ("A", "1")]), OverwritePolicy::Keep);
		assert_eq!(n, 2);
		assert_eq!(env.get_str("HOME"), Some("/root"));
		assert_eq!(env.get_str("A"), Some("1"));
	}

	#[test]
	fn test_replace_policy_overwrites() {
		let mut env: Environment = [("HOME", "/root")].into_iter().collect();
		env.apply(&file(&[("HOME", "/tmp")]), OverwritePolicy::Replace);
		assert_eq!(env.get_str("HOME"), Some("/tmp"));
	}

	#[test]
	fn test_duplicate_keys_follow_policy() {
		let dup = file(&[("A", "first"), ("A", "second")]);

		let mut keep = Environment::new();
		keep.apply(&dup, OverwritePolicy::Keep);
		assert_eq!(keep.get_str("A"), Some("first"));

		let mut replace = Environment::new();
		replace.apply(&dup, OverwritePolicy::Replace);
		assert_eq!(replace.get_str("A"), Some("second"));
	}

	#[test]
	fn test_changes_from() {
		let base: Environment = [("A", "1"), ("B", "2")].into_iter().collect();
		let mut env = base.clone();
		env.set("B", "3", OverwritePolicy::Replace);
		env.set("C", "4", OverwritePolicy::Keep);
		assert_eq!(
			env.changes_from(&base),
			vec![("B".to_string(), "3".to_string()), ("C".to_string(), "4".to_string())]
		);
	}

	#[test]
	fn test_to_envp() {
		let env: Environment = [("A", "1"), ("B", "x=y")].into_iter().collect();
		let envp = env.to_envp().unwrap();
		assert_eq!(envp[0].to_str().unwrap(), "A=1");
		assert_eq!(envp[1].to_str().unwrap(), "B=x=y");
	}

	#[test]
	fn test_policy_from_bool() {
		assert_eq!(OverwritePolicy::from(false), OverwritePolicy::Keep);
		assert_eq!(OverwritePolicy::from(true), OverwritePolicy::Replace);
	}
}
