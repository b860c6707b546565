use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags};

use crate::environment::Environment;
use crate::error::StorageError;

pub const DEFAULT_DATABASE_ENV: &str = "DB_FILE";
pub const DEFAULT_DATABASE_FILE: &str = "osm.db";

/// Periodic CPU/RAM/disk samples. Rows are written by the monitor, not here.
pub const USAGE_HISTORY_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS usage_history (
	id INTEGER PRIMARY KEY AUTOINCREMENT,
	timestamp DATETIME NOT NULL,
	cpu_usage REAL NOT NULL,
	ram_usage REAL NOT NULL,
	disk_usage REAL NOT NULL
)";

/// Database location named by `var` in `env`, or `default` when unset.
pub fn database_path(env: &Environment, var: &str, default: &str) -> PathBuf {
	match env.get(var) {
		Some(path) if !path.is_empty() => PathBuf::from(path),
		_ => PathBuf::from(default),
	}
}

/// Opens (creating if needed) the database at `path` and makes sure the
/// usage table exists. Safe to call any number of times.
pub fn ensure_schema(path: &Path) -> Result<(), StorageError> {
	if path.exists() {
		tracing::info!("reusing database {}", path.display());
	} else {
		tracing::info!("creating database {}", path.display());
	}

	let conn = Connection::open_with_flags(
		path,
		OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
	)
	.map_err(|source| StorageError::Open {
		path: path.to_path_buf(),
		source,
	})?;

	conn.execute_batch(USAGE_HISTORY_SCHEMA)
		.map_err(|source| StorageError::Schema {
			path: path.to_path_buf(),
			source,
		})?;
	Ok(())
}
