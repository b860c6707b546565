//! # osmkit
//!
//! Supervisor for exactly one child process.
//!
//! Reads a `key=value` file into the child's environment, makes sure the
//! usage-history database exists, fork-execs the configured program with a
//! composed argument vector, and turns the child's wait status into the
//! supervisor's own exit code.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use osmkit::{Settings, Supervisor};
//!
//! let settings = osmkit::settings::load_settings(None).unwrap();
//! let supervised = Supervisor::new(settings).run().unwrap();
//! std::process::exit(supervised.exit_code() as i32);
//! ```
//!
//! In cooperative mode the loop calls back between polls:
//!
//! ```rust,no_run
//! use osmkit::{ChildHandle, Settings, Supervisor, WaitMode};
//!
//! let mut settings = Settings::default();
//! settings.mode = WaitMode::Cooperative;
//! let supervised = Supervisor::new(settings)
//! 	.run_with(|child: &ChildHandle| {
//! 		// sample metrics, flush buffers, ...
//! 		let _ = child.pid();
//! 	})
//! 	.unwrap();
//! println!("{}", supervised.outcome);
//! ```

pub mod argv;
pub mod envfile;
pub mod environment;
pub mod error;
pub mod launcher;
pub mod reaper;
pub mod settings;
pub mod status;
pub mod storage;
pub mod supervisor;

pub use argv::{Arg, ArgValue, ArgumentVector};
pub use envfile::{ConfigEntry, EnvFile};
pub use environment::{Environment, OverwritePolicy};
pub use error::{
	ArgvError, ConfigError, LaunchError, ReaperError, SettingsError, StorageError, SupervisorError,
	FATAL_EXIT_CODE,
};
pub use launcher::{ChildHandle, LaunchPlan};
pub use reaper::{Reaper, WaitMode};
pub use settings::Settings;
pub use status::ChildOutcome;
pub use supervisor::{Housekeeping, Idle, LaunchPreview, Supervised, Supervisor};
