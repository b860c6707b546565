use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::argv::ArgumentVector;
use crate::environment::Environment;
use crate::error::SupervisorError;
use crate::launcher::{ChildHandle, LaunchPlan};
use crate::reaper::{self, Reaper, WaitMode, NO_STATUS};
use crate::settings::Settings;
use crate::status::ChildOutcome;
use crate::storage;

/// Supervisor-side work run between polls in cooperative mode.
pub trait Housekeeping {
	fn tick(&mut self, child: &ChildHandle);
}

impl<F: FnMut(&ChildHandle)> Housekeeping for F {
	fn tick(&mut self, child: &ChildHandle) {
		self(child)
	}
}

/// No housekeeping at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Idle;

impl Housekeeping for Idle {
	fn tick(&mut self, _child: &ChildHandle) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisionState {
	AwaitingChild,
	StatusRecorded(i32),
	Translated(ChildOutcome),
	Done(ChildOutcome),
}

impl SupervisionState {
	fn advance(self) -> Self {
		match self {
			SupervisionState::StatusRecorded(raw) => {
				SupervisionState::Translated(ChildOutcome::from_raw(raw))
			}
			SupervisionState::Translated(outcome) => SupervisionState::Done(outcome),
			other => other,
		}
	}
}

/// Result of a completed supervision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Supervised {
	pub child: ChildHandle,
	pub outcome: ChildOutcome,
}

impl Supervised {
	pub fn exit_code(&self) -> u8 {
		self.outcome.exit_code()
	}
}

/// What would be launched, without launching it.
#[derive(Debug, Clone, Serialize)]
pub struct LaunchPreview {
	pub program: String,
	pub path: String,
	pub argv: Vec<String>,
	pub pid_env: String,
	pub mode: WaitMode,
	pub database: String,
	pub env_changes: BTreeMap<String, String>,
}

pub struct Supervisor {
	settings: Settings,
	inherited: Environment,
	env: Environment,
}

impl Supervisor {
	/// A supervisor whose child starts from this process's environment.
	pub fn new(settings: Settings) -> Self {
		Self::with_environment(settings, Environment::inherit())
	}

	pub fn with_environment(settings: Settings, env: Environment) -> Self {
		Self {
			settings,
			inherited: env.clone(),
			env,
		}
	}

	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn environment(&self) -> &Environment {
		&self.env
	}

	/// Projects the config file into the child environment and returns the
	/// number of entries processed. A file that can't be opened or read is
	/// only fatal when `config_required` is set; capacity violations always are.
	pub fn load_config(&mut self) -> Result<usize, SupervisorError> {
		let path = self.settings.config_file.clone();
		match self.env.load_file(&path, self.settings.overwrite_policy()) {
			Ok(count) => {
				tracing::info!("loaded {} entries from {}", count, path.display());
				Ok(count)
			}
			Err(e) if e.is_unreadable() && !self.settings.config_required => {
				tracing::warn!("{}; continuing without it", e);
				Ok(0)
			}
			Err(e) => Err(e.into()),
		}
	}

	pub fn database_path(&self) -> PathBuf {
		storage::database_path(
			&self.env,
			&self.settings.database_env,
			&self.settings.database_default.to_string_lossy(),
		)
	}

	pub fn ensure_storage(&self) -> Result<PathBuf, SupervisorError> {
		let path = self.database_path();
		storage::ensure_schema(&path)?;
		Ok(path)
	}

	pub fn compose_argv(&self) -> Result<ArgumentVector, SupervisorError> {
		let child = &self.settings.child;
		Ok(ArgumentVector::compose(&child.program, &child.template, &child.arg_values())?)
	}

	pub fn preview(&self) -> Result<LaunchPreview, SupervisorError> {
		let argv = self.compose_argv()?;
		let plan = LaunchPlan::new(&argv, &self.env, &self.settings.child.pid_env)?;
		Ok(LaunchPreview {
			program: plan.program().to_string(),
			path: plan.path().display().to_string(),
			argv: argv.render(None),
			pid_env: self.settings.child.pid_env.clone(),
			mode: self.settings.mode,
			database: self.database_path().display().to_string(),
			env_changes: self.env.changes_from(&self.inherited).into_iter().collect(),
		})
	}

	pub fn run(self) -> Result<Supervised, SupervisorError> {
		self.run_with(Idle)
	}

	/// Full startup and supervision. `work` only runs in cooperative mode.
	///
	/// In cooperative mode a stop counts as a state change: the supervisor
	/// returns the stop signal and the child stays stopped, no longer reaped.
	///
	/// Everything that can fail before the child exists is returned as an
	/// error; once the child is launched this always yields an outcome.
	pub fn run_with<H: Housekeeping>(mut self, mut work: H) -> Result<Supervised, SupervisorError> {
		self.load_config()?;
		self.ensure_storage()?;
		let argv = self.compose_argv()?;
		let mut plan = LaunchPlan::new(&argv, &self.env, &self.settings.child.pid_env)?;

		let reaper = Reaper::install(self.settings.mode)?;
		let mut child = {
			let block = reaper.block()?;
			let child = plan.launch(block.previous())?;
			reaper.arm(child.pid());
			child
		};

		let mut state = SupervisionState::AwaitingChild;
		let outcome = loop {
			state = match state {
				SupervisionState::AwaitingChild => {
					let raw = match reaper.mode() {
						WaitMode::Blocking => await_blocking(&child),
						WaitMode::Cooperative => {
							await_cooperative(&reaper, &child, self.settings.poll_interval(), &mut work)
						}
					};
					child.record(raw);
					SupervisionState::StatusRecorded(raw)
				}
				SupervisionState::Done(outcome) => break outcome,
				other => other.advance(),
			};
			tracing::trace!("supervision state {:?}", state);
		};

		tracing::info!("{} (pid {}) {}", plan.program(), child.pid(), outcome);
		if outcome.is_stopped() {
			tracing::warn!(
				"{} (pid {}) is left stopped and unsupervised; send SIGCONT or SIGKILL to it",
				plan.program(),
				child.pid()
			);
		}
		Ok(Supervised { child, outcome })
	}
}

fn await_blocking(child: &ChildHandle) -> i32 {
	match reaper::wait_blocking(child.pid()) {
		Ok(raw) => raw,
		Err(e) => {
			tracing::error!("waitpid({}) failed: {}", child.pid(), e);
			NO_STATUS
		}
	}
}

fn await_cooperative<H: Housekeeping>(
	reaper: &Reaper,
	child: &ChildHandle,
	interval: Duration,
	work: &mut H,
) -> i32 {
	loop {
		if let Some(raw) = reaper.raw_status() {
			return raw;
		}
		work.tick(child);
		std::thread::sleep(interval);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_state_machine_order() {
		let raw = 7 << 8;
		let recorded = SupervisionState::StatusRecorded(raw);
		let translated = recorded.advance();
		assert_eq!(translated, SupervisionState::Translated(ChildOutcome::Exited(7)));
		assert_eq!(translated.advance(), SupervisionState::Done(ChildOutcome::Exited(7)));
		assert_eq!(
			SupervisionState::Done(ChildOutcome::Exited(7)).advance(),
			SupervisionState::Done(ChildOutcome::Exited(7))
		);
	}

	#[test]
	fn test_closure_housekeeping() {
		let mut ticks = 0;
		{
			let mut work = |_: &ChildHandle| ticks += 1;
			let child = ChildHandle::new(nix::unistd::Pid::from_raw(1));
			work.tick(&child);
			work.tick(&child);
		}
		assert_eq!(ticks, 2);
	}
}
