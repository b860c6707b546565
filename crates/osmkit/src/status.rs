use std::fmt;

use nix::sys::signal::Signal;

/// Code reported when a wait status matches none of the known shapes.
pub const UNRECOGNIZED_CODE: i32 = -1;

/// What a raw wait status says happened to the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildOutcome {
	Exited(i32),
	Signaled { signal: i32, core_dumped: bool },
	Stopped(i32),
	Unrecognized(i32),
}

impl ChildOutcome {
	/// Decodes a raw `waitpid` status. Pure; exactly one branch matches.
	pub fn from_raw(raw: i32) -> Self {
		if libc::WIFEXITED(raw) {
			ChildOutcome::Exited(libc::WEXITSTATUS(raw))
		} else if libc::WIFSIGNALED(raw) {
			ChildOutcome::Signaled {
				signal: libc::WTERMSIG(raw),
				core_dumped: libc::WCOREDUMP(raw),
			}
		} else if libc::WIFSTOPPED(raw) {
			ChildOutcome::Stopped(libc::WSTOPSIG(raw))
		} else {
			ChildOutcome::Unrecognized(raw)
		}
	}

	/// Exit code, terminating signal, or stopping signal.
	pub fn code(&self) -> i32 {
		match *self {
			ChildOutcome::Exited(code) => code,
			ChildOutcome::Signaled { signal, .. } => signal,
			ChildOutcome::Stopped(signal) => signal,
			ChildOutcome::Unrecognized(_) => UNRECOGNIZED_CODE,
		}
	}

	/// [`code`](Self::code) truncated the way the OS truncates exit statuses.
	pub fn exit_code(&self) -> u8 {
		(self.code() & 0xff) as u8
	}

	pub fn is_success(&self) -> bool {
		*self == ChildOutcome::Exited(0)
	}

	pub fn is_stopped(&self) -> bool {
		matches!(self, ChildOutcome::Stopped(_))
	}
}

fn signal_name(signo: i32) -> String {
	match Signal::try_from(signo) {
		Ok(sig) => format!("{} ({})", sig.as_str(), signo),
		Err(_) => format!("signal {}", signo),
	}
}

impl fmt::Display for ChildOutcome {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match *self {
			ChildOutcome::Exited(code) => write!(f, "exited with {}", code),
			ChildOutcome::Signaled { signal, core_dumped } => {
				write!(f, "killed by {}", signal_name(signal))?;
				if core_dumped {
					write!(f, ", core dumped")?;
				}
				Ok(())
			}
			ChildOutcome::Stopped(signal) => write!(f, "stopped by {}", signal_name(signal)),
			ChildOutcome::Unrecognized(raw) => write!(f, "unrecognized wait status {:#x}", raw),
		}
	}
}
