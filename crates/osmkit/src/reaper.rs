//! Signal-driven reaping of the managed child.
//!
//! Handlers run asynchronously to the main flow, so they only touch two
//! atomics: the child pid (written once by the main flow, read by handlers)
//! and the raw wait status (written by the SIGCHLD handler in cooperative
//! mode, read by the supervision loop). Handlers never block, allocate or
//! lock.
//!
//! SIGKILL cannot be caught and is deliberately absent from [`CATCHABLE`].

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use serde::{Deserialize, Serialize};

use crate::error::ReaperError;

/// Value of the status cell while nothing has been recorded.
pub const NO_STATUS: i32 = -1;

/// Signals the reaper registers a handler for.
pub const CATCHABLE: [Signal; 3] = [Signal::SIGTERM, Signal::SIGINT, Signal::SIGCHLD];

/// Who performs the wait for the child's state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
	/// The main flow blocks in `waitpid`; handlers only forward signals.
	#[default]
	Blocking,
	/// The SIGCHLD handler reaps with `WNOHANG | WUNTRACED`; the main flow polls.
	Cooperative,
}

// Signal handlers cannot reach instance state; this is the one shared cell.
static CHILD: AtomicI32 = AtomicI32::new(0);
static STATUS: AtomicI32 = AtomicI32::new(NO_STATUS);
static INSTALLED: AtomicBool = AtomicBool::new(false);

extern "C" fn forward_only(sig: libc::c_int) {
	let saved = Errno::last_raw();
	forward(sig);
	Errno::set_raw(saved);
}

extern "C" fn reap_nonblocking(sig: libc::c_int) {
	let saved = Errno::last_raw();
	if sig == libc::SIGCHLD {
		let mut raw: libc::c_int = 0;
		// SAFETY: waitpid is async-signal-safe; WNOHANG keeps it from blocking.
		let reaped = unsafe { libc::waitpid(-1, &mut raw, libc::WNOHANG | libc::WUNTRACED) };
		if reaped > 0 {
			STATUS.store(raw, Ordering::SeqCst);
		}
	} else {
		forward(sig);
	}
	Errno::set_raw(saved);
}

fn forward(sig: libc::c_int) {
	if sig != libc::SIGTERM && sig != libc::SIGINT {
		return;
	}
	let child = CHILD.load(Ordering::SeqCst);
	if child > 0 {
		// SAFETY: kill is async-signal-safe.
		unsafe {
			libc::kill(child, sig);
		}
	}
}

/// Installed signal handlers. Dropping it restores the previous dispositions.
#[derive(Debug)]
pub struct Reaper {
	mode: WaitMode,
	previous: Vec<(Signal, SigAction)>,
}

impl Reaper {
	/// Registers the handler for every signal in [`CATCHABLE`]. Only one
	/// reaper may exist per process.
	pub fn install(mode: WaitMode) -> Result<Self, ReaperError> {
		if INSTALLED
			.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
			.is_err()
		{
			return Err(ReaperError::AlreadyInstalled);
		}
		CHILD.store(0, Ordering::SeqCst);
		STATUS.store(NO_STATUS, Ordering::SeqCst);

		let handler = match mode {
			WaitMode::Blocking => forward_only as extern "C" fn(libc::c_int),
			WaitMode::Cooperative => reap_nonblocking as extern "C" fn(libc::c_int),
		};
		let action = SigAction::new(SigHandler::Handler(handler), SaFlags::SA_RESTART, SigSet::empty());

		let mut reaper = Self {
			mode,
			previous: Vec::with_capacity(CATCHABLE.len()),
		};
		for sig in CATCHABLE {
			// SAFETY: both handlers only use async-signal-safe calls and atomics.
			let old = unsafe { signal::sigaction(sig, &action) }?;
			reaper.previous.push((sig, old));
		}
		tracing::debug!("signal handlers installed ({:?} mode)", mode);
		Ok(reaper)
	}

	pub fn mode(&self) -> WaitMode {
		self.mode
	}

	/// Holds back every catchable signal until the returned guard is dropped.
	/// Used around fork so nothing is delivered before the child is armed.
	pub fn block(&self) -> Result<SignalBlock, ReaperError> {
		let mut set = SigSet::empty();
		for sig in CATCHABLE {
			set.add(sig);
		}
		let mut previous = SigSet::empty();
		signal::sigprocmask(SigmaskHow::SIG_BLOCK, Some(&set), Some(&mut previous))?;
		Ok(SignalBlock { previous })
	}

	/// Records the child handlers forward signals to.
	pub fn arm(&self, child: Pid) {
		CHILD.store(child.as_raw(), Ordering::SeqCst);
	}

	/// The raw status stored by the SIGCHLD handler, if any yet.
	pub fn raw_status(&self) -> Option<i32> {
		match STATUS.load(Ordering::SeqCst) {
			NO_STATUS => None,
			raw => Some(raw),
		}
	}
}

impl Drop for Reaper {
	fn drop(&mut self) {
		for (sig, old) in self.previous.drain(..) {
			// SAFETY: reinstates whatever disposition was there before install.
			if let Err(e) = unsafe { signal::sigaction(sig, &old) } {
				tracing::warn!("failed to restore {:?}: {}", sig, e);
			}
		}
		CHILD.store(0, Ordering::SeqCst);
		STATUS.store(NO_STATUS, Ordering::SeqCst);
		INSTALLED.store(false, Ordering::SeqCst);
	}
}

/// Catchable signals blocked; dropping restores the mask from before.
#[derive(Debug)]
pub struct SignalBlock {
	previous: SigSet,
}

impl SignalBlock {
	/// The mask in effect before blocking; the child is given this one.
	pub fn previous(&self) -> &SigSet {
		&self.previous
	}
}

impl Drop for SignalBlock {
	fn drop(&mut self) {
		if let Err(e) = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None) {
			tracing::warn!("failed to restore signal mask: {}", e);
		}
	}
}

/// Blocking wait for `child`, retried when a signal interrupts it.
/// Returns the raw wait status.
pub fn wait_blocking(child: Pid) -> Result<i32, Errno> {
	loop {
		let mut raw: libc::c_int = 0;
		// SAFETY: plain waitpid on our own child with a valid status pointer.
		let res = unsafe { libc::waitpid(child.as_raw(), &mut raw, 0) };
		match Errno::result(res) {
			Ok(_) => return Ok(raw),
			Err(Errno::EINTR) => continue,
			Err(e) => return Err(e),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_catchable_excludes_sigkill() {
		assert!(!CATCHABLE.contains(&Signal::SIGKILL));
		assert!(CATCHABLE.contains(&Signal::SIGCHLD));
		assert!(CATCHABLE.contains(&Signal::SIGTERM));
		assert!(CATCHABLE.contains(&Signal::SIGINT));
	}

	#[test]
	fn test_wait_mode_default() {
		assert_eq!(WaitMode::default(), WaitMode::Blocking);
	}
}
