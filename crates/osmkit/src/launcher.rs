//! Fork-then-exec of the managed child.
//!
//! Every string the child needs is turned into a NUL-terminated buffer before
//! `fork`. Between `fork` and `execve` the child only calls async-signal-safe
//! functions and writes its pid into buffers sized for it in advance; it never
//! allocates, never logs, and never returns into supervisor code.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use libc::c_char;
use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow};
use nix::unistd::{fork, ForkResult, Pid};

use crate::argv::{Arg, ArgumentVector};
use crate::environment::Environment;
use crate::error::LaunchError;
use crate::reaper::CATCHABLE;

pub const DEFAULT_PID_ENV: &str = "OSM_PID";

/// Status the child exits with when the image cannot be replaced.
pub const EXEC_FAILURE_CODE: i32 = 127;

// Room for any pid_t in decimal plus the terminating NUL.
const PID_SLOT_LEN: usize = 12;

/// The managed child: its pid and the last raw wait status observed for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildHandle {
	pid: Pid,
	raw_status: Option<i32>,
}

impl ChildHandle {
	pub(crate) fn new(pid: Pid) -> Self {
		Self {
			pid,
			raw_status: None,
		}
	}

	pub fn pid(&self) -> Pid {
		self.pid
	}

	pub fn raw_status(&self) -> Option<i32> {
		self.raw_status
	}

	pub(crate) fn record(&mut self, raw: i32) {
		self.raw_status = Some(raw);
	}
}

#[derive(Debug, Clone, Copy)]
enum PidSlot {
	Arg(usize),
	Env { index: usize, offset: usize },
}

/// Everything needed to start the child, prepared ahead of `fork`.
#[derive(Debug)]
pub struct LaunchPlan {
	program: String,
	path: PathBuf,
	c_path: CString,
	argv: Vec<Vec<u8>>,
	envp: Vec<Vec<u8>>,
	pid_slots: Vec<PidSlot>,
	failure_banner: Vec<u8>,
}

impl LaunchPlan {
	/// `env` becomes the child's entire environment, plus `pid_env`.
	pub fn new(argv: &ArgumentVector, env: &Environment, pid_env: &str) -> Result<Self, LaunchError> {
		if pid_env.is_empty() || pid_env.contains('=') || pid_env.contains('\0') {
			return Err(LaunchError::InvalidString {
				what: format!("pid variable name {:?}", pid_env),
			});
		}

		let path = resolve_program(argv.program(), env);
		let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| LaunchError::InvalidString {
			what: format!("program path {}", path.display()),
		})?;

		let mut pid_slots = Vec::new();
		let mut args = vec![nul_terminated(argv.program().as_bytes())];
		for arg in argv.args() {
			match arg {
				Arg::Text(text) => args.push(nul_terminated(text.as_bytes())),
				Arg::ChildPid => {
					pid_slots.push(PidSlot::Arg(args.len()));
					args.push(vec![0; PID_SLOT_LEN]);
				}
			}
		}

		let mut child_env = env.clone();
		child_env.remove(pid_env);
		let mut envp: Vec<Vec<u8>> = child_env
			.to_envp()
			.map_err(|key| LaunchError::InvalidString {
				what: format!("environment variable {}", key),
			})?
			.into_iter()
			.map(CString::into_bytes_with_nul)
			.collect();

		let mut pid_var = format!("{}=", pid_env).into_bytes();
		let offset = pid_var.len();
		pid_var.resize(offset + PID_SLOT_LEN, 0);
		pid_slots.push(PidSlot::Env { index: envp.len(), offset });
		envp.push(pid_var);

		let failure_banner =
			format!("osmanager: failed to launch {}: ", argv.program()).into_bytes();

		Ok(Self {
			program: argv.program().to_string(),
			path,
			c_path,
			argv: args,
			envp,
			pid_slots,
			failure_banner,
		})
	}

	pub fn program(&self) -> &str {
		&self.program
	}

	/// Where `execve` will look for the program.
	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Forks and execs the child. `child_mask` is the signal mask the child
	/// gets back before exec.
	///
	/// Only the parent returns. A child whose exec fails reports the OS error
	/// on stderr and exits with [`EXEC_FAILURE_CODE`].
	pub fn launch(&mut self, child_mask: &SigSet) -> Result<ChildHandle, LaunchError> {
		let argv: Vec<*const c_char> = self
			.argv
			.iter_mut()
			.map(|buf| buf.as_mut_ptr() as *const c_char)
			.chain(std::iter::once(std::ptr::null()))
			.collect();
		let envp: Vec<*const c_char> = self
			.envp
			.iter_mut()
			.map(|buf| buf.as_mut_ptr() as *const c_char)
			.chain(std::iter::once(std::ptr::null()))
			.collect();
		let slots: Vec<*mut u8> = self
			.pid_slots
			.iter()
			.map(|slot| match *slot {
				PidSlot::Arg(i) => self.argv[i].as_mut_ptr(),
				// SAFETY: offset + PID_SLOT_LEN == buffer length, set in new()
				PidSlot::Env { index, offset } => unsafe { self.envp[index].as_mut_ptr().add(offset) },
			})
			.collect();

		// SAFETY: the child only runs exec_child, which sticks to
		// async-signal-safe calls and never returns.
		match unsafe { fork() } {
			Ok(ForkResult::Child) => exec_child(ChildImage {
				path: self.c_path.as_ptr(),
				argv: &argv,
				envp: &envp,
				pid_slots: &slots,
				mask: child_mask,
				failure_banner: &self.failure_banner,
			}),
			Ok(ForkResult::Parent { child }) => {
				tracing::info!("launched {} (pid {})", self.program, child);
				Ok(ChildHandle::new(child))
			}
			Err(e) => Err(LaunchError::Fork(e)),
		}
	}
}

struct ChildImage<'a> {
	path: *const c_char,
	argv: &'a [*const c_char],
	envp: &'a [*const c_char],
	pid_slots: &'a [*mut u8],
	mask: &'a SigSet,
	failure_banner: &'a [u8],
}

fn exec_child(image: ChildImage<'_>) -> ! {
	let pid = nix::unistd::getpid().as_raw();
	for &slot in image.pid_slots {
		// SAFETY: every slot points at PID_SLOT_LEN writable bytes owned by
		// the plan, which outlives this call.
		let buf = unsafe { &mut *(slot as *mut [u8; PID_SLOT_LEN]) };
		format_pid(pid, buf);
	}

	let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
	for sig in CATCHABLE {
		// SAFETY: restoring the default disposition installs no handler.
		let _ = unsafe { signal::sigaction(sig, &default) };
	}
	let _ = signal::sigprocmask(SigmaskHow::SIG_SETMASK, Some(image.mask), None);

	// SAFETY: all three arrays are NUL-terminated and point into live buffers.
	unsafe {
		libc::execve(image.path, image.argv.as_ptr(), image.envp.as_ptr());
	}

	let errno = Errno::last();
	write_stderr(image.failure_banner);
	write_stderr(errno.desc().as_bytes());
	write_stderr(b"\n");
	// SAFETY: _exit skips atexit handlers and destructors that belong to the parent.
	unsafe { libc::_exit(EXEC_FAILURE_CODE) }
}

fn write_stderr(bytes: &[u8]) {
	// SAFETY: write(2) is async-signal-safe; the slice is valid for its length.
	unsafe {
		libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
	}
}

/// Writes `pid` in decimal followed by a NUL. Allocation free.
fn format_pid(pid: i32, out: &mut [u8; PID_SLOT_LEN]) -> usize {
	let mut digits = [0u8; PID_SLOT_LEN];
	let mut n = pid.unsigned_abs();
	let mut start = digits.len();
	loop {
		start -= 1;
		digits[start] = b'0' + (n % 10) as u8;
		n /= 10;
		if n == 0 {
			break;
		}
	}
	if pid < 0 {
		start -= 1;
		digits[start] = b'-';
	}
	let len = digits.len() - start;
	out[..len].copy_from_slice(&digits[start..]);
	out[len] = 0;
	len
}

fn nul_terminated(bytes: &[u8]) -> Vec<u8> {
	let mut buf = Vec::with_capacity(bytes.len() + 1);
	buf.extend_from_slice(bytes);
	buf.push(0);
	buf
}

/// Looks `program` up on the `PATH` of `env`. Names containing `/` are used
/// as given; a name not found anywhere is returned unchanged so that the
/// failure surfaces from exec in the child.
pub fn resolve_program(program: &str, env: &Environment) -> PathBuf {
	if program.contains('/') {
		return PathBuf::from(program);
	}
	if let Some(paths) = env.get("PATH") {
		for dir in std::env::split_paths(paths) {
			let candidate = dir.join(program);
			if is_executable(&candidate) {
				return candidate;
			}
		}
	}
	PathBuf::from(program)
}

fn is_executable(path: &Path) -> bool {
	std::fs::metadata(path)
		.map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
		.unwrap_or(false)
}
