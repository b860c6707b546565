use std::path::PathBuf;
use std::process::{Command, Output, Stdio};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

const BIN: &str = env!("CARGO_BIN_EXE_osmanager");

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("osmanager-e2e-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::remove_dir_all(&dir);
	std::fs::create_dir_all(&dir).unwrap();
	dir
}

fn toml_list(values: &[&str]) -> String {
	let quoted: Vec<String> = values.iter().map(|v| format!("{:?}", v)).collect();
	format!("[{}]", quoted.join(", "))
}

/// A test setup: settings file, config file and database inside one temp dir.
struct Setup {
	dir: PathBuf,
	settings: PathBuf,
}

impl Setup {
	fn new(name: &str, program: &str, template: &str, values: &[&str]) -> Self {
		Self::with_options(name, program, template, values, "", None)
	}

	fn with_options(
		name: &str,
		program: &str,
		template: &str,
		values: &[&str],
		extra: &str,
		config: Option<&str>,
	) -> Self {
		let dir = temp_dir(name);
		let cfg = dir.join("osmconf.cfg");
		let db = dir.join("osm.db");
		let config = match config {
			Some(c) => c.to_string(),
			None => format!("DB_FILE={}\n", db.display()),
		};
		std::fs::write(&cfg, config).unwrap();

		let settings = dir.join("supervisor.toml");
		let content = format!(
			"config_file = {:?}\ndatabase_default = {:?}\n{}\n[child]\nprogram = {:?}\ntemplate = {:?}\nvalues = {}\n",
			cfg.display().to_string(),
			db.display().to_string(),
			extra,
			program,
			template,
			toml_list(values),
		);
		std::fs::write(&settings, content).unwrap();
		Self { dir, settings }
	}

	fn command(&self, args: &[&str]) -> Command {
		let mut cmd = Command::new(BIN);
		cmd.args(args).arg("--settings").arg(&self.settings);
		cmd.env_remove("OSM_SETTINGS");
		cmd
	}

	fn run(&self, args: &[&str]) -> Output {
		self.command(args).output().unwrap()
	}

	fn path(&self, name: &str) -> PathBuf {
		self.dir.join(name)
	}
}

impl Drop for Setup {
	fn drop(&mut self) {
		let _ = std::fs::remove_dir_all(&self.dir);
	}
}

fn shell(name: &str, script: &str) -> Setup {
	Setup::new(name, "sh", "shell %s script %s", &["-c", script])
}

fn stderr(out: &Output) -> String {
	String::from_utf8_lossy(&out.stderr).into_owned()
}

// --- Exit status propagation ---

#[test]
fn exit_code_is_propagated() {
	let setup = shell("exit7", "exit 7");
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(7), "stderr: {}", stderr(&out));
	assert!(stderr(&out).contains("exited with 7"));
	assert!(setup.path("osm.db").exists());
}

#[test]
fn run_is_the_default_command() {
	let setup = shell("default-cmd", "exit 0");
	let out = setup.run(&[]);
	assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
}

#[test]
fn killed_child_reports_signal_number() {
	let setup = shell("sigterm", "kill -TERM $$");
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(15), "stderr: {}", stderr(&out));
	assert!(stderr(&out).contains("SIGTERM"));
}

#[test]
fn cooperative_mode_propagates_exit_code() {
	let setup = Setup::with_options(
		"cooperative",
		"sh",
		"shell %s script %s",
		&["-c", "sleep 0.2; exit 7"],
		"mode = \"cooperative\"\npoll_interval_ms = 10",
		None,
	);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(7), "stderr: {}", stderr(&out));
}

#[test]
fn cooperative_flag_overrides_settings() {
	let setup = shell("cooperative-flag", "kill -TERM $$");
	let out = setup.run(&["run", "--cooperative", "--poll-ms", "5"]);
	assert_eq!(out.status.code(), Some(15), "stderr: {}", stderr(&out));
}

// --- Startup failures ---

#[test]
fn unwritable_database_stops_before_launch() {
	let dir = temp_dir("nodb-marker");
	let marker = dir.join("launched");
	let script = format!("touch {}", marker.display());
	let setup = Setup::with_options(
		"nodb",
		"sh",
		"shell %s script %s",
		&["-c", &script],
		"",
		Some("DB_FILE=/nonexistent-osm-dir/sub/osm.db\n"),
	);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr(&out));
	assert!(!marker.exists());
	assert!(stderr(&out).contains("/nonexistent-osm-dir/sub/osm.db"));
	let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn argv_overflow_is_fatal() {
	let template = "%s ".repeat(10);
	let values = ["a"; 10];
	let setup = Setup::new("overflow", "sh", &template, &values);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr(&out));
	assert!(stderr(&out).contains("arguments"));
}

#[test]
fn missing_optional_config_still_launches() {
	let setup = Setup::with_options(
		"noconfig",
		"sh",
		"shell %s script %s",
		&["-c", "exit 0"],
		"",
		None,
	);
	std::fs::remove_file(setup.path("osmconf.cfg")).unwrap();
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
	assert!(setup.path("osm.db").exists());
}

#[test]
fn missing_required_config_is_fatal() {
	let setup = Setup::with_options(
		"required",
		"sh",
		"shell %s script %s",
		&["-c", "exit 0"],
		"config_required = true",
		None,
	);
	std::fs::remove_file(setup.path("osmconf.cfg")).unwrap();
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(1), "stderr: {}", stderr(&out));
}

#[test]
fn unreadable_optional_config_still_launches() {
	let setup = shell("cfgdir", "exit 0");
	std::fs::remove_file(setup.path("osmconf.cfg")).unwrap();
	std::fs::create_dir(setup.path("osmconf.cfg")).unwrap();
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
}

#[test]
fn non_utf8_config_value_reaches_child() {
	let setup = shell("latin1", "[ \"$NAME\" = \"$(printf 'caf\\351')\" ] && exit 42; exit 1");
	let mut config = format!("DB_FILE={}\n", setup.path("osm.db").display()).into_bytes();
	config.extend_from_slice(b"NAME=caf\xe9\n");
	std::fs::write(setup.path("osmconf.cfg"), config).unwrap();

	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(42), "stderr: {}", stderr(&out));
}

#[test]
fn exec_failure_exits_127() {
	let setup = Setup::new("noexec", "/nonexistent-osm-bin/osm", "Get the pid of the programme %i", &["{pid}"]);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(127), "stderr: {}", stderr(&out));
	assert!(stderr(&out).contains("failed to launch"));
}

#[test]
fn unknown_option_is_rejected() {
	let setup = shell("badopt", "exit 0");
	let out = setup.run(&["run", "--frobnicate"]);
	assert_eq!(out.status.code(), Some(1));
	assert!(stderr(&out).contains("unknown option"));
}

// --- Child environment and arguments ---

#[test]
fn child_sees_its_own_pid_in_env() {
	let setup = shell("pidenv", "[ \"$OSM_PID\" = \"$$\" ] && exit 42; exit 1");
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(42), "stderr: {}", stderr(&out));
}

#[test]
fn child_sees_config_variables() {
	let dir_probe = temp_dir("cfgvars-probe");
	let db = dir_probe.join("osm.db");
	let config = format!("DB_FILE={}\nGREETING=hello world\n# IGNORED=1\n", db.display());
	let setup = Setup::with_options(
		"cfgvars",
		"sh",
		"shell %s script %s",
		&["-c", "[ \"$GREETING\" = \"hello world\" ] && [ -z \"$IGNORED\" ] && [ -n \"$DB_FILE\" ] && exit 42; exit 1"],
		"",
		Some(&config),
	);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(42), "stderr: {}", stderr(&out));
	assert!(db.exists());
	let _ = std::fs::remove_dir_all(&dir_probe);
}

#[test]
fn pid_placeholder_becomes_argument() {
	let setup = Setup::new(
		"pidarg",
		"sh",
		"%s %s %s %s",
		&["-c", "[ \"$1\" = \"$$\" ] && exit 42; exit 1", "osm", "{pid}"],
	);
	let out = setup.run(&["run"]);
	assert_eq!(out.status.code(), Some(42), "stderr: {}", stderr(&out));
}

fn forward_sigterm(setup: &Setup, args: &[&str]) -> Output {
	let child = setup
		.command(args)
		.stdout(Stdio::null())
		.stderr(Stdio::piped())
		.spawn()
		.unwrap();

	std::thread::sleep(Duration::from_millis(500));
	let status = Command::new("kill")
		.arg("-TERM")
		.arg(child.id().to_string())
		.status()
		.unwrap();
	assert!(status.success());

	child.wait_with_output().unwrap()
}

#[test]
fn sigterm_is_forwarded_to_child() {
	let setup = shell("forward", "exec sleep 30");
	let out = forward_sigterm(&setup, &["run"]);
	assert_eq!(out.status.code(), Some(15), "stderr: {}", stderr(&out));
}

#[test]
fn sigterm_is_forwarded_in_cooperative_mode() {
	let setup = shell("forward-coop", "exec sleep 30");
	let out = forward_sigterm(&setup, &["run", "--cooperative", "--poll-ms", "10"]);
	assert_eq!(out.status.code(), Some(15), "stderr: {}", stderr(&out));
}

// SIGSTOP is 19 on Linux only.
#[cfg(target_os = "linux")]
#[test]
fn stopped_child_reports_stop_signal() {
	let dir = temp_dir("stopped-pid");
	let pid_file = dir.join("child.pid");
	let script = format!("echo $$ > {}; kill -STOP $$", pid_file.display());
	let setup = shell("stopped", &script);

	// The stopped child outlives the supervisor; it must not hold our pipes.
	let status = setup
		.command(&["run", "--cooperative", "--poll-ms", "10"])
		.stdout(Stdio::null())
		.stderr(Stdio::null())
		.status()
		.unwrap();

	let pid = std::fs::read_to_string(&pid_file).unwrap_or_default();
	if !pid.trim().is_empty() {
		let _ = Command::new("kill").arg("-KILL").arg(pid.trim()).status();
	}
	let _ = std::fs::remove_dir_all(&dir);

	assert_eq!(status.code(), Some(19));
}

// --- Other commands ---

#[test]
fn check_json_describes_launch_without_forking() {
	let setup = shell("check", "touch should-not-exist; exit 3");
	let out = setup.run(&["check", "--json"]);
	assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));

	let preview: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
	assert_eq!(preview["program"], "sh");
	assert_eq!(preview["argv"][0], "sh");
	assert_eq!(preview["argv"][1], "-c");
	assert_eq!(preview["pid_env"], "OSM_PID");
	assert_eq!(preview["mode"], "blocking");
	assert!(preview["env_changes"]["DB_FILE"].is_string());
	assert!(!setup.path("osm.db").exists());
}

#[test]
fn init_db_only_creates_schema() {
	let setup = shell("initdb", "exit 9");
	let out = setup.run(&["init-db"]);
	assert_eq!(out.status.code(), Some(0), "stderr: {}", stderr(&out));
	assert!(setup.path("osm.db").exists());
}

#[test]
fn version_and_help() {
	let out = Command::new(BIN).arg("version").output().unwrap();
	assert!(out.status.success());
	assert!(String::from_utf8_lossy(&out.stdout).starts_with("osmanager "));

	let out = Command::new(BIN).arg("help").output().unwrap();
	assert!(out.status.success());
	assert!(stderr(&out).contains("init-db"));
}
