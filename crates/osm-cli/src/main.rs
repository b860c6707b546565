use std::path::PathBuf;
use std::process::ExitCode;

use osmkit::launcher::EXEC_FAILURE_CODE;
use osmkit::settings::{self, Settings};
use osmkit::{storage, ChildHandle, Supervisor, SupervisorError, WaitMode, FATAL_EXIT_CODE};
use owo_colors::OwoColorize;
use tracing::Level;

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
	settings: Option<PathBuf>,
	config: Option<PathBuf>,
	mode: Option<WaitMode>,
	overwrite_env: bool,
	poll_ms: Option<u64>,
	json: bool,
	quiet: bool,
	verbose: bool,
}

impl Options {
	fn log_level(&self) -> Level {
		if self.verbose {
			Level::DEBUG
		} else if self.quiet {
			Level::WARN
		} else {
			Level::INFO
		}
	}

	fn apply(&self, settings: &mut Settings) {
		if let Some(ref config) = self.config {
			settings.config_file = config.clone();
		}
		if let Some(mode) = self.mode {
			settings.mode = mode;
		}
		if self.overwrite_env {
			settings.overwrite_env = true;
		}
		if let Some(ms) = self.poll_ms {
			settings.poll_interval_ms = ms;
		}
	}
}

fn parse_options(args: &[String]) -> Result<Options, String> {
	let mut opts = Options::default();
	let mut iter = args.iter();
	while let Some(arg) = iter.next() {
		match arg.as_str() {
			"--settings" | "-s" => {
				let v = iter.next().ok_or("--settings needs a path")?;
				opts.settings = Some(PathBuf::from(v));
			}
			"--config" | "-c" => {
				let v = iter.next().ok_or("--config needs a path")?;
				opts.config = Some(PathBuf::from(v));
			}
			"--cooperative" => opts.mode = Some(WaitMode::Cooperative),
			"--blocking" => opts.mode = Some(WaitMode::Blocking),
			"--overwrite-env" => opts.overwrite_env = true,
			"--poll-ms" => {
				let v = iter.next().ok_or("--poll-ms needs a number")?;
				let ms = v.parse().map_err(|_| format!("invalid --poll-ms: {}", v))?;
				opts.poll_ms = Some(ms);
			}
			"--json" => opts.json = true,
			"--quiet" | "-q" => opts.quiet = true,
			"--verbose" | "-v" => opts.verbose = true,
			other => return Err(format!("unknown option: {}", other)),
		}
	}
	Ok(opts)
}

fn main() -> ExitCode {
	let args: Vec<String> = std::env::args().skip(1).collect();

	let (command, rest) = match args.first().map(|s| s.as_str()) {
		Some("help" | "--help" | "-h") => {
			print_usage();
			return ExitCode::SUCCESS;
		}
		Some("version" | "--version" | "-V") => {
			println!("osmanager {}", env!("CARGO_PKG_VERSION"));
			return ExitCode::SUCCESS;
		}
		Some(cmd @ ("run" | "check" | "init-db")) => (cmd, &args[1..]),
		_ => ("run", &args[..]),
	};

	let opts = match parse_options(rest) {
		Ok(o) => o,
		Err(msg) => {
			eprintln!("{} {}", "error:".red().bold(), msg);
			eprintln!("run 'osmanager help' for usage");
			return ExitCode::from(FATAL_EXIT_CODE);
		}
	};

	tracing_subscriber::fmt()
		.with_writer(std::io::stderr)
		.with_max_level(opts.log_level())
		.with_target(false)
		.init();

	let result = match command {
		"check" => cmd_check(&opts),
		"init-db" => cmd_init_db(&opts),
		_ => cmd_run(&opts),
	};

	match result {
		Ok(code) => ExitCode::from(code),
		Err(e) => {
			eprintln!("{} {}", "osmanager:".red().bold(), e);
			ExitCode::from(e.exit_code())
		}
	}
}

fn load(opts: &Options) -> Result<Settings, SupervisorError> {
	let mut settings = settings::load_settings(opts.settings.as_deref())?;
	opts.apply(&mut settings);
	Ok(settings)
}

fn cmd_run(opts: &Options) -> Result<u8, SupervisorError> {
	let settings = load(opts)?;
	let supervised = Supervisor::new(settings).run_with(|child: &ChildHandle| {
		tracing::trace!("child {} still running", child.pid());
	})?;

	let line = format!("child {} {}", supervised.child.pid(), supervised.outcome);
	if supervised.outcome.is_success() {
		eprintln!("{}", line.green());
	} else {
		eprintln!("{}", line.yellow());
	}
	Ok(supervised.exit_code())
}

fn cmd_check(opts: &Options) -> Result<u8, SupervisorError> {
	let settings = load(opts)?;
	let mut sup = Supervisor::new(settings);
	sup.load_config()?;
	let preview = sup.preview()?;

	if opts.json {
		match serde_json::to_string_pretty(&preview) {
			Ok(json) => println!("{}", json),
			Err(e) => {
				eprintln!("{} {}", "osmanager:".red().bold(), e);
				return Ok(FATAL_EXIT_CODE);
			}
		}
		return Ok(0);
	}

	println!("{}    {}", "program".bold(), preview.path);
	println!("{}       {}", "argv".bold(), preview.argv.join(" "));
	println!("{}    {}", "pid env".bold(), preview.pid_env);
	println!("{}       {:?}", "mode".bold(), preview.mode);
	println!("{}   {}", "database".bold(), preview.database);
	if preview.env_changes.is_empty() {
		println!("{}        {}", "env".bold(), "(unchanged)".dimmed());
	} else {
		println!("{}", "env".bold());
		for (key, value) in &preview.env_changes {
			println!("  {}={}", key.cyan(), value);
		}
	}
	Ok(0)
}

fn cmd_init_db(opts: &Options) -> Result<u8, SupervisorError> {
	let settings = load(opts)?;
	let mut sup = Supervisor::new(settings);
	sup.load_config()?;
	let path = sup.ensure_storage()?;
	println!("{} {}", "ready".green(), path.display());
	Ok(0)
}

fn print_usage() {
	eprintln!("{} {} - single-child process supervisor", "osmanager".bold(), env!("CARGO_PKG_VERSION"));
	eprintln!();
	eprintln!("usage: {} [command] [options]", "osmanager".bold());
	eprintln!();

	eprintln!("{}", "commands".cyan().bold());
	eprintln!("  {}                 Launch and supervise the child (default)", "run".bold());
	eprintln!("  {} [--json]      Show what would be launched, without forking", "check".bold());
	eprintln!("  {}             Create the usage database if needed", "init-db".bold());
	eprintln!("  {}                Show this help", "help".bold());
	eprintln!("  {}             Print the version", "version".bold());
	eprintln!();

	eprintln!("{}", "options".cyan().bold());
	eprintln!("  {} <path>    Settings file (default: $OSM_SETTINGS or ~/.config/osm/supervisor.toml)", "--settings".bold());
	eprintln!("  {} <path>      key=value file for the child environment", "--config".bold());
	eprintln!("  {}       Reap from the SIGCHLD handler and poll", "--cooperative".bold());
	eprintln!("  {}          Block in waitpid (default)", "--blocking".bold());
	eprintln!("  {}     Config values replace inherited variables", "--overwrite-env".bold());
	eprintln!("  {} <ms>       Poll interval in cooperative mode", "--poll-ms".bold());
	eprintln!("  {}, {}           Only warnings and errors", "-q".bold(), "--quiet".bold());
	eprintln!("  {}, {}         Debug logging", "-v".bold(), "--verbose".bold());
	eprintln!();

	eprintln!("{}", "exit status".cyan().bold());
	eprintln!("  the child's exit code, or its signal number if it was killed");
	eprintln!("  {} if startup failed before the child existed", FATAL_EXIT_CODE);
	eprintln!("  {} from the child if the program could not be executed", EXEC_FAILURE_CODE);
	eprintln!();
	eprintln!("database: ${} in the child environment, else {}", storage::DEFAULT_DATABASE_ENV, storage::DEFAULT_DATABASE_FILE);
}
