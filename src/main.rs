use std::{
    env,
    io::{self, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    time::Instant,
};

use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use log::{error, info, LevelFilter};
use simplelog::{ConfigBuilder, SimpleLogger, WriteLogger};

use restic_backup::{
    display::banner, logging, CommandBuilder, Configuration, Operation, ProcessExecutor, Runner,
};

/// Restic backup tool: run restic with the repository, password and sources of a JSON config file.
#[derive(Parser, Debug)]
#[command(name = "restic-backup", version, about)]
struct Cli {
    /// Write the output to a timestamped file in the log directory
    #[arg(short, long)]
    log: bool,

    /// Directory relative paths in the config file are resolved against
    /// [default: directory of this program]
    #[arg(long, value_name = "DIR", env = "RESTIC_BACKUP_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// The JSON config file
    config_file: PathBuf,

    /// The sub-command, followed by its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "SUB_COMMAND")]
    sub_command: Vec<String>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            if log::max_level() == LevelFilter::Off {
                eprintln!("{err:#}");
            } else {
                error!("{err:#}");
            }
            ExitCode::FAILURE
        }
    }
}

fn program_dir() -> Result<PathBuf> {
    let exe = env::current_exe().context("cannot determine program path")?;
    exe.parent()
        .map(Path::to_path_buf)
        .context("program path has no parent directory")
}

fn init_logging(config: &Configuration, to_file: bool) -> Result<()> {
    let log_config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();

    if !to_file {
        SimpleLogger::init(LevelFilter::Info, log_config)?;
        return Ok(());
    }

    let now = Local::now().naive_local();
    let dir = config.log_directory_absolute()?;
    let (path, file) = logging::create_log_file(&dir, now)?;
    WriteLogger::init(LevelFilter::Info, log_config, file)?;
    info!("logging to {}", path.display());
    _ = logging::remove_expired_logs(&dir, now, config.log_retention_days())?;
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    let start = Instant::now();
    let operation = Operation::from_args(&cli.sub_command)?;

    let base_dir = match &cli.base_dir {
        Some(dir) => dir.clone(),
        None => program_dir()?,
    };
    let config = Configuration::from_file(&cli.config_file, base_dir)?;

    // restic reads the password from stdout; nothing else may be written
    if operation == Operation::Password {
        let mut stdout = io::stdout().lock();
        write!(stdout, "{}", config.password())?;
        stdout.flush()?;
        return Ok(());
    }

    init_logging(&config, cli.log)?;

    banner("config");
    info!("{}", serde_json::to_string_pretty(&config)?);
    banner("starting");

    let program = env::current_exe().context("cannot determine program path")?;
    let config_file = std::path::absolute(&cli.config_file)
        .with_context(|| format!("cannot resolve {}", cli.config_file.display()))?;
    let builder = CommandBuilder::new(&config, program, config_file)?;
    let mut runner = Runner::new(builder, ProcessExecutor);
    runner.run(&operation, &mut rand::rng())?;

    banner(format!(
        "COMPLETE in {:.0} seconds.",
        start.elapsed().as_secs_f64()
    ));
    Ok(())
}
