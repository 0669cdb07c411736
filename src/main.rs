mod config;
mod pidfile;
mod runtime;
mod signals;
mod watchdog;

use clap::Parser;
use config::{DamoclesConfig, LogConfig};
use pidfile::PidFile;
use runtime::docker::DockerRuntime;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use watchdog::Damocles;

/// A time-based watchdog for Docker containers: poll the daemon, find
/// containers older than the staleness timeout, and kill them. Meant for
/// CI hosts where hung jobs leave orphaned containers running forever.
#[derive(Parser, Debug)]
#[command(name = "docker-damocles", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "damocles.toml")]
    config: PathBuf,

    /// Seconds between cull cycles (overrides config)
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Container age limit in seconds (overrides config)
    #[arg(long)]
    timeout: Option<u64>,

    /// Docker unix socket path (overrides config)
    #[arg(long)]
    socket: Option<PathBuf>,

    /// Log file path (overrides config; default is stderr)
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// PID file path (overrides config)
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (per-poll wakeups, per-container kill attempts)
    #[arg(short, long)]
    verbose: bool,
}

/// Merge CLI flags on top of the file-loaded configuration.
fn apply_cli_overrides(config: &mut DamoclesConfig, cli: &Cli) {
    if let Some(secs) = cli.poll_interval {
        config.watchdog.poll_interval_secs = secs;
    }
    if let Some(secs) = cli.timeout {
        config.watchdog.staleness_timeout_secs = secs;
    }
    if let Some(path) = &cli.socket {
        config.docker.socket = Some(path.clone());
    }
    if let Some(path) = &cli.log_file {
        config.log.file = Some(path.clone());
    }
    if let Some(path) = &cli.pid_file {
        config.daemon.pid_file = Some(path.clone());
    }
    if cli.verbose {
        config.log.level = "debug".to_string();
    }
}

/// Set up the tracing subscriber: configured level (RUST_LOG wins),
/// stderr by default, appending to a file when one is configured.
fn init_tracing(log: &LogConfig) -> std::io::Result<()> {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    match &log.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            builder
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => builder.init(),
    }
    Ok(())
}

fn print_resolved(cli: &Cli, config: &DamoclesConfig) {
    println!("docker-damocles v{}", env!("CARGO_PKG_VERSION"));
    println!("Config file: {}", cli.config.display());
    println!("Poll interval: {}s", config.watchdog.poll_interval_secs);
    println!(
        "Staleness timeout: {}s",
        config.watchdog.staleness_timeout_secs
    );
    match &config.docker.socket {
        Some(socket) => println!("Docker socket: {}", socket.display()),
        None => println!("Docker socket: (platform default)"),
    }
    match &config.daemon.pid_file {
        Some(path) => println!("PID file: {}", path.display()),
        None => println!("PID file: (none)"),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut config = match DamoclesConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("docker-damocles: {e}");
            std::process::exit(1);
        }
    };
    apply_cli_overrides(&mut config, &cli);

    if cli.dry_run {
        print_resolved(&cli, &config);
        println!("Dry run mode — config validated, not running.");
        return;
    }

    if let Err(e) = init_tracing(&config.log) {
        eprintln!("docker-damocles: failed to set up logging: {e}");
        std::process::exit(1);
    }

    tracing::info!("docker-damocles starting");
    tracing::debug!(?cli, "parsed CLI arguments");

    let _pidfile = match &config.daemon.pid_file {
        Some(path) => match PidFile::acquire(path) {
            Ok(pidfile) => Some(pidfile),
            Err(e) => {
                tracing::error!(error = %e, "failed to acquire pid file");
                std::process::exit(1);
            }
        },
        None => None,
    };

    let docker = match DockerRuntime::connect(config.docker.socket.as_deref()) {
        Ok(docker) => Arc::new(docker),
        Err(e) => {
            tracing::error!(error = %e, "failed to construct docker client");
            std::process::exit(1);
        }
    };

    // Startup probe. A daemon that is down is not fatal: the watchdog may
    // start before Docker on a freshly booted CI host, and every poll
    // retries until it comes back.
    if let Err(e) = docker.ping().await {
        tracing::warn!(error = %e, "docker daemon unreachable at startup, polling anyway");
    }

    let cancel = CancellationToken::new();
    if let Err(e) = signals::install(cancel.clone()) {
        tracing::error!(error = %e, "failed to install signal handlers");
        std::process::exit(1);
    }

    Damocles::new(docker, &config.watchdog, cancel).run().await;
}
