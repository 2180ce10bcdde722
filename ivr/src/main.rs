// ivr/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use ivr_common::config::Config;
use ivr_common::error::{IvrError, Result};
use ivr_core::Session;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error, warn};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::CliArgs;

fn init_logging(config: &Config, verbose: u8) {
    let level_filter = match verbose {
        0 => LevelFilter::WARN,
        1 => LevelFilter::INFO,
        2 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::WARN);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("IVR_LOG")
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if verbose == 0 {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Warning:".yellow().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
        return;
    }

    let file_appender = tracing_appender::rolling::daily(&log_dir, "ivr.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);
    let stderr_writer = std::io::stderr.with_max_level(max_log_level);
    let file_writer = non_blocking_appender.with_max_level(max_log_level);

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(stderr_writer.and(file_writer))
        .with_ansi(true)
        .without_time()
        .try_init();

    // the appender flushes on drop, so the guard has to outlive main
    Box::leak(Box::new(guard));

    debug!(
        "Verbose logging enabled. Writing logs to: {}/ivr.log",
        log_dir.display()
    );
}

fn load_config(cli_args: &CliArgs) -> Result<Config> {
    let mut config = Config::load_with(cli_args.settings.as_deref())?;
    if cli_args.offline {
        config.offline = true;
    }
    Ok(config)
}

async fn run(cli_args: CliArgs, config: Config) -> Result<()> {
    let session = Session::from_config(config)?;

    let cancel = session.cancel_signal().clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling outstanding work");
            cancel.cancel();
        }
    });

    cli_args.command.run(&session).await
}

#[tokio::main]
async fn main() {
    let cli_args = CliArgs::parse();

    let config = match load_config(&cli_args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}: {}", "Error".red().bold(), e);
            process::exit(e.exit_code());
        }
    };
    init_logging(&config, cli_args.verbose);

    if let Err(e) = run(cli_args, config).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {}", "Error".red().bold(), e);
        if matches!(e.root_cause(), IvrError::Cancelled) {
            eprintln!("{}", "Nothing was written to the cache.".yellow());
        }
        process::exit(e.exit_code());
    }

    debug!("Command completed successfully.");
}
