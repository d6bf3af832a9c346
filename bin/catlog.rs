use std::path::PathBuf;
use std::process::ExitCode;

use catlog::base::LogId;
use catlog::config::CatlogConfig;
use catlog::ctl::{self, Command};
use clap::Parser;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Parser, Debug)]
#[command(name = "catlog", version, about = "Inspect and drive a catalog recovery log")]
struct Cli {
    /// Configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the store directory from the configuration
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Catalog to operate on, as oid:gen
    #[arg(long)]
    catalog: Option<LogId>,

    /// Log level when RUST_LOG is unset
    #[arg(short, long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn init_logging(level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level.into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => match CatlogConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => CatlogConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.store.data_dir = dir;
    }
    let level = cli.log_level.unwrap_or_else(|| config.logging.level.clone());
    init_logging(&level);

    match ctl::run(&config, cli.catalog, cli.command) {
        Ok(lines) => {
            for line in lines {
                println!("{}", line);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "command failed");
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}
