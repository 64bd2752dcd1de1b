//! picstash command-line entry point.

mod commands;
mod config;
mod render;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::Session;
use crate::config::Config;

#[derive(Parser)]
#[command(name = "picstash", version)]
#[command(about = "Upload, download and inspect images in a picstash store", long_about = None)]
struct Cli {
    /// Configuration file (default: platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Upload a local file.
    Upload {
        file: PathBuf,

        /// Destination key (default: `<default_prefix>/<file name>`).
        #[arg(long)]
        to: Option<String>,

        /// Content type (default: detected from the file extension).
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Download a stored object to a local path.
    Download { key: String, destination: PathBuf },
    /// Print the metadata recorded for a stored object.
    Stat { key: String },
}

fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the JSON result.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "starting picstash");

    let config_path = cli.config.unwrap_or_else(config::config_path);
    let config = Config::load(&config_path)?;
    tracing::debug!(
        path = %config_path.display(),
        storage_root = %config.storage_root.display(),
        "configuration loaded"
    );

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(cli.cmd, config))
}

async fn run(cmd: Command, config: Config) -> anyhow::Result<()> {
    let session = Session::open(&config)?;

    let report = match cmd {
        Command::Upload {
            file,
            to,
            content_type,
        } => {
            session
                .upload(&file, to.as_deref(), content_type.as_deref())
                .await?
        }
        Command::Download { key, destination } => session.download(&key, destination).await?,
        Command::Stat { key } => {
            let metadata = session.stat(&key).await?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            return Ok(());
        }
    };

    println!("{}", serde_json::to_string_pretty(&report)?);
    match report.error {
        Some(error) => anyhow::bail!("{} {}: {error}", report.direction, report.state),
        None => Ok(()),
    }
}
