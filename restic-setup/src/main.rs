//! restic-setup - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use restic_setup::config::{self, DEFAULT_CONFIG_FILE};
use restic_setup::generator::{self, current_hostname};
use restic_setup::paths::Layout;
use restic_setup::plan::Plan;
use restic_setup::runner::{executor::SystemExecutor, Runner};
use restic_setup::{install, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON, or TOML with a .toml extension)
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install restic, write the backup runner and schedule it (default)
    Install,

    /// Render the backup runner without touching the system
    Generate {
        /// Write to FILE instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Run the backup plan now, in this process
    Run,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;

    // Nothing touches the system before the configuration is known to be valid
    let config = config::load(&args.config)?;
    let mut layout = Layout::discover()?;
    if let Some(restic) = install::binary::installed_path(&layout) {
        layout.restic_binary = restic;
    }

    match args.command.unwrap_or(Command::Install) {
        Command::Install => {
            install::install(&config, &layout).await?;
        }
        Command::Generate { output } => {
            let artifacts = generator::generate(&config, &current_hostname(), &layout);
            match output {
                Some(path) => {
                    std::fs::write(&path, &artifacts.runner_script)?;
                    tracing::info!("Backup script written to {}", path.display());
                }
                None => print!("{}", artifacts.runner_script),
            }
        }
        Command::Run => {
            let plan = Plan::build(&config, &current_hostname(), &layout);
            let report = Runner::new(SystemExecutor::new()?).run(&plan).await;
            tracing::info!(
                sources = report.sources.len(),
                failed = report.failed_backups(),
                "Run complete"
            );
            std::process::exit(report.exit_code());
        }
    }

    Ok(())
}
