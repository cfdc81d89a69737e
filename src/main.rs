//! MetaKB worker main executable.

pub mod cdm;
pub mod check;
pub mod common;
pub mod load;
pub mod normalize;
pub mod transform;
pub mod update;

use clap::{Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "MetaKB heavy lifting",
    long_about = "This tool performs the transform and load heavy lifting for the MetaKB knowledge graph"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum Commands {
    /// Transform harvested source JSON to CDM JSON.
    Transform(transform::Args),
    /// Load CDM JSON into the graph database.
    Load(load::Args),
    /// Transform the latest harvests and load the graph database.
    Update(update::Args),
    /// Health-check the normalizer services.
    Check(check::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector and go into sub commands.
    let term = Term::stderr();
    tracing::subscriber::with_default(collector, || {
        tracing::info!("metakb-worker {} starting up", common::worker_version());
        let runtime = tokio::runtime::Runtime::new()?;
        runtime.block_on(async {
            match &cli.command {
                Commands::Transform(args) => transform::run(&cli.common, args).await?,
                Commands::Load(args) => load::run(&cli.common, args).await?,
                Commands::Update(args) => update::run(&cli.common, args).await?,
                Commands::Check(args) => check::run(&cli.common, args).await?,
            }

            Ok::<(), anyhow::Error>(())
        })
    })?;
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
