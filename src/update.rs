//! Implementation of the `update` subcommand: transform the latest harvests
//! and load the resulting CDM files into the graph database.

use std::path::PathBuf;

use crate::{load, transform};

/// Command line arguments for `update` subcommand.
#[derive(Debug, clap::Parser)]
#[command(about = "transform latest harvests and load the graph database", long_about = None)]
pub struct Args {
    /// URL endpoint of the graph database HTTP API; also via METAKB_DB_URL.
    #[clap(long)]
    pub db_url: Option<String>,
    /// Username for the graph database; also via METAKB_DB_USERNAME.
    #[clap(long)]
    pub db_username: Option<String>,
    /// Password for the graph database; also via METAKB_DB_PASSWORD.
    #[clap(long)]
    pub db_password: Option<String>,
    /// Name of the graph database.
    #[clap(long, default_value = "neo4j")]
    pub db_name: String,
    /// Path to the data directory.
    #[clap(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// Base URL for all normalizer services; per-service environment
    /// variables take precedence.
    #[clap(long)]
    pub normalizer_url: Option<String>,
    /// Maximum concurrent variation normalizer requests.
    #[clap(long, default_value_t = 1)]
    pub normalizer_concurrency: usize,
}

/// Main entry point for the `update` sub command.
pub async fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let transform_args = transform::Args {
        source: vec![],
        data_dir: args.data_dir.clone(),
        harvester_path: None,
        normalizer_url: args.normalizer_url.clone(),
        normalizer_concurrency: args.normalizer_concurrency,
    };
    transform::run(args_common, &transform_args).await?;

    let load_args = load::Args {
        db_url: args.db_url.clone(),
        db_username: args.db_username.clone(),
        db_password: args.db_password.clone(),
        db_name: args.db_name.clone(),
        load_latest_cdms: true,
        load_target_cdm: None,
        load_latest_s3_cdms: false,
        data_dir: args.data_dir.clone(),
        s3_path: "vicc-metakb/cdm".to_string(),
    };
    load::run(args_common, &load_args).await
}
