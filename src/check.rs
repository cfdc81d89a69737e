//! Implementation of the `check` subcommand: basic health checks on the
//! concept normalizer services.

use crate::normalize::{rest::NormalizerEndpoints, NormalizeError, ViccNormalizers};

/// Command line arguments for `check` subcommand.
#[derive(Debug, clap::Parser)]
#[command(about = "health-check the normalizer services", long_about = None)]
pub struct Args {
    /// Base URL for all normalizer services; per-service environment
    /// variables take precedence.
    #[clap(long)]
    pub normalizer_url: Option<String>,
}

/// Canary queries with well-known normalizations, one per service.
const GENE_CANARY: &str = "BRAF";
const DISEASE_CANARY: &str = "von hippel-lindau syndrome";
const THERAPY_CANARY: &str = "cisplatin";
const VARIATION_CANARY: &str = "BRAF V600E";

/// Run the canary queries against each normalizer; returns whether all four
/// services answered with a match.
pub async fn check_normalizers(normalizers: &ViccNormalizers) -> Result<bool, NormalizeError> {
    let mut success = true;

    for (service, outcome) in [
        (
            "gene",
            normalizers.normalize_gene(GENE_CANARY).await?.normalized_id,
        ),
        (
            "disease",
            normalizers
                .normalize_disease(DISEASE_CANARY)
                .await?
                .normalized_id,
        ),
        (
            "therapy",
            normalizers
                .normalize_therapy(THERAPY_CANARY)
                .await?
                .normalized_id,
        ),
    ] {
        match outcome {
            Some(normalized_id) => {
                tracing::info!("{} normalizer ok ({})", service, normalized_id);
            }
            None => {
                tracing::warn!(
                    "{} normalizer did not match its canary query; data may be unpopulated",
                    service
                );
                success = false;
            }
        }
    }

    match normalizers.normalize_variation(VARIATION_CANARY).await? {
        Some(allele) => {
            tracing::info!(
                "variation normalizer ok ({})",
                allele.id.as_deref().unwrap_or("<no id>")
            );
        }
        None => {
            tracing::warn!("variation normalizer did not normalize its canary query");
            success = false;
        }
    }

    Ok(success)
}

/// Main entry point for the `check` sub command.
pub async fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let mut endpoints = NormalizerEndpoints::from_env();
    if let Some(url) = &args.normalizer_url {
        endpoints = NormalizerEndpoints {
            gene: url.clone(),
            disease: url.clone(),
            therapy: url.clone(),
            variation: url.clone(),
        };
    }
    let normalizers = ViccNormalizers::from_endpoints(&endpoints)?;

    if check_normalizers(&normalizers).await? {
        tracing::info!("all normalizer services pass");
        Ok(())
    } else {
        anyhow::bail!("one or more normalizer services failed their checks");
    }
}
