//! Loading of CDM artifacts into the property graph, gated by the
//! reachability filter.

use std::collections::HashSet;
use std::path::PathBuf;

use strum::IntoEnumIterator as _;

use crate::cdm::statement::Statement;
use crate::cdm::CdmDocument;
use crate::common::{self, SourceName};

pub mod graph;

use graph::GraphWriter;

/// Compute the set of entity IDs that survive normalization and are loaded.
///
/// A statement is admitted iff every required concept normalized: the subject
/// variant carries a defining constraint, and neither gene, disease, nor any
/// therapy (group member) carries a failure marker.  Evidence statements are
/// considered before assertions so that evidence-line references can be
/// checked against the admitted set at write time; a dropped reference does
/// not block the assertion itself.
pub fn ids_to_load(document: &CdmDocument) -> HashSet<String> {
    let mut ids = HashSet::new();
    for statement in document
        .statements_evidence
        .iter()
        .chain(document.statements_assertions.iter())
    {
        if let Some(admitted) = admitted_ids(statement) {
            ids.extend(admitted);
        }
    }
    ids
}

/// The IDs contributed by one statement, or `None` when the statement is not
/// admitted.
fn admitted_ids(statement: &Statement) -> Option<Vec<String>> {
    let proposition = &statement.proposition;

    let variant = proposition.subject_variant();
    if !variant.is_admissible() {
        return None;
    }

    let gene = proposition.gene_context();
    if gene.map(|gene| gene.failed_to_normalize()).unwrap_or(false) {
        return None;
    }
    let condition = proposition.condition();
    if condition.failed_to_normalize() {
        return None;
    }

    let mut ids = vec![variant.id.clone(), statement.id.clone()];
    if let Some(gene_id) = gene.and_then(|gene| gene.id.clone()) {
        ids.push(gene_id);
    }
    if let Some(condition_id) = condition.id.clone() {
        ids.push(condition_id);
    }

    if let Some(therapeutic) = proposition.therapeutic() {
        if therapeutic.failed_to_normalize() {
            return None;
        }
        if let Some(therapeutic_id) = therapeutic.id() {
            ids.push(therapeutic_id.to_string());
        }
    }

    ids.push(statement.specified_by.id.clone());
    for document in statement.reported_in.iter().flatten() {
        if let Some(document_id) = &document.id {
            ids.push(document_id.clone());
        }
    }

    Some(ids)
}

/// Write one CDM document into the graph in the fixed node order; returns the
/// number of loaded statements.
pub async fn load_document(
    writer: &mut dyn GraphWriter,
    document: &CdmDocument,
) -> Result<usize, anyhow::Error> {
    let ids = ids_to_load(document);
    let value = serde_json::to_value(document)
        .map_err(|e| anyhow::anyhow!("could not serialize CDM document: {}", e))?;

    for categorical_variant in value["categorical_variants"].as_array().into_iter().flatten() {
        graph::add_categorical_variant(writer, categorical_variant, &ids).await?;
    }
    for doc in value["documents"].as_array().into_iter().flatten() {
        graph::add_document(writer, doc, &ids).await?;
    }
    for method in value["methods"].as_array().into_iter().flatten() {
        graph::add_method(writer, method, &ids).await?;
    }
    for key in ["genes", "conditions"] {
        for concept in value[key].as_array().into_iter().flatten() {
            graph::add_gene_or_disease(writer, concept, &ids).await?;
        }
    }
    for therapy in value["therapies"].as_array().into_iter().flatten() {
        graph::add_therapy_or_group(writer, therapy, &ids).await?;
    }

    // Statements always come last.
    let mut loaded = 0;
    for statement in value["statements_evidence"].as_array().into_iter().flatten() {
        if graph::add_statement_evidence(writer, statement, &ids).await? {
            loaded += 1;
        }
    }
    for statement in value["statements_assertions"].as_array().into_iter().flatten() {
        if graph::add_statement_assertion(writer, statement, &ids).await? {
            loaded += 1;
        }
    }

    Ok(loaded)
}

/// Command line arguments for `load` subcommand.
#[derive(Debug, clap::Parser)]
#[command(about = "load CDM JSON into the graph database", long_about = None)]
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
    /// Clear the database and load the most recent local CDM files (the
    /// default mode).
    #[clap(long, conflicts_with_all = ["load_target_cdm", "load_latest_s3_cdms"])]
    pub load_latest_cdms: bool,
    /// Load the CDM file at the given path, without clearing.
    #[clap(long, conflicts_with_all = ["load_latest_cdms", "load_latest_s3_cdms"])]
    pub load_target_cdm: Option<PathBuf>,
    /// Clear the database, retrieve the most recent CDM files from S3, and
    /// load them.
    #[clap(long, conflicts_with_all = ["load_latest_cdms", "load_target_cdm"])]
    pub load_latest_s3_cdms: bool,
    /// Path to the data directory.
    #[clap(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// S3 `<bucket>/<prefix>` holding CDM artifacts.
    #[clap(long, default_value = "vicc-metakb/cdm")]
    pub s3_path: String,
}

/// Resolve a database parameter from its flag or environment variable.
fn check_db_param(
    value: &Option<String>,
    env_var: &str,
    default: Option<&str>,
) -> Result<String, anyhow::Error> {
    if let Some(value) = value {
        return Ok(value.clone());
    }
    if let Ok(value) = std::env::var(env_var) {
        return Ok(value);
    }
    match default {
        Some(default) => Ok(default.to_string()),
        None => anyhow::bail!(
            "database parameter missing: set {} or pass the corresponding option",
            env_var
        ),
    }
}

/// Main entry point for the `load` sub command.
pub async fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    let db_url = check_db_param(&args.db_url, "METAKB_DB_URL", Some("http://localhost:7474"))?;
    let db_username = check_db_param(&args.db_username, "METAKB_DB_USERNAME", Some("neo4j"))?;
    let db_password = check_db_param(&args.db_password, "METAKB_DB_PASSWORD", None)?;

    let mut writer = graph::Neo4jHttpWriter::new(&db_url, &args.db_name, &db_username, &db_password)?;
    graph::create_constraints(&mut writer).await?;

    let paths = if let Some(target) = &args.load_target_cdm {
        vec![target.clone()]
    } else if args.load_latest_s3_cdms {
        graph::clear(&mut writer).await?;
        common::s3::download_latest_cdms(
            &args.s3_path,
            &args.data_dir,
            &SourceName::iter().collect::<Vec<_>>(),
        )
        .await?
    } else {
        graph::clear(&mut writer).await?;
        SourceName::iter()
            .map(|source| {
                common::io::latest_artifact(
                    &args.data_dir.join(source.to_string()).join("transform"),
                    &source.to_string(),
                    "cdm",
                )
            })
            .collect::<Result<Vec<_>, _>>()?
    };

    let mut loaded_statements = 0;
    for path in &paths {
        tracing::info!("loading data from {:?}", path);
        let document: CdmDocument = common::io::read_json(path)?;
        loaded_statements += load_document(&mut writer, &document).await?;
    }
    tracing::info!("successfully loaded {} statements", loaded_statements);

    tracing::info!("All of `load` completed in {:?}", before_anything.elapsed());
    Ok(())
}
