//! Transformation of harvested source JSON into the common data model.

use std::path::PathBuf;

use crate::cdm::core::{Coding, ConceptMapping, Extension, MappableConcept, Relation};
use crate::cdm::statement::{Document, MembershipOperator, Method, TherapyGroup};
use crate::cdm::CdmDocument;
use crate::common::{self, SourceName};
use crate::normalize::{rest::NormalizerEndpoints, systems, ViccNormalizers};

pub mod cache;
pub mod civic;
pub mod moa;

/// Options controlling a transform run, passed into each transformer.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// Maximum concurrent variation normalizer requests.
    pub normalizer_concurrency: usize,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            // Sequential by default to keep runs deterministic and gentle on
            // the normalizer.
            normalizer_concurrency: 1,
        }
    }
}

/// The fixed curation methods, one per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodId {
    /// CIViC evidence-item curation SOP.
    CivicEidSop,
    /// MOAlmanac assertion curation method.
    MoaAssertionBiorxiv,
}

impl MethodId {
    /// The full method entity for this identifier.
    pub fn method(&self) -> Method {
        match self {
            MethodId::CivicEidSop => Method {
                id: "civic.method:2019".to_string(),
                type_: "Method".to_string(),
                name: "CIViC Curation SOP (2019)".to_string(),
                method_type: Some("variant curation standard operating procedure".to_string()),
                reported_in: Some(Document {
                    id: None,
                    type_: "Document".to_string(),
                    name: Some("Danos et al., 2019, Genome Med.".to_string()),
                    title: Some(
                        "Standard operating procedure for curation and clinical interpretation of variants in cancer"
                            .to_string(),
                    ),
                    pmid: Some(31779674),
                    doi: Some("10.1186/s13073-019-0687-x".to_string()),
                    urls: None,
                    mappings: None,
                    extensions: None,
                }),
            },
            MethodId::MoaAssertionBiorxiv => Method {
                id: "moa.method:2021".to_string(),
                type_: "Method".to_string(),
                name: "MOAlmanac (2021)".to_string(),
                method_type: Some("variant curation standard operating procedure".to_string()),
                reported_in: Some(Document {
                    id: None,
                    type_: "Document".to_string(),
                    name: Some("Reardon et al., 2021, Nat. Cancer".to_string()),
                    title: Some(
                        "Integrating molecular profiles into clinical frameworks through the Molecular Oncology Almanac to prospectively guide precision oncology"
                            .to_string(),
                    ),
                    pmid: Some(35121878),
                    doi: Some("10.1038/s43018-021-00243-3".to_string()),
                    urls: None,
                    mappings: None,
                    extensions: None,
                }),
            },
        }
    }
}

/// CIViC evidence levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
pub enum CivicEvidenceLevel {
    A,
    B,
    C,
    D,
    E,
}

impl CivicEvidenceLevel {
    /// Display name of the evidence level.
    pub fn name(&self) -> &'static str {
        match self {
            CivicEvidenceLevel::A => "Validated association",
            CivicEvidenceLevel::B => "Clinical evidence",
            CivicEvidenceLevel::C => "Case study",
            CivicEvidenceLevel::D => "Preclinical evidence",
            CivicEvidenceLevel::E => "Inferential association",
        }
    }

    /// The VICC evidence-code concept this level maps to.
    pub fn vicc_mapping(&self) -> ConceptMapping {
        let (code, name) = match self {
            CivicEvidenceLevel::A => ("e000001", "authoritative evidence"),
            CivicEvidenceLevel::B => ("e000005", "clinical cohort evidence"),
            CivicEvidenceLevel::C => ("e000008", "case study evidence"),
            CivicEvidenceLevel::D => ("e000009", "preclinical evidence"),
            CivicEvidenceLevel::E => ("e000010", "inferential evidence"),
        };
        vicc_evidence_code_mapping(code, name)
    }
}

/// MOA predictive-implication levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoaEvidenceLevel {
    FdaApproved,
    Guideline,
    ClinicalTrial,
    ClinicalEvidence,
    Preclinical,
    Inferential,
}

impl MoaEvidenceLevel {
    /// Parse the `predictive_implication` value of a MOA assertion.
    pub fn from_predictive_implication(value: &str) -> Option<Self> {
        let normalized = value.trim().replace([' ', '-'], "_").to_uppercase();
        match normalized.as_str() {
            "FDA_APPROVED" => Some(MoaEvidenceLevel::FdaApproved),
            "GUIDELINE" => Some(MoaEvidenceLevel::Guideline),
            "CLINICAL_TRIAL" => Some(MoaEvidenceLevel::ClinicalTrial),
            "CLINICAL_EVIDENCE" => Some(MoaEvidenceLevel::ClinicalEvidence),
            "PRECLINICAL" | "PRECLINICAL_EVIDENCE" => Some(MoaEvidenceLevel::Preclinical),
            "INFERENTIAL" | "INFERENTIAL_EVIDENCE" => Some(MoaEvidenceLevel::Inferential),
            _ => None,
        }
    }

    /// The source-facing level code.
    pub fn code(&self) -> &'static str {
        match self {
            MoaEvidenceLevel::FdaApproved => "FDA-Approved",
            MoaEvidenceLevel::Guideline => "Guideline",
            MoaEvidenceLevel::ClinicalTrial => "Clinical trial",
            MoaEvidenceLevel::ClinicalEvidence => "Clinical evidence",
            MoaEvidenceLevel::Preclinical => "Preclinical evidence",
            MoaEvidenceLevel::Inferential => "Inferential evidence",
        }
    }

    /// The VICC evidence-code concept this level maps to.
    pub fn vicc_mapping(&self) -> ConceptMapping {
        let (code, name) = match self {
            MoaEvidenceLevel::FdaApproved => ("e000002", "FDA recognized evidence"),
            MoaEvidenceLevel::Guideline => ("e000003", "professional guideline evidence"),
            MoaEvidenceLevel::ClinicalTrial => ("e000006", "interventional study evidence"),
            MoaEvidenceLevel::ClinicalEvidence => ("e000007", "observational study evidence"),
            MoaEvidenceLevel::Preclinical => ("e000009", "preclinical evidence"),
            MoaEvidenceLevel::Inferential => ("e000010", "inferential evidence"),
        };
        vicc_evidence_code_mapping(code, name)
    }
}

fn vicc_evidence_code_mapping(code: &str, name: &str) -> ConceptMapping {
    ConceptMapping::new(
        Coding {
            id: None,
            code: code.to_string(),
            system: systems::VICC_EVIDENCE_CODES.to_string(),
            name: Some(name.to_string()),
        },
        Relation::ExactMatch,
    )
}

/// Strength concept for a CIViC evidence level.
pub fn civic_strength(level: CivicEvidenceLevel) -> MappableConcept {
    MappableConcept {
        name: Some(level.name().to_string()),
        primary_coding: Some(Coding {
            id: None,
            code: level.to_string(),
            system: systems::CIVIC_EVIDENCE_LEVEL.to_string(),
            name: None,
        }),
        mappings: Some(vec![level.vicc_mapping()]),
        ..Default::default()
    }
}

/// Strength concept for a MOA predictive-implication level.
pub fn moa_strength(level: MoaEvidenceLevel) -> MappableConcept {
    MappableConcept {
        primary_coding: Some(Coding {
            id: None,
            code: level.code().to_string(),
            system: systems::MOA_ABOUT.to_string(),
            name: None,
        }),
        mappings: Some(vec![level.vicc_mapping()]),
        ..Default::default()
    }
}

/// Assemble a therapy group from already-built member concepts.
///
/// The group ID is `<source>.<ctid|tsgid>:<digest>` where the digest is over
/// the lexicographically sorted member IDs, so member order in the source
/// cannot change the identity.
pub fn build_therapy_group(
    source: SourceName,
    membership_operator: MembershipOperator,
    therapies: Vec<MappableConcept>,
    extensions: Option<Vec<Extension>>,
) -> Result<TherapyGroup, anyhow::Error> {
    let member_ids = therapies
        .iter()
        .map(|therapy| {
            therapy
                .id
                .clone()
                .ok_or_else(|| anyhow::anyhow!("therapy group member without id"))
        })
        .collect::<Result<Vec<_>, _>>()?;
    let digest = common::digest::digest_for_key_set(&member_ids)?;
    let prefix = match membership_operator {
        MembershipOperator::And => "ctid",
        MembershipOperator::Or => "tsgid",
    };
    TherapyGroup::new(
        format!("{}.{}:{}", source, prefix, digest),
        membership_operator,
        therapies,
        extensions,
    )
}

/// Command line arguments for `transform` subcommand.
#[derive(Debug, clap::Parser)]
#[command(about = "transform harvested source JSON to CDM JSON", long_about = None)]
pub struct Args {
    /// The sources to transform (default: all).
    #[clap(long)]
    pub source: Vec<SourceName>,
    /// Path to the data directory.
    #[clap(long, default_value = "data")]
    pub data_dir: PathBuf,
    /// Path to a previously harvested JSON file; only valid with a single
    /// `--source`.
    #[clap(long)]
    pub harvester_path: Option<PathBuf>,
    /// Base URL for all normalizer services; per-service environment
    /// variables take precedence.
    #[clap(long)]
    pub normalizer_url: Option<String>,
    /// Maximum concurrent variation normalizer requests.
    #[clap(long, default_value_t = 1)]
    pub normalizer_concurrency: usize,
}

/// Main entry point for the `transform` sub command.
pub async fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), anyhow::Error> {
    let before_anything = std::time::Instant::now();
    tracing::info!("args_common = {:#?}", &args_common);
    tracing::info!("args = {:#?}", &args);

    common::trace_rss_now();

    let sources = if args.source.is_empty() {
        vec![SourceName::Civic, SourceName::Moa]
    } else {
        args.source.clone()
    };
    if args.harvester_path.is_some() && sources.len() != 1 {
        anyhow::bail!("--harvester_path requires exactly one --source");
    }

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
    let options = TransformOptions {
        normalizer_concurrency: args.normalizer_concurrency,
    };

    for source in sources {
        let harvest_path = match &args.harvester_path {
            Some(path) => path.clone(),
            None => common::io::latest_artifact(
                &args.data_dir.join(source.to_string()).join("harvest"),
                &source.to_string(),
                "harvester",
            )?,
        };
        tracing::info!(
            "transforming {} from {:?}...",
            source.as_print_case(),
            &harvest_path
        );

        let cdm = match source {
            SourceName::Civic => {
                let harvest: civic::CivicHarvest = common::io::read_json(&harvest_path)?;
                let mut transformer = civic::CivicTransformer::new(&normalizers, options.clone());
                transformer.transform(&harvest).await?;
                transformer.finish()
            }
            SourceName::Moa => {
                let harvest: moa::MoaHarvest = common::io::read_json(&harvest_path)?;
                let mut transformer = moa::MoaTransformer::new(&normalizers, options.clone());
                transformer.transform(&harvest).await?;
                transformer.finish()
            }
        };

        // Only write after the full source transformed without fatal errors.
        let out_path =
            common::io::cdm_path(&args.data_dir, source, &common::io::today_stamp());
        common::io::write_json(&cdm, &out_path)?;
        tracing::info!(
            "wrote {} statements ({} evidence, {} assertions) to {:?}",
            cdm.statement_count(),
            cdm.statements_evidence.len(),
            cdm.statements_assertions.len(),
            &out_path
        );
    }

    common::trace_rss_now();
    tracing::info!(
        "All of `transform` completed in {:?}",
        before_anything.elapsed()
    );
    Ok(())
}

/// Finalize a transform into the CDM artifact: resolve evidence-line
/// references into embedded statements.
pub(crate) fn finish_document(mut data: CdmDocument) -> CdmDocument {
    data.embed_evidence_items();
    data
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cdm::core::ConceptType;

    fn therapy(id: &str, name: &str) -> MappableConcept {
        MappableConcept {
            id: Some(id.to_string()),
            concept_type: Some(ConceptType::Therapy),
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[rstest::rstest]
    #[case(CivicEvidenceLevel::A, "e000001", "authoritative evidence")]
    #[case(CivicEvidenceLevel::B, "e000005", "clinical cohort evidence")]
    #[case(CivicEvidenceLevel::C, "e000008", "case study evidence")]
    #[case(CivicEvidenceLevel::D, "e000009", "preclinical evidence")]
    #[case(CivicEvidenceLevel::E, "e000010", "inferential evidence")]
    fn civic_evidence_level_codes(
        #[case] level: CivicEvidenceLevel,
        #[case] code: &str,
        #[case] name: &str,
    ) {
        let mapping = level.vicc_mapping();
        assert_eq!(mapping.coding.code, code);
        assert_eq!(mapping.coding.name.as_deref(), Some(name));
        assert_eq!(mapping.coding.system, systems::VICC_EVIDENCE_CODES);
    }

    #[rstest::rstest]
    #[case("FDA-Approved", Some(MoaEvidenceLevel::FdaApproved))]
    #[case("Guideline", Some(MoaEvidenceLevel::Guideline))]
    #[case("Clinical trial", Some(MoaEvidenceLevel::ClinicalTrial))]
    #[case("Clinical evidence", Some(MoaEvidenceLevel::ClinicalEvidence))]
    #[case("Preclinical", Some(MoaEvidenceLevel::Preclinical))]
    #[case("Inferential", Some(MoaEvidenceLevel::Inferential))]
    #[case("Anecdotal", None)]
    fn moa_predictive_implication_parsing(
        #[case] value: &str,
        #[case] expected: Option<MoaEvidenceLevel>,
    ) {
        assert_eq!(expected, MoaEvidenceLevel::from_predictive_implication(value));
    }

    #[test]
    fn civic_strength_shape() {
        let strength = civic_strength(CivicEvidenceLevel::A);
        assert_eq!(strength.name.as_deref(), Some("Validated association"));
        let coding = strength.primary_coding.as_ref().unwrap();
        assert_eq!(coding.code, "A");
        assert_eq!(coding.system, systems::CIVIC_EVIDENCE_LEVEL);
        assert_eq!(
            strength.mappings.as_ref().unwrap()[0].coding.code,
            "e000001"
        );
    }

    #[test]
    fn moa_strength_shape() {
        let strength = moa_strength(MoaEvidenceLevel::FdaApproved);
        assert_eq!(strength.name, None);
        let coding = strength.primary_coding.as_ref().unwrap();
        assert_eq!(coding.code, "FDA-Approved");
        assert_eq!(coding.system, systems::MOA_ABOUT);
        assert_eq!(
            strength.mappings.as_ref().unwrap()[0].coding.code,
            "e000002"
        );
    }

    #[test]
    fn therapy_group_digest_is_stable_under_reordering() -> Result<(), anyhow::Error> {
        let a = therapy("moa.normalize.therapy.rxcui:318341", "Cetuximab");
        let b = therapy("moa.normalize.therapy.rxcui:2049106", "Encorafenib");

        let fwd = build_therapy_group(
            SourceName::Moa,
            MembershipOperator::And,
            vec![a.clone(), b.clone()],
            None,
        )?;
        let rev = build_therapy_group(
            SourceName::Moa,
            MembershipOperator::And,
            vec![b, a],
            None,
        )?;

        assert_eq!(fwd.id, rev.id);
        assert!(fwd.id.starts_with("moa.ctid:"));

        Ok(())
    }

    #[test]
    fn substitute_groups_use_tsgid_prefix() -> Result<(), anyhow::Error> {
        let group = build_therapy_group(
            SourceName::Civic,
            MembershipOperator::Or,
            vec![
                therapy("civic.tid:16", "Cetuximab"),
                therapy("civic.tid:28", "Panitumumab"),
            ],
            None,
        )?;
        assert!(group.id.starts_with("civic.tsgid:"));

        Ok(())
    }

    #[test]
    fn methods_are_stable() {
        let civic = MethodId::CivicEidSop.method();
        assert_eq!(civic.id, "civic.method:2019");
        assert_eq!(civic.reported_in.as_ref().unwrap().pmid, Some(31779674));

        let moa = MethodId::MoaAssertionBiorxiv.method();
        assert_eq!(moa.id, "moa.method:2021");
    }
}
