//! Uniform facade over the VICC concept normalization services.

use crate::cdm::core::{Coding, ConceptMapping, Extension, Relation};
use crate::cdm::vrs::Allele;

pub mod rest;
#[cfg(test)]
pub(crate) mod stub;

/// Well-known terminology system URLs.
pub mod systems {
    pub const NCIT: &str =
        "https://ncit.nci.nih.gov/ncitbrowser/ConceptReport.jsp?dictionary=NCI_Thesaurus&code=";
    pub const NCBI_GENE: &str = "https://www.ncbi.nlm.nih.gov/gene/";
    pub const HGNC: &str = "https://www.genenames.org/data/gene-symbol-report/#!/hgnc_id/";
    pub const DISEASE_ONTOLOGY: &str = "https://disease-ontology.org/?id=";
    pub const MONDO: &str = "https://purl.obolibrary.org/obo/";
    pub const ONCOTREE: &str =
        "https://oncotree.mskcc.org/?version=oncotree_latest_stable&field=CODE&search=";
    pub const RXNORM: &str = "https://mor.nlm.nih.gov/RxNav/search?searchBy=RXCUI&searchTerm=";
    pub const DBSNP: &str = "https://www.ncbi.nlm.nih.gov/snp/";
    pub const CLINVAR: &str = "https://www.ncbi.nlm.nih.gov/clinvar/variation/";
    pub const ALLELE_REGISTRY: &str =
        "https://reg.clinicalgenome.org/redmine/projects/registry/genboree_registry/by_canonicalid?canonicalid=";
    pub const CIVIC_VARIANTS: &str = "https://civicdb.org/variants/";
    pub const MOALMANAC: &str = "https://moalmanac.org";
    pub const VICC_EVIDENCE_CODES: &str = "https://go.osu.edu/evidence-codes";
    pub const CIVIC_EVIDENCE_LEVEL: &str =
        "https://civic.readthedocs.io/en/latest/model/evidence/level.html";
    pub const MOA_ABOUT: &str = "https://moalmanac.org/about";
    pub const AMP_ASCO_CAP: &str = "AMP/ASCO/CAP";
}

/// Errors raised by normalizer calls.
///
/// Only credential failures abort the transform; service failures are
/// swallowed by the gateway and treated as "not normalizable".
#[derive(thiserror::Error, Debug)]
pub enum NormalizeError {
    #[error("normalizer credentials rejected: {0}")]
    Credentials(String),
    #[error("normalizer service failure: {0}")]
    Service(String),
}

/// A concept returned by a gene, disease, or therapy normalizer.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct NormalizedConcept {
    /// Service-scoped concept identifier, e.g. `normalize.gene.hgnc:1097`.
    pub id: String,
    /// Primary name of the concept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Cross-reference mappings, including the primary coding.
    #[serde(default)]
    pub mappings: Vec<ConceptMapping>,
    /// Service-side annotations (e.g. regulatory approval).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}

/// Response of a concept normalizer; `match_type == 0` indicates no match.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct NormalizationResponse {
    /// Strength of the match; 0 for no match.
    pub match_type: u32,
    /// The normalized concept, when matched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concept: Option<NormalizedConcept>,
}

/// Outcome of a concept normalization: the raw response plus the canonical
/// identifier extracted from it, if any.
#[derive(Debug, Clone, Default)]
pub struct ConceptNormalization {
    /// The service response, when the call succeeded.
    pub response: Option<NormalizationResponse>,
    /// Canonical concept identifier (e.g. `hgnc:1097`).
    pub normalized_id: Option<String>,
}

/// The kinds of concept normalizers behind the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConceptKind {
    Gene,
    Disease,
    Therapy,
}

/// A gene, disease, or therapy normalizer service.
#[async_trait::async_trait]
pub trait ConceptNormalizer: Send + Sync {
    /// Normalize a free-text or CURIE query.
    async fn normalize(&self, query: &str) -> Result<NormalizationResponse, NormalizeError>;
}

/// A variation normalizer service.
#[async_trait::async_trait]
pub trait VariationNormalizer: Send + Sync {
    /// Normalize a variation query to a VRS allele, if supported.
    async fn normalize(&self, query: &str) -> Result<Option<Allele>, NormalizeError>;
}

/// Manage the four VICC concept normalization services behind one facade.
pub struct ViccNormalizers {
    gene: Box<dyn ConceptNormalizer>,
    disease: Box<dyn ConceptNormalizer>,
    therapy: Box<dyn ConceptNormalizer>,
    variation: Box<dyn VariationNormalizer>,
}

impl ViccNormalizers {
    /// Construct the facade from the four service handles.
    pub fn new(
        gene: Box<dyn ConceptNormalizer>,
        disease: Box<dyn ConceptNormalizer>,
        therapy: Box<dyn ConceptNormalizer>,
        variation: Box<dyn VariationNormalizer>,
    ) -> Self {
        Self {
            gene,
            disease,
            therapy,
            variation,
        }
    }

    /// Construct the facade with REST clients from endpoint configuration.
    pub fn from_endpoints(endpoints: &rest::NormalizerEndpoints) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("could not build HTTP client: {}", e))?;
        Ok(Self::new(
            Box::new(rest::RestConceptNormalizer::new(
                client.clone(),
                ConceptKind::Gene,
                &endpoints.gene,
            )),
            Box::new(rest::RestConceptNormalizer::new(
                client.clone(),
                ConceptKind::Disease,
                &endpoints.disease,
            )),
            Box::new(rest::RestConceptNormalizer::new(
                client.clone(),
                ConceptKind::Therapy,
                &endpoints.therapy,
            )),
            Box::new(rest::RestVariationNormalizer::new(
                client,
                &endpoints.variation,
            )),
        ))
    }

    /// Attempt to normalize a gene query.
    pub async fn normalize_gene(
        &self,
        query: &str,
    ) -> Result<ConceptNormalization, NormalizeError> {
        Self::normalize_concept(&*self.gene, ConceptKind::Gene, query).await
    }

    /// Attempt to normalize a disease query.
    pub async fn normalize_disease(
        &self,
        query: &str,
    ) -> Result<ConceptNormalization, NormalizeError> {
        Self::normalize_concept(&*self.disease, ConceptKind::Disease, query).await
    }

    /// Attempt to normalize a therapy query.
    pub async fn normalize_therapy(
        &self,
        query: &str,
    ) -> Result<ConceptNormalization, NormalizeError> {
        Self::normalize_concept(&*self.therapy, ConceptKind::Therapy, query).await
    }

    /// Attempt to normalize a variation query.
    ///
    /// Alleles carrying inconsistent precomputed digests are rejected;
    /// alleles without digests get them stamped here.
    pub async fn normalize_variation(
        &self,
        query: &str,
    ) -> Result<Option<Allele>, NormalizeError> {
        let allele = match self.variation.normalize(query).await {
            Ok(allele) => allele,
            Err(NormalizeError::Credentials(msg)) => {
                return Err(NormalizeError::Credentials(msg));
            }
            Err(NormalizeError::Service(msg)) => {
                tracing::debug!(
                    "Variation Normalizer raised an error using query {}: {}",
                    query,
                    msg
                );
                return Ok(None);
            }
        };

        Ok(allele.and_then(|mut allele| {
            if allele.digest.is_none() {
                let digest = allele.compute_digest();
                allele.id = Some(format!("ga4gh:VA.{}", &digest));
                allele.digest = Some(digest);
            }
            if let Err(e) = allele.check_digest() {
                tracing::warn!("rejecting allele for query {}: {}", query, e);
                return None;
            }
            Some(allele)
        }))
    }

    async fn normalize_concept(
        normalizer: &dyn ConceptNormalizer,
        kind: ConceptKind,
        query: &str,
    ) -> Result<ConceptNormalization, NormalizeError> {
        let response = match normalizer.normalize(query).await {
            Ok(response) => response,
            Err(NormalizeError::Credentials(msg)) => {
                return Err(NormalizeError::Credentials(msg));
            }
            Err(NormalizeError::Service(msg)) => {
                tracing::debug!(
                    "{} Normalizer raised an error using query {}: {}",
                    kind,
                    query,
                    msg
                );
                return Ok(ConceptNormalization::default());
            }
        };

        let normalized_id = if response.match_type > 0 {
            response.concept.as_ref().map(|concept| {
                let prefix = format!("normalize.{}.", kind);
                concept
                    .id
                    .strip_prefix(&prefix)
                    .unwrap_or(concept.id.as_str())
                    .to_string()
            })
        } else {
            None
        };

        Ok(ConceptNormalization {
            response: Some(response),
            normalized_id,
        })
    }

    /// Build concept mappings from a normalizer response.
    ///
    /// Every mapping gets a `vicc_normalizer_priority` extension; exactly one
    /// carries `true` (the coding matching the canonical identifier).
    pub fn vicc_normalizer_mappings(
        normalized_id: &str,
        response: &NormalizationResponse,
    ) -> Vec<ConceptMapping> {
        let mut found_priority = false;
        let mut result = Vec::new();

        let concept_mappings = response
            .concept
            .as_ref()
            .map(|concept| concept.mappings.as_slice())
            .unwrap_or_default();
        for mapping in concept_mappings {
            let mut mapping = mapping.clone();
            let is_priority = !found_priority && Self::coding_matches(&mapping.coding, normalized_id);
            found_priority |= is_priority;
            mapping
                .extensions
                .get_or_insert_with(Vec::new)
                .push(Extension::normalizer_priority(is_priority));
            result.push(mapping);
        }

        if !found_priority {
            // The canonical identifier must always be represented.
            result.insert(
                0,
                ConceptMapping {
                    coding: coding_for_curie(normalized_id),
                    relation: Relation::ExactMatch,
                    extensions: Some(vec![Extension::normalizer_priority(true)]),
                },
            );
        }

        result
    }

    fn coding_matches(coding: &Coding, normalized_id: &str) -> bool {
        if coding.id.as_deref() == Some(normalized_id) {
            return true;
        }
        // MONDO codings carry the CURIE in `code` and an underscore form in `id`.
        coding
            .id
            .as_deref()
            .map(|id| id.starts_with("MONDO"))
            .unwrap_or(false)
            && coding.code == normalized_id
    }

    /// Extract the regulatory-approval extension from a therapy normalizer
    /// response, if the therapy has a supported approval rating.
    pub fn regulatory_approval_extension(
        therapy_norm_response: &NormalizationResponse,
    ) -> Option<Extension> {
        let extensions = therapy_norm_response
            .concept
            .as_ref()
            .and_then(|concept| concept.extensions.as_ref())?;
        let approval = extensions
            .iter()
            .find(|ext| ext.name == "regulatory_approval")?;
        let value: RegulatoryApprovalValue =
            serde_json::from_value(approval.value.clone()).ok()?;

        let ratings = &value.approval_ratings;
        let has_fda = ratings
            .iter()
            .any(|r| r == "fda_prescription" || r == "fda_otc");
        let discontinued = ratings.iter().any(|r| r == "fda_discontinued");
        let chembl_4 = ratings.iter().any(|r| r == "chembl_phase_4");

        let matched_value = if has_fda && (!discontinued || chembl_4) {
            "FDA"
        } else if chembl_4 {
            "chembl_phase_4"
        } else {
            return None;
        };

        let matched_indications = value
            .has_indication
            .iter()
            .filter(|indication| {
                indication
                    .extensions
                    .iter()
                    .flatten()
                    .any(|ext| ext.value == serde_json::json!(matched_value))
            })
            .map(|indication| {
                let mut projected = serde_json::json!({
                    "id": indication.id,
                    "conceptType": indication.concept_type,
                    "name": indication.name,
                });
                if let Some(mappings) = &indication.mappings {
                    projected["mappings"] =
                        serde_json::to_value(mappings).expect("mappings serialize");
                }
                projected
            })
            .collect::<Vec<_>>();

        Some(Extension::new(
            "regulatory_approval",
            serde_json::json!({
                "approval_rating": if matched_value == "FDA" { "FDA" } else { "ChEMBL" },
                "has_indications": matched_indications,
            }),
        ))
    }
}

/// Build a coding for a CURIE, resolving well-known namespaces to systems.
pub fn coding_for_curie(curie: &str) -> Coding {
    let (namespace, local) = curie.split_once(':').unwrap_or(("", curie));
    let system = match namespace {
        "ncit" => systems::NCIT,
        "ncbigene" => systems::NCBI_GENE,
        "hgnc" => systems::HGNC,
        "DOID" => systems::DISEASE_ONTOLOGY,
        "mondo" | "MONDO" => systems::MONDO,
        "oncotree" => systems::ONCOTREE,
        "rxcui" => systems::RXNORM,
        _ => namespace,
    };
    let code = if namespace == "DOID" {
        // DOID codings keep the full CURIE as their code.
        curie.to_string()
    } else {
        local.to_string()
    };
    Coding {
        id: Some(curie.to_string()),
        code,
        system: system.to_string(),
        name: None,
    }
}

#[derive(Debug, Clone, serde::Deserialize)]
struct RegulatoryApprovalValue {
    #[serde(default)]
    approval_ratings: Vec<String>,
    #[serde(default)]
    has_indication: Vec<Indication>,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct Indication {
    id: String,
    #[serde(rename = "conceptType")]
    concept_type: String,
    name: String,
    #[serde(default)]
    mappings: Option<Vec<ConceptMapping>>,
    #[serde(default)]
    extensions: Option<Vec<Extension>>,
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::stub::{
        concept_response, ExpiredCredentialsNormalizer, StubConceptNormalizer,
        StubVariationNormalizer,
    };
    use super::*;
    use crate::cdm::core::EXT_NORMALIZER_PRIORITY;

    fn normalizers_with_gene(gene: Box<dyn ConceptNormalizer>) -> ViccNormalizers {
        ViccNormalizers::new(
            gene,
            Box::new(StubConceptNormalizer::new()),
            Box::new(StubConceptNormalizer::new()),
            Box::new(StubVariationNormalizer::new()),
        )
    }

    #[tokio::test]
    async fn normalize_gene_strips_service_prefix() -> Result<(), anyhow::Error> {
        let gene = StubConceptNormalizer::new().with(
            "BRAF",
            concept_response(ConceptKind::Gene, "hgnc:1097", "BRAF", &["ncbigene:673"]),
        );
        let normalizers = normalizers_with_gene(Box::new(gene));

        let outcome = normalizers.normalize_gene("BRAF").await?;
        assert_eq!(outcome.normalized_id.as_deref(), Some("hgnc:1097"));

        let outcome = normalizers.normalize_gene("NOT_A_GENE").await?;
        assert_eq!(outcome.normalized_id, None);
        assert_eq!(outcome.response.unwrap().match_type, 0);

        Ok(())
    }

    #[tokio::test]
    async fn credential_failure_propagates() {
        let normalizers = normalizers_with_gene(Box::new(ExpiredCredentialsNormalizer));
        let result = normalizers.normalize_gene("BRAF").await;
        assert!(matches!(result, Err(NormalizeError::Credentials(_))));
    }

    #[test]
    fn priority_mapping_is_unique() {
        let response =
            concept_response(ConceptKind::Disease, "ncit:C5105", "Colorectal Adenocarcinoma", &[
                "DOID:0050913",
                "mondo:0005008",
            ]);
        let mappings = ViccNormalizers::vicc_normalizer_mappings("ncit:C5105", &response);

        let is_priority = |mapping: &ConceptMapping| {
            mapping
                .extensions
                .iter()
                .flatten()
                .any(|ext| ext.name == EXT_NORMALIZER_PRIORITY && ext.value == serde_json::json!(true))
        };
        assert_eq!(mappings.iter().filter(|m| is_priority(m)).count(), 1);
        let priority = mappings.iter().find(|m| is_priority(m)).unwrap();
        assert_eq!(priority.coding.id.as_deref(), Some("ncit:C5105"));
        // Every mapping carries the priority extension, most with `false`.
        assert!(mappings.iter().all(|m| m
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.name == EXT_NORMALIZER_PRIORITY)));
    }

    #[test]
    fn priority_mapping_synthesized_when_absent() {
        let response = NormalizationResponse {
            match_type: 80,
            concept: Some(NormalizedConcept {
                id: "normalize.therapy.rxcui:318341".to_string(),
                name: Some("Cetuximab".to_string()),
                mappings: vec![],
                extensions: None,
            }),
        };
        let mappings = ViccNormalizers::vicc_normalizer_mappings("rxcui:318341", &response);
        assert_eq!(mappings.len(), 1);
        assert_eq!(mappings[0].coding.id.as_deref(), Some("rxcui:318341"));
    }

    #[rstest::rstest]
    #[case(&["fda_prescription"], Some("FDA"))]
    #[case(&["fda_otc", "fda_discontinued"], None)]
    #[case(&["fda_prescription", "fda_discontinued", "chembl_phase_4"], Some("FDA"))]
    #[case(&["chembl_phase_4"], Some("ChEMBL"))]
    #[case(&["fda_discontinued"], None)]
    #[case(&[], None)]
    fn regulatory_approval_rating(
        #[case] ratings: &[&str],
        #[case] expected: Option<&str>,
    ) {
        let response = NormalizationResponse {
            match_type: 100,
            concept: Some(NormalizedConcept {
                id: "normalize.therapy.rxcui:1430438".to_string(),
                name: Some("Afatinib".to_string()),
                mappings: vec![],
                extensions: Some(vec![Extension::new(
                    "regulatory_approval",
                    serde_json::json!({
                        "approval_ratings": ratings,
                        "has_indication": [],
                    }),
                )]),
            }),
        };

        let ext = ViccNormalizers::regulatory_approval_extension(&response);
        match expected {
            Some(rating) => {
                let ext = ext.expect("extension expected");
                assert_eq!(ext.value["approval_rating"], serde_json::json!(rating));
            }
            None => assert!(ext.is_none()),
        }
    }

    #[test]
    fn regulatory_approval_projects_matched_indications() {
        let response = NormalizationResponse {
            match_type: 100,
            concept: Some(NormalizedConcept {
                id: "normalize.therapy.rxcui:1430438".to_string(),
                name: Some("Afatinib".to_string()),
                mappings: vec![],
                extensions: Some(vec![Extension::new(
                    "regulatory_approval",
                    serde_json::json!({
                        "approval_ratings": ["fda_prescription"],
                        "has_indication": [
                            {
                                "id": "hemonc:642",
                                "conceptType": "Disease",
                                "name": "Non-small cell lung cancer",
                                "extensions": [{"name": "regulatory_body", "value": "FDA"}],
                            },
                            {
                                "id": "hemonc:99",
                                "conceptType": "Disease",
                                "name": "Unmatched indication",
                                "extensions": [{"name": "regulatory_body", "value": "EMA"}],
                            },
                        ],
                    }),
                )]),
            }),
        };

        let ext = ViccNormalizers::regulatory_approval_extension(&response).unwrap();
        let indications = ext.value["has_indications"].as_array().unwrap();
        assert_eq!(indications.len(), 1);
        assert_eq!(indications[0]["id"], serde_json::json!("hemonc:642"));
    }

    #[tokio::test]
    async fn variation_normalization_stamps_digests() -> Result<(), anyhow::Error> {
        use crate::cdm::vrs::{
            Allele, SequenceExpression, SequenceLocation, SequenceReference,
        };

        let allele = Allele::new(
            SequenceLocation::new(
                SequenceReference::new("SQ.vyo55F6mA6n2LgN4cagcdRzOuh38V4mE"),
                857,
                858,
                None,
            ),
            SequenceExpression::LiteralSequenceExpression {
                sequence: "R".to_string(),
            },
        );
        let mut without_digest = allele.clone();
        without_digest.id = None;
        without_digest.digest = None;

        let normalizers = ViccNormalizers::new(
            Box::new(StubConceptNormalizer::new()),
            Box::new(StubConceptNormalizer::new()),
            Box::new(StubConceptNormalizer::new()),
            Box::new(StubVariationNormalizer::new().with("EGFR L858R", without_digest)),
        );

        let normalized = normalizers
            .normalize_variation("EGFR L858R")
            .await?
            .expect("allele expected");
        assert_eq!(normalized.digest, allele.digest);
        assert_eq!(normalized.id, allele.id);

        assert!(normalizers.normalize_variation("nonsense").await?.is_none());

        Ok(())
    }
}
