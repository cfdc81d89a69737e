//! Transformation of harvested CIViC records to the common data model.

use std::sync::{Arc, OnceLock};

use itertools::Itertools as _;
use regex::Regex;
use tokio::sync::Semaphore;

use crate::cdm::catvar::{CategoricalVariant, DefiningAlleleConstraint};
use crate::cdm::core::{
    some_extensions, some_mappings, Coding, ConceptMapping, ConceptType, Extension,
    MappableConcept, Relation,
};
use crate::cdm::statement::{
    DiagnosticPredicate, Direction, Document, EvidenceItem, EvidenceLine, MembershipOperator,
    PrognosticPredicate, Proposition, Statement, StatementType, Therapeutic,
    TherapeuticResponsePredicate,
};
use crate::cdm::vrs::{Allele, Expression, Syntax};
use crate::cdm::CdmDocument;
use crate::common::SourceName;
use crate::normalize::{systems, NormalizeError, ViccNormalizers};
use crate::transform::cache::EntityCache;
use crate::transform::{
    build_therapy_group, civic_strength, CivicEvidenceLevel, MethodId, TransformOptions,
};

/// Variant name terms that the variation normalizer is known not to support.
const UNSUPPORTED_VARIANT_NAME_TERMS: &[&str] = &[
    "mutation",
    "exon",
    "overexpression",
    "frameshift",
    "promoter",
    "deletion",
    "type",
    "insertion",
    "expression",
    "duplication",
    "copy",
    "underexpression",
    "number",
    "variation",
    "repeat",
    "rearrangement",
    "activation",
    "mislocalization",
    "translocation",
    "wild",
    "polymorphism",
    "frame",
    "shift",
    "loss",
    "function",
    "levels",
    "inactivation",
    "snp",
    "fusion",
    "dup",
    "truncation",
    "homozygosity",
    "gain",
    "phosphorylation",
];

fn snp_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?i)RS\d+$").expect("valid regex"))
}

fn amp_level_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^TIER_(?P<tier>[IV]+)(?:_LEVEL_(?P<level>[A-E]))?$").expect("valid regex")
    })
}

/// Harvested CIViC data, as written by the harvester.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct CivicHarvest {
    #[serde(default)]
    pub evidence: Vec<CivicEvidenceItem>,
    #[serde(default)]
    pub assertions: Vec<CivicAssertion>,
    #[serde(default)]
    pub genes: Vec<CivicGene>,
    #[serde(default)]
    pub variants: Vec<CivicVariant>,
    #[serde(default)]
    pub molecular_profiles: Vec<CivicMolecularProfile>,
}

/// A CIViC evidence item.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicEvidenceItem {
    pub id: i64,
    /// Display name, e.g. `EID2997`.
    pub name: String,
    pub status: String,
    pub evidence_type: String,
    pub evidence_direction: Option<String>,
    pub evidence_level: String,
    pub significance: Option<String>,
    pub molecular_profile_id: Option<i64>,
    pub description: Option<String>,
    pub disease: Option<CivicDisease>,
    #[serde(default)]
    pub therapies: Vec<CivicTherapy>,
    pub therapy_interaction_type: Option<String>,
    pub variant_origin: Option<String>,
    pub source: Option<CivicSource>,
}

/// A CIViC assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicAssertion {
    pub id: i64,
    /// Display name, e.g. `AID6`.
    pub name: String,
    pub status: String,
    pub assertion_type: String,
    pub assertion_direction: Option<String>,
    pub amp_level: Option<String>,
    pub significance: Option<String>,
    pub molecular_profile_id: Option<i64>,
    pub description: Option<String>,
    pub disease: Option<CivicDisease>,
    #[serde(default)]
    pub therapies: Vec<CivicTherapy>,
    pub therapy_interaction_type: Option<String>,
    pub variant_origin: Option<String>,
    #[serde(default)]
    pub evidence_ids: Vec<i64>,
}

/// A CIViC gene record.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicGene {
    pub id: i64,
    pub name: String,
    pub entrez_id: i64,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub description: Option<String>,
}

/// A CIViC variant record.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicVariant {
    pub id: i64,
    pub name: String,
    /// Symbol of the variant's gene.
    pub entrez_name: String,
    pub gene_id: i64,
    #[serde(default)]
    pub hgvs_expressions: Vec<String>,
    pub allele_registry_id: Option<String>,
    #[serde(default)]
    pub clinvar_entries: Vec<String>,
    #[serde(default)]
    pub variant_aliases: Vec<String>,
    #[serde(default)]
    pub variant_types: Vec<CivicVariantType>,
    pub coordinates: Option<serde_json::Value>,
}

/// A CIViC variant type annotation (Sequence Ontology term).
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicVariantType {
    pub so_id: String,
    pub name: String,
    pub url: Option<String>,
}

/// A CIViC molecular profile.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicMolecularProfile {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub variant_ids: Vec<i64>,
    pub description: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    pub molecular_profile_score: Option<f64>,
}

/// A CIViC disease reference on an evidence item or assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicDisease {
    pub id: i64,
    pub display_name: String,
    pub doid: Option<String>,
}

/// A CIViC therapy reference on an evidence item or assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicTherapy {
    pub id: i64,
    pub name: String,
    pub ncit_id: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
}

/// A CIViC evidence source.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct CivicSource {
    pub id: i64,
    pub source_type: String,
    pub citation: Option<String>,
    pub citation_id: String,
    pub title: Option<String>,
}

/// Variation data cached per CIViC variant for categorical-variant and
/// statement assembly.
#[derive(Debug, Clone, Default)]
pub struct CivicVariationRecord {
    /// The normalized allele, when the normalizer supported the variant.
    pub allele: Option<Allele>,
    /// Cache key of the variant's gene (`civic.gid:<id>`).
    pub gene_key: String,
    /// Sequence Ontology codings of the variant types.
    pub variant_types: Vec<Coding>,
    /// Mappings for the variant (CIViC URL, Allele Registry, ClinVar, rsIDs).
    pub mappings: Vec<ConceptMapping>,
    /// Non-rsID variant aliases.
    pub aliases: Vec<String>,
    /// Source representative coordinate, nulls removed.
    pub coordinates: Option<serde_json::Value>,
    /// Normalized auxiliary HGVS representations.
    pub members: Vec<Allele>,
    /// Failure marker and unattached expressions.
    pub extensions: Vec<Extension>,
}

/// Uniform view over evidence items and assertions for statement assembly.
struct RecordView<'a> {
    is_evidence: bool,
    name: &'a str,
    description: Option<&'a str>,
    direction_raw: Option<&'a str>,
    record_type: &'a str,
    significance: Option<&'a str>,
    molecular_profile_id: Option<i64>,
    disease: Option<&'a CivicDisease>,
    therapies: &'a [CivicTherapy],
    therapy_interaction_type: Option<&'a str>,
    variant_origin: Option<&'a str>,
    evidence_level: Option<&'a str>,
    source: Option<&'a CivicSource>,
    amp_level: Option<&'a str>,
    evidence_ids: &'a [i64],
}

impl<'a> RecordView<'a> {
    fn from_evidence(evidence: &'a CivicEvidenceItem) -> Self {
        Self {
            is_evidence: true,
            name: &evidence.name,
            description: evidence.description.as_deref(),
            direction_raw: evidence.evidence_direction.as_deref(),
            record_type: &evidence.evidence_type,
            significance: evidence.significance.as_deref(),
            molecular_profile_id: evidence.molecular_profile_id,
            disease: evidence.disease.as_ref(),
            therapies: &evidence.therapies,
            therapy_interaction_type: evidence.therapy_interaction_type.as_deref(),
            variant_origin: evidence.variant_origin.as_deref(),
            evidence_level: Some(&evidence.evidence_level),
            source: evidence.source.as_ref(),
            amp_level: None,
            evidence_ids: &[],
        }
    }

    fn from_assertion(assertion: &'a CivicAssertion) -> Self {
        Self {
            is_evidence: false,
            name: &assertion.name,
            description: assertion.description.as_deref(),
            direction_raw: assertion.assertion_direction.as_deref(),
            record_type: &assertion.assertion_type,
            significance: assertion.significance.as_deref(),
            molecular_profile_id: assertion.molecular_profile_id,
            disease: assertion.disease.as_ref(),
            therapies: &assertion.therapies,
            therapy_interaction_type: assertion.therapy_interaction_type.as_deref(),
            variant_origin: assertion.variant_origin.as_deref(),
            evidence_level: None,
            source: None,
            amp_level: assertion.amp_level.as_deref(),
            evidence_ids: &assertion.evidence_ids,
        }
    }
}

/// Record types supported for statement assembly.
fn is_supported_record_type(record_type: &str) -> bool {
    matches!(record_type, "PREDICTIVE" | "PROGNOSTIC" | "DIAGNOSTIC")
}

/// Predicate resolved from a record's type and clinical significance.
enum ParsedPredicate {
    TherapeuticResponse(TherapeuticResponsePredicate),
    Prognostic(PrognosticPredicate),
    Diagnostic(DiagnosticPredicate),
}

/// Map the record type and clinical-significance string to a predicate;
/// unknown or missing significance values are unsupported.
fn parse_predicate(record_type: &str, significance: Option<&str>) -> Option<ParsedPredicate> {
    match (record_type, significance?) {
        ("PREDICTIVE", "SENSITIVITYRESPONSE") => Some(ParsedPredicate::TherapeuticResponse(
            TherapeuticResponsePredicate::PredictsSensitivityTo,
        )),
        ("PREDICTIVE", "RESISTANCE") => Some(ParsedPredicate::TherapeuticResponse(
            TherapeuticResponsePredicate::PredictsResistanceTo,
        )),
        ("PROGNOSTIC", "BETTER_OUTCOME") => Some(ParsedPredicate::Prognostic(
            PrognosticPredicate::AssociatedWithBetterOutcomeFor,
        )),
        ("PROGNOSTIC", "POOR_OUTCOME") => Some(ParsedPredicate::Prognostic(
            PrognosticPredicate::AssociatedWithWorseOutcomeFor,
        )),
        ("DIAGNOSTIC", "POSITIVE") => Some(ParsedPredicate::Diagnostic(
            DiagnosticPredicate::IsDiagnosticInclusionCriterionFor,
        )),
        ("DIAGNOSTIC", "NEGATIVE") => Some(ParsedPredicate::Diagnostic(
            DiagnosticPredicate::IsDiagnosticExclusionCriterionFor,
        )),
        _ => None,
    }
}

/// A transformer of CIViC harvested data to the common data model.
pub struct CivicTransformer<'a> {
    normalizers: &'a ViccNormalizers,
    options: TransformOptions,
    cache: EntityCache<CivicVariationRecord>,
    data: CdmDocument,
}

impl<'a> CivicTransformer<'a> {
    /// Construct the transformer with normalizer handles and run options.
    pub fn new(normalizers: &'a ViccNormalizers, options: TransformOptions) -> Self {
        let mut data = CdmDocument::default();
        data.methods = vec![MethodId::CivicEidSop.method()];
        Self {
            normalizers,
            options,
            cache: EntityCache::new(),
            data,
        }
    }

    /// Transform CIViC harvested data; results accumulate internally and are
    /// obtained via [`Self::finish`].
    pub async fn transform(&mut self, harvest: &CivicHarvest) -> Result<(), NormalizeError> {
        // Only molecular profiles with exactly one variant are supported.
        let (supported_mps, mp_to_variant) = Self::mp_to_variant_mapping(&harvest.molecular_profiles);

        let evidence_items = harvest
            .evidence
            .iter()
            .filter(|e| e.status == "accepted" && is_supported_record_type(&e.evidence_type))
            .collect::<Vec<_>>();
        let assertions = harvest
            .assertions
            .iter()
            .filter(|a| a.status == "accepted" && is_supported_record_type(&a.assertion_type))
            .collect::<Vec<_>>();

        // Variants referenced by supported records through their profiles.
        let variant_ids = evidence_items
            .iter()
            .filter_map(|e| e.molecular_profile_id)
            .chain(assertions.iter().filter_map(|a| a.molecular_profile_id))
            .filter_map(|mp_id| mp_to_variant.get(&mp_id).copied().flatten())
            .collect::<std::collections::HashSet<i64>>();
        let variants = harvest
            .variants
            .iter()
            .filter(|v| variant_ids.contains(&v.id))
            .collect::<Vec<_>>();

        self.add_variations(&variants).await?;
        self.add_genes(&harvest.genes).await?;

        let mps = supported_mps
            .iter()
            .filter(|mp| {
                let vid = mp_to_variant.get(&mp.id).copied().flatten();
                vid.map(|vid| {
                    self.cache
                        .variations
                        .contains_key(&format!("civic.vid:{}", vid))
                })
                .unwrap_or(false)
            })
            .copied()
            .collect::<Vec<_>>();
        self.add_categorical_variants(&mps, &mp_to_variant);

        // Evidence first: assertions back-reference admitted evidence items.
        for evidence in &evidence_items {
            self.add_statement(RecordView::from_evidence(evidence), &mp_to_variant)
                .await?;
        }
        for assertion in &assertions {
            self.add_statement(RecordView::from_assertion(assertion), &mp_to_variant)
                .await?;
        }

        Ok(())
    }

    /// Finalize into the CDM artifact.
    pub fn finish(self) -> CdmDocument {
        super::finish_document(self.data)
    }

    /// Map molecular profile IDs to their single variant ID; profiles with
    /// more than one variant are unsupported.
    fn mp_to_variant_mapping(
        molecular_profiles: &[CivicMolecularProfile],
    ) -> (
        Vec<&CivicMolecularProfile>,
        std::collections::HashMap<i64, Option<i64>>,
    ) {
        let mut supported = Vec::new();
        let mut mapping = std::collections::HashMap::new();
        let mut not_supported = Vec::new();
        for mp in molecular_profiles {
            if mp.variant_ids.len() == 1 {
                mapping.insert(mp.id, Some(mp.variant_ids[0]));
                supported.push(mp);
            } else {
                mapping.insert(mp.id, None);
                not_supported.push(mp.id);
            }
        }
        tracing::debug!(
            "{} molecular profiles not supported: {:?}",
            not_supported.len(),
            not_supported
        );
        (supported, mapping)
    }

    /// The query name for a variant: for cDNA-style names, the parenthesized
    /// protein part is stripped and the last token used.
    fn variant_query_name(variant: &CivicVariant) -> String {
        if variant.name.contains("c.") {
            let name = variant.name.replace(['(', ')'], "");
            name.split_whitespace()
                .last()
                .unwrap_or(&name)
                .to_string()
        } else {
            variant.name.clone()
        }
    }

    /// Whether the variation normalizer can be expected to support the query.
    fn is_supported_variant_query(variant_name: &str, variant_id: i64) -> bool {
        let lower = variant_name.to_lowercase();
        if lower.ends_with("fs") || lower.contains('-') || lower.contains('/') {
            tracing::debug!(
                "Variation Normalizer does not support civic.vid:{}: {}",
                variant_id,
                variant_name
            );
            return false;
        }
        if lower
            .split_whitespace()
            .any(|term| UNSUPPORTED_VARIANT_NAME_TERMS.contains(&term))
        {
            tracing::debug!(
                "Variation Normalizer does not support civic.vid:{}: {}",
                variant_id,
                variant_name
            );
            return false;
        }
        true
    }

    /// Expressions for all HGVS representations carried by the variant.
    fn expressions(variant: &CivicVariant) -> Vec<Expression> {
        variant
            .hgvs_expressions
            .iter()
            .filter(|expr| expr.as_str() != "N/A")
            .filter_map(|expr| {
                Syntax::sniff(expr).map(|syntax| Expression {
                    syntax,
                    value: expr.clone(),
                })
            })
            .collect()
    }

    /// Normalize auxiliary (non-protein) HGVS expressions into member alleles.
    async fn variation_members(
        normalizers: &ViccNormalizers,
        variant: &CivicVariant,
    ) -> Result<Vec<Allele>, NormalizeError> {
        let mut members = Vec::new();
        for hgvs_expr in &variant.hgvs_expressions {
            if hgvs_expr == "N/A" || hgvs_expr.contains("p.") {
                continue;
            }
            let syntax = if hgvs_expr.contains("c.") {
                Syntax::HgvsC
            } else if hgvs_expr.contains("g.") {
                Syntax::HgvsG
            } else {
                tracing::debug!("Syntax not recognized: {}", hgvs_expr);
                continue;
            };

            if let Some(mut allele) = normalizers.normalize_variation(hgvs_expr).await? {
                allele.name = Some(hgvs_expr.clone());
                allele.expressions = Some(vec![Expression {
                    syntax,
                    value: hgvs_expr.clone(),
                }]);
                members.push(allele);
            }
        }
        Ok(members)
    }

    /// Build the variation record for one variant.
    async fn build_variation(
        normalizers: &ViccNormalizers,
        variant: &CivicVariant,
    ) -> Result<CivicVariationRecord, NormalizeError> {
        let variant_name = Self::variant_query_name(variant);
        let query = format!("{} {}", variant.entrez_name, variant_name);
        let mut extensions = Vec::new();

        let allele = if Self::is_supported_variant_query(&variant_name, variant.id) {
            normalizers.normalize_variation(&query).await?
        } else {
            None
        };

        let (mut allele, members) = match allele {
            Some(mut allele) => {
                allele.name = Some(variant.name.clone());
                let members = Self::variation_members(normalizers, variant).await?;
                (Some(allele), members)
            }
            None => {
                tracing::debug!(
                    "Variation Normalizer unable to normalize civic.vid:{} using query {}",
                    variant.id,
                    query
                );
                extensions.push(Extension::normalizer_failure());
                (None, Vec::new())
            }
        };

        let hgvs_exprs = Self::expressions(variant);
        if !hgvs_exprs.is_empty() {
            match allele.as_mut() {
                Some(allele) => allele.expressions = Some(hgvs_exprs),
                None => extensions.push(Extension::new("expressions", &hgvs_exprs)),
            }
        }

        let variant_types = variant
            .variant_types
            .iter()
            .filter_map(|vt| {
                // The system URL is required for a usable coding.
                vt.url.as_ref().map(|url| Coding {
                    id: Some(vt.so_id.clone()),
                    code: vt.so_id.clone(),
                    system: format!("{}/", url.rsplit_once('/').map(|(base, _)| base).unwrap_or(url)),
                    name: Some(vt.name.to_lowercase().split_whitespace().join("_")),
                })
            })
            .collect::<Vec<_>>();

        let mut mappings = vec![ConceptMapping::new(
            Coding {
                id: Some(format!("civic.vid:{}", variant.id)),
                code: variant.id.to_string(),
                system: systems::CIVIC_VARIANTS.to_string(),
                name: None,
            },
            Relation::ExactMatch,
        )];
        if let Some(allele_registry_id) = &variant.allele_registry_id {
            mappings.push(ConceptMapping::new(
                Coding {
                    id: None,
                    code: allele_registry_id.clone(),
                    system: systems::ALLELE_REGISTRY.to_string(),
                    name: None,
                },
                Relation::RelatedMatch,
            ));
        }
        mappings.extend(variant.clinvar_entries.iter().map(|entry| {
            ConceptMapping::new(
                Coding {
                    id: None,
                    code: entry.clone(),
                    system: systems::CLINVAR.to_string(),
                    name: None,
                },
                Relation::RelatedMatch,
            )
        }));

        // rsID aliases become dbSNP mappings instead of aliases.
        let mut aliases = Vec::new();
        for alias in &variant.variant_aliases {
            if snp_re().is_match(alias) {
                mappings.push(ConceptMapping::new(
                    Coding {
                        id: None,
                        code: alias.to_lowercase(),
                        system: systems::DBSNP.to_string(),
                        name: None,
                    },
                    Relation::RelatedMatch,
                ));
            } else {
                aliases.push(alias.clone());
            }
        }

        let coordinates = variant.coordinates.as_ref().and_then(|coords| {
            let filtered = coords
                .as_object()?
                .iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<serde_json::Map<_, _>>();
            if filtered.is_empty() {
                None
            } else {
                Some(serde_json::Value::Object(filtered))
            }
        });

        Ok(CivicVariationRecord {
            allele,
            gene_key: format!("civic.gid:{}", variant.gene_id),
            variant_types,
            mappings,
            aliases,
            coordinates,
            members,
            extensions,
        })
    }

    /// Transform all supported variant records, normalizing with bounded
    /// concurrency; results are inserted in variant-ID order so that output
    /// is deterministic for any permit count.
    async fn add_variations(&mut self, variants: &[&CivicVariant]) -> Result<(), NormalizeError> {
        let semaphore = Arc::new(Semaphore::new(self.options.normalizer_concurrency.max(1)));
        let normalizers = self.normalizers;

        let tasks = variants.iter().map(|variant| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let record = Self::build_variation(normalizers, variant).await?;
                Ok::<(i64, CivicVariationRecord), NormalizeError>((variant.id, record))
            }
        });
        let mut records = futures::future::try_join_all(tasks).await?;
        records.sort_by_key(|(variant_id, _)| *variant_id);

        for (variant_id, record) in records {
            if let Some(allele) = &record.allele {
                self.data.variations.push(allele.clone());
            }
            self.cache
                .variations
                .insert(format!("civic.vid:{}", variant_id), record);
        }
        Ok(())
    }

    /// Create gene concepts for all CIViC gene records.
    async fn add_genes(&mut self, genes: &[CivicGene]) -> Result<(), NormalizeError> {
        for gene in genes {
            let gene_key = format!("civic.gid:{}", gene.id);
            let ncbigene = format!("ncbigene:{}", gene.entrez_id);
            let mut queries = vec![ncbigene.clone(), gene.name.clone()];
            queries.extend(gene.aliases.iter().cloned());

            let mut normalization = Default::default();
            for query in &queries {
                normalization = self.normalizers.normalize_gene(query).await?;
                if normalization.normalized_id.is_some() {
                    break;
                }
            }

            let mut extensions = Vec::new();
            let mappings = match (&normalization.normalized_id, &normalization.response) {
                (Some(normalized_id), Some(response)) => {
                    let mut mappings =
                        ViccNormalizers::vicc_normalizer_mappings(normalized_id, response);
                    update_normalizer_mappings(&mut mappings, &ncbigene, ncbi_gene_mapping);
                    mappings
                }
                _ => {
                    tracing::debug!(
                        "Gene Normalizer unable to normalize {} using queries {:?}",
                        gene_key,
                        queries
                    );
                    extensions.push(Extension::normalizer_failure());
                    vec![ncbi_gene_mapping(&ncbigene)]
                }
            };

            if !gene.aliases.is_empty() {
                extensions.push(Extension::new("aliases", &gene.aliases));
            }
            if let Some(description) = &gene.description {
                if !description.is_empty() {
                    extensions.push(Extension::new("description", description));
                }
            }

            let concept = MappableConcept {
                id: Some(gene_key.clone()),
                concept_type: Some(ConceptType::Gene),
                name: Some(gene.name.clone()),
                primary_coding: None,
                mappings: some_mappings(mappings),
                extensions: some_extensions(extensions),
            };
            self.cache.genes.insert(gene_key, concept.clone());
            self.data.genes.push(concept);
        }
        Ok(())
    }

    /// Create categorical variants for all supported molecular profiles.
    fn add_categorical_variants(
        &mut self,
        molecular_profiles: &[&CivicMolecularProfile],
        mp_to_variant: &std::collections::HashMap<i64, Option<i64>>,
    ) {
        for mp in molecular_profiles {
            let mp_key = format!("civic.mpid:{}", mp.id);
            let variant_id = mp_to_variant
                .get(&mp.id)
                .copied()
                .flatten()
                .expect("only supported profiles reach categorical-variant assembly");
            let record = self
                .cache
                .variations
                .get(&format!("civic.vid:{}", variant_id))
                .expect("profiles are filtered to cached variations")
                .clone();

            let mut aliases = record.aliases.clone();
            for alias in &mp.aliases {
                if !snp_re().is_match(alias) && !aliases.contains(alias) {
                    aliases.push(alias.clone());
                }
            }

            let mut extensions = record.extensions.clone();
            if let Some(score) = mp.molecular_profile_score.filter(|score| *score != 0.0) {
                extensions.push(Extension::new("CIViC Molecular Profile Score", score));
            }
            if let Some(coordinates) = &record.coordinates {
                extensions.push(Extension::new("CIViC representative coordinate", coordinates));
            }
            if !record.variant_types.is_empty() {
                extensions.push(Extension::new("Variant types", &record.variant_types));
            }

            let constraints = record
                .allele
                .as_ref()
                .map(|allele| vec![DefiningAlleleConstraint::new(allele.clone())]);

            let cv = CategoricalVariant {
                id: mp_key.clone(),
                type_: "CategoricalVariant".to_string(),
                name: mp.name.clone(),
                description: mp.description.clone().filter(|d| !d.is_empty()),
                aliases: if aliases.is_empty() { None } else { Some(aliases) },
                mappings: some_mappings(record.mappings.clone()),
                extensions: some_extensions(extensions),
                constraints,
                members: if record.members.is_empty() {
                    None
                } else {
                    Some(record.members.clone())
                },
            };
            self.data.categorical_variants.push(cv.clone());
            self.cache.categorical_variants.insert(mp_key, cv);
        }
    }

    /// Create or get the disease concept for a CIViC disease.
    async fn add_disease(
        &mut self,
        disease: &CivicDisease,
    ) -> Result<MappableConcept, NormalizeError> {
        let disease_key = format!("civic.did:{}", disease.id);
        if let Some(cached) = self.cache.conditions.get(&disease_key) {
            return Ok(cached.clone());
        }

        let concept = self.build_disease(disease).await?;
        self.cache
            .conditions
            .insert(disease_key, concept.clone());
        self.data.conditions.push(concept.clone());
        Ok(concept)
    }

    async fn build_disease(
        &self,
        disease: &CivicDisease,
    ) -> Result<MappableConcept, NormalizeError> {
        let disease_key = format!("civic.did:{}", disease.id);
        let doid = disease.doid.as_ref().map(|doid| format!("DOID:{}", doid));
        let queries = match &doid {
            Some(doid) => vec![doid.clone(), disease.display_name.clone()],
            None => {
                tracing::debug!("{} ({}) has null DOID", disease_key, disease.display_name);
                vec![disease.display_name.clone()]
            }
        };

        let mut normalization = Default::default();
        for query in &queries {
            normalization = self.normalizers.normalize_disease(query).await?;
            if normalization.normalized_id.is_some() {
                break;
            }
        }

        let mut extensions = Vec::new();
        let mappings = match (&normalization.normalized_id, &normalization.response) {
            (Some(normalized_id), Some(response)) => {
                let mut mappings =
                    ViccNormalizers::vicc_normalizer_mappings(normalized_id, response);
                if let Some(doid) = &doid {
                    update_normalizer_mappings(&mut mappings, doid, doid_mapping);
                }
                mappings
            }
            _ => {
                tracing::debug!(
                    "Disease Normalizer unable to normalize {} using queries {:?}",
                    disease_key,
                    queries
                );
                extensions.push(Extension::normalizer_failure());
                doid.as_deref().map(doid_mapping).into_iter().collect()
            }
        };

        Ok(MappableConcept {
            id: Some(disease_key),
            concept_type: Some(ConceptType::Disease),
            name: Some(disease.display_name.clone()),
            primary_coding: None,
            mappings: some_mappings(mappings),
            extensions: some_extensions(extensions),
        })
    }

    /// Build the therapy concept for a single CIViC therapy.
    async fn build_therapy(
        &self,
        therapy: &CivicTherapy,
    ) -> Result<MappableConcept, NormalizeError> {
        let therapy_key = format!("civic.tid:{}", therapy.id);
        let ncit_id = therapy.ncit_id.as_ref().map(|id| format!("ncit:{}", id));
        let queries = match &ncit_id {
            Some(ncit_id) => vec![ncit_id.clone(), therapy.name.clone()],
            None => vec![therapy.name.clone()],
        };

        let mut normalization = Default::default();
        for query in &queries {
            normalization = self.normalizers.normalize_therapy(query).await?;
            if normalization.normalized_id.is_some() {
                break;
            }
        }

        let mut extensions = Vec::new();
        if !therapy.aliases.is_empty() {
            extensions.push(Extension::new("aliases", &therapy.aliases));
        }

        let mappings = match (&normalization.normalized_id, &normalization.response) {
            (Some(normalized_id), Some(response)) => {
                if let Some(approval) = ViccNormalizers::regulatory_approval_extension(response) {
                    extensions.push(approval);
                }
                let mut mappings =
                    ViccNormalizers::vicc_normalizer_mappings(normalized_id, response);
                if let Some(ncit_id) = &ncit_id {
                    update_normalizer_mappings(&mut mappings, ncit_id, ncit_mapping);
                }
                mappings
            }
            _ => {
                tracing::debug!(
                    "Therapy Normalizer unable to normalize {} using queries {:?}",
                    therapy_key,
                    queries
                );
                extensions.push(Extension::normalizer_failure());
                ncit_id.as_deref().map(ncit_mapping).into_iter().collect()
            }
        };

        Ok(MappableConcept {
            id: Some(therapy_key),
            concept_type: Some(ConceptType::Therapy),
            name: Some(therapy.name.clone()),
            primary_coding: None,
            mappings: some_mappings(mappings),
            extensions: some_extensions(extensions),
        })
    }

    /// Create or get a single cached therapy.
    async fn add_single_therapy(
        &mut self,
        therapy: &CivicTherapy,
    ) -> Result<MappableConcept, NormalizeError> {
        let therapy_key = format!("civic.tid:{}", therapy.id);
        if let Some(Therapeutic::Therapy(cached)) = self.cache.therapies.get(&therapy_key) {
            return Ok(cached.clone());
        }
        let concept = self.build_therapy(therapy).await?;
        self.cache
            .therapies
            .insert(therapy_key, Therapeutic::Therapy(concept.clone()));
        self.data
            .therapies
            .push(Therapeutic::Therapy(concept.clone()));
        Ok(concept)
    }

    /// Resolve the therapeutic object for a predictive record: one therapy or
    /// a combination/substitute group.
    async fn add_therapeutic(
        &mut self,
        record: &RecordView<'_>,
    ) -> Result<Option<Therapeutic>, NormalizeError> {
        match record.therapies {
            [] => Ok(None),
            [therapy] => Ok(Some(Therapeutic::Therapy(
                self.add_single_therapy(therapy).await?,
            ))),
            therapies => {
                let membership_operator = match record.therapy_interaction_type {
                    Some("SUBSTITUTES") => MembershipOperator::Or,
                    Some("COMBINATION") => MembershipOperator::And,
                    other => {
                        tracing::debug!(
                            "civic therapy_interaction_type not supported: {:?}",
                            other
                        );
                        return Ok(None);
                    }
                };

                let mut members = Vec::new();
                for therapy in therapies {
                    members.push(self.add_single_therapy(therapy).await?);
                }
                let group = build_therapy_group(
                    SourceName::Civic,
                    membership_operator,
                    members,
                    Some(vec![Extension::new(
                        "civic_therapy_interaction_type",
                        record.therapy_interaction_type,
                    )]),
                )
                .map_err(|e| NormalizeError::Service(e.to_string()))?;

                if !self.cache.therapies.contains_key(&group.id) {
                    self.cache
                        .therapies
                        .insert(group.id.clone(), Therapeutic::Group(group.clone()));
                    self.data.therapies.push(Therapeutic::Group(group.clone()));
                }
                Ok(Some(Therapeutic::Group(group)))
            }
        }
    }

    /// Create the document for an evidence item's source, deduplicated by
    /// source ID.  Non-PubMed/ASCO/ASH sources are not supported.
    fn add_eid_document(&mut self, source: &CivicSource) -> Option<Document> {
        let source_type = source.source_type.to_uppercase();
        if !matches!(source_type.as_str(), "PUBMED" | "ASCO" | "ASH") {
            tracing::warn!(
                "Document civic.source:{} not supported: source type {}",
                source.id,
                source.source_type
            );
            return None;
        }

        let source_key = format!("civic.source:{}", source.id);
        if let Some(cached) = self.cache.documents.get(&source_key) {
            return Some(cached.clone());
        }

        let document = Document {
            id: Some(source_key.clone()),
            type_: "Document".to_string(),
            name: source.citation.clone(),
            title: source.title.clone(),
            pmid: (source_type == "PUBMED")
                .then(|| source.citation_id.parse::<i64>().ok())
                .flatten(),
            doi: None,
            urls: None,
            mappings: None,
            extensions: None,
        };
        self.cache
            .documents
            .insert(source_key, document.clone());
        self.data.documents.push(document.clone());
        Some(document)
    }

    /// Parse an AMP/ASCO/CAP level into classification and strength concepts.
    fn amp_classification_and_strength(
        amp_level: &str,
    ) -> Option<(MappableConcept, Option<MappableConcept>)> {
        let captures = amp_level_re().captures(amp_level)?;
        let tier = captures.name("tier").expect("tier group always captured");
        let classification = MappableConcept {
            primary_coding: Some(Coding {
                id: None,
                code: format!("Tier {}", tier.as_str()),
                system: systems::AMP_ASCO_CAP.to_string(),
                name: None,
            }),
            ..Default::default()
        };

        let strength = captures.name("level").map(|level| {
            let civic_level: CivicEvidenceLevel =
                level.as_str().parse().expect("regex admits only A-E");
            let evidence_strength = civic_strength(civic_level);
            let mut mappings = evidence_strength.mappings.clone().unwrap_or_default();
            let mut evidence_coding = evidence_strength
                .primary_coding
                .clone()
                .expect("civic strength always has a primary coding");
            evidence_coding.name = evidence_strength.name.clone();
            mappings.push(ConceptMapping::new(evidence_coding, Relation::ExactMatch));

            MappableConcept {
                primary_coding: Some(Coding {
                    id: None,
                    code: format!("Level {}", level.as_str()),
                    system: systems::AMP_ASCO_CAP.to_string(),
                    name: None,
                }),
                mappings: Some(mappings),
                ..Default::default()
            }
        });

        Some((classification, strength))
    }

    fn parse_direction(direction: Option<&str>) -> Option<Direction> {
        match direction.map(|d| d.to_uppercase()).as_deref() {
            Some("SUPPORTS") => Some(Direction::Supports),
            Some("DOES_NOT_SUPPORT") => Some(Direction::Disputes),
            _ => None,
        }
    }

    /// Assemble and emit the statement for one evidence item or assertion.
    async fn add_statement(
        &mut self,
        record: RecordView<'_>,
        mp_to_variant: &std::collections::HashMap<i64, Option<i64>>,
    ) -> Result<(), NormalizeError> {
        let Some(mp_id) = record.molecular_profile_id else {
            return Ok(());
        };
        let mp_key = format!("civic.mpid:{}", mp_id);
        let Some(categorical_variant) = self.cache.categorical_variants.get(&mp_key).cloned()
        else {
            tracing::debug!("molecular profile not supported: {}", mp_key);
            return Ok(());
        };

        let variant_key = format!(
            "civic.vid:{}",
            mp_to_variant
                .get(&mp_id)
                .copied()
                .flatten()
                .expect("categorical variants exist only for supported profiles")
        );
        let Some(variation_record) = self.cache.variations.get(&variant_key).cloned() else {
            tracing::debug!("variant not supported: {}", variant_key);
            return Ok(());
        };

        let direction = Self::parse_direction(record.direction_raw);

        // Evidence carries reported-in documents and a level-derived
        // strength; assertions carry classification and evidence lines.
        let mut classification = None;
        let mut strength = None;
        let mut reported_in = None;
        let mut evidence_lines = None;
        if record.is_evidence {
            let Some(source) = record.source else {
                return Ok(());
            };
            let Some(document) = self.add_eid_document(source) else {
                return Ok(());
            };
            reported_in = Some(vec![document]);

            let level: CivicEvidenceLevel = match record
                .evidence_level
                .unwrap_or_default()
                .parse()
            {
                Ok(level) => level,
                Err(_) => {
                    tracing::warn!(
                        "skipping {}: unknown evidence level {:?}",
                        record.name,
                        record.evidence_level
                    );
                    return Ok(());
                }
            };
            strength = Some(civic_strength(level));
        } else {
            if let Some(amp_level) = record.amp_level {
                if amp_level != "NA" {
                    match Self::amp_classification_and_strength(amp_level) {
                        Some((amp_classification, amp_strength)) => {
                            classification = Some(amp_classification);
                            strength = amp_strength;
                        }
                        None => {
                            tracing::warn!(
                                "skipping {}: unsupported AMP/ASCO/CAP level {:?}",
                                record.name,
                                amp_level
                            );
                            return Ok(());
                        }
                    }
                }
            }

            let lines = record
                .evidence_ids
                .iter()
                .filter_map(|eid| {
                    let evidence_key = format!("civic.eid:{}", eid);
                    if self.cache.evidence.contains_key(&evidence_key) {
                        Some(EvidenceLine {
                            id: None,
                            direction_of_evidence_provided: Direction::Supports,
                            has_evidence_items: vec![EvidenceItem::Ref(evidence_key)],
                        })
                    } else {
                        tracing::debug!(
                            "{} references unadmitted evidence {}",
                            record.name,
                            evidence_key
                        );
                        None
                    }
                })
                .collect::<Vec<_>>();
            evidence_lines = Some(lines);
        }

        // Resolve the predicate before touching disease and therapy caches so
        // that unsupported records emit no stray concepts.
        let Some(predicate) = parse_predicate(record.record_type, record.significance) else {
            tracing::debug!(
                "skipping {}: significance {:?} not supported for {}",
                record.name,
                record.significance,
                record.record_type
            );
            return Ok(());
        };

        let Some(disease) = record.disease else {
            return Ok(());
        };
        let condition = self.add_disease(disease).await?;

        let mut therapeutic = None;
        if record.record_type == "PREDICTIVE" {
            therapeutic = self.add_therapeutic(&record).await?;
            if therapeutic.is_none() {
                return Ok(());
            }
        }

        let gene_context = self.cache.genes.get(&variation_record.gene_key).cloned();
        let allele_origin = record
            .variant_origin
            .map(|origin| origin.to_lowercase())
            .filter(|origin| !origin.is_empty())
            .map(|origin| MappableConcept {
                name: Some(origin),
                ..Default::default()
            });

        let proposition = match predicate {
            ParsedPredicate::TherapeuticResponse(predicate) => {
                Proposition::VariantTherapeuticResponseProposition {
                    predicate,
                    subject_variant: categorical_variant,
                    object_therapeutic: therapeutic.expect("checked above for predictive"),
                    condition_qualifier: condition,
                    allele_origin_qualifier: allele_origin,
                    gene_context_qualifier: gene_context,
                }
            }
            ParsedPredicate::Prognostic(predicate) => Proposition::VariantPrognosticProposition {
                predicate,
                subject_variant: categorical_variant,
                object_condition: condition,
                allele_origin_qualifier: allele_origin,
                gene_context_qualifier: gene_context,
            },
            ParsedPredicate::Diagnostic(predicate) => Proposition::VariantDiagnosticProposition {
                predicate,
                subject_variant: categorical_variant,
                object_condition: condition,
                allele_origin_qualifier: allele_origin,
                gene_context_qualifier: gene_context,
            },
        };

        let statement_id = if record.is_evidence {
            record.name.to_lowercase().replace("eid", "civic.eid:")
        } else {
            record.name.to_lowercase().replace("aid", "civic.aid:")
        };

        let statement = Statement {
            id: statement_id.clone(),
            type_: if record.is_evidence {
                StatementType::Statement
            } else {
                StatementType::StudyStatement
            },
            description: record.description.map(str::to_string).filter(|d| !d.is_empty()),
            direction,
            strength,
            classification,
            proposition,
            specified_by: self.data.methods[0].clone(),
            reported_in,
            has_evidence_lines: evidence_lines,
            extensions: None,
        };

        if record.is_evidence {
            self.cache
                .evidence
                .insert(statement_id, statement.clone());
            self.data.statements_evidence.push(statement);
        } else {
            self.data.statements_assertions.push(statement);
        }
        Ok(())
    }
}

/// Concept mapping for an NCBI gene CURIE.
fn ncbi_gene_mapping(ncbigene_id: &str) -> ConceptMapping {
    ConceptMapping::new(
        Coding {
            id: Some(ncbigene_id.to_string()),
            code: ncbigene_id.rsplit(':').next().unwrap_or(ncbigene_id).to_string(),
            system: systems::NCBI_GENE.to_string(),
            name: None,
        },
        Relation::ExactMatch,
    )
}

/// Concept mapping for a Disease Ontology CURIE.
fn doid_mapping(doid: &str) -> ConceptMapping {
    ConceptMapping::new(
        Coding {
            id: Some(doid.to_string()),
            code: doid.to_string(),
            system: systems::DISEASE_ONTOLOGY.to_string(),
            name: None,
        },
        Relation::ExactMatch,
    )
}

/// Concept mapping for an NCI Thesaurus CURIE.
fn ncit_mapping(ncit_id: &str) -> ConceptMapping {
    ConceptMapping::new(
        Coding {
            id: Some(ncit_id.to_string()),
            code: ncit_id.rsplit(':').next().unwrap_or(ncit_id).to_string(),
            system: systems::NCIT.to_string(),
            name: None,
        },
        Relation::ExactMatch,
    )
}

/// Reconcile normalizer mappings with the source-supplied primary identifier.
///
/// When the identifier already appears among the normalizer mappings with the
/// same code, that mapping is tagged as a CIViC annotation; with a different
/// code, the discrepancy is logged and left as is.  When absent, the source
/// mapping is appended.
fn update_normalizer_mappings(
    mappings: &mut Vec<ConceptMapping>,
    primary_id: &str,
    make_mapping: fn(&str) -> ConceptMapping,
) {
    let prefix = match primary_id.find(':') {
        Some(index) => &primary_id[..=index],
        None => return,
    };

    let mut annotated = false;
    for mapping in mappings.iter_mut() {
        let Some(coding_id) = mapping.coding.id.as_deref() else {
            continue;
        };
        if !coding_id.starts_with(prefix) {
            continue;
        }
        if coding_id == primary_id {
            mapping
                .extensions
                .get_or_insert_with(Vec::new)
                .push(Extension::new("civic_annotation", true));
            annotated = true;
        } else {
            tracing::debug!(
                "CIViC primary concept identifier and normalizer mismatch: {} vs {}",
                primary_id,
                coding_id
            );
        }
        break;
    }

    if !annotated {
        mappings.push(make_mapping(primary_id));
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cdm::core::EXT_NORMALIZER_PRIORITY;
    use crate::cdm::statement::Therapeutic;
    use crate::cdm::vrs::{SequenceExpression, SequenceLocation, SequenceReference};
    use crate::normalize::stub::{
        concept_response, StubConceptNormalizer, StubVariationNormalizer,
    };
    use crate::normalize::ConceptKind;

    fn allele(refget: &str, start: i64, end: i64, alt: &str) -> Allele {
        Allele::new(
            SequenceLocation::new(SequenceReference::new(refget), start, end, None),
            SequenceExpression::LiteralSequenceExpression {
                sequence: alt.to_string(),
            },
        )
    }

    fn test_normalizers() -> ViccNormalizers {
        let genes = StubConceptNormalizer::new()
            .with(
                "ncbigene:1956",
                concept_response(ConceptKind::Gene, "hgnc:3236", "EGFR", &["ncbigene:1956"]),
            )
            .with(
                "ncbigene:5159",
                concept_response(ConceptKind::Gene, "hgnc:8803", "PDGFRA", &["ncbigene:5159"]),
            )
            .with(
                "ncbigene:672",
                concept_response(ConceptKind::Gene, "hgnc:1100", "BRCA1", &["ncbigene:672"]),
            );
        let diseases = StubConceptNormalizer::new()
            .with(
                "DOID:3908",
                concept_response(
                    ConceptKind::Disease,
                    "ncit:C2926",
                    "Lung Non-Small Cell Carcinoma",
                    &["DOID:3908", "mondo:0005233"],
                ),
            )
            .with(
                "DOID:9253",
                concept_response(
                    ConceptKind::Disease,
                    "ncit:C3868",
                    "Gastrointestinal Stromal Tumor",
                    &["DOID:9253"],
                ),
            );
        let therapies = StubConceptNormalizer::new()
            .with(
                "ncit:C66940",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:1430438",
                    "Afatinib",
                    &["ncit:C66940"],
                ),
            )
            .with(
                "ncit:C77083",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:1147220",
                    "Dabrafenib",
                    &["ncit:C77083"],
                ),
            )
            .with(
                "ncit:C77908",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:1425098",
                    "Trametinib",
                    &["ncit:C77908"],
                ),
            );
        let variations = StubVariationNormalizer::new()
            .with(
                "EGFR L858R",
                allele("SQ.vyo55F6mA6n2LgN4cagcdRzOuh38V4mE", 857, 858, "R"),
            )
            .with(
                "NM_005228.4:c.2573T>G",
                allele("SQ.d_QsP29RWJi6bac7GOC9cJ9AO7s_HUMN", 2573, 2574, "G"),
            )
            .with(
                "NC_000007.13:g.55259515T>G",
                allele("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 55191821, 55191822, "G"),
            )
            .with(
                "PDGFRA D842V",
                allele("SQ.XpQn9sZLGv_GU3uiWO7YHq9-_alGjrVX", 841, 842, "V"),
            )
            .with(
                "NM_006206.4:c.2525A>T",
                allele("SQ.Ybl3Z0vfJJhqZGPkoFd4cNmKbiXlaZJO", 2525, 2526, "T"),
            )
            .with(
                "NC_000004.11:g.55152093A>T",
                allele("SQ.HxuclGHh0XCDuF8x6yQrpHUBL7ZntAHc", 55133948, 55133949, "T"),
            );
        ViccNormalizers::new(
            Box::new(genes),
            Box::new(diseases),
            Box::new(therapies),
            Box::new(variations),
        )
    }

    fn test_harvest() -> CivicHarvest {
        let raw = include_str!("../../tests/data/civic_harvester.json");
        serde_json::from_str(raw).expect("fixture parses")
    }

    async fn transformed() -> CdmDocument {
        let normalizers = test_normalizers();
        let mut transformer =
            CivicTransformer::new(&normalizers, TransformOptions::default());
        transformer
            .transform(&test_harvest())
            .await
            .expect("transform succeeds");
        transformer.finish()
    }

    #[tokio::test]
    async fn eid2997_therapeutic_response() {
        let cdm = transformed().await;

        let statement = cdm
            .statements_evidence
            .iter()
            .find(|s| s.id == "civic.eid:2997")
            .expect("EID2997 is admitted");
        assert!(matches!(statement.type_, StatementType::Statement));
        assert_eq!(statement.direction, Some(Direction::Supports));

        let strength = statement.strength.as_ref().unwrap();
        assert_eq!(strength.name.as_deref(), Some("Validated association"));
        assert_eq!(strength.primary_coding.as_ref().unwrap().code, "A");
        assert_eq!(
            strength.mappings.as_ref().unwrap()[0].coding.code,
            "e000001"
        );

        match &statement.proposition {
            Proposition::VariantTherapeuticResponseProposition {
                predicate,
                subject_variant,
                object_therapeutic,
                condition_qualifier,
                allele_origin_qualifier,
                gene_context_qualifier,
            } => {
                assert_eq!(
                    *predicate,
                    TherapeuticResponsePredicate::PredictsSensitivityTo
                );
                assert_eq!(subject_variant.id, "civic.mpid:33");
                assert!(subject_variant.is_admissible());
                assert_eq!(object_therapeutic.id(), Some("civic.tid:146"));
                assert_eq!(condition_qualifier.id.as_deref(), Some("civic.did:8"));
                assert_eq!(
                    allele_origin_qualifier.as_ref().unwrap().name.as_deref(),
                    Some("somatic")
                );
                assert_eq!(
                    gene_context_qualifier.as_ref().unwrap().id.as_deref(),
                    Some("civic.gid:19")
                );
            }
            other => panic!("expected therapeutic response proposition, got {:?}", other),
        }

        let documents = &statement.reported_in.as_ref().unwrap();
        assert_eq!(documents[0].id.as_deref(), Some("civic.source:1725"));
        assert_eq!(documents[0].pmid, Some(23982599));
    }

    #[tokio::test]
    async fn eid2_diagnostic_exclusion_with_members() {
        let cdm = transformed().await;

        let statement = cdm
            .statements_evidence
            .iter()
            .find(|s| s.id == "civic.eid:2")
            .expect("EID2 is admitted");
        match &statement.proposition {
            Proposition::VariantDiagnosticProposition {
                predicate,
                subject_variant,
                object_condition,
                ..
            } => {
                assert_eq!(
                    *predicate,
                    DiagnosticPredicate::IsDiagnosticExclusionCriterionFor
                );
                assert_eq!(object_condition.id.as_deref(), Some("civic.did:2"));
                let priority = object_condition
                    .mappings
                    .iter()
                    .flatten()
                    .find(|m| {
                        m.extensions.iter().flatten().any(|ext| {
                            ext.name == EXT_NORMALIZER_PRIORITY
                                && ext.value == serde_json::json!(true)
                        })
                    })
                    .expect("a priority mapping exists");
                assert_eq!(priority.coding.id.as_deref(), Some("ncit:C3868"));

                let members = subject_variant.members.as_ref().unwrap();
                let member_names = members
                    .iter()
                    .map(|m| m.name.as_deref().unwrap())
                    .collect::<Vec<_>>();
                assert_eq!(
                    member_names,
                    vec!["NM_006206.4:c.2525A>T", "NC_000004.11:g.55152093A>T"]
                );
            }
            other => panic!("expected diagnostic proposition, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn aid6_assertion_classification_and_evidence_lines() {
        let cdm = transformed().await;

        let assertion = cdm
            .statements_assertions
            .iter()
            .find(|s| s.id == "civic.aid:6")
            .expect("AID6 is admitted");
        assert!(matches!(assertion.type_, StatementType::StudyStatement));
        assert!(assertion.reported_in.is_none());

        let classification = assertion.classification.as_ref().unwrap();
        assert_eq!(
            classification.primary_coding.as_ref().unwrap().code,
            "Tier I"
        );
        assert_eq!(
            classification.primary_coding.as_ref().unwrap().system,
            systems::AMP_ASCO_CAP
        );

        let strength = assertion.strength.as_ref().unwrap();
        assert_eq!(strength.primary_coding.as_ref().unwrap().code, "Level A");
        let strength_mappings = strength.mappings.as_ref().unwrap();
        assert_eq!(strength_mappings.len(), 2);
        assert_eq!(strength_mappings[0].coding.code, "e000001");
        assert_eq!(strength_mappings[1].coding.code, "A");
        assert_eq!(
            strength_mappings[1].coding.name.as_deref(),
            Some("Validated association")
        );

        // The reference to the never-harvested EID99999 is dropped; the
        // admitted reference survives and is embedded at serialization.
        let lines = assertion.has_evidence_lines.as_ref().unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].has_evidence_items.len(), 1);
        match &lines[0].has_evidence_items[0] {
            EvidenceItem::Statement(statement) => assert_eq!(statement.id, "civic.eid:2997"),
            other => panic!("expected embedded statement, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn combination_therapy_group() {
        let cdm = transformed().await;

        let statement = cdm
            .statements_evidence
            .iter()
            .find(|s| s.id == "civic.eid:1409")
            .expect("EID1409 is admitted");
        let therapeutic = statement.proposition.therapeutic().unwrap();
        match therapeutic {
            Therapeutic::Group(group) => {
                assert!(group.id.starts_with("civic.ctid:"));
                assert_eq!(group.membership_operator, MembershipOperator::And);
                assert_eq!(group.therapies.len(), 2);
                let interaction = group
                    .extensions
                    .iter()
                    .flatten()
                    .find(|ext| ext.name == "civic_therapy_interaction_type")
                    .unwrap();
                assert_eq!(interaction.value, serde_json::json!("COMBINATION"));
            }
            other => panic!("expected therapy group, got {:?}", other),
        }

        // Both members and the group itself are emitted.
        assert!(cdm
            .therapies
            .iter()
            .any(|t| t.id() == Some("civic.tid:22")));
        assert!(cdm
            .therapies
            .iter()
            .any(|t| t.id().map(|id| id.starts_with("civic.ctid:")).unwrap_or(false)));
    }

    #[tokio::test]
    async fn unsupported_variant_marks_failure_and_still_emits() {
        let cdm = transformed().await;

        let cv = cdm
            .categorical_variants
            .iter()
            .find(|cv| cv.id == "civic.mpid:473")
            .expect("fusion profile is emitted");
        assert!(cv.constraints.is_none());
        assert!(!cv.is_admissible());

        // The statement referencing it is still emitted; the loader's
        // reachability filter is responsible for dropping it.
        assert!(cdm
            .statements_evidence
            .iter()
            .any(|s| s.id == "civic.eid:473"));
    }

    #[tracing_test::traced_test]
    #[tokio::test]
    async fn complex_molecular_profiles_are_skipped() {
        let cdm = transformed().await;
        assert!(!cdm
            .categorical_variants
            .iter()
            .any(|cv| cv.id == "civic.mpid:4432"));
        assert!(!cdm
            .statements_evidence
            .iter()
            .any(|s| s.id == "civic.eid:4432"));
        assert!(logs_contain("molecular profiles not supported"));
    }

    #[tokio::test]
    async fn documents_deduplicate_by_source() {
        let cdm = transformed().await;
        let count = cdm
            .documents
            .iter()
            .filter(|d| d.id.as_deref() == Some("civic.source:1725"))
            .count();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn evidence_emitted_before_assertions() {
        let cdm = transformed().await;
        assert!(!cdm.statements_evidence.is_empty());
        assert!(!cdm.statements_assertions.is_empty());
        // Every evidence item referenced from an assertion's evidence lines
        // exists in the evidence array.
        for assertion in &cdm.statements_assertions {
            for line in assertion.has_evidence_lines.iter().flatten() {
                for item in &line.has_evidence_items {
                    assert!(cdm
                        .statements_evidence
                        .iter()
                        .any(|e| e.id == item.statement_id()));
                }
            }
        }
    }

    #[tokio::test]
    async fn mpid33_extensions_and_aliases() {
        let cdm = transformed().await;
        let cv = cdm
            .categorical_variants
            .iter()
            .find(|cv| cv.id == "civic.mpid:33")
            .unwrap();

        // The rsID alias moved into the mappings.
        let aliases = cv.aliases.as_ref().unwrap();
        assert!(aliases.contains(&"LEU858ARG".to_string()));
        assert!(!aliases.iter().any(|a| a.starts_with("RS")));
        assert!(cv
            .mappings
            .iter()
            .flatten()
            .any(|m| m.coding.code == "rs121434568" && m.coding.system == systems::DBSNP));

        let ext_names = cv
            .extensions
            .iter()
            .flatten()
            .map(|ext| ext.name.as_str())
            .collect::<Vec<_>>();
        assert_eq!(
            ext_names,
            vec![
                "CIViC Molecular Profile Score",
                "CIViC representative coordinate",
                "Variant types"
            ]
        );

        // Variant type codings keep the Sequence Ontology system.
        let variant_types = cv
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.name == "Variant types")
            .unwrap();
        assert_eq!(
            variant_types.value[0]["name"],
            serde_json::json!("missense_variant")
        );
    }

    #[tokio::test]
    async fn gene_mappings_tag_civic_annotation() {
        let cdm = transformed().await;
        let gene = cdm
            .genes
            .iter()
            .find(|g| g.id.as_deref() == Some("civic.gid:19"))
            .unwrap();
        // The normalizer returned ncbigene:1956 itself, so the mapping is
        // tagged instead of appended.
        let ncbi = gene
            .mappings
            .iter()
            .flatten()
            .filter(|m| m.coding.id.as_deref() == Some("ncbigene:1956"))
            .collect::<Vec<_>>();
        assert_eq!(ncbi.len(), 1);
        assert!(ncbi[0]
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.name == "civic_annotation"));
    }

    #[rstest::rstest]
    #[case("L858R", true)]
    #[case("BRCA1 fusion", false)]
    #[case("V600E/V600M", false)]
    #[case("P968fs", false)]
    #[case("EXON 12 MUTATION", false)]
    fn variant_query_support(#[case] name: &str, #[case] supported: bool) {
        assert_eq!(
            supported,
            CivicTransformer::is_supported_variant_query(name, 1)
        );
    }

    #[rstest::rstest]
    #[case("L858R", "L858R")]
    #[case("NM_005228.4(EGFR):c.2573T>G (p.Leu858Arg)", "p.Leu858Arg")]
    fn variant_query_name(#[case] name: &str, #[case] expected: &str) {
        let variant = CivicVariant {
            id: 1,
            name: name.to_string(),
            entrez_name: "EGFR".to_string(),
            gene_id: 19,
            hgvs_expressions: vec![],
            allele_registry_id: None,
            clinvar_entries: vec![],
            variant_aliases: vec![],
            variant_types: vec![],
            coordinates: None,
        };
        assert_eq!(expected, CivicTransformer::variant_query_name(&variant));
    }

    #[rstest::rstest]
    #[case("TIER_I_LEVEL_A", "Tier I", Some("Level A"))]
    #[case("TIER_II_LEVEL_C", "Tier II", Some("Level C"))]
    #[case("TIER_III", "Tier III", None)]
    #[case("TIER_IV", "Tier IV", None)]
    fn amp_level_parsing(
        #[case] amp_level: &str,
        #[case] tier: &str,
        #[case] level: Option<&str>,
    ) {
        let (classification, strength) =
            CivicTransformer::amp_classification_and_strength(amp_level).unwrap();
        assert_eq!(classification.primary_coding.unwrap().code, tier);
        assert_eq!(
            strength.map(|s| s.primary_coding.unwrap().code),
            level.map(str::to_string)
        );
    }

    #[test]
    fn amp_level_garbage_is_rejected() {
        assert!(CivicTransformer::amp_classification_and_strength("NOT_A_TIER").is_none());
    }
}
