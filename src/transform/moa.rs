//! Transformation of harvested MOAlmanac records to the common data model.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::Semaphore;

use crate::cdm::catvar::{CategoricalVariant, DefiningAlleleConstraint};
use crate::cdm::core::{
    some_extensions, some_mappings, Coding, ConceptMapping, ConceptType, Extension,
    MappableConcept, Relation, EXT_ALIASES,
};
use crate::cdm::statement::{
    Direction, Document, MembershipOperator, PrognosticPredicate, Proposition, Statement,
    StatementType, Therapeutic, TherapeuticResponsePredicate,
};
use crate::cdm::vrs::Allele;
use crate::cdm::CdmDocument;
use crate::common::{digest::digest_for_keys, sanitize_name, SourceName};
use crate::normalize::{
    systems, NormalizationResponse, NormalizeError, ViccNormalizers,
};
use crate::transform::cache::EntityCache;
use crate::transform::{build_therapy_group, moa_strength, MethodId, MoaEvidenceLevel, TransformOptions};

/// Harvested MOAlmanac data, as written by the harvester.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct MoaHarvest {
    #[serde(default)]
    pub genes: Vec<String>,
    #[serde(default)]
    pub variants: Vec<MoaVariant>,
    #[serde(default)]
    pub sources: Vec<MoaSource>,
    #[serde(default)]
    pub assertions: Vec<MoaAssertion>,
}

/// A MOA variant (feature) record.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaVariant {
    pub id: i64,
    /// Display name of the feature, e.g. `BRAF p.V600E (Missense)`.
    pub feature: String,
    pub feature_type: Option<String>,
    pub gene: Option<String>,
    pub gene1: Option<String>,
    pub gene2: Option<String>,
    pub protein_change: Option<String>,
    pub rsid: Option<String>,
    pub chromosome: Option<String>,
    #[serde(default)]
    pub start_position: serde_json::Value,
    #[serde(default)]
    pub end_position: serde_json::Value,
    pub reference_allele: Option<String>,
    pub alternate_allele: Option<String>,
    pub cdna_change: Option<String>,
    #[serde(default)]
    pub exon: serde_json::Value,
    pub rearrangement_type: Option<String>,
    pub locus: Option<String>,
}

/// A MOA source (document) record.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaSource {
    pub id: i64,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    pub citation: Option<String>,
    pub url: Option<String>,
    #[serde(default)]
    pub pmid: serde_json::Value,
    pub doi: Option<String>,
}

/// A MOA assertion record.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaAssertion {
    pub id: i64,
    pub description: Option<String>,
    pub predictive_implication: Option<String>,
    /// Tri-state: `""` (not prognostic), `0`, or `1`.
    #[serde(default)]
    pub favorable_prognosis: serde_json::Value,
    pub source_id: Option<i64>,
    pub variant: MoaAssertionVariant,
    pub therapy: MoaAssertionTherapy,
    pub disease: MoaAssertionDisease,
}

/// The variant reference on a MOA assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaAssertionVariant {
    pub id: i64,
    pub feature_type: Option<String>,
}

/// The therapy block on a MOA assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaAssertionTherapy {
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub type_: Option<String>,
    /// Tri-state: `""`, `0`, or `1`.
    #[serde(default)]
    pub resistance: serde_json::Value,
    /// Tri-state: `""`, `0`, or `1`.
    #[serde(default)]
    pub sensitivity: serde_json::Value,
}

/// The disease block on a MOA assertion.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct MoaAssertionDisease {
    pub name: Option<String>,
    pub oncotree_code: Option<String>,
    pub oncotree_term: Option<String>,
}

impl MoaAssertionDisease {
    /// Content-addressed identity key for MOA diseases, which carry no
    /// stable upstream identifier.
    fn identity_digest(&self) -> Result<Option<String>, anyhow::Error> {
        if [&self.name, &self.oncotree_code, &self.oncotree_term]
            .iter()
            .any(|field| field.as_deref().map(str::is_empty).unwrap_or(true))
        {
            return Ok(None);
        }
        let (key, value) = match &self.oncotree_code {
            Some(code) if !code.is_empty() => ("oncotree_code", code.as_str()),
            _ => (
                "oncotree_term",
                self.oncotree_term.as_deref().unwrap_or_default(),
            ),
        };
        let digest = digest_for_keys(&[format!("{}:{}", key, value)])?;
        Ok(Some(digest))
    }
}

/// Tri-state flag helpers: MOA uses `""` for unset and `0`/`1` for values.
fn flag_is_set(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        _ => true,
    }
}

fn flag_is_truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::Number(n) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        serde_json::Value::String(s) => !s.is_empty() && s != "0",
        _ => false,
    }
}

/// Scalar-to-string helper for position fields that arrive as either JSON
/// strings or numbers.
fn scalar_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Therapy types whose multi-therapy entries form combination groups.
const COMBINATION_THERAPY_TYPES: &[&str] = &[
    "COMBINATION THERAPY",
    "IMMUNOTHERAPY",
    "RADIATION THERAPY",
    "TARGETED THERAPY",
];

/// Aggregated state for one reconciled concept: every source label that
/// resolved to the same identity, plus the first normalization outcome.
#[derive(Debug, Default)]
struct ConceptAggregate {
    labels: BTreeSet<String>,
    normalized: Option<(String, NormalizationResponse)>,
    /// Source-derived mappings seeded before the normalizer mappings
    /// (OncoTree coding for diseases).
    lead_mappings: Vec<ConceptMapping>,
}

impl ConceptAggregate {
    /// Primary name (lexicographic minimum) and remaining aliases.
    fn name_and_aliases(&self) -> (String, Vec<String>) {
        let mut labels = self.labels.iter().cloned();
        let name = labels.next().unwrap_or_default();
        (name, labels.collect())
    }
}

/// Variation data cached per MOA variant for statement assembly.
#[derive(Debug, Clone)]
pub struct MoaVariationRecord {
    pub categorical_variant: CategoricalVariant,
    pub gene: Option<MappableConcept>,
}

/// A transformer of MOAlmanac harvested data to the common data model.
pub struct MoaTransformer<'a> {
    normalizers: &'a ViccNormalizers,
    options: TransformOptions,
    cache: EntityCache<MoaVariationRecord>,
    data: CdmDocument,
    therapy_key_by_label: HashMap<String, String>,
    therapy_aggregates: IndexMap<String, ConceptAggregate>,
    disease_key_by_digest: HashMap<String, String>,
    disease_aggregates: IndexMap<String, ConceptAggregate>,
}

impl<'a> MoaTransformer<'a> {
    /// Construct the transformer with normalizer handles and run options.
    pub fn new(normalizers: &'a ViccNormalizers, options: TransformOptions) -> Self {
        let mut data = CdmDocument::default();
        data.methods = vec![MethodId::MoaAssertionBiorxiv.method()];
        Self {
            normalizers,
            options,
            cache: EntityCache::new(),
            data,
            therapy_key_by_label: HashMap::new(),
            therapy_aggregates: IndexMap::new(),
            disease_key_by_digest: HashMap::new(),
            disease_aggregates: IndexMap::new(),
        }
    }

    /// Transform MOA harvested data; results accumulate internally and are
    /// obtained via [`Self::finish`].
    pub async fn transform(&mut self, harvest: &MoaHarvest) -> Result<(), NormalizeError> {
        self.add_genes(&harvest.genes).await?;

        // Concept labels are aggregated across the whole harvest before any
        // concept is constructed, so reconciliation does not depend on
        // record order.
        self.collect_concept_labels(&harvest.assertions).await?;
        self.build_therapies();
        self.build_diseases();

        self.add_categorical_variants(&harvest.variants).await?;
        self.add_documents(&harvest.sources);

        for assertion in &harvest.assertions {
            self.add_statement(assertion)?;
        }
        Ok(())
    }

    /// Finalize into the CDM artifact.
    pub fn finish(self) -> CdmDocument {
        super::finish_document(self.data)
    }

    /// Create gene concepts for all MOA gene labels.
    async fn add_genes(&mut self, genes: &[String]) -> Result<(), NormalizeError> {
        for gene in genes {
            let normalization = self.normalizers.normalize_gene(gene).await?;

            let mut extensions = Vec::new();
            let (id, mappings) = match (&normalization.normalized_id, &normalization.response) {
                (Some(normalized_id), Some(response)) => {
                    let concept_id = response
                        .concept
                        .as_ref()
                        .map(|concept| concept.id.as_str())
                        .unwrap_or(normalized_id);
                    (
                        format!("moa.{}", concept_id),
                        ViccNormalizers::vicc_normalizer_mappings(normalized_id, response),
                    )
                }
                _ => {
                    extensions.push(Extension::normalizer_failure());
                    (format!("moa.gene:{}", sanitize_name(gene)), Vec::new())
                }
            };

            let concept = MappableConcept {
                id: Some(id),
                concept_type: Some(ConceptType::Gene),
                name: Some(gene.clone()),
                primary_coding: None,
                mappings: some_mappings(mappings),
                extensions: some_extensions(extensions),
            };
            self.cache
                .genes
                .insert(sanitize_name(gene), concept.clone());
            self.data.genes.push(concept);
        }
        Ok(())
    }

    /// The labels of the therapies referenced by an assertion; multi-therapy
    /// names are split only for supported combination types.
    fn therapy_labels(therapy: &MoaAssertionTherapy) -> Vec<String> {
        let Some(name) = therapy.name.as_deref().filter(|name| !name.is_empty()) else {
            return Vec::new();
        };
        if name.contains('+') {
            let supported = therapy
                .type_
                .as_deref()
                .map(|t| COMBINATION_THERAPY_TYPES.contains(&t.to_uppercase().as_str()))
                .unwrap_or(false);
            if !supported {
                // Hormone and chemotherapy combinations are not supported.
                return Vec::new();
            }
            name.split('+').map(|label| label.trim().to_string()).collect()
        } else {
            vec![name.to_string()]
        }
    }

    /// First pass: normalize every distinct therapy label and disease
    /// identity across the harvest and group them by normalized identity.
    async fn collect_concept_labels(
        &mut self,
        assertions: &[MoaAssertion],
    ) -> Result<(), NormalizeError> {
        for assertion in assertions {
            for label in Self::therapy_labels(&assertion.therapy) {
                if let Some(key) = self.therapy_key_by_label.get(&label) {
                    self.therapy_aggregates
                        .get_mut(key)
                        .expect("label keys always have an aggregate")
                        .labels
                        .insert(label);
                    continue;
                }

                let normalization = self.normalizers.normalize_therapy(&label).await?;
                let (key, normalized) =
                    match (&normalization.normalized_id, &normalization.response) {
                        (Some(normalized_id), Some(response)) => {
                            let concept_id = response
                                .concept
                                .as_ref()
                                .map(|concept| concept.id.as_str())
                                .unwrap_or(normalized_id);
                            (
                                format!("moa.{}", concept_id),
                                Some((normalized_id.clone(), response.clone())),
                            )
                        }
                        _ => {
                            tracing::debug!("Therapy Normalizer unable to normalize: {}", label);
                            (format!("moa.therapy:{}", sanitize_name(&label)), None)
                        }
                    };

                self.therapy_key_by_label.insert(label.clone(), key.clone());
                let aggregate = self.therapy_aggregates.entry(key).or_default();
                aggregate.labels.insert(label);
                if aggregate.normalized.is_none() {
                    aggregate.normalized = normalized;
                }
            }

            let digest = match assertion.disease.identity_digest() {
                Ok(Some(digest)) => digest,
                Ok(None) => continue,
                Err(e) => {
                    return Err(NormalizeError::Service(e.to_string()));
                }
            };
            let disease_name = assertion
                .disease
                .name
                .clone()
                .expect("identity digest requires a name");
            if let Some(key) = self.disease_key_by_digest.get(&digest) {
                self.disease_aggregates
                    .get_mut(key)
                    .expect("digest keys always have an aggregate")
                    .labels
                    .insert(disease_name);
                continue;
            }

            let (normalization, queries) = self.normalize_disease(&assertion.disease).await?;
            let (key, normalized) = match (&normalization.normalized_id, &normalization.response)
            {
                (Some(normalized_id), Some(response)) => {
                    let concept_id = response
                        .concept
                        .as_ref()
                        .map(|concept| concept.id.as_str())
                        .unwrap_or(normalized_id);
                    (
                        format!("moa.{}", concept_id),
                        Some((normalized_id.clone(), response.clone())),
                    )
                }
                _ => {
                    tracing::debug!("Disease Normalizer unable to normalize: {:?}", queries);
                    (
                        format!("moa.disease:{}", sanitize_name(&disease_name)),
                        None,
                    )
                }
            };

            self.disease_key_by_digest.insert(digest, key.clone());
            let aggregate = self.disease_aggregates.entry(key).or_default();
            aggregate.labels.insert(disease_name);
            if aggregate.normalized.is_none() {
                aggregate.normalized = normalized;
            }
            if aggregate.lead_mappings.is_empty() {
                if let (Some(code), term) = (
                    assertion.disease.oncotree_code.as_deref(),
                    assertion.disease.oncotree_term.as_deref(),
                ) {
                    aggregate.lead_mappings.push(ConceptMapping::new(
                        Coding {
                            id: Some(format!("oncotree:{}", code)),
                            code: code.to_string(),
                            system: systems::ONCOTREE.to_string(),
                            name: term.map(str::to_string),
                        },
                        Relation::ExactMatch,
                    ));
                }
            }
        }
        Ok(())
    }

    async fn normalize_disease(
        &self,
        disease: &MoaAssertionDisease,
    ) -> Result<(crate::normalize::ConceptNormalization, Vec<String>), NormalizeError> {
        let mut queries = Vec::new();
        if let Some(code) = disease.oncotree_code.as_deref().filter(|c| !c.is_empty()) {
            queries.push(format!("oncotree:{}", code));
        }
        if let Some(term) = disease.oncotree_term.as_deref().filter(|t| !t.is_empty()) {
            queries.push(term.to_string());
        }
        if let Some(name) = disease.name.as_deref().filter(|n| !n.is_empty()) {
            queries.push(name.to_string());
        }

        let mut normalization = Default::default();
        for query in &queries {
            normalization = self.normalizers.normalize_disease(query).await?;
            if normalization.normalized_id.is_some() {
                break;
            }
        }
        Ok((normalization, queries))
    }

    /// Second pass: construct each reconciled therapy concept, using the
    /// lexicographically minimal label as the name and the rest as aliases.
    fn build_therapies(&mut self) {
        for (key, aggregate) in &self.therapy_aggregates {
            let (name, aliases) = aggregate.name_and_aliases();
            let mut extensions = Vec::new();
            let mappings = match &aggregate.normalized {
                Some((normalized_id, response)) => {
                    if let Some(approval) =
                        ViccNormalizers::regulatory_approval_extension(response)
                    {
                        extensions.push(approval);
                    }
                    ViccNormalizers::vicc_normalizer_mappings(normalized_id, response)
                }
                None => {
                    extensions.push(Extension::normalizer_failure());
                    Vec::new()
                }
            };
            if !aliases.is_empty() {
                extensions.push(Extension::new(EXT_ALIASES, &aliases));
            }

            let concept = MappableConcept {
                id: Some(key.clone()),
                concept_type: Some(ConceptType::Therapy),
                name: Some(name),
                primary_coding: None,
                mappings: some_mappings(mappings),
                extensions: some_extensions(extensions),
            };
            self.cache
                .therapies
                .insert(key.clone(), Therapeutic::Therapy(concept.clone()));
            self.data.therapies.push(Therapeutic::Therapy(concept));
        }
    }

    /// Second pass for diseases, mirroring [`Self::build_therapies`].
    fn build_diseases(&mut self) {
        for (key, aggregate) in &self.disease_aggregates {
            let (name, aliases) = aggregate.name_and_aliases();
            let mut mappings = aggregate.lead_mappings.clone();
            let mut extensions = Vec::new();
            match &aggregate.normalized {
                Some((normalized_id, response)) => {
                    mappings.extend(ViccNormalizers::vicc_normalizer_mappings(
                        normalized_id,
                        response,
                    ));
                }
                None => extensions.push(Extension::normalizer_failure()),
            }
            if !aliases.is_empty() {
                extensions.push(Extension::new(EXT_ALIASES, &aliases));
            }

            let concept = MappableConcept {
                id: Some(key.clone()),
                concept_type: Some(ConceptType::Disease),
                name: Some(name),
                primary_coding: None,
                mappings: some_mappings(mappings),
                extensions: some_extensions(extensions),
            };
            self.cache.conditions.insert(key.clone(), concept.clone());
            self.data.conditions.push(concept);
        }
    }

    /// The genomic member allele derived from the representative coordinate,
    /// when complete.
    async fn genomic_member(
        normalizers: &ViccNormalizers,
        variant: &MoaVariant,
    ) -> Result<Option<Allele>, NormalizeError> {
        let chromosome = variant.chromosome.as_deref().filter(|c| !c.is_empty());
        let position = scalar_to_string(&variant.start_position);
        let reference = variant
            .reference_allele
            .as_deref()
            .filter(|r| !r.is_empty() && *r != "-");
        let alternate = variant
            .alternate_allele
            .as_deref()
            .filter(|a| !a.is_empty() && *a != "-");

        let (Some(chromosome), Some(position), Some(reference), Some(alternate)) =
            (chromosome, position, reference, alternate)
        else {
            tracing::debug!(
                "not enough information to build a genomic representation for moa.variant:{}",
                variant.id
            );
            return Ok(None);
        };

        let gnomad_vcf = format!("{}-{}-{}-{}", chromosome, position, reference, alternate);
        match normalizers.normalize_variation(&gnomad_vcf).await? {
            Some(mut allele) => {
                allele.name = Some(gnomad_vcf);
                Ok(Some(allele))
            }
            None => {
                tracing::debug!(
                    "Variation Normalizer unable to normalize genomic representation: {}",
                    gnomad_vcf
                );
                Ok(None)
            }
        }
    }

    /// Build the categorical variant for one MOA variant record.
    async fn build_categorical_variant(
        normalizers: &ViccNormalizers,
        variant: &MoaVariant,
        gene: Option<&MappableConcept>,
    ) -> Result<CategoricalVariant, NormalizeError> {
        let variant_key = format!("moa.variant:{}", variant.id);
        let mut extensions = Vec::new();
        let mut constraints = None;

        let gene_name = gene.and_then(|g| g.name.clone());
        let protein_change = variant
            .protein_change
            .as_deref()
            .filter(|p| !p.is_empty());

        if variant.rearrangement_type.is_some() || protein_change.is_none() || gene_name.is_none()
        {
            tracing::debug!(
                "Variation Normalizer does not support {}: {}",
                variant_key,
                variant.feature
            );
            extensions.push(Extension::normalizer_failure());
        } else {
            // Amino-acid substitutions only; the query drops the `p.` prefix.
            let query = format!(
                "{} {}",
                gene_name.as_deref().expect("checked above"),
                &protein_change.expect("checked above")[2..]
            );
            match normalizers.normalize_variation(&query).await? {
                Some(allele) => {
                    constraints = Some(vec![DefiningAlleleConstraint::new(allele)]);
                }
                None => {
                    tracing::debug!(
                        "Variation Normalizer unable to normalize {} using query {}",
                        variant_key,
                        query
                    );
                    extensions.push(Extension::normalizer_failure());
                }
            }
        }

        let representative_coordinate = serde_json::json!({
            "chromosome": variant.chromosome,
            "start_position": variant.start_position,
            "end_position": variant.end_position,
            "reference_allele": variant.reference_allele,
            "alternate_allele": variant.alternate_allele,
            "cdna_change": variant.cdna_change,
            "protein_change": variant.protein_change,
            "exon": variant.exon,
        });
        if representative_coordinate
            .as_object()
            .map(|coord| coord.values().any(|v| !v.is_null()))
            .unwrap_or(false)
        {
            extensions.push(Extension::new(
                "MOA representative coordinate",
                representative_coordinate,
            ));
        }
        if let Some(locus) = variant.locus.as_deref().filter(|l| !l.is_empty()) {
            extensions.push(Extension::new("MOA locus", locus));
        }

        let members = Self::genomic_member(normalizers, variant).await?;

        let mut mappings = vec![ConceptMapping::new(
            Coding {
                id: Some(variant_key.clone()),
                code: variant.id.to_string(),
                system: systems::MOALMANAC.to_string(),
                name: None,
            },
            Relation::ExactMatch,
        )];
        if let Some(rsid) = variant.rsid.as_deref().filter(|r| !r.is_empty()) {
            mappings.push(ConceptMapping::new(
                Coding {
                    id: None,
                    code: rsid.to_string(),
                    system: systems::DBSNP.to_string(),
                    name: None,
                },
                Relation::RelatedMatch,
            ));
        }

        Ok(CategoricalVariant {
            id: variant_key,
            type_: "CategoricalVariant".to_string(),
            name: variant.feature.clone(),
            description: None,
            aliases: None,
            mappings: some_mappings(mappings),
            extensions: some_extensions(extensions),
            constraints,
            members: members.map(|member| vec![member]),
        })
    }

    /// Create categorical variants for all MOA variant records, normalizing
    /// with bounded concurrency; gene fusions are not supported.
    async fn add_categorical_variants(
        &mut self,
        variants: &[MoaVariant],
    ) -> Result<(), NormalizeError> {
        let supported = variants
            .iter()
            .filter(|variant| variant.gene2.is_none())
            .map(|variant| {
                let gene_label = variant.gene.as_deref().or(variant.gene1.as_deref());
                let gene = gene_label
                    .and_then(|label| self.cache.genes.get(&sanitize_name(label)))
                    .cloned();
                (variant, gene)
            })
            .collect::<Vec<_>>();

        let semaphore = Arc::new(Semaphore::new(self.options.normalizer_concurrency.max(1)));
        let normalizers = self.normalizers;
        let tasks = supported.iter().map(|(variant, gene)| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .expect("semaphore is never closed");
                let cv =
                    Self::build_categorical_variant(normalizers, variant, gene.as_ref()).await?;
                Ok::<(i64, CategoricalVariant, Option<MappableConcept>), NormalizeError>((
                    variant.id,
                    cv,
                    gene.clone(),
                ))
            }
        });
        let mut results = futures::future::try_join_all(tasks).await?;
        results.sort_by_key(|(variant_id, _, _)| *variant_id);

        for (variant_id, cv, gene) in results {
            self.data.categorical_variants.push(cv.clone());
            self.cache.variations.insert(
                format!("moa.variant:{}", variant_id),
                MoaVariationRecord {
                    categorical_variant: cv,
                    gene,
                },
            );
        }
        Ok(())
    }

    /// Create documents for all MOA sources.
    fn add_documents(&mut self, sources: &[MoaSource]) {
        for source in sources {
            let source_key = format!("moa.source:{}", source.id);
            let document = Document {
                id: Some(source_key.clone()),
                type_: "Document".to_string(),
                name: None,
                title: source.citation.clone(),
                pmid: source.pmid.as_i64().or_else(|| {
                    source.pmid.as_str().and_then(|pmid| pmid.parse().ok())
                }),
                doi: source.doi.clone().filter(|doi| !doi.is_empty()),
                urls: source
                    .url
                    .clone()
                    .filter(|url| !url.is_empty())
                    .map(|url| vec![url]),
                mappings: None,
                extensions: Some(vec![Extension::new("source_type", &source.type_)]),
            };
            self.cache
                .documents
                .insert(source_key, document.clone());
            self.data.documents.push(document);
        }
    }

    /// Resolve the therapeutic object for an assertion: a single reconciled
    /// therapy or a combination group.
    fn therapy_or_group(&mut self, assertion: &MoaAssertion) -> Option<Therapeutic> {
        let labels = Self::therapy_labels(&assertion.therapy);
        match labels.as_slice() {
            [] => None,
            [label] => {
                let key = self.therapy_key_by_label.get(label)?;
                self.cache.therapies.get(key).cloned()
            }
            labels => {
                let mut members = Vec::new();
                for label in labels {
                    let key = self.therapy_key_by_label.get(label)?;
                    match self.cache.therapies.get(key)? {
                        Therapeutic::Therapy(concept) => members.push(concept.clone()),
                        Therapeutic::Group(_) => return None,
                    }
                }

                let group = build_therapy_group(
                    SourceName::Moa,
                    MembershipOperator::And,
                    members,
                    Some(vec![Extension::new(
                        "moa_therapy_type",
                        &assertion.therapy.type_,
                    )]),
                )
                .map_err(|e| {
                    tracing::debug!(
                        "could not build therapy group for moa.assertion:{}: {}",
                        assertion.id,
                        e
                    );
                    e
                })
                .ok()?;

                if !self.cache.therapies.contains_key(&group.id) {
                    self.cache
                        .therapies
                        .insert(group.id.clone(), Therapeutic::Group(group.clone()));
                    self.data.therapies.push(Therapeutic::Group(group.clone()));
                }
                Some(Therapeutic::Group(group))
            }
        }
    }

    /// Assemble and emit the statement for one MOA assertion.
    fn add_statement(&mut self, assertion: &MoaAssertion) -> Result<(), NormalizeError> {
        let assertion_id = format!("moa.assertion:{}", assertion.id);

        let variant_key = format!("moa.variant:{}", assertion.variant.id);
        let Some(variation_record) = self.cache.variations.get(&variant_key).cloned() else {
            tracing::debug!("{} has no variation for {}", assertion_id, variant_key);
            return Ok(());
        };

        let Some(level) = assertion
            .predictive_implication
            .as_deref()
            .and_then(MoaEvidenceLevel::from_predictive_implication)
        else {
            tracing::warn!(
                "{} has unsupported predictive implication {:?}",
                assertion_id,
                assertion.predictive_implication
            );
            return Ok(());
        };
        let strength = moa_strength(level);

        let condition = match assertion
            .disease
            .identity_digest()
            .map_err(|e| NormalizeError::Service(e.to_string()))?
            .and_then(|digest| self.disease_key_by_digest.get(&digest))
            .and_then(|key| self.cache.conditions.get(key))
        {
            Some(condition) => condition.clone(),
            None => {
                tracing::debug!(
                    "{} has no disease for {:?}",
                    assertion_id,
                    assertion.disease
                );
                return Ok(());
            }
        };

        let document = match assertion
            .source_id
            .and_then(|source_id| self.cache.documents.get(&format!("moa.source:{}", source_id)))
        {
            Some(document) => document.clone(),
            None => {
                tracing::warn!(
                    "{} references unknown source {:?}",
                    assertion_id,
                    assertion.source_id
                );
                return Ok(());
            }
        };

        let allele_origin = match assertion.variant.feature_type.as_deref() {
            Some("somatic_variant") => Some(MappableConcept {
                name: Some("somatic".to_string()),
                ..Default::default()
            }),
            Some("germline_variant") => Some(MappableConcept {
                name: Some("germline".to_string()),
                ..Default::default()
            }),
            _ => None,
        };
        let gene_context = variation_record.gene.clone();
        let subject_variant = variation_record.categorical_variant.clone();

        let (proposition, direction) = if !flag_is_set(&assertion.favorable_prognosis) {
            let Some(therapeutic) = self.therapy_or_group(assertion) else {
                tracing::debug!(
                    "{} has no therapy for {:?}",
                    assertion_id,
                    assertion.therapy.name
                );
                return Ok(());
            };

            let (predicate, direction) = if flag_is_set(&assertion.therapy.resistance) {
                (
                    TherapeuticResponsePredicate::PredictsResistanceTo,
                    if flag_is_truthy(&assertion.therapy.resistance) {
                        Direction::Supports
                    } else {
                        Direction::Disputes
                    },
                )
            } else {
                (
                    TherapeuticResponsePredicate::PredictsSensitivityTo,
                    if flag_is_truthy(&assertion.therapy.sensitivity) {
                        Direction::Supports
                    } else {
                        Direction::Disputes
                    },
                )
            };

            (
                Proposition::VariantTherapeuticResponseProposition {
                    predicate,
                    subject_variant,
                    object_therapeutic: therapeutic,
                    condition_qualifier: condition,
                    allele_origin_qualifier: allele_origin,
                    gene_context_qualifier: gene_context,
                },
                direction,
            )
        } else {
            let (predicate, direction) = if flag_is_truthy(&assertion.favorable_prognosis) {
                (
                    PrognosticPredicate::AssociatedWithBetterOutcomeFor,
                    Direction::Supports,
                )
            } else {
                (
                    PrognosticPredicate::AssociatedWithWorseOutcomeFor,
                    Direction::Disputes,
                )
            };
            (
                Proposition::VariantPrognosticProposition {
                    predicate,
                    subject_variant,
                    object_condition: condition,
                    allele_origin_qualifier: allele_origin,
                    gene_context_qualifier: gene_context,
                },
                direction,
            )
        };

        let statement = Statement {
            id: assertion_id.clone(),
            type_: StatementType::Statement,
            description: assertion
                .description
                .clone()
                .filter(|description| !description.is_empty()),
            direction: Some(direction),
            strength: Some(strength),
            classification: None,
            proposition,
            specified_by: self.data.methods[0].clone(),
            reported_in: Some(vec![document]),
            has_evidence_lines: None,
            extensions: None,
        };

        self.cache.evidence.insert(assertion_id, statement.clone());
        self.data.statements_evidence.push(statement);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cdm::vrs::{SequenceExpression, SequenceLocation, SequenceReference};
    use crate::common::digest::digest_for_key_set;
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
                "BRAF",
                concept_response(ConceptKind::Gene, "hgnc:1097", "BRAF", &["ncbigene:673"]),
            )
            .with(
                "BCOR",
                concept_response(ConceptKind::Gene, "hgnc:20893", "BCOR", &["ncbigene:54880"]),
            );
        let diseases = StubConceptNormalizer::new()
            .with(
                "oncotree:COADREAD",
                concept_response(
                    ConceptKind::Disease,
                    "ncit:C5105",
                    "Colorectal Adenocarcinoma",
                    &["DOID:0050913", "mondo:0005008"],
                ),
            )
            .with(
                "oncotree:MDS",
                concept_response(
                    ConceptKind::Disease,
                    "ncit:C3247",
                    "Myelodysplastic Syndrome",
                    &["DOID:0050908", "mondo:0018881"],
                ),
            );
        let therapies = StubConceptNormalizer::new()
            .with(
                "Cetuximab",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:318341",
                    "Cetuximab",
                    &["ncit:C1723"],
                ),
            )
            .with(
                "Encorafenib",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:2049106",
                    "Encorafenib",
                    &["ncit:C98283"],
                ),
            )
            .with(
                "LOXO-292",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:2370147",
                    "selpercatinib",
                    &["ncit:C134987"],
                ),
            )
            .with(
                "Selpercatinib",
                concept_response(
                    ConceptKind::Therapy,
                    "rxcui:2370147",
                    "selpercatinib",
                    &["ncit:C134987"],
                ),
            );
        let variations = StubVariationNormalizer::new()
            .with(
                "BRAF V600E",
                allele("SQ.cQvw4UsHHRRlogxbWCB8W-mKD4AraM9y", 599, 600, "E"),
            )
            .with(
                "7-140453136-A-T",
                allele("SQ.F-LrLMe1SRpfUZHkQmvkVKFEGaoDeHul", 140453135, 140453136, "T"),
            )
            .with(
                "BCOR N1425S",
                allele("SQ.w0WZEvgJF0zf_P4yyTzjjv9oW1z61HHP", 1424, 1425, "S"),
            );
        ViccNormalizers::new(
            Box::new(genes),
            Box::new(diseases),
            Box::new(therapies),
            Box::new(variations),
        )
    }

    fn test_harvest() -> MoaHarvest {
        let raw = include_str!("../../tests/data/moa_harvester.json");
        serde_json::from_str(raw).expect("fixture parses")
    }

    async fn transformed() -> CdmDocument {
        let normalizers = test_normalizers();
        let mut transformer = MoaTransformer::new(&normalizers, TransformOptions::default());
        transformer
            .transform(&test_harvest())
            .await
            .expect("transform succeeds");
        transformer.finish()
    }

    #[tokio::test]
    async fn assertion_154_combination_therapy() {
        let cdm = transformed().await;

        let statement = cdm
            .statements_evidence
            .iter()
            .find(|s| s.id == "moa.assertion:154")
            .expect("assertion 154 is admitted");
        assert_eq!(statement.direction, Some(Direction::Supports));

        let strength = statement.strength.as_ref().unwrap();
        assert_eq!(
            strength.primary_coding.as_ref().unwrap().code,
            "FDA-Approved"
        );
        assert_eq!(
            strength.mappings.as_ref().unwrap()[0].coding.code,
            "e000002"
        );

        let Proposition::VariantTherapeuticResponseProposition {
            predicate,
            object_therapeutic,
            condition_qualifier,
            gene_context_qualifier,
            allele_origin_qualifier,
            ..
        } = &statement.proposition
        else {
            panic!("expected therapeutic response proposition");
        };
        assert_eq!(
            *predicate,
            TherapeuticResponsePredicate::PredictsSensitivityTo
        );
        assert_eq!(
            allele_origin_qualifier.as_ref().unwrap().name.as_deref(),
            Some("somatic")
        );
        assert_eq!(
            gene_context_qualifier.as_ref().unwrap().id.as_deref(),
            Some("moa.normalize.gene.hgnc:1097")
        );
        assert_eq!(
            condition_qualifier.id.as_deref(),
            Some("moa.normalize.disease.ncit:C5105")
        );
        // OncoTree coding is seeded ahead of the normalizer mappings.
        assert_eq!(
            condition_qualifier.mappings.as_ref().unwrap()[0]
                .coding
                .id
                .as_deref(),
            Some("oncotree:COADREAD")
        );

        let Therapeutic::Group(group) = object_therapeutic else {
            panic!("expected therapy group");
        };
        assert!(group.id.starts_with("moa.ctid:"));
        assert_eq!(group.membership_operator, MembershipOperator::And);
        let expected_digest = digest_for_key_set(&[
            "moa.normalize.therapy.rxcui:318341".to_string(),
            "moa.normalize.therapy.rxcui:2049106".to_string(),
        ])
        .unwrap();
        assert_eq!(group.id, format!("moa.ctid:{}", expected_digest));
        assert_eq!(
            group
                .extensions
                .iter()
                .flatten()
                .find(|ext| ext.name == "moa_therapy_type")
                .unwrap()
                .value,
            serde_json::json!("Targeted therapy")
        );

        let document = &statement.reported_in.as_ref().unwrap()[0];
        assert_eq!(document.id.as_deref(), Some("moa.source:64"));
        assert!(document
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.name == "source_type" && ext.value == serde_json::json!("FDA")));
    }

    #[tokio::test]
    async fn therapy_labels_reconcile_to_one_concept() {
        let cdm = transformed().await;

        let selpercatinib = cdm
            .therapies
            .iter()
            .filter(|t| t.id() == Some("moa.normalize.therapy.rxcui:2370147"))
            .collect::<Vec<_>>();
        assert_eq!(selpercatinib.len(), 1);

        let Therapeutic::Therapy(concept) = selpercatinib[0] else {
            panic!("expected single therapy");
        };
        assert_eq!(concept.name.as_deref(), Some("LOXO-292"));
        let aliases = concept
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.name == EXT_ALIASES)
            .expect("aliases extension present");
        assert_eq!(aliases.value, serde_json::json!(["Selpercatinib"]));

        // Both statements reference the same reconciled concept.
        for id in ["moa.assertion:1001", "moa.assertion:1002"] {
            let statement = cdm
                .statements_evidence
                .iter()
                .find(|s| s.id == id)
                .expect("statement admitted");
            assert_eq!(
                statement.proposition.therapeutic().unwrap().id(),
                Some("moa.normalize.therapy.rxcui:2370147")
            );
        }
    }

    #[tokio::test]
    async fn disease_names_reconcile_to_one_concept() {
        let cdm = transformed().await;

        let mds = cdm
            .conditions
            .iter()
            .filter(|c| c.id.as_deref() == Some("moa.normalize.disease.ncit:C3247"))
            .collect::<Vec<_>>();
        assert_eq!(mds.len(), 1);
        assert_eq!(mds[0].name.as_deref(), Some("Myelodysplasia"));
        let aliases = mds[0]
            .extensions
            .iter()
            .flatten()
            .find(|ext| ext.name == EXT_ALIASES)
            .expect("aliases extension present");
        assert_eq!(aliases.value, serde_json::json!(["Myelodysplastic Syndromes"]));
    }

    #[tokio::test]
    async fn prognostic_assertion_direction_and_strength() {
        let cdm = transformed().await;

        let statement = cdm
            .statements_evidence
            .iter()
            .find(|s| s.id == "moa.assertion:141")
            .expect("assertion 141 is admitted");
        assert_eq!(statement.direction, Some(Direction::Disputes));
        let strength = statement.strength.as_ref().unwrap();
        assert_eq!(
            strength.primary_coding.as_ref().unwrap().code,
            "Clinical evidence"
        );
        assert_eq!(
            strength.mappings.as_ref().unwrap()[0].coding.code,
            "e000007"
        );

        let Proposition::VariantPrognosticProposition { predicate, .. } = &statement.proposition
        else {
            panic!("expected prognostic proposition");
        };
        assert_eq!(
            *predicate,
            PrognosticPredicate::AssociatedWithWorseOutcomeFor
        );
    }

    #[tokio::test]
    async fn gene_fusions_are_not_transformed() {
        let cdm = transformed().await;
        assert!(!cdm
            .categorical_variants
            .iter()
            .any(|cv| cv.id == "moa.variant:21"));
        assert!(!cdm
            .statements_evidence
            .iter()
            .any(|s| s.id == "moa.assertion:21"));
    }

    #[tokio::test]
    async fn rearrangements_keep_failure_marker_and_locus() {
        let cdm = transformed().await;
        let cv = cdm
            .categorical_variants
            .iter()
            .find(|cv| cv.id == "moa.variant:532")
            .expect("rearrangement variant is emitted");
        assert!(cv.constraints.is_none());
        assert!(!cv.is_admissible());
        assert!(cv
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.name == "MOA locus" && ext.value == serde_json::json!("t(6;14)")));
    }

    #[tokio::test]
    async fn hormone_combinations_are_skipped() {
        let cdm = transformed().await;
        assert!(!cdm
            .statements_evidence
            .iter()
            .any(|s| s.id == "moa.assertion:900"));
        // The member labels of unsupported combinations are never normalized
        // into concepts either.
        assert!(!cdm.therapies.iter().any(|t| {
            t.id()
                .map(|id| id.contains("Tamoxifen") || id.contains("Goserelin"))
                .unwrap_or(false)
        }));
    }

    #[tokio::test]
    async fn variant_144_members_and_mappings() {
        let cdm = transformed().await;
        let cv = cdm
            .categorical_variants
            .iter()
            .find(|cv| cv.id == "moa.variant:144")
            .unwrap();

        assert!(cv.is_admissible());
        let members = cv.members.as_ref().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].name.as_deref(), Some("7-140453136-A-T"));

        assert!(cv
            .mappings
            .iter()
            .flatten()
            .any(|m| m.coding.code == "rs113488022" && m.coding.system == systems::DBSNP));
        assert!(cv
            .extensions
            .iter()
            .flatten()
            .any(|ext| ext.name == "MOA representative coordinate"
                && ext.value["protein_change"] == serde_json::json!("p.V600E")));
    }

    #[rstest::rstest]
    #[case(serde_json::json!(""), false, false)]
    #[case(serde_json::json!(0), true, false)]
    #[case(serde_json::json!(1), true, true)]
    #[case(serde_json::Value::Null, false, false)]
    fn tri_state_flags(
        #[case] value: serde_json::Value,
        #[case] is_set: bool,
        #[case] truthy: bool,
    ) {
        assert_eq!(is_set, flag_is_set(&value));
        assert_eq!(truthy, flag_is_truthy(&value));
    }

    #[test]
    fn disease_identity_digest_prefers_oncotree_code() -> Result<(), anyhow::Error> {
        let with_code = MoaAssertionDisease {
            name: Some("Colorectal Adenocarcinoma".to_string()),
            oncotree_code: Some("COADREAD".to_string()),
            oncotree_term: Some("Colorectal Adenocarcinoma".to_string()),
        };
        let digest = with_code.identity_digest()?.expect("digest expected");
        assert_eq!(
            digest,
            digest_for_keys(&["oncotree_code:COADREAD".to_string()])?
        );

        let incomplete = MoaAssertionDisease {
            name: Some("Colorectal Adenocarcinoma".to_string()),
            oncotree_code: None,
            oncotree_term: Some("Colorectal Adenocarcinoma".to_string()),
        };
        assert_eq!(incomplete.identity_digest()?, None);

        Ok(())
    }
}
