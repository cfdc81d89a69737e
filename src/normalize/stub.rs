//! Canned normalizers for tests: fixed query → response tables.

use std::collections::HashMap;

use crate::cdm::core::{ConceptMapping, Relation};
use crate::cdm::vrs::Allele;
use crate::normalize::{
    coding_for_curie, ConceptKind, ConceptNormalizer, NormalizationResponse, NormalizeError,
    NormalizedConcept, VariationNormalizer,
};

/// Build a successful concept response for a canonical CURIE plus extra
/// cross-reference codings.
pub(crate) fn concept_response(
    kind: ConceptKind,
    canonical_id: &str,
    name: &str,
    extra_curies: &[&str],
) -> NormalizationResponse {
    let mut mappings = vec![ConceptMapping::new(
        coding_for_curie(canonical_id),
        Relation::ExactMatch,
    )];
    mappings.extend(
        extra_curies
            .iter()
            .map(|curie| ConceptMapping::new(coding_for_curie(curie), Relation::ExactMatch)),
    );
    NormalizationResponse {
        match_type: 100,
        concept: Some(NormalizedConcept {
            id: format!("normalize.{}.{}", kind, canonical_id),
            name: Some(name.to_string()),
            mappings,
            extensions: None,
        }),
    }
}

/// Concept normalizer backed by a fixed query table; unknown queries do not
/// match.
#[derive(Default)]
pub(crate) struct StubConceptNormalizer {
    responses: HashMap<String, NormalizationResponse>,
}

impl StubConceptNormalizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, query: &str, response: NormalizationResponse) -> Self {
        self.responses.insert(query.to_string(), response);
        self
    }
}

#[async_trait::async_trait]
impl ConceptNormalizer for StubConceptNormalizer {
    async fn normalize(&self, query: &str) -> Result<NormalizationResponse, NormalizeError> {
        Ok(self
            .responses
            .get(query)
            .cloned()
            .unwrap_or_default())
    }
}

/// Variation normalizer backed by a fixed query table.
#[derive(Default)]
pub(crate) struct StubVariationNormalizer {
    alleles: HashMap<String, Allele>,
}

impl StubVariationNormalizer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with(mut self, query: &str, allele: Allele) -> Self {
        self.alleles.insert(query.to_string(), allele);
        self
    }
}

#[async_trait::async_trait]
impl VariationNormalizer for StubVariationNormalizer {
    async fn normalize(&self, query: &str) -> Result<Option<Allele>, NormalizeError> {
        Ok(self.alleles.get(query).cloned())
    }
}

/// Normalizer that always fails with expired credentials.
pub(crate) struct ExpiredCredentialsNormalizer;

#[async_trait::async_trait]
impl ConceptNormalizer for ExpiredCredentialsNormalizer {
    async fn normalize(&self, _query: &str) -> Result<NormalizationResponse, NormalizeError> {
        Err(NormalizeError::Credentials("token expired".to_string()))
    }
}
