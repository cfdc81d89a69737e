//! REST clients for the VICC normalizer services.

use crate::cdm::vrs::Allele;
use crate::normalize::{
    ConceptKind, NormalizationResponse, NormalizeError, NormalizedConcept, VariationNormalizer,
};

/// Default endpoint for the public VICC normalizer deployment.
pub const DEFAULT_NORMALIZER_URL: &str = "https://normalize.cancervariants.org";

/// Endpoint configuration for the four normalizer services.
#[derive(Debug, Clone)]
pub struct NormalizerEndpoints {
    pub gene: String,
    pub disease: String,
    pub therapy: String,
    pub variation: String,
}

impl Default for NormalizerEndpoints {
    fn default() -> Self {
        Self {
            gene: DEFAULT_NORMALIZER_URL.to_string(),
            disease: DEFAULT_NORMALIZER_URL.to_string(),
            therapy: DEFAULT_NORMALIZER_URL.to_string(),
            variation: DEFAULT_NORMALIZER_URL.to_string(),
        }
    }
}

impl NormalizerEndpoints {
    /// Endpoints from environment variables, falling back to the defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            gene: std::env::var("GENE_NORM_DB_URL").unwrap_or(defaults.gene),
            disease: std::env::var("DISEASE_NORM_DB_URL").unwrap_or(defaults.disease),
            therapy: std::env::var("THERAPY_NORM_DB_URL").unwrap_or(defaults.therapy),
            variation: std::env::var("VARIATION_NORM_DB_URL").unwrap_or(defaults.variation),
        }
    }
}

fn endpoint(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

/// Map an HTTP error to the normalizer error taxonomy: authentication and
/// authorization failures are fatal, everything else is a service failure.
fn classify_status(
    status: reqwest::StatusCode,
    url: &str,
    body_excerpt: &str,
) -> NormalizeError {
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        NormalizeError::Credentials(format!("HTTP {} from {}", status, url))
    } else {
        NormalizeError::Service(format!("HTTP {} from {}: {}", status, url, body_excerpt))
    }
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    query: &str,
) -> Result<T, NormalizeError> {
    let response = client
        .get(url)
        .query(&[("q", query)])
        .send()
        .await
        .map_err(|e| NormalizeError::Service(format!("request to {} failed: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let excerpt = body.chars().take(200).collect::<String>();
        return Err(classify_status(status, url, &excerpt));
    }

    response
        .json()
        .await
        .map_err(|e| NormalizeError::Service(format!("invalid JSON from {}: {}", url, e)))
}

/// Raw response shape shared by the gene, disease, and therapy services; the
/// concept is keyed by its kind.
#[derive(Debug, serde::Deserialize)]
struct RawConceptResponse {
    #[serde(default)]
    match_type: u32,
    #[serde(default)]
    gene: Option<NormalizedConcept>,
    #[serde(default)]
    disease: Option<NormalizedConcept>,
    #[serde(default)]
    therapy: Option<NormalizedConcept>,
}

/// REST client for a gene, disease, or therapy normalizer.
pub struct RestConceptNormalizer {
    client: reqwest::Client,
    kind: ConceptKind,
    url: String,
}

impl RestConceptNormalizer {
    pub fn new(client: reqwest::Client, kind: ConceptKind, base: &str) -> Self {
        let url = endpoint(base, &format!("{}/normalize", kind));
        Self { client, kind, url }
    }
}

#[async_trait::async_trait]
impl crate::normalize::ConceptNormalizer for RestConceptNormalizer {
    async fn normalize(&self, query: &str) -> Result<NormalizationResponse, NormalizeError> {
        let raw: RawConceptResponse = get_json(&self.client, &self.url, query).await?;
        let concept = match self.kind {
            ConceptKind::Gene => raw.gene,
            ConceptKind::Disease => raw.disease,
            ConceptKind::Therapy => raw.therapy,
        };
        Ok(NormalizationResponse {
            match_type: raw.match_type,
            concept,
        })
    }
}

/// Raw response shape of the variation normalizer.
#[derive(Debug, serde::Deserialize)]
struct RawVariationResponse {
    #[serde(default)]
    variation: Option<serde_json::Value>,
}

/// REST client for the variation normalizer.
pub struct RestVariationNormalizer {
    client: reqwest::Client,
    url: String,
}

impl RestVariationNormalizer {
    pub fn new(client: reqwest::Client, base: &str) -> Self {
        let url = endpoint(base, "variation/normalize");
        Self { client, url }
    }
}

#[async_trait::async_trait]
impl VariationNormalizer for RestVariationNormalizer {
    async fn normalize(&self, query: &str) -> Result<Option<Allele>, NormalizeError> {
        let raw: RawVariationResponse = get_json(&self.client, &self.url, query).await?;
        let Some(variation) = raw.variation else {
            return Ok(None);
        };

        // Copy-number responses are not representable as alleles; treat
        // them as unsupported.
        match variation.get("type").and_then(|t| t.as_str()) {
            Some("Allele") => {
                let allele: Allele = serde_json::from_value(variation).map_err(|e| {
                    NormalizeError::Service(format!("invalid allele for query {}: {}", query, e))
                })?;
                Ok(Some(allele))
            }
            other => {
                tracing::debug!(
                    "variation normalizer returned unsupported type {:?} for query {}",
                    other,
                    query
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    #[test]
    fn endpoint_joins_cleanly() {
        assert_eq!(
            super::endpoint("https://normalize.cancervariants.org/", "/gene/normalize"),
            "https://normalize.cancervariants.org/gene/normalize"
        );
    }

    #[rstest::rstest]
    #[case(reqwest::StatusCode::UNAUTHORIZED, true)]
    #[case(reqwest::StatusCode::FORBIDDEN, true)]
    #[case(reqwest::StatusCode::INTERNAL_SERVER_ERROR, false)]
    #[case(reqwest::StatusCode::NOT_FOUND, false)]
    fn status_classification(#[case] status: reqwest::StatusCode, #[case] fatal: bool) {
        let err = super::classify_status(status, "http://localhost", "");
        assert_eq!(
            fatal,
            matches!(err, crate::normalize::NormalizeError::Credentials(_))
        );
    }

    #[test]
    fn raw_concept_response_parses_by_kind() {
        let raw: super::RawConceptResponse = serde_json::from_value(serde_json::json!({
            "match_type": 100,
            "therapy": {
                "id": "normalize.therapy.rxcui:318341",
                "name": "Cetuximab",
                "mappings": [],
            },
        }))
        .unwrap();
        assert_eq!(raw.match_type, 100);
        assert!(raw.therapy.is_some());
        assert!(raw.gene.is_none());
    }
}
