//! Core concept types shared by all CDM entities.

/// Extension name used to mark the normalizer's priority coding.
pub const EXT_NORMALIZER_PRIORITY: &str = "vicc_normalizer_priority";
/// Extension name used to mark concepts that failed to normalize.
pub const EXT_NORMALIZER_FAILURE: &str = "vicc_normalizer_failure";
/// Extension name for aggregated concept aliases.
pub const EXT_ALIASES: &str = "aliases";

/// A single code in a terminology system.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Coding {
    /// CURIE-style identifier of the coding, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The code within the system.
    pub code: String,
    /// The terminology system the code belongs to.
    pub system: String,
    /// Human-readable name of the coded concept.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Relation of a mapping to the mapped concept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Relation {
    /// The coding denotes the same concept.
    #[serde(rename = "exactMatch")]
    ExactMatch,
    /// The coding denotes a closely related concept.
    #[serde(rename = "relatedMatch")]
    RelatedMatch,
}

/// A free-form name/value annotation.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Extension {
    /// Name of the extension.
    pub name: String,
    /// Arbitrary JSON value.
    pub value: serde_json::Value,
}

impl Extension {
    /// Construct an extension from a name and any serializable value.
    pub fn new<T: serde::Serialize>(name: &str, value: T) -> Self {
        Self {
            name: name.to_string(),
            value: serde_json::to_value(value).expect("extension value must serialize"),
        }
    }

    /// The marker extension attached to concepts that failed to normalize.
    pub fn normalizer_failure() -> Self {
        Self::new(EXT_NORMALIZER_FAILURE, true)
    }

    /// The marker extension for normalizer mapping priority.
    pub fn normalizer_priority(is_priority: bool) -> Self {
        Self::new(EXT_NORMALIZER_PRIORITY, is_priority)
    }
}

/// A cross-reference from a concept to a coding.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ConceptMapping {
    /// The referenced coding.
    pub coding: Coding,
    /// How the coding relates to the concept.
    pub relation: Relation,
    /// Optional annotations on the mapping itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}

impl ConceptMapping {
    /// Construct a mapping without extensions.
    pub fn new(coding: Coding, relation: Relation) -> Self {
        Self {
            coding,
            relation,
            extensions: None,
        }
    }
}

/// The kind of a mappable biomedical concept.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
pub enum ConceptType {
    Gene,
    Disease,
    Therapy,
}

/// A biomedical concept with a primary name, cross-reference mappings, and
/// free-form extensions.
///
/// Also used for lightweight coded values (statement strength and
/// classification, allele-origin qualifiers), which carry a `primaryCoding`
/// or bare `name` but no identifier.
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct MappableConcept {
    /// Concept identifier (CURIE form).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Kind of the concept.
    #[serde(rename = "conceptType", skip_serializing_if = "Option::is_none")]
    pub concept_type: Option<ConceptType>,
    /// Primary name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Primary coding of the concept.
    #[serde(rename = "primaryCoding", skip_serializing_if = "Option::is_none")]
    pub primary_coding: Option<Coding>,
    /// Cross-reference mappings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<ConceptMapping>>,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}

impl MappableConcept {
    /// Whether the concept carries the normalizer failure marker.
    pub fn failed_to_normalize(&self) -> bool {
        has_normalizer_failure(&self.extensions)
    }
}

/// Whether an extension list carries the normalizer failure marker.
pub fn has_normalizer_failure(extensions: &Option<Vec<Extension>>) -> bool {
    extensions
        .iter()
        .flatten()
        .any(|ext| ext.name == EXT_NORMALIZER_FAILURE)
}

/// Return a non-empty extension list or `None`.
pub fn some_extensions(extensions: Vec<Extension>) -> Option<Vec<Extension>> {
    if extensions.is_empty() {
        None
    } else {
        Some(extensions)
    }
}

/// Return a non-empty mapping list or `None`.
pub fn some_mappings(mappings: Vec<ConceptMapping>) -> Option<Vec<ConceptMapping>> {
    if mappings.is_empty() {
        None
    } else {
        Some(mappings)
    }
}
