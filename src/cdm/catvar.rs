//! Categorical variants: named variant concepts pinned by a defining allele.

use crate::cdm::core::{has_normalizer_failure, ConceptMapping, Extension};
use crate::cdm::vrs::Allele;

fn type_defining_allele_constraint() -> String {
    "DefiningAlleleConstraint".to_string()
}

/// Constraint pinning a categorical variant to a single defining allele.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DefiningAlleleConstraint {
    /// MUST be "DefiningAlleleConstraint".
    #[serde(rename = "type", default = "type_defining_allele_constraint")]
    pub type_: String,
    /// The defining allele.
    pub allele: Allele,
}

impl DefiningAlleleConstraint {
    pub fn new(allele: Allele) -> Self {
        Self {
            type_: type_defining_allele_constraint(),
            allele,
        }
    }
}

fn type_categorical_variant() -> String {
    "CategoricalVariant".to_string()
}

/// A named variant concept with an optional defining-allele constraint and
/// equivalent member alleles.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CategoricalVariant {
    /// Identifier of the categorical variant (e.g. `civic.mpid:33`).
    pub id: String,
    /// MUST be "CategoricalVariant".
    #[serde(rename = "type", default = "type_categorical_variant")]
    pub type_: String,
    /// Display name.
    pub name: String,
    /// Longer description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Alternative names.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
    /// Cross-reference mappings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<ConceptMapping>>,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
    /// At most one defining-allele constraint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<Vec<DefiningAlleleConstraint>>,
    /// Equivalent member alleles (other representations of the variant).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<Allele>>,
}

impl CategoricalVariant {
    /// The defining allele, if a constraint is present.
    pub fn defining_allele(&self) -> Option<&Allele> {
        self.constraints
            .as_ref()
            .and_then(|cs| cs.first())
            .map(|c| &c.allele)
    }

    /// Whether the variant can anchor a loadable statement: it must carry a
    /// defining-allele constraint and no normalizer failure marker.
    pub fn is_admissible(&self) -> bool {
        self.defining_allele().is_some() && !has_normalizer_failure(&self.extensions)
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::cdm::vrs::{SequenceExpression, SequenceLocation, SequenceReference};

    fn example_variant(with_constraint: bool) -> CategoricalVariant {
        let constraints = with_constraint.then(|| {
            vec![DefiningAlleleConstraint::new(Allele::new(
                SequenceLocation::new(
                    SequenceReference::new("SQ.vyo55F6mA6n2LgN4cagcdRzOuh38V4mE"),
                    857,
                    858,
                    None,
                ),
                SequenceExpression::LiteralSequenceExpression {
                    sequence: "R".to_string(),
                },
            ))]
        });
        CategoricalVariant {
            id: "civic.mpid:33".to_string(),
            type_: "CategoricalVariant".to_string(),
            name: "EGFR L858R".to_string(),
            description: None,
            aliases: None,
            mappings: None,
            extensions: None,
            constraints,
            members: None,
        }
    }

    #[test]
    fn defining_allele_accessor() {
        assert!(example_variant(true).defining_allele().is_some());
        assert!(example_variant(false).defining_allele().is_none());
    }

    #[test]
    fn admissibility_requires_constraint() {
        assert!(example_variant(true).is_admissible());
        assert!(!example_variant(false).is_admissible());
    }

    #[test]
    fn admissibility_rejects_failure_marker() {
        let mut cv = example_variant(true);
        cv.extensions = Some(vec![Extension::normalizer_failure()]);
        assert!(!cv.is_admissible());
    }

    #[test]
    fn roundtrip() {
        let cv = example_variant(true);
        let json = serde_json::to_string(&cv).unwrap();
        let back: CategoricalVariant = serde_json::from_str(&json).unwrap();
        assert_eq!(cv, back);
    }
}
