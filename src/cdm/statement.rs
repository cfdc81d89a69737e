//! Statements, propositions, and their supporting entities.

use crate::cdm::catvar::CategoricalVariant;
use crate::cdm::core::{has_normalizer_failure, ConceptMapping, Extension, MappableConcept};

/// Direction of a statement with respect to its proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Supports,
    Disputes,
    None,
}

/// Predicate of a therapeutic-response proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TherapeuticResponsePredicate {
    #[serde(rename = "predictsSensitivityTo")]
    PredictsSensitivityTo,
    #[serde(rename = "predictsResistanceTo")]
    PredictsResistanceTo,
}

/// Predicate of a prognostic proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PrognosticPredicate {
    #[serde(rename = "associatedWithBetterOutcomeFor")]
    AssociatedWithBetterOutcomeFor,
    #[serde(rename = "associatedWithWorseOutcomeFor")]
    AssociatedWithWorseOutcomeFor,
}

/// Predicate of a diagnostic proposition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum DiagnosticPredicate {
    #[serde(rename = "isDiagnosticInclusionCriterionFor")]
    IsDiagnosticInclusionCriterionFor,
    #[serde(rename = "isDiagnosticExclusionCriterionFor")]
    IsDiagnosticExclusionCriterionFor,
}

/// Membership semantics of a therapy group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MembershipOperator {
    /// Combination therapy: all members together.
    #[serde(rename = "AND")]
    And,
    /// Substitute set: any one member.
    #[serde(rename = "OR")]
    Or,
}

/// A combination (AND) or substitute (OR) set of therapies treated as a
/// single therapeutic object.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TherapyGroup {
    /// Group identifier (`<source>.<ctid|tsgid>:<digest>`).
    pub id: String,
    /// Combination vs substitute semantics.
    #[serde(rename = "membershipOperator")]
    pub membership_operator: MembershipOperator,
    /// The member therapies.
    pub therapies: Vec<MappableConcept>,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}

impl TherapyGroup {
    /// Construct a therapy group, enforcing the two-member minimum.
    pub fn new(
        id: String,
        membership_operator: MembershipOperator,
        therapies: Vec<MappableConcept>,
        extensions: Option<Vec<Extension>>,
    ) -> Result<Self, anyhow::Error> {
        if therapies.len() < 2 {
            anyhow::bail!(
                "therapy group {} must have at least two members, got {}",
                id,
                therapies.len()
            );
        }
        Ok(Self {
            id,
            membership_operator,
            therapies,
            extensions,
        })
    }
}

/// The object of a therapeutic-response proposition: a single therapy or a
/// therapy group.
///
/// Serialized untagged; groups are distinguished by their
/// `membershipOperator` field.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Therapeutic {
    Group(TherapyGroup),
    Therapy(MappableConcept),
}

impl Therapeutic {
    /// Identifier of the therapy or group.
    pub fn id(&self) -> Option<&str> {
        match self {
            Therapeutic::Group(group) => Some(group.id.as_str()),
            Therapeutic::Therapy(therapy) => therapy.id.as_deref(),
        }
    }

    /// Whether the therapeutic failed normalization; a group fails when any
    /// of its members failed.
    pub fn failed_to_normalize(&self) -> bool {
        match self {
            Therapeutic::Group(group) => {
                has_normalizer_failure(&group.extensions)
                    || group.therapies.iter().any(|t| t.failed_to_normalize())
            }
            Therapeutic::Therapy(therapy) => therapy.failed_to_normalize(),
        }
    }
}

/// The claim portion of a statement.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum Proposition {
    VariantTherapeuticResponseProposition {
        predicate: TherapeuticResponsePredicate,
        #[serde(rename = "subjectVariant")]
        subject_variant: CategoricalVariant,
        #[serde(rename = "objectTherapeutic")]
        object_therapeutic: Therapeutic,
        #[serde(rename = "conditionQualifier")]
        condition_qualifier: MappableConcept,
        #[serde(
            rename = "alleleOriginQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        allele_origin_qualifier: Option<MappableConcept>,
        #[serde(
            rename = "geneContextQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        gene_context_qualifier: Option<MappableConcept>,
    },
    VariantPrognosticProposition {
        predicate: PrognosticPredicate,
        #[serde(rename = "subjectVariant")]
        subject_variant: CategoricalVariant,
        #[serde(rename = "objectCondition")]
        object_condition: MappableConcept,
        #[serde(
            rename = "alleleOriginQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        allele_origin_qualifier: Option<MappableConcept>,
        #[serde(
            rename = "geneContextQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        gene_context_qualifier: Option<MappableConcept>,
    },
    VariantDiagnosticProposition {
        predicate: DiagnosticPredicate,
        #[serde(rename = "subjectVariant")]
        subject_variant: CategoricalVariant,
        #[serde(rename = "objectCondition")]
        object_condition: MappableConcept,
        #[serde(
            rename = "alleleOriginQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        allele_origin_qualifier: Option<MappableConcept>,
        #[serde(
            rename = "geneContextQualifier",
            skip_serializing_if = "Option::is_none"
        )]
        gene_context_qualifier: Option<MappableConcept>,
    },
}

impl Proposition {
    /// The subject categorical variant.
    pub fn subject_variant(&self) -> &CategoricalVariant {
        match self {
            Proposition::VariantTherapeuticResponseProposition {
                subject_variant, ..
            }
            | Proposition::VariantPrognosticProposition {
                subject_variant, ..
            }
            | Proposition::VariantDiagnosticProposition {
                subject_variant, ..
            } => subject_variant,
        }
    }

    /// The disease: condition qualifier (therapeutic) or object condition.
    pub fn condition(&self) -> &MappableConcept {
        match self {
            Proposition::VariantTherapeuticResponseProposition {
                condition_qualifier,
                ..
            } => condition_qualifier,
            Proposition::VariantPrognosticProposition {
                object_condition, ..
            }
            | Proposition::VariantDiagnosticProposition {
                object_condition, ..
            } => object_condition,
        }
    }

    /// The gene context qualifier, if any.
    pub fn gene_context(&self) -> Option<&MappableConcept> {
        match self {
            Proposition::VariantTherapeuticResponseProposition {
                gene_context_qualifier,
                ..
            }
            | Proposition::VariantPrognosticProposition {
                gene_context_qualifier,
                ..
            }
            | Proposition::VariantDiagnosticProposition {
                gene_context_qualifier,
                ..
            } => gene_context_qualifier.as_ref(),
        }
    }

    /// The object therapeutic for therapeutic-response propositions.
    pub fn therapeutic(&self) -> Option<&Therapeutic> {
        match self {
            Proposition::VariantTherapeuticResponseProposition {
                object_therapeutic, ..
            } => Some(object_therapeutic),
            _ => None,
        }
    }

}

fn type_document() -> String {
    "Document".to_string()
}

/// A document that reports evidence (article, label, guideline).
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct Document {
    /// Source-scoped identifier, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// MUST be "Document".
    #[serde(rename = "type", default = "type_document")]
    pub type_: String,
    /// Short name (e.g. citation).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Document title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// PubMed identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pmid: Option<i64>,
    /// Digital Object Identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    /// URLs at which the document can be retrieved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urls: Option<Vec<String>>,
    /// Cross-reference mappings.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mappings: Option<Vec<ConceptMapping>>,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}

fn type_method() -> String {
    "Method".to_string()
}

/// A curation or assertion method.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Method {
    /// Method identifier.
    pub id: String,
    /// MUST be "Method".
    #[serde(rename = "type", default = "type_method")]
    pub type_: String,
    /// Method name.
    pub name: String,
    /// Kind of method.
    #[serde(rename = "methodType", skip_serializing_if = "Option::is_none")]
    pub method_type: Option<String>,
    /// Document describing the method.
    #[serde(rename = "reportedIn", skip_serializing_if = "Option::is_none")]
    pub reported_in: Option<Document>,
}

/// An item of evidence within an evidence line: either a statement ID
/// reference (in-memory form) or an embedded statement (serialized form).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum EvidenceItem {
    Statement(Box<Statement>),
    Ref(String),
}

impl EvidenceItem {
    /// The referenced statement's identifier.
    pub fn statement_id(&self) -> &str {
        match self {
            EvidenceItem::Statement(statement) => statement.id.as_str(),
            EvidenceItem::Ref(id) => id.as_str(),
        }
    }
}

/// A line of evidence supporting or disputing a statement.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EvidenceLine {
    /// Per-run identifier, assigned at load time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Direction of the evidence provided by this line.
    #[serde(rename = "directionOfEvidenceProvided")]
    pub direction_of_evidence_provided: Direction,
    /// The evidence items in this line.
    #[serde(rename = "hasEvidenceItems")]
    pub has_evidence_items: Vec<EvidenceItem>,
}

/// Kind of a statement record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum StatementType {
    /// An evidence-level statement.
    Statement,
    /// An assertion-level statement.
    StudyStatement,
}

/// A proposition annotated with direction, strength, method, provenance,
/// and (for assertions) classification and evidence lines.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Statement {
    /// Statement identifier (e.g. `civic.eid:2997`).
    pub id: String,
    /// Evidence (`Statement`) or assertion (`StudyStatement`).
    #[serde(rename = "type")]
    pub type_: StatementType,
    /// Statement description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Direction with respect to the proposition.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
    /// Strength of the supporting evidence.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub strength: Option<MappableConcept>,
    /// Assertion classification (e.g. AMP/ASCO/CAP tier).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<MappableConcept>,
    /// The claim.
    pub proposition: Proposition,
    /// The method by which the statement was made.
    #[serde(rename = "specifiedBy")]
    pub specified_by: Method,
    /// Documents reporting the evidence (evidence statements only).
    #[serde(rename = "reportedIn", skip_serializing_if = "Option::is_none")]
    pub reported_in: Option<Vec<Document>>,
    /// Evidence lines (assertions only).
    #[serde(rename = "hasEvidenceLines", skip_serializing_if = "Option::is_none")]
    pub has_evidence_lines: Option<Vec<EvidenceLine>>,
    /// Free-form annotations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Vec<Extension>>,
}
