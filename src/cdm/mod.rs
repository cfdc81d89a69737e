//! The normalized Common Data Model (CDM) emitted by the transformers and
//! consumed by the graph loader.

use std::collections::HashMap;

pub mod catvar;
pub mod core;
pub mod statement;
pub mod vrs;

use self::catvar::CategoricalVariant;
use self::core::MappableConcept;
use self::statement::{Document, EvidenceItem, Method, Statement, Therapeutic};
use self::vrs::Allele;

/// The CDM JSON artifact: one document per source and transform run.
///
/// Arrays keep insertion order (first-encounter order during the transform,
/// emission order for statements).
#[derive(Debug, Clone, PartialEq, Default, serde::Serialize, serde::Deserialize)]
pub struct CdmDocument {
    #[serde(default)]
    pub categorical_variants: Vec<CategoricalVariant>,
    #[serde(default)]
    pub variations: Vec<Allele>,
    #[serde(default)]
    pub genes: Vec<MappableConcept>,
    #[serde(default)]
    pub conditions: Vec<MappableConcept>,
    #[serde(default)]
    pub therapies: Vec<Therapeutic>,
    #[serde(default)]
    pub documents: Vec<Document>,
    #[serde(default)]
    pub methods: Vec<Method>,
    #[serde(default)]
    pub statements_evidence: Vec<Statement>,
    #[serde(default)]
    pub statements_assertions: Vec<Statement>,
}

impl CdmDocument {
    /// Replace evidence-item ID references in assertion evidence lines with
    /// the full evidence statements emitted in this document.
    ///
    /// References to statements not present in `statements_evidence` are
    /// dropped from the line.  Called once before serialization so that the
    /// artifact is self-contained.
    pub fn embed_evidence_items(&mut self) {
        let by_id: HashMap<String, Statement> = self
            .statements_evidence
            .iter()
            .map(|statement| (statement.id.clone(), statement.clone()))
            .collect();

        for assertion in &mut self.statements_assertions {
            let Some(lines) = assertion.has_evidence_lines.as_mut() else {
                continue;
            };
            for line in lines.iter_mut() {
                line.has_evidence_items = line
                    .has_evidence_items
                    .drain(..)
                    .filter_map(|item| match item {
                        EvidenceItem::Ref(id) => match by_id.get(&id) {
                            Some(statement) => {
                                Some(EvidenceItem::Statement(Box::new(statement.clone())))
                            }
                            None => {
                                tracing::debug!(
                                    "dropping unresolved evidence item reference: {}",
                                    id
                                );
                                None
                            }
                        },
                        embedded @ EvidenceItem::Statement(_) => Some(embedded),
                    })
                    .collect();
            }
        }
    }

    /// Count of all statements in the document.
    pub fn statement_count(&self) -> usize {
        self.statements_evidence.len() + self.statements_assertions.len()
    }
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::statement::{
        Direction, EvidenceItem, EvidenceLine, Method, Proposition, Statement, StatementType,
        Therapeutic, TherapeuticResponsePredicate,
    };
    use super::*;
    use crate::cdm::core::ConceptType;

    fn minimal_statement(id: &str, type_: StatementType) -> Statement {
        Statement {
            id: id.to_string(),
            type_,
            description: None,
            direction: Some(Direction::Supports),
            strength: None,
            classification: None,
            proposition: Proposition::VariantTherapeuticResponseProposition {
                predicate: TherapeuticResponsePredicate::PredictsSensitivityTo,
                subject_variant: CategoricalVariant {
                    id: "civic.mpid:33".to_string(),
                    type_: "CategoricalVariant".to_string(),
                    name: "EGFR L858R".to_string(),
                    description: None,
                    aliases: None,
                    mappings: None,
                    extensions: None,
                    constraints: None,
                    members: None,
                },
                object_therapeutic: Therapeutic::Therapy(MappableConcept {
                    id: Some("civic.tid:146".to_string()),
                    concept_type: Some(ConceptType::Therapy),
                    name: Some("Afatinib".to_string()),
                    ..Default::default()
                }),
                condition_qualifier: MappableConcept {
                    id: Some("civic.did:8".to_string()),
                    concept_type: Some(ConceptType::Disease),
                    name: Some("Lung Non-small Cell Carcinoma".to_string()),
                    ..Default::default()
                },
                allele_origin_qualifier: None,
                gene_context_qualifier: None,
            },
            specified_by: Method {
                id: "civic.method:2019".to_string(),
                type_: "Method".to_string(),
                name: "CIViC Curation SOP (2019)".to_string(),
                method_type: None,
                reported_in: None,
            },
            reported_in: None,
            has_evidence_lines: None,
            extensions: None,
        }
    }

    fn document_with_assertion() -> CdmDocument {
        let evidence = minimal_statement("civic.eid:2997", StatementType::Statement);
        let mut assertion = minimal_statement("civic.aid:6", StatementType::StudyStatement);
        assertion.has_evidence_lines = Some(vec![EvidenceLine {
            id: None,
            direction_of_evidence_provided: Direction::Supports,
            has_evidence_items: vec![
                EvidenceItem::Ref("civic.eid:2997".to_string()),
                EvidenceItem::Ref("civic.eid:404".to_string()),
            ],
        }]);
        CdmDocument {
            statements_evidence: vec![evidence],
            statements_assertions: vec![assertion],
            ..Default::default()
        }
    }

    #[test]
    fn embed_evidence_items_resolves_and_prunes() {
        let mut doc = document_with_assertion();
        doc.embed_evidence_items();

        let lines = doc.statements_assertions[0]
            .has_evidence_lines
            .as_ref()
            .unwrap();
        assert_eq!(lines[0].has_evidence_items.len(), 1);
        match &lines[0].has_evidence_items[0] {
            EvidenceItem::Statement(statement) => assert_eq!(statement.id, "civic.eid:2997"),
            EvidenceItem::Ref(_) => panic!("evidence item should be embedded"),
        }
    }

    #[test]
    fn roundtrip_after_embedding() {
        let mut doc = document_with_assertion();
        doc.embed_evidence_items();

        let json = serde_json::to_string(&doc).unwrap();
        let back: CdmDocument = serde_json::from_str(&json).unwrap();
        assert_eq!(doc, back);
    }

    #[test]
    fn statement_count() {
        let doc = document_with_assertion();
        assert_eq!(doc.statement_count(), 2);
    }
}
