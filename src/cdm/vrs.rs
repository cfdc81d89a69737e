//! VRS-style variation model with content-addressed identifiers.

use std::collections::BTreeMap;

use crate::common::digest::sha512t24u;

/// Syntax of an HGVS expression.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, strum::Display,
)]
pub enum Syntax {
    #[serde(rename = "hgvs.p")]
    #[strum(serialize = "hgvs.p")]
    HgvsP,
    #[serde(rename = "hgvs.c")]
    #[strum(serialize = "hgvs.c")]
    HgvsC,
    #[serde(rename = "hgvs.g")]
    #[strum(serialize = "hgvs.g")]
    HgvsG,
    #[serde(rename = "hgvs.n")]
    #[strum(serialize = "hgvs.n")]
    HgvsN,
    #[serde(rename = "hgvs.m")]
    #[strum(serialize = "hgvs.m")]
    HgvsM,
    #[serde(rename = "hgvs.r")]
    #[strum(serialize = "hgvs.r")]
    HgvsR,
}

impl Syntax {
    /// Sniff the syntax of an HGVS expression from its reference prefix.
    pub fn sniff(hgvs_expr: &str) -> Option<Syntax> {
        if hgvs_expr.contains(":p.") {
            Some(Syntax::HgvsP)
        } else if hgvs_expr.contains(":c.") {
            Some(Syntax::HgvsC)
        } else if hgvs_expr.contains(":g.") {
            Some(Syntax::HgvsG)
        } else if hgvs_expr.contains(":n.") {
            Some(Syntax::HgvsN)
        } else if hgvs_expr.contains(":m.") {
            Some(Syntax::HgvsM)
        } else if hgvs_expr.contains(":r.") {
            Some(Syntax::HgvsR)
        } else {
            None
        }
    }
}

/// An expression of a variation in a nomenclature.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Expression {
    /// The nomenclature syntax.
    pub syntax: Syntax,
    /// The expression value.
    pub value: String,
}

fn type_sequence_reference() -> String {
    "SequenceReference".to_string()
}

/// Reference to the underlying sequence by refget accession.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SequenceReference {
    /// MUST be "SequenceReference".
    #[serde(rename = "type", default = "type_sequence_reference")]
    pub type_: String,
    /// The `SQ.`-prefixed refget accession.
    #[serde(rename = "refgetAccession")]
    pub refget_accession: String,
}

impl SequenceReference {
    pub fn new(refget_accession: &str) -> Self {
        Self {
            type_: type_sequence_reference(),
            refget_accession: refget_accession.to_string(),
        }
    }
}

fn type_sequence_location() -> String {
    "SequenceLocation".to_string()
}

/// An interbase interval on a reference sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SequenceLocation {
    /// Content-addressed identifier (`ga4gh:SL.<digest>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// MUST be "SequenceLocation".
    #[serde(rename = "type", default = "type_sequence_location")]
    pub type_: String,
    /// Digest over the canonicalized location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// The reference sequence.
    #[serde(rename = "sequenceReference")]
    pub sequence_reference: SequenceReference,
    /// Interbase start coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    /// Interbase end coordinate.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    /// Literal sequence at the location.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<String>,
}

impl SequenceLocation {
    /// Construct a location and stamp its digest and identifier.
    pub fn new(
        sequence_reference: SequenceReference,
        start: i64,
        end: i64,
        sequence: Option<String>,
    ) -> Self {
        let mut location = Self {
            id: None,
            type_: type_sequence_location(),
            digest: None,
            sequence_reference,
            start: Some(start),
            end: Some(end),
            sequence,
        };
        let digest = location.compute_digest();
        location.id = Some(format!("ga4gh:SL.{}", &digest));
        location.digest = Some(digest);
        location
    }

    /// Digest over the canonicalized location content.
    pub fn compute_digest(&self) -> String {
        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        fields.insert("type", serde_json::json!("SequenceLocation"));
        fields.insert(
            "sequenceReference",
            serde_json::json!(self.sequence_reference.refget_accession),
        );
        if let Some(start) = self.start {
            fields.insert("start", serde_json::json!(start));
        }
        if let Some(end) = self.end {
            fields.insert("end", serde_json::json!(end));
        }
        sha512t24u(canonical_json(&fields).as_bytes())
    }
}

/// The state of an allele: a literal or reference-derived sequence.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type")]
pub enum SequenceExpression {
    /// An explicit sequence of residues.
    LiteralSequenceExpression {
        /// The literal sequence.
        sequence: String,
    },
    /// A sequence expressed as a length of repeated reference subunits.
    ReferenceLengthExpression {
        /// The number of residues in the expressed sequence.
        length: i64,
        /// Length of the repeated reference subunit.
        #[serde(
            rename = "repeatSubunitLength",
            skip_serializing_if = "Option::is_none"
        )]
        repeat_subunit_length: Option<i64>,
        /// The sequence, when materialized.
        #[serde(skip_serializing_if = "Option::is_none")]
        sequence: Option<String>,
    },
}

impl SequenceExpression {
    fn digest_fields(&self) -> BTreeMap<&str, serde_json::Value> {
        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        match self {
            SequenceExpression::LiteralSequenceExpression { sequence } => {
                fields.insert("type", serde_json::json!("LiteralSequenceExpression"));
                fields.insert("sequence", serde_json::json!(sequence));
            }
            SequenceExpression::ReferenceLengthExpression {
                length,
                repeat_subunit_length,
                sequence,
            } => {
                fields.insert("type", serde_json::json!("ReferenceLengthExpression"));
                fields.insert("length", serde_json::json!(length));
                if let Some(repeat_subunit_length) = repeat_subunit_length {
                    fields.insert(
                        "repeatSubunitLength",
                        serde_json::json!(repeat_subunit_length),
                    );
                }
                if let Some(sequence) = sequence {
                    fields.insert("sequence", serde_json::json!(sequence));
                }
            }
        }
        fields
    }
}

fn type_allele() -> String {
    "Allele".to_string()
}

/// A VRS-style allele: a location plus a state.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Allele {
    /// Content-addressed identifier (`ga4gh:VA.<digest>`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// MUST be "Allele".
    #[serde(rename = "type", default = "type_allele")]
    pub type_: String,
    /// Digest over the canonicalized location and state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
    /// Display name for the allele.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Expressions of the allele in variant nomenclatures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expressions: Option<Vec<Expression>>,
    /// Where the allele is located.
    pub location: SequenceLocation,
    /// The state at the location.
    pub state: SequenceExpression,
}

impl Allele {
    /// Construct an allele and stamp its digest and identifier.
    pub fn new(location: SequenceLocation, state: SequenceExpression) -> Self {
        let mut allele = Self {
            id: None,
            type_: type_allele(),
            digest: None,
            name: None,
            expressions: None,
            location,
            state,
        };
        let digest = allele.compute_digest();
        allele.id = Some(format!("ga4gh:VA.{}", &digest));
        allele.digest = Some(digest);
        allele
    }

    /// Digest over the canonicalized `{location, state}` content.
    ///
    /// The location contributes through its own digest, per the GA4GH
    /// identifiable-object serialization scheme.
    pub fn compute_digest(&self) -> String {
        let mut fields: BTreeMap<&str, serde_json::Value> = BTreeMap::new();
        fields.insert("type", serde_json::json!("Allele"));
        fields.insert(
            "location",
            serde_json::json!(self.location.compute_digest()),
        );
        let state_fields = self
            .state
            .digest_fields()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect::<BTreeMap<_, _>>();
        fields.insert("state", canonical_value(&state_fields));
        sha512t24u(canonical_json(&fields).as_bytes())
    }

    /// Check that the stored digest and identifier agree with the content.
    pub fn check_digest(&self) -> Result<(), anyhow::Error> {
        let computed = self.compute_digest();
        if let Some(digest) = &self.digest {
            if digest != &computed {
                anyhow::bail!(
                    "allele digest mismatch: stored {} != computed {}",
                    digest,
                    computed
                );
            }
        }
        if let Some(id) = &self.id {
            let expected = format!("ga4gh:VA.{}", computed);
            if id != &expected {
                anyhow::bail!("allele id mismatch: stored {} != computed {}", id, expected);
            }
        }
        Ok(())
    }
}

/// Serialize sorted fields as compact canonical JSON.
///
/// `BTreeMap` iteration gives the sorted key order; values must already be
/// scalars, arrays, or canonically-ordered objects.
fn canonical_json(fields: &BTreeMap<&str, serde_json::Value>) -> String {
    let mut out = String::from("{");
    for (i, (key, value)) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str(&serde_json::to_string(key).expect("keys serialize"));
        out.push(':');
        out.push_str(&serde_json::to_string(value).expect("values serialize"));
    }
    out.push('}');
    out
}

/// Build a JSON object value whose entries follow sorted key order.
fn canonical_value(fields: &BTreeMap<String, serde_json::Value>) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (key, value) in fields {
        map.insert(key.clone(), value.clone());
    }
    serde_json::Value::Object(map)
}

#[cfg(test)]
mod test {
    use pretty_assertions::assert_eq;

    use super::*;

    fn example_allele() -> Allele {
        Allele::new(
            SequenceLocation::new(
                SequenceReference::new("SQ.vyo55F6mA6n2LgN4cagcdRzOuh38V4mE"),
                857,
                858,
                None,
            ),
            SequenceExpression::LiteralSequenceExpression {
                sequence: "R".to_string(),
            },
        )
    }

    #[test]
    fn allele_ids_derive_from_digest() {
        let allele = example_allele();

        let digest = allele.digest.as_deref().expect("digest is stamped");
        assert_eq!(
            allele.id.as_deref(),
            Some(format!("ga4gh:VA.{}", digest).as_str())
        );
        let loc_digest = allele.location.digest.as_deref().expect("digest is stamped");
        assert_eq!(
            allele.location.id.as_deref(),
            Some(format!("ga4gh:SL.{}", loc_digest).as_str())
        );
        allele.check_digest().expect("digests are consistent");
    }

    #[test]
    fn allele_digest_depends_on_state() {
        let a = example_allele();
        let mut b = a.clone();
        b.state = SequenceExpression::LiteralSequenceExpression {
            sequence: "Q".to_string(),
        };
        assert_ne!(a.compute_digest(), b.compute_digest());
    }

    #[test]
    fn tampered_digest_is_detected() {
        let mut allele = example_allele();
        allele.digest = Some("bogusbogusbogusbogusbogu".to_string());
        assert!(allele.check_digest().is_err());
    }

    #[test]
    fn digest_ignores_display_fields() {
        let a = example_allele();
        let mut b = a.clone();
        b.name = Some("L858R".to_string());
        b.expressions = Some(vec![Expression {
            syntax: Syntax::HgvsP,
            value: "NP_005219.2:p.Leu858Arg".to_string(),
        }]);
        assert_eq!(a.compute_digest(), b.compute_digest());
    }

    #[rstest::rstest]
    #[case("NP_005219.2:p.Leu858Arg", Some(Syntax::HgvsP))]
    #[case("NM_005228.4:c.2573T>G", Some(Syntax::HgvsC))]
    #[case("NC_000007.13:g.55259515T>G", Some(Syntax::HgvsG))]
    #[case("NR_047551.1:n.123A>G", Some(Syntax::HgvsN))]
    #[case("NC_012920.1:m.1555A>G", Some(Syntax::HgvsM))]
    #[case("NM_005228.4:r.2573u>g", Some(Syntax::HgvsR))]
    #[case("7-140453136-A-T", None)]
    fn syntax_sniffing(#[case] expr: &str, #[case] expected: Option<Syntax>) {
        assert_eq!(expected, Syntax::sniff(expr));
    }

    #[test]
    fn serialization_shape() {
        let mut allele = example_allele();
        allele.name = Some("L858R".to_string());
        let digest = allele.digest.clone().expect("digest is stamped");
        let loc_digest = allele.location.digest.clone().expect("digest is stamped");

        let value = serde_json::to_value(&allele).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "id": format!("ga4gh:VA.{digest}"),
                "type": "Allele",
                "digest": digest,
                "name": "L858R",
                "location": {
                    "id": format!("ga4gh:SL.{loc_digest}"),
                    "type": "SequenceLocation",
                    "digest": loc_digest,
                    "sequenceReference": {
                        "type": "SequenceReference",
                        "refgetAccession": "SQ.vyo55F6mA6n2LgN4cagcdRzOuh38V4mE",
                    },
                    "start": 857,
                    "end": 858,
                },
                "state": {
                    "type": "LiteralSequenceExpression",
                    "sequence": "R",
                },
            })
        );
    }

    #[test]
    fn reference_length_expression_roundtrip() {
        let state = SequenceExpression::ReferenceLengthExpression {
            length: 12,
            repeat_subunit_length: Some(3),
            sequence: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "ReferenceLengthExpression",
                "length": 12,
                "repeatSubunitLength": 3,
            })
        );
        let back: SequenceExpression = serde_json::from_value(json).unwrap();
        assert_eq!(state, back);
    }
}
