//! Property-graph write layer: parameterized Cypher generation and the
//! Neo4j HTTP transactional API client.

use std::collections::HashSet;

use itertools::Itertools as _;
use serde_json::{Map, Value};

use crate::cdm::core::EXT_NORMALIZER_PRIORITY;

/// Executes parameterized property-graph queries.
#[async_trait::async_trait]
pub trait GraphWriter: Send {
    /// Run one query with its parameters.
    async fn run(&mut self, query: &str, parameters: Value) -> Result<(), anyhow::Error>;
}

/// Graph writer speaking the Neo4j HTTP transactional API.
pub struct Neo4jHttpWriter {
    client: reqwest::Client,
    endpoint: String,
    username: String,
    password: String,
}

impl Neo4jHttpWriter {
    /// Construct a writer for `<url>/db/<database>/tx/commit`.
    pub fn new(
        url: &str,
        database: &str,
        username: &str,
        password: &str,
    ) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("could not build HTTP client: {}", e))?;
        Ok(Self {
            client,
            endpoint: format!(
                "{}/db/{}/tx/commit",
                url.trim_end_matches('/'),
                database
            ),
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

#[derive(Debug, serde::Deserialize)]
struct Neo4jResponse {
    #[serde(default)]
    errors: Vec<Neo4jError>,
}

#[derive(Debug, serde::Deserialize)]
struct Neo4jError {
    code: String,
    message: String,
}

#[async_trait::async_trait]
impl GraphWriter for Neo4jHttpWriter {
    async fn run(&mut self, query: &str, parameters: Value) -> Result<(), anyhow::Error> {
        let body = serde_json::json!({
            "statements": [{"statement": query, "parameters": parameters}],
        });
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("graph request failed: {}", e))?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN
        {
            anyhow::bail!("graph database credentials rejected (HTTP {})", status);
        }
        if !status.is_success() {
            anyhow::bail!("graph request failed with HTTP {}", status);
        }

        let parsed: Neo4jResponse = response
            .json()
            .await
            .map_err(|e| anyhow::anyhow!("invalid graph response: {}", e))?;
        if let Some(error) = parsed.errors.first() {
            anyhow::bail!("graph query failed: {}: {}", error.code, error.message);
        }
        Ok(())
    }
}

/// The node labels carrying an `id` uniqueness constraint.
const CONSTRAINED_LABELS: &[&str] = &[
    "Variation",
    "CategoricalVariant",
    "Document",
    "Method",
    "Gene",
    "Condition",
    "Therapy",
    "Statement",
];

/// Create the per-label uniqueness constraints.
pub async fn create_constraints(writer: &mut dyn GraphWriter) -> Result<(), anyhow::Error> {
    for label in CONSTRAINED_LABELS {
        let query = format!(
            "CREATE CONSTRAINT {}_id_unique IF NOT EXISTS FOR (n:{}) REQUIRE n.id IS UNIQUE;",
            label.to_lowercase(),
            label
        );
        writer.run(&query, Value::Object(Map::new())).await?;
    }
    Ok(())
}

/// Delete all nodes and relationships.
pub async fn clear(writer: &mut dyn GraphWriter) -> Result<(), anyhow::Error> {
    writer
        .run("MATCH (n) DETACH DELETE n;", Value::Object(Map::new()))
        .await
}

/// Create a parameterized query fragment for the requested params that are
/// non-null in the entity, such as `id:$id, name:$name`.
fn parameterized_query(entity: &Map<String, Value>, params: &[&str], prefix: &str) -> String {
    params
        .iter()
        .filter(|key| entity.get(**key).map(|v| !v.is_null()).unwrap_or(false))
        .map(|key| format!("{}:${}{}", key, prefix, key))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Promote mappings and extensions onto a flat node object and extend the
/// parameterized keys accordingly.
///
/// Gene, disease, and therapy concepts additionally get a `normalizer_id`
/// taken from the priority mapping; MONDO codings keep their CURIE in the
/// `code` field.
fn add_mappings_and_extensions(obj: &mut Map<String, Value>, keys: &mut Vec<String>) {
    let mappings = obj.get("mappings").cloned();
    if let Some(Value::Array(mappings)) = mappings {
        let concept_type = obj.get("conceptType").and_then(|v| v.as_str());
        if matches!(concept_type, Some("Gene") | Some("Disease") | Some("Therapy")) {
            'outer: for mapping in &mappings {
                for ext in mapping
                    .get("extensions")
                    .and_then(|v| v.as_array())
                    .into_iter()
                    .flatten()
                {
                    if ext.get("name").and_then(|v| v.as_str())
                        == Some(EXT_NORMALIZER_PRIORITY)
                        && ext.get("value") == Some(&Value::Bool(true))
                    {
                        let coding = &mapping["coding"];
                        let normalizer_id = if coding
                            .get("id")
                            .and_then(|v| v.as_str())
                            .map(|id| id.starts_with("MONDO"))
                            .unwrap_or(false)
                        {
                            coding.get("code").cloned()
                        } else {
                            coding.get("id").cloned()
                        };
                        if let Some(normalizer_id) = normalizer_id {
                            obj.insert("normalizer_id".to_string(), normalizer_id);
                            keys.push("normalizer_id:$normalizer_id".to_string());
                        }
                        break 'outer;
                    }
                }
            }
        }

        obj.insert(
            "mappings".to_string(),
            Value::String(Value::Array(mappings).to_string()),
        );
        keys.push("mappings:$mappings".to_string());
    }

    let extensions = obj.get("extensions").cloned();
    for ext in extensions
        .as_ref()
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
    {
        let Some(name) = ext.get("name").and_then(|v| v.as_str()) else {
            continue;
        };
        let name = name.split_whitespace().join("_").to_lowercase();
        let value = ext.get("value").cloned().unwrap_or(Value::Null);
        let value = match value {
            Value::Object(_) | Value::Array(_) => Value::String(value.to_string()),
            scalar => scalar,
        };
        obj.insert(name.clone(), value);
        keys.push(format!("{}:${}", name, name));
    }
}

/// Write a method node and its report document.
pub async fn add_method(
    writer: &mut dyn GraphWriter,
    method: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<(), anyhow::Error> {
    let Some(id) = method.get("id").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if !ids_to_load.contains(id) {
        return Ok(());
    }
    let mut method = method
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("method is not an object"))?;

    let keys = parameterized_query(&method, &["id", "name", "methodType"], "");
    let mut query = format!("MERGE (m:Method {{ {} }})\n", keys);

    if let Some(reported_in) = method.remove("reportedIn").filter(|v| !v.is_null()) {
        add_document(writer, &reported_in, ids_to_load).await?;
        if let Some(doi) = reported_in.get("doi").and_then(|v| v.as_str()) {
            query.push_str(&format!(
                "MERGE (d:Document {{ doi:'{}' }})\nMERGE (m) -[:IS_REPORTED_IN] -> (d)\n",
                doi
            ));
        }
    }

    writer.run(&query, Value::Object(method)).await
}

/// Write a gene or disease node.
pub async fn add_gene_or_disease(
    writer: &mut dyn GraphWriter,
    obj: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<(), anyhow::Error> {
    let Some(id) = obj.get("id").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if !ids_to_load.contains(id) {
        return Ok(());
    }
    let mut obj = obj
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("concept is not an object"))?;

    let concept_type = obj
        .get("conceptType")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let mut keys = vec![parameterized_query(
        &obj,
        &["id", "name", "conceptType"],
        "",
    )];
    add_mappings_and_extensions(&mut obj, &mut keys);
    let keys = keys.join(", ");

    let query = match concept_type.as_str() {
        "Gene" => format!("MERGE (g:Gene {{ {} }});", keys),
        "Disease" => format!("MERGE (d:Disease:Condition {{ {} }});", keys),
        other => anyhow::bail!("invalid concept type: {}", other),
    };
    writer.run(&query, Value::Object(obj)).await
}

/// Write a single therapy node.
async fn add_therapy_node(
    writer: &mut dyn GraphWriter,
    therapy: &Value,
) -> Result<(), anyhow::Error> {
    let mut therapy = therapy
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("therapy is not an object"))?;
    let mut keys = vec![parameterized_query(
        &therapy,
        &["id", "name", "conceptType"],
        "",
    )];
    add_mappings_and_extensions(&mut therapy, &mut keys);
    let keys = keys.join(", ");

    let query = format!("MERGE (t:Therapy {{ {} }})\n", keys);
    writer.run(&query, Value::Object(therapy)).await
}

/// Write a therapy or therapy-group node with member relationships.
pub async fn add_therapy_or_group(
    writer: &mut dyn GraphWriter,
    therapy: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<(), anyhow::Error> {
    let Some(id) = therapy.get("id").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if !ids_to_load.contains(id) {
        return Ok(());
    }

    let membership_operator = therapy.get("membershipOperator").and_then(|v| v.as_str());
    if therapy.get("conceptType").is_some() {
        return add_therapy_node(writer, therapy).await;
    }

    let Some(membership_operator) = membership_operator else {
        anyhow::bail!("therapy without conceptType or membershipOperator: {}", id);
    };
    let mut group = therapy
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("therapy group is not an object"))?;
    let members = group.remove("therapies").unwrap_or(Value::Array(vec![]));

    let mut keys = vec![parameterized_query(
        &group,
        &["id", "membershipOperator"],
        "",
    )];
    add_mappings_and_extensions(&mut group, &mut keys);
    let keys = keys.join(", ");
    writer
        .run(
            &format!("MERGE (tg:TherapyGroup:Therapy {{ {} }})", keys),
            Value::Object(group),
        )
        .await?;

    let relationship = if membership_operator == "AND" {
        "HAS_COMPONENTS"
    } else {
        "HAS_SUBSTITUTES"
    };
    for member in members.as_array().into_iter().flatten() {
        add_therapy_node(writer, member).await?;
        let member_id = member
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow::anyhow!("therapy group member without id"))?;
        let query = format!(
            "MERGE (tg:TherapyGroup:Therapy {{id: '{}'}})\nMERGE (t:Therapy {{id: '{}'}})\nMERGE (tg) -[:{}] -> (t)",
            id, member_id, relationship
        );
        writer.run(&query, Value::Object(Map::new())).await?;
    }
    Ok(())
}

/// Write a sequence-location node.
async fn add_location(writer: &mut dyn GraphWriter, location: &Value) -> Result<(), anyhow::Error> {
    let mut loc = location
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("location is not an object"))?;

    let mut loc_keys = ["id", "digest", "start", "end", "sequence", "type"]
        .iter()
        // start could be 0, so only null-ness matters
        .filter(|key| loc.get(**key).map(|v| !v.is_null()).unwrap_or(false))
        .map(|key| format!("loc.{}=${}", key, key))
        .collect::<Vec<_>>();
    if let Some(sequence_reference) = loc.get("sequenceReference").cloned() {
        loc.insert(
            "sequenceReference".to_string(),
            Value::String(sequence_reference.to_string()),
        );
        loc_keys.push("loc.sequenceReference=$sequenceReference".to_string());
    }
    let loc_keys = loc_keys.join(", ");

    let query = format!(
        "MERGE (loc:{}:Location {{ id: '{}' }})\nON CREATE SET {}",
        loc.get("type").and_then(|t| t.as_str()).unwrap_or("SequenceLocation"),
        loc.get("id").and_then(|i| i.as_str()).unwrap_or_default(),
        loc_keys
    );
    writer.run(&query, Value::Object(loc)).await
}

/// Write a variation node with its location.
pub async fn add_variation(
    writer: &mut dyn GraphWriter,
    variation: &Value,
) -> Result<(), anyhow::Error> {
    let mut v = variation
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("variation is not an object"))?;

    let mut v_keys = ["id", "name", "digest", "type"]
        .iter()
        .filter(|key| v.get(**key).map(|val| !val.is_null()).unwrap_or(false))
        .map(|key| format!("v.{}=${}", key, key))
        .collect::<Vec<_>>();

    // Expressions become per-syntax list properties.
    let expressions = v.remove("expressions").unwrap_or(Value::Array(vec![]));
    for expression in expressions.as_array().into_iter().flatten() {
        let Some(syntax) = expression.get("syntax").and_then(|s| s.as_str()) else {
            continue;
        };
        let Some(value) = expression.get("value").cloned() else {
            continue;
        };
        let key = format!("expression_{}", syntax.replace('.', "_"));
        match v.get_mut(&key) {
            Some(Value::Array(values)) => values.push(value),
            _ => {
                v_keys.push(format!("v.{}=${}", key, key));
                v.insert(key, Value::Array(vec![value]));
            }
        }
    }

    if let Some(state) = v.get("state").cloned().filter(|s| !s.is_null()) {
        v.insert("state".to_string(), Value::String(state.to_string()));
        v_keys.push("v.state=$state".to_string());
    }
    let v_keys = v_keys.join(", ");

    let mut query = format!(
        "MERGE (v:{}:Variation {{ id: '{}' }})\nON CREATE SET {}\n",
        v.get("type").and_then(|t| t.as_str()).unwrap_or("Allele"),
        v.get("id").and_then(|i| i.as_str()).unwrap_or_default(),
        v_keys
    );

    let location = v.remove("location");
    if let Some(location) = location.filter(|l| !l.is_null()) {
        add_location(writer, &location).await?;
        query.push_str(&format!(
            "MERGE (loc:{}:Location {{ id: '{}' }})\nMERGE (v) -[:HAS_LOCATION] -> (loc)\n",
            location.get("type").and_then(|t| t.as_str()).unwrap_or("SequenceLocation"),
            location.get("id").and_then(|i| i.as_str()).unwrap_or_default()
        ));
    }

    writer.run(&query, Value::Object(v)).await
}

/// Write a categorical-variant node, its defining allele, and its members.
pub async fn add_categorical_variant(
    writer: &mut dyn GraphWriter,
    categorical_variant: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<(), anyhow::Error> {
    let Some(id) = categorical_variant.get("id").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    if !ids_to_load.contains(id) {
        return Ok(());
    }
    let mut cv = categorical_variant
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("categorical variant is not an object"))?;

    let mut keys = vec![parameterized_query(
        &cv,
        &["id", "name", "description", "type"],
        "",
    )];
    if let Some(aliases) = cv.get("aliases").cloned().filter(|a| !a.is_null()) {
        cv.insert("aliases".to_string(), Value::String(aliases.to_string()));
        keys.push("aliases:$aliases".to_string());
    }
    add_mappings_and_extensions(&mut cv, &mut keys);
    let keys = keys.join(", ");

    let defining_allele = cv
        .get("constraints")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("allele"))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("loaded categorical variant without constraint: {}", id))?;
    add_variation(writer, &defining_allele).await?;

    let mut members_merge = String::new();
    let mut members_relation = String::new();
    for (index, member) in cv
        .get("members")
        .and_then(|m| m.as_array())
        .cloned()
        .unwrap_or_default()
        .iter()
        .enumerate()
    {
        add_variation(writer, member).await?;
        let name = format!("member_{}", index);
        members_merge.push_str(&format!(
            "MERGE ({} {{ id: '{}' }})\n",
            name,
            member.get("id").and_then(|i| i.as_str()).unwrap_or_default()
        ));
        members_relation.push_str(&format!("MERGE (v) -[:HAS_MEMBERS] -> ({})\n", name));
    }
    cv.remove("constraints");
    cv.remove("members");

    let query = format!(
        "{}MERGE (cv:Variation:{} {{ id: '{}' }})\nMERGE (v:Variation:{} {{ {} }})\nMERGE (v) -[:HAS_DEFINING_CONTEXT] -> (cv)\n{}",
        members_merge,
        defining_allele.get("type").and_then(|t| t.as_str()).unwrap_or("Allele"),
        defining_allele.get("id").and_then(|i| i.as_str()).unwrap_or_default(),
        cv.get("type").and_then(|t| t.as_str()).unwrap_or("CategoricalVariant"),
        keys,
        members_relation
    );
    writer.run(&query, Value::Object(cv)).await
}

/// Write a document node.  Documents without an `id` are identified by DOI
/// or PubMed ID.
pub async fn add_document(
    writer: &mut dyn GraphWriter,
    document: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<(), anyhow::Error> {
    if let Some(id) = document.get("id").and_then(|v| v.as_str()) {
        if !ids_to_load.contains(id) {
            return Ok(());
        }
    }
    let mut document = document
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("document is not an object"))?;

    let mut keys = vec![parameterized_query(
        &document,
        &["id", "name", "title", "pmid", "urls", "doi"],
        "",
    )];
    add_mappings_and_extensions(&mut document, &mut keys);
    let keys = keys.join(", ");

    let query = format!("MERGE (n:Document {{ {} }});", keys);
    writer.run(&query, Value::Object(document)).await
}

/// Build the shared part of a statement write: the statement node plus its
/// strength, proposition scalars, and concept relationships.
fn statement_query(statement: &mut Map<String, Value>, is_evidence: bool) -> String {
    let mut match_line = String::new();
    let mut rel_line = String::new();

    if let Some(strength) = statement.get("strength").cloned().filter(|s| !s.is_null()) {
        let mut strength_keys = Vec::new();
        if strength.get("name").map(|n| !n.is_null()).unwrap_or(false) {
            statement.insert("strength_name".to_string(), strength["name"].clone());
            strength_keys.push("name:$strength_name".to_string());
        }
        for key in ["primaryCoding", "mappings"] {
            if let Some(value) = strength.get(key).filter(|v| !v.is_null()) {
                statement.insert(
                    format!("strength_{}", key),
                    Value::String(value.to_string()),
                );
                strength_keys.push(format!("{}:$strength_{}", key, key));
            }
        }
        let strength_keys = strength_keys.join(", ");
        match_line.push_str(&format!("MERGE (strength:Strength {{ {} }})\n", strength_keys));
        rel_line.push_str("MERGE (s) -[:HAS_STRENGTH] -> (strength)\n");
    }

    let proposition = statement
        .get("proposition")
        .cloned()
        .unwrap_or(Value::Null);
    statement.insert(
        "propositionType".to_string(),
        proposition.get("type").cloned().unwrap_or(Value::Null),
    );
    match_line.push_str("SET s.propositionType=$propositionType\n");

    if let Some(allele_origin) = proposition
        .get("alleleOriginQualifier")
        .and_then(|q| q.get("name"))
        .filter(|n| !n.is_null())
    {
        statement.insert("alleleOriginQualifier".to_string(), allele_origin.clone());
        match_line.push_str("SET s.alleleOriginQualifier=$alleleOriginQualifier\n");
    }
    if let Some(predicate) = proposition.get("predicate").filter(|p| !p.is_null()) {
        statement.insert("predicate".to_string(), predicate.clone());
        match_line.push_str("SET s.predicate=$predicate\n");
    }

    if let Some(gene_id) = proposition
        .get("geneContextQualifier")
        .and_then(|g| g.get("id"))
        .and_then(|id| id.as_str())
    {
        match_line.push_str(&format!("MERGE (g:Gene {{id: '{}'}})\n", gene_id));
        rel_line.push_str("MERGE (s) -[:HAS_GENE_CONTEXT] -> (g)\n");
    }

    if let Some(method_id) = statement
        .get("specifiedBy")
        .and_then(|m| m.get("id"))
        .and_then(|id| id.as_str())
    {
        match_line.push_str(&format!("MERGE (m {{ id: '{}' }})\n", method_id));
        rel_line.push_str("MERGE (s) -[:IS_SPECIFIED_BY] -> (m)\n");
    }

    if let Some(variant_id) = proposition
        .get("subjectVariant")
        .and_then(|v| v.get("id"))
        .and_then(|id| id.as_str())
    {
        match_line.push_str(&format!("MERGE (v:Variation {{ id: '{}' }})\n", variant_id));
        rel_line.push_str("MERGE (s) -[:HAS_VARIANT] -> (v)\n");
    }

    if let Some(therapeutic_id) = proposition
        .get("objectTherapeutic")
        .and_then(|t| t.get("id"))
        .and_then(|id| id.as_str())
    {
        match_line.push_str(&format!("MERGE (t:Therapy {{ id: '{}' }})\n", therapeutic_id));
        rel_line.push_str("MERGE (s) -[:HAS_THERAPEUTIC] -> (t)\n");
    }

    if let Some(tumor_type_id) = proposition
        .get("conditionQualifier")
        .or_else(|| proposition.get("objectCondition"))
        .and_then(|c| c.get("id"))
        .and_then(|id| id.as_str())
    {
        match_line.push_str(&format!("MERGE (tt:Condition {{ id: '{}' }})\n", tumor_type_id));
        rel_line.push_str("MERGE (s) -[:HAS_TUMOR_TYPE] -> (tt)\n");
    }

    let statement_keys = parameterized_query(
        statement,
        &["id", "description", "direction", "type"],
        "",
    );
    let statement_label = if is_evidence {
        "Statement"
    } else {
        "StudyStatement:Statement"
    };

    format!(
        "MERGE (s:{} {{ {} }})\n{}\n{}\n",
        statement_label, statement_keys, match_line, rel_line
    )
}

/// Write an evidence statement node and its relationships.
pub async fn add_statement_evidence(
    writer: &mut dyn GraphWriter,
    statement: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<bool, anyhow::Error> {
    let Some(id) = statement.get("id").and_then(|v| v.as_str()) else {
        return Ok(false);
    };
    if !ids_to_load.contains(id) {
        return Ok(false);
    }
    let mut statement = statement
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("statement is not an object"))?;

    let mut query = statement_query(&mut statement, true);
    let reported_in = statement
        .get("reportedIn")
        .and_then(|r| r.as_array())
        .cloned()
        .unwrap_or_default();
    for document in &reported_in {
        let Some(doc_id) = document.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        let name = format!(
            "doc_{}",
            doc_id.rsplit(':').next().unwrap_or(doc_id)
        );
        query.push_str(&format!(
            "MERGE ({} {{ id: '{}'}})\nMERGE (s) -[:IS_REPORTED_IN] -> ({})\n",
            name, doc_id, name
        ));
    }

    // The proposition and strength were flattened into scalar parameters.
    statement.remove("proposition");
    statement.remove("strength");
    statement.remove("reportedIn");
    statement.remove("specifiedBy");
    writer.run(&query, Value::Object(statement)).await?;
    Ok(true)
}

/// Write an assertion statement node, its classification, and its evidence
/// lines.  Evidence-item references outside the admitted set are pruned.
pub async fn add_statement_assertion(
    writer: &mut dyn GraphWriter,
    statement: &Value,
    ids_to_load: &HashSet<String>,
) -> Result<bool, anyhow::Error> {
    let Some(id) = statement.get("id").and_then(|v| v.as_str()) else {
        return Ok(false);
    };
    if !ids_to_load.contains(id) {
        return Ok(false);
    }
    let id = id.to_string();
    let mut statement = statement
        .as_object()
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("statement is not an object"))?;

    let mut query = statement_query(&mut statement, false);

    if let Some(classification) = statement
        .get("classification")
        .cloned()
        .filter(|c| !c.is_null())
    {
        let mut classification_keys = Vec::new();
        if let Some(primary_coding) = classification.get("primaryCoding").filter(|c| !c.is_null())
        {
            statement.insert(
                "classification_primaryCoding".to_string(),
                Value::String(primary_coding.to_string()),
            );
            classification_keys.push("primaryCoding:$classification_primaryCoding".to_string());
        }
        let mut classification_obj = classification.as_object().cloned().unwrap_or_default();
        add_mappings_and_extensions(&mut classification_obj, &mut classification_keys);
        for (key, value) in classification_obj {
            if key != "primaryCoding" {
                statement.insert(key, value);
            }
        }
        let classification_keys = classification_keys.join(", ");
        query.push_str(&format!(
            "MERGE (classification:Classification {{ {} }})\nMERGE (s) -[:HAS_CLASSIFICATION] -> (classification)\n",
            classification_keys
        ));
    }

    let evidence_lines = statement
        .get("hasEvidenceLines")
        .and_then(|lines| lines.as_array())
        .cloned()
        .unwrap_or_default();
    if !evidence_lines.is_empty() {
        let mut loadable_lines = Vec::new();
        for line in &evidence_lines {
            let evidence_item_ids = line
                .get("hasEvidenceItems")
                .and_then(|items| items.as_array())
                .into_iter()
                .flatten()
                .filter_map(|item| match item {
                    Value::String(id) => Some(id.clone()),
                    Value::Object(obj) => obj
                        .get("id")
                        .and_then(|id| id.as_str())
                        .map(str::to_string),
                    _ => None,
                })
                .filter(|id| ids_to_load.contains(id))
                .collect::<Vec<_>>();
            if evidence_item_ids.is_empty() {
                continue;
            }
            loadable_lines.push(serde_json::json!({
                "evidence_line_id": uuid::Uuid::new_v4().to_string(),
                "direction": line.get("directionOfEvidenceProvided").cloned(),
                "evidence_item_ids": evidence_item_ids,
            }));
        }

        if loadable_lines.is_empty() {
            tracing::warn!("assertion {} has no loadable evidence lines", id);
            statement.remove("hasEvidenceLines");
        } else {
            statement.insert("hasEvidenceLines".to_string(), Value::Array(loadable_lines));
            query.push_str(
                "WITH s\n\
                 UNWIND $hasEvidenceLines AS el\n\
                 MERGE (evidence_line:EvidenceLine {id: el.evidence_line_id, direction: el.direction})\n\
                 MERGE (s)-[:HAS_EVIDENCE_LINE]->(evidence_line)\n\
                 WITH evidence_line, el.evidence_item_ids AS evidence_item_ids\n\
                 UNWIND evidence_item_ids AS evidence_item_id\n\
                 MERGE (evidence:Statement {id: evidence_item_id})\n\
                 MERGE (evidence_line)-[:HAS_EVIDENCE_ITEM]->(evidence)\n",
            );
        }
    } else {
        statement.remove("hasEvidenceLines");
    }

    // The proposition and strength were flattened into scalar parameters.
    statement.remove("proposition");
    statement.remove("strength");
    statement.remove("classification");
    statement.remove("reportedIn");
    statement.remove("specifiedBy");
    writer.run(&query, Value::Object(statement)).await?;
    Ok(true)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Graph writer that records queries and parameters instead of talking
    /// to a database.
    #[derive(Default)]
    pub(crate) struct RecordingWriter {
        pub(crate) queries: Vec<(String, Value)>,
    }

    #[async_trait::async_trait]
    impl GraphWriter for RecordingWriter {
        async fn run(&mut self, query: &str, parameters: Value) -> Result<(), anyhow::Error> {
            self.queries.push((query.to_string(), parameters));
            Ok(())
        }
    }
}
