//! Concept graph parsing from loosely structured model output.

use std::collections::{HashMap, HashSet};

use serde_json::Value;

use iw_core::{Concept, ConceptGraph, ConceptRelationship, Theme};

const DEFAULT_IMPORTANCE: i64 = 2;
const DEFAULT_RELATIONSHIP_LABEL: &str = "related to";

/// Build a [`ConceptGraph`] from a JSON object.
///
/// Accepts `concepts`/`nodes` and `relationships`/`links`/`edges` arrays.
/// Themes outside the closed set become [`Theme::Personal`], importance is
/// clamped, duplicate ids are skipped, and relationships may name their
/// endpoints by id or by label. The result always satisfies
/// [`ConceptGraph::is_referentially_intact`].
pub fn parse_concept_graph(value: &Value, max_concepts: usize) -> ConceptGraph {
    let mut graph = ConceptGraph::default();
    let mut seen = HashSet::new();

    for item in array_field(value, &["concepts", "nodes"]) {
        if graph.concepts.len() >= max_concepts {
            break;
        }
        let Some(concept) = parse_concept(item) else {
            continue;
        };
        if seen.insert(concept.id.clone()) {
            graph.concepts.push(concept);
        }
    }

    let by_label: HashMap<String, String> = graph
        .concepts
        .iter()
        .map(|c| (c.label.to_lowercase(), c.id.clone()))
        .collect();
    let resolve = |raw: &str| -> Option<String> {
        if seen.contains(raw) {
            Some(raw.to_string())
        } else {
            by_label.get(&raw.to_lowercase()).cloned()
        }
    };

    for item in array_field(value, &["relationships", "links", "edges"]) {
        let source = string_field(item, &["source", "source_id", "sourceId", "from"]);
        let target = string_field(item, &["target", "target_id", "targetId", "to"]);
        let (Some(source), Some(target)) = (source, target) else {
            continue;
        };
        let (Some(source_id), Some(target_id)) = (resolve(&source), resolve(&target)) else {
            continue;
        };
        let label = string_field(item, &["label", "type", "relation"])
            .unwrap_or_else(|| DEFAULT_RELATIONSHIP_LABEL.to_string());
        graph.relationships.push(ConceptRelationship {
            source_id,
            target_id,
            label,
        });
    }

    graph.sanitize();
    graph
}

fn parse_concept(item: &Value) -> Option<Concept> {
    let label = string_field(item, &["label", "name", "text"]);
    let id = string_field(item, &["id"]).or_else(|| label.as_deref().map(slug))?;
    if id.is_empty() {
        return None;
    }
    let label = label.unwrap_or_else(|| id.clone());
    let theme = string_field(item, &["theme", "category", "type"])
        .and_then(|raw| Theme::coerce(&raw))
        .unwrap_or(Theme::Personal);
    let importance = item
        .get("importance")
        .and_then(|v| match v {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(DEFAULT_IMPORTANCE);
    Some(Concept::new(id, label, theme, importance))
}

fn array_field<'a>(value: &'a Value, names: &[&str]) -> &'a [Value] {
    names
        .iter()
        .find_map(|name| value.get(*name).and_then(Value::as_array))
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn string_field(item: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match item.get(*name)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn slug(label: &str) -> String {
    label
        .split(|c: char| !c.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canonical_shape() {
        let value = json!({
            "concepts": [
                {"id": "a", "label": "Ownership", "theme": "technology", "importance": 3},
                {"id": "b", "label": "Borrowing", "theme": "technology", "importance": 2}
            ],
            "relationships": [{"source": "a", "target": "b", "label": "enables"}]
        });
        let graph = parse_concept_graph(&value, 10);
        assert_eq!(graph.concepts.len(), 2);
        assert_eq!(graph.relationships[0].label, "enables");
        assert!(graph.is_referentially_intact());
    }

    #[test]
    fn coerces_unknown_theme_and_clamps_importance() {
        let value = json!({
            "nodes": [
                {"id": 1, "label": "Stars", "theme": "astrology", "importance": 9},
                {"id": 2, "label": "Budget", "theme": "Finance", "importance": "0"}
            ]
        });
        let graph = parse_concept_graph(&value, 10);
        assert_eq!(graph.concepts[0].id, "1");
        assert_eq!(graph.concepts[0].theme, Theme::Personal);
        assert_eq!(graph.concepts[0].importance, 3);
        assert_eq!(graph.concepts[1].theme, Theme::Business);
        assert_eq!(graph.concepts[1].importance, 1);
    }

    #[test]
    fn drops_dangling_and_self_referencing_edges() {
        let value = json!({
            "concepts": [{"id": "a", "label": "A"}, {"id": "b", "label": "B"}],
            "links": [
                {"source": "a", "target": "missing"},
                {"source": "a", "target": "a"},
                {"from": "b", "to": "a"}
            ]
        });
        let graph = parse_concept_graph(&value, 10);
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.relationships[0].source_id, "b");
        assert_eq!(graph.relationships[0].label, DEFAULT_RELATIONSHIP_LABEL);
    }

    #[test]
    fn resolves_edges_by_label_and_derives_missing_ids() {
        let value = json!({
            "concepts": [{"label": "Machine Learning"}, {"name": "Data"}],
            "edges": [{"source": "machine learning", "target": "Data", "type": "needs"}]
        });
        let graph = parse_concept_graph(&value, 10);
        assert_eq!(graph.concepts[0].id, "machine-learning");
        assert_eq!(graph.concepts[1].id, "data");
        assert_eq!(graph.relationships[0].source_id, "machine-learning");
        assert_eq!(graph.relationships[0].target_id, "data");
    }

    #[test]
    fn caps_concepts_and_drops_edges_to_truncated_ones() {
        let concepts: Vec<Value> = (0..15)
            .map(|i| json!({"id": format!("c{i}"), "label": format!("Concept {i}")}))
            .collect();
        let value = json!({
            "concepts": concepts,
            "relationships": [{"source": "c0", "target": "c14"}]
        });
        let graph = parse_concept_graph(&value, 10);
        assert_eq!(graph.concepts.len(), 10);
        assert!(graph.relationships.is_empty());
    }

    #[test]
    fn missing_arrays_give_empty_graph() {
        assert!(parse_concept_graph(&json!({"summary": "x"}), 10).is_empty());
    }
}
