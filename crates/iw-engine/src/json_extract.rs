//! Best-effort JSON object extraction from model output.
//!
//! Models wrap JSON in prose, code fences, or leave trailing commas. The
//! extractor tries progressively looser readings and stops at the first
//! one that yields an object:
//! strict parse, cleaned parse, then the first balanced `{...}` block.

use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

/// Which reading produced the object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractStage {
    Strict,
    Cleaned,
    Substring,
}

fn fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*\s*(.*?)```").expect("valid regex"))
}

fn trailing_comma_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r",(\s*[}\]])").expect("valid regex"))
}

pub fn extract_json_object(raw: &str) -> Option<Value> {
    extract_json_object_with_stage(raw).map(|(value, _)| value)
}

pub fn extract_json_object_with_stage(raw: &str) -> Option<(Value, ExtractStage)> {
    let trimmed = raw.trim();
    if let Some(value) = parse_object(trimmed) {
        return Some((value, ExtractStage::Strict));
    }

    let cleaned = clean(trimmed);
    if let Some(value) = parse_object(&cleaned) {
        debug!("parsed model JSON after cleanup");
        return Some((value, ExtractStage::Cleaned));
    }

    let block = first_balanced_object(&cleaned).or_else(|| first_balanced_object(trimmed))?;
    let value = parse_object(block).or_else(|| parse_object(&clean(block)))?;
    debug!("parsed model JSON from embedded object");
    Some((value, ExtractStage::Substring))
}

fn parse_object(text: &str) -> Option<Value> {
    match serde_json::from_str::<Value>(text) {
        Ok(value @ Value::Object(_)) => Some(value),
        _ => None,
    }
}

fn clean(text: &str) -> String {
    let unfenced = match fence_re().captures(text) {
        Some(caps) => caps.get(1).map_or(text, |m| m.as_str()),
        None => text,
    };
    trailing_comma_re()
        .replace_all(unfenced.trim(), "$1")
        .into_owned()
}

/// The first `{...}` span whose braces balance, ignoring braces in strings.
fn first_balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_parses_directly() {
        let (value, stage) = extract_json_object_with_stage(r#" {"a": 1} "#).unwrap();
        assert_eq!(value, json!({"a": 1}));
        assert_eq!(stage, ExtractStage::Strict);
    }

    #[test]
    fn code_fences_and_trailing_commas_are_cleaned() {
        let raw = "```json\n{\"concepts\": [{\"id\": \"a\"},], }\n```";
        let (value, stage) = extract_json_object_with_stage(raw).unwrap();
        assert_eq!(value, json!({"concepts": [{"id": "a"}]}));
        assert_eq!(stage, ExtractStage::Cleaned);
    }

    #[test]
    fn object_is_extracted_from_surrounding_prose() {
        let raw = "Sure! Here is the graph:\n{\"label\": \"uses {braces}\", \"n\": {\"x\": 2}}\nHope that helps.";
        let (value, stage) = extract_json_object_with_stage(raw).unwrap();
        assert_eq!(value, json!({"label": "uses {braces}", "n": {"x": 2}}));
        assert_eq!(stage, ExtractStage::Substring);
    }

    #[test]
    fn prose_with_trailing_comma_inside_object() {
        let raw = "Result: {\"a\": [1, 2,],} done";
        assert_eq!(extract_json_object(raw), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn non_objects_and_garbage_fail() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no json here").is_none());
        assert!(extract_json_object("{\"unterminated\": ").is_none());
    }
}
