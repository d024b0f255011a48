//! Defensive parsing of oracle answers.
//!
//! Models are asked for bare JSON but regularly wrap it in code fences, add a
//! sentence before or after it, or return the array without its object.
//! Everything here is tolerant of that; nothing here calls the oracle.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z]*[ \t]*\n?(.*?)```").unwrap());

/// How many `{` / `[` positions are tried before giving up on prose.
const MAX_JSON_STARTS: usize = 32;

/// Find the first JSON object or array in `raw`.
pub fn extract_json(raw: &str) -> Option<Value> {
    let trimmed = raw.trim();
    if let Some(caps) = RE_FENCE.captures(trimmed) {
        if let Some(v) = first_value(caps[1].trim()) {
            return Some(v);
        }
    }
    first_value(trimmed)
}

fn first_value(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str::<Value>(text) {
        if v.is_object() || v.is_array() {
            return Some(v);
        }
    }
    text.match_indices(['{', '['])
        .take(MAX_JSON_STARTS)
        .find_map(|(idx, _)| {
            serde_json::Deserializer::from_str(&text[idx..])
                .into_iter::<Value>()
                .next()
                .and_then(Result::ok)
        })
}

/// Items under `key` in an extraction answer.
///
/// Accepts `{"key": [..]}`, a bare array, an object whose only array value
/// sits under another key, `{"key": {..}}` and a single bare record.
/// `None` means the answer has no usable shape.
pub fn items_for(value: Value, key: &str) -> Option<Vec<Map<String, Value>>> {
    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove(key) {
            Some(Value::Array(items)) => items,
            Some(Value::Object(one)) => vec![Value::Object(one)],
            Some(Value::Null) => Vec::new(),
            Some(_) => return None,
            None => {
                let arrays: Vec<Value> = obj.values().filter(|v| v.is_array()).cloned().collect();
                match arrays.len() {
                    1 => match arrays.into_iter().next() {
                        Some(Value::Array(items)) => items,
                        _ => return None,
                    },
                    0 if obj.contains_key("name") || obj.contains_key("payment_type") => {
                        vec![Value::Object(obj)]
                    }
                    _ => return None,
                }
            }
        },
        _ => return None,
    };
    Some(
        list.into_iter()
            .filter_map(|item| match item {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect(),
    )
}

/// Lenient field read: strings are trimmed, numbers and booleans become
/// strings, blanks and nulls become `None`. The first present alias wins.
pub fn text_field(record: &Map<String, Value>, aliases: &[&str]) -> Option<String> {
    aliases.iter().find_map(|key| match record.get(*key)? {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty() && !s.eq_ignore_ascii_case("null") && !s.eq_ignore_ascii_case("n/a"))
                .then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

/// Lenient yes/no read for relevance answers.
pub fn bool_field(record: &Map<String, Value>, key: &str) -> Option<bool> {
    match record.get(key)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "y" | "1" => Some(true),
            "false" | "no" | "n" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_plain_and_fenced_json() {
        assert_eq!(extract_json(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("```json\n{\"a\": [1, 2]}\n```"),
            Some(json!({"a": [1, 2]}))
        );
    }

    #[test]
    fn skips_surrounding_prose() {
        let raw = "Sure! Here is the data: {\"milestones\": []} Let me know if you need more.";
        assert_eq!(extract_json(raw), Some(json!({"milestones": []})));
        let raw = "Result [ {\"name\": \"Kickoff\"} ] done";
        assert_eq!(extract_json(raw), Some(json!([{"name": "Kickoff"}])));
    }

    #[test]
    fn rejects_non_json() {
        assert_eq!(extract_json("I could not find any milestones."), None);
        assert_eq!(extract_json("{not json"), None);
        assert_eq!(extract_json("42"), None);
    }

    #[test]
    fn items_accept_every_shape() {
        let wrapped = json!({"payment_terms": [{"amount": "$5,000"}]});
        assert_eq!(items_for(wrapped, "payment_terms").unwrap().len(), 1);

        let bare = json!([{"name": "A"}, 3, {"name": "B"}]);
        assert_eq!(items_for(bare, "milestones").unwrap().len(), 2);

        let other_key = json!({"items": [{"name": "A"}]});
        assert_eq!(items_for(other_key, "milestones").unwrap().len(), 1);

        let single = json!({"name": "Kickoff", "due_date": null});
        assert_eq!(items_for(single, "milestones").unwrap().len(), 1);

        assert_eq!(items_for(json!({"milestones": null}), "milestones"), Some(vec![]));
        assert_eq!(items_for(json!({"milestones": "none"}), "milestones"), None);
        assert_eq!(items_for(json!({"a": [], "b": []}), "milestones"), None);
    }

    #[test]
    fn coerces_field_values() {
        let rec = json!({"amount": 5000, "pct": " 30% ", "blank": "  ", "missing": null, "na": "N/A"});
        let rec = rec.as_object().unwrap();
        assert_eq!(text_field(rec, &["amount"]), Some("5000".into()));
        assert_eq!(text_field(rec, &["pct"]), Some("30%".into()));
        assert_eq!(text_field(rec, &["blank", "missing", "na"]), None);
        assert_eq!(text_field(rec, &["nope", "amount"]), Some("5000".into()));
    }

    #[test]
    fn reads_loose_booleans() {
        let rec = json!({"a": true, "b": "yes", "c": 0, "d": "maybe"});
        let rec = rec.as_object().unwrap();
        assert_eq!(bool_field(rec, "a"), Some(true));
        assert_eq!(bool_field(rec, "b"), Some(true));
        assert_eq!(bool_field(rec, "c"), Some(false));
        assert_eq!(bool_field(rec, "d"), None);
        assert_eq!(bool_field(rec, "e"), None);
    }
}
