//! Pull the loggable parts out of a free-form agent output

use serde_json::Value;

const SKILL_KEYS: [&str; 5] = ["skill", "skill_used", "intent", "action", "type"];
const RESPONSE_KEYS: [&str; 6] = ["response", "answer", "content", "text", "message", "output"];

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

/// Skill label from the top level, then from a nested `metadata` object
pub fn skill_used(output: &Value) -> Option<String> {
    let object = output.as_object()?;
    let lookup = |map: &serde_json::Map<String, Value>| {
        SKILL_KEYS
            .iter()
            .find_map(|key| map.get(*key).and_then(scalar_text))
    };

    lookup(object).or_else(|| {
        object
            .get("metadata")
            .and_then(Value::as_object)
            .and_then(lookup)
    })
}

/// Response text: first non-empty well-known key, else the whole output
pub fn response_text(output: &Value) -> String {
    if let Some(object) = output.as_object() {
        if let Some(text) = RESPONSE_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .find(|v| !is_blank(v))
            .and_then(scalar_text)
        {
            return text;
        }
    }
    scalar_text(output).unwrap_or_default()
}

/// Top-level keys of an object output
pub fn result_keys(output: &Value) -> Option<Vec<String>> {
    output.as_object().map(|o| o.keys().cloned().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_skill_precedence() {
        let output = json!({"intent": "weather", "skill": "chat"});
        assert_eq!(skill_used(&output).as_deref(), Some("chat"));
    }

    #[test]
    fn test_skill_from_nested_metadata() {
        let output = json!({"response": "Sunny", "metadata": {"intent": "weather"}});
        assert_eq!(skill_used(&output).as_deref(), Some("weather"));
    }

    #[test]
    fn test_no_skill() {
        assert_eq!(skill_used(&json!({"response": "hi"})), None);
        assert_eq!(skill_used(&json!("plain text")), None);
    }

    #[test]
    fn test_response_skips_empty_keys() {
        let output = json!({"response": "", "answer": "42"});
        assert_eq!(response_text(&output), "42");
    }

    #[test]
    fn test_response_falls_back_to_whole_output() {
        assert_eq!(response_text(&json!("Chào bạn!")), "Chào bạn!");

        let output = json!({"foo": 1});
        assert_eq!(response_text(&output), r#"{"foo":1}"#);
        assert_eq!(response_text(&Value::Null), "");
    }

    #[test]
    fn test_result_keys() {
        let keys = result_keys(&json!({"a": 1, "b": 2})).unwrap();
        assert_eq!(keys.len(), 2);
        assert!(result_keys(&json!([1, 2])).is_none());
    }
}
