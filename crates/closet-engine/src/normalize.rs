use closet_contracts::analysis::{garment_type, AnalysisResult};
use serde_json::{Map, Value};

use crate::error::ClientError;

const FENCE: &str = "```";
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Removes a markdown code fence around a model reply.
///
/// Order matters: a fence with a language tag (```` ```json ````), then a bare
/// leading fence, then a trailing fence, trimming whitespace after each step.
pub fn strip_code_fence(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(rest) = body.strip_prefix(FENCE) {
        let tag_len = rest
            .find(|ch: char| !ch.is_ascii_alphanumeric())
            .unwrap_or(rest.len());
        if tag_len > 0 {
            body = rest[tag_len..].trim();
        }
    }
    if let Some(rest) = body.strip_prefix(FENCE) {
        body = rest.trim();
    }
    if let Some(rest) = body.strip_suffix(FENCE) {
        body = rest.trim();
    }
    body
}

/// Parses a reply into a JSON object.
///
/// When the whole reply is not JSON, the slice between the first `{` and the
/// last `}` is tried before giving up; the reported error is the one from the
/// full text.
pub fn parse_json_object(text: &str) -> Result<Map<String, Value>, ClientError> {
    let body = strip_code_fence(text);
    let err = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => return Ok(map),
        Ok(other) => {
            return Err(ClientError::MalformedResponse(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            )))
        }
        Err(err) => err,
    };
    if let Some(map) = embedded_object(body) {
        return Ok(map);
    }
    Err(ClientError::MalformedResponse(format!(
        "failed to parse model response as JSON: {err}"
    )))
}

/// Normalizes a clothing classification. A result without a garment type is
/// unusable even when it parsed.
pub fn normalize_classification(text: &str) -> Result<AnalysisResult, ClientError> {
    let mut analysis = parse_json_object(text)?;
    let has_type = analysis
        .get("type")
        .and_then(Value::as_str)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);
    if has_type {
        return Ok(analysis);
    }
    let Some(alias) = garment_type(&analysis).map(str::to_string) else {
        return Err(ClientError::MalformedResponse(
            "classification is missing the required \"type\" field".to_string(),
        ));
    };
    analysis.insert("type".to_string(), Value::String(alias));
    Ok(analysis)
}

/// Pulls the reply text out of a `generateContent` response body.
pub fn extract_candidate_text(body: &str) -> Result<String, ClientError> {
    let payload: Value = serde_json::from_str(body).map_err(|err| {
        ClientError::MalformedResponse(format!("provider returned invalid JSON payload: {err}"))
    })?;

    let Some(candidate) = payload
        .get("candidates")
        .and_then(Value::as_array)
        .and_then(|rows| rows.first())
    else {
        let reason = payload
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str)
            .map(|reason| format!(" (blocked: {reason})"))
            .unwrap_or_default();
        return Err(ClientError::MalformedResponse(format!(
            "provider response has no candidates{reason}"
        )));
    };

    let text: String = candidate
        .get("content")
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|part| !part.get("thought").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if text.trim().is_empty() {
        let finish = candidate
            .get("finishReason")
            .and_then(Value::as_str)
            .unwrap_or("unknown");
        return Err(ClientError::MalformedResponse(format!(
            "first candidate has no text (finish reason: {finish})"
        )));
    }
    Ok(text.trim().to_string())
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

pub(crate) fn truncate_error_body(value: &str) -> String {
    truncate_text(value.trim(), MAX_ERROR_BODY_CHARS)
}

fn embedded_object(body: &str) -> Option<Map<String, Value>> {
    let start = body.find('{')?;
    let end = body.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&body[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{
        extract_candidate_text, normalize_classification, parse_json_object, strip_code_fence,
        truncate_text,
    };
    use crate::error::ClientError;

    fn obj(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn strips_fence_with_language_tag() {
        assert_eq!(
            strip_code_fence("```json\n{\"type\": \"shirt\"}\n```"),
            "{\"type\": \"shirt\"}"
        );
        assert_eq!(strip_code_fence("  ```\n{}\n```  "), "{}");
        assert_eq!(strip_code_fence("{\"a\": 1}"), "{\"a\": 1}");
        assert_eq!(strip_code_fence("```JSON {\"a\": 1}```"), "{\"a\": 1}");
    }

    #[test]
    fn fenced_json_normalizes_to_object() -> anyhow::Result<()> {
        let parsed = parse_json_object("```json\n{\"type\": \"shirt\"}\n```")?;
        assert_eq!(parsed, obj(json!({"type": "shirt"})));
        Ok(())
    }

    #[test]
    fn not_json_is_malformed_with_reason() {
        let err = parse_json_object("not json").err();
        match err {
            Some(ClientError::MalformedResponse(message)) => {
                assert!(message.starts_with("failed to parse model response as JSON: "));
                assert!(message.len() > "failed to parse model response as JSON: ".len());
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn prose_around_object_is_tolerated() -> anyhow::Result<()> {
        let parsed =
            parse_json_object("Here is the analysis:\n{\"type\": \"dress\", \"colors\": [\"red\"]}\nHope it helps")?;
        assert_eq!(parsed, obj(json!({"type": "dress", "colors": ["red"]})));
        Ok(())
    }

    #[test]
    fn non_object_documents_are_rejected() {
        assert!(matches!(
            parse_json_object("[{\"type\": \"shirt\"}]"),
            Err(ClientError::MalformedResponse(message)) if message.contains("an array")
        ));
        assert!(matches!(
            parse_json_object("\"shirt\""),
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[test]
    fn classification_requires_type() {
        assert!(matches!(
            normalize_classification("{\"colors\": [\"red\"]}"),
            Err(ClientError::MalformedResponse(message)) if message.contains("\"type\"")
        ));
        assert!(matches!(
            normalize_classification("{\"type\": \"  \"}"),
            Err(ClientError::MalformedResponse(_))
        ));
    }

    #[test]
    fn classification_keeps_payload_and_promotes_aliases() -> anyhow::Result<()> {
        let analysis = normalize_classification("{\"type\":\"dress\",\"colors\":[\"red\"]}")?;
        assert_eq!(analysis, obj(json!({"type": "dress", "colors": ["red"]})));

        let aliased = normalize_classification("{\"clothing_type\": \"coat\"}")?;
        assert_eq!(aliased, obj(json!({"clothing_type": "coat", "type": "coat"})));
        Ok(())
    }

    #[test]
    fn candidate_text_joins_non_thought_parts() -> anyhow::Result<()> {
        let body = json!({
            "candidates": [{
                "content": {"parts": [
                    {"text": "thinking...", "thought": true},
                    {"text": "```json\n{\"type\": "},
                    {"text": "\"shirt\"}\n```"}
                ]},
                "finishReason": "STOP"
            }, {
                "content": {"parts": [{"text": "ignored"}]}
            }]
        });
        let text = extract_candidate_text(&body.to_string())?;
        assert_eq!(text, "```json\n{\"type\": \"shirt\"}\n```");
        Ok(())
    }

    #[test]
    fn candidate_text_errors_are_malformed() {
        assert!(matches!(
            extract_candidate_text("<html>"),
            Err(ClientError::MalformedResponse(message)) if message.contains("invalid JSON")
        ));
        assert!(matches!(
            extract_candidate_text(&json!({"promptFeedback": {"blockReason": "SAFETY"}}).to_string()),
            Err(ClientError::MalformedResponse(message)) if message.contains("SAFETY")
        ));
        assert!(matches!(
            extract_candidate_text(
                &json!({"candidates": [{"content": {"parts": []}, "finishReason": "MAX_TOKENS"}]})
                    .to_string()
            ),
            Err(ClientError::MalformedResponse(message)) if message.contains("MAX_TOKENS")
        ));
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }
}
