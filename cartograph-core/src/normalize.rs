//! Reduce raw agent output to one authoritative result.
//!
//! Agent output is a transcript of newline-delimited JSON records (progress,
//! tool use, assistant turns) ending, when all goes well, in a record of type
//! `result`. Only the last such record counts. Its `result` text may wrap the
//! payload in a markdown ```` ```json ```` fence, may be plain prose, or may be
//! missing entirely.

use serde_json::Value;
use tracing::debug;

/// Classification of one agent response.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedResult {
    /// The result payload parsed as JSON.
    Structured(Value),
    /// Text that is not JSON: prose, or output with no result record.
    Unstructured(String),
    /// Nothing usable at all.
    Empty,
    /// The result record carried the error flag.
    Rejected(String),
}

impl NormalizedResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Structured(_) => "structured",
            Self::Unstructured(_) => "unstructured",
            Self::Empty => "empty",
            Self::Rejected(_) => "rejected",
        }
    }
}

#[derive(Debug)]
struct ResultRecord {
    result: Option<Value>,
    is_error: bool,
    subtype: Option<String>,
}

pub fn normalize(raw: &str) -> NormalizedResult {
    let mut last = None;
    let mut parsed_any = false;

    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(value) => {
                parsed_any = true;
                if let Some(record) = last_result_in(value) {
                    last = Some(record);
                }
            }
            Err(e) => debug!(line = idx + 1, error = %e, "Ignoring unparseable agent output line"),
        }
    }

    // A pretty-printed document spans lines; give the whole text one chance.
    if last.is_none() && !parsed_any {
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            last = last_result_in(value);
        }
    }

    let Some(record) = last else {
        let trimmed = raw.trim();
        return if trimmed.is_empty() {
            NormalizedResult::Empty
        } else {
            NormalizedResult::Unstructured(trimmed.to_string())
        };
    };

    if record.is_error {
        let reason = match (&record.result, &record.subtype) {
            (Some(Value::String(s)), _) if !s.trim().is_empty() => s.trim().to_string(),
            (_, Some(subtype)) => subtype.clone(),
            _ => "agent reported an error".to_string(),
        };
        return NormalizedResult::Rejected(reason);
    }

    let text = match record.result {
        None | Some(Value::Null) => "{}".to_string(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    };
    let payload = extract_json_fence(&text).unwrap_or(&text);

    match serde_json::from_str::<Value>(payload.trim()) {
        Ok(value) => NormalizedResult::Structured(value),
        Err(_) => NormalizedResult::Unstructured(payload.to_string()),
    }
}

/// Last `result` record in a value. Arrays are searched element-wise so a
/// transcript emitted as one JSON array behaves like one record per line.
fn last_result_in(value: Value) -> Option<ResultRecord> {
    match value {
        Value::Array(items) => items.into_iter().rev().find_map(as_result),
        other => as_result(other),
    }
}

/// Side fields of a `result` record are read loosely: a mistyped
/// `is_error` or `subtype` never discards the record itself.
fn as_result(value: Value) -> Option<ResultRecord> {
    let Value::Object(mut fields) = value else {
        return None;
    };
    if fields.get("type").and_then(Value::as_str) != Some("result") {
        return None;
    }
    let is_error = matches!(fields.get("is_error"), Some(Value::Bool(true)));
    let subtype = match fields.remove("subtype") {
        Some(Value::String(s)) => Some(s),
        Some(other) => {
            debug!(subtype = %other, "Ignoring non-string result subtype");
            None
        }
        None => None,
    };
    Some(ResultRecord {
        result: fields.remove("result"),
        is_error,
        subtype,
    })
}

/// Body of the first ```` ```json ```` fence, if any. An unterminated fence
/// runs to the end of the text.
pub fn extract_json_fence(text: &str) -> Option<&str> {
    const OPEN: &str = "```json";
    const CLOSE: &str = "```";

    let start = text.find(OPEN)? + OPEN.len();
    let body = &text[start..];
    let body = match body.find('\n') {
        // Anything on the fence line after the tag is an info string.
        Some(nl) if body[..nl].trim().is_empty() => &body[nl + 1..],
        _ => body,
    };
    let end = body.find(CLOSE).unwrap_or(body.len());
    Some(body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn progress_then_fenced_result_is_structured() {
        let raw = concat!(
            "{\"type\":\"progress\",\"message\":\"working\"}\n",
            "{\"type\":\"result\",\"result\":\"```json\\n{\\\"risk_level\\\":\\\"high\\\"}\\n```\"}\n",
        );
        assert_eq!(
            normalize(raw),
            NormalizedResult::Structured(json!({"risk_level": "high"}))
        );
    }

    #[test]
    fn plain_text_is_unstructured() {
        assert_eq!(
            normalize("plain text, no JSON"),
            NormalizedResult::Unstructured("plain text, no JSON".into())
        );
    }

    #[test]
    fn empty_and_blank_output_is_empty() {
        assert_eq!(normalize(""), NormalizedResult::Empty);
        assert_eq!(normalize("  \n\t\n"), NormalizedResult::Empty);
    }

    #[test]
    fn last_result_record_wins() {
        let raw = "{\"type\":\"result\",\"result\":\"{\\\"n\\\":1}\"}\n\
                   {\"type\":\"assistant\"}\n\
                   {\"type\":\"result\",\"result\":\"{\\\"n\\\":2}\"}";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!({"n": 2})));
    }

    #[test]
    fn unparseable_lines_are_ignored() {
        let raw = "starting up...\n{not json\n{\"type\":\"result\",\"result\":\"[1,2]\"}";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!([1, 2])));
    }

    #[test]
    fn json_without_result_record_is_unstructured_raw() {
        let raw = "{\"type\":\"progress\"}";
        assert_eq!(normalize(raw), NormalizedResult::Unstructured(raw.into()));
    }

    #[test]
    fn missing_result_field_defaults_to_empty_object() {
        let raw = "{\"type\":\"result\",\"subtype\":\"success\"}";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!({})));
    }

    #[test]
    fn mistyped_side_fields_keep_the_record() {
        let raw = "{\"type\":\"result\",\"subtype\":7,\"result\":\"{\\\"a\\\":1}\"}";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!({"a": 1})));

        let raw = json!({"type": "result", "is_error": null, "result": "{\"a\":1}"}).to_string();
        assert_eq!(normalize(&raw), NormalizedResult::Structured(json!({"a": 1})));

        let raw = json!({"type": "result", "is_error": "true", "result": "[]"}).to_string();
        assert_eq!(normalize(&raw), NormalizedResult::Structured(json!([])));
    }

    #[test]
    fn blank_result_text_is_unstructured() {
        let raw = json!({"type": "result", "result": "   "}).to_string();
        assert_eq!(normalize(&raw), NormalizedResult::Unstructured("   ".into()));

        let raw = json!({"type": "result", "result": "```json\n```"}).to_string();
        assert_eq!(normalize(&raw), NormalizedResult::Unstructured(String::new()));
    }

    #[test]
    fn prose_result_is_unstructured_text() {
        let raw = "{\"type\":\"result\",\"result\":\"Updated three docs.\"}";
        assert_eq!(
            normalize(raw),
            NormalizedResult::Unstructured("Updated three docs.".into())
        );
    }

    #[test]
    fn error_flag_is_rejected() {
        let raw = "{\"type\":\"result\",\"is_error\":true,\"subtype\":\"error_max_turns\"}";
        assert_eq!(
            normalize(raw),
            NormalizedResult::Rejected("error_max_turns".into())
        );

        let raw = "{\"type\":\"result\",\"is_error\":true,\"result\":\"credit exhausted\"}";
        assert_eq!(
            normalize(raw),
            NormalizedResult::Rejected("credit exhausted".into())
        );
    }

    #[test]
    fn transcript_array_takes_last_result() {
        let raw = json!([
            {"type": "system", "subtype": "init"},
            {"type": "result", "result": "{\"n\":1}"},
            {"type": "result", "result": "{\"n\":2}"},
            {"type": "assistant"}
        ])
        .to_string();
        assert_eq!(normalize(&raw), NormalizedResult::Structured(json!({"n": 2})));
    }

    #[test]
    fn pretty_printed_record_is_accepted() {
        let raw = "{\n  \"type\": \"result\",\n  \"result\": \"{\\\"ok\\\": true}\"\n}\n";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!({"ok": true})));
    }

    #[test]
    fn non_string_result_is_used_directly() {
        let raw = "{\"type\":\"result\",\"result\":{\"nodes\":[]}}";
        assert_eq!(normalize(raw), NormalizedResult::Structured(json!({"nodes": []})));
    }

    #[test]
    fn fence_extraction_variants() {
        assert_eq!(extract_json_fence("a ```json\n{}\n``` b"), Some("{}"));
        assert_eq!(extract_json_fence("```json {\"x\":1}```"), Some("{\"x\":1}"));
        assert_eq!(extract_json_fence("```json\n[1]"), Some("[1]"));
        assert_eq!(extract_json_fence("```\n{}\n```"), None);
    }

    #[test]
    fn fenced_prose_stays_unstructured() {
        let raw = json!({"type": "result", "result": "Here:\n```json\nnot really json\n```"}).to_string();
        assert_eq!(
            normalize(&raw),
            NormalizedResult::Unstructured("not really json".into())
        );
    }
}
