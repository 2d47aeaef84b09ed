// Shared pieces for rendering stage prompts. Rendering is deterministic:
// the same inputs always produce the same prompt text.

use serde::Serialize;

/// Longest prefix of `s` no longer than `max` bytes, cut on a char boundary.
pub fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Pretty JSON for embedding in a prompt. Map keys serialize in a fixed order
/// because every type fed through here uses ordered collections.
pub fn json_block<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string())
}

/// Comma-separated list, or `(none)`.
pub fn join_or_none<I, S>(items: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let joined = items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        "(none)".to_string()
    } else {
        joined
    }
}

/// Closing instruction shared by every stage that expects JSON back.
pub fn respond_with_json(schema: &str) -> String {
    format!(
        "Respond with a single JSON object inside a ```json fenced block and nothing else.\n\
         Schema:\n{schema}\n"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");
        assert_eq!(truncate("abc", 0), "");
    }

    #[test]
    fn join_or_none_placeholder() {
        assert_eq!(join_or_none(Vec::<String>::new()), "(none)");
        assert_eq!(join_or_none(["a.py", "b.py"]), "a.py, b.py");
    }

    #[test]
    fn json_block_is_stable() {
        let mut map = std::collections::BTreeMap::new();
        map.insert("b", 2);
        map.insert("a", 1);
        assert_eq!(json_block(&map), "{\n  \"a\": 1,\n  \"b\": 2\n}");
    }
}
