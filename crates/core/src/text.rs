/// Truncates to at most `max_chars` characters without splitting a code point.
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    match value.char_indices().nth(max_chars) {
        Some((byte_index, _)) => value[..byte_index].to_string(),
        None => value.to_string(),
    }
}

/// The span from the first `{` to the last `}`. Provider output often wraps the
/// JSON payload in prose or code fences.
pub fn outermost_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

#[cfg(test)]
mod tests {
    use super::{outermost_json_object, truncate_chars};

    #[test]
    fn truncation_respects_char_boundaries() {
        assert_eq!(truncate_chars("ação concluída", 4), "ação");
        assert_eq!(truncate_chars("short", 50), "short");
        assert_eq!(truncate_chars("", 3), "");
    }

    #[test]
    fn outermost_object_ignores_surrounding_prose() {
        let raw = "Sure! Here is the plan:\n```json\n{\"actions\": [{\"a\": {}}]}\n```\nDone.";

        assert_eq!(outermost_json_object(raw), Some("{\"actions\": [{\"a\": {}}]}"));
    }

    #[test]
    fn outermost_object_is_none_without_braces() {
        assert_eq!(outermost_json_object("no json here"), None);
        assert_eq!(outermost_json_object("} backwards {"), None);
    }
}
