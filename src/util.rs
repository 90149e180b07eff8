//! Shared text helpers.

/// Extract the outermost JSON object from text that may contain other content
/// (prose, markdown fences). Braces inside JSON string literals are ignored,
/// so embedded source code with unbalanced braces does not end the object early.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Keep at most the last `max_chars` characters of `text`, prefixed with an
/// ellipsis marker when anything was dropped. Toolchain failures put the
/// useful lines at the end.
pub fn truncate_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let skip = total - max_chars;
    let tail: String = text.chars().skip(skip).collect();
    format!("...{}", tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_json_object_simple() {
        let text = r#"{"key": "value"}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"key": "value"}"#));
    }

    #[test]
    fn test_extract_json_object_with_fences() {
        let text = "Here you go:\n```json\n{\"files\": {}}\n```\nEnjoy";
        assert_eq!(extract_json_object(text), Some("{\"files\": {}}"));
    }

    #[test]
    fn test_extract_json_object_nested() {
        let text = r#"{"outer": {"inner": "value"}} trailing"#;
        assert_eq!(
            extract_json_object(text),
            Some(r#"{"outer": {"inner": "value"}}"#)
        );
    }

    #[test]
    fn test_extract_json_object_ignores_braces_in_strings() {
        let text = r#"{"App.js": "const s = '}'; function f() { return \"{\"; }"} extra }"#;
        let extracted = extract_json_object(text).unwrap();
        assert!(extracted.ends_with(r#"}"}"#));
        let parsed: serde_json::Value = serde_json::from_str(extracted).unwrap();
        assert!(parsed["App.js"].as_str().unwrap().contains("'}'"));
    }

    #[test]
    fn test_extract_json_object_no_json() {
        assert_eq!(extract_json_object("No JSON here"), None);
    }

    #[test]
    fn test_extract_json_object_unclosed() {
        assert_eq!(extract_json_object(r#"{"key": "value""#), None);
    }

    #[test]
    fn test_truncate_tail_short_text_unchanged() {
        assert_eq!(truncate_tail("abc", 10), "abc");
    }

    #[test]
    fn test_truncate_tail_keeps_end() {
        assert_eq!(truncate_tail("0123456789", 4), "...6789");
    }
}
