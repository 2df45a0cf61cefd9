//! Deterministic JSON cleanup helpers, ported from the original
//! implementation's `json_repair.py`. The LLM sometimes returns JSON
//! surrounded by prose or markdown fences, or emits invalid JSON due to
//! literal newlines inside strings. These helpers only ever extract and
//! sanitize text — they never evaluate or execute anything.

/// If the entire text is a fenced code block (```` ``` ```` or ```` ```json
/// ````), returns the inner content with a trailing closing fence found on
/// its own line, scanning backward. Otherwise returns the input unchanged.
pub fn strip_markdown_code_fences(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let s = text.trim();
    if !s.starts_with("```") {
        return text.to_string();
    }

    let lines: Vec<&str> = s.lines().collect();
    if lines.len() < 2 {
        return text.to_string();
    }

    let first = lines[0].trim();
    if !first.starts_with("```") {
        return text.to_string();
    }

    let mut end_idx = None;
    for i in (1..lines.len()).rev() {
        if lines[i].trim() == "```" {
            end_idx = Some(i);
            break;
        }
    }
    let Some(end_idx) = end_idx else {
        return text.to_string();
    };
    if end_idx == 0 {
        return text.to_string();
    }

    lines[1..end_idx].join("\n").trim_matches('\n').to_string()
}

/// Returns the byte-offset (start, end_inclusive) span of the first
/// balanced JSON object/array in `text`, respecting JSON string/escape
/// state so braces inside string literals don't confuse the bracket
/// matcher. Returns `None` if no balanced span is found.
fn extract_first_json_span(text: &str) -> Option<(usize, usize)> {
    if text.is_empty() {
        return None;
    }

    let chars: Vec<char> = text.chars().collect();
    let start = chars.iter().position(|&c| c == '{' || c == '[')?;

    let mut stack: Vec<char> = Vec::new();
    let mut in_string = false;
    let mut escape = false;

    for (j, &ch) in chars.iter().enumerate().skip(start) {
        if in_string {
            if escape {
                escape = false;
                continue;
            }
            if ch == '\\' {
                escape = true;
                continue;
            }
            if ch == '"' {
                in_string = false;
            }
            continue;
        }

        if ch == '"' {
            in_string = true;
            continue;
        }

        if ch == '{' || ch == '[' {
            stack.push(ch);
            continue;
        }

        if ch == '}' || ch == ']' {
            let opener = match stack.last() {
                Some(&o) => o,
                None => return None,
            };
            let expected = if opener == '{' { '}' } else { ']' };
            if ch != expected {
                return None;
            }
            stack.pop();
            if stack.is_empty() {
                return Some((start, j));
            }
            continue;
        }
    }

    None
}

/// Extracts the first top-level JSON object/array from `text` as an owned
/// substring, or `None` if no balanced span is found.
pub fn extract_first_json_value(text: &str) -> Option<String> {
    let (start, end) = extract_first_json_span(text)?;
    let chars: Vec<char> = text.chars().collect();
    Some(chars[start..=end].iter().collect())
}

/// Escapes unescaped literal newlines/carriage-returns that occur *inside*
/// JSON string literals. JSON strings cannot contain literal newline
/// characters; models sometimes emit them anyway. Everything outside
/// strings, including structural whitespace, is left untouched.
pub fn sanitize_json_text(raw: &str) -> String {
    if raw.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escape = false;

    for ch in raw.chars() {
        if in_string {
            if escape {
                out.push(ch);
                escape = false;
                continue;
            }
            if ch == '\\' {
                out.push(ch);
                escape = true;
                continue;
            }
            if ch == '"' {
                in_string = false;
                out.push(ch);
                continue;
            }
            if ch == '\n' {
                out.push_str("\\n");
                continue;
            }
            if ch == '\r' {
                out.push_str("\\r");
                continue;
            }
            out.push(ch);
            continue;
        }

        if ch == '"' {
            in_string = true;
        }
        out.push(ch);
    }

    out
}

/// Full repair pipeline applied by the gateway before giving up on a
/// response and issuing a schema-repair follow-up call (§4.3).
pub fn repair_pipeline(raw: &str) -> Option<String> {
    let sanitized = sanitize_json_text(raw);
    let defenced = strip_markdown_code_fences(&sanitized);
    extract_first_json_value(&defenced)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_tagged_fence() {
        let input = "```json\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_markdown_code_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn strips_untagged_fence() {
        let input = "```\n{\"key\": \"value\"}\n```";
        assert_eq!(strip_markdown_code_fences(input), "{\"key\": \"value\"}");
    }

    #[test]
    fn leaves_unfenced_text_unchanged() {
        let input = "{\"key\": \"value\"}";
        assert_eq!(strip_markdown_code_fences(input), input);
    }

    #[test]
    fn extracts_first_balanced_object_ignoring_prose() {
        let input = "Sure, here you go: {\"a\": 1, \"b\": [1,2,3]} thanks!";
        assert_eq!(
            extract_first_json_value(input).unwrap(),
            "{\"a\": 1, \"b\": [1,2,3]}"
        );
    }

    #[test]
    fn extractor_ignores_braces_inside_strings() {
        let input = r#"{"note": "use { and } carefully"}"#;
        assert_eq!(extract_first_json_value(input).unwrap(), input);
    }

    #[test]
    fn extractor_returns_none_without_balanced_span() {
        assert_eq!(extract_first_json_value("no json here"), None);
        assert_eq!(extract_first_json_value("{\"a\": 1"), None);
    }

    #[test]
    fn sanitize_escapes_only_newlines_inside_strings() {
        let input = "{\n  \"text\": \"line one\nline two\"\n}";
        let sanitized = sanitize_json_text(input);
        let parsed: serde_json::Value = serde_json::from_str(&sanitized).unwrap();
        assert_eq!(parsed["text"], "line one\nline two");
    }

    #[test]
    fn repair_pipeline_recovers_fenced_json_with_embedded_newline() {
        let input = "```json\n{\"text\": \"a\nb\"}\n```";
        let repaired = repair_pipeline(input).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        assert_eq!(parsed["text"], "a\nb");
    }

    #[test]
    fn repair_pipeline_matches_direct_parse_for_clean_json() {
        let clean = "{\"a\": 1}";
        let fenced = "```json\n{\"a\": 1}\n```";
        let repaired = repair_pipeline(fenced).unwrap();
        let a: serde_json::Value = serde_json::from_str(&repaired).unwrap();
        let b: serde_json::Value = serde_json::from_str(clean).unwrap();
        assert_eq!(a, b);
    }
}
