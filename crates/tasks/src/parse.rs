//! Two-stage JSON reply parsing.
//!
//! Models asked for JSON frequently wrap it in prose ("Sure! Here's the
//! plan: {...}"). Stage one parses the whole reply strictly; stage two
//! extracts the first balanced top-level object and parses that. Callers
//! decide what a double miss means (degrade, fall back, or error).

use serde_json::Value;

/// Stage one: the entire reply (trimmed) must be valid JSON.
pub fn parse_strict(reply: &str) -> Option<Value> {
    serde_json::from_str(reply.trim()).ok()
}

/// Stage two: the first balanced `{...}` substring, brace-counted with
/// awareness of string literals and escapes so braces inside quoted text
/// don't skew the depth.
pub fn extract_braced(reply: &str) -> Option<&str> {
    let bytes = reply.as_bytes();
    let start = reply.find('{')?;

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&reply[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Both stages: strict parse, then balanced-object extraction.
pub fn parse_reply(reply: &str) -> Option<Value> {
    parse_strict(reply).or_else(|| extract_braced(reply).and_then(parse_strict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strict_json_parses_directly() {
        assert_eq!(parse_reply(r#"{"a": 1}"#), Some(json!({"a": 1})));
        assert_eq!(parse_reply("  {\"a\": 1}\n"), Some(json!({"a": 1})));
    }

    #[test]
    fn prose_wrapped_object_is_extracted() {
        let reply = r#"Sure, here's what you asked for: {"answer": 42}. Anything else?"#;
        assert_eq!(parse_reply(reply), Some(json!({"answer": 42})));
    }

    #[test]
    fn nested_objects_stay_balanced() {
        let reply = r#"Result: {"outer": {"inner": [1, 2]}} done"#;
        assert_eq!(
            parse_reply(reply),
            Some(json!({"outer": {"inner": [1, 2]}}))
        );
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_the_scan() {
        let reply = r#"{"text": "a } b { c", "n": 1}"#;
        assert_eq!(
            parse_reply(reply),
            Some(json!({"text": "a } b { c", "n": 1}))
        );

        let wrapped = format!("prefix {reply} suffix");
        assert_eq!(
            parse_reply(&wrapped),
            Some(json!({"text": "a } b { c", "n": 1}))
        );
    }

    #[test]
    fn escaped_quotes_inside_strings() {
        let reply = r#"note: {"quote": "she said \"hi }\" then left"}"#;
        assert!(parse_reply(reply).is_some());
    }

    #[test]
    fn no_object_at_all_is_none() {
        assert_eq!(parse_reply("just some prose"), None);
        assert_eq!(parse_reply(""), None);
    }

    #[test]
    fn unbalanced_object_is_none() {
        assert_eq!(parse_reply(r#"broken {"a": 1"#), None);
    }

    #[test]
    fn extracted_garbage_is_none() {
        // Balanced braces but not JSON.
        assert_eq!(parse_reply("see {not json here} ok"), None);
    }
}
