//! Lenient extraction of structured data from model text.
//!
//! Models wrap JSON in code fences, lead with prose, or trail with notes.
//! These helpers peel that off before handing the payload to serde.

use serde::de::DeserializeOwned;

/// Body of the first fenced code block, preferring a ```json fence.
/// Returns the input unchanged when no fence is present.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let (open, skip) = match trimmed.find("```json") {
        Some(i) => (i, "```json".len()),
        None => match trimmed.find("```") {
            Some(i) => (i, "```".len()),
            None => return trimmed,
        },
    };

    let body_start = open + skip;
    let rest = &trimmed[body_start..];
    match rest.find("```") {
        Some(close) => rest[..close].trim(),
        // Unterminated fence: everything after the opener.
        None => rest.trim(),
    }
}

/// Outermost JSON object in `raw`, or the trimmed input if none is balanced.
pub fn extract_json_object(raw: &str) -> &str {
    extract_delimited(raw, '{', '}')
}

/// Outermost JSON array in `raw`, or the trimmed input if none is balanced.
pub fn extract_json_array(raw: &str) -> &str {
    extract_delimited(raw, '[', ']')
}

fn extract_delimited(raw: &str, open: char, close: char) -> &str {
    let trimmed = raw.trim();
    if let Some(start) = trimmed.find(open) {
        let remainder = &trimmed[start..];
        if let Some(end) = find_matching(remainder, open, close) {
            return &remainder[..end];
        }
    }
    trimmed
}

/// Byte offset just past the delimiter closing the one at position 0.
/// Delimiters inside JSON strings are ignored.
fn find_matching(s: &str, open: char, close: char) -> Option<usize> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (i, c) in s.char_indices() {
        if escape {
            escape = false;
            continue;
        }
        if in_string {
            match c {
                '\\' => escape = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        } else if c == open {
            depth += 1;
        } else if c == close {
            depth -= 1;
            if depth == 0 {
                return Some(i + c.len_utf8());
            }
        }
    }
    None
}

/// Shape of the payload being extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JsonShape {
    Object,
    Array,
}

/// Parse `raw` as `T`, trying in order: the whole text, the fenced body,
/// and the outermost balanced object/array. Returns the first error if
/// every attempt fails.
pub fn parse_lenient<T: DeserializeOwned>(raw: &str, shape: JsonShape) -> Result<T, serde_json::Error> {
    let first_err = match serde_json::from_str::<T>(raw.trim()) {
        Ok(v) => return Ok(v),
        Err(e) => e,
    };

    let fenced = strip_code_fence(raw);
    if let Ok(v) = serde_json::from_str::<T>(fenced) {
        return Ok(v);
    }

    let candidate = match shape {
        JsonShape::Object => extract_json_object(fenced),
        JsonShape::Array => extract_json_array(fenced),
    };
    serde_json::from_str::<T>(candidate).map_err(|_| first_err)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fence() {
        let raw = "Here you go:\n```json\n{\"match\": false}\n```\nDone.";
        assert_eq!(strip_code_fence(raw), "{\"match\": false}");
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n[1, 2]\n```";
        assert_eq!(strip_code_fence(raw), "[1, 2]");
    }

    #[test]
    fn unfenced_text_is_trimmed_only() {
        assert_eq!(strip_code_fence("  {\"a\":1} \n"), "{\"a\":1}");
    }

    #[test]
    fn object_extraction_ignores_braces_in_strings() {
        let raw = r#"Verdict: {"match": false, "explanation": "uses {curly} text"} thanks"#;
        assert_eq!(
            extract_json_object(raw),
            r#"{"match": false, "explanation": "uses {curly} text"}"#
        );
    }

    #[test]
    fn array_extraction_handles_nested_objects() {
        let raw = r#"Examples: [{"text": "a b c d e", "label": true}, {"text": "f [g] h i j", "label": false}] end"#;
        let arr = extract_json_array(raw);
        assert!(arr.starts_with('[') && arr.ends_with(']'));
        let v: serde_json::Value = serde_json::from_str(arr).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);
    }

    #[test]
    fn escaped_quotes_do_not_end_string() {
        let raw = r#"{"explanation": "said \"}\" loudly", "match": true}"#;
        assert_eq!(extract_json_object(raw), raw);
    }

    #[test]
    fn parse_lenient_reads_prose_wrapped_object() {
        #[derive(serde::Deserialize)]
        struct Verdict {
            #[serde(rename = "match")]
            is_match: bool,
        }
        let v: Verdict =
            parse_lenient("Sure.\n{\"match\": true}\nHope that helps", JsonShape::Object).unwrap();
        assert!(v.is_match);
    }

    #[test]
    fn parse_lenient_fails_on_garbage() {
        let r: Result<serde_json::Value, _> = parse_lenient("no json here", JsonShape::Object);
        assert!(r.is_err());
    }
}
