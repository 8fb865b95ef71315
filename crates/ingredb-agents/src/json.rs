//! Recovers a JSON object from model output that may wrap it in prose,
//! code fences or trailing commentary.

use serde_json::{Map, Value};

/// Byte range of the balanced `{...}` group opening at `start`, honouring
/// string literals and escapes.
fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 { return Some(start + offset + c.len_utf8()); }
            }
            _ => {}
        }
    }
    None
}

/// First outermost balanced `{...}` in `text` that parses as a JSON object.
pub fn extract_json_object(text: &str) -> Option<Map<String, Value>> {
    let mut from = 0;
    while let Some(rel) = text[from..].find('{') {
        let start = from + rel;
        if let Some(end) = balanced_end(text, start) {
            if let Ok(Value::Object(map)) = serde_json::from_str(&text[start..end]) {
                return Some(map);
            }
        }
        from = start + 1;
    }
    None
}
