//! Turns raw generator text into a validated operation list.
//!
//! Generators are asked for strict JSON but frequently wrap it in markdown
//! fences, prepend prose, or ship minor syntax damage. Parsing is therefore
//! forgiving about the envelope and strict about the schema: anything that
//! survives extraction must deserialize into known operations.

use crate::ops::PatchOps;
use anyhow::{anyhow, Result};

/// Strip markdown code fences from a response
fn strip_markdown_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let clean = if let Some(rest) = trimmed.strip_prefix("```json") {
        rest
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest
    } else {
        trimmed
    };
    let clean = clean.strip_suffix("```").unwrap_or(clean);
    clean.trim()
}

/// Extract the first balanced `{...}` fragment, ignoring braces inside
/// strings and escaped quotes.
fn extract_json_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;
    let mut start_idx = None;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        if c == '\\' && in_string {
            escape_next = true;
            continue;
        }
        if c == '"' {
            in_string = !in_string;
            continue;
        }
        if in_string {
            continue;
        }

        if c == '{' {
            if depth == 0 {
                start_idx = Some(i);
            }
            depth += 1;
        } else if c == '}' {
            if depth == 0 {
                continue;
            }
            depth -= 1;
            if depth == 0 {
                if let Some(start) = start_idx {
                    return Some(&text[start..=i]);
                }
            }
        }
    }
    None
}

/// Repair common model mistakes: trailing commas, smart quotes, stray
/// control characters.
fn repair_json(json: &str) -> String {
    let mut fixed = json.to_string();

    fixed = fixed.replace(",]", "]");
    fixed = fixed.replace(",}", "}");

    fixed = fixed.replace('\u{201C}', "\"");
    fixed = fixed.replace('\u{201D}', "\"");
    fixed = fixed.replace('\u{2018}', "'");
    fixed = fixed.replace('\u{2019}', "'");

    fixed
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .collect()
}

/// Parse a generator reply into a validated operation list.
///
/// Error messages stay clean of the raw reply; callers log the original
/// separately if they need it.
pub fn parse_ops_response(raw: &str) -> Result<PatchOps> {
    let stripped = strip_markdown_fences(raw);
    let fragment = extract_json_object(stripped)
        .ok_or_else(|| anyhow!("generator response contains no JSON object"))?;

    match serde_json::from_str::<PatchOps>(fragment) {
        Ok(ops) => Ok(ops),
        Err(first_err) => {
            let repaired = repair_json(fragment);
            serde_json::from_str::<PatchOps>(&repaired).map_err(|_| {
                anyhow!(
                    "generator response is not a valid operation list: {}",
                    first_err
                )
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::EditOp;

    const VALID_OPS: &str = r#"{"ops": [
        {"type": "insert_after", "path": "src/a.ts", "anchor": "return x;", "code": "\nlog();"}
    ]}"#;

    #[test]
    fn parses_clean_json() {
        let ops = parse_ops_response(VALID_OPS).unwrap();
        assert_eq!(ops.ops.len(), 1);
    }

    #[test]
    fn strips_markdown_fences() {
        let wrapped = format!("```json\n{VALID_OPS}\n```");
        let ops = parse_ops_response(&wrapped).unwrap();
        assert_eq!(ops.ops.len(), 1);
    }

    #[test]
    fn extracts_object_from_surrounding_prose() {
        let chatty = format!("Here is the patch you asked for:\n\n{VALID_OPS}\n\nGood luck!");
        let ops = parse_ops_response(&chatty).unwrap();
        assert_eq!(ops.ops.len(), 1);
    }

    #[test]
    fn repairs_trailing_commas() {
        let damaged =
            r#"{"ops": [{"type": "append_if_missing", "path": "a.ts", "mustContain": "x", "code": "x()",},]}"#;
        let ops = parse_ops_response(damaged).unwrap();
        assert_eq!(ops.ops[0].kind(), "append_if_missing");
    }

    #[test]
    fn braces_inside_strings_do_not_confuse_extraction() {
        let tricky = r#"{"ops": [
            {"type": "insert_before", "path": "a.ts", "anchor": "fn main() {", "code": "// {not a brace}\n"}
        ]}"#;
        let ops = parse_ops_response(tricky).unwrap();
        match &ops.ops[0] {
            EditOp::InsertBefore { anchor, .. } => assert_eq!(anchor, "fn main() {"),
            other => panic!("unexpected op: {:?}", other),
        }
    }

    #[test]
    fn unknown_operation_is_a_schema_error() {
        let bad = r#"{"ops": [{"type": "rewrite_everything", "path": "a.ts"}]}"#;
        let err = parse_ops_response(bad).unwrap_err();
        assert!(err.to_string().contains("not a valid operation list"));
    }

    #[test]
    fn error_for_non_json_is_user_friendly() {
        let raw = "I could not figure out what to do, sorry!";
        let err = parse_ops_response(raw).unwrap_err();
        let msg = err.to_string();
        assert!(!msg.contains("could not figure out"));
        assert!(msg.contains("JSON"));
    }

    #[test]
    fn empty_ops_list_parses_and_is_left_to_the_caller() {
        let ops = parse_ops_response(r#"{"ops": []}"#).unwrap();
        assert!(ops.ops.is_empty());
    }
}
