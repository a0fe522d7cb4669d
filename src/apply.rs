//! Applies edit operations to file content and to the working tree.
//!
//! Operations are grouped by target path in first-touch order and applied
//! sequentially; each operation sees the output of the previous one for the
//! same path. A failing operation aborts that path immediately. Disk writes
//! happen only after every operation for a path has succeeded, so a
//! mid-sequence failure leaves no on-disk trace for that file. Atomicity is
//! per file, not across files.

use crate::anchor::{find_anchor, MatchStrategy};
use crate::error::PatchError;
use crate::ops::{EditOp, FileChange};
use crate::util::resolve_repo_path_allow_new;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Apply a single operation to in-memory content.
pub fn apply_op_to_content(
    content: &str,
    op: &EditOp,
    strategy: MatchStrategy,
) -> Result<String, PatchError> {
    match op {
        EditOp::InsertAfter {
            anchor, code, occur, ..
        } => {
            let hit = find_anchor(content, anchor, *occur, strategy).ok_or_else(|| {
                PatchError::AnchorNotFound {
                    op: "insert_after",
                    anchor: anchor.clone(),
                }
            })?;
            let at = clamp_to_char_boundary(content, hit.offset + anchor.len());
            Ok(splice(content, at, at, code))
        }
        EditOp::InsertBefore {
            anchor, code, occur, ..
        } => {
            let hit = find_anchor(content, anchor, *occur, strategy).ok_or_else(|| {
                PatchError::AnchorNotFound {
                    op: "insert_before",
                    anchor: anchor.clone(),
                }
            })?;
            Ok(splice(content, hit.offset, hit.offset, code))
        }
        EditOp::ReplaceBetween {
            start, end, code, ..
        } => {
            let start_idx = content
                .find(start.as_str())
                .ok_or_else(|| PatchError::StartMarkerNotFound {
                    marker: start.clone(),
                })?;
            let after_start = start_idx + start.len();
            // The end marker is only valid past the start match, so inverted
            // markers fail here instead of replacing the wrong span.
            let end_idx = content[after_start..]
                .find(end.as_str())
                .map(|i| after_start + i)
                .ok_or_else(|| PatchError::EndMarkerNotFound {
                    marker: end.clone(),
                })?;
            Ok(splice(content, after_start, end_idx, code))
        }
        EditOp::AppendIfMissing {
            must_contain, code, ..
        } => {
            if content.contains(must_contain.as_str()) {
                return Ok(content.to_string());
            }
            Ok(append_block(content, code))
        }
        EditOp::UpsertImport { spec, from, .. } => Ok(upsert_import(content, spec, from)),
    }
}

/// Sequentially apply all operations for one path.
pub fn apply_ops_to_content(
    content: &str,
    ops: &[&EditOp],
    strategy: MatchStrategy,
) -> Result<String, PatchError> {
    let mut current = content.to_string();
    for op in ops {
        current = apply_op_to_content(&current, op, strategy)?;
    }
    Ok(current)
}

/// Apply all operations against an in-memory view of the tree, producing a
/// `FileChange` per path whose content actually changed. Nothing touches
/// disk; this is the view handed to validation.
pub fn plan_changes(
    repo_root: &Path,
    ops: &[EditOp],
    strategy: MatchStrategy,
) -> Result<Vec<FileChange>, PatchError> {
    let mut changes = Vec::new();
    for (path, file_ops) in group_by_path(ops) {
        let resolved = resolve_repo_path_allow_new(repo_root, path)?;
        let before = read_or_empty(&resolved.absolute, path)?;
        let after = apply_ops_to_content(&before, &file_ops, strategy)?;
        if after != before {
            changes.push(FileChange {
                path: path.to_string(),
                before,
                after,
            });
        }
    }
    Ok(changes)
}

/// Apply operations directly to the working tree.
///
/// Each file is written as soon as all of its own operations succeed. A
/// failure mid-run leaves earlier, fully-processed files in place and the
/// failing file untouched.
pub fn apply_in_place(
    repo_root: &Path,
    ops: &[EditOp],
    strategy: MatchStrategy,
) -> Result<Vec<FileChange>, PatchError> {
    let mut changed = Vec::new();
    for (path, file_ops) in group_by_path(ops) {
        let resolved = resolve_repo_path_allow_new(repo_root, path)?;
        let before = read_or_empty(&resolved.absolute, path)?;
        let after = apply_ops_to_content(&before, &file_ops, strategy)?;
        if after != before {
            write_file(&resolved.absolute, &after).map_err(|e| PatchError::WriteFailed {
                path: path.to_string(),
                reason: e.to_string(),
            })?;
            changed.push(FileChange {
                path: path.to_string(),
                before,
                after,
            });
        }
    }
    Ok(changed)
}

/// Write previously planned changes to the tree, creating parent directories
/// as needed. Only `after` content is written; files are never deleted.
pub fn write_changes(repo_root: &Path, changes: &[FileChange]) -> anyhow::Result<()> {
    use anyhow::Context;
    for change in changes {
        let resolved = resolve_repo_path_allow_new(repo_root, &change.path)
            .map_err(|e| anyhow::anyhow!(e.to_string()))?;
        write_file(&resolved.absolute, &change.after)
            .with_context(|| format!("failed to write {}", change.path))?;
    }
    Ok(())
}

/// Group operations by target path, preserving first-touch order.
fn group_by_path(ops: &[EditOp]) -> Vec<(&str, Vec<&EditOp>)> {
    let mut order: Vec<&str> = Vec::new();
    let mut grouped: HashMap<&str, Vec<&EditOp>> = HashMap::new();
    for op in ops {
        let path = op.path();
        if !grouped.contains_key(path) {
            order.push(path);
        }
        grouped.entry(path).or_default().push(op);
    }
    order
        .into_iter()
        .map(|path| {
            let file_ops = grouped.remove(path).unwrap_or_default();
            (path, file_ops)
        })
        .collect()
}

fn read_or_empty(absolute: &Path, rel: &str) -> Result<String, PatchError> {
    if !absolute.exists() {
        return Ok(String::new());
    }
    fs::read_to_string(absolute).map_err(|e| PatchError::ReadFailed {
        path: rel.to_string(),
        reason: e.to_string(),
    })
}

fn write_file(absolute: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = absolute.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(absolute, content)
}

fn splice(content: &str, start: usize, end: usize, insert: &str) -> String {
    let mut out = String::with_capacity(content.len() + insert.len());
    out.push_str(&content[..start]);
    out.push_str(insert);
    out.push_str(&content[end..]);
    out
}

/// Approximate anchor hits can push an insertion point past the content end
/// or into the middle of a multi-byte char; pull it back to a safe boundary.
fn clamp_to_char_boundary(content: &str, mut at: usize) -> usize {
    if at > content.len() {
        at = content.len();
    }
    while at > 0 && !content.is_char_boundary(at) {
        at -= 1;
    }
    at
}

/// Append a block at the end of the file with exactly one trailing newline.
fn append_block(content: &str, code: &str) -> String {
    let code_trimmed = code.trim_end_matches('\n');
    if content.is_empty() {
        return format!("{}\n", code_trimmed);
    }
    format!("{}\n{}\n", content.trim_end(), code_trimmed)
}

/// Insert `import {spec} from '{from}';` after any leading comment header,
/// unless a single-line import from that exact module path already exists.
/// Partial specifiers on an existing import line are never merged.
fn upsert_import(content: &str, spec: &str, from: &str) -> String {
    let pattern = format!(
        r#"(?m)^import\s+[^;]*\s+from\s+['"]{}['"];?\s*$"#,
        regex::escape(from)
    );
    // The pattern is built from an escaped literal, so compilation only fails
    // on pathological inputs; treat that as "no existing import".
    if let Ok(re) = Regex::new(&pattern) {
        if re.is_match(content) {
            return content.to_string();
        }
    }

    let import_line = format!("import {} from '{}';\n", spec, from);
    let header_end = leading_comment_header_end(content);
    splice(content, header_end, header_end, &import_line)
}

/// Byte offset of the first line that is not blank and not part of a leading
/// comment header (`//`, `/*`, or `*` continuation lines).
fn leading_comment_header_end(content: &str) -> usize {
    let mut offset = 0;
    for line in content.split_inclusive('\n') {
        let trimmed = line.trim_start();
        let is_header = trimmed.is_empty()
            || trimmed.starts_with("//")
            || trimmed.starts_with("/*")
            || trimmed.starts_with('*');
        if !is_header {
            return offset;
        }
        offset += line.len();
    }
    content.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn insert_after(path: &str, anchor: &str, code: &str) -> EditOp {
        EditOp::InsertAfter {
            path: path.to_string(),
            anchor: anchor.to_string(),
            code: code.to_string(),
            occur: 1,
        }
    }

    #[test]
    fn insert_after_places_code_after_first_anchor() {
        let content = "fn work() {\n  return result;\n}\nreturn result;\n";
        let op = insert_after("a.ts", "return result;", "\n  log('done');");
        let out = apply_op_to_content(content, &op, MatchStrategy::Lenient).unwrap();
        // exactly one inserted line, immediately after the first anchor
        assert_eq!(out.matches("log('done');").count(), 1);
        let anchor_idx = out.find("return result;").unwrap();
        let log_idx = out.find("log('done');").unwrap();
        assert!(log_idx > anchor_idx);
        assert!(log_idx < out.rfind("return result;").unwrap());
    }

    #[test]
    fn insert_after_is_reversible() {
        let content = "line one\nline two\nline three\n";
        let inserted = "INSERTED BLOCK";
        let op = insert_after("a.ts", "line two", inserted);
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        let restored = out.replacen(inserted, "", 1);
        assert_eq!(restored, content);
    }

    #[test]
    fn insert_before_places_code_at_anchor_start() {
        let content = "alpha beta";
        let op = EditOp::InsertBefore {
            path: "a.ts".to_string(),
            anchor: "beta".to_string(),
            code: "x-".to_string(),
            occur: 1,
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, "alpha x-beta");
    }

    #[test]
    fn second_occurrence_is_selected_not_first_or_third() {
        let content = "A one A two A three";
        let op = EditOp::InsertAfter {
            path: "a.ts".to_string(),
            anchor: "A".to_string(),
            code: "!".to_string(),
            occur: 2,
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, "A one A! two A three");
    }

    #[test]
    fn missing_anchor_fails_with_op_and_anchor_in_message() {
        let op = insert_after("a.ts", "nonexistent anchor", "code");
        let err = apply_op_to_content("content", &op, MatchStrategy::Lenient).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("insert_after"));
        assert!(msg.contains("nonexistent anchor"));
    }

    #[test]
    fn replace_between_keeps_markers_and_replaces_span() {
        let content = "head <<START>>old body<<END>> tail";
        let op = EditOp::ReplaceBetween {
            path: "a.ts".to_string(),
            start: "<<START>>".to_string(),
            end: "<<END>>".to_string(),
            code: "new body".to_string(),
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, "head <<START>>new body<<END>> tail");
    }

    #[test]
    fn replace_between_rejects_inverted_markers() {
        let content = "the END comes before the START here";
        let op = EditOp::ReplaceBetween {
            path: "a.ts".to_string(),
            start: "START".to_string(),
            end: "END".to_string(),
            code: "x".to_string(),
        };
        let err = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap_err();
        assert!(matches!(err, PatchError::EndMarkerNotFound { .. }));
    }

    #[test]
    fn replace_between_reports_missing_start() {
        let op = EditOp::ReplaceBetween {
            path: "a.ts".to_string(),
            start: "absent".to_string(),
            end: "also absent".to_string(),
            code: "x".to_string(),
        };
        let err = apply_op_to_content("content", &op, MatchStrategy::Strict).unwrap_err();
        assert!(matches!(err, PatchError::StartMarkerNotFound { .. }));
    }

    #[test]
    fn append_if_missing_appends_with_single_trailing_newline() {
        let op = EditOp::AppendIfMissing {
            path: "a.ts".to_string(),
            must_contain: "export function helper".to_string(),
            code: "export function helper() {}\n\n".to_string(),
        };
        let out = apply_op_to_content("const x = 1;\n\n\n", &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, "const x = 1;\nexport function helper() {}\n");
        assert!(!out.ends_with("\n\n"));
    }

    #[test]
    fn append_if_missing_skips_when_already_present() {
        let content = "export function helper() {}\n";
        let op = EditOp::AppendIfMissing {
            path: "a.ts".to_string(),
            must_contain: "function helper".to_string(),
            code: "export function helper() {}".to_string(),
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn upsert_import_inserts_after_comment_header() {
        let content = "// Module docs\n// more docs\n\nconst x = 1;\n";
        let op = EditOp::UpsertImport {
            path: "a.ts".to_string(),
            spec: "{ log }".to_string(),
            from: "./log".to_string(),
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(
            out,
            "// Module docs\n// more docs\n\nimport { log } from './log';\nconst x = 1;\n"
        );
    }

    #[test]
    fn upsert_import_is_idempotent() {
        let op = EditOp::UpsertImport {
            path: "a.ts".to_string(),
            spec: "{ log }".to_string(),
            from: "./log".to_string(),
        };
        let once = apply_op_to_content("const x = 1;\n", &op, MatchStrategy::Strict).unwrap();
        let twice = apply_op_to_content(&once, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.matches("from './log'").count(), 1);
    }

    #[test]
    fn upsert_import_does_not_merge_partial_specifiers() {
        // an import from the same path with a different specifier set is
        // left alone - never merged, never duplicated
        let content = "import { a } from './log';\nconst x = 1;\n";
        let op = EditOp::UpsertImport {
            path: "a.ts".to_string(),
            spec: "{ b }".to_string(),
            from: "./log".to_string(),
        };
        let out = apply_op_to_content(content, &op, MatchStrategy::Strict).unwrap();
        assert_eq!(out, content);
    }

    #[test]
    fn ops_for_same_path_see_previous_output() {
        let ops = vec![
            EditOp::AppendIfMissing {
                path: "a.ts".to_string(),
                must_contain: "helper".to_string(),
                code: "function helper() {}".to_string(),
            },
            insert_after("a.ts", "function helper()", " /* patched */"),
        ];
        let refs: Vec<&EditOp> = ops.iter().collect();
        let out = apply_ops_to_content("const x = 1;\n", &refs, MatchStrategy::Strict).unwrap();
        assert!(out.contains("function helper() /* patched */ {}"));
    }

    #[test]
    fn plan_changes_skips_files_with_identical_output() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "function helper() {}\n").unwrap();
        let ops = vec![EditOp::AppendIfMissing {
            path: "a.ts".to_string(),
            must_contain: "helper".to_string(),
            code: "function helper() {}".to_string(),
        }];
        let changes = plan_changes(dir.path(), &ops, MatchStrategy::Strict).unwrap();
        assert!(changes.is_empty());
    }

    #[test]
    fn plan_changes_never_touches_disk() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.ts"), "const x = 1;\n").unwrap();
        let ops = vec![insert_after("a.ts", "const x = 1;", "\nconst y = 2;")];
        let changes = plan_changes(dir.path(), &ops, MatchStrategy::Strict).unwrap();
        assert_eq!(changes.len(), 1);
        assert!(changes[0].after.contains("const y = 2;"));
        let on_disk = std::fs::read_to_string(dir.path().join("a.ts")).unwrap();
        assert_eq!(on_disk, "const x = 1;\n");
    }

    #[test]
    fn apply_in_place_is_atomic_per_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("first.ts"), "alpha\n").unwrap();
        std::fs::write(dir.path().join("second.ts"), "beta\n").unwrap();
        let ops = vec![
            insert_after("first.ts", "alpha", "\nalpha-patched"),
            // fails before second.ts is written, after an earlier op for the
            // same file already succeeded in memory
            insert_after("second.ts", "beta", "\nbeta-patched"),
            insert_after("second.ts", "never present", "x"),
        ];
        let err = apply_in_place(dir.path(), &ops, MatchStrategy::Strict).unwrap_err();
        assert!(matches!(err, PatchError::AnchorNotFound { .. }));

        // first.ts was fully processed and stays written
        let first = std::fs::read_to_string(dir.path().join("first.ts")).unwrap();
        assert!(first.contains("alpha-patched"));
        // second.ts failed mid-sequence and carries no trace
        let second = std::fs::read_to_string(dir.path().join("second.ts")).unwrap();
        assert_eq!(second, "beta\n");
    }

    #[test]
    fn write_changes_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let changes = vec![FileChange {
            path: "src/deep/module.ts".to_string(),
            before: String::new(),
            after: "export {};\n".to_string(),
        }];
        write_changes(dir.path(), &changes).unwrap();
        let written = std::fs::read_to_string(dir.path().join("src/deep/module.ts")).unwrap();
        assert_eq!(written, "export {};\n");
    }

    #[test]
    fn missing_target_file_starts_from_empty_content() {
        let dir = tempdir().unwrap();
        let ops = vec![EditOp::AppendIfMissing {
            path: "brand_new.ts".to_string(),
            must_contain: "anything".to_string(),
            code: "export const fresh = true;".to_string(),
        }];
        let changes = plan_changes(dir.path(), &ops, MatchStrategy::Strict).unwrap();
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].before, "");
        assert_eq!(changes[0].after, "export const fresh = true;\n");
    }
}
