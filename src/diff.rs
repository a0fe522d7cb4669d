//! Unified diff construction, parsing and application.
//!
//! Diffs are built from full before/after content, so they are always
//! well-formed: generators never hand-write patch text that reaches a
//! version-control tool. The two abbreviated digests on the index line are
//! stable and distinct for given content but deliberately not real
//! repository object ids; downstream consumers only check that the patch is
//! well-formed and applies cleanly.

use crate::ops::FileChange;
use crate::util::normalize_newlines;
use anyhow::{anyhow, bail, Result};
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::path::Path;

const CONTEXT_LINES: usize = 3;
const FILE_MODE: &str = "100644";
const DIGEST_ABBREV_LEN: usize = 7;
const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// Beyond this many DP cells the line-matching pass falls back to replacing
/// the whole changed region in one hunk. Keeps pathological inputs bounded.
const LCS_CELL_BUDGET: usize = 4_000_000;

/// A single line in a diff hunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    Context(String),
    Add(String),
    Remove(String),
}

/// A hunk in a unified diff
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffHunk {
    pub old_start: usize,
    pub old_count: usize,
    pub new_start: usize,
    pub new_count: usize,
    pub lines: Vec<DiffLine>,
}

impl DiffHunk {
    /// Additions and removals in this hunk.
    pub fn summary(&self) -> (usize, usize) {
        let adds = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Add(_)))
            .count();
        let removes = self
            .lines
            .iter()
            .filter(|l| matches!(l, DiffLine::Remove(_)))
            .count();
        (adds, removes)
    }
}

/// A parsed unified diff for one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnifiedDiff {
    pub old_path: String,
    pub new_path: String,
    pub hunks: Vec<DiffHunk>,
    /// True when the old content's final line has no trailing newline.
    pub old_missing_final_newline: bool,
    /// True when the new content's final line has no trailing newline.
    pub new_missing_final_newline: bool,
}

impl UnifiedDiff {
    /// Total additions and removals.
    pub fn stats(&self) -> (usize, usize) {
        self.hunks.iter().fold((0, 0), |acc, h| {
            let (a, r) = h.summary();
            (acc.0 + a, acc.1 + r)
        })
    }
}

// ───────────────────────────────────────────────────────────────────────────
//  Construction
// ───────────────────────────────────────────────────────────────────────────

/// Short stable digest over a canonical `length + separator + content` byte
/// sequence. Distinct content yields distinct digests; nothing downstream
/// may treat them as repository object identities.
fn blob_digest(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {}\0", content.len()).as_bytes());
    hasher.update(content.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..DIGEST_ABBREV_LEN].to_string()
}

/// Split content into lines plus a flag for a missing final newline.
/// An empty file has zero lines and nothing to mark.
fn split_lines(content: &str) -> (Vec<&str>, bool) {
    if content.is_empty() {
        return (Vec::new(), false);
    }
    let missing_final_newline = !content.ends_with('\n');
    let mut lines: Vec<&str> = content.split('\n').collect();
    if !missing_final_newline {
        lines.pop();
    }
    (lines, missing_final_newline)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EditKind {
    Keep,
    Del,
    Ins,
}

#[derive(Debug, Clone, Copy)]
struct ScriptEntry {
    kind: EditKind,
    /// 0-based index into the old lines, when the entry consumes one.
    old_i: Option<usize>,
    /// 0-based index into the new lines, when the entry produces one.
    new_i: Option<usize>,
}

/// Line keys used for equality: the final line is decorated with its
/// trailing-newline status so a newline-only difference registers as a
/// change instead of a context line no patch tool would accept.
fn line_keys<'a>(lines: &[&'a str], missing_final_newline: bool) -> Vec<Cow<'a, str>> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            if missing_final_newline && i == lines.len() - 1 {
                Cow::Owned(format!("{}\u{0}", line))
            } else {
                Cow::Borrowed(*line)
            }
        })
        .collect()
}

/// Minimal line-level edit script: common prefix/suffix trim, then LCS over
/// the changed middle (whole-region replace when the middle is too large).
fn edit_script(old_keys: &[Cow<'_, str>], new_keys: &[Cow<'_, str>]) -> Vec<ScriptEntry> {
    let mut prefix = 0;
    while prefix < old_keys.len()
        && prefix < new_keys.len()
        && old_keys[prefix] == new_keys[prefix]
    {
        prefix += 1;
    }
    let mut suffix = 0;
    while suffix < old_keys.len() - prefix
        && suffix < new_keys.len() - prefix
        && old_keys[old_keys.len() - 1 - suffix] == new_keys[new_keys.len() - 1 - suffix]
    {
        suffix += 1;
    }

    let mut script = Vec::with_capacity(old_keys.len().max(new_keys.len()));
    for i in 0..prefix {
        script.push(ScriptEntry {
            kind: EditKind::Keep,
            old_i: Some(i),
            new_i: Some(i),
        });
    }

    let old_mid = &old_keys[prefix..old_keys.len() - suffix];
    let new_mid = &new_keys[prefix..new_keys.len() - suffix];
    append_middle_script(&mut script, old_mid, new_mid, prefix, prefix);

    for s in (0..suffix).rev() {
        script.push(ScriptEntry {
            kind: EditKind::Keep,
            old_i: Some(old_keys.len() - 1 - s),
            new_i: Some(new_keys.len() - 1 - s),
        });
    }
    script
}

fn append_middle_script(
    script: &mut Vec<ScriptEntry>,
    old_mid: &[Cow<'_, str>],
    new_mid: &[Cow<'_, str>],
    old_base: usize,
    new_base: usize,
) {
    if old_mid.is_empty() && new_mid.is_empty() {
        return;
    }

    if old_mid.len().saturating_mul(new_mid.len()) > LCS_CELL_BUDGET {
        for i in 0..old_mid.len() {
            script.push(ScriptEntry {
                kind: EditKind::Del,
                old_i: Some(old_base + i),
                new_i: None,
            });
        }
        for j in 0..new_mid.len() {
            script.push(ScriptEntry {
                kind: EditKind::Ins,
                old_i: None,
                new_i: Some(new_base + j),
            });
        }
        return;
    }

    // Classic LCS table over the changed region only.
    let rows = old_mid.len() + 1;
    let cols = new_mid.len() + 1;
    let mut table = vec![0u32; rows * cols];
    for i in (0..old_mid.len()).rev() {
        for j in (0..new_mid.len()).rev() {
            table[i * cols + j] = if old_mid[i] == new_mid[j] {
                table[(i + 1) * cols + j + 1] + 1
            } else {
                table[(i + 1) * cols + j].max(table[i * cols + j + 1])
            };
        }
    }

    let (mut i, mut j) = (0, 0);
    while i < old_mid.len() && j < new_mid.len() {
        if old_mid[i] == new_mid[j] {
            script.push(ScriptEntry {
                kind: EditKind::Keep,
                old_i: Some(old_base + i),
                new_i: Some(new_base + j),
            });
            i += 1;
            j += 1;
        } else if table[(i + 1) * cols + j] >= table[i * cols + j + 1] {
            script.push(ScriptEntry {
                kind: EditKind::Del,
                old_i: Some(old_base + i),
                new_i: None,
            });
            i += 1;
        } else {
            script.push(ScriptEntry {
                kind: EditKind::Ins,
                old_i: None,
                new_i: Some(new_base + j),
            });
            j += 1;
        }
    }
    while i < old_mid.len() {
        script.push(ScriptEntry {
            kind: EditKind::Del,
            old_i: Some(old_base + i),
            new_i: None,
        });
        i += 1;
    }
    while j < new_mid.len() {
        script.push(ScriptEntry {
            kind: EditKind::Ins,
            old_i: None,
            new_i: Some(new_base + j),
        });
        j += 1;
    }
}

/// Group script changes into hunks with `CONTEXT_LINES` lines of context,
/// merging changes whose gap would make contexts overlap.
fn build_hunks(script: &[ScriptEntry], old: &[&str], new: &[&str]) -> Vec<DiffHunk> {
    let change_positions: Vec<usize> = script
        .iter()
        .enumerate()
        .filter(|(_, e)| e.kind != EditKind::Keep)
        .map(|(i, _)| i)
        .collect();
    if change_positions.is_empty() {
        return Vec::new();
    }

    let mut groups: Vec<(usize, usize)> = Vec::new();
    let mut group_start = change_positions[0];
    let mut group_end = change_positions[0];
    for &pos in &change_positions[1..] {
        if pos - group_end <= 2 * CONTEXT_LINES {
            group_end = pos;
        } else {
            groups.push((group_start, group_end));
            group_start = pos;
            group_end = pos;
        }
    }
    groups.push((group_start, group_end));

    let mut hunks = Vec::with_capacity(groups.len());
    for (start, end) in groups {
        let lo = start.saturating_sub(CONTEXT_LINES);
        let hi = (end + CONTEXT_LINES).min(script.len() - 1);

        let old_before: usize = script[..lo].iter().filter(|e| e.old_i.is_some()).count();
        let new_before: usize = script[..lo].iter().filter(|e| e.new_i.is_some()).count();

        let mut lines = Vec::with_capacity(hi - lo + 1);
        let mut old_count = 0;
        let mut new_count = 0;
        for entry in &script[lo..=hi] {
            match entry.kind {
                EditKind::Keep => {
                    lines.push(DiffLine::Context(old[entry.old_i.unwrap()].to_string()));
                    old_count += 1;
                    new_count += 1;
                }
                EditKind::Del => {
                    lines.push(DiffLine::Remove(old[entry.old_i.unwrap()].to_string()));
                    old_count += 1;
                }
                EditKind::Ins => {
                    lines.push(DiffLine::Add(new[entry.new_i.unwrap()].to_string()));
                    new_count += 1;
                }
            }
        }

        let old_start = if old_count == 0 { old_before } else { old_before + 1 };
        let new_start = if new_count == 0 { new_before } else { new_before + 1 };
        hunks.push(DiffHunk {
            old_start,
            old_count,
            new_start,
            new_count,
            lines,
        });
    }
    hunks
}

/// Build the unified diff text for one file, or `None` when the contents are
/// identical after line-ending normalization.
///
/// Output is a two-line file header, one index line with two abbreviated
/// digests and a file mode, `---`/`+++` paths, then the hunks.
pub fn build_file_diff(path: &str, before: &str, after: &str) -> Option<String> {
    let before = normalize_newlines(before);
    let after = normalize_newlines(after);
    if before == after {
        return None;
    }

    let (old_lines, old_missing) = split_lines(&before);
    let (new_lines, new_missing) = split_lines(&after);
    let old_keys = line_keys(&old_lines, old_missing);
    let new_keys = line_keys(&new_lines, new_missing);
    let script = edit_script(&old_keys, &new_keys);
    let hunks = build_hunks(&script, &old_lines, &new_lines);
    if hunks.is_empty() {
        return None;
    }

    let mut out = String::new();
    out.push_str(&format!("diff --git a/{path} b/{path}\n"));
    out.push_str(&format!(
        "index {}..{} {}\n",
        blob_digest(&before),
        blob_digest(&after),
        FILE_MODE
    ));
    out.push_str(&format!("--- a/{path}\n"));
    out.push_str(&format!("+++ b/{path}\n"));

    let old_last = old_lines.len().checked_sub(1);
    let new_last = new_lines.len().checked_sub(1);
    for hunk in &hunks {
        out.push_str(&format!(
            "@@ -{},{} +{},{} @@\n",
            hunk.old_start, hunk.old_count, hunk.new_start, hunk.new_count
        ));
        let mut old_i = if hunk.old_count == 0 {
            hunk.old_start
        } else {
            hunk.old_start - 1
        };
        let mut new_i = if hunk.new_count == 0 {
            hunk.new_start
        } else {
            hunk.new_start - 1
        };
        for line in &hunk.lines {
            match line {
                DiffLine::Context(s) => {
                    out.push_str(&format!(" {s}\n"));
                    let at_old_end = old_missing && Some(old_i) == old_last;
                    old_i += 1;
                    new_i += 1;
                    if at_old_end {
                        out.push_str(NO_NEWLINE_MARKER);
                        out.push('\n');
                    }
                }
                DiffLine::Remove(s) => {
                    out.push_str(&format!("-{s}\n"));
                    let at_old_end = old_missing && Some(old_i) == old_last;
                    old_i += 1;
                    if at_old_end {
                        out.push_str(NO_NEWLINE_MARKER);
                        out.push('\n');
                    }
                }
                DiffLine::Add(s) => {
                    out.push_str(&format!("+{s}\n"));
                    let at_new_end = new_missing && Some(new_i) == new_last;
                    new_i += 1;
                    if at_new_end {
                        out.push_str(NO_NEWLINE_MARKER);
                        out.push('\n');
                    }
                }
            }
        }
    }
    Some(out)
}

/// Concatenate per-file diffs for every changed file, in the order the files
/// were first touched.
pub fn bundle_unified(changes: &[FileChange]) -> String {
    let mut out = String::new();
    for change in changes {
        if let Some(file_diff) = build_file_diff(&change.path, &change.before, &change.after) {
            out.push_str(&file_diff);
        }
    }
    out
}

// ───────────────────────────────────────────────────────────────────────────
//  Parsing and application
// ───────────────────────────────────────────────────────────────────────────

/// Parse a unified diff covering a single file.
pub fn parse_unified_diff(diff: &str) -> Result<UnifiedDiff> {
    let lines: Vec<&str> = diff.lines().collect();
    if lines.len() < 3 {
        bail!("diff too short");
    }

    let mut old_path = String::new();
    let mut new_path = String::new();
    let mut start_idx = 0;
    for (i, line) in lines.iter().enumerate() {
        if let Some(rest) = line.strip_prefix("--- ") {
            old_path = strip_path_decoration(rest, "a/");
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            new_path = strip_path_decoration(rest, "b/");
            start_idx = i + 1;
            break;
        }
    }
    if old_path.is_empty() || new_path.is_empty() {
        bail!("could not find file paths in diff");
    }

    let mut hunks = Vec::new();
    let mut old_missing = false;
    let mut new_missing = false;
    let mut i = start_idx;
    while i < lines.len() {
        if lines[i].starts_with("@@ ") {
            let hunk = parse_hunk(&lines, &mut i, &mut old_missing, &mut new_missing)?;
            hunks.push(hunk);
        } else {
            i += 1;
        }
    }
    if hunks.is_empty() {
        bail!("no hunks found in diff");
    }

    Ok(UnifiedDiff {
        old_path,
        new_path,
        hunks,
        old_missing_final_newline: old_missing,
        new_missing_final_newline: new_missing,
    })
}

/// Parse a concatenated multi-file patch into per-file diffs.
pub fn parse_bundle(patch: &str) -> Result<Vec<UnifiedDiff>> {
    let sections = split_bundle(patch);
    if sections.is_empty() {
        bail!("empty patch");
    }
    sections.into_iter().map(|s| parse_unified_diff(&s)).collect()
}

fn split_bundle(patch: &str) -> Vec<String> {
    if !patch.contains("diff --git") {
        if patch.trim().is_empty() {
            return Vec::new();
        }
        return vec![patch.to_string()];
    }
    let mut sections: Vec<String> = Vec::new();
    for line in patch.lines() {
        if line.starts_with("diff --git") {
            sections.push(String::new());
        }
        if let Some(current) = sections.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    sections
}

fn strip_path_decoration(raw: &str, prefix: &str) -> String {
    let mut path = raw.trim_start_matches(prefix).to_string();
    if let Some(tab_pos) = path.find('\t') {
        path.truncate(tab_pos);
    }
    path
}

fn parse_hunk(
    lines: &[&str],
    idx: &mut usize,
    old_missing: &mut bool,
    new_missing: &mut bool,
) -> Result<DiffHunk> {
    let header = lines[*idx];
    let parts: Vec<&str> = header.split_whitespace().collect();
    if parts.len() < 4 || parts[0] != "@@" {
        bail!("invalid hunk header: {header}");
    }

    let (old_start, old_count) = parse_range(parts[1].trim_start_matches('-'))?;
    let (new_start, new_count) = parse_range(parts[2].trim_start_matches('+'))?;

    *idx += 1;
    let mut diff_lines = Vec::new();
    while *idx < lines.len() {
        let line = lines[*idx];
        if line.starts_with("@@ ") || line.starts_with("diff ") {
            break;
        }

        if let Some(rest) = line.strip_prefix('+') {
            if !line.starts_with("+++") {
                diff_lines.push(DiffLine::Add(rest.to_string()));
            }
        } else if let Some(rest) = line.strip_prefix('-') {
            if !line.starts_with("---") {
                diff_lines.push(DiffLine::Remove(rest.to_string()));
            }
        } else if line.starts_with('\\') {
            // "\ No newline at end of file" marks the preceding line's side
            match diff_lines.last() {
                Some(DiffLine::Remove(_)) => *old_missing = true,
                Some(DiffLine::Add(_)) => *new_missing = true,
                Some(DiffLine::Context(_)) => {
                    *old_missing = true;
                    *new_missing = true;
                }
                None => {}
            }
        } else if line.starts_with(' ') || line.is_empty() {
            let content = if line.is_empty() { "" } else { &line[1..] };
            diff_lines.push(DiffLine::Context(content.to_string()));
        }

        *idx += 1;
    }

    Ok(DiffHunk {
        old_start,
        old_count,
        new_start,
        new_count,
        lines: diff_lines,
    })
}

/// Parse a range like "10,5" or "10" into (start, count).
fn parse_range(s: &str) -> Result<(usize, usize)> {
    if let Some(comma) = s.find(',') {
        let start: usize = s[..comma]
            .parse()
            .map_err(|_| anyhow!("invalid start: {s}"))?;
        let count: usize = s[comma + 1..]
            .parse()
            .map_err(|_| anyhow!("invalid count: {s}"))?;
        Ok((start, count))
    } else {
        let start: usize = s.parse().map_err(|_| anyhow!("invalid line number: {s}"))?;
        Ok((start, 1))
    }
}

/// Apply a parsed diff to the original content.
pub fn apply_diff(original: &str, diff: &UnifiedDiff) -> Result<String> {
    let normalized = normalize_newlines(original);
    let (lines, _) = split_lines(&normalized);
    let mut lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();

    // Apply hunks in reverse order so line numbers don't shift.
    for hunk in diff.hunks.iter().rev() {
        lines = apply_hunk(lines, hunk)?;
    }

    let mut result = lines.join("\n");
    if !result.is_empty() && !diff.new_missing_final_newline {
        result.push('\n');
    }
    Ok(result)
}

fn apply_hunk(mut lines: Vec<String>, hunk: &DiffHunk) -> Result<Vec<String>> {
    let start = hunk.old_start.saturating_sub(1);

    let mut new_section = Vec::new();
    for diff_line in &hunk.lines {
        match diff_line {
            DiffLine::Context(s) | DiffLine::Add(s) => new_section.push(s.clone()),
            DiffLine::Remove(_) => {}
        }
    }

    let remove_count = hunk
        .lines
        .iter()
        .filter(|l| matches!(l, DiffLine::Context(_) | DiffLine::Remove(_)))
        .count();

    let end = (start + remove_count).min(lines.len());
    if start > lines.len() {
        bail!(
            "hunk start {} is beyond content length {}",
            hunk.old_start,
            lines.len()
        );
    }
    lines.splice(start..end, new_section);
    Ok(lines)
}

/// Derive full `FileChange`s from generator-provided patch text by applying
/// it to the current on-disk content under `root`.
pub fn changes_from_patch(root: &Path, patch: &str) -> Result<Vec<FileChange>> {
    use crate::util::resolve_repo_path_allow_new;

    let mut changes = Vec::new();
    for diff in parse_bundle(patch)? {
        let path = diff.new_path.clone();
        let resolved =
            resolve_repo_path_allow_new(root, &path).map_err(|e| anyhow!(e.to_string()))?;
        let before = if resolved.absolute.exists() {
            std::fs::read_to_string(&resolved.absolute)?
        } else {
            String::new()
        };
        let after = apply_diff(&before, &diff)?;
        if after != normalize_newlines(&before) {
            changes.push(FileChange {
                path,
                before,
                after,
            });
        }
    }
    Ok(changes)
}

/// Standards-compatibility self-check: re-parse the emitted patch and apply
/// it back onto each `before`, requiring byte-exact `after` content. The
/// library-level equivalent of a patch-apply dry run.
pub fn dry_run_check(changes: &[FileChange], patch: &str) -> Result<()> {
    let parsed = parse_bundle(patch)?;
    for change in changes {
        let diff = parsed
            .iter()
            .find(|d| d.new_path == change.path)
            .ok_or_else(|| anyhow!("patch is missing a section for {}", change.path))?;
        let replayed = apply_diff(&change.before, diff)?;
        if replayed != normalize_newlines(&change.after) {
            bail!("patch for {} does not reproduce the new content", change.path);
        }
    }
    Ok(())
}
