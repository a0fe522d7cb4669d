//! Structured edit operations - the contract between a generator and the
//! patch engine.
//!
//! Generators emit these as strict JSON (`{"ops": [...]}`). The tagged enum
//! replaces the original string-keyed dispatch: a misspelled or unknown
//! operation kind now fails at deserialization instead of deep inside the
//! apply loop.

use serde::{Deserialize, Serialize};

fn default_occurrence() -> usize {
    1
}

/// One structured edit instruction targeting a single file.
///
/// Occurrence indices are 1-based. `occur: 2` selects the second literal
/// match of the anchor, counted left to right.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum EditOp {
    /// Insert `code` immediately after the resolved anchor span.
    InsertAfter {
        path: String,
        anchor: String,
        code: String,
        #[serde(default = "default_occurrence")]
        occur: usize,
    },
    /// Insert `code` immediately before the resolved anchor span.
    InsertBefore {
        path: String,
        anchor: String,
        code: String,
        #[serde(default = "default_occurrence")]
        occur: usize,
    },
    /// Replace everything between the `start` and `end` markers with `code`.
    /// Both markers are kept; `end` is only searched for after `start`.
    ReplaceBetween {
        path: String,
        start: String,
        end: String,
        code: String,
    },
    /// Append `code` at the end of the file unless it already contains
    /// `must_contain`.
    AppendIfMissing {
        path: String,
        must_contain: String,
        code: String,
    },
    /// Ensure a single import line for `spec` from module `from` exists,
    /// inserted after any leading comment header.
    UpsertImport {
        path: String,
        spec: String,
        #[serde(alias = "modulePath")]
        from: String,
    },
}

impl EditOp {
    /// Repo-relative path this operation targets.
    pub fn path(&self) -> &str {
        match self {
            EditOp::InsertAfter { path, .. } => path,
            EditOp::InsertBefore { path, .. } => path,
            EditOp::ReplaceBetween { path, .. } => path,
            EditOp::AppendIfMissing { path, .. } => path,
            EditOp::UpsertImport { path, .. } => path,
        }
    }

    /// Wire name of the operation, used in error messages and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            EditOp::InsertAfter { .. } => "insert_after",
            EditOp::InsertBefore { .. } => "insert_before",
            EditOp::ReplaceBetween { .. } => "replace_between",
            EditOp::AppendIfMissing { .. } => "append_if_missing",
            EditOp::UpsertImport { .. } => "upsert_import",
        }
    }
}

/// Top-level shape of a generator's structured reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchOps {
    pub ops: Vec<EditOp>,
}

/// A snapshot of one file's content, used for prompts and sandbox input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    pub content: String,
}

/// The full before/after record for one file whose content actually changed.
///
/// Ephemeral by design: a `FileChange` only ever reaches disk through the
/// final write step, after every operation for its path has succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    pub path: String,
    pub before: String,
    pub after: String,
}
