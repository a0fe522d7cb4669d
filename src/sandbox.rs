//! Contract for the isolated execution runtime.
//!
//! The runtime owns process isolation, resource limits and its own timeout
//! enforcement; this crate only defines what goes in and what comes back.
//! One request carries the complete patched view of every changed file, so
//! validation never reads the live working tree. The runtime is invoked
//! fresh per attempt and discarded after the report is collected.

use crate::error::SandboxFailure;
use crate::ops::FileSnapshot;
use crate::report::ExecReport;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Security policy forwarded to the runtime's security check. The runtime
/// interprets it; the pipeline only transports it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Module prefixes the patched code may import.
    #[serde(default)]
    pub allowed_imports: Vec<String>,
    /// Substring patterns that must not appear in patched content.
    #[serde(default)]
    pub forbidden_patterns: Vec<String>,
}

/// Everything the isolated runtime needs to exercise one attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRequest {
    /// Patched content for every changed file.
    pub files: Vec<FileSnapshot>,
    pub lint_command: String,
    pub type_check_command: String,
    pub test_command: String,
    pub security_policy: SecurityPolicy,
}

/// An isolated runtime that can execute the four quality checks.
///
/// Implementations live outside this crate (container runners, worktree
/// runners, in-memory fakes for tests). A failed start, crash or hang must
/// surface as `SandboxFailure`, never as an all-gates-failed report: the
/// controller treats the two very differently.
pub trait Sandbox: Send + Sync {
    fn execute<'a>(
        &'a self,
        request: SandboxRequest,
    ) -> Pin<Box<dyn Future<Output = Result<ExecReport, SandboxFailure>> + Send + 'a>>;
}
