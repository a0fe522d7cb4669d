//! Contract for the text-generation backend and the tier/quality policy
//! that routes requests to it.
//!
//! Generation is external: this crate builds requests and consumes either a
//! structured operation list or raw patch text. Tier selects which backends
//! are eligible; quality trades latency for validation rigor. Neither alters
//! gate strictness - a gate either passes or it does not.

use crate::ops::{FileSnapshot, PatchOps};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;

/// Billing tier for generation backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    #[default]
    Free,
    Paid,
}

impl Tier {
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Paid => "paid",
        }
    }
}

/// Quality vs speed tradeoff for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    /// Skip the isolated runtime entirely and accept the first diff.
    Fast,
    /// Validate every attempt.
    Balanced,
    /// Validate every attempt, stricter generation request, one extra
    /// refinement attempt.
    Best,
    /// Defer to heuristics. Currently resolves to `Balanced`; `Fast` is only
    /// ever explicit because it skips validation.
    #[default]
    Auto,
}

/// `Auto` resolved away - what the controller actually runs with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedQuality {
    Fast,
    Balanced,
    Best,
}

impl Quality {
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Fast => "fast",
            Quality::Balanced => "balanced",
            Quality::Best => "best",
            Quality::Auto => "auto",
        }
    }

    pub fn resolve(self) -> ResolvedQuality {
        match self {
            Quality::Fast => ResolvedQuality::Fast,
            Quality::Balanced | Quality::Auto => ResolvedQuality::Balanced,
            Quality::Best => ResolvedQuality::Best,
        }
    }
}

/// Backend hint derived from tier and quality. Generators may honor or
/// ignore it; the pipeline never calls a provider itself.
pub fn route_model(tier: Tier, quality: ResolvedQuality) -> &'static str {
    match (tier, quality) {
        (Tier::Paid, ResolvedQuality::Best) => "gpt-4o",
        (Tier::Paid, _) => "gpt-4o-mini",
        (Tier::Free, _) => "qwen2.5-coder:7b",
    }
}

/// Repository context attached to a generation request. Convention hints
/// come from an external pattern-contract scanner and are opaque text here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationContext {
    /// Naming rules, forbidden patterns, container files - whatever the
    /// scanner inferred about the repository, preformatted.
    #[serde(default)]
    pub convention_hints: Option<String>,
    /// Reference snippets from the repository worth imitating.
    #[serde(default)]
    pub examples: Vec<String>,
    /// Current content of the files the task is expected to touch.
    #[serde(default)]
    pub files: Vec<FileSnapshot>,
}

/// One generation request, fully assembled by the controller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Task text; on refinement attempts this already carries the previous
    /// attempt's diagnostics.
    pub task: String,
    /// Backend hint from `route_model`.
    pub model: String,
    pub tier: Tier,
    pub quality: Quality,
    pub context: GenerationContext,
}

/// What a generator may hand back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratorOutput {
    /// Structured edit operations - the preferred contract.
    Ops(PatchOps),
    /// Raw unified diff text, applied and re-serialized by the engine.
    Diff(String),
    /// Unparsed model text. The controller extracts an ops JSON object from
    /// it, or treats it as patch text when it looks like a unified diff.
    Raw(String),
}

/// External text-generation backend.
///
/// May fail or return empty output; the controller counts either as a
/// failed attempt against the budget rather than a fatal error.
pub trait Generator: Send + Sync {
    fn generate<'a>(
        &'a self,
        request: &'a GenerationRequest,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<GeneratorOutput>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_resolves_to_balanced() {
        assert_eq!(Quality::Auto.resolve(), ResolvedQuality::Balanced);
        assert_eq!(Quality::Fast.resolve(), ResolvedQuality::Fast);
        assert_eq!(Quality::Best.resolve(), ResolvedQuality::Best);
    }

    #[test]
    fn paid_tier_routes_by_quality() {
        assert_eq!(route_model(Tier::Paid, ResolvedQuality::Best), "gpt-4o");
        assert_eq!(
            route_model(Tier::Paid, ResolvedQuality::Balanced),
            "gpt-4o-mini"
        );
        assert_eq!(
            route_model(Tier::Free, ResolvedQuality::Best),
            "qwen2.5-coder:7b"
        );
    }

    #[test]
    fn policy_enums_use_snake_case_wire_names() {
        assert_eq!(serde_json::to_string(&Tier::Paid).unwrap(), "\"paid\"");
        assert_eq!(serde_json::to_string(&Quality::Fast).unwrap(), "\"fast\"");
        let quality: Quality = serde_json::from_str("\"balanced\"").unwrap();
        assert_eq!(quality, Quality::Balanced);
    }
}
