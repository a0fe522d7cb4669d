//! The critique/refine controller.
//!
//! Drives the bounded attempt loop: `Generating -> Applying -> Validating ->
//! {Done | Refining}`, with `Refining -> Generating` until every gate passes
//! or the attempt budget runs out. Attempts inside one run are strictly
//! sequential - each refinement depends on the previous attempt's
//! diagnostics - while independent runs may execute concurrently with their
//! own sandbox instances and no shared state.
//!
//! The real working tree is only mutated by the final write step, for the
//! winning attempt's files. Every intermediate attempt is planned, diffed
//! and validated against in-memory content, so a failed run leaves no trace
//! on disk.

use crate::anchor::MatchStrategy;
use crate::apply::{plan_changes, write_changes};
use crate::diff::{bundle_unified, changes_from_patch, dry_run_check};
use crate::error::PipelineError;
use crate::gates::{run_quality_gates, GateResult};
use crate::generate::{
    route_model, GenerationContext, GenerationRequest, Generator, GeneratorOutput, Quality,
    ResolvedQuality, Tier,
};
use crate::ops::{FileChange, FileSnapshot};
use crate::parse::parse_ops_response;
use crate::prompt::{build_apply_failure_task, build_refinement_task};
use crate::sandbox::{Sandbox, SandboxRequest, SecurityPolicy};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use uuid::Uuid;

/// `best` quality buys this many refinement attempts on top of the
/// configured budget.
const BEST_EXTRA_REFINEMENT_ATTEMPTS: usize = 1;

fn default_max_attempts() -> usize {
    3
}

fn default_generation_timeout_ms() -> u64 {
    120_000
}

fn default_sandbox_timeout_ms() -> u64 {
    180_000
}

/// Policy and plumbing for one pipeline instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub tier: Tier,
    pub quality: Quality,
    /// Hard upper bound on generate->apply->validate cycles per run. The
    /// run terminates within this budget no matter what the generator does.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_generation_timeout_ms")]
    pub generation_timeout_ms: u64,
    #[serde(default = "default_sandbox_timeout_ms")]
    pub sandbox_timeout_ms: u64,
    pub lint_command: String,
    pub type_check_command: String,
    pub test_command: String,
    #[serde(default)]
    pub security_policy: SecurityPolicy,
    #[serde(default)]
    pub match_strategy: MatchStrategy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::balanced()
    }
}

impl PipelineConfig {
    pub fn balanced() -> Self {
        Self {
            tier: Tier::Free,
            quality: Quality::Balanced,
            max_attempts: default_max_attempts(),
            generation_timeout_ms: default_generation_timeout_ms(),
            sandbox_timeout_ms: default_sandbox_timeout_ms(),
            lint_command: "npx eslint .".to_string(),
            type_check_command: "npx tsc --noEmit".to_string(),
            test_command: "npx vitest run".to_string(),
            security_policy: SecurityPolicy::default(),
            match_strategy: MatchStrategy::default(),
        }
    }

    pub fn best() -> Self {
        let mut config = Self::balanced();
        config.quality = Quality::Best;
        config
    }

    /// Low-latency path: the first generated diff is accepted unvalidated.
    pub fn fast() -> Self {
        let mut config = Self::balanced();
        config.quality = Quality::Fast;
        config
    }

    fn effective_budget(&self) -> usize {
        let base = self.max_attempts.max(1);
        match self.quality.resolve() {
            ResolvedQuality::Best => base + BEST_EXTRA_REFINEMENT_ATTEMPTS,
            _ => base,
        }
    }
}

/// Controller state, exposed for progress reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Generating { attempt: usize },
    Applying { attempt: usize },
    Validating { attempt: usize },
    Refining { attempt: usize },
    Done { success: bool },
}

impl PipelineState {
    pub fn status_text(&self) -> &'static str {
        match self {
            PipelineState::Generating { .. } => "Generating patch...",
            PipelineState::Applying { .. } => "Applying edits",
            PipelineState::Validating { .. } => "Running quality gates...",
            PipelineState::Refining { .. } => "Refining from diagnostics",
            PipelineState::Done { success: true } => "Complete",
            PipelineState::Done { success: false } => "Failed",
        }
    }
}

/// Record of one generate->apply->validate cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationAttempt {
    pub attempt_number: usize,
    pub started_at: DateTime<Utc>,
    /// Operations in the generator's reply; zero when it returned diff text.
    pub ops_count: usize,
    /// Unified patch produced by this attempt; empty when nothing applied.
    pub diff: String,
    /// Gate verdict. Absent in fast mode and for attempts that failed
    /// before validation.
    pub gate: Option<GateResult>,
    /// Why the attempt failed before producing a gate verdict.
    pub failure: Option<String>,
}

/// Final, observable result of one run. Exists only for the duration of one
/// task; persistence is the caller's concern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: Uuid,
    pub task: String,
    pub tier: Tier,
    pub quality: Quality,
    pub attempts: Vec<GenerationAttempt>,
    pub success: bool,
    /// Best-available diff: the passing attempt's, or the last attempt that
    /// produced one when every attempt failed.
    pub diff: String,
    pub final_gate: Option<GateResult>,
    pub duration_ms: u64,
}

/// The pipeline: external generator + external sandbox + policy.
pub struct PatchPipeline {
    generator: Arc<dyn Generator>,
    sandbox: Arc<dyn Sandbox>,
    config: PipelineConfig,
}

impl PatchPipeline {
    pub fn new(
        generator: Arc<dyn Generator>,
        sandbox: Arc<dyn Sandbox>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            generator,
            sandbox,
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one task to completion without external cancellation.
    pub async fn run(
        &self,
        root: &Path,
        task: &str,
        context: GenerationContext,
    ) -> Result<PipelineRun, PipelineError> {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        self.run_with_cancel(root, task, context, cancel_rx).await
    }

    /// Run one task, aborting as soon as `cancel` flips to true. An
    /// in-flight sandbox call is dropped immediately on cancellation.
    pub async fn run_with_cancel(
        &self,
        root: &Path,
        task: &str,
        context: GenerationContext,
        cancel: watch::Receiver<bool>,
    ) -> Result<PipelineRun, PipelineError> {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let resolved = self.config.quality.resolve();
        let budget = self.config.effective_budget();
        let generation_timeout = Duration::from_millis(self.config.generation_timeout_ms);
        let sandbox_timeout = Duration::from_millis(self.config.sandbox_timeout_ms);

        tracing::info!(
            %run_id,
            tier = self.config.tier.as_str(),
            quality = self.config.quality.as_str(),
            budget,
            "pipeline run started"
        );

        let mut attempts: Vec<GenerationAttempt> = Vec::new();
        let mut current_task = task.to_string();

        for attempt_number in 1..=budget {
            ensure_not_cancelled(&cancel)?;
            let state = PipelineState::Generating {
                attempt: attempt_number,
            };
            tracing::info!(attempt = attempt_number, "{}", state.status_text());

            let request = GenerationRequest {
                task: current_task.clone(),
                model: route_model(self.config.tier, resolved).to_string(),
                tier: self.config.tier,
                quality: self.config.quality,
                context: context.clone(),
            };

            let mut attempt = GenerationAttempt {
                attempt_number,
                started_at: Utc::now(),
                ops_count: 0,
                diff: String::new(),
                gate: None,
                failure: None,
            };

            let mut cancel_watch = cancel.clone();
            let generated = tokio::select! {
                outcome = tokio::time::timeout(generation_timeout, self.generator.generate(&request)) => {
                    match outcome {
                        Ok(Ok(output)) => Ok(output),
                        Ok(Err(e)) => Err(format!("generation failed: {e}")),
                        Err(_) => Err(format!(
                            "generation timed out after {}ms",
                            self.config.generation_timeout_ms
                        )),
                    }
                }
                _ = cancelled(&mut cancel_watch) => return Err(PipelineError::Cancelled),
            };

            let output = match generated {
                Ok(output) => output,
                Err(failure) => {
                    // A failed or empty generation consumes one attempt unit;
                    // the next attempt restarts from the original task.
                    tracing::warn!(attempt = attempt_number, %failure, "generation attempt failed");
                    attempt.failure = Some(failure);
                    attempts.push(attempt);
                    current_task = task.to_string();
                    continue;
                }
            };

            let state = PipelineState::Applying {
                attempt: attempt_number,
            };
            tracing::debug!(attempt = attempt_number, "{}", state.status_text());

            let changes = match self.apply_output(root, output, &mut attempt) {
                Ok(changes) => changes,
                Err(failure) => {
                    tracing::warn!(attempt = attempt_number, %failure, "apply failed");
                    attempt.failure = Some(failure.clone());
                    attempts.push(attempt);
                    current_task = build_apply_failure_task(task, &failure);
                    continue;
                }
            };

            if changes.is_empty() {
                attempt.failure = Some("generator produced an empty change set".to_string());
                attempts.push(attempt);
                current_task = task.to_string();
                continue;
            }

            let patch = bundle_unified(&changes);
            if let Err(e) = dry_run_check(&changes, &patch) {
                attempt.failure = Some(format!("emitted patch failed its dry run: {e}"));
                attempts.push(attempt);
                current_task = task.to_string();
                continue;
            }
            attempt.diff = patch.clone();

            if resolved == ResolvedQuality::Fast {
                // Fast mode never touches the sandbox; the first diff that
                // applies cleanly wins.
                write_changes(root, &changes)
                    .map_err(|e| PipelineError::CommitFailed(e.to_string()))?;
                attempts.push(attempt);
                tracing::info!(%run_id, "fast mode accepted first diff unvalidated");
                return Ok(self.finish(
                    run_id, task, attempts, true, patch, None, started,
                ));
            }

            let state = PipelineState::Validating {
                attempt: attempt_number,
            };
            tracing::info!(attempt = attempt_number, "{}", state.status_text());

            let sandbox_request = SandboxRequest {
                files: changes
                    .iter()
                    .map(|c| FileSnapshot {
                        path: c.path.clone(),
                        content: c.after.clone(),
                    })
                    .collect(),
                lint_command: self.config.lint_command.clone(),
                type_check_command: self.config.type_check_command.clone(),
                test_command: self.config.test_command.clone(),
                security_policy: self.config.security_policy.clone(),
            };

            let mut cancel_watch = cancel.clone();
            let gate: GateResult = tokio::select! {
                result = run_quality_gates(self.sandbox.as_ref(), sandbox_request, sandbox_timeout) => {
                    // Fatal sandbox conditions abort the run: there are no
                    // diagnostics to refine against.
                    result?
                }
                _ = cancelled(&mut cancel_watch) => return Err(PipelineError::Cancelled),
            };

            if gate.ok {
                write_changes(root, &changes)
                    .map_err(|e| PipelineError::CommitFailed(e.to_string()))?;
                attempt.gate = Some(gate.clone());
                attempts.push(attempt);
                tracing::info!(%run_id, attempt = attempt_number, "all gates passed");
                return Ok(self.finish(
                    run_id,
                    task,
                    attempts,
                    true,
                    patch,
                    Some(gate),
                    started,
                ));
            }

            let state = PipelineState::Refining {
                attempt: attempt_number,
            };
            tracing::info!(
                attempt = attempt_number,
                summary = %gate.summary,
                "{}",
                state.status_text()
            );
            // The next diff fully replaces this one; only diagnostics carry
            // forward, appended to the original task.
            current_task = build_refinement_task(task, &gate);
            attempt.gate = Some(gate);
            attempts.push(attempt);
        }

        let diff = attempts
            .iter()
            .rev()
            .find(|a| !a.diff.is_empty())
            .map(|a| a.diff.clone())
            .unwrap_or_default();
        let final_gate = attempts.iter().rev().find_map(|a| a.gate.clone());
        tracing::warn!(%run_id, attempts = attempts.len(), "attempt budget exhausted");
        Ok(self.finish(run_id, task, attempts, false, diff, final_gate, started))
    }

    fn apply_output(
        &self,
        root: &Path,
        output: GeneratorOutput,
        attempt: &mut GenerationAttempt,
    ) -> Result<Vec<FileChange>, String> {
        match output {
            GeneratorOutput::Ops(ops) => {
                attempt.ops_count = ops.ops.len();
                if ops.ops.is_empty() {
                    return Err("generator returned no operations".to_string());
                }
                plan_changes(root, &ops.ops, self.config.match_strategy).map_err(|e| e.to_string())
            }
            GeneratorOutput::Diff(text) => {
                changes_from_patch(root, &text).map_err(|e| e.to_string())
            }
            GeneratorOutput::Raw(text) => {
                if looks_like_diff(&text) {
                    self.apply_output(root, GeneratorOutput::Diff(text), attempt)
                } else {
                    let ops = parse_ops_response(&text).map_err(|e| e.to_string())?;
                    self.apply_output(root, GeneratorOutput::Ops(ops), attempt)
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &self,
        id: Uuid,
        task: &str,
        attempts: Vec<GenerationAttempt>,
        success: bool,
        diff: String,
        final_gate: Option<GateResult>,
        started: Instant,
    ) -> PipelineRun {
        let state = PipelineState::Done { success };
        tracing::info!(%id, "{}", state.status_text());
        PipelineRun {
            id,
            task: task.to_string(),
            tier: self.config.tier,
            quality: self.config.quality,
            attempts,
            success,
            diff,
            final_gate,
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

fn looks_like_diff(text: &str) -> bool {
    let trimmed = text.trim_start();
    trimmed.starts_with("diff --git") || trimmed.starts_with("--- ")
}

fn ensure_not_cancelled(cancel: &watch::Receiver<bool>) -> Result<(), PipelineError> {
    if *cancel.borrow() {
        Err(PipelineError::Cancelled)
    } else {
        Ok(())
    }
}

/// Resolves when the cancel flag flips to true; pends forever if the sender
/// goes away without cancelling.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
