//! Patchwright library crate
//!
//! An anchor-based patch engine, a four-gate quality runner, and the bounded
//! generate -> apply -> validate -> refine controller that ties them to an
//! external generator and an isolated execution runtime.

pub mod anchor;
pub mod apply;
pub mod diff;
pub mod error;
pub mod gates;
pub mod generate;
pub mod ops;
pub mod parse;
pub mod pipeline;
pub mod prompt;
pub mod report;
pub mod sandbox;
pub mod util;

pub use anchor::MatchStrategy;
pub use error::{PatchError, PipelineError, SandboxFailure};
pub use gates::{GatePass, GateResult};
pub use generate::{GenerationContext, GenerationRequest, Generator, GeneratorOutput, Quality, Tier};
pub use ops::{EditOp, FileChange, FileSnapshot, PatchOps};
pub use pipeline::{GenerationAttempt, PatchPipeline, PipelineConfig, PipelineRun, PipelineState};
pub use report::ExecReport;
pub use sandbox::{Sandbox, SandboxRequest, SecurityPolicy};
