//! Build orchestration and document stages for AutoFormatter.
//!
//! This crate ties the converter, the response splitter and the automation
//! host together into one gated build pipeline ([`pipeline::Orchestrator`]).

pub mod assembler;
pub mod context;
pub mod export;
pub mod gate;
pub mod pipeline;
pub mod postprocess;
pub mod prompt;
pub mod state;
pub mod transform;

pub use pipeline::{
    BuildControls, BuildEvent, BuildHandle, BuildOutcome, BuildReport, Orchestrator,
    PipelineSettings, Services,
};
pub use state::BuildState;
