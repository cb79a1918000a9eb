//! Build state machine.

use serde::Serialize;

use autoformatter_shared::{AutoFormatterError, Result};

/// Where a build is. `Done`, `Failed` and `Cancelled` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum BuildState {
    Init,
    Extracting,
    Transforming,
    AwaitingHuman,
    Splitting,
    Converting,
    Assembling,
    PostProcessing,
    Exporting,
    Done,
    Failed(String),
    Cancelled,
}

impl BuildState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed(_) | Self::Cancelled)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::AwaitingHuman => "awaiting human",
            Self::Splitting => "splitting",
            Self::Converting => "converting",
            Self::Assembling => "assembling",
            Self::PostProcessing => "post-processing",
            Self::Exporting => "exporting",
            Self::Done => "done",
            Self::Failed(_) => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether `next` may follow `self`.
    pub fn can_advance_to(&self, next: &BuildState) -> bool {
        use BuildState::*;

        if self.is_terminal() {
            return false;
        }
        matches!(
            (self, next),
            (_, Failed(_) | Cancelled)
                | (Init, Extracting)
                | (Extracting, Transforming)
                | (Transforming, AwaitingHuman | Splitting)
                | (AwaitingHuman, Splitting)
                | (Splitting, Converting)
                | (Converting, Assembling)
                | (Assembling, PostProcessing)
                | (PostProcessing, Exporting)
                | (Exporting, Done)
        )
    }
}

impl std::fmt::Display for BuildState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "failed: {reason}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Tracks the current state and rejects illegal moves.
#[derive(Debug)]
pub struct StateMachine {
    current: BuildState,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self {
            current: BuildState::Init,
        }
    }
}

impl StateMachine {
    pub fn current(&self) -> &BuildState {
        &self.current
    }

    pub fn advance(&mut self, next: BuildState) -> Result<()> {
        if !self.current.can_advance_to(&next) {
            return Err(AutoFormatterError::Internal(format!(
                "illegal build transition {} -> {}",
                self.current.name(),
                next.name()
            )));
        }
        self.current = next;
        Ok(())
    }
}
