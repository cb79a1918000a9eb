//! Core domain types for AutoFormatter builds.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// BuildId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for build identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(pub Uuid);

impl BuildId {
    /// Generate a new time-sortable build identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for BuildId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for BuildId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// ComponentSpec
// ---------------------------------------------------------------------------

/// How a component's content is sourced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// A pre-built document inserted as-is.
    Static,
    /// Markdown-like text produced by the AI transform; converted per build.
    Dynamic,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::Dynamic => "dynamic",
        }
    }
}

/// One building block of the final document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentSpec {
    /// Registry key (e.g. `cover`, `body`).
    pub id: String,
    /// Static document or dynamic fragment.
    pub kind: SourceKind,
    /// Static: path of the document. Dynamic: fragment file name the AI
    /// response is expected to emit (e.g. `body.md`).
    pub locator: PathBuf,
    /// Human-readable description.
    pub description: String,
}

impl ComponentSpec {
    pub fn new(
        id: impl Into<String>,
        kind: SourceKind,
        locator: impl Into<PathBuf>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            locator: locator.into(),
            description: description.into(),
        }
    }

    /// File name a dynamic fragment is written under in the working directory.
    pub fn fragment_name(&self) -> Option<String> {
        self.locator
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
    }
}

// ---------------------------------------------------------------------------
// BuildRequest
// ---------------------------------------------------------------------------

/// Who performs the text transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformMode {
    /// The pipeline calls the AI endpoint itself.
    Automated,
    /// The prompt is handed to a person, who pastes the reply back.
    HumanMediated,
}

/// Output artifacts a build can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportTarget {
    /// Editable word-processor document (`.docx`).
    Primary,
    /// Fixed-layout rendering of the same document (`.pdf`).
    Secondary,
}

impl ExportTarget {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Primary => "docx",
            Self::Secondary => "pdf",
        }
    }
}

/// A single build, consumed exactly once by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Component ids in merge order.
    pub components: Vec<String>,
    /// Document whose text is reformatted.
    pub input_path: PathBuf,
    pub mode: TransformMode,
    pub targets: BTreeSet<ExportTarget>,
    /// `None` makes the orchestrator ask for a location before exporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    /// `None` falls back to the input file stem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_base_name: Option<String>,
}

impl BuildRequest {
    /// Request defaults: primary format only, output location chosen later.
    pub fn new(
        components: Vec<String>,
        input_path: impl Into<PathBuf>,
        mode: TransformMode,
    ) -> Self {
        Self {
            components,
            input_path: input_path.into(),
            mode,
            targets: BTreeSet::from([ExportTarget::Primary]),
            output_dir: None,
            output_base_name: None,
        }
    }
}
