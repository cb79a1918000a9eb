//! Document-automation host contract.
//!
//! The pipeline edits word-processor documents through an external host
//! (an office suite driven over its object API). This crate defines the
//! narrow surface the pipeline consumes, plus two implementations:
//!
//! - [`BridgeHost`]: a subprocess speaking JSON lines on stdin/stdout that
//!   forwards each call to the real office application.
//! - [`MemoryHost`]: an in-process host over JSON block documents, used by
//!   tests and dry runs.
//!
//! A host instance belongs to exactly one build. [`HostGuard`] ties its
//! lifetime to a scope and quits it on every exit path.

mod bridge;
mod memory;

use std::ops::{Deref, DerefMut};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use autoformatter_shared::Result;

pub use bridge::{BridgeHost, BridgeLauncher};
pub use memory::{Block, MemoryDocument, MemoryHost, MemoryLauncher, ParagraphState, Row};

// ---------------------------------------------------------------------------
// Value types
// ---------------------------------------------------------------------------

/// Handle to a document open in a host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    #[default]
    Left,
    Center,
    Right,
    Justify,
}

/// Paragraph properties to change; `None` leaves a property as is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ParagraphFormat {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alignment: Option<Alignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub left_indent: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_line_indent: Option<f32>,
}

/// Which paragraphs a format change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "index", rename_all = "snake_case")]
pub enum ParagraphScope {
    /// The paragraph holding the n-th inline image (0-based).
    InlineImage(usize),
    /// Every paragraph inside the n-th table (0-based).
    Table(usize),
}

/// A named edge of a table or row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Edge {
    Top,
    Bottom,
    Left,
    Right,
    InsideHorizontal,
    InsideVertical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineStyle {
    Single,
}

/// Rule widths in eighths of a point, as office hosts count them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LineWidth {
    /// 0.75 pt
    Thin,
    /// 1.5 pt
    Thick,
}

impl LineWidth {
    pub fn eighths_of_point(&self) -> u32 {
        match self {
            Self::Thin => 6,
            Self::Thick => 12,
        }
    }
}

/// Style, width, and color of one border line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BorderRule {
    pub style: LineStyle,
    pub width: LineWidth,
    /// 0xBBGGRR; 0 is black.
    pub color: u32,
}

impl BorderRule {
    pub const fn single(width: LineWidth) -> Self {
        Self {
            style: LineStyle::Single,
            width,
            color: 0,
        }
    }
}

/// Document-wide proofing settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofingSettings {
    /// Locale id (e.g. 2052 for zh-CN).
    pub language_id: u32,
    pub show_spelling_errors: bool,
    pub show_grammar_errors: bool,
}

// ---------------------------------------------------------------------------
// Host contract
// ---------------------------------------------------------------------------

/// The object-style API consumed from a document-automation host.
///
/// Indices are 0-based. Every call is synchronous; implementations map host
/// faults to [`AutoFormatterError::Host`](autoformatter_shared::AutoFormatterError::Host).
pub trait AutomationHost: Send {
    /// Start a new document based on `template`, inheriting its styles.
    fn create_document(&mut self, template: &Path) -> Result<DocumentId>;
    fn open_document(&mut self, path: &Path) -> Result<DocumentId>;
    /// Delete all body content (template placeholder text, for instance).
    fn clear_content(&mut self, doc: DocumentId) -> Result<()>;
    /// Insert the full content of `path` at the end of the document.
    fn insert_file(&mut self, doc: DocumentId, path: &Path) -> Result<()>;
    fn insert_page_break(&mut self, doc: DocumentId) -> Result<()>;

    fn inline_image_count(&mut self, doc: DocumentId) -> Result<usize>;
    fn table_count(&mut self, doc: DocumentId) -> Result<usize>;
    fn table_row_count(&mut self, doc: DocumentId, table: usize) -> Result<usize>;
    fn toc_count(&mut self, doc: DocumentId) -> Result<usize>;

    fn set_paragraph_format(&mut self, doc: DocumentId, scope: ParagraphScope, format: ParagraphFormat) -> Result<()>;
    /// Remove every border of a table, inner grid included.
    fn clear_table_borders(&mut self, doc: DocumentId, table: usize) -> Result<()>;
    fn set_table_border(&mut self, doc: DocumentId, table: usize, edge: Edge, rule: BorderRule) -> Result<()>;
    fn set_row_border(&mut self, doc: DocumentId, table: usize, row: usize, edge: Edge, rule: BorderRule) -> Result<()>;
    fn set_row_alignment(&mut self, doc: DocumentId, table: usize, alignment: Alignment) -> Result<()>;
    /// Size a table to the page width.
    fn autofit_window(&mut self, doc: DocumentId, table: usize) -> Result<()>;

    fn set_proofing(&mut self, doc: DocumentId, settings: ProofingSettings) -> Result<()>;
    /// Recalculate the entries and page numbers of a table of contents.
    fn refresh_toc(&mut self, doc: DocumentId, index: usize) -> Result<()>;

    fn save_as(&mut self, doc: DocumentId, path: &Path) -> Result<()>;
    /// Close a document, optionally committing pending changes to its path.
    fn close(&mut self, doc: DocumentId, save: bool) -> Result<()>;
    /// Terminate the host. Further calls fail.
    fn quit(&mut self) -> Result<()>;
}

/// Starts one isolated host instance per call.
pub trait HostLauncher: Send + Sync {
    fn launch(&self) -> Result<Box<dyn AutomationHost>>;
}

// ---------------------------------------------------------------------------
// Scoped ownership
// ---------------------------------------------------------------------------

/// Owns a running host and quits it when dropped.
pub struct HostGuard {
    host: Option<Box<dyn AutomationHost>>,
}

impl HostGuard {
    /// Launch a host and take ownership of it.
    pub fn acquire(launcher: &dyn HostLauncher) -> Result<Self> {
        let host = launcher.launch()?;
        debug!("automation host acquired");
        Ok(Self { host: Some(host) })
    }
}

impl Deref for HostGuard {
    type Target = dyn AutomationHost;

    fn deref(&self) -> &Self::Target {
        // Only `drop` takes the host out.
        self.host.as_deref().expect("host present until drop")
    }
}

impl DerefMut for HostGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.host.as_deref_mut().expect("host present until drop")
    }
}

impl Drop for HostGuard {
    fn drop(&mut self) {
        if let Some(mut host) = self.host.take() {
            match host.quit() {
                Ok(()) => debug!("automation host released"),
                Err(e) => warn!(error = %e, "automation host did not quit cleanly"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_widths_match_host_units() {
        assert_eq!(LineWidth::Thick.eighths_of_point(), 12);
        assert_eq!(LineWidth::Thin.eighths_of_point(), 6);
        assert_eq!(BorderRule::single(LineWidth::Thick).color, 0);
    }

    #[test]
    fn paragraph_scope_serialization() {
        let json = serde_json::to_string(&ParagraphScope::Table(2)).unwrap();
        assert_eq!(json, r#"{"scope":"table","index":2}"#);
    }

    #[test]
    fn guard_quits_host_on_drop() {
        let launcher = MemoryLauncher::default();
        {
            let mut guard = HostGuard::acquire(&launcher).unwrap();
            let tmp = tempfile::tempdir().unwrap();
            let template = tmp.path().join("reference.json");
            MemoryDocument::default().save(&template).unwrap();
            guard.create_document(&template).unwrap();
            assert_eq!(launcher.live_hosts(), 1);
        }
        assert_eq!(launcher.launched(), 1);
        assert_eq!(launcher.live_hosts(), 0);
    }
}
