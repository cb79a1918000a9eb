//! In-process automation host over JSON block documents.
//!
//! A [`MemoryDocument`] is a flat list of [`Block`]s persisted as pretty
//! JSON. Inserting a file that is not such a document imports it: UTF-8 text
//! is read line-wise (pipe tables, `![alt](src)` images and `[TOC]` markers
//! are recognized), anything else becomes a single placeholder paragraph.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tracing::debug;

use autoformatter_shared::{AutoFormatterError, Result};

use crate::{
    Alignment, AutomationHost, BorderRule, DocumentId, Edge, HostLauncher, LineWidth,
    ParagraphFormat, ParagraphScope, ProofingSettings,
};

/// First-line indent body paragraphs inherit from the template, in characters.
const BODY_FIRST_LINE_INDENT: f32 = 2.0;

// ---------------------------------------------------------------------------
// Document model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParagraphState {
    #[serde(default)]
    pub alignment: Alignment,
    #[serde(default)]
    pub left_indent: f32,
    #[serde(default)]
    pub first_line_indent: f32,
}

impl Default for ParagraphState {
    fn default() -> Self {
        Self {
            alignment: Alignment::Left,
            left_indent: 0.0,
            first_line_indent: BODY_FIRST_LINE_INDENT,
        }
    }
}

impl ParagraphState {
    fn apply(&mut self, format: ParagraphFormat) {
        if let Some(alignment) = format.alignment {
            self.alignment = alignment;
        }
        if let Some(indent) = format.left_indent {
            self.left_indent = indent;
        }
        if let Some(indent) = format.first_line_indent {
            self.first_line_indent = indent;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    pub cells: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub borders: BTreeMap<Edge, BorderRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Block {
    Text {
        text: String,
    },
    PageBreak,
    Image {
        source: String,
        #[serde(default)]
        paragraph: ParagraphState,
    },
    Table {
        rows: Vec<Row>,
        #[serde(default)]
        borders: BTreeMap<Edge, BorderRule>,
        #[serde(default)]
        paragraph: ParagraphState,
        #[serde(default)]
        row_alignment: Alignment,
        #[serde(default)]
        autofit: bool,
    },
    Toc {
        /// Entries no longer match the headings.
        #[serde(default)]
        stale: bool,
    },
}

/// A whole document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDocument {
    pub blocks: Vec<Block>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proofing: Option<ProofingSettings>,
}

impl MemoryDocument {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AutoFormatterError::io(path, e))?;
        serde_json::from_str(&content)
            .map_err(|e| AutoFormatterError::Host(format!("{} is not a block document: {e}", path.display())))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| AutoFormatterError::Host(format!("failed to serialize document: {e}")))?;
        std::fs::write(path, json).map_err(|e| AutoFormatterError::io(path, e))
    }

    /// Import any file: block JSON as-is, UTF-8 text line-wise, else a placeholder.
    pub fn import(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| AutoFormatterError::io(path, e))?;
        if let Ok(doc) = serde_json::from_slice::<MemoryDocument>(&bytes) {
            return Ok(doc);
        }
        match String::from_utf8(bytes) {
            Ok(text) => Ok(Self::from_text(&text)),
            Err(_) => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                Ok(Self {
                    blocks: vec![Block::Text {
                        text: format!("[embedded document: {name}]"),
                    }],
                    proofing: None,
                })
            }
        }
    }

    /// Line-wise import of Markdown-like text.
    pub fn from_text(text: &str) -> Self {
        let mut blocks = Vec::new();
        let mut table: Vec<Row> = Vec::new();

        for line in text.lines().map(str::trim) {
            if line.starts_with('|') {
                if !is_table_separator(line) {
                    table.push(Row {
                        cells: split_cells(line),
                        borders: BTreeMap::new(),
                    });
                }
                continue;
            }
            if !table.is_empty() {
                blocks.push(gridded_table(std::mem::take(&mut table)));
            }

            if line.is_empty() {
                continue;
            } else if line.eq_ignore_ascii_case("[toc]") {
                blocks.push(Block::Toc { stale: true });
            } else if let Some(source) = image_source(line) {
                blocks.push(Block::Image {
                    source,
                    paragraph: ParagraphState::default(),
                });
            } else {
                blocks.push(Block::Text { text: line.to_string() });
            }
        }
        if !table.is_empty() {
            blocks.push(gridded_table(table));
        }

        Self { blocks, proofing: None }
    }

    pub fn page_break_count(&self) -> usize {
        self.blocks.iter().filter(|b| matches!(b, Block::PageBreak)).count()
    }

    /// Text of every text block, in order.
    pub fn texts(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                Block::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    fn nth_image(&mut self, index: usize) -> Option<&mut ParagraphState> {
        self.blocks
            .iter_mut()
            .filter_map(|b| match b {
                Block::Image { paragraph, .. } => Some(paragraph),
                _ => None,
            })
            .nth(index)
    }

    fn nth_table(&mut self, index: usize) -> Option<&mut Block> {
        self.blocks
            .iter_mut()
            .filter(|b| matches!(b, Block::Table { .. }))
            .nth(index)
    }

    fn nth_toc(&mut self, index: usize) -> Option<&mut bool> {
        self.blocks
            .iter_mut()
            .filter_map(|b| match b {
                Block::Toc { stale } => Some(stale),
                _ => None,
            })
            .nth(index)
    }

    fn count(&self, pred: impl Fn(&Block) -> bool) -> usize {
        self.blocks.iter().filter(|b| pred(b)).count()
    }
}

fn is_table_separator(line: &str) -> bool {
    line.chars().all(|c| matches!(c, '|' | '-' | ':' | ' '))
}

fn split_cells(line: &str) -> Vec<String> {
    line.trim_matches('|')
        .split('|')
        .map(|c| c.trim().to_string())
        .collect()
}

fn image_source(line: &str) -> Option<String> {
    let rest = line.strip_prefix("![")?;
    let (_, after) = rest.split_once("](")?;
    let source = after.strip_suffix(')')?;
    Some(source.to_string())
}

/// Imported tables come with the default full grid.
fn gridded_table(rows: Vec<Row>) -> Block {
    let grid = BorderRule::single(LineWidth::Thin);
    let borders = [
        Edge::Top,
        Edge::Bottom,
        Edge::Left,
        Edge::Right,
        Edge::InsideHorizontal,
        Edge::InsideVertical,
    ]
    .into_iter()
    .map(|edge| (edge, grid))
    .collect();

    Block::Table {
        rows,
        borders,
        paragraph: ParagraphState::default(),
        row_alignment: Alignment::Left,
        autofit: false,
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct HostStats {
    launched: AtomicUsize,
    live: AtomicUsize,
}

struct OpenDocument {
    content: MemoryDocument,
    path: Option<PathBuf>,
}

/// In-process [`AutomationHost`].
pub struct MemoryHost {
    docs: BTreeMap<DocumentId, OpenDocument>,
    next_id: u64,
    quit: bool,
    fail_on: Option<&'static str>,
    stats: Option<Arc<HostStats>>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self {
            docs: BTreeMap::new(),
            next_id: 1,
            quit: false,
            fail_on: None,
            stats: None,
        }
    }

    fn check(&self, method: &'static str) -> Result<()> {
        if self.quit {
            return Err(AutoFormatterError::Host(format!("{method}: host has quit")));
        }
        if self.fail_on == Some(method) {
            return Err(AutoFormatterError::Host(format!("{method}: injected host fault")));
        }
        Ok(())
    }

    fn doc(&mut self, doc: DocumentId) -> Result<&mut OpenDocument> {
        self.docs
            .get_mut(&doc)
            .ok_or_else(|| AutoFormatterError::Host(format!("{doc} is not open")))
    }

    fn content(&mut self, doc: DocumentId) -> Result<&mut MemoryDocument> {
        Ok(&mut self.doc(doc)?.content)
    }

    fn table(&mut self, doc: DocumentId, table: usize) -> Result<&mut Block> {
        self.content(doc)?
            .nth_table(table)
            .ok_or_else(|| AutoFormatterError::Host(format!("{doc} has no table {table}")))
    }

    fn register(&mut self, content: MemoryDocument, path: Option<PathBuf>) -> DocumentId {
        let id = DocumentId(self.next_id);
        self.next_id += 1;
        self.docs.insert(id, OpenDocument { content, path });
        id
    }

    fn is_open_at(&self, path: &Path, except: Option<DocumentId>) -> bool {
        self.docs
            .iter()
            .any(|(id, d)| Some(*id) != except && d.path.as_deref() == Some(path))
    }
}

impl AutomationHost for MemoryHost {
    fn create_document(&mut self, template: &Path) -> Result<DocumentId> {
        self.check("create_document")?;
        if !template.is_file() {
            return Err(AutoFormatterError::Host(format!(
                "template not found: {}",
                template.display()
            )));
        }
        // Non-block templates only contribute styles, which are not modelled.
        let content = MemoryDocument::load(template).unwrap_or_default();
        let id = self.register(content, None);
        debug!(%id, template = %template.display(), "document created");
        Ok(id)
    }

    fn open_document(&mut self, path: &Path) -> Result<DocumentId> {
        self.check("open_document")?;
        if self.is_open_at(path, None) {
            return Err(AutoFormatterError::Host(format!(
                "{} is already open for writing",
                path.display()
            )));
        }
        let content = MemoryDocument::load(path)?;
        Ok(self.register(content, Some(path.to_path_buf())))
    }

    fn clear_content(&mut self, doc: DocumentId) -> Result<()> {
        self.check("clear_content")?;
        self.content(doc)?.blocks.clear();
        Ok(())
    }

    fn insert_file(&mut self, doc: DocumentId, path: &Path) -> Result<()> {
        self.check("insert_file")?;
        let imported = MemoryDocument::import(path)?;
        self.content(doc)?.blocks.extend(imported.blocks);
        Ok(())
    }

    fn insert_page_break(&mut self, doc: DocumentId) -> Result<()> {
        self.check("insert_page_break")?;
        self.content(doc)?.blocks.push(Block::PageBreak);
        Ok(())
    }

    fn inline_image_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.check("inline_image_count")?;
        Ok(self.content(doc)?.count(|b| matches!(b, Block::Image { .. })))
    }

    fn table_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.check("table_count")?;
        Ok(self.content(doc)?.count(|b| matches!(b, Block::Table { .. })))
    }

    fn table_row_count(&mut self, doc: DocumentId, table: usize) -> Result<usize> {
        self.check("table_row_count")?;
        match self.table(doc, table)? {
            Block::Table { rows, .. } => Ok(rows.len()),
            _ => Ok(0),
        }
    }

    fn toc_count(&mut self, doc: DocumentId) -> Result<usize> {
        self.check("toc_count")?;
        Ok(self.content(doc)?.count(|b| matches!(b, Block::Toc { .. })))
    }

    fn set_paragraph_format(
        &mut self,
        doc: DocumentId,
        scope: ParagraphScope,
        format: ParagraphFormat,
    ) -> Result<()> {
        self.check("set_paragraph_format")?;
        match scope {
            ParagraphScope::InlineImage(index) => {
                let paragraph = self
                    .content(doc)?
                    .nth_image(index)
                    .ok_or_else(|| AutoFormatterError::Host(format!("{doc} has no image {index}")))?;
                paragraph.apply(format);
            }
            ParagraphScope::Table(index) => {
                if let Block::Table { paragraph, .. } = self.table(doc, index)? {
                    paragraph.apply(format);
                }
            }
        }
        Ok(())
    }

    fn clear_table_borders(&mut self, doc: DocumentId, table: usize) -> Result<()> {
        self.check("clear_table_borders")?;
        if let Block::Table { rows, borders, .. } = self.table(doc, table)? {
            borders.clear();
            rows.iter_mut().for_each(|r| r.borders.clear());
        }
        Ok(())
    }

    fn set_table_border(&mut self, doc: DocumentId, table: usize, edge: Edge, rule: BorderRule) -> Result<()> {
        self.check("set_table_border")?;
        if let Block::Table { borders, .. } = self.table(doc, table)? {
            borders.insert(edge, rule);
        }
        Ok(())
    }

    fn set_row_border(
        &mut self,
        doc: DocumentId,
        table: usize,
        row: usize,
        edge: Edge,
        rule: BorderRule,
    ) -> Result<()> {
        self.check("set_row_border")?;
        if let Block::Table { rows, .. } = self.table(doc, table)? {
            let target = rows
                .get_mut(row)
                .ok_or_else(|| AutoFormatterError::Host(format!("table {table} has no row {row}")))?;
            target.borders.insert(edge, rule);
        }
        Ok(())
    }

    fn set_row_alignment(&mut self, doc: DocumentId, table: usize, alignment: Alignment) -> Result<()> {
        self.check("set_row_alignment")?;
        if let Block::Table { row_alignment, .. } = self.table(doc, table)? {
            *row_alignment = alignment;
        }
        Ok(())
    }

    fn autofit_window(&mut self, doc: DocumentId, table: usize) -> Result<()> {
        self.check("autofit_window")?;
        if let Block::Table { autofit, .. } = self.table(doc, table)? {
            *autofit = true;
        }
        Ok(())
    }

    fn set_proofing(&mut self, doc: DocumentId, settings: ProofingSettings) -> Result<()> {
        self.check("set_proofing")?;
        self.content(doc)?.proofing = Some(settings);
        Ok(())
    }

    fn refresh_toc(&mut self, doc: DocumentId, index: usize) -> Result<()> {
        self.check("refresh_toc")?;
        let stale = self
            .content(doc)?
            .nth_toc(index)
            .ok_or_else(|| AutoFormatterError::Host(format!("{doc} has no table of contents {index}")))?;
        *stale = false;
        Ok(())
    }

    fn save_as(&mut self, doc: DocumentId, path: &Path) -> Result<()> {
        self.check("save_as")?;
        if self.is_open_at(path, Some(doc)) {
            return Err(AutoFormatterError::Host(format!(
                "{} is open in another document",
                path.display()
            )));
        }
        let open = self.doc(doc)?;
        open.content.save(path)?;
        open.path = Some(path.to_path_buf());
        Ok(())
    }

    fn close(&mut self, doc: DocumentId, save: bool) -> Result<()> {
        self.check("close")?;
        let open = self
            .docs
            .remove(&doc)
            .ok_or_else(|| AutoFormatterError::Host(format!("{doc} is not open")))?;
        if save {
            let path = open
                .path
                .ok_or_else(|| AutoFormatterError::Host(format!("{doc} has never been saved")))?;
            open.content.save(&path)?;
        }
        Ok(())
    }

    fn quit(&mut self) -> Result<()> {
        if self.quit {
            return Ok(());
        }
        self.quit = true;
        self.docs.clear();
        if let Some(stats) = &self.stats {
            stats.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Launches [`MemoryHost`]s and counts them.
#[derive(Clone, Default)]
pub struct MemoryLauncher {
    stats: Arc<HostStats>,
    fail_on: Option<&'static str>,
}

impl MemoryLauncher {
    /// Hosts from this launcher fail every call to `method`.
    pub fn failing_on(method: &'static str) -> Self {
        Self {
            stats: Arc::default(),
            fail_on: Some(method),
        }
    }

    pub fn launched(&self) -> usize {
        self.stats.launched.load(Ordering::SeqCst)
    }

    /// Hosts launched but not yet quit.
    pub fn live_hosts(&self) -> usize {
        self.stats.live.load(Ordering::SeqCst)
    }
}

impl HostLauncher for MemoryLauncher {
    fn launch(&self) -> Result<Box<dyn AutomationHost>> {
        self.stats.launched.fetch_add(1, Ordering::SeqCst);
        self.stats.live.fetch_add(1, Ordering::SeqCst);
        let mut host = MemoryHost::new();
        host.fail_on = self.fail_on;
        host.stats = Some(self.stats.clone());
        Ok(Box::new(host))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn text_import_recognizes_tables_images_and_toc() {
        let doc = MemoryDocument::from_text(
            "# Results\n[TOC]\n| A | B |\n|---|---|\n| 1 | 2 |\n\n![plot](fig/plot.png)\nend",
        );

        assert_eq!(doc.blocks.len(), 5);
        assert!(matches!(doc.blocks[1], Block::Toc { stale: true }));
        match &doc.blocks[2] {
            Block::Table { rows, borders, .. } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(rows[1].cells, vec!["1", "2"]);
                assert_eq!(borders.len(), 6);
            }
            other => panic!("expected table, got {other:?}"),
        }
        match &doc.blocks[3] {
            Block::Image { source, paragraph } => {
                assert_eq!(source, "fig/plot.png");
                assert_eq!(paragraph.first_line_indent, BODY_FIRST_LINE_INDENT);
            }
            other => panic!("expected image, got {other:?}"),
        }
        assert_eq!(doc.texts(), vec!["# Results", "end"]);
    }

    #[test]
    fn binary_files_import_as_placeholder() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cover.docx");
        std::fs::write(&path, [0x50, 0x4b, 0x03, 0x04, 0xff, 0xfe]).unwrap();

        let doc = MemoryDocument::import(&path).unwrap();
        assert_eq!(doc.texts(), vec!["[embedded document: cover.docx]"]);
    }

    #[test]
    fn create_insert_save_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let template = write(tmp.path(), "reference.json", r#"{"blocks":[{"kind":"text","text":"placeholder"}]}"#);
        let part = write(tmp.path(), "part.md", "hello");
        let out = tmp.path().join("merged.json");

        let mut host = MemoryHost::new();
        let doc = host.create_document(&template).unwrap();
        host.clear_content(doc).unwrap();
        host.insert_file(doc, &part).unwrap();
        host.insert_page_break(doc).unwrap();
        host.insert_file(doc, &part).unwrap();
        host.save_as(doc, &out).unwrap();
        host.close(doc, false).unwrap();

        let saved = MemoryDocument::load(&out).unwrap();
        assert_eq!(saved.texts(), vec!["hello", "hello"]);
        assert_eq!(saved.page_break_count(), 1);
    }

    #[test]
    fn one_writer_per_path() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("doc.json");
        MemoryDocument::default().save(&path).unwrap();

        let mut host = MemoryHost::new();
        let first = host.open_document(&path).unwrap();
        let err = host.open_document(&path).unwrap_err();
        assert!(err.to_string().contains("already open"));

        host.close(first, true).unwrap();
        host.open_document(&path).unwrap();
    }

    #[test]
    fn missing_template_is_host_error() {
        let mut host = MemoryHost::new();
        let err = host.create_document(Path::new("/nonexistent/reference.docx")).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Host(_)));
    }

    #[test]
    fn calls_after_quit_fail() {
        let mut host = MemoryHost::new();
        host.quit().unwrap();
        host.quit().unwrap();
        assert!(host.table_count(DocumentId(1)).is_err());
    }

    #[test]
    fn injected_faults_hit_only_the_named_method() {
        let launcher = MemoryLauncher::failing_on("insert_page_break");
        let mut host = launcher.launch().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let template = write(tmp.path(), "t.json", r#"{"blocks":[]}"#);

        let doc = host.create_document(&template).unwrap();
        let err = host.insert_page_break(doc).unwrap_err();
        assert!(err.to_string().contains("injected"));

        host.quit().unwrap();
        assert_eq!(launcher.live_hosts(), 0);
    }
}
