//! Structural post-processing of a merged document.
//!
//! Four independent sub-steps, each best-effort and idempotent: a failing
//! step is logged and recorded, and the rest still run.

use std::path::Path;

use tracing::{info, instrument, warn};

use autoformatter_host::{
    Alignment, AutomationHost, BorderRule, DocumentId, Edge, LineWidth, ParagraphFormat,
    ParagraphScope, ProofingSettings,
};
use autoformatter_shared::Result;

/// Rule above and below every table.
const OUTER_RULE: BorderRule = BorderRule::single(LineWidth::Thick);
/// Rule beneath the header row.
const HEADER_RULE: BorderRule = BorderRule::single(LineWidth::Thin);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Locale,
    ImageCentering,
    TableRules,
    TocRefresh,
}

impl Step {
    pub const ALL: [Step; 4] = [
        Step::Locale,
        Step::ImageCentering,
        Step::TableRules,
        Step::TocRefresh,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Locale => "locale normalization",
            Self::ImageCentering => "image centering",
            Self::TableRules => "table normalization",
            Self::TocRefresh => "table of contents refresh",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostProcessOptions {
    /// Proofing locale for the whole document.
    pub language_id: u32,
}

/// Which sub-steps failed, if any.
#[derive(Debug, Clone, Default)]
pub struct PostProcessReport {
    pub failures: Vec<(Step, String)>,
}

impl PostProcessReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Normalize the document at `path` in place.
///
/// Only opening and saving the document can fail the call; sub-step faults
/// end up in the report.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn postprocess(
    host: &mut dyn AutomationHost,
    path: &Path,
    options: &PostProcessOptions,
) -> Result<PostProcessReport> {
    let doc = host.open_document(path)?;
    let mut report = PostProcessReport::default();

    for step in Step::ALL {
        let outcome = match step {
            Step::Locale => normalize_locale(host, doc, options.language_id),
            Step::ImageCentering => center_images(host, doc),
            Step::TableRules => normalize_tables(host, doc),
            Step::TocRefresh => refresh_tocs(host, doc),
        };
        if let Err(e) = outcome {
            warn!(step = step.name(), error = %e, "post-processing step failed");
            report.failures.push((step, e.to_string()));
        }
    }

    host.close(doc, true)?;
    info!(failed_steps = report.failures.len(), "post-processing complete");
    Ok(report)
}

/// Proofing against the target locale, with squiggles switched off.
fn normalize_locale(host: &mut dyn AutomationHost, doc: DocumentId, language_id: u32) -> Result<()> {
    host.set_proofing(
        doc,
        ProofingSettings {
            language_id,
            show_spelling_errors: false,
            show_grammar_errors: false,
        },
    )
}

fn center_images(host: &mut dyn AutomationHost, doc: DocumentId) -> Result<()> {
    let format = ParagraphFormat {
        alignment: Some(Alignment::Center),
        left_indent: None,
        first_line_indent: Some(0.0),
    };
    for index in 0..host.inline_image_count(doc)? {
        host.set_paragraph_format(doc, ParagraphScope::InlineImage(index), format)?;
    }
    Ok(())
}

/// Three-line tables: thick top and bottom rules, a thin rule under the
/// header row, nothing else.
fn normalize_tables(host: &mut dyn AutomationHost, doc: DocumentId) -> Result<()> {
    let format = ParagraphFormat {
        alignment: Some(Alignment::Center),
        left_indent: Some(0.0),
        first_line_indent: Some(0.0),
    };

    for table in 0..host.table_count(doc)? {
        host.clear_table_borders(doc, table)?;
        host.set_table_border(doc, table, Edge::Top, OUTER_RULE)?;
        host.set_table_border(doc, table, Edge::Bottom, OUTER_RULE)?;
        if host.table_row_count(doc, table)? > 1 {
            host.set_row_border(doc, table, 0, Edge::Bottom, HEADER_RULE)?;
        }

        host.set_paragraph_format(doc, ParagraphScope::Table(table), format)?;
        host.set_row_alignment(doc, table, Alignment::Center)?;
        host.autofit_window(doc, table)?;
    }
    Ok(())
}

fn refresh_tocs(host: &mut dyn AutomationHost, doc: DocumentId) -> Result<()> {
    for index in 0..host.toc_count(doc)? {
        host.refresh_toc(doc, index)?;
    }
    Ok(())
}
