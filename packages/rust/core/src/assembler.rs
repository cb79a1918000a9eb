//! Document assembler.
//!
//! Merges an ordered list of documents into one through the automation host,
//! separated by page breaks, on top of the shared style template.

use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use autoformatter_host::{AutomationHost, DocumentId};
use autoformatter_shared::{AutoFormatterError, Result};

/// Output from a successful merge.
#[derive(Debug, Clone)]
pub struct AssembleResult {
    /// Where the merged document was saved.
    pub path: PathBuf,
    /// Documents inserted, in order.
    pub inserted: Vec<PathBuf>,
    /// Documents that did not exist and were left out.
    pub skipped: Vec<PathBuf>,
}

impl AssembleResult {
    pub fn page_breaks(&self) -> usize {
        self.inserted.len().saturating_sub(1)
    }
}

/// Merge `ordered` into a new document saved at `output`.
///
/// The session starts from `template` so its built-in styles carry over;
/// placeholder content in the template is discarded first. Missing inputs
/// are logged and skipped. Any host fault aborts the merge, and the partial
/// document is closed without saving.
#[instrument(skip_all, fields(documents = ordered.len(), output = %output.display()))]
pub fn assemble(
    host: &mut dyn AutomationHost,
    ordered: &[PathBuf],
    template: &Path,
    output: &Path,
) -> Result<AssembleResult> {
    let (present, skipped): (Vec<PathBuf>, Vec<PathBuf>) =
        ordered.iter().cloned().partition(|p| p.is_file());

    for path in &skipped {
        warn!(path = %path.display(), "component missing, skipping");
    }

    if present.is_empty() {
        return Err(AutoFormatterError::Assembly(
            "none of the requested components exist; nothing to merge".into(),
        ));
    }

    let doc = host
        .create_document(template)
        .map_err(|e| AutoFormatterError::Assembly(format!("could not start document session: {e}")))?;

    if let Err(e) = merge_into(host, doc, &present, output) {
        if let Err(close_err) = host.close(doc, false) {
            debug!(error = %close_err, "discarding partial document failed");
        }
        return Err(AutoFormatterError::Assembly(e.to_string()));
    }

    host.close(doc, false)
        .map_err(|e| AutoFormatterError::Assembly(format!("closing merged document: {e}")))?;

    info!(
        inserted = present.len(),
        skipped = skipped.len(),
        "document assembly complete"
    );

    Ok(AssembleResult {
        path: output.to_path_buf(),
        inserted: present,
        skipped,
    })
}

fn merge_into(host: &mut dyn AutomationHost, doc: DocumentId, files: &[PathBuf], output: &Path) -> Result<()> {
    host.clear_content(doc)?;

    let last = files.len() - 1;
    for (i, file) in files.iter().enumerate() {
        debug!(file = %file.display(), "inserting");
        host.insert_file(doc, file)?;
        if i < last {
            host.insert_page_break(doc)?;
        }
    }

    host.save_as(doc, output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoformatter_host::{Block, HostLauncher, MemoryDocument, MemoryHost, MemoryLauncher};

    struct Fixture {
        _tmp: tempfile::TempDir,
        dir: PathBuf,
        template: PathBuf,
    }

    fn fixture() -> Fixture {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().to_path_buf();
        let template = dir.join("reference.json");
        std::fs::write(&template, r#"{"blocks":[{"kind":"text","text":"Lorem placeholder"}]}"#).unwrap();
        Fixture { _tmp: tmp, dir, template }
    }

    fn part(fx: &Fixture, name: &str, text: &str) -> PathBuf {
        let path = fx.dir.join(name);
        std::fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn merges_in_order_with_page_breaks_between() {
        let fx = fixture();
        let docs = vec![
            part(&fx, "cover.md", "Cover"),
            part(&fx, "abstract.md", "Abstract"),
            part(&fx, "body.md", "Body"),
        ];
        let out = fx.dir.join("merged.json");

        let mut host = MemoryHost::new();
        let result = assemble(&mut host, &docs, &fx.template, &out).unwrap();

        assert_eq!(result.page_breaks(), 2);
        let merged = MemoryDocument::load(&out).unwrap();
        assert_eq!(merged.texts(), vec!["Cover", "Abstract", "Body"]);
        assert_eq!(merged.page_break_count(), 2);
        assert!(!matches!(merged.blocks.last(), Some(Block::PageBreak)));
    }

    #[test]
    fn single_document_has_no_page_break() {
        let fx = fixture();
        let docs = vec![part(&fx, "body.md", "Body")];
        let out = fx.dir.join("merged.json");

        assemble(&mut MemoryHost::new(), &docs, &fx.template, &out).unwrap();

        assert_eq!(MemoryDocument::load(&out).unwrap().page_break_count(), 0);
    }

    #[test]
    fn missing_components_are_skipped() {
        let fx = fixture();
        let docs = vec![
            fx.dir.join("cover.docx"),
            part(&fx, "body.md", "Body"),
            part(&fx, "end.md", "End"),
        ];
        let out = fx.dir.join("merged.json");

        let result = assemble(&mut MemoryHost::new(), &docs, &fx.template, &out).unwrap();

        assert_eq!(result.skipped, vec![fx.dir.join("cover.docx")]);
        assert_eq!(result.inserted.len(), 2);
        assert_eq!(MemoryDocument::load(&out).unwrap().page_break_count(), 1);
    }

    #[test]
    fn nothing_to_merge_is_an_assembly_failure() {
        let fx = fixture();
        let err = assemble(
            &mut MemoryHost::new(),
            &[fx.dir.join("absent.docx")],
            &fx.template,
            &fx.dir.join("merged.json"),
        )
        .unwrap_err();
        assert!(matches!(err, AutoFormatterError::Assembly(_)));
    }

    #[test]
    fn host_fault_discards_partial_document() {
        let fx = fixture();
        let docs = vec![part(&fx, "a.md", "A"), part(&fx, "b.md", "B")];
        let out = fx.dir.join("merged.json");

        let launcher = MemoryLauncher::failing_on("insert_page_break");
        let mut host = launcher.launch().unwrap();
        let err = assemble(host.as_mut(), &docs, &fx.template, &out).unwrap_err();

        assert!(matches!(err, AutoFormatterError::Assembly(_)));
        assert!(err.to_string().contains("injected"));
        assert!(!out.exists());
    }

    #[test]
    fn template_placeholder_is_cleared() {
        let fx = fixture();
        let docs = vec![part(&fx, "body.md", "Body")];
        let out = fx.dir.join("merged.json");

        assemble(&mut MemoryHost::new(), &docs, &fx.template, &out).unwrap();

        let merged = MemoryDocument::load(&out).unwrap();
        assert!(!merged.texts().contains(&"Lorem placeholder"));
    }
}
