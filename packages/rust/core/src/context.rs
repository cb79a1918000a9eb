//! Per-build mutable state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use autoformatter_shared::{AutoFormatterError, ComponentRegistry, ComponentSpec, Result};

use crate::gate::GateReceiver;

/// Everything one in-flight build owns. Dropped or closed at build end,
/// which deletes the working directory.
pub struct PipelineContext {
    work_dir: TempDir,
    /// Requested components that exist in the registry, in request order.
    selected: Vec<ComponentSpec>,
    /// id → concrete path for this build; the registry stays untouched.
    resolved: BTreeMap<String, PathBuf>,
    /// Ids left out of the merge (missing or skipped fragments).
    dropped: Vec<String>,
    pub(crate) response: Option<GateReceiver<String>>,
    pub(crate) output_location: Option<GateReceiver<PathBuf>>,
}

impl PipelineContext {
    /// Create a fresh working directory (under `work_root` when given) and
    /// resolve `requested` against `registry`. Unknown ids are logged and left out.
    pub fn create(
        registry: &ComponentRegistry,
        requested: &[String],
        work_root: Option<&Path>,
        response: GateReceiver<String>,
        output_location: GateReceiver<PathBuf>,
    ) -> Result<Self> {
        let work_dir = match work_root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(|e| AutoFormatterError::io(root, e))?;
                tempfile::Builder::new()
                    .prefix("autoformatter-")
                    .tempdir_in(root)
                    .map_err(|e| AutoFormatterError::io(root, e))?
            }
            None => tempfile::Builder::new()
                .prefix("autoformatter-")
                .tempdir()
                .map_err(|e| AutoFormatterError::io(std::env::temp_dir(), e))?,
        };
        debug!(path = %work_dir.path().display(), "working directory created");

        let mut selected = Vec::with_capacity(requested.len());
        for id in requested {
            match registry.get(id) {
                Some(spec) => selected.push(spec.clone()),
                None => warn!(id = %id, "unknown component, skipping"),
            }
        }

        let overrides = registry.fragment_overrides(&fragments_dir(work_dir.path()));
        let resolved = registry.resolve_paths(&overrides);

        Ok(Self {
            work_dir,
            selected,
            resolved,
            dropped: Vec::new(),
            response: Some(response),
            output_location: Some(output_location),
        })
    }

    pub fn work_dir(&self) -> &Path {
        self.work_dir.path()
    }

    /// Where split fragments are written.
    pub fn fragments_dir(&self) -> PathBuf {
        fragments_dir(self.work_dir.path())
    }

    /// Where converted fragments are written.
    pub fn converted_dir(&self) -> PathBuf {
        self.work_dir.path().join("converted")
    }

    /// Where the merged document is saved before export.
    pub fn merged_path(&self) -> PathBuf {
        self.work_dir.path().join("merged.docx")
    }

    pub fn selected(&self) -> &[ComponentSpec] {
        &self.selected
    }

    pub fn resolved_path(&self, id: &str) -> Option<&Path> {
        self.resolved.get(id).map(PathBuf::as_path)
    }

    /// Point `id` at a new concrete path for the rest of the build.
    pub fn redirect(&mut self, id: &str, path: PathBuf) {
        self.resolved.insert(id.to_string(), path);
    }

    /// Leave `id` out of the merge.
    pub fn drop_component(&mut self, id: &str) {
        if !self.dropped.iter().any(|d| d == id) {
            self.dropped.push(id.to_string());
        }
    }

    /// Concrete paths to merge, in request order.
    pub fn merge_order(&self) -> Vec<PathBuf> {
        self.selected
            .iter()
            .filter(|c| !self.dropped.contains(&c.id))
            .filter_map(|c| self.resolved.get(&c.id).cloned())
            .collect()
    }

    /// Delete the working directory now, reporting failures instead of
    /// swallowing them in `Drop`.
    pub fn close(self) -> Result<()> {
        let path = self.work_dir.path().to_path_buf();
        self.work_dir.close().map_err(|e| AutoFormatterError::io(path, e))
    }
}

fn fragments_dir(work_dir: &Path) -> PathBuf {
    work_dir.join("fragments")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::gate;
    use autoformatter_shared::SourceKind;

    fn context(registry: &ComponentRegistry, ids: &[&str]) -> PipelineContext {
        let (_r_tx, r_rx) = gate("response");
        let (_o_tx, o_rx) = gate("output location");
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        PipelineContext::create(registry, &ids, None, r_rx, o_rx).unwrap()
    }

    #[test]
    fn merge_order_follows_request_and_skips_unknown_ids() {
        let registry = ComponentRegistry::builtin(Path::new("/assets"));
        let ctx = context(&registry, &["cover", "nonsense", "body"]);

        let order = ctx.merge_order();
        assert_eq!(order.len(), 2);
        assert_eq!(order[0], PathBuf::from("/assets/cover.docx"));
        assert_eq!(order[1], ctx.fragments_dir().join("body.md"));
    }

    #[test]
    fn redirect_and_drop_only_affect_this_build() {
        let registry = ComponentRegistry::new(
            vec![
                ComponentSpec::new("cover", SourceKind::Static, "cover.docx", ""),
                ComponentSpec::new("abs", SourceKind::Dynamic, "abstract.md", ""),
                ComponentSpec::new("body", SourceKind::Dynamic, "body.md", ""),
            ],
            Path::new("/assets"),
        )
        .unwrap();
        let mut ctx = context(&registry, &["cover", "abs", "body"]);

        let converted = ctx.converted_dir().join("body.docx");
        ctx.redirect("body", converted.clone());
        ctx.drop_component("abs");

        assert_eq!(ctx.merge_order(), vec![PathBuf::from("/assets/cover.docx"), converted]);
        assert_eq!(registry.get("body").unwrap().locator, PathBuf::from("body.md"));
    }

    #[test]
    fn close_removes_working_directory() {
        let root = tempfile::tempdir().unwrap();
        let registry = ComponentRegistry::builtin(Path::new("/assets"));
        let (_r, r_rx) = gate("response");
        let (_o, o_rx) = gate("output location");
        let ctx = PipelineContext::create(&registry, &["body".into()], Some(root.path()), r_rx, o_rx).unwrap();

        let work = ctx.work_dir().to_path_buf();
        assert!(work.starts_with(root.path()));
        std::fs::create_dir_all(ctx.fragments_dir()).unwrap();
        std::fs::write(ctx.fragments_dir().join("body.md"), "x").unwrap();

        ctx.close().unwrap();
        assert!(!work.exists());
    }
}
