//! Final artifact export.
//!
//! Resolves where outputs go, refuses to touch targets another program holds
//! open, renders secondary formats, and places every artifact atomically.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};

use autoformatter_convert::{ConvertJob, Converter, OutputFormat};
use autoformatter_shared::{AutoFormatterError, ExportTarget, Result};

/// Characters not allowed in output base names.
const INVALID_NAME_CHARS: &[char] = &['<', '>', ':', '/', '\\', '|', '?', '*', '"'];

// ---------------------------------------------------------------------------
// Output location
// ---------------------------------------------------------------------------

/// Replace characters file systems reject and trim surrounding spaces and dots.
pub fn sanitize_base_name(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| if INVALID_NAME_CHARS.contains(&c) { '_' } else { c })
        .collect();
    cleaned.trim().trim_matches('.').to_string()
}

/// Empty → `outputs_root`; relative → under `outputs_root`; absolute → as is.
pub fn resolve_output_dir(requested: Option<&Path>, outputs_root: &Path) -> PathBuf {
    match requested {
        Some(dir) if dir.as_os_str().is_empty() => outputs_root.to_path_buf(),
        Some(dir) if dir.is_absolute() => dir.to_path_buf(),
        Some(dir) => outputs_root.join(dir),
        None => outputs_root.to_path_buf(),
    }
}

/// Requested name, else the input's stem; sanitized, with a timestamped
/// fallback when nothing usable is left.
pub fn resolve_base_name(requested: Option<&str>, input: &Path) -> String {
    let raw = requested
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string)
        .or_else(|| input.file_stem().map(|s| s.to_string_lossy().into_owned()))
        .unwrap_or_default();

    let name = sanitize_base_name(&raw);
    if name.is_empty() {
        format!("Output_{}", chrono::Utc::now().timestamp())
    } else {
        name
    }
}

/// `<dir>/<base>.<ext>` for every target, primary first.
pub fn target_paths(dir: &Path, base: &str, targets: &BTreeSet<ExportTarget>) -> Vec<(ExportTarget, PathBuf)> {
    targets
        .iter()
        .map(|t| (*t, dir.join(format!("{base}.{}", t.extension()))))
        .collect()
}

// ---------------------------------------------------------------------------
// Lock probing
// ---------------------------------------------------------------------------

/// Decides whether an existing file is held open by another program.
pub trait LockProbe: Send + Sync {
    fn is_locked(&self, path: &Path) -> bool;
}

/// Non-destructive open-for-append; an access violation means locked.
#[derive(Debug, Clone, Copy, Default)]
pub struct AppendProbe;

impl LockProbe for AppendProbe {
    fn is_locked(&self, path: &Path) -> bool {
        match OpenOptions::new().append(true).open(path) {
            Ok(_) => false,
            Err(e) if e.kind() == ErrorKind::PermissionDenied => true,
            Err(e) => {
                debug!(path = %path.display(), error = %e, "lock probe inconclusive");
                false
            }
        }
    }
}

/// Fail with `TargetLocked` on the first existing target the probe flags.
pub fn check_targets(paths: &[(ExportTarget, PathBuf)], probe: &dyn LockProbe) -> Result<()> {
    for (_, path) in paths {
        if path.exists() && probe.is_locked(path) {
            warn!(path = %path.display(), "output target is locked");
            return Err(AutoFormatterError::TargetLocked { path: path.clone() });
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Exporter
// ---------------------------------------------------------------------------

/// One written output file.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ExportedArtifact {
    pub target: ExportTarget,
    pub path: PathBuf,
    pub sha256: String,
    pub size_bytes: u64,
}

/// Writes the final artifacts of a build.
#[derive(Clone)]
pub struct Exporter {
    converter: Arc<dyn Converter>,
    probe: Arc<dyn LockProbe>,
}

impl Exporter {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self {
            converter,
            probe: Arc::new(AppendProbe),
        }
    }

    pub fn with_probe(mut self, probe: Arc<dyn LockProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Export `built` (the primary-format document) to `output_dir/base_name.*`.
    ///
    /// Every existing target is probed before any conversion starts. Secondary
    /// renderings are produced next to `built`; nothing reaches `output_dir`
    /// until all of them succeeded. When the primary format was not requested,
    /// `built` is removed afterwards.
    #[instrument(skip_all, fields(built = %built.display(), dir = %output_dir.display(), base = base_name))]
    pub fn export(
        &self,
        built: &Path,
        output_dir: &Path,
        base_name: &str,
        targets: &BTreeSet<ExportTarget>,
    ) -> Result<Vec<ExportedArtifact>> {
        if targets.is_empty() {
            return Err(AutoFormatterError::validation("no export target selected"));
        }

        let paths = target_paths(output_dir, base_name, targets);
        check_targets(&paths, self.probe.as_ref())?;

        // Render first, place afterwards.
        let mut staged: Vec<(ExportTarget, PathBuf, PathBuf)> = Vec::with_capacity(paths.len());
        for (target, dest) in &paths {
            let source = match target {
                ExportTarget::Primary => built.to_path_buf(),
                ExportTarget::Secondary => {
                    let rendered = built.with_file_name(format!("{base_name}.rendered.pdf"));
                    self.converter
                        .convert(&ConvertJob::new(built, &rendered, OutputFormat::Pdf))?;
                    rendered
                }
            };
            staged.push((*target, source, dest.clone()));
        }

        std::fs::create_dir_all(output_dir).map_err(|e| AutoFormatterError::io(output_dir, e))?;

        let artifacts = place_all(&staged)?;
        for artifact in &artifacts {
            info!(path = %artifact.path.display(), size = artifact.size_bytes, "exported");
        }

        if !targets.contains(&ExportTarget::Primary) {
            if let Err(e) = std::fs::remove_file(built) {
                debug!(error = %e, "could not discard intermediate document");
            }
        }

        Ok(artifacts)
    }
}

fn temp_sibling(dest: &Path) -> PathBuf {
    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    dest.with_file_name(format!(".{file_name}.tmp"))
}

/// Copy every source into a hidden sibling of its destination, then rename
/// them all into place. On any failure the temp files and every destination
/// already renamed are removed, so a failed export leaves no target behind.
fn place_all(staged: &[(ExportTarget, PathBuf, PathBuf)]) -> Result<Vec<ExportedArtifact>> {
    let mut temps: Vec<PathBuf> = Vec::with_capacity(staged.len());
    let mut artifacts = Vec::with_capacity(staged.len());

    for (target, source, dest) in staged {
        let temp = temp_sibling(dest);
        temps.push(temp.clone());
        let copied = std::fs::copy(source, &temp)
            .map_err(|e| AutoFormatterError::io(&temp, e))
            .and_then(|_| describe(*target, &temp, dest));
        match copied {
            Ok(artifact) => artifacts.push(artifact),
            Err(e) => {
                discard(&temps);
                return Err(e);
            }
        }
    }

    let mut placed: Vec<PathBuf> = Vec::with_capacity(staged.len());
    for ((_, _, dest), temp) in staged.iter().zip(&temps) {
        if let Err(e) = std::fs::rename(temp, dest) {
            warn!(path = %dest.display(), error = %e, "placing artifact failed, rolling back");
            discard(&temps);
            discard(&placed);
            return Err(AutoFormatterError::io(dest, e));
        }
        placed.push(dest.clone());
    }

    Ok(artifacts)
}

fn discard(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            if e.kind() != ErrorKind::NotFound {
                debug!(path = %path.display(), error = %e, "cleanup failed");
            }
        }
    }
}

/// Digest and size of `written`, reported under its final `path`.
fn describe(target: ExportTarget, written: &Path, path: &Path) -> Result<ExportedArtifact> {
    let bytes = std::fs::read(written).map_err(|e| AutoFormatterError::io(written, e))?;

    let mut hasher = Sha256::new();
    hasher.update(&bytes);

    Ok(ExportedArtifact {
        target,
        path: path.to_path_buf(),
        sha256: format!("{:x}", hasher.finalize()),
        size_bytes: bytes.len() as u64,
    })
}
