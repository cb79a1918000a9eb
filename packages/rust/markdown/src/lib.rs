//! Splitting of AI replies into named Markdown fragments.
//!
//! The AI is asked to answer with one or more units of the form
//!
//! ```text
//! ===FILE: body.md===
//! # Introduction
//! ...
//! ```
//!
//! Each unit's content runs until the next `===FILE:` marker or the end of
//! the reply. A single code fence around the whole reply is tolerated.

mod fence;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, instrument, warn};

use autoformatter_shared::{AutoFormatterError, Result};

/// Opening token of a fragment marker.
pub const MARKER_OPEN: &str = "===FILE:";

/// Closing token of a fragment marker.
pub const MARKER_CLOSE: &str = "===";

/// File name the raw reply is saved under when nothing can be parsed.
pub const DEBUG_RESPONSE_FILE: &str = "debug_ai_response.txt";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// One named unit of a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Bare file name (whitespace-trimmed).
    pub name: String,
    /// Body text (whitespace-trimmed).
    pub content: String,
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a reply into fragments, in order of appearance.
///
/// Duplicated names are returned as-is; callers writing them to disk get
/// last-write-wins.
pub fn parse_fragments(raw: &str) -> Vec<Fragment> {
    static MARKER_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?s)===FILE:\s*(.*?)===").expect("valid regex"));

    let body = fence::strip_code_fence(raw);

    let markers: Vec<(usize, usize, String)> = MARKER_RE
        .captures_iter(&body)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().trim().to_string();
            Some((whole.start(), whole.end(), name))
        })
        .collect();

    markers
        .iter()
        .enumerate()
        .map(|(i, (_, content_start, name))| {
            let content_end = markers
                .get(i + 1)
                .map(|(next_start, _, _)| *next_start)
                .unwrap_or(body.len());
            Fragment {
                name: name.clone(),
                content: body[*content_start..content_end].trim().to_string(),
            }
        })
        .collect()
}

/// A fragment name is usable when it is a single, non-empty path component.
fn is_bare_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\'])
        && !name.contains('\0')
}

// ---------------------------------------------------------------------------
// Splitting to disk
// ---------------------------------------------------------------------------

/// Split `raw` into fragment files under `target_dir` and return the written names.
///
/// `target_dir` is created if absent. When the reply holds no usable marker,
/// the unprocessed reply is saved verbatim to `debug_dir/debug_ai_response.txt`
/// and a parse error is returned; no fallback heuristics are attempted.
#[instrument(skip(raw), fields(raw_len = raw.len(), target = %target_dir.display()))]
pub fn split_response(raw: &str, target_dir: &Path, debug_dir: &Path) -> Result<BTreeSet<String>> {
    let fragments: Vec<Fragment> = parse_fragments(raw)
        .into_iter()
        .filter(|f| {
            let ok = is_bare_file_name(&f.name);
            if !ok {
                warn!(name = %f.name, "ignoring fragment with a non-bare file name");
            }
            ok
        })
        .collect();

    if fragments.is_empty() {
        let debug_path = save_debug_response(raw, debug_dir);
        let location = debug_path
            .map(|p| format!("; raw reply saved to {}", p.display()))
            .unwrap_or_default();
        return Err(AutoFormatterError::parse(format!(
            "no `{MARKER_OPEN} <name>{MARKER_CLOSE}` markers found in the AI reply{location}"
        )));
    }

    std::fs::create_dir_all(target_dir).map_err(|e| AutoFormatterError::io(target_dir, e))?;

    let mut written = BTreeSet::new();
    for fragment in &fragments {
        let path = target_dir.join(&fragment.name);
        if written.contains(&fragment.name) {
            debug!(name = %fragment.name, "duplicate fragment name, overwriting");
        }
        std::fs::write(&path, &fragment.content).map_err(|e| AutoFormatterError::io(&path, e))?;
        info!(name = %fragment.name, bytes = fragment.content.len(), "saved fragment");
        written.insert(fragment.name.clone());
    }

    Ok(written)
}

/// Persist the raw reply for post-mortem inspection. Best-effort.
fn save_debug_response(raw: &str, debug_dir: &Path) -> Option<PathBuf> {
    let path = debug_dir.join(DEBUG_RESPONSE_FILE);
    let result = std::fs::create_dir_all(debug_dir).and_then(|()| std::fs::write(&path, raw));
    match result {
        Ok(()) => {
            warn!(path = %path.display(), "unparseable AI reply saved for inspection");
            Some(path)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to save unparseable AI reply");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn load_fixture(name: &str) -> String {
        let path = format!("../../../fixtures/responses/{name}");
        std::fs::read_to_string(&path).unwrap_or_else(|_| panic!("missing fixture: {path}"))
    }

    #[test]
    fn parse_two_units_trims_names_and_content() {
        let fragments = parse_fragments("===FILE: a=== X ===FILE: b=== Y");
        assert_eq!(
            fragments,
            vec![
                Fragment { name: "a".into(), content: "X".into() },
                Fragment { name: "b".into(), content: "Y".into() },
            ]
        );
    }

    #[test]
    fn parse_keeps_multiline_content() {
        let raw = "===FILE: body.md===\n# Intro\n\ntext\n\n## Next\nmore\n";
        let fragments = parse_fragments(raw);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].content, "# Intro\n\ntext\n\n## Next\nmore");
    }

    #[test]
    fn parse_ignores_preamble_before_first_marker() {
        let raw = "Sure! Here are your files.\n===FILE: body.md===\nbody";
        let fragments = parse_fragments(raw);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].content, "body");
    }

    #[test]
    fn parse_unwraps_fenced_reply() {
        let raw = "```markdown\n===FILE: abstract_en.md===\nAbstract text\n```";
        let fragments = parse_fragments(raw);
        assert_eq!(fragments.len(), 1);
        assert_eq!(fragments[0].name, "abstract_en.md");
        assert_eq!(fragments[0].content, "Abstract text");
    }

    #[test]
    fn parse_without_markers_is_empty() {
        assert!(parse_fragments("just some prose").is_empty());
        assert!(parse_fragments("").is_empty());
    }

    #[test]
    fn bare_file_name_rules() {
        assert!(is_bare_file_name("body.md"));
        assert!(!is_bare_file_name(""));
        assert!(!is_bare_file_name(".."));
        assert!(!is_bare_file_name("../escape.md"));
        assert!(!is_bare_file_name("dir\\x.md"));
    }

    #[test]
    fn split_writes_fragments() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("fragments");
        let debug = tmp.path().join("debug");

        let names = split_response("===FILE: a=== X ===FILE: b=== Y", &target, &debug).unwrap();

        assert_eq!(names, BTreeSet::from(["a".to_string(), "b".to_string()]));
        assert_eq!(std::fs::read_to_string(target.join("a")).unwrap(), "X");
        assert_eq!(std::fs::read_to_string(target.join("b")).unwrap(), "Y");
        assert!(!debug.exists());
    }

    #[test]
    fn split_duplicate_names_last_write_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let raw = "===FILE: body.md=== first ===FILE: body.md=== second";

        let names = split_response(raw, tmp.path(), &tmp.path().join("debug")).unwrap();

        assert_eq!(names.len(), 1);
        assert_eq!(std::fs::read_to_string(tmp.path().join("body.md")).unwrap(), "second");
    }

    #[test]
    fn split_without_markers_saves_raw_reply_verbatim() {
        let tmp = tempfile::tempdir().unwrap();
        let debug = tmp.path().join("debug");
        let raw = "```\nI could not follow the format, sorry.\n```\n";

        let err = split_response(raw, &tmp.path().join("out"), &debug).unwrap_err();

        assert!(matches!(err, AutoFormatterError::Parse { .. }));
        let saved = std::fs::read_to_string(debug.join(DEBUG_RESPONSE_FILE)).unwrap();
        assert_eq!(saved, raw);
        assert!(!tmp.path().join("out").exists());
    }

    #[test]
    fn split_empty_reply_still_leaves_debug_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let err = split_response("", tmp.path(), tmp.path()).unwrap_err();
        assert!(err.to_string().contains("markers"));
        assert!(tmp.path().join(DEBUG_RESPONSE_FILE).exists());
    }

    #[test]
    fn split_only_unsafe_names_is_a_parse_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let err = split_response("===FILE: ../x.md=== boom", &tmp.path().join("out"), tmp.path())
            .unwrap_err();
        assert!(matches!(err, AutoFormatterError::Parse { .. }));
        assert!(!tmp.path().join("x.md").exists());
    }

    #[test]
    fn split_thesis_fixture() {
        let raw = load_fixture("thesis_reply.txt");
        let tmp = tempfile::tempdir().unwrap();

        let names = split_response(&raw, tmp.path(), &tmp.path().join("debug")).unwrap();

        assert_eq!(
            names,
            BTreeSet::from([
                "abstract_cn.md".to_string(),
                "abstract_en.md".to_string(),
                "body.md".to_string(),
            ])
        );
        let body = std::fs::read_to_string(tmp.path().join("body.md")).unwrap();
        assert!(body.starts_with("# 1 Introduction"));
        assert!(body.contains("| Sample | Yield |"));
        assert!(!body.contains("===FILE:"));
    }
}
