//! Prompt composition and delivery for human-mediated transforms.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::{debug, info};

use autoformatter_shared::{AutoFormatterError, Result};

/// Where the document text goes inside a prompt template.
pub const PROMPT_PLACEHOLDER: &str = "[PASTE DOCUMENT CONTENT HERE]";

/// Read the system prompt.
pub fn load_system_prompt(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(AutoFormatterError::config(format!(
            "prompt file not found: {} (set paths.prompt_file)",
            path.display()
        )));
    }
    std::fs::read_to_string(path).map_err(|e| AutoFormatterError::io(path, e))
}

/// Fill the placeholder with `text`, or append `text` after a blank line
/// when the template has none.
pub fn compose_prompt(template: &str, text: &str) -> String {
    if template.contains(PROMPT_PLACEHOLDER) {
        template.replace(PROMPT_PLACEHOLDER, text)
    } else {
        format!("{template}\n\n{text}")
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Hands a composed prompt to the person doing the transform.
pub trait PromptSink: Send + Sync {
    /// Publish `prompt`; returns a short description of where it went.
    fn publish(&self, prompt: &str) -> Result<String>;
}

/// Copies the prompt to the system clipboard with the first tool that works.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClipboardSink;

/// Clipboard writers, tried in order.
const CLIPBOARD_TOOLS: &[(&str, &[&str])] = &[
    ("wl-copy", &[]),
    ("xclip", &["-selection", "clipboard"]),
    ("xsel", &["--clipboard", "--input"]),
    ("pbcopy", &[]),
];

impl PromptSink for ClipboardSink {
    fn publish(&self, prompt: &str) -> Result<String> {
        for (tool, args) in CLIPBOARD_TOOLS {
            match pipe_to(tool, args, prompt) {
                Ok(()) => {
                    info!(tool, chars = prompt.chars().count(), "prompt copied to clipboard");
                    return Ok(format!("clipboard (via {tool})"));
                }
                Err(e) => debug!(tool, error = %e, "clipboard tool unavailable"),
            }
        }
        Err(AutoFormatterError::config(
            "no clipboard tool found (tried wl-copy, xclip, xsel, pbcopy); use --prompt-file instead",
        ))
    }
}

fn pipe_to(program: &str, args: &[&str], input: &str) -> std::io::Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // Stdin is dropped before waiting so the tool sees EOF; the child is
    // reaped even when the write fails.
    let written = match child.stdin.take() {
        Some(mut stdin) => stdin.write_all(input.as_bytes()),
        None => Ok(()),
    };
    let status = child.wait()?;
    written?;

    if status.success() {
        Ok(())
    } else {
        Err(std::io::Error::other(format!("{program} exited with {status}")))
    }
}

/// Writes the prompt to a file.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PromptSink for FileSink {
    fn publish(&self, prompt: &str) -> Result<String> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AutoFormatterError::io(parent, e))?;
        }
        std::fs::write(&self.path, prompt).map_err(|e| AutoFormatterError::io(&self.path, e))?;
        Ok(self.path.display().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_is_replaced() {
        let template = format!("Format this thesis:\n{PROMPT_PLACEHOLDER}\nUse ===FILE: name=== markers.");
        let prompt = compose_prompt(&template, "RAW TEXT");
        assert_eq!(prompt, "Format this thesis:\nRAW TEXT\nUse ===FILE: name=== markers.");
    }

    #[test]
    fn text_is_appended_without_placeholder() {
        assert_eq!(compose_prompt("Instructions", "RAW"), "Instructions\n\nRAW");
    }

    #[test]
    fn missing_prompt_file_is_config_error() {
        let err = load_system_prompt(Path::new("/nonexistent/prompt.txt")).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Config { .. }));
    }

    #[cfg(unix)]
    #[test]
    fn pipe_to_feeds_stdin() {
        pipe_to("sh", &["-c", "test \"$(cat)\" = hello"], "hello").unwrap();
        assert!(pipe_to("sh", &["-c", "cat >/dev/null; exit 3"], "hello").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn pipe_to_reports_a_tool_that_stops_reading() {
        // Far more than a pipe buffer, to a tool that never reads it.
        let prompt = "x".repeat(4 * 1024 * 1024);
        let err = pipe_to("true", &[], &prompt).unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn file_sink_writes_prompt() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("prompt.txt");

        let location = FileSink::new(&path).publish("hello").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "hello");
        assert!(location.ends_with("prompt.txt"));
    }
}
