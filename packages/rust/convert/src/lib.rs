//! External document conversion for AutoFormatter.
//!
//! The pipeline never renders formats itself. Everything goes through the
//! [`Converter`] contract: one synchronous call per file, where a non-zero
//! exit of the underlying tool is the only failure signal consumed.
//!
//! - [`ExternalConverter`] drives `pandoc` (text/Markdown/Word) and a
//!   LibreOffice-compatible renderer (fixed-layout PDF).
//! - [`PassthroughConverter`] copies bytes through unchanged; used for dry
//!   runs without external tools installed.
//! - [`TextExtractor`] and [`FragmentConverter`] are the two pipeline stages
//!   built on top of the contract.

mod external;
mod extract;
mod fragment;

use std::path::{Path, PathBuf};

use autoformatter_shared::{AutoFormatterError, Result};

pub use external::ExternalConverter;
pub use extract::TextExtractor;
pub use fragment::FragmentConverter;

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

/// Target format of a conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    /// Unwrapped plain text.
    PlainText,
    /// Editable word-processor document.
    Docx,
    /// Fixed-layout rendering.
    Pdf,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::PlainText => "txt",
            Self::Docx => "docx",
            Self::Pdf => "pdf",
        }
    }
}

/// Source formats the converter is asked to read, tagged explicitly rather
/// than re-derived from the file name at every call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputFormat {
    Docx,
    Odt,
    Markdown,
    PlainText,
    Rtf,
    Html,
    Latex,
    Epub,
}

impl InputFormat {
    /// Classify `path` by extension (case-insensitive).
    pub fn from_path(path: &Path) -> Result<Self> {
        let ext = path
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        let format = match ext.as_str() {
            "docx" => Self::Docx,
            "odt" => Self::Odt,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::PlainText,
            "rtf" => Self::Rtf,
            "html" | "htm" => Self::Html,
            "tex" => Self::Latex,
            "epub" => Self::Epub,
            "" => {
                return Err(AutoFormatterError::validation(format!(
                    "{} has no file extension; cannot tell its format",
                    path.display()
                )));
            }
            other => {
                return Err(AutoFormatterError::validation(format!(
                    "unsupported input format '.{other}' for {}",
                    path.display()
                )));
            }
        };
        Ok(format)
    }

    /// Reader name understood by pandoc's `-f` flag.
    pub fn reader(&self) -> &'static str {
        match self {
            Self::Docx => "docx",
            Self::Odt => "odt",
            Self::Markdown => "markdown",
            Self::PlainText => "markdown",
            Self::Rtf => "rtf",
            Self::Html => "html",
            Self::Latex => "latex",
            Self::Epub => "epub",
        }
    }
}

// ---------------------------------------------------------------------------
// Converter contract
// ---------------------------------------------------------------------------

/// One external conversion request.
#[derive(Debug, Clone)]
pub struct ConvertJob {
    pub input: PathBuf,
    pub output: PathBuf,
    pub format: OutputFormat,
    /// Formatting reference (style template) for word-processor output.
    pub style_reference: Option<PathBuf>,
}

impl ConvertJob {
    pub fn new(input: impl Into<PathBuf>, output: impl Into<PathBuf>, format: OutputFormat) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            format,
            style_reference: None,
        }
    }

    pub fn with_style_reference(mut self, style: impl Into<PathBuf>) -> Self {
        self.style_reference = Some(style.into());
        self
    }
}

/// A synchronous external converter.
///
/// Implementations must write `job.output` on success and return
/// [`AutoFormatterError::Conversion`] otherwise. No partial-output recovery.
pub trait Converter: Send + Sync {
    fn convert(&self, job: &ConvertJob) -> Result<()>;
}

/// Copies the input to the output unchanged, whatever the format.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughConverter;

impl Converter for PassthroughConverter {
    fn convert(&self, job: &ConvertJob) -> Result<()> {
        std::fs::copy(&job.input, &job.output)
            .map(|_| ())
            .map_err(|e| AutoFormatterError::conversion(&job.input, e.to_string()))
    }
}
