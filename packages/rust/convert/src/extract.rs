//! Input document → normalized plain text.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, instrument};

use autoformatter_shared::{AutoFormatterError, Result};

use crate::{ConvertJob, Converter, InputFormat, OutputFormat};

/// Runs the converter to plain text and reads the result back.
#[derive(Clone)]
pub struct TextExtractor {
    converter: Arc<dyn Converter>,
}

impl TextExtractor {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }

    /// Extract the text of `input`.
    ///
    /// The intermediate file lives in a private temporary directory that is
    /// removed when this returns. No retry.
    #[instrument(skip_all, fields(input = %input.display()))]
    pub fn extract(&self, input: &Path) -> Result<String> {
        if !input.is_file() {
            return Err(AutoFormatterError::validation(format!(
                "input document not found: {}",
                input.display()
            )));
        }
        InputFormat::from_path(input)?;

        let scratch = tempfile::tempdir().map_err(|e| AutoFormatterError::io(input, e))?;
        let text_path = scratch.path().join("extracted.txt");

        self.converter
            .convert(&ConvertJob::new(input, &text_path, OutputFormat::PlainText))?;

        let text = std::fs::read_to_string(&text_path)
            .map_err(|e| AutoFormatterError::io(&text_path, e))?;

        info!(chars = text.chars().count(), "extracted plain text");
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PassthroughConverter;

    struct FailingConverter;

    impl Converter for FailingConverter {
        fn convert(&self, job: &ConvertJob) -> Result<()> {
            Err(AutoFormatterError::conversion(&job.input, "exit status 1"))
        }
    }

    /// Reports success without writing anything.
    struct SilentConverter;

    impl Converter for SilentConverter {
        fn convert(&self, _job: &ConvertJob) -> Result<()> {
            Ok(())
        }
    }

    fn input_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn extracts_text_through_converter() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path(), "draft.md", "Chapter one\n\nSome text.");

        let text = TextExtractor::new(Arc::new(PassthroughConverter))
            .extract(&input)
            .unwrap();

        assert_eq!(text, "Chapter one\n\nSome text.");
    }

    #[test]
    fn converter_failure_propagates() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path(), "draft.docx", "x");

        let err = TextExtractor::new(Arc::new(FailingConverter))
            .extract(&input)
            .unwrap_err();

        assert!(matches!(err, AutoFormatterError::Conversion { .. }));
    }

    #[test]
    fn unreadable_intermediate_is_io_failure() {
        let tmp = tempfile::tempdir().unwrap();
        let input = input_file(tmp.path(), "draft.docx", "x");

        let err = TextExtractor::new(Arc::new(SilentConverter))
            .extract(&input)
            .unwrap_err();

        assert!(matches!(err, AutoFormatterError::Io { .. }));
    }

    #[test]
    fn rejects_missing_or_unknown_input() {
        let tmp = tempfile::tempdir().unwrap();
        let extractor = TextExtractor::new(Arc::new(PassthroughConverter));

        let err = extractor.extract(&tmp.path().join("absent.docx")).unwrap_err();
        assert!(err.to_string().contains("not found"));

        let image = input_file(tmp.path(), "scan.png", "x");
        let err = extractor.extract(&image).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Validation { .. }));
    }
}
