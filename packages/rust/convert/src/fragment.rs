//! Dynamic fragment → intermediate word-processor document.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, instrument};

use autoformatter_shared::{AutoFormatterError, Result};

use crate::{ConvertJob, Converter, OutputFormat};

/// Converts Markdown fragments using a shared style template, so headings and
/// body text pick up the template's predefined styles.
#[derive(Clone)]
pub struct FragmentConverter {
    converter: Arc<dyn Converter>,
}

impl FragmentConverter {
    pub fn new(converter: Arc<dyn Converter>) -> Self {
        Self { converter }
    }

    /// Convert `markdown` to `<out_dir>/<stem>.docx` and return that path.
    #[instrument(skip_all, fields(fragment = %markdown.display()))]
    pub fn convert(&self, markdown: &Path, style_template: &Path, out_dir: &Path) -> Result<PathBuf> {
        if !markdown.is_file() {
            let id = markdown
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            return Err(AutoFormatterError::ComponentMissing {
                id,
                path: markdown.to_path_buf(),
            });
        }

        let stem = markdown
            .file_stem()
            .ok_or_else(|| AutoFormatterError::conversion(markdown, "fragment has no file name"))?;
        let output = out_dir.join(format!("{}.{}", stem.to_string_lossy(), OutputFormat::Docx.extension()));

        let mut job = ConvertJob::new(markdown, &output, OutputFormat::Docx);
        if style_template.is_file() {
            job = job.with_style_reference(style_template);
        } else {
            debug!(template = %style_template.display(), "style template missing, converting without reference");
        }

        self.converter.convert(&job)?;
        if !output.exists() {
            return Err(AutoFormatterError::conversion(markdown, "converter produced no output"));
        }

        debug!(output = %output.display(), "fragment converted");
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records jobs and writes a marker file.
    #[derive(Default)]
    struct RecordingConverter {
        jobs: Mutex<Vec<ConvertJob>>,
    }

    impl Converter for RecordingConverter {
        fn convert(&self, job: &ConvertJob) -> Result<()> {
            std::fs::write(&job.output, "converted").unwrap();
            self.jobs.lock().unwrap().push(job.clone());
            Ok(())
        }
    }

    #[test]
    fn converts_into_out_dir_with_style_reference() {
        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("body.md");
        std::fs::write(&md, "# Intro\ntext").unwrap();
        let style = tmp.path().join("reference.docx");
        std::fs::write(&style, "style").unwrap();
        let out = tmp.path().join("converted");
        std::fs::create_dir(&out).unwrap();

        let recorder = Arc::new(RecordingConverter::default());
        let path = FragmentConverter::new(recorder.clone())
            .convert(&md, &style, &out)
            .unwrap();

        assert_eq!(path, out.join("body.docx"));
        let jobs = recorder.jobs.lock().unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].format, OutputFormat::Docx);
        assert_eq!(jobs[0].style_reference.as_deref(), Some(style.as_path()));
    }

    #[test]
    fn missing_template_converts_without_reference() {
        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("abstract_en.md");
        std::fs::write(&md, "Abstract").unwrap();

        let recorder = Arc::new(RecordingConverter::default());
        FragmentConverter::new(recorder.clone())
            .convert(&md, &tmp.path().join("absent.docx"), tmp.path())
            .unwrap();

        assert!(recorder.jobs.lock().unwrap()[0].style_reference.is_none());
    }

    #[test]
    fn missing_fragment_is_component_missing() {
        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("body.md");
        let recorder = Arc::new(RecordingConverter::default());
        let err = FragmentConverter::new(recorder.clone())
            .convert(&md, tmp.path(), tmp.path())
            .unwrap_err();
        match err {
            AutoFormatterError::ComponentMissing { id, path } => {
                assert_eq!(id, "body.md");
                assert_eq!(path, md);
            }
            other => panic!("expected ComponentMissing, got {other:?}"),
        }
        assert!(recorder.jobs.lock().unwrap().is_empty());
    }

    #[test]
    fn converter_without_output_is_conversion_failure() {
        struct Silent;
        impl Converter for Silent {
            fn convert(&self, _job: &ConvertJob) -> Result<()> {
                Ok(())
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let md = tmp.path().join("body.md");
        std::fs::write(&md, "# Intro").unwrap();
        let err = FragmentConverter::new(Arc::new(Silent))
            .convert(&md, tmp.path(), tmp.path())
            .unwrap_err();
        assert!(matches!(err, AutoFormatterError::Conversion { .. }));
    }
}
