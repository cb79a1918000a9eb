//! Subprocess drivers for pandoc and the fixed-layout renderer.

use std::ffi::OsString;
use std::path::Path;
use std::process::Command;

use tracing::{debug, instrument};

use autoformatter_shared::{AutoFormatterError, ConverterConfig, Result};

use crate::{ConvertJob, Converter, InputFormat, OutputFormat};

/// Converter backed by real command-line tools.
///
/// Plain-text and word-processor output go through `program` (pandoc
/// compatible); PDF output goes through `renderer_program` (LibreOffice
/// compatible, run headless).
#[derive(Debug, Clone)]
pub struct ExternalConverter {
    program: String,
    renderer_program: String,
}

impl ExternalConverter {
    pub fn new(program: impl Into<String>, renderer_program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            renderer_program: renderer_program.into(),
        }
    }

    pub fn from_config(config: &ConverterConfig) -> Self {
        Self::new(&config.program, &config.renderer_program)
    }

    fn render_pdf(&self, job: &ConvertJob) -> Result<()> {
        // The renderer picks the output name itself: <outdir>/<input stem>.pdf
        let staging = tempfile::tempdir().map_err(|e| AutoFormatterError::io(&job.output, e))?;
        run_tool(&self.renderer_program, renderer_args(&job.input, staging.path()), &job.input)?;

        let stem = job
            .input
            .file_stem()
            .ok_or_else(|| AutoFormatterError::conversion(&job.input, "input has no file name"))?;
        let produced = staging
            .path()
            .join(format!("{}.pdf", stem.to_string_lossy()));
        if !produced.exists() {
            return Err(AutoFormatterError::conversion(
                &job.input,
                format!("renderer reported success but {} was not produced", produced.display()),
            ));
        }

        // Copy rather than rename: the staging dir may sit on another filesystem.
        std::fs::copy(&produced, &job.output)
            .map(|_| ())
            .map_err(|e| AutoFormatterError::io(&job.output, e))
    }
}

impl Converter for ExternalConverter {
    #[instrument(skip_all, fields(input = %job.input.display(), format = ?job.format))]
    fn convert(&self, job: &ConvertJob) -> Result<()> {
        match job.format {
            OutputFormat::Pdf => self.render_pdf(job),
            OutputFormat::PlainText | OutputFormat::Docx => {
                let reader = InputFormat::from_path(&job.input)?.reader();
                run_tool(&self.program, pandoc_args(job, reader), &job.input)
            }
        }
    }
}

/// Arguments for a pandoc run.
fn pandoc_args(job: &ConvertJob, reader: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![job.input.clone().into(), "-f".into(), reader.into()];

    match job.format {
        OutputFormat::PlainText => {
            args.extend(["-t".into(), "plain".into(), "--wrap=none".into()]);
        }
        OutputFormat::Docx | OutputFormat::Pdf => {
            args.extend(["-t".into(), "docx".into()]);
            if let Some(style) = &job.style_reference {
                let mut flag = OsString::from("--reference-doc=");
                flag.push(style);
                args.push(flag);
            }
        }
    }

    args.push("-o".into());
    args.push(job.output.clone().into());
    args
}

/// Arguments for a headless PDF rendering into `outdir`.
fn renderer_args(input: &Path, outdir: &Path) -> Vec<OsString> {
    vec![
        "--headless".into(),
        "--convert-to".into(),
        "pdf".into(),
        "--outdir".into(),
        outdir.into(),
        input.into(),
    ]
}

/// Run a tool to completion; a non-zero exit becomes a conversion error.
fn run_tool(program: &str, args: Vec<OsString>, input: &Path) -> Result<()> {
    debug!(program, ?args, "running converter");

    let output = Command::new(program).args(&args).output().map_err(|e| {
        AutoFormatterError::conversion(input, format!("failed to run `{program}`: {e}. Is it installed?"))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AutoFormatterError::conversion(
            input,
            format!("`{program}` exited with {}: {}", output.status, stderr.trim()),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn plain_text_args() {
        let job = ConvertJob::new("/in/thesis.docx", "/tmp/x.txt", OutputFormat::PlainText);
        assert_eq!(
            strings(pandoc_args(&job, "docx")),
            vec!["/in/thesis.docx", "-f", "docx", "-t", "plain", "--wrap=none", "-o", "/tmp/x.txt"]
        );
    }

    #[test]
    fn docx_args_carry_reference_doc() {
        let job = ConvertJob::new("/w/body.md", "/w/body.docx", OutputFormat::Docx)
            .with_style_reference(PathBuf::from("/assets/reference.docx"));
        let args = strings(pandoc_args(&job, "markdown"));
        assert!(args.contains(&"--reference-doc=/assets/reference.docx".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("/w/body.docx"));
    }

    #[test]
    fn renderer_args_are_headless() {
        let args = strings(renderer_args(Path::new("/w/final.docx"), Path::new("/w/out")));
        assert_eq!(
            args,
            vec!["--headless", "--convert-to", "pdf", "--outdir", "/w/out", "/w/final.docx"]
        );
    }

    #[test]
    fn missing_program_is_conversion_failure() {
        let converter = ExternalConverter::new("autoformatter-no-such-pandoc", "soffice");
        let job = ConvertJob::new("/in/a.md", "/tmp/a.txt", OutputFormat::PlainText);
        let err = converter.convert(&job).unwrap_err();
        assert!(matches!(err, AutoFormatterError::Conversion { .. }));
        assert!(err.to_string().contains("Is it installed"));
    }

    #[cfg(unix)]
    #[test]
    fn nonzero_exit_is_conversion_failure() {
        // `false` ignores its arguments and exits 1.
        let converter = ExternalConverter::new("false", "false");
        let job = ConvertJob::new("/in/a.md", "/tmp/a.txt", OutputFormat::PlainText);
        let err = converter.convert(&job).unwrap_err();
        assert!(err.to_string().contains("exited with"));
    }
}
