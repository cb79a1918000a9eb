//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use tracing::info;

use autoformatter_convert::{ExternalConverter, TextExtractor};
use autoformatter_shared::{
    AppConfig, DEFAULT_THESIS_COMPONENTS, ExportTarget, TransformMode, init_config, load_config,
    load_config_from,
};

use crate::build::{BuildArgs, cmd_build};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// AutoFormatter — turn a rough draft into a formatted thesis document.
#[derive(Parser)]
#[command(
    name = "autoformatter",
    version,
    about = "Reformat documents with AI and assemble them into a styled final document.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.autoformatter/autoformatter.toml.
    #[arg(long, global = true, env = "AUTOFORMATTER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Who reformats the text.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub(crate) enum Mode {
    /// Call the configured AI endpoint.
    Api,
    /// Copy a prompt for a web chat and read the pasted reply from stdin.
    Web,
}

impl From<Mode> for TransformMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Api => TransformMode::Automated,
            Mode::Web => TransformMode::HumanMediated,
        }
    }
}

/// Output formats.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Format {
    Docx,
    Pdf,
}

impl From<Format> for ExportTarget {
    fn from(format: Format) -> Self {
        match format {
            Format::Docx => ExportTarget::Primary,
            Format::Pdf => ExportTarget::Secondary,
        }
    }
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Build a document from an input file.
    Build {
        /// Source document to reformat.
        input: PathBuf,

        /// Components to merge, in order (comma-separated).
        #[arg(short, long, value_delimiter = ',', default_values_t = DEFAULT_THESIS_COMPONENTS.iter().map(|s| s.to_string()))]
        components: Vec<String>,

        /// Transform mode.
        #[arg(short, long, default_value = "api")]
        mode: Mode,

        /// Output directory (asked for when omitted; relative paths land
        /// under the configured outputs dir).
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Output base name (defaults to the input file name).
        #[arg(short, long)]
        name: Option<String>,

        /// Formats to export (repeatable).
        #[arg(short, long = "format", default_value = "docx")]
        formats: Vec<Format>,

        /// Web mode: write the prompt to this file instead of the clipboard.
        #[arg(long)]
        prompt_file: Option<PathBuf>,

        /// Web mode: read the AI reply from this file instead of stdin.
        #[arg(long)]
        response_file: Option<PathBuf>,

        /// Use the in-process document host and copy files instead of
        /// running external converters.
        #[arg(long)]
        dry_run: bool,

        /// Print the exported artifacts as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List the registered components.
    Components,

    /// Extract the plain text of a document.
    Extract {
        /// Document to read.
        input: PathBuf,

        /// Write the text here instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Split a saved AI reply into fragment files.
    Split {
        /// File holding the AI reply.
        response: PathBuf,

        /// Directory to write fragments to.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "autoformatter=info",
        1 => "autoformatter=debug",
        _ => "autoformatter=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config;
    match cli.command {
        Command::Build {
            input,
            components,
            mode,
            out,
            name,
            formats,
            prompt_file,
            response_file,
            dry_run,
            json,
        } => {
            let config = config_from(config_path.as_deref())?;
            let args = BuildArgs {
                input,
                components,
                mode: mode.into(),
                out,
                name,
                targets: formats.into_iter().map(ExportTarget::from).collect(),
                prompt_file,
                response_file,
                dry_run,
                json,
            };
            cmd_build(&config, args).await
        }
        Command::Components => cmd_components(&config_from(config_path.as_deref())?),
        Command::Extract { input, out } => {
            cmd_extract(&config_from(config_path.as_deref())?, &input, out.as_deref()).await
        }
        Command::Split { response, out } => {
            cmd_split(&config_from(config_path.as_deref())?, &response, &out)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(config_path.as_deref()).await,
        },
    }
}

fn config_from(path: Option<&Path>) -> Result<AppConfig> {
    let config = match path {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    Ok(config)
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_components(config: &AppConfig) -> Result<()> {
    let registry = config.registry()?;

    println!();
    for spec in registry.iter() {
        let status = match spec.kind {
            autoformatter_shared::SourceKind::Static if !spec.locator.is_file() => "missing",
            _ => "ok",
        };
        println!(
            "  {:<12} {:<8} {:<8} {}",
            spec.id,
            spec.kind.as_str(),
            status,
            spec.description
        );
        println!("  {:<12} {}", "", spec.locator.display());
    }
    println!();
    println!("  Default selection: {}", DEFAULT_THESIS_COMPONENTS.join(","));
    println!();
    Ok(())
}

async fn cmd_extract(config: &AppConfig, input: &Path, out: Option<&Path>) -> Result<()> {
    info!(input = %input.display(), "extracting text");

    let extractor = TextExtractor::new(Arc::new(ExternalConverter::from_config(&config.converter)));
    let path = input.to_path_buf();
    let text = tokio::task::spawn_blocking(move || extractor.extract(&path)).await??;

    match out {
        Some(out) => {
            std::fs::write(out, &text).map_err(|e| eyre!("cannot write {}: {e}", out.display()))?;
            println!("Wrote {} characters to {}", text.chars().count(), out.display());
        }
        None => print!("{text}"),
    }
    Ok(())
}

fn cmd_split(config: &AppConfig, response: &Path, out: &Path) -> Result<()> {
    let raw = std::fs::read_to_string(response)
        .map_err(|e| eyre!("cannot read {}: {e}", response.display()))?;

    let written = autoformatter_markdown::split_response(&raw, out, &config.paths.debug_dir())?;

    println!();
    println!("  Wrote {} fragment(s) to {}:", written.len(), out.display());
    for name in &written {
        println!("    {name}");
    }
    println!();
    Ok(())
}

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    let config = config_from(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn build_defaults() {
        let cli = Cli::parse_from(["autoformatter", "build", "thesis.docx"]);
        let Command::Build { components, mode, formats, out, .. } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(components, DEFAULT_THESIS_COMPONENTS);
        assert!(matches!(mode, Mode::Api));
        assert_eq!(formats, vec![Format::Docx]);
        assert!(out.is_none());
    }

    #[test]
    fn build_flags() {
        let cli = Cli::parse_from([
            "autoformatter",
            "build",
            "draft.md",
            "--components",
            "cover,body",
            "--mode",
            "web",
            "-f",
            "docx",
            "-f",
            "pdf",
            "--out",
            "final",
        ]);
        let Command::Build { components, mode, formats, out, .. } = cli.command else {
            panic!("expected build");
        };
        assert_eq!(components, vec!["cover", "body"]);
        assert_eq!(TransformMode::from(mode), TransformMode::HumanMediated);
        assert_eq!(formats, vec![Format::Docx, Format::Pdf]);
        assert_eq!(out, Some(PathBuf::from("final")));
    }
}
