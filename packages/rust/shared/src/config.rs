//! Application configuration for AutoFormatter.
//!
//! User config lives at `~/.autoformatter/autoformatter.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{AutoFormatterError, Result};
use crate::registry::ComponentRegistry;
use crate::types::ComponentSpec;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "autoformatter.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".autoformatter";

// ---------------------------------------------------------------------------
// Config structs (matching autoformatter.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Resource and output locations.
    #[serde(default)]
    pub paths: PathsConfig,

    /// External converter programs.
    #[serde(default)]
    pub converter: ConverterConfig,

    /// Document-automation host bridge.
    #[serde(default)]
    pub host: HostConfig,

    /// AI transform endpoint.
    #[serde(default)]
    pub ai: AiConfig,

    /// Pipeline policy knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Replaces the built-in component catalog when non-empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub components: Vec<ComponentSpec>,
}

/// `[paths]` section. A leading `~/` expands to the home directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding static component documents.
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,

    /// Style template (reference document) shared by conversion and merge.
    #[serde(default = "default_style_template")]
    pub style_template: String,

    /// System prompt sent with every transform.
    #[serde(default = "default_prompt_file")]
    pub prompt_file: String,

    /// Root for relative or omitted output directories.
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: String,

    /// Where unparseable AI replies are kept for inspection.
    #[serde(default = "default_debug_dir")]
    pub debug_dir: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            assets_dir: default_assets_dir(),
            style_template: default_style_template(),
            prompt_file: default_prompt_file(),
            outputs_dir: default_outputs_dir(),
            debug_dir: default_debug_dir(),
        }
    }
}

fn default_assets_dir() -> String {
    "~/.autoformatter/assets".into()
}
fn default_style_template() -> String {
    "~/.autoformatter/reference.docx".into()
}
fn default_prompt_file() -> String {
    "~/.autoformatter/prompt.txt".into()
}
fn default_outputs_dir() -> String {
    "~/.autoformatter/outputs".into()
}
fn default_debug_dir() -> String {
    "~/.autoformatter/debug".into()
}

impl PathsConfig {
    pub fn assets_dir(&self) -> PathBuf {
        expand_path(&self.assets_dir)
    }

    pub fn style_template(&self) -> PathBuf {
        expand_path(&self.style_template)
    }

    pub fn prompt_file(&self) -> PathBuf {
        expand_path(&self.prompt_file)
    }

    pub fn outputs_dir(&self) -> PathBuf {
        expand_path(&self.outputs_dir)
    }

    pub fn debug_dir(&self) -> PathBuf {
        expand_path(&self.debug_dir)
    }
}

/// `[converter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConverterConfig {
    /// Markdown/plain-text converter (pandoc-compatible CLI).
    #[serde(default = "default_converter_program")]
    pub program: String,

    /// Fixed-layout renderer (LibreOffice-compatible CLI).
    #[serde(default = "default_renderer_program")]
    pub renderer_program: String,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            program: default_converter_program(),
            renderer_program: default_renderer_program(),
        }
    }
}

fn default_converter_program() -> String {
    "pandoc".into()
}
fn default_renderer_program() -> String {
    "soffice".into()
}

/// `[host]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Interpreter or binary that runs the bridge (e.g. `python`).
    #[serde(default = "default_bridge_cmd")]
    pub bridge_cmd: String,

    /// Bridge script passed as the first argument.
    #[serde(default = "default_bridge_script")]
    pub bridge_script: String,

    /// Working directory for the bridge subprocess.
    #[serde(default = "default_bridge_working_dir")]
    pub working_dir: String,

    /// Grace period after the host reports ready, in ms.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_ms: u64,

    /// How long to wait for the bridge to exit after shutdown before
    /// killing it, in ms.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            bridge_cmd: default_bridge_cmd(),
            bridge_script: default_bridge_script(),
            working_dir: default_bridge_working_dir(),
            startup_delay_ms: default_startup_delay(),
            shutdown_timeout_ms: default_shutdown_timeout(),
        }
    }
}

fn default_bridge_cmd() -> String {
    "python".into()
}
fn default_bridge_script() -> String {
    "~/.autoformatter/bridge/word_host.py".into()
}
fn default_bridge_working_dir() -> String {
    ".".into()
}
fn default_startup_delay() -> u64 {
    200
}
fn default_shutdown_timeout() -> u64 {
    10_000
}

/// `[ai]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AiConfig {
    /// Preset name (`OpenAI`, `DeepSeek`, `Kimi`, `Gemini`, `Custom`).
    #[serde(default = "default_provider")]
    pub provider: String,

    /// Overrides the preset base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// Overrides the preset model.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            base_url: None,
            model: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_provider() -> String {
    "DeepSeek".into()
}
fn default_api_key_env() -> String {
    "AUTOFORMATTER_API_KEY".into()
}
fn default_temperature() -> f32 {
    0.05
}
fn default_timeout() -> u64 {
    60
}

impl AiConfig {
    /// Base URL: explicit value, else the provider preset's.
    pub fn resolved_base_url(&self) -> Option<String> {
        self.base_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .or_else(|| {
                provider_preset(&self.provider)
                    .map(|p| p.base_url.to_string())
                    .filter(|u| !u.is_empty())
            })
    }

    /// Model name: explicit value, else the provider preset's.
    pub fn resolved_model(&self) -> Option<String> {
        self.model
            .clone()
            .filter(|m| !m.trim().is_empty())
            .or_else(|| {
                provider_preset(&self.provider)
                    .map(|p| p.model.to_string())
                    .filter(|m| !m.is_empty())
            })
    }
}

/// A known OpenAI-compatible endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderPreset {
    pub name: &'static str,
    pub base_url: &'static str,
    pub model: &'static str,
    pub description: &'static str,
}

/// Built-in provider presets.
pub const PROVIDER_PRESETS: &[ProviderPreset] = &[
    ProviderPreset {
        name: "OpenAI",
        base_url: "https://api.openai.com/v1",
        model: "gpt-5.2",
        description: "OpenAI official API",
    },
    ProviderPreset {
        name: "DeepSeek",
        base_url: "https://api.deepseek.com/v1",
        model: "deepseek-reasoner",
        description: "DeepSeek API (R1 reasoning model)",
    },
    ProviderPreset {
        name: "Kimi",
        base_url: "https://api.moonshot.cn/v1",
        model: "moonshot-v1-8k",
        description: "Moonshot Kimi API",
    },
    ProviderPreset {
        name: "Gemini",
        base_url: "https://generativelanguage.googleapis.com/v1beta/openai/",
        model: "gemini-3-pro-preview",
        description: "Google Gemini API (OpenAI-compatible)",
    },
    ProviderPreset {
        name: "Custom",
        base_url: "",
        model: "",
        description: "Custom relay or other compatible API",
    },
];

/// Look up a preset by name, case-insensitively.
pub fn provider_preset(name: &str) -> Option<&'static ProviderPreset> {
    PROVIDER_PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

/// What to do when a requested dynamic fragment is missing or fails to convert.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingFragmentPolicy {
    /// Stop the build; the merge would silently lose required content.
    #[default]
    Fail,
    /// Log and leave the component out.
    Skip,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Pasted replies shorter than this (after trimming) are rejected.
    #[serde(default = "default_min_response_len")]
    pub min_response_len: usize,

    #[serde(default)]
    pub missing_fragment: MissingFragmentPolicy,

    /// Proofing locale applied to the whole document (2052 = zh-CN).
    #[serde(default = "default_language_id")]
    pub proofing_language_id: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_response_len: default_min_response_len(),
            missing_fragment: MissingFragmentPolicy::default(),
            proofing_language_id: default_language_id(),
        }
    }
}

fn default_min_response_len() -> usize {
    10
}
fn default_language_id() -> u32 {
    2052
}

impl AppConfig {
    /// The component catalog: `[[components]]` when given, else the built-in one.
    pub fn registry(&self) -> Result<ComponentRegistry> {
        let assets = self.paths.assets_dir();
        if self.components.is_empty() {
            Ok(ComponentRegistry::builtin(&assets))
        } else {
            ComponentRegistry::new(self.components.clone(), &assets)
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Expand a leading `~/` to the user's home directory.
pub fn expand_path(raw: &str) -> PathBuf {
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| PathBuf::from(raw)),
        None => PathBuf::from(raw),
    }
}

/// Get the path to the config directory (`~/.autoformatter/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| AutoFormatterError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.autoformatter/autoformatter.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AutoFormatterError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        AutoFormatterError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AutoFormatterError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AutoFormatterError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AutoFormatterError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Read the API key from the configured env var, failing when unset or empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.ai.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(AutoFormatterError::config(format!(
            "AI API key not found. Set the {var_name} environment variable, \
             or use the human-mediated mode (--mode web)."
        ))),
    }
}
