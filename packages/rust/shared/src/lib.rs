//! Shared types, error model, and configuration for AutoFormatter.
//!
//! This crate is the foundation depended on by all other AutoFormatter crates.
//! It provides:
//! - [`AutoFormatterError`] — the unified error type
//! - Domain types ([`ComponentSpec`], [`BuildRequest`], [`ExportTarget`], [`BuildId`])
//! - The [`ComponentRegistry`] catalog
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod registry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AiConfig, AppConfig, ConverterConfig, HostConfig, MissingFragmentPolicy, PROVIDER_PRESETS,
    PathsConfig, PipelineConfig, ProviderPreset, config_dir, config_file_path, expand_path,
    init_config, load_config, load_config_from, provider_preset, validate_api_key,
};
pub use error::{AutoFormatterError, Result};
pub use registry::{ComponentRegistry, DEFAULT_THESIS_COMPONENTS, builtin_components};
pub use types::{BuildId, BuildRequest, ComponentSpec, ExportTarget, SourceKind, TransformMode};
