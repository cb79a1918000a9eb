//! Component registry: the static catalog of document building blocks.
//!
//! The registry is immutable for the life of the process. Builds never
//! mutate it; they derive their own id → path map with [`ComponentRegistry::resolve_paths`].

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{AutoFormatterError, Result};
use crate::types::{ComponentSpec, SourceKind};

/// Ordered, id-unique catalog of [`ComponentSpec`]s.
#[derive(Debug, Clone)]
pub struct ComponentRegistry {
    entries: Vec<ComponentSpec>,
}

impl ComponentRegistry {
    /// Build a registry, rejecting duplicate ids.
    ///
    /// Relative static locators are resolved against `assets_dir`; dynamic
    /// locators are kept as given (they name fragment files).
    pub fn new(entries: Vec<ComponentSpec>, assets_dir: &Path) -> Result<Self> {
        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(entries.len());

        for spec in entries {
            if spec.id.trim().is_empty() {
                return Err(AutoFormatterError::validation("component id must not be empty"));
            }
            if !seen.insert(spec.id.clone()) {
                return Err(AutoFormatterError::validation(format!(
                    "duplicate component id '{}'",
                    spec.id
                )));
            }
            resolved.push(anchor(spec, assets_dir));
        }

        Ok(Self { entries: resolved })
    }

    /// The built-in thesis catalog.
    pub fn builtin(assets_dir: &Path) -> Self {
        let entries = builtin_components()
            .into_iter()
            .map(|spec| anchor(spec, assets_dir))
            .collect();
        Self { entries }
    }

    pub fn get(&self, id: &str) -> Option<&ComponentSpec> {
        self.entries.iter().find(|c| c.id == id)
    }

    /// Entries in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &ComponentSpec> {
        self.entries.iter()
    }

    pub fn ids(&self) -> Vec<&str> {
        self.entries.iter().map(|c| c.id.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Derive a per-build id → path map: registry locators first, then
    /// `overrides` on top. The registry itself is left untouched.
    pub fn resolve_paths(&self, overrides: &BTreeMap<String, PathBuf>) -> BTreeMap<String, PathBuf> {
        self.entries
            .iter()
            .map(|c| {
                let path = overrides
                    .get(&c.id)
                    .cloned()
                    .unwrap_or_else(|| c.locator.clone());
                (c.id.clone(), path)
            })
            .collect()
    }

    /// Overrides pointing every dynamic component at its fragment inside `work_dir`.
    pub fn fragment_overrides(&self, work_dir: &Path) -> BTreeMap<String, PathBuf> {
        self.entries
            .iter()
            .filter(|c| c.kind == SourceKind::Dynamic)
            .filter_map(|c| c.fragment_name().map(|name| (c.id.clone(), work_dir.join(name))))
            .collect()
    }
}

fn anchor(mut spec: ComponentSpec, assets_dir: &Path) -> ComponentSpec {
    if spec.kind == SourceKind::Static && spec.locator.is_relative() {
        spec.locator = assets_dir.join(&spec.locator);
    }
    spec
}

/// Default component list, in thesis order.
pub fn builtin_components() -> Vec<ComponentSpec> {
    use SourceKind::{Dynamic, Static};

    vec![
        ComponentSpec::new("cover", Static, "cover.docx", "Thesis cover"),
        ComponentSpec::new("cover_exp", Static, "cover_exp.docx", "Lab report cover"),
        ComponentSpec::new(
            "originality",
            Static,
            "originality_declaration.docx",
            "Originality declaration",
        ),
        ComponentSpec::new("abs_cn", Dynamic, "abstract_cn.md", "Chinese abstract"),
        ComponentSpec::new("abs_en", Dynamic, "abstract_en.md", "English abstract"),
        ComponentSpec::new("symbols", Static, "symbols.docx", "List of symbols"),
        ComponentSpec::new("toc", Static, "toc.docx", "Table of contents"),
        ComponentSpec::new("body", Dynamic, "body.md", "Main body"),
    ]
}

/// The standard full-thesis selection.
pub const DEFAULT_THESIS_COMPONENTS: &[&str] = &[
    "cover",
    "originality",
    "abs_cn",
    "abs_en",
    "symbols",
    "toc",
    "body",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_keeps_declaration_order() {
        let reg = ComponentRegistry::builtin(Path::new("/assets"));
        assert_eq!(
            reg.ids(),
            vec!["cover", "cover_exp", "originality", "abs_cn", "abs_en", "symbols", "toc", "body"]
        );
    }

    #[test]
    fn static_locators_resolve_against_assets_dir() {
        let reg = ComponentRegistry::builtin(Path::new("/assets"));
        assert_eq!(reg.get("cover").unwrap().locator, PathBuf::from("/assets/cover.docx"));
        // Dynamic locators stay bare file names.
        assert_eq!(reg.get("body").unwrap().locator, PathBuf::from("body.md"));
    }

    #[test]
    fn duplicate_ids_rejected() {
        let entries = vec![
            ComponentSpec::new("a", SourceKind::Static, "a.docx", ""),
            ComponentSpec::new("a", SourceKind::Dynamic, "a.md", ""),
        ];
        let err = ComponentRegistry::new(entries, Path::new("/")).unwrap_err();
        assert!(err.to_string().contains("duplicate component id 'a'"));
    }

    #[test]
    fn resolve_paths_applies_overrides_without_mutating() {
        let reg = ComponentRegistry::builtin(Path::new("/assets"));
        let overrides = reg.fragment_overrides(Path::new("/work"));
        assert_eq!(overrides.len(), 3);

        let paths = reg.resolve_paths(&overrides);
        assert_eq!(paths["body"], PathBuf::from("/work/body.md"));
        assert_eq!(paths["cover"], PathBuf::from("/assets/cover.docx"));

        // The shared catalog still points at the bare fragment name.
        assert_eq!(reg.get("body").unwrap().locator, PathBuf::from("body.md"));
    }

    #[test]
    fn default_selection_is_registered() {
        let reg = ComponentRegistry::builtin(Path::new("/assets"));
        for id in DEFAULT_THESIS_COMPONENTS {
            assert!(reg.get(id).is_some(), "missing {id}");
        }
    }
}
