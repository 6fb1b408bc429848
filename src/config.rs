//! Path & Config (C1): project configuration, loaded once from
//! `<project_root>/.clinerules.config.json`, deep-merged over defaults.
//! Mirrors `cline_utils.dependency_system.utils.config_manager.ConfigManager`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::path_utils::normalize_path;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    pub doc_similarity: f64,
    pub code_similarity: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            doc_similarity: 0.7,
            code_similarity: 0.8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Models {
    pub doc_model_name: String,
    pub code_model_name: String,
}

impl Default for Models {
    fn default() -> Self {
        Models {
            doc_model_name: "all-MiniLM-L6-v2".to_string(),
            code_model_name: "all-mpnet-base-v2".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Paths {
    pub memory_dir: String,
    pub embeddings_dir: String,
    pub backups_dir: String,
    pub doc_dir: String,
    pub main_tracker_filename: String,
    pub doc_tracker_filename: String,
}

impl Default for Paths {
    fn default() -> Self {
        Paths {
            memory_dir: "cline_docs/memory".to_string(),
            embeddings_dir: "embeddings".to_string(),
            backups_dir: "cline_docs/backups".to_string(),
            doc_dir: "docs".to_string(),
            main_tracker_filename: "module_relationship_tracker.md".to_string(),
            doc_tracker_filename: "doc_tracker.md".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingDevice {
    Auto,
    Cpu,
    Cuda,
    Mps,
}

impl Default for EmbeddingDevice {
    fn default() -> Self {
        EmbeddingDevice::Auto
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Compute {
    pub embedding_device: EmbeddingDevice,
}

impl Default for Compute {
    fn default() -> Self {
        Compute {
            embedding_device: EmbeddingDevice::Auto,
        }
    }
}

fn default_excluded_dirs() -> Vec<String> {
    [
        "__pycache__",
        "embeddings",
        ".git",
        ".idea",
        "__MACOSX",
        "node_modules",
        "venv",
        "env",
        ".venv",
        "dist",
        "build",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_excluded_extensions() -> Vec<String> {
    [
        ".embedding", ".pyc", ".pyo", ".pyd", ".DS_Store", ".o", ".so", ".dll", ".exe",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_char_priority() -> HashMap<char, i32> {
    [
        ('.', 0),
        ('p', 1),
        ('s', 2),
        ('S', 2),
        ('d', 3),
        ('<', 3),
        ('>', 3),
        ('x', 3),
        ('n', 3),
    ]
    .into_iter()
    .collect()
}

/// Project-wide configuration. Deserialized from JSON; unknown top-level
/// keys are preserved in `extra` so a round-trip write never drops them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default = "default_excluded_dirs")]
    pub excluded_dirs: Vec<String>,
    #[serde(default = "default_excluded_extensions")]
    pub excluded_extensions: Vec<String>,
    /// `exclude_files` is accepted as an alias for `excluded_paths` per
    /// spec.md's own resolution of that ambiguity.
    #[serde(default, alias = "exclude_files")]
    pub excluded_paths: Vec<String>,
    #[serde(default = "default_code_root_directories")]
    pub code_root_directories: Vec<String>,
    #[serde(default = "default_doc_directories")]
    pub doc_directories: Vec<String>,
    #[serde(default)]
    pub paths: Paths,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub models: Models,
    #[serde(default)]
    pub compute: Compute,
    #[serde(default = "default_char_priority")]
    pub char_priority: HashMap<char, i32>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn default_code_root_directories() -> Vec<String> {
    vec!["src".to_string()]
}

fn default_doc_directories() -> Vec<String> {
    vec!["docs".to_string()]
}

impl Default for Config {
    fn default() -> Self {
        Config {
            excluded_dirs: default_excluded_dirs(),
            excluded_extensions: default_excluded_extensions(),
            excluded_paths: Vec::new(),
            code_root_directories: default_code_root_directories(),
            doc_directories: default_doc_directories(),
            paths: Paths::default(),
            thresholds: Thresholds::default(),
            models: Models::default(),
            compute: Compute::default(),
            char_priority: default_char_priority(),
            extra: serde_json::Map::new(),
        }
    }
}

impl Config {
    pub fn config_file_path(project_root: &Path) -> PathBuf {
        PathBuf::from(normalize_path(
            &project_root.join(".clinerules.config.json").to_string_lossy(),
        ))
    }

    /// Load from `<project_root>/.clinerules.config.json`, falling back to
    /// defaults (and writing them out) when the file is absent or unreadable.
    pub fn load(project_root: &Path) -> Self {
        let path = Self::config_file_path(project_root);
        match std::fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(cfg) => cfg,
                Err(e) => {
                    eprintln!(
                        "[keygrid] WARN: invalid config at {}: {e}; falling back to defaults",
                        path.display()
                    );
                    Config::default()
                }
            },
            Err(_) => {
                let cfg = Config::default();
                let _ = cfg.save(project_root);
                cfg
            }
        }
    }

    pub fn save(&self, project_root: &Path) -> anyhow::Result<()> {
        let path = Self::config_file_path(project_root);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        Ok(())
    }

    /// Deep-merge an update (arbitrary JSON patch) into this config, then
    /// persist it. Nested objects merge key-by-key; scalars/arrays replace.
    pub fn update(&mut self, updates: serde_json::Value) -> anyhow::Result<()> {
        let mut current = serde_json::to_value(&*self)?;
        deep_merge(&mut current, updates);
        *self = serde_json::from_value(current)?;
        Ok(())
    }

    pub fn char_priority_of(&self, ch: char) -> i32 {
        self.char_priority
            .get(&ch)
            .copied()
            .unwrap_or_else(|| crate::grid::char_priority(ch))
    }
}

fn deep_merge(base: &mut serde_json::Value, patch: serde_json::Value) {
    match (base, patch) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(patch_map)) => {
            for (k, v) in patch_map {
                deep_merge(base_map.entry(k).or_insert(serde_json::Value::Null), v);
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_config_manager() {
        let cfg = Config::default();
        assert_eq!(cfg.thresholds.code_similarity, 0.8);
        assert_eq!(cfg.thresholds.doc_similarity, 0.7);
        assert!(cfg.excluded_dirs.contains(&"node_modules".to_string()));
        assert!(cfg.excluded_extensions.contains(&".pyc".to_string()));
    }

    #[test]
    fn exclude_files_alias_maps_to_excluded_paths() {
        let json = serde_json::json!({ "exclude_files": ["/tmp/x"] });
        let cfg: Config = serde_json::from_value(json).unwrap();
        assert_eq!(cfg.excluded_paths, vec!["/tmp/x".to_string()]);
    }

    #[test]
    fn deep_update_merges_nested_without_clobbering_siblings() {
        let mut cfg = Config::default();
        cfg.update(serde_json::json!({ "thresholds": { "code_similarity": 0.95 } }))
            .unwrap();
        assert_eq!(cfg.thresholds.code_similarity, 0.95);
        assert_eq!(cfg.thresholds.doc_similarity, 0.7);
    }

    #[test]
    fn unknown_top_level_keys_round_trip() {
        let json = serde_json::json!({ "some_future_option": true });
        let cfg: Config = serde_json::from_value(json).unwrap();
        let back = serde_json::to_value(&cfg).unwrap();
        assert_eq!(back.get("some_future_option"), Some(&serde_json::json!(true)));
    }
}
