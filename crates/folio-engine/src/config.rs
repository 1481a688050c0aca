use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// When committed transactions reach the render surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Reconcile at the end of every commit.
    #[default]
    Sync,
    /// Accumulate dirty sets and ask the host's `FlushScheduler` to flush later.
    Deferred,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Typing in the same text node within this window joins one undo step.
    pub merge_interval_ms: u64,
    pub max_depth: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            merge_interval_ms: 1000,
            max_depth: 100,
        }
    }
}

/// Class names the reconciler puts on rendered elements.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThemeConfig {
    /// Type tag (`paragraph`, `heading`, ...) → class.
    pub elements: BTreeMap<String, String>,
    /// Text format name (`bold`, `italic`, ...) → class.
    pub formats: BTreeMap<String, String>,
}

impl ThemeConfig {
    pub fn element_class(&self, type_tag: &str) -> Option<&str> {
        self.elements.get(type_tag).map(String::as_str)
    }

    pub fn format_class(&self, format: &str) -> Option<&str> {
        self.formats.get(format).map(String::as_str)
    }
}

/// Per-editor settings. Every field has a default, so a partial `[editor]` table in
/// a config file is enough.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EditorConfig {
    pub namespace: String,
    /// Commit fails with `TransformDidNotConverge` past this many transform passes.
    pub max_transform_iterations: usize,
    pub flush: FlushMode,
    pub history: HistoryConfig,
    pub theme: ThemeConfig,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            namespace: "folio".to_string(),
            max_transform_iterations: 100,
            flush: FlushMode::Sync,
            history: HistoryConfig::default(),
            theme: ThemeConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_falls_back_to_defaults() {
        let config: EditorConfig =
            serde_json::from_str(r#"{"flush":"deferred","history":{"max_depth":5}}"#).unwrap();

        assert_eq!(config.flush, FlushMode::Deferred);
        assert_eq!(config.history.max_depth, 5);
        assert_eq!(config.history.merge_interval_ms, 1000);
        assert_eq!(config.max_transform_iterations, 100);
        assert_eq!(config.namespace, "folio");
    }
}
