//! Crate-wide configuration.
//!
//! Recognised configuration options with their defaults. Loadable from a
//! TOML file (`Config::from_file`) with the same defaults a fresh `Config`
//! gets from `Default`, following the `toml`-based config pattern used
//! elsewhere in the corpus (aigent-config).

use serde::{Deserialize, Serialize};
use std::path::Path;

/// All tunables recognised by the engine family, the session/working
/// controllers, and the NL→SQL pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Message count that triggers session summarisation.
    pub summary_trigger_count: usize,
    /// Byte length of candidate messages that triggers session summarisation.
    pub max_session_length: usize,
    /// Messages-since-last-summary threshold once a summary already exists.
    pub messages_since_summary_trigger: usize,
    /// Default TTL applied to working memories when the caller doesn't specify one.
    pub working_default_ttl_seconds: i64,
    /// Primary SQL execution time bound, in seconds.
    pub sql_max_execution_time: u64,
    /// Maximum rows returned by a single SQL execution.
    pub sql_max_rows: usize,
    /// Default similarity cutoff for memory search.
    pub similarity_default_threshold: f32,
    /// Default truncation for memory search and NL→SQL result sets.
    pub top_k_default: usize,
    /// Capacity of the SQL feedback ring buffer.
    pub feedback_buffer_capacity: usize,
    /// Capacity of the per-engine embedding cache.
    pub embedding_cache_capacity: usize,
    /// Length of the prefix used for Semantic's dedup fingerprint (Open Question, see DESIGN.md).
    pub semantic_dedup_prefix_len: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            summary_trigger_count: 10,
            max_session_length: 10_000,
            messages_since_summary_trigger: 5,
            working_default_ttl_seconds: 3600,
            sql_max_execution_time: 30,
            sql_max_rows: 10_000,
            similarity_default_threshold: 0.7,
            top_k_default: 10,
            feedback_buffer_capacity: 1000,
            embedding_cache_capacity: 4096,
            semantic_dedup_prefix_len: 50,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults for
    /// any field the file doesn't set.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(path.as_ref().display().to_string(), e.to_string()))?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, String),
    #[error("failed to parse config file: {0}")]
    Parse(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = Config::default();
        assert_eq!(cfg.summary_trigger_count, 10);
        assert_eq!(cfg.max_session_length, 10_000);
        assert_eq!(cfg.working_default_ttl_seconds, 3600);
        assert_eq!(cfg.sql_max_execution_time, 30);
        assert_eq!(cfg.sql_max_rows, 10_000);
        assert!((cfg.similarity_default_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(cfg.top_k_default, 10);
        assert_eq!(cfg.feedback_buffer_capacity, 1000);
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let dir = std::env::temp_dir().join(format!("cortex-cfg-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cortex.toml");
        std::fs::write(&path, "summary_trigger_count = 25\n").unwrap();

        let cfg = Config::from_file(&path).unwrap();
        assert_eq!(cfg.summary_trigger_count, 25);
        assert_eq!(cfg.max_session_length, 10_000);

        std::fs::remove_dir_all(&dir).ok();
    }
}
