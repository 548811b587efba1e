//! Engine configuration loader.
//!
//! Reads a TOML file into [`EngineConfig`]. Falls back to defaults when the
//! file is missing or malformed, so a fresh install runs without one.

use std::path::{Path, PathBuf};

use agentflow_types::config::EngineConfig;

/// File name looked up under the platform config directory.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// `~/.config/agentflow/config.toml` on Linux, the platform equivalent elsewhere.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("agentflow").join(CONFIG_FILE_NAME))
}

/// Load engine configuration from `path`.
///
/// - Missing file: [`EngineConfig::default()`], logged at debug.
/// - Unreadable or unparseable file: defaults, logged at warn.
pub async fn load_engine_config(path: &Path) -> EngineConfig {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!("No config found at {}, using defaults", path.display());
            return EngineConfig::default();
        }
        Err(err) => {
            tracing::warn!("Failed to read {}: {err}, using defaults", path.display());
            return EngineConfig::default();
        }
    };

    match toml::from_str::<EngineConfig>(&content) {
        Ok(config) => {
            tracing::debug!(
                path = %path.display(),
                agents = config.agents.len(),
                "loaded engine config"
            );
            config
        }
        Err(err) => {
            tracing::warn!("Failed to parse {}: {err}, using defaults", path.display());
            EngineConfig::default()
        }
    }
}

/// Load from `path` if given, else from [`default_config_path`].
pub async fn load_engine_config_or_default(path: Option<&Path>) -> EngineConfig {
    match path.map(Path::to_path_buf).or_else(default_config_path) {
        Some(path) => load_engine_config(&path).await,
        None => EngineConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_engine_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_engine_config(&tmp.path().join(CONFIG_FILE_NAME)).await;
        assert_eq!(config.engine.default_step_timeout_ms, 30_000);
        assert!(config.agents.is_empty());
    }

    #[tokio::test]
    async fn load_engine_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(
            &path,
            r#"
[engine]
workflow_timeout_secs = 60
rollback_on_timeout = false

[circuit_breaker]
failure_threshold = 2

[[agents]]
id = "fetcher"
endpoint = "http://localhost:8081"
"#,
        )
        .await
        .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.engine.workflow_timeout_secs, 60);
        assert!(!config.engine.rollback_on_timeout);
        assert_eq!(config.engine.default_step_timeout_ms, 30_000);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.agents[0].endpoint, "http://localhost:8081");
    }

    #[tokio::test]
    async fn load_engine_config_invalid_toml_returns_default() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        tokio::fs::write(&path, "this is not { valid toml !!!")
            .await
            .unwrap();

        let config = load_engine_config(&path).await;
        assert_eq!(config.engine.workflow_timeout_secs, 1800);
    }

    #[tokio::test]
    async fn explicit_path_wins_over_default_location() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("custom.toml");
        tokio::fs::write(&path, "[retry]\ninitial_delay_ms = 5\n")
            .await
            .unwrap();

        let config = load_engine_config_or_default(Some(&path)).await;
        assert_eq!(config.retry.initial_delay_ms, 5);
    }

    #[test]
    fn default_config_path_ends_with_file_name() {
        if let Some(path) = default_config_path() {
            assert!(path.ends_with("agentflow/config.toml"));
        }
    }
}
