use crate::constants::{CONFIG_FILE_NAME, DEFAULT_TF_PROGRAM, DEFAULT_TIMEOUT_SECS, TOOL_DIR_NAME};
use crate::reconcile::RefreshPolicy;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// config file contents; every key is optional
#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct PartialConfig {
    tf_path: Option<String>,
    timeout_secs: Option<u64>,
    refresh_policy: Option<RefreshPolicy>,
    state_dir: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// `tf` executable, looked up on PATH unless absolute
    pub tf_path: PathBuf,
    /// limit for every `tf` invocation
    pub timeout: Duration,
    pub refresh_policy: RefreshPolicy,
    /// directory for pending-change state; the user data directory if unset
    pub state_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tf_path: PathBuf::from(DEFAULT_TF_PROGRAM),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            refresh_policy: RefreshPolicy::default(),
            state_dir: None,
        }
    }
}

impl Config {
    /// defaults, overlaid with the first config file found
    ///
    /// an explicit `path` must exist; otherwise the standard locations are tried
    pub fn load(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return read_config(path);
        }
        match config_paths().into_iter().find(|path| path.exists()) {
            Some(path) => read_config(&path),
            None => Ok(Self::default()),
        }
    }

    /// parse config text, overlaying it on the defaults
    pub fn from_json(text: &str) -> Result<Self> {
        let mut config = Self::default();
        config.merge(serde_json::from_str(text).context("invalid config")?);
        Ok(config)
    }

    fn merge(&mut self, parsed: PartialConfig) {
        if let Some(tf_path) = parsed.tf_path
            && !tf_path.trim().is_empty()
        {
            self.tf_path = PathBuf::from(tf_path.trim());
        }
        if let Some(secs) = parsed.timeout_secs
            && secs > 0
        {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(policy) = parsed.refresh_policy {
            self.refresh_policy = policy;
        }
        if let Some(state_dir) = parsed.state_dir
            && !state_dir.trim().is_empty()
        {
            self.state_dir = Some(PathBuf::from(state_dir.trim()));
        }
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    Config::from_json(&raw).with_context(|| format!("failed to parse config file {}", path.display()))
}

fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join(TOOL_DIR_NAME).join(CONFIG_FILE_NAME));
    }
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(format!(".{TOOL_DIR_NAME}.json")));
    }
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.tf_path, PathBuf::from("tf"));
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.refresh_policy, RefreshPolicy::Drop);
    }

    #[test]
    fn test_from_json_overrides() {
        let config = Config::from_json(
            r#"{"tfPath": "C:\\VS\\tf.exe", "timeoutSecs": 5, "refreshPolicy": "trailing"}"#,
        )
        .unwrap();
        assert_eq!(config.tf_path, PathBuf::from(r"C:\VS\tf.exe"));
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.refresh_policy, RefreshPolicy::Trailing);
        assert_eq!(config.state_dir, None);
    }

    #[test]
    fn test_blank_and_zero_values_are_ignored() {
        let config = Config::from_json(r#"{"tfPath": "  ", "timeoutSecs": 0, "stateDir": ""}"#).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        assert!(Config::from_json(r#"{"tfsPath": "tf"}"#).is_err());
    }

    #[test]
    fn test_load_explicit_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        fs::write(&path, r#"{"stateDir": "/tmp/tfvc-state"}"#).unwrap();

        let config = Config::load(Some(path.as_path())).unwrap();
        assert_eq!(config.state_dir, Some(PathBuf::from("/tmp/tfvc-state")));
    }

    #[test]
    fn test_load_missing_explicit_file_fails() {
        let temp_dir = TempDir::new().unwrap();
        assert!(Config::load(Some(temp_dir.path().join("nope.json").as_path())).is_err());
    }
}
