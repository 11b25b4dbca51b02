//! Configuration Management
//!
//! Provider settings: API key, per-family base URL overrides and job polling.
//! Stored as JSON under the user's config directory.

use crate::kbc::auth::Credential;
use crate::kbc::endpoint::EndpointFamily;
use crate::kbc::http::KbcHttpClient;
use crate::kbc::jobs::{PollPolicy, DEFAULT_POLL_INTERVAL};
use crate::kbc::KbcClient;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL.as_millis() as u64
}

fn default_user_agent() -> String {
    format!("kbc-provider/{}", env!("CARGO_PKG_VERSION"))
}

/// Provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Storage API token; falls back to `STORAGE_API_KEY`
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL overrides, keyed by family
    #[serde(default)]
    pub base_urls: HashMap<EndpointFamily, String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Give up on jobs after this long. Unset means wait indefinitely.
    #[serde(default)]
    pub max_job_wait_secs: Option<u64>,
    /// Per-request transport timeout
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_urls: HashMap::new(),
            poll_interval_ms: default_poll_interval_ms(),
            max_job_wait_secs: None,
            request_timeout_secs: None,
            user_agent: default_user_agent(),
        }
    }
}

impl ProviderConfig {
    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kbc-provider").join("config.json"))
    }

    /// Load configuration from the default location, or defaults if absent
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to disk
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Base URL overrides must be absolute and end with `/`
    pub fn validate(&self) -> Result<()> {
        for (family, base) in &self.base_urls {
            let parsed = url::Url::parse(base)
                .with_context(|| format!("Invalid base URL for {}: {}", family, base))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                anyhow::bail!("Base URL for {} must use http or https: {}", family, base);
            }
            if !base.ends_with('/') {
                anyhow::bail!("Base URL for {} must end with '/': {}", family, base);
            }
        }
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_wait: self.max_job_wait_secs.map(Duration::from_secs),
        }
    }

    /// Resolve the API key (CLI > config > environment)
    pub fn credential(&self, cli_key: Option<&str>) -> Result<Credential> {
        let explicit = cli_key.or(self.api_key.as_deref());
        Credential::resolve(explicit).context("Failed to resolve API key")
    }

    /// Build a client from this configuration
    pub fn build_client(&self, credential: Credential) -> Result<KbcClient> {
        self.validate()?;
        let http = KbcHttpClient::new(
            credential,
            self.base_urls.clone(),
            &self.user_agent,
            self.request_timeout_secs.map(Duration::from_secs),
        )
        .context("Failed to create HTTP client")?;
        Ok(KbcClient::new(http, self.poll_policy()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: ProviderConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.max_job_wait_secs.is_none());
        assert_eq!(config.poll_policy(), PollPolicy::default());
        assert!(config.user_agent.starts_with("kbc-provider/"));
    }

    #[test]
    fn test_base_url_overrides_parse_by_family_name() {
        let config: ProviderConfig = serde_json::from_str(
            r#"{"base_urls":{"storage":"http://127.0.0.1:8080/v2/storage/","orchestrator":"http://127.0.0.1:8080/"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(
            config.base_urls.get(&EndpointFamily::Storage).map(String::as_str),
            Some("http://127.0.0.1:8080/v2/storage/")
        );
    }

    #[test]
    fn test_validate_rejects_missing_trailing_slash() {
        let mut config = ProviderConfig::default();
        config
            .base_urls
            .insert(EndpointFamily::Docker, "http://localhost/docker".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = ProviderConfig {
            max_job_wait_secs: Some(600),
            ..ProviderConfig::default()
        };
        config.save_to(&path).unwrap();
        let loaded = ProviderConfig::load_from(&path).unwrap();
        assert_eq!(loaded.max_job_wait_secs, Some(600));
        assert_eq!(
            loaded.poll_policy().max_wait,
            Some(Duration::from_secs(600))
        );
    }
}
