use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub gmail: GmailConfig,
    #[serde(default)]
    pub unsubscribe: UnsubscribeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between periodic ingestion passes.
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub base_url: String,
    /// Falls back to the ANTHROPIC_API_KEY environment variable when empty.
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GmailConfig {
    /// OAuth application secret (client id/secret JSON).
    pub secret_path: String,
    /// Seconds allowed for a single listing or fetch call.
    pub fetch_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnsubscribeConfig {
    /// Worker cap for concurrent unsubscribe execution.
    pub concurrency: usize,
    pub timeout_secs: u64,
}

fn default_database_url() -> String {
    "sqlite:mailsweep.db?mode=rwc".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { interval_secs: 300 }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.anthropic.com".to_string(),
            api_key: None,
            model: "claude-sonnet-4-20250514".to_string(),
            timeout_secs: 30,
        }
    }
}

impl Default for GmailConfig {
    fn default() -> Self {
        Self {
            secret_path: "credentials.json".to_string(),
            fetch_timeout_secs: 30,
        }
    }
}

impl Default for UnsubscribeConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout_secs: 15,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            scheduler: SchedulerConfig::default(),
            model: ModelConfig::default(),
            gmail: GmailConfig::default(),
            unsubscribe: UnsubscribeConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Self {
        use std::fs;
        if let Ok(content) = fs::read_to_string("settings.toml") {
            if let Ok(config) = toml::from_str(&content) {
                return config;
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.scheduler.interval_secs, 300);
        assert_eq!(config.unsubscribe.concurrency, 4);
        assert!(config.database_url.starts_with("sqlite:"));
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            database_url = "sqlite::memory:"

            [scheduler]
            interval_secs = 60
            "#,
        )
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.scheduler.interval_secs, 60);
        assert_eq!(config.model.timeout_secs, 30);
    }
}
