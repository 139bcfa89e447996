use serde::{Deserialize, Serialize};
use std::env;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_timeout_ms() -> u64 {
    3_000
}
fn default_daily_limit() -> u32 {
    50
}
fn default_cache_dir() -> String {
    "cache/overlay".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Chat-completions endpoint; OpenAI's when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Budget for the single overlay call of a run.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: String,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            provider: default_provider(),
            model: default_model(),
            endpoint: None,
            api_key: default_api_key(),
            timeout_ms: default_timeout_ms(),
            daily_limit: default_daily_limit(),
            cache_dir: default_cache_dir(),
        }
    }
}

impl OverlayConfig {
    /// Resolve an `"ENV"` key. Only an enabled openai overlay requires it.
    pub fn resolve_api_key(&mut self) -> anyhow::Result<()> {
        self.provider = self.provider.trim().to_lowercase();
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(());
        }
        self.api_key = match self.provider.as_str() {
            "openai" => match env::var("OPENAI_API_KEY") {
                Ok(k) => k,
                Err(_) if !self.enabled => String::new(),
                Err(_) => anyhow::bail!("Missing OPENAI_API_KEY env var"),
            },
            "mock" => String::new(),
            other => anyhow::bail!("Unsupported overlay provider in config: {other}"),
        };
        Ok(())
    }

    pub fn sanitize(&mut self) {
        if self.timeout_ms == 0 || self.timeout_ms > 60_000 {
            self.timeout_ms = default_timeout_ms();
        }
        if self.cache_dir.trim().is_empty() {
            self.cache_dir = default_cache_dir();
        }
        if self.model.trim().is_empty() {
            self.model = default_model();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_for_enabled_openai() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let mut cfg = OverlayConfig {
            enabled: true,
            ..OverlayConfig::default()
        };
        cfg.resolve_api_key().unwrap();
        assert_eq!(cfg.api_key, "sk-test");

        env::remove_var("OPENAI_API_KEY");
        let mut missing = OverlayConfig {
            enabled: true,
            ..OverlayConfig::default()
        };
        assert!(missing.resolve_api_key().is_err());

        let mut disabled = OverlayConfig::default();
        assert!(disabled.resolve_api_key().is_ok());
    }

    #[test]
    fn unknown_provider_fails_and_timeout_is_clamped() {
        let mut cfg = OverlayConfig {
            provider: "Carrier".into(),
            ..OverlayConfig::default()
        };
        assert!(cfg.resolve_api_key().is_err());

        cfg.timeout_ms = 0;
        cfg.sanitize();
        assert_eq!(cfg.timeout_ms, 3_000);
    }
}
