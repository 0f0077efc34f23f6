// Ambient runtime configuration: provider base URLs, HTTP timeouts and
// retry defaults. Uses a `from_env`/`validate` split rather than a
// `lazy_static` global, so a caller builds one `Config` explicitly
// instead of reaching for a process-wide singleton.

use crate::retry::RetryConfig;
use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Connection settings for one provider family.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout: Duration,
}

impl ProviderConfig {
    fn from_env(key_var: &str, url_var: &str, default_url: &str, timeout_var: &str) -> Self {
        Self {
            api_key: env_or(key_var, ""),
            base_url: env_or(url_var, default_url),
            request_timeout: Duration::from_millis(env_u64(timeout_var, 60_000)),
        }
    }

    pub fn validate(&self, provider_name: &str) -> anyhow::Result<()> {
        if self.api_key.is_empty() {
            return Err(anyhow::anyhow!(
                "{provider_name}: no API key configured (expected an environment variable)"
            ));
        }
        if self.base_url.is_empty() {
            return Err(anyhow::anyhow!("{provider_name}: base_url cannot be empty"));
        }
        Ok(())
    }
}

/// Top-level configuration for every provider family plus the shared
/// retry policy, assembled once at process startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub anthropic: ProviderConfig,
    pub openai: ProviderConfig,
    pub bedrock_model_id: String,
    pub retry: RetryConfig,
    pub mcp_connect_timeout: Duration,
    pub mcp_request_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            anthropic: ProviderConfig::from_env(
                "ANTHROPIC_API_KEY",
                "ANTHROPIC_BASE_URL",
                "https://api.anthropic.com",
                "ANTHROPIC_TIMEOUT_MS",
            ),
            openai: ProviderConfig::from_env(
                "OPENAI_API_KEY",
                "OPENAI_BASE_URL",
                "https://api.openai.com",
                "OPENAI_TIMEOUT_MS",
            ),
            bedrock_model_id: env_or("BEDROCK_MODEL_ID", ""),
            retry: RetryConfig {
                max_retries: env_u64("AGENTWIRE_MAX_RETRIES", 3) as u32,
                base_delay: Duration::from_millis(env_u64("AGENTWIRE_RETRY_BASE_DELAY_MS", 500)),
                max_delay: Duration::from_millis(env_u64("AGENTWIRE_RETRY_MAX_DELAY_MS", 30_000)),
                jitter_factor: env_f64("AGENTWIRE_RETRY_JITTER", 0.2),
            },
            mcp_connect_timeout: Duration::from_millis(env_u64("MCP_CONNECT_TIMEOUT_MS", 30_000)),
            mcp_request_timeout: Duration::from_millis(env_u64("MCP_REQUEST_TIMEOUT_MS", 30_000)),
        }
    }

    /// Checked at startup, not on every request: callers that only use
    /// one provider family shouldn't have to supply credentials for
    /// the others.
    pub fn validate_for(&self, providers: &[&str]) -> anyhow::Result<()> {
        for name in providers {
            match *name {
                "anthropic" => self.anthropic.validate("anthropic")?,
                "openai" => self.openai.validate("openai")?,
                "bedrock" => {
                    if self.bedrock_model_id.is_empty() {
                        return Err(anyhow::anyhow!("bedrock: BEDROCK_MODEL_ID is not set"));
                    }
                }
                other => return Err(anyhow::anyhow!("unknown provider family: {other}")),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable_without_any_env_vars() {
        let config = Config::from_env();
        assert_eq!(config.anthropic.base_url, "https://api.anthropic.com");
        assert_eq!(config.openai.base_url, "https://api.openai.com");
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn validate_for_rejects_missing_api_key() {
        let mut config = Config::from_env();
        config.anthropic.api_key.clear();
        let err = config.validate_for(&["anthropic"]).unwrap_err();
        assert!(err.to_string().contains("anthropic"));
    }

    #[test]
    fn validate_for_rejects_unknown_provider_name() {
        let config = Config::from_env();
        assert!(config.validate_for(&["nonexistent"]).is_err());
    }
}
