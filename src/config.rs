use std::{env, time::Duration};

pub const DEFAULT_BACKEND_MODEL: &str = "qwen-3-235b-a22b-instruct-2507";
pub const DEFAULT_BASE_URL: &str = "https://api.cerebras.ai/v1";
pub const DEFAULT_OLLAMA_VERSION: &str = "0.1.17";
pub const DEFAULT_PORT: u16 = 6000;

/// Process-wide settings, read once at startup and shared read-only afterwards.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    pub port: u16,
    pub ollama_version: String,
    pub backend: BackendConfig,
}

#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Absence is not fatal at startup; every backend call reports it instead.
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub request_timeout: Duration,
    pub stream_idle_timeout: Option<Duration>,
}

impl ProxyConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| lookup(name).map(|value| value.trim().to_owned());
        let non_empty = |name: &str| read(name).filter(|value| !value.is_empty());

        let backend = BackendConfig {
            api_key: non_empty("CEREBRAS_API_KEY"),
            model: non_empty("CAI_MODEL").unwrap_or_else(|| DEFAULT_BACKEND_MODEL.to_owned()),
            base_url: non_empty("CEREBRAS_BASE_URL")
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_owned())
                .trim_end_matches('/')
                .to_owned(),
            request_timeout: Duration::from_secs(
                read("CEREBRAS_TIMEOUT_SECS")
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(60),
            ),
            stream_idle_timeout: read("CEREBRAS_STREAM_IDLE_TIMEOUT_SECS")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
        };

        Self {
            port: read("PROXY_PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(DEFAULT_PORT),
            ollama_version: non_empty("OLLAMA_VERSION")
                .unwrap_or_else(|| DEFAULT_OLLAMA_VERSION.to_owned()),
            backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(pairs: &[(&str, &str)]) -> ProxyConfig {
        let vars = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect::<HashMap<_, _>>();
        ProxyConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_environment_is_empty() {
        let config = config_from(&[]);

        assert_eq!(config.port, 6000);
        assert_eq!(config.ollama_version, "0.1.17");
        assert_eq!(config.backend.api_key, None);
        assert_eq!(config.backend.model, DEFAULT_BACKEND_MODEL);
        assert_eq!(config.backend.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.backend.request_timeout, Duration::from_secs(60));
        assert_eq!(config.backend.stream_idle_timeout, None);
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let config = config_from(&[("CEREBRAS_API_KEY", "   ")]);
        assert_eq!(config.backend.api_key, None);
    }

    #[test]
    fn overrides_are_read_and_normalized() {
        let config = config_from(&[
            ("CEREBRAS_API_KEY", "csk-test"),
            ("CAI_MODEL", "llama-3.3-70b"),
            ("CEREBRAS_BASE_URL", "http://127.0.0.1:9000/v1/"),
            ("CEREBRAS_TIMEOUT_SECS", "5"),
            ("CEREBRAS_STREAM_IDLE_TIMEOUT_SECS", "30"),
            ("PROXY_PORT", "11434"),
        ]);

        assert_eq!(config.backend.api_key.as_deref(), Some("csk-test"));
        assert_eq!(config.backend.model, "llama-3.3-70b");
        assert_eq!(config.backend.base_url, "http://127.0.0.1:9000/v1");
        assert_eq!(config.backend.request_timeout, Duration::from_secs(5));
        assert_eq!(
            config.backend.stream_idle_timeout,
            Some(Duration::from_secs(30))
        );
        assert_eq!(config.port, 11434);
    }

    #[test]
    fn zero_idle_timeout_disables_it() {
        let config = config_from(&[("CEREBRAS_STREAM_IDLE_TIMEOUT_SECS", "0")]);
        assert_eq!(config.backend.stream_idle_timeout, None);
    }
}
