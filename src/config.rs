use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Upstream settings, independent of the credential
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base_url: String,
    pub model: String,
    pub timeout: Duration,
    /// Ask for schema-constrained JSON output
    pub structured_output: bool,
}

impl GeminiConfig {
    pub const DEFAULT_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-pro";
    pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base_url: Self::DEFAULT_BASE_URL.to_string(),
            model: Self::DEFAULT_MODEL.to_string(),
            timeout: Duration::from_secs(Self::DEFAULT_TIMEOUT_SECS),
            structured_output: true,
        }
    }
}

/// Service configuration.
///
/// Built once at start-up and handed to the router; nothing reads the
/// environment after that.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    /// `GEMINI_API_KEY`. Absence is reported per request, not at start-up.
    pub api_key: Option<String>,
    pub gemini: GeminiConfig,
    /// Return upstream failures to the caller instead of falling back
    pub strict_upstream: bool,
}

impl AppConfig {
    pub const DEFAULT_BIND: &'static str = "127.0.0.1:8080";
    pub const DEFAULT_DATABASE: &'static str = "learning_paths.db";

    /// Build a config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (useful for tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let bind = get("LEARNING_PATH_BIND").unwrap_or_else(|| Self::DEFAULT_BIND.to_string());
        let bind_addr = bind.parse::<SocketAddr>().map_err(|e| ConfigError::Invalid {
            key: "LEARNING_PATH_BIND",
            value: bind.clone(),
            reason: e.to_string(),
        })?;

        let database_path = get("LEARNING_PATH_DB")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(Self::DEFAULT_DATABASE));

        let timeout_secs = match get("GEMINI_TIMEOUT_SECS") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| ConfigError::Invalid {
                key: "GEMINI_TIMEOUT_SECS",
                value: raw.clone(),
                reason: e.to_string(),
            })?,
            None => GeminiConfig::DEFAULT_TIMEOUT_SECS,
        };

        let gemini = GeminiConfig {
            api_base_url: get("GEMINI_API_BASE_URL")
                .unwrap_or_else(|| GeminiConfig::DEFAULT_BASE_URL.to_string()),
            model: get("GEMINI_MODEL").unwrap_or_else(|| GeminiConfig::DEFAULT_MODEL.to_string()),
            timeout: Duration::from_secs(timeout_secs),
            structured_output: parse_flag("GEMINI_STRUCTURED_OUTPUT", get("GEMINI_STRUCTURED_OUTPUT"), true)?,
        };

        Ok(Self {
            bind_addr,
            database_path,
            api_key: get("GEMINI_API_KEY").map(|k| k.trim().to_string()),
            gemini,
            strict_upstream: parse_flag(
                "LEARNING_PATH_STRICT_UPSTREAM",
                get("LEARNING_PATH_STRICT_UPSTREAM"),
                false,
            )?,
        })
    }
}

fn parse_flag(key: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value: raw,
            reason: "expected true or false".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config_from(&[]).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8080");
        assert_eq!(cfg.database_path, PathBuf::from("learning_paths.db"));
        assert!(cfg.api_key.is_none());
        assert_eq!(cfg.gemini.model, "gemini-1.5-pro");
        assert_eq!(cfg.gemini.timeout, Duration::from_secs(60));
        assert!(cfg.gemini.structured_output);
        assert!(!cfg.strict_upstream);
    }

    #[test]
    fn test_blank_credential_is_missing() {
        let cfg = config_from(&[("GEMINI_API_KEY", "   ")]).unwrap();
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn test_overrides() {
        let cfg = config_from(&[
            ("GEMINI_API_KEY", "secret"),
            ("GEMINI_MODEL", "gemini-2.0-flash"),
            ("GEMINI_TIMEOUT_SECS", "5"),
            ("GEMINI_STRUCTURED_OUTPUT", "off"),
            ("LEARNING_PATH_BIND", "0.0.0.0:9000"),
            ("LEARNING_PATH_STRICT_UPSTREAM", "true"),
        ])
        .unwrap();

        assert_eq!(cfg.api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.gemini.model, "gemini-2.0-flash");
        assert_eq!(cfg.gemini.timeout, Duration::from_secs(5));
        assert!(!cfg.gemini.structured_output);
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert!(cfg.strict_upstream);
    }

    #[test]
    fn test_invalid_values() {
        assert!(config_from(&[("GEMINI_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config_from(&[("LEARNING_PATH_BIND", "nowhere")]).is_err());

        let err = config_from(&[("LEARNING_PATH_STRICT_UPSTREAM", "maybe")]).unwrap_err();
        assert!(err.to_string().contains("LEARNING_PATH_STRICT_UPSTREAM"));
    }
}
