//! Service configuration.
//!
//! Values come from an optional TOML file, then environment variables, then
//! command-line flags (applied in `main`). A missing file yields
//! `Config::default()`. Unknown keys are accepted but logged, since they are
//! usually typos.
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use thiserror::Error;

use crate::feed::DEFAULT_MAX_FEED_BYTES;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8080";

/// Top-level service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// The custom Debug impl masks `api_key` and prints header names only.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the HTTP server binds to.
    pub listen_addr: String,

    /// Bearer token required on every route when set and non-empty.
    pub api_key: Option<String>,

    /// Log one line per request.
    pub request_log: bool,

    /// Outbound proxy URL (`http`, `https`, `socks5` or `socks5h`).
    pub proxy: Option<String>,

    /// Body size ceiling in bytes. Missing, zero or negative means the default.
    pub max_feed_bytes: Option<i64>,

    /// Extra outbound request headers.
    pub headers: BTreeMap<String, String>,

    /// Headers from `RSS_HEADERS`, applied after `headers`.
    #[serde(skip)]
    env_headers: Vec<(String, String)>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: DEFAULT_LISTEN_ADDR.to_string(),
            api_key: None,
            request_log: false,
            proxy: None,
            max_feed_bytes: None,
            headers: BTreeMap::new(),
            env_headers: Vec::new(),
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_addr", &self.listen_addr)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("request_log", &self.request_log)
            .field("proxy", &self.proxy)
            .field("max_feed_bytes", &self.max_feed_bytes)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field(
                "env_headers",
                &self.env_headers.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 6] = [
        "listen_addr",
        "api_key",
        "request_log",
        "proxy",
        "max_feed_bytes",
        "headers",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        tracing::info!(path = %path.display(), listen = %config.listen_addr, "Loaded configuration");
        Ok(config)
    }

    /// Overlays process environment variables.
    pub fn with_process_env(self) -> Self {
        self.with_env(|key| std::env::var(key).ok())
    }

    /// Overlays variables resolved through `lookup`.
    ///
    /// Blank values count as unset. `LISTEN_ADDR` wins over `PORT`.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(addr) = var("LISTEN_ADDR") {
            self.listen_addr = addr;
        } else if let Some(port) = var("PORT") {
            self.listen_addr = if port.starts_with(':') {
                format!("0.0.0.0{}", port)
            } else {
                format!("0.0.0.0:{}", port)
            };
        }

        if let Some(key) = var("API_KEY") {
            self.api_key = Some(key);
        }

        if let Some(flag) = var("REQUEST_LOG") {
            self.request_log = matches!(flag.to_ascii_lowercase().as_str(), "1" | "true" | "on");
        }

        if let Some(proxy) = var("RSS_PROXY") {
            self.proxy = Some(proxy);
        }

        if let Some(raw) = var("RSS_MAX_BYTES") {
            self.max_feed_bytes = match raw.parse::<i64>() {
                Ok(n) => Some(n),
                Err(e) => {
                    tracing::warn!(value = %raw, error = %e, "Invalid RSS_MAX_BYTES, using default");
                    None
                }
            };
        }

        if let Some(raw) = var("RSS_HEADERS") {
            self.env_headers = parse_header_list(&raw);
        }

        self
    }

    /// The API key as a secret, if one is configured.
    pub fn api_key(&self) -> Option<SecretString> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| SecretString::from(k.to_string()))
    }

    /// Effective body size ceiling.
    pub fn max_feed_bytes(&self) -> u64 {
        match self.max_feed_bytes {
            Some(n) if n > 0 => n as u64,
            Some(n) => {
                tracing::warn!(value = n, "Non-positive max_feed_bytes, using default");
                DEFAULT_MAX_FEED_BYTES
            }
            None => DEFAULT_MAX_FEED_BYTES,
        }
    }

    /// Configured outbound headers, file entries first then `RSS_HEADERS`.
    ///
    /// Names are case-insensitive; a later entry replaces an earlier one.
    /// Entries that are not valid HTTP header names or values are skipped.
    pub fn header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::new();
        let entries = self
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(self.env_headers.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        for (name, value) in entries {
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    map.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Skipping invalid outbound header"),
            }
        }
        map
    }
}

/// Parses `Key=Value,Other=Value2`. Entries without `=` or with an empty
/// key are dropped.
fn parse_header_list(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|part| {
            let part = part.trim();
            if part.is_empty() {
                return None;
            }
            let Some((key, value)) = part.split_once('=') else {
                tracing::warn!(entry = %part, "Ignoring header entry without '='");
                return None;
            };
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some((key.to_string(), value.trim().to_string()))
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.listen_addr, "0.0.0.0:8080");
        assert!(config.api_key().is_none());
        assert!(!config.request_log);
        assert!(config.proxy.is_none());
        assert_eq!(config.max_feed_bytes(), DEFAULT_MAX_FEED_BYTES);
        assert!(config.header_map().is_empty());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/rss2json_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let dir = std::env::temp_dir().join("rss2json_config_test_whitespace");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "   \n  \n  ").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_full_config() {
        let dir = std::env::temp_dir().join("rss2json_config_test_full");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");

        let content = r#"
listen_addr = "127.0.0.1:9000"
api_key = "file-key"
request_log = true
proxy = "socks5://127.0.0.1:1080"
max_feed_bytes = 2048
typo_key = 1

[headers]
Referer = "https://example.com/"
"#;
        std::fs::write(&path, content).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.listen_addr, "127.0.0.1:9000");
        assert_eq!(config.api_key().unwrap().expose_secret(), "file-key");
        assert!(config.request_log);
        assert_eq!(config.proxy.as_deref(), Some("socks5://127.0.0.1:1080"));
        assert_eq!(config.max_feed_bytes(), 2048);
        assert_eq!(
            config.header_map().get("referer").unwrap(),
            "https://example.com/"
        );

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("rss2json_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("rss2json_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_env_overrides_file_values() {
        let config = Config {
            listen_addr: "127.0.0.1:1".into(),
            proxy: Some("http://file-proxy:3128".into()),
            ..Default::default()
        }
        .with_env(env(&[
            ("LISTEN_ADDR", " 127.0.0.1:7000 "),
            ("PORT", "9999"),
            ("RSS_PROXY", "socks5h://proxy.internal"),
            ("REQUEST_LOG", "ON"),
            ("API_KEY", "  env-key  "),
        ]));

        assert_eq!(config.listen_addr, "127.0.0.1:7000");
        assert_eq!(config.proxy.as_deref(), Some("socks5h://proxy.internal"));
        assert!(config.request_log);
        assert_eq!(config.api_key().unwrap().expose_secret(), "env-key");
    }

    #[test]
    fn test_port_forms() {
        let config = Config::default().with_env(env(&[("PORT", "3000")]));
        assert_eq!(config.listen_addr, "0.0.0.0:3000");

        let config = Config::default().with_env(env(&[("PORT", ":3001")]));
        assert_eq!(config.listen_addr, "0.0.0.0:3001");
    }

    #[test]
    fn test_request_log_flag_values() {
        for (value, expected) in [("1", true), ("true", true), ("on", true), ("0", false), ("yes", false)] {
            let config = Config::default().with_env(env(&[("REQUEST_LOG", value)]));
            assert_eq!(config.request_log, expected, "REQUEST_LOG={value}");
        }
    }

    #[test]
    fn test_max_bytes_fallbacks() {
        for value in ["abc", "0", "-5", "1.5"] {
            let config = Config::default().with_env(env(&[("RSS_MAX_BYTES", value)]));
            assert_eq!(config.max_feed_bytes(), DEFAULT_MAX_FEED_BYTES, "RSS_MAX_BYTES={value}");
        }
        let config = Config::default().with_env(env(&[("RSS_MAX_BYTES", "4096")]));
        assert_eq!(config.max_feed_bytes(), 4096);
    }

    #[test]
    fn test_blank_api_key_disables_auth() {
        let config = Config {
            api_key: Some("   ".into()),
            ..Default::default()
        };
        assert!(config.api_key().is_none());
    }

    #[test]
    fn test_parse_header_list() {
        let parsed = parse_header_list(" User-Agent = Bot/1.0 ,broken,=nokey,, X-A=b=c ");
        assert_eq!(
            parsed,
            vec![
                ("User-Agent".to_string(), "Bot/1.0".to_string()),
                ("X-A".to_string(), "b=c".to_string()),
            ]
        );
    }

    #[test]
    fn test_env_headers_override_file_headers() {
        let mut config = Config::default();
        config
            .headers
            .insert("X-Token".into(), "from-file".into());
        config.headers.insert("Bad Header".into(), "x".into());
        let config = config.with_env(env(&[("RSS_HEADERS", "x-token=from-env,Accept=application/rss+xml")]));

        let map = config.header_map();
        assert_eq!(map.get("x-token").unwrap(), "from-env");
        assert_eq!(map.get("accept").unwrap(), "application/rss+xml");
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_debug_masks_api_key() {
        let config = Config {
            api_key: Some("super-secret-key-12345".to_string()),
            ..Default::default()
        };

        let debug_output = format!("{:?}", config);
        assert!(
            !debug_output.contains("super-secret-key-12345"),
            "Debug output should not contain the API key"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_debug_prints_header_names_only() {
        let mut config = Config::default();
        config
            .headers
            .insert("Cookie".into(), "session=file-cookie".into());
        let config = config.with_env(env(&[("RSS_HEADERS", "Authorization=Bearer env-token")]));

        let debug_output = format!("{:?}", config);
        assert!(debug_output.contains("Cookie"));
        assert!(debug_output.contains("Authorization"));
        assert!(!debug_output.contains("file-cookie"));
        assert!(!debug_output.contains("env-token"));
    }
}
