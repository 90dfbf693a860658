use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, ConfigBuilder, Environment, File, builder::DefaultState};
use serde::Deserialize;

/// Server used when neither `NIGHTSCOUT_URL` nor a config file names one.
pub const DEFAULT_SERVER_URL: &str = "http://localhost:1337";
/// Nightscout's own fallback duration of insulin action, in hours.
pub const DEFAULT_DIA_HOURS: f64 = 3.0;
pub const DEFAULT_BEFORE_FIRST_POLICY: BeforeFirstPolicy = BeforeFirstPolicy::ClampToFirst;
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub network: NetworkConfig,
    pub resolution: ResolutionConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub url: String,
    /// Access token; takes precedence over `api_secret`.
    pub access_token: Option<String>,
    /// Plain API secret, hashed before it is sent.
    pub api_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_SERVER_URL.to_string(),
            access_token: None,
            api_secret: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct NetworkConfig {
    pub request_timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// What to answer for an instant earlier than every profile start date.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BeforeFirstPolicy {
    /// Apply the earliest known definition retroactively.
    ClampToFirst,
    /// Fail with `NoActiveProfile`.
    Fail,
}

/// Settings applied while building profiles from raw records.
#[derive(Debug, Deserialize, Clone)]
pub struct ResolutionConfig {
    pub before_first: BeforeFirstPolicy,
    /// Used for profiles that carry no `dia`.
    pub default_dia_hours: f64,
    /// Used for profiles that carry no `timezone`. Unset means such
    /// profiles are rejected.
    pub default_timezone: Option<String>,
}

impl Default for ResolutionConfig {
    fn default() -> Self {
        Self {
            before_first: DEFAULT_BEFORE_FIRST_POLICY,
            default_dia_hours: DEFAULT_DIA_HOURS,
            default_timezone: None,
        }
    }
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nightscout-client");

        let builder = Self::defaults()?
            // 2. Load from local config file (optional, lowest priority)
            .add_source(File::from(PathBuf::from("config.toml")).required(false))
            // 3. Load from user config directory (optional, overrides local)
            .add_source(File::from(config_dir.join("config.toml")).required(false))
            // 4. Load from Environment variables (NIGHTSCOUT__SERVER__URL=...)
            .add_source(Environment::with_prefix("NIGHTSCOUT").separator("__"));

        let s = builder.build()?;
        Ok(s.try_deserialize()?)
    }

    /// Load defaults overlaid with one explicit file and the environment.
    pub fn load_from(path: &Path) -> Result<Self> {
        let builder = Self::defaults()?
            .add_source(File::from(path.to_path_buf()).required(true))
            .add_source(Environment::with_prefix("NIGHTSCOUT").separator("__"));

        let s = builder
            .build()
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Ok(s.try_deserialize()?)
    }

    fn defaults() -> Result<ConfigBuilder<DefaultState>> {
        // Load .env file (silently ignore if not present)
        let _ = dotenvy::dotenv();

        let server_url =
            std::env::var("NIGHTSCOUT_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());

        let builder = Config::builder()
            // 1. Load default values
            // Server
            .set_default("server.url", server_url)?
            .set_default("server.access_token", None::<String>)?
            .set_default("server.api_secret", None::<String>)?
            // Network
            .set_default("network.request_timeout_secs", DEFAULT_REQUEST_TIMEOUT_SECS as i64)?
            .set_default("network.connect_timeout_secs", DEFAULT_CONNECT_TIMEOUT_SECS as i64)?
            // Resolution
            .set_default("resolution.before_first", "clamp_to_first")?
            .set_default("resolution.default_dia_hours", DEFAULT_DIA_HOURS)?
            .set_default("resolution.default_timezone", None::<String>)?;

        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    // ==================== Default Value Tests ====================

    #[test]
    fn test_network_config_defaults() {
        let config = NetworkConfig::default();
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.connect_timeout_secs, 10);
    }

    #[test]
    fn test_resolution_config_defaults() {
        let config = ResolutionConfig::default();
        assert_eq!(config.before_first, BeforeFirstPolicy::ClampToFirst);
        assert_eq!(config.default_dia_hours, 3.0);
        assert!(config.default_timezone.is_none());
    }

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.url, DEFAULT_SERVER_URL);
        assert!(config.access_token.is_none());
        assert!(config.api_secret.is_none());
    }

    // ==================== Config Loading Tests ====================

    #[test]
    fn test_config_load_with_defaults() {
        // Should succeed even without a config file (uses defaults)
        let result = AppConfig::load();
        assert!(result.is_ok());
    }

    #[test]
    fn test_loaded_config_has_expected_structure() {
        let config = AppConfig::load().expect("Config should load");

        assert!(!config.server.url.is_empty());
        assert!(config.network.request_timeout_secs > 0);
        assert!(config.network.connect_timeout_secs > 0);
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            r#"
[server]
url = "https://cgm.example.org"
access_token = "reader-abc123"

[resolution]
before_first = "fail"
default_timezone = "Europe/Berlin"
"#
        )
        .unwrap();

        let config = AppConfig::load_from(file.path()).expect("Config should load");
        assert_eq!(config.server.url, "https://cgm.example.org");
        assert_eq!(config.server.access_token.as_deref(), Some("reader-abc123"));
        assert_eq!(config.resolution.before_first, BeforeFirstPolicy::Fail);
        assert_eq!(
            config.resolution.default_timezone.as_deref(),
            Some("Europe/Berlin")
        );
    }

    #[test]
    fn test_load_from_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let result = AppConfig::load_from(&dir.path().join("absent.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_policy_deserializes_from_snake_case() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: BeforeFirstPolicy,
        }
        let w: Wrapper = serde_json::from_str(r#"{"policy":"clamp_to_first"}"#).unwrap();
        assert_eq!(w.policy, BeforeFirstPolicy::ClampToFirst);
        let w: Wrapper = serde_json::from_str(r#"{"policy":"fail"}"#).unwrap();
        assert_eq!(w.policy, BeforeFirstPolicy::Fail);
    }

    // ==================== Environment Variable Override Tests ====================

    /// Helper to safely set and remove environment variables in tests.
    fn with_env_var<F, R>(key: &str, value: &str, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        // SAFETY: Test environment, the variable is only read by this test
        unsafe {
            std::env::set_var(key, value);
        }
        let result = f();
        unsafe {
            std::env::remove_var(key);
        }
        result
    }

    #[test]
    fn test_env_var_overrides_default_dia() {
        let config = with_env_var("NIGHTSCOUT__RESOLUTION__DEFAULT_DIA_HOURS", "4.5", || {
            AppConfig::load().expect("Config should load")
        });

        assert_eq!(
            config.resolution.default_dia_hours, 4.5,
            "Environment variable should override resolution.default_dia_hours"
        );
    }
}
