use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

use crate::auth::DEFAULT_PASSWORD_ITERATIONS;

/// Application-level constants
pub const APP_NAME: &str = "MediNodus";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "medgemma:4b";
const DEFAULT_OPENFDA_URL: &str = "https://api.fda.gov";
const DEFAULT_AI_TIMEOUT_SECS: u64 = 180;
const DEFAULT_AI_QUEUE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_REFERENCE_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// `RUST_LOG` wins when set.
pub fn default_log_filter() -> &'static str {
    "medinodus=info,tower_http=info"
}

/// ~/MediNodus/ unless `MEDINODUS_DATA_DIR` says otherwise.
pub fn default_data_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|home| home.join(APP_NAME))
        .ok_or(ConfigError::NoHomeDir)
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid value for {var}: '{value}' ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("Cannot determine home directory; set MEDINODUS_DATA_DIR")]
    NoHomeDir,
}

/// Runtime configuration, resolved once at startup.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub ollama_url: String,
    pub model: String,
    pub openfda_url: String,
    pub ai_timeout_secs: u64,
    /// How long a request may wait for the model while another call holds it.
    pub ai_queue_timeout_secs: u64,
    pub reference_timeout_secs: u64,
    pub max_upload_bytes: usize,
    pub password_iterations: u32,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Build from an arbitrary variable source. Unset or blank means default.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |var: &str| lookup(var).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let data_dir = match get("MEDINODUS_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        Ok(Self {
            bind_addr: parse_or("MEDINODUS_BIND_ADDR", get("MEDINODUS_BIND_ADDR"), || {
                DEFAULT_BIND_ADDR.parse().map_err(|e: std::net::AddrParseError| e.to_string())
            })?,
            data_dir,
            ollama_url: url_or("MEDINODUS_OLLAMA_URL", get("MEDINODUS_OLLAMA_URL"), DEFAULT_OLLAMA_URL)?,
            model: get("MEDINODUS_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            openfda_url: url_or("MEDINODUS_OPENFDA_URL", get("MEDINODUS_OPENFDA_URL"), DEFAULT_OPENFDA_URL)?,
            ai_timeout_secs: positive_or(
                "MEDINODUS_AI_TIMEOUT_SECS",
                get("MEDINODUS_AI_TIMEOUT_SECS"),
                DEFAULT_AI_TIMEOUT_SECS,
            )?,
            ai_queue_timeout_secs: positive_or(
                "MEDINODUS_AI_QUEUE_TIMEOUT_SECS",
                get("MEDINODUS_AI_QUEUE_TIMEOUT_SECS"),
                DEFAULT_AI_QUEUE_TIMEOUT_SECS,
            )?,
            reference_timeout_secs: positive_or(
                "MEDINODUS_REFERENCE_TIMEOUT_SECS",
                get("MEDINODUS_REFERENCE_TIMEOUT_SECS"),
                DEFAULT_REFERENCE_TIMEOUT_SECS,
            )?,
            max_upload_bytes: positive_or(
                "MEDINODUS_MAX_UPLOAD_BYTES",
                get("MEDINODUS_MAX_UPLOAD_BYTES"),
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
            password_iterations: positive_or(
                "MEDINODUS_PASSWORD_ITERATIONS",
                get("MEDINODUS_PASSWORD_ITERATIONS"),
                DEFAULT_PASSWORD_ITERATIONS,
            )?,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("medinodus.db")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.data_dir.join("images")
    }
}

fn parse_or<T: std::str::FromStr>(
    var: &'static str,
    raw: Option<String>,
    default: impl FnOnce() -> Result<T, String>,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match raw {
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            var,
            reason: e.to_string(),
            value,
        }),
        None => default().map_err(|reason| ConfigError::Invalid {
            var,
            value: String::new(),
            reason,
        }),
    }
}

fn positive_or<T>(var: &'static str, raw: Option<String>, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::fmt::Display,
{
    let value = parse_or(var, raw.clone(), || Ok(default))?;
    if value <= T::default() {
        return Err(ConfigError::Invalid {
            var,
            value: raw.unwrap_or_default(),
            reason: "must be greater than zero".into(),
        });
    }
    Ok(value)
}

fn url_or(var: &'static str, raw: Option<String>, default: &str) -> Result<String, ConfigError> {
    let url = raw.unwrap_or_else(|| default.to_string());
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::Invalid {
            var,
            value: url,
            reason: "must start with http:// or https://".into(),
        });
    }
    Ok(url.trim_end_matches('/').to_string())
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
        AppConfig::from_lookup(|var| vars.get(var).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[("MEDINODUS_DATA_DIR", "/tmp/medinodus")]).unwrap();
        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(config.ollama_url, "http://localhost:11434");
        assert_eq!(config.model, "medgemma:4b");
        assert_eq!(config.openfda_url, "https://api.fda.gov");
        assert_eq!(config.ai_timeout_secs, 180);
        assert_eq!(config.ai_queue_timeout_secs, 300);
        assert_eq!(config.reference_timeout_secs, 10);
        assert_eq!(config.max_upload_bytes, 20 * 1024 * 1024);
        assert_eq!(config.password_iterations, 600_000);
        assert_eq!(config.database_path(), PathBuf::from("/tmp/medinodus/medinodus.db"));
        assert_eq!(config.images_dir(), PathBuf::from("/tmp/medinodus/images"));
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("MEDINODUS_DATA_DIR", "/srv/med"),
            ("MEDINODUS_BIND_ADDR", "0.0.0.0:9000"),
            ("MEDINODUS_OLLAMA_URL", "http://gpu-box:11434/"),
            ("MEDINODUS_MODEL", "medgemma:27b"),
            ("MEDINODUS_AI_TIMEOUT_SECS", "60"),
            ("MEDINODUS_AI_QUEUE_TIMEOUT_SECS", "15"),
        ])
        .unwrap();
        assert_eq!(config.bind_addr.port(), 9000);
        assert_eq!(config.ollama_url, "http://gpu-box:11434");
        assert_eq!(config.model, "medgemma:27b");
        assert_eq!(config.ai_timeout_secs, 60);
        assert_eq!(config.ai_queue_timeout_secs, 15);
    }

    #[test]
    fn blank_values_mean_default() {
        let config = config_from(&[("MEDINODUS_DATA_DIR", "/x"), ("MEDINODUS_MODEL", "  ")]).unwrap();
        assert_eq!(config.model, "medgemma:4b");
    }

    #[test]
    fn invalid_values_are_startup_errors() {
        for (var, value) in [
            ("MEDINODUS_BIND_ADDR", "localhost"),
            ("MEDINODUS_AI_TIMEOUT_SECS", "soon"),
            ("MEDINODUS_AI_TIMEOUT_SECS", "0"),
            ("MEDINODUS_AI_QUEUE_TIMEOUT_SECS", "0"),
            ("MEDINODUS_OLLAMA_URL", "ftp://ollama"),
            ("MEDINODUS_MAX_UPLOAD_BYTES", "-1"),
        ] {
            let err = config_from(&[("MEDINODUS_DATA_DIR", "/x"), (var, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { var: v, .. } if v == var),
                "{var}={value} accepted"
            );
        }
    }

    #[test]
    fn app_name_and_version() {
        assert_eq!(APP_NAME, "MediNodus");
        assert_eq!(APP_VERSION, "0.1.0");
    }

    #[test]
    fn log_filter_targets_crate() {
        assert!(default_log_filter().starts_with("medinodus="));
    }
}
