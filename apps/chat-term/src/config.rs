//! Environment-backed runtime configuration for `chat-term`.

use std::{env, error::Error, fmt, path::PathBuf};

use chat_core::SyncConfig;
use url::Url;

const DEFAULT_API_HOST: &str = "localhost";
const DEFAULT_API_PORT: u16 = 8000;
const DEFAULT_DATA_DIR: &str = "./.chat-term-store";
const SESSION_PROFILE_FILENAME: &str = "session.json";

/// Runtime configuration used by the terminal app.
#[derive(Debug, Clone, PartialEq)]
pub struct TermConfig {
    /// Bridge HTTP base; the push endpoint is derived from it.
    pub api_base_url: Url,
    /// Engine timing forwarded to the sync runtime.
    pub sync: SyncConfig,
    /// Directory holding the persisted session profile.
    pub data_dir: PathBuf,
    /// Identifier to log in with when nothing is persisted.
    pub prefill_client_id: Option<String>,
}

impl TermConfig {
    /// Parse configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(mut lookup: F) -> Result<Self, ConfigError>
    where
        F: FnMut(&str) -> Option<String>,
    {
        let api_base_url = api_base_url(&mut lookup)?;
        let defaults = SyncConfig::default();

        let sync = SyncConfig {
            poll_interval_ms: parse_optional_u64_with_default(
                "CHAT_POLL_INTERVAL_MS",
                defaults.poll_interval_ms,
                &mut lookup,
            )?,
            send_resync_delay_ms: parse_optional_u64_with_default(
                "CHAT_SEND_RESYNC_DELAY_MS",
                defaults.send_resync_delay_ms,
                &mut lookup,
            )?,
            group_resync_delay_ms: parse_optional_u64_with_default(
                "CHAT_GROUP_RESYNC_DELAY_MS",
                defaults.group_resync_delay_ms,
                &mut lookup,
            )?,
            reconnect_base_delay_ms: parse_optional_u64_with_default(
                "CHAT_RECONNECT_BASE_DELAY_MS",
                defaults.reconnect_base_delay_ms,
                &mut lookup,
            )?,
            reconnect_max_delay_ms: parse_optional_u64_with_default(
                "CHAT_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay_ms,
                &mut lookup,
            )?,
            reconnect_jitter_ratio: parse_optional_f64(
                "CHAT_RECONNECT_JITTER_RATIO",
                defaults.reconnect_jitter_ratio,
                &mut lookup,
            )?,
            request_timeout_ms: parse_optional_u64_with_default(
                "CHAT_REQUEST_TIMEOUT_MS",
                defaults.request_timeout_ms,
                &mut lookup,
            )?,
        };

        for (key, value) in [
            ("CHAT_POLL_INTERVAL_MS", sync.poll_interval_ms),
            ("CHAT_RECONNECT_BASE_DELAY_MS", sync.reconnect_base_delay_ms),
            ("CHAT_REQUEST_TIMEOUT_MS", sync.request_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    key,
                    value: "0".to_owned(),
                    reason: "must be at least 1".to_owned(),
                });
            }
        }
        if sync.reconnect_max_delay_ms < sync.reconnect_base_delay_ms {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_MAX_DELAY_MS",
                value: sync.reconnect_max_delay_ms.to_string(),
                reason: "must not be below CHAT_RECONNECT_BASE_DELAY_MS".to_owned(),
            });
        }
        if !(0.0..=1.0).contains(&sync.reconnect_jitter_ratio) {
            return Err(ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_JITTER_RATIO",
                value: sync.reconnect_jitter_ratio.to_string(),
                reason: "must be between 0 and 1".to_owned(),
            });
        }

        let data_dir = optional_trimmed_env("CHAT_DATA_DIR", &mut lookup)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let prefill_client_id = optional_trimmed_env("CHAT_CLIENT_ID", &mut lookup);

        Ok(Self {
            api_base_url,
            sync,
            data_dir,
            prefill_client_id,
        })
    }

    /// Location of the persisted session profile.
    pub fn session_profile_path(&self) -> PathBuf {
        self.data_dir.join(SESSION_PROFILE_FILENAME)
    }
}

/// Errors produced while parsing runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    InvalidValue {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidValue { key, value, reason } => {
                write!(f, "invalid {key}='{value}': {reason}")
            }
        }
    }
}

impl Error for ConfigError {}

fn api_base_url<F>(lookup: &mut F) -> Result<Url, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let (key, raw) = match optional_trimmed_env("CHAT_API_BASE_URL", lookup) {
        Some(raw) => ("CHAT_API_BASE_URL", raw),
        None => {
            let host = optional_trimmed_env("CHAT_API_HOST", lookup)
                .unwrap_or_else(|| DEFAULT_API_HOST.to_owned());
            let port = parse_optional_u16("CHAT_API_PORT", lookup)?.unwrap_or(DEFAULT_API_PORT);
            ("CHAT_API_HOST", format!("http://{host}:{port}/"))
        }
    };

    let url = Url::parse(&raw).map_err(|err| ConfigError::InvalidValue {
        key,
        value: raw.clone(),
        reason: err.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key,
            value: raw,
            reason: "expected an http or https URL".to_owned(),
        });
    }
    Ok(url)
}

fn optional_trimmed_env<F>(key: &'static str, lookup: &mut F) -> Option<String>
where
    F: FnMut(&str) -> Option<String>,
{
    lookup(key)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_optional_u16<F>(key: &'static str, lookup: &mut F) -> Result<Option<u16>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u16>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64<F>(key: &'static str, lookup: &mut F) -> Result<Option<u64>, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

fn parse_optional_u64_with_default<F>(
    key: &'static str,
    default: u64,
    lookup: &mut F,
) -> Result<u64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(parse_optional_u64(key, lookup)?.unwrap_or(default))
}

fn parse_optional_f64<F>(
    key: &'static str,
    default: f64,
    lookup: &mut F,
) -> Result<f64, ConfigError>
where
    F: FnMut(&str) -> Option<String>,
{
    let Some(value) = optional_trimmed_env(key, lookup) else {
        return Ok(default);
    };
    value
        .parse::<f64>()
        .map_err(|err| ConfigError::InvalidValue {
            key,
            value,
            reason: err.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{collections::HashMap, path::Path};

    fn config_from_pairs(pairs: &[(&str, &str)]) -> Result<TermConfig, ConfigError> {
        let map = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect::<HashMap<_, _>>();
        TermConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn defaults_point_at_local_bridge() {
        let cfg = config_from_pairs(&[]).expect("empty env should parse");

        assert_eq!(cfg.api_base_url.as_str(), "http://localhost:8000/");
        assert_eq!(cfg.sync, SyncConfig::default());
        assert_eq!(cfg.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert_eq!(cfg.prefill_client_id, None);
        assert_eq!(
            cfg.session_profile_path(),
            Path::new("./.chat-term-store/session.json")
        );
    }

    #[test]
    fn host_and_port_build_the_base_url() {
        let cfg = config_from_pairs(&[("CHAT_API_HOST", "10.0.0.5"), ("CHAT_API_PORT", "9000")])
            .expect("config should parse");
        assert_eq!(cfg.api_base_url.as_str(), "http://10.0.0.5:9000/");
    }

    #[test]
    fn explicit_base_url_wins_over_host_and_port() {
        let cfg = config_from_pairs(&[
            ("CHAT_API_BASE_URL", " https://chat.example.org/bridge "),
            ("CHAT_API_HOST", "ignored"),
        ])
        .expect("config should parse");
        assert_eq!(cfg.api_base_url.as_str(), "https://chat.example.org/bridge");
    }

    #[test]
    fn parses_timing_overrides_and_prefill() {
        let cfg = config_from_pairs(&[
            ("CHAT_POLL_INTERVAL_MS", "2500"),
            ("CHAT_SEND_RESYNC_DELAY_MS", "0"),
            ("CHAT_GROUP_RESYNC_DELAY_MS", "750"),
            ("CHAT_RECONNECT_BASE_DELAY_MS", "1000"),
            ("CHAT_RECONNECT_MAX_DELAY_MS", "8000"),
            ("CHAT_RECONNECT_JITTER_RATIO", "0"),
            ("CHAT_REQUEST_TIMEOUT_MS", "4000"),
            ("CHAT_DATA_DIR", "/tmp/chat"),
            ("CHAT_CLIENT_ID", "  alice "),
        ])
        .expect("config should parse");

        assert_eq!(cfg.sync.poll_interval_ms, 2_500);
        assert_eq!(cfg.sync.send_resync_delay_ms, 0);
        assert_eq!(cfg.sync.group_resync_delay_ms, 750);
        assert_eq!(cfg.sync.reconnect_base_delay_ms, 1_000);
        assert_eq!(cfg.sync.reconnect_max_delay_ms, 8_000);
        assert_eq!(cfg.sync.reconnect_jitter_ratio, 0.0);
        assert_eq!(cfg.sync.request_timeout_ms, 4_000);
        assert_eq!(cfg.session_profile_path(), Path::new("/tmp/chat/session.json"));
        assert_eq!(cfg.prefill_client_id.as_deref(), Some("alice"));
    }

    #[test]
    fn rejects_invalid_numeric_values() {
        let err = config_from_pairs(&[("CHAT_POLL_INTERVAL_MS", "soon")])
            .expect_err("non-numeric interval should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_POLL_INTERVAL_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("CHAT_POLL_INTERVAL_MS", "0")])
            .expect_err("zero interval should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_POLL_INTERVAL_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("CHAT_API_PORT", "70000")])
            .expect_err("port out of range should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_API_PORT",
                ..
            }
        ));
    }

    #[test]
    fn rejects_inconsistent_reconnect_settings() {
        let err = config_from_pairs(&[
            ("CHAT_RECONNECT_BASE_DELAY_MS", "5000"),
            ("CHAT_RECONNECT_MAX_DELAY_MS", "1000"),
        ])
        .expect_err("max below base should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_MAX_DELAY_MS",
                ..
            }
        ));

        let err = config_from_pairs(&[("CHAT_RECONNECT_JITTER_RATIO", "1.5")])
            .expect_err("ratio above one should fail");
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "CHAT_RECONNECT_JITTER_RATIO",
                ..
            }
        ));
    }

    #[test]
    fn rejects_non_http_base_url() {
        let err = config_from_pairs(&[("CHAT_API_BASE_URL", "ftp://files.example.org")])
            .expect_err("ftp should be rejected");
        assert!(err.to_string().contains("CHAT_API_BASE_URL"));
    }
}
