use std::time::Duration;

use mediadeck_store::DEFAULT_HISTORY_CAP;

use crate::reconnect::{
    BackoffConfig, Liveness, ReconnectPolicy, DEFAULT_CONNECT_TIMEOUT, DEFAULT_IDLE_TIMEOUT,
    DEFAULT_PING_INTERVAL, DEFAULT_RECONNECT_DELAY,
};

const DEFAULT_API_URL: &str = "http://localhost:8080";

/// Client configuration loaded from environment variables.
///
/// All fields have defaults suitable for a backend on localhost.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    /// Base URL of the jobs HTTP API (default: `http://localhost:8080`).
    pub api_url: String,
    /// Event stream endpoint (default: derived from `api_url`).
    pub ws_url: String,
    pub reconnect: ReconnectPolicy,
    pub liveness: Liveness,
    /// Number of dismissed jobs kept in history (default: `50`).
    pub history_cap: usize,
}

/// An environment variable held a value that could not be used.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got {value:?}")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: derive_ws_url(DEFAULT_API_URL),
            reconnect: ReconnectPolicy::default(),
            liveness: Liveness::default(),
            history_cap: DEFAULT_HISTORY_CAP,
        }
    }
}

impl StreamConfig {
    /// Load configuration from the process environment.
    ///
    /// | Env Var                          | Default                  |
    /// |----------------------------------|--------------------------|
    /// | `MEDIADECK_API_URL`              | `http://localhost:8080`  |
    /// | `MEDIADECK_WS_URL`               | API URL as `ws(s)://.../ws` |
    /// | `MEDIADECK_RECONNECT_DELAY_SECS` | `5`                      |
    /// | `MEDIADECK_RECONNECT_BACKOFF`    | unset (fixed delay)      |
    /// | `MEDIADECK_HISTORY_CAP`          | `50`                     |
    /// | `MEDIADECK_CONNECT_TIMEOUT_SECS` | `10`                     |
    /// | `MEDIADECK_PING_INTERVAL_SECS`   | `15` (`0` disables)      |
    /// | `MEDIADECK_IDLE_TIMEOUT_SECS`    | `45` (`0` disables)      |
    ///
    /// Setting `MEDIADECK_RECONNECT_BACKOFF=1` switches to capped
    /// exponential backoff (1 s doubling up to 30 s); the fixed delay is
    /// then unused.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("MEDIADECK_API_URL")
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| DEFAULT_API_URL.into());

        let ws_url = lookup("MEDIADECK_WS_URL")
            .map(|url| url.trim().to_string())
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| derive_ws_url(&api_url));

        let delay_secs: u64 = parse_var(
            &lookup,
            "MEDIADECK_RECONNECT_DELAY_SECS",
            "a whole number of seconds",
        )?
        .unwrap_or(DEFAULT_RECONNECT_DELAY.as_secs());

        let backoff = match lookup("MEDIADECK_RECONNECT_BACKOFF").as_deref().map(str::trim) {
            None | Some("") | Some("0") => false,
            Some("1") => true,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    var: "MEDIADECK_RECONNECT_BACKOFF",
                    expected: "0 or 1",
                    value: other.to_string(),
                })
            }
        };

        let reconnect = if backoff {
            ReconnectPolicy::Backoff(BackoffConfig::default())
        } else {
            ReconnectPolicy::Fixed(Duration::from_secs(delay_secs))
        };

        let history_cap: usize = parse_var(&lookup, "MEDIADECK_HISTORY_CAP", "a non-negative integer")?
            .unwrap_or(DEFAULT_HISTORY_CAP);

        let connect_secs: u64 = parse_var(
            &lookup,
            "MEDIADECK_CONNECT_TIMEOUT_SECS",
            "a whole number of seconds",
        )?
        .unwrap_or(DEFAULT_CONNECT_TIMEOUT.as_secs());
        if connect_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "MEDIADECK_CONNECT_TIMEOUT_SECS",
                expected: "at least one second",
                value: "0".into(),
            });
        }

        let liveness = Liveness {
            connect_timeout: Duration::from_secs(connect_secs),
            ping_interval: optional_secs(&lookup, "MEDIADECK_PING_INTERVAL_SECS", DEFAULT_PING_INTERVAL)?,
            idle_timeout: optional_secs(&lookup, "MEDIADECK_IDLE_TIMEOUT_SECS", DEFAULT_IDLE_TIMEOUT)?,
        };

        Ok(Self {
            api_url,
            ws_url,
            reconnect,
            liveness,
            history_cap,
        })
    }
}

/// Derive the event stream URL from the API base URL: `http` becomes
/// `ws`, `https` becomes `wss`, and `/ws` is appended.
pub fn derive_ws_url(api_url: &str) -> String {
    let base = api_url.trim_end_matches('/');
    let swapped = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_string()
    };
    format!("{swapped}/ws")
}

/// Seconds from `var`, where `0` turns the feature off.
fn optional_secs<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: u64 = parse_var(lookup, var, "a whole number of seconds")?.unwrap_or(default.as_secs());
    Ok((secs > 0).then(|| Duration::from_secs(secs)))
}

fn parse_var<T, F>(lookup: &F, var: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                var,
                expected,
                value,
            }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = StreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, StreamConfig::default());
        assert_eq!(config.ws_url, "ws://localhost:8080/ws");
        assert_eq!(config.reconnect, ReconnectPolicy::Fixed(Duration::from_secs(5)));
        assert_eq!(config.history_cap, 50);
    }

    #[test]
    fn ws_url_follows_api_url() {
        let config =
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_API_URL", "https://deck.example/")]))
                .unwrap();
        assert_eq!(config.api_url, "https://deck.example");
        assert_eq!(config.ws_url, "wss://deck.example/ws");
    }

    #[test]
    fn explicit_ws_url_wins() {
        let config = StreamConfig::from_lookup(lookup(&[
            ("MEDIADECK_API_URL", "http://10.0.0.2:9000"),
            ("MEDIADECK_WS_URL", "ws://10.0.0.3:9001/events"),
        ]))
        .unwrap();
        assert_eq!(config.ws_url, "ws://10.0.0.3:9001/events");
    }

    #[test]
    fn reconnect_settings() {
        let fixed =
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_RECONNECT_DELAY_SECS", "2")])).unwrap();
        assert_eq!(fixed.reconnect, ReconnectPolicy::Fixed(Duration::from_secs(2)));

        let backoff =
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_RECONNECT_BACKOFF", "1")])).unwrap();
        assert_eq!(backoff.reconnect, ReconnectPolicy::Backoff(BackoffConfig::default()));
    }

    #[test]
    fn liveness_settings() {
        let defaults = StreamConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(defaults.liveness.connect_timeout, Duration::from_secs(10));
        assert_eq!(defaults.liveness.ping_interval, Some(Duration::from_secs(15)));
        assert_eq!(defaults.liveness.idle_timeout, Some(Duration::from_secs(45)));

        let tuned = StreamConfig::from_lookup(lookup(&[
            ("MEDIADECK_CONNECT_TIMEOUT_SECS", "3"),
            ("MEDIADECK_PING_INTERVAL_SECS", "0"),
            ("MEDIADECK_IDLE_TIMEOUT_SECS", "120"),
        ]))
        .unwrap();
        assert_eq!(tuned.liveness.connect_timeout, Duration::from_secs(3));
        assert_eq!(tuned.liveness.ping_interval, None);
        assert_eq!(tuned.liveness.idle_timeout, Some(Duration::from_secs(120)));

        assert_matches!(
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_CONNECT_TIMEOUT_SECS", "0")])),
            Err(ConfigError::Invalid { var: "MEDIADECK_CONNECT_TIMEOUT_SECS", .. })
        );
    }

    #[test]
    fn unparsable_values_are_errors() {
        assert_matches!(
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_RECONNECT_DELAY_SECS", "soon")])),
            Err(ConfigError::Invalid { var: "MEDIADECK_RECONNECT_DELAY_SECS", .. })
        );
        assert_matches!(
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_HISTORY_CAP", "-1")])),
            Err(ConfigError::Invalid { var: "MEDIADECK_HISTORY_CAP", .. })
        );
        assert_matches!(
            StreamConfig::from_lookup(lookup(&[("MEDIADECK_RECONNECT_BACKOFF", "yes")])),
            Err(ConfigError::Invalid { var: "MEDIADECK_RECONNECT_BACKOFF", .. })
        );
    }
}
