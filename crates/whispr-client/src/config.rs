use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Client tunables. Every knob can be set from the environment via
/// [`ClientConfig::from_env`] or deserialised from a config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: String,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub message_poll_interval: Duration,
    #[serde(with = "secs")]
    pub note_poll_interval: Duration,
    pub candidate_limit: usize,
    pub cold_start_limit: usize,
    /// Viewers with at most this many buddies get the cold-start note policy.
    pub cold_start_buddy_threshold: usize,
    /// Ids remembered per tracked collection by the poller.
    pub known_id_history: usize,
    #[serde(with = "secs")]
    pub connectivity_check_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:3000".into(),
            request_timeout: Duration::from_secs(15),
            message_poll_interval: Duration::from_secs(30),
            note_poll_interval: Duration::from_secs(15),
            candidate_limit: 20,
            cold_start_limit: 5,
            cold_start_buddy_threshold: 0,
            known_id_history: 50,
            connectivity_check_interval: Duration::from_secs(60),
        }
    }
}

impl ClientConfig {
    /// Read `WHISPR_*` variables, falling back to defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let secs_or = |key: &str, default: Duration| {
            parsed(&lookup, key).map(Duration::from_secs).unwrap_or(default)
        };

        Self {
            base_url: lookup("WHISPR_URL").unwrap_or(defaults.base_url),
            request_timeout: secs_or("WHISPR_REQUEST_TIMEOUT_SECS", defaults.request_timeout),
            message_poll_interval: secs_or("WHISPR_MESSAGE_POLL_SECS", defaults.message_poll_interval),
            note_poll_interval: secs_or("WHISPR_NOTE_POLL_SECS", defaults.note_poll_interval),
            candidate_limit: parsed(&lookup, "WHISPR_CANDIDATE_LIMIT").unwrap_or(defaults.candidate_limit),
            cold_start_limit: parsed(&lookup, "WHISPR_COLD_START_LIMIT").unwrap_or(defaults.cold_start_limit),
            cold_start_buddy_threshold: parsed(&lookup, "WHISPR_COLD_START_BUDDY_THRESHOLD")
                .unwrap_or(defaults.cold_start_buddy_threshold),
            known_id_history: parsed(&lookup, "WHISPR_KNOWN_ID_HISTORY").unwrap_or(defaults.known_id_history),
            connectivity_check_interval: secs_or(
                "WHISPR_CONNECTIVITY_CHECK_SECS",
                defaults.connectivity_check_interval,
            ),
        }
    }
}

fn parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    lookup(key).and_then(|v| v.trim().parse().ok())
}

/// Durations as whole seconds.
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn environment_overrides_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("WHISPR_URL", "https://whispr.example"),
            ("WHISPR_NOTE_POLL_SECS", "5"),
            ("WHISPR_COLD_START_LIMIT", "3"),
            ("WHISPR_CANDIDATE_LIMIT", "lots"),
        ]);
        let config = ClientConfig::from_lookup(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.base_url, "https://whispr.example");
        assert_eq!(config.note_poll_interval, Duration::from_secs(5));
        assert_eq!(config.cold_start_limit, 3);
        assert_eq!(config.candidate_limit, 20);
        assert_eq!(config.known_id_history, 50);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{ "message_poll_interval": 5, "known_id_history": 10 }"#).unwrap();
        assert_eq!(config.message_poll_interval, Duration::from_secs(5));
        assert_eq!(config.known_id_history, 10);
        assert_eq!(config.request_timeout, Duration::from_secs(15));
    }
}
