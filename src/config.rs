use std::path::PathBuf;
use std::time::Duration;

use encoding_rs::Encoding;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use thiserror::Error;

use crate::quiz::parser::{Markers, MemberSelection};
use crate::quiz::retry::RetryPolicy;

const DEFAULT_QUIZ_FILE: &str = "quiz-questions.zip";
const DEFAULT_ENCODING: &str = "KOI8-R";
const DEFAULT_REDIS_PORT: u16 = 6379;
const DEFAULT_SESSION_IDLE_SECS: u64 = 60 * 60;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),

    #[error("{name} has an invalid value {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Everything the bot reads from the environment (and `.env`).
#[derive(Debug)]
pub struct Config {
    pub telegram_token: String,
    pub redis: ConnectionInfo,
    pub quiz_file: PathBuf,
    pub encoding: &'static Encoding,
    pub selection: MemberSelection,
    pub markers: Markers,
    pub retry: RetryPolicy,
    /// How long a user's parsed bank stays in memory without any turn
    pub session_idle: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Blank values count as unset
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));

        let telegram_token = require("TELEGRAM_TOKEN")?;

        let host = require("REDIS_ENDPOINT")?;
        let port = match get("REDIS_PORT") {
            Some(port) => port.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "REDIS_PORT",
                value: port,
            })?,
            None => DEFAULT_REDIS_PORT,
        };
        let redis = ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: 0,
                username: None,
                password: get("REDIS_PASSWORD"),
            },
        };

        let label = get("QUIZ_ENCODING").unwrap_or_else(|| DEFAULT_ENCODING.to_string());
        let encoding =
            Encoding::for_label(label.trim().as_bytes()).ok_or(ConfigError::Invalid {
                name: "QUIZ_ENCODING",
                value: label.clone(),
            })?;

        let selection = match get("QUIZ_MEMBERS").as_deref().map(str::trim) {
            None | Some("random") => MemberSelection::Random,
            Some("all") => MemberSelection::All,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "QUIZ_MEMBERS",
                    value: other.to_string(),
                })
            }
        };

        let defaults = Markers::default();
        let markers = Markers {
            question: get("QUIZ_QUESTION_MARKER").unwrap_or(defaults.question),
            answer: get("QUIZ_ANSWER_MARKER").unwrap_or(defaults.answer),
        };

        let retry = match get("QUIZ_RETRY_ATTEMPTS") {
            Some(attempts) => {
                let parsed = attempts.trim().parse::<u32>().ok().filter(|n| *n > 0);
                let attempts = parsed.ok_or(ConfigError::Invalid {
                    name: "QUIZ_RETRY_ATTEMPTS",
                    value: attempts,
                })?;
                RetryPolicy::new(attempts, RetryPolicy::default().base_delay)
            }
            None => RetryPolicy::default(),
        };

        let session_idle = match get("QUIZ_SESSION_IDLE_SECS") {
            Some(secs) => {
                let parsed = secs.trim().parse::<u64>().ok().filter(|n| *n > 0);
                let secs = parsed.ok_or(ConfigError::Invalid {
                    name: "QUIZ_SESSION_IDLE_SECS",
                    value: secs,
                })?;
                Duration::from_secs(secs)
            }
            None => Duration::from_secs(DEFAULT_SESSION_IDLE_SECS),
        };

        Ok(Self {
            telegram_token,
            redis,
            quiz_file: get("QUIZ_FILE")
                .unwrap_or_else(|| DEFAULT_QUIZ_FILE.to_string())
                .into(),
            encoding,
            selection,
            markers,
            retry,
            session_idle,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("TELEGRAM_TOKEN", "123:abc"),
        ("REDIS_ENDPOINT", "localhost"),
    ];

    #[test]
    fn defaults_apply() {
        let config = config(&REQUIRED).unwrap();
        assert_eq!(config.telegram_token, "123:abc");
        assert!(matches!(
            &config.redis.addr,
            ConnectionAddr::Tcp(host, 6379) if host == "localhost"
        ));
        assert_eq!(config.redis.redis.password, None);
        assert_eq!(config.quiz_file, PathBuf::from("quiz-questions.zip"));
        assert_eq!(config.encoding, encoding_rs::KOI8_R);
        assert_eq!(config.selection, MemberSelection::Random);
        assert_eq!(config.markers, Markers::default());
        assert_eq!(config.retry, RetryPolicy::default());
        assert_eq!(config.session_idle, Duration::from_secs(3600));
    }

    #[test]
    fn missing_required_values() {
        let err = config(&[("REDIS_ENDPOINT", "localhost")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("TELEGRAM_TOKEN"));

        let err = config(&[("TELEGRAM_TOKEN", "t"), ("REDIS_ENDPOINT", "  ")]).unwrap_err();
        assert_eq!(err, ConfigError::Missing("REDIS_ENDPOINT"));
        assert_eq!(err.to_string(), "REDIS_ENDPOINT is not set");
    }

    #[test]
    fn overrides_are_read() {
        let mut vars = REQUIRED.to_vec();
        vars.extend([
            ("REDIS_PORT", "6380"),
            ("REDIS_PASSWORD", "secret"),
            ("QUIZ_FILE", "/data/questions.zip"),
            ("QUIZ_ENCODING", "utf-8"),
            ("QUIZ_MEMBERS", "all"),
            ("QUIZ_QUESTION_MARKER", "Question"),
            ("QUIZ_ANSWER_MARKER", "Answer"),
            ("QUIZ_RETRY_ATTEMPTS", "5"),
            ("QUIZ_SESSION_IDLE_SECS", "600"),
        ]);
        let config = config(&vars).unwrap();
        assert!(matches!(&config.redis.addr, ConnectionAddr::Tcp(_, 6380)));
        assert_eq!(config.redis.redis.password.as_deref(), Some("secret"));
        assert_eq!(config.quiz_file, PathBuf::from("/data/questions.zip"));
        assert_eq!(config.encoding, encoding_rs::UTF_8);
        assert_eq!(config.selection, MemberSelection::All);
        assert_eq!(config.markers.question, "Question");
        assert_eq!(config.markers.answer, "Answer");
        assert_eq!(config.retry.attempts, 5);
        assert_eq!(config.session_idle, Duration::from_secs(600));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (name, value) in [
            ("REDIS_PORT", "seventy"),
            ("QUIZ_ENCODING", "klingon"),
            ("QUIZ_MEMBERS", "some"),
            ("QUIZ_RETRY_ATTEMPTS", "0"),
            ("QUIZ_SESSION_IDLE_SECS", "0"),
        ] {
            let mut vars = REQUIRED.to_vec();
            vars.push((name, value));
            let err = config(&vars).unwrap_err();
            assert_eq!(
                err,
                ConfigError::Invalid {
                    name,
                    value: value.to_string()
                }
            );
        }
    }
}
