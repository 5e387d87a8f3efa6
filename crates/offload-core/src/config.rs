//! Engine, cache and instrumentation settings.
//!
//! A TOML file supplies optional overrides; anything it leaves out falls back
//! to the defaults below.
//!
//! ```toml
//! [engine]
//! workers = 4
//! poll_interval_ms = 500
//!
//! [cache]
//! default_ttl_secs = 600
//!
//! [instrument]
//! warn_threshold_ms = 2000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::domain::DEFAULT_PRIORITY;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    pub engine: Option<EngineFileConfig>,
    pub cache: Option<CacheFileConfig>,
    pub instrument: Option<InstrumentFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct EngineFileConfig {
    pub workers: Option<usize>,
    pub poll_interval_ms: Option<u64>,
    pub join_timeout_ms: Option<u64>,
    pub default_priority: Option<i32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CacheFileConfig {
    pub default_ttl_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct InstrumentFileConfig {
    pub notice_threshold_ms: Option<u64>,
    pub warn_threshold_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    /// Fixed number of workers started by `Engine::start`.
    pub workers: usize,
    /// How long an idle worker waits on the queue before looking at the
    /// shutdown flag.
    pub poll_interval: Duration,
    /// How long `shutdown` waits for each worker.
    pub join_timeout: Duration,
    pub default_priority: i32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            poll_interval: Duration::from_secs(1),
            join_timeout: Duration::from_secs(5),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl EngineSettings {
    /// Zero workers never drain the queue; a zero poll interval spins idle
    /// workers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("engine.workers must be at least 1".into()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "engine.poll_interval_ms must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub default_ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstrumentSettings {
    /// Calls slower than this are logged at info.
    pub notice_threshold: Duration,
    /// Calls slower than this are logged at warn.
    pub warn_threshold: Duration,
}

impl Default for InstrumentSettings {
    fn default() -> Self {
        Self {
            notice_threshold: Duration::from_millis(500),
            warn_threshold: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    pub engine: EngineSettings,
    pub cache: CacheSettings,
    pub instrument: InstrumentSettings,
}

impl Settings {
    /// Merge file overrides onto the defaults and validate the result.
    pub fn resolve(file_config: Option<FileConfig>) -> Result<Self, ConfigError> {
        let file = file_config.unwrap_or_default();
        let defaults = Settings::default();

        let engine_file = file.engine.unwrap_or_default();
        let engine = EngineSettings {
            workers: engine_file.workers.unwrap_or(defaults.engine.workers),
            poll_interval: engine_file
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine.poll_interval),
            join_timeout: engine_file
                .join_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.engine.join_timeout),
            default_priority: engine_file
                .default_priority
                .unwrap_or(defaults.engine.default_priority),
        };

        let cache_file = file.cache.unwrap_or_default();
        let cache = CacheSettings {
            default_ttl: cache_file
                .default_ttl_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache.default_ttl),
        };

        let instrument_file = file.instrument.unwrap_or_default();
        let instrument = InstrumentSettings {
            notice_threshold: instrument_file
                .notice_threshold_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.instrument.notice_threshold),
            warn_threshold: instrument_file
                .warn_threshold_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.instrument.warn_threshold),
        };

        let settings = Settings {
            engine,
            cache,
            instrument,
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.engine.validate()?;
        if self.cache.default_ttl.is_zero() {
            return Err(ConfigError::Invalid(
                "cache.default_ttl_secs must be greater than 0".into(),
            ));
        }
        if self.instrument.notice_threshold > self.instrument.warn_threshold {
            return Err(ConfigError::Invalid(
                "instrument.notice_threshold_ms must not exceed warn_threshold_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn defaults_without_file() {
        let settings = Settings::resolve(None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.engine.workers, 2);
        assert_eq!(settings.engine.join_timeout, Duration::from_secs(5));
        assert_eq!(settings.cache.default_ttl, Duration::from_secs(300));
    }

    #[test]
    fn file_overrides_only_what_it_sets() {
        let file = FileConfig::parse(
            r#"
            [engine]
            workers = 4
            poll_interval_ms = 250

            [instrument]
            warn_threshold_ms = 2000
            "#,
        )
        .unwrap();
        let settings = Settings::resolve(Some(file)).unwrap();

        assert_eq!(settings.engine.workers, 4);
        assert_eq!(settings.engine.poll_interval, Duration::from_millis(250));
        assert_eq!(settings.engine.join_timeout, Duration::from_secs(5));
        assert_eq!(settings.instrument.warn_threshold, Duration::from_secs(2));
        assert_eq!(
            settings.instrument.notice_threshold,
            Duration::from_millis(500)
        );
    }

    #[rstest]
    #[case::no_workers("[engine]\nworkers = 0", "workers")]
    #[case::zero_poll("[engine]\npoll_interval_ms = 0", "poll_interval_ms")]
    #[case::zero_ttl("[cache]\ndefault_ttl_secs = 0", "default_ttl_secs")]
    #[case::inverted_thresholds(
        "[instrument]\nnotice_threshold_ms = 3000\nwarn_threshold_ms = 1000",
        "notice_threshold_ms"
    )]
    fn invalid_values_are_rejected(#[case] toml: &str, #[case] field: &str) {
        let file = FileConfig::parse(toml).unwrap();
        let err = Settings::resolve(Some(file)).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains(field));
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        assert!(FileConfig::parse("[engine]\nworkers = \"many\"").is_err());
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = FileConfig::load(Path::new("/nonexistent/offload.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
