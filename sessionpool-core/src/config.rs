//! Pool configuration read from a TOML document.
//!
//! Every key is optional; anything left out keeps the default of [`PoolOptions::new()`].
//!
//! ```toml
//! max-connections = 20
//! min-connections = 2
//! # seconds
//! acquire-timeout = 5
//! # seconds; 0 disables the check
//! idle-timeout = 300
//! max-lifetime = 0
//! test-before-acquire = false
//!
//! [log]
//! statements-level = "info"
//! slow-statements-level = "warn"
//! slow-statements-duration = 2
//! ```
//!
//! [`PoolOptions::new()`]: crate::pool::PoolOptions::new

use std::fs;
use std::path::Path;

use log::LevelFilter;

use crate::error::Error;
use crate::pool::PoolOptions;

/// Settings for a [`Pool`][crate::pool::Pool], as read from TOML.
///
/// Apply them with [`PoolOptions::from_config`] or [`PoolConfig::into_options`].
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct PoolConfig {
    /// Maximum number of connections the pool keeps open at once.
    pub max_connections: Option<u32>,

    /// Number of connections opened up front and kept open.
    pub min_connections: Option<u32>,

    /// Seconds to wait for a connection before giving up.
    pub acquire_timeout: Option<u64>,

    /// Seconds a connection may sit idle before it is closed. `0` disables the check.
    pub idle_timeout: Option<u64>,

    /// Seconds a connection may live in total before it is closed. `0` disables the check.
    pub max_lifetime: Option<u64>,

    /// Ping idle connections before handing them out.
    pub test_before_acquire: Option<bool>,

    /// Statement logging.
    pub log: LogConfig,
}

/// The `[log]` table of a [`PoolConfig`].
#[derive(Debug, Default, Clone, PartialEq, Eq, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct LogConfig {
    /// Level statements are logged at, e.g. `"debug"`; `"off"` disables.
    pub statements_level: Option<LevelFilter>,

    /// Level statements slower than `slow-statements-duration` are logged at.
    pub slow_statements_level: Option<LevelFilter>,

    /// Seconds after which a statement counts as slow.
    pub slow_statements_duration: Option<u64>,
}

impl PoolConfig {
    /// Parse a configuration from TOML text.
    ///
    /// Syntax errors, unknown keys and values of the wrong type are all reported as
    /// [`Error::Configuration`].
    pub fn from_toml_str(toml: &str) -> Result<Self, Error> {
        toml::from_str(toml).map_err(Error::config)
    }

    /// Read and parse the TOML file at `path`.
    pub fn read_from(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();

        let contents = fs::read_to_string(path)?;

        Self::from_toml_str(&contents).map_err(|e| match e {
            Error::Configuration(source) => {
                Error::config(format!("{}: {source}", path.display()))
            }
            other => other,
        })
    }

    /// Build [`PoolOptions`] from this configuration and check them.
    pub fn into_options(self) -> Result<PoolOptions, Error> {
        let options = PoolOptions::from_config(&self);

        options.validate()?;

        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn empty_document_keeps_defaults() {
        let config = PoolConfig::from_toml_str("").unwrap();
        assert_eq!(config, PoolConfig::default());

        let options = config.into_options().unwrap();
        assert_eq!(options.get_max_connections(), 10);
        assert_eq!(options.get_min_connections(), 0);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(30));
        assert_eq!(options.get_idle_timeout(), Some(Duration::from_secs(600)));
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(1800)));
        assert!(options.get_test_before_acquire());
    }

    #[test]
    fn it_reads_every_key() {
        let config = PoolConfig::from_toml_str(
            r#"
            max-connections = 20
            min-connections = 2
            acquire-timeout = 5
            idle-timeout = 0
            max-lifetime = 60
            test-before-acquire = false

            [log]
            statements-level = "info"
            slow-statements-level = "error"
            slow-statements-duration = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.log.statements_level, Some(LevelFilter::Info));

        let options = config.into_options().unwrap();
        assert_eq!(options.get_max_connections(), 20);
        assert_eq!(options.get_min_connections(), 2);
        assert_eq!(options.get_acquire_timeout(), Duration::from_secs(5));
        assert_eq!(options.get_idle_timeout(), None);
        assert_eq!(options.get_max_lifetime(), Some(Duration::from_secs(60)));
        assert!(!options.get_test_before_acquire());

        let log = options.get_log_settings();
        assert_eq!(log.statements_level, LevelFilter::Info);
        assert_eq!(log.slow_statements_level, LevelFilter::Error);
        assert_eq!(log.slow_statements_duration, Duration::from_secs(3));
    }

    #[test]
    fn it_rejects_unknown_keys() {
        let err = PoolConfig::from_toml_str("max-conections = 5").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    }

    #[test]
    fn it_rejects_contradictory_bounds() {
        let config = PoolConfig::from_toml_str("max-connections = 2\nmin-connections = 3").unwrap();

        let err = config.into_options().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    }
}
