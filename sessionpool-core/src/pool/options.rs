use std::fmt::{self, Debug, Formatter};
use std::time::Duration;

use log::LevelFilter;

use super::inner::{deadline_after, spawn_maintenance_tasks, SharedPool};
use super::Pool;
use crate::connection::{Connection, Connector};
use crate::error::Error;
use crate::logger::LogSettings;

/// Configuration options/builder for constructing a [`Pool`].
///
/// The options are independent of the connection type; it is inferred from the connector
/// passed to [`connect()`][Self::connect] or [`connect_lazy()`][Self::connect_lazy].
///
/// See the source of [`Self::new()`] for the current defaults.
#[derive(Clone)]
pub struct PoolOptions {
    pub(crate) test_before_acquire: bool,
    pub(crate) max_connections: u32,
    pub(crate) min_connections: u32,
    pub(crate) acquire_timeout: Duration,
    pub(crate) acquire_time_level: LevelFilter,
    pub(crate) acquire_slow_level: LevelFilter,
    pub(crate) acquire_slow_threshold: Duration,
    pub(crate) max_lifetime: Option<Duration>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) log_settings: LogSettings,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PoolOptions {
    /// Returns a default "sane" configuration, suitable for testing or light-duty applications.
    ///
    /// Production applications will likely want to at least modify
    /// [`max_connections`][Self::max_connections].
    ///
    /// See the source of this method for the current default values.
    pub fn new() -> Self {
        Self {
            test_before_acquire: true,
            // A production application will want to set a higher limit than this.
            max_connections: 10,
            min_connections: 0,
            // Logging all acquires is opt-in
            acquire_time_level: LevelFilter::Debug,
            // Default to warning, because an acquire timeout will be an error
            acquire_slow_level: LevelFilter::Warn,
            // Fast enough to catch problems (e.g. a full pool); slow enough
            // to not flag typical time to add a new connection to a pool.
            acquire_slow_threshold: Duration::from_secs(2),
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Some(Duration::from_secs(10 * 60)),
            max_lifetime: Some(Duration::from_secs(30 * 60)),
            log_settings: LogSettings::default(),
        }
    }

    /// Set the maximum number of connections that this pool should maintain.
    ///
    /// Be mindful of the connection limits for your database as well as other applications
    /// which may want to connect to the same database (or even multiple instances of the same
    /// application in high-availability deployments).
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Get the maximum number of connections that this pool should maintain
    pub fn get_max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Set the minimum number of connections to maintain at all times.
    ///
    /// [`connect()`][Self::connect] opens this many connections before returning, and the
    /// pool's maintenance task reopens connections whenever the total drops below it.
    ///
    /// This value is still bounded by [`max_connections`][Self::max_connections]: a pool whose
    /// minimum exceeds its maximum fails validation.
    pub fn min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    /// Get the minimum number of connections to maintain at all times.
    pub fn get_min_connections(&self) -> u32 {
        self.min_connections
    }

    /// Enable logging of time taken to acquire a connection from the connection pool via
    /// [`Pool::acquire()`].
    ///
    /// If slow acquire logging is also enabled, this level is used for acquires that are not
    /// considered slow.
    pub fn acquire_time_level(mut self, level: LevelFilter) -> Self {
        self.acquire_time_level = level;
        self
    }

    /// Log excessive time taken to acquire a connection at a different log level than time taken
    /// for other connection acquires via [`Pool::acquire()`].
    pub fn acquire_slow_level(mut self, level: LevelFilter) -> Self {
        self.acquire_slow_level = level;
        self
    }

    /// Set a threshold for reporting excessive time taken to acquire a connection from
    /// the connection pool via [`Pool::acquire()`]. When the threshold is exceeded, a warning is logged.
    ///
    /// Defaults to a value that should not typically be exceeded by the pool enlarging
    /// itself with an additional new connection.
    pub fn acquire_slow_threshold(mut self, threshold: Duration) -> Self {
        self.acquire_slow_threshold = threshold;
        self
    }

    /// Get the threshold for reporting excessive time taken to acquire a connection via
    /// [`Pool::acquire()`].
    pub fn get_acquire_slow_threshold(&self) -> Duration {
        self.acquire_slow_threshold
    }

    /// Set the maximum amount of time to spend waiting for a connection in [`Pool::acquire()`].
    ///
    /// Caps the total amount of time `Pool::acquire()` can spend waiting across multiple phases:
    ///
    /// * First, it may need to wait for a permit from the semaphore, which grants it the privilege
    ///   of opening a connection or popping one from the idle queue.
    /// * If an existing idle connection is acquired, by default it will be checked for liveness
    ///   and integrity before being returned, which may require executing a command on the
    ///   connection. This can be disabled with [`test_before_acquire(false)`][Self::test_before_acquire].
    /// * If a new connection needs to be opened, that will also take some time.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Get the maximum amount of time to spend waiting for a connection in [`Pool::acquire()`].
    pub fn get_acquire_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Set the maximum lifetime of individual connections.
    ///
    /// Any connection with a lifetime greater than this will be closed.
    ///
    /// When set to `None`, all connections live until either reaped by [`idle_timeout`]
    /// or explicitly disconnected.
    ///
    /// [`idle_timeout`]: Self::idle_timeout
    pub fn max_lifetime(mut self, lifetime: impl Into<Option<Duration>>) -> Self {
        self.max_lifetime = lifetime.into();
        self
    }

    /// Get the maximum lifetime of individual connections.
    pub fn get_max_lifetime(&self) -> Option<Duration> {
        self.max_lifetime
    }

    /// Set a maximum idle duration for individual connections.
    ///
    /// Any connection that remains in the idle queue longer than this will be closed.
    ///
    /// For usage-based database server billing, this can be a cost saver.
    pub fn idle_timeout(mut self, timeout: impl Into<Option<Duration>>) -> Self {
        self.idle_timeout = timeout.into();
        self
    }

    /// Get the maximum idle duration for individual connections.
    pub fn get_idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    /// If true, the health of a connection will be verified by a call to [`Connection::ping`]
    /// before returning the connection.
    ///
    /// Defaults to `true`.
    pub fn test_before_acquire(mut self, test: bool) -> Self {
        self.test_before_acquire = test;
        self
    }

    /// Get whether `test_before_acquire` is currently set.
    pub fn get_test_before_acquire(&self) -> bool {
        self.test_before_acquire
    }

    /// Log executed statements with the specified `level`.
    pub fn log_statements(mut self, level: LevelFilter) -> Self {
        self.log_settings.log_statements(level);
        self
    }

    /// Log executed statements with a duration above the specified `duration`
    /// at the specified `level`.
    pub fn log_slow_statements(mut self, level: LevelFilter, duration: Duration) -> Self {
        self.log_settings.log_slow_statements(level, duration);
        self
    }

    /// Get the settings used to log statements run through the pool.
    pub fn get_log_settings(&self) -> &LogSettings {
        &self.log_settings
    }

    /// Apply every setting present in `config` on top of these options.
    ///
    /// Durations of zero in `idle-timeout` and `max-lifetime` disable the respective check.
    #[cfg(feature = "config")]
    pub fn from_config(config: &crate::config::PoolConfig) -> Self {
        let mut options = Self::new();

        if let Some(max) = config.max_connections {
            options.max_connections = max;
        }

        if let Some(min) = config.min_connections {
            options.min_connections = min;
        }

        if let Some(secs) = config.acquire_timeout {
            options.acquire_timeout = Duration::from_secs(secs);
        }

        if let Some(secs) = config.idle_timeout {
            options.idle_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(secs) = config.max_lifetime {
            options.max_lifetime = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(test) = config.test_before_acquire {
            options.test_before_acquire = test;
        }

        if let Some(level) = config.log.statements_level {
            options.log_settings.statements_level = level;
        }

        if let Some(level) = config.log.slow_statements_level {
            options.log_settings.slow_statements_level = level;
        }

        if let Some(secs) = config.log.slow_statements_duration {
            options.log_settings.slow_statements_duration = Duration::from_secs(secs);
        }

        options
    }

    /// Check the options for contradictions before any connection is opened.
    pub fn validate(&self) -> Result<(), Error> {
        if self.max_connections == 0 {
            return Err(Error::config("max_connections must be at least 1"));
        }

        if self.min_connections > self.max_connections {
            return Err(Error::config(format!(
                "min_connections ({}) must not exceed max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }

        Ok(())
    }

    /// Create a new pool from these options and immediately open `min_connections` connections.
    ///
    /// If opening any of them fails, the connections already opened are closed, the pool is
    /// discarded and the cause is returned wrapped in [`Error::PoolInit`].
    pub async fn connect<C, F>(self, connector: F) -> Result<Pool<C>, Error>
    where
        C: Connection,
        F: Connector<C>,
    {
        self.validate()?;

        let deadline = deadline_after(self.acquire_timeout);

        let inner = SharedPool::new_arc(self, Box::new(connector));

        if let Err(e) = inner.try_min_connections(deadline).await {
            inner.close().await;

            return Err(Error::PoolInit(Box::new(e)));
        }

        spawn_maintenance_tasks(&inner);

        Ok(Pool(inner))
    }

    /// Create a new pool from these options, but don't open any connections right now.
    ///
    /// If `min_connections` is set, a background task will be spawned to optimistically
    /// establish that many connections for the pool.
    pub fn connect_lazy<C, F>(self, connector: F) -> Result<Pool<C>, Error>
    where
        C: Connection,
        F: Connector<C>,
    {
        self.validate()?;

        let inner = SharedPool::new_arc(self, Box::new(connector));

        spawn_maintenance_tasks(&inner);

        Ok(Pool(inner))
    }
}

impl Debug for PoolOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("max_lifetime", &self.max_lifetime)
            .field("idle_timeout", &self.idle_timeout)
            .field("test_before_acquire", &self.test_before_acquire)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::PoolOptions;
    use crate::error::Error;

    #[test]
    fn it_rejects_a_pool_without_connections() {
        let err = PoolOptions::new().max_connections(0).validate().unwrap_err();

        assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    }

    #[test]
    fn it_rejects_min_above_max() {
        let err = PoolOptions::new()
            .max_connections(2)
            .min_connections(3)
            .validate()
            .unwrap_err();

        assert!(err.to_string().contains("min_connections (3)"), "{err}");
    }

    #[test]
    fn min_equal_to_max_is_fine() {
        PoolOptions::new()
            .max_connections(4)
            .min_connections(4)
            .validate()
            .unwrap();
    }
}
