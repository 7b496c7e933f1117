use std::time::{Duration, Instant};

use log::LevelFilter;

// Yes these look silly. `tracing` doesn't currently support dynamic levels
// https://github.com/tokio-rs/tracing/issues/372
#[doc(hidden)]
#[macro_export]
macro_rules! private_tracing_dynamic_enabled {
    (target: $target:expr, $level:expr) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::enabled!(target: $target, Level::ERROR),
            Level::WARN => ::tracing::enabled!(target: $target, Level::WARN),
            Level::INFO => ::tracing::enabled!(target: $target, Level::INFO),
            Level::DEBUG => ::tracing::enabled!(target: $target, Level::DEBUG),
            Level::TRACE => ::tracing::enabled!(target: $target, Level::TRACE),
        }
    }};
    ($level:expr) => {{
        $crate::private_tracing_dynamic_enabled!(target: module_path!(), $level)
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! private_tracing_dynamic_event {
    (target: $target:expr, $level:expr, $($args:tt)*) => {{
        use ::tracing::Level;

        match $level {
            Level::ERROR => ::tracing::event!(target: $target, Level::ERROR, $($args)*),
            Level::WARN => ::tracing::event!(target: $target, Level::WARN, $($args)*),
            Level::INFO => ::tracing::event!(target: $target, Level::INFO, $($args)*),
            Level::DEBUG => ::tracing::event!(target: $target, Level::DEBUG, $($args)*),
            Level::TRACE => ::tracing::event!(target: $target, Level::TRACE, $($args)*),
        }
    }};
}

#[doc(hidden)]
pub fn private_level_filter_to_levels(filter: LevelFilter) -> Option<(tracing::Level, log::Level)> {
    let tracing_level = match filter {
        LevelFilter::Error => Some(tracing::Level::ERROR),
        LevelFilter::Warn => Some(tracing::Level::WARN),
        LevelFilter::Info => Some(tracing::Level::INFO),
        LevelFilter::Debug => Some(tracing::Level::DEBUG),
        LevelFilter::Trace => Some(tracing::Level::TRACE),
        LevelFilter::Off => None,
    };

    tracing_level.zip(filter.to_level())
}

pub(crate) fn private_level_filter_to_trace_level(filter: LevelFilter) -> Option<tracing::Level> {
    private_level_filter_to_levels(filter).map(|(level, _)| level)
}

/// Log settings for statements run through a pool.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct LogSettings {
    pub statements_level: LevelFilter,
    pub slow_statements_level: LevelFilter,
    pub slow_statements_duration: Duration,
}

impl Default for LogSettings {
    fn default() -> Self {
        LogSettings {
            statements_level: LevelFilter::Debug,
            slow_statements_level: LevelFilter::Warn,
            slow_statements_duration: Duration::from_secs(1),
        }
    }
}

impl LogSettings {
    pub fn log_statements(&mut self, level: LevelFilter) {
        self.statements_level = level;
    }

    pub fn log_slow_statements(&mut self, level: LevelFilter, duration: Duration) {
        self.slow_statements_level = level;
        self.slow_statements_duration = duration;
    }
}

/// Logs one statement when dropped.
pub(crate) struct QueryLogger<'q> {
    sql: &'q str,
    rows_returned: u64,
    rows_affected: u64,
    failed: bool,
    start: Instant,
    settings: &'q LogSettings,
}

impl<'q> QueryLogger<'q> {
    pub(crate) fn new(sql: &'q str, settings: &'q LogSettings) -> Self {
        Self {
            sql,
            rows_returned: 0,
            rows_affected: 0,
            failed: false,
            start: Instant::now(),
            settings,
        }
    }

    pub(crate) fn increase_rows_returned(&mut self, n: u64) {
        self.rows_returned += n;
    }

    pub(crate) fn increase_rows_affected(&mut self, n: u64) {
        self.rows_affected += n;
    }

    pub(crate) fn mark_failed(&mut self) {
        self.failed = true;
    }

    fn finish(&self) {
        let elapsed = self.start.elapsed();

        let was_slow = elapsed >= self.settings.slow_statements_duration;

        let lvl = if was_slow {
            self.settings.slow_statements_level
        } else {
            self.settings.statements_level
        };

        let Some((tracing_level, log_level)) = private_level_filter_to_levels(lvl) else {
            return;
        };

        // The enabled level could be set from either tracing world or log world, so check both
        // to see if logging should be enabled for our level
        let log_is_enabled = log::log_enabled!(target: "sessionpool::query", log_level)
            || private_tracing_dynamic_enabled!(target: "sessionpool::query", tracing_level);

        if !log_is_enabled {
            return;
        }

        let summary = parse_query_summary(self.sql);

        let sql = if summary != self.sql {
            format!("\n\n{}\n", self.sql)
        } else {
            String::new()
        };

        if was_slow {
            private_tracing_dynamic_event!(
                target: "sessionpool::query",
                tracing_level,
                summary,
                db.statement = sql,
                rows_affected = self.rows_affected,
                rows_returned = self.rows_returned,
                failed = self.failed,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
                slow_threshold = ?self.settings.slow_statements_duration,
                "slow statement: execution time exceeded alert threshold"
            );
        } else {
            private_tracing_dynamic_event!(
                target: "sessionpool::query",
                tracing_level,
                summary,
                db.statement = sql,
                rows_affected = self.rows_affected,
                rows_returned = self.rows_returned,
                failed = self.failed,
                ?elapsed,
                elapsed_secs = elapsed.as_secs_f64(),
            );
        }
    }
}

impl Drop for QueryLogger<'_> {
    fn drop(&mut self) {
        self.finish();
    }
}

pub(crate) fn parse_query_summary(sql: &str) -> String {
    let mut summary = sql.split_whitespace().take(4).collect::<Vec<&str>>().join(" ");

    if sql.split_whitespace().nth(4).is_some() {
        summary.push_str(" …");
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::parse_query_summary;

    #[test]
    fn it_summarizes_long_statements() {
        assert_eq!(parse_query_summary("SELECT 1"), "SELECT 1");
        assert_eq!(
            parse_query_summary("INSERT INTO users\n  VALUES ($1, $2)"),
            "INSERT INTO users VALUES …"
        );
    }
}
