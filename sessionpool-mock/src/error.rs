use std::borrow::Cow;
use std::error::Error as StdError;

use sessionpool_core::DatabaseError;

/// An error raised by the mock store, carrying a PostgreSQL-style SQLSTATE code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct MockError {
    code: &'static str,
    message: String,
    fatal: bool,
}

impl MockError {
    pub(crate) fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            fatal: false,
        }
    }

    pub(crate) fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }

    pub(crate) fn syntax(message: impl Into<String>) -> Self {
        Self::new(code::SYNTAX_ERROR, message)
    }

    /// The SQLSTATE code of this error.
    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl DatabaseError for MockError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        Some(Cow::Borrowed(self.code))
    }

    fn is_fatal(&self) -> bool {
        self.fatal
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self
    }
}

/// SQLSTATE codes produced by the mock store.
pub mod code {
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";
    pub const CONNECTION_FAILURE: &str = "08006";
    pub const ACTIVE_SQL_TRANSACTION: &str = "25001";
    pub const SERIALIZATION_FAILURE: &str = "40001";
    pub const SYNTAX_ERROR: &str = "42601";
    pub const UNDEFINED_COLUMN: &str = "42703";
    pub const UNDEFINED_TABLE: &str = "42P01";
    pub const UNDEFINED_PARAMETER: &str = "42P02";
    pub const DUPLICATE_TABLE: &str = "42P07";
    pub const ADMIN_SHUTDOWN: &str = "57P01";
    pub const RAISE_EXCEPTION: &str = "P0001";
}
