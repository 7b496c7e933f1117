//! Types for working with errors produced by sessionpool.

use std::any::type_name;
use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::Display;
use std::io;

use crate::value::Value;

/// A specialized `Result` type for sessionpool.
pub type Result<T, E = Error> = ::std::result::Result<T, E>;

// Convenience type alias for usage within sessionpool.
pub type BoxDynError = Box<dyn StdError + 'static + Send + Sync>;

/// An unexpected `NULL` was encountered during decoding.
///
/// Returned from [`Row::try_get`] if the value from the database is `NULL`,
/// and you are not decoding into an `Option`.
///
/// [`Row::try_get`]: crate::row::Row::try_get
#[derive(thiserror::Error, Debug)]
#[error("unexpected null; try decoding as an `Option`")]
pub struct UnexpectedNullError;

/// Represents all the ways a method can fail within sessionpool.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool was configured with options that cannot be satisfied.
    #[error("error with configuration: {0}")]
    Configuration(#[source] BoxDynError),

    /// Opening the initial `min_connections` of a pool failed.
    ///
    /// The pool is torn down before this is returned; no connection it opened stays alive.
    #[error("error opening the connection pool: {0}")]
    PoolInit(#[source] Box<Error>),

    /// Error returned from the database.
    #[error("error returned from database: {0}")]
    Database(Box<dyn DatabaseError>),

    /// Error communicating with the database backend.
    #[error("error communicating with database: {0}")]
    Io(#[from] io::Error),

    /// Unexpected or invalid data encountered while communicating with the database.
    ///
    /// This should indicate there is a programming error in a driver or there
    /// is something corrupted with the connection to the database itself.
    #[error("encountered unexpected or invalid data: {0}")]
    Protocol(String),

    /// Column index was out of bounds.
    #[error("column index out of bounds: the len is {len}, but the index is {index}")]
    ColumnIndexOutOfBounds { index: usize, len: usize },

    /// No column found for the given name.
    #[error("no column found for name: {0}")]
    ColumnNotFound(String),

    /// Error occurred while decoding a value from a specific column.
    #[error("error occurred while decoding column {index}: {source}")]
    ColumnDecode {
        index: String,

        #[source]
        source: BoxDynError,
    },

    /// Error occurred while decoding a value.
    #[error("error occurred while decoding: {0}")]
    Decode(#[source] BoxDynError),

    /// A [`Pool::acquire`] timed out due to connections not becoming available or
    /// because another task encountered too many errors while trying to open a new connection.
    ///
    /// [`Pool::acquire`]: crate::pool::Pool::acquire
    #[error("pool timed out while waiting for an open connection")]
    PoolTimedOut,

    /// [`Pool::close`] was called while we were waiting in [`Pool::acquire`].
    ///
    /// [`Pool::acquire`]: crate::pool::Pool::acquire
    /// [`Pool::close`]: crate::pool::Pool::close
    #[error("attempted to acquire a connection on a closed pool")]
    PoolClosed,
}

impl Error {
    /// Returns the database error, if this is one.
    pub fn as_database_error(&self) -> Option<&(dyn DatabaseError + 'static)> {
        match self {
            Error::Database(e) => Some(&**e),
            _ => None,
        }
    }

    /// Returns `true` if this error means the connection it came from can no longer be trusted.
    ///
    /// I/O and protocol errors always are; database errors are when the driver says so.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::Io(_) | Error::Protocol(_) => true,
            Error::Database(e) => e.is_fatal(),
            _ => false,
        }
    }

    #[inline]
    pub fn config(err: impl Into<BoxDynError>) -> Self {
        Error::Configuration(err.into())
    }

    #[inline]
    pub fn protocol(err: impl Display) -> Self {
        Error::Protocol(err.to_string())
    }
}

pub(crate) fn mismatched_types<T>(actual: &Value) -> BoxDynError {
    format!(
        "mismatched types; Rust type `{}` is not compatible with SQL type `{}`",
        type_name::<T>(),
        actual.type_name()
    )
    .into()
}

/// An error that was returned from the database.
pub trait DatabaseError: 'static + Send + Sync + StdError {
    /// The primary, human-readable error message.
    fn message(&self) -> &str;

    /// The (SQLSTATE) code for the error.
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// Returns `true` if the session that produced this error is no longer usable.
    ///
    /// A connection that reported a fatal error is discarded instead of being returned
    /// to the pool.
    fn is_fatal(&self) -> bool {
        false
    }

    #[doc(hidden)]
    fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static);
}

impl dyn DatabaseError {
    /// Downcast a reference to this generic database error to a specific
    /// database error type.
    #[inline]
    pub fn try_downcast_ref<E: DatabaseError>(&self) -> Option<&E> {
        self.as_error().downcast_ref()
    }
}

impl<E> From<E> for Error
where
    E: DatabaseError,
{
    #[inline]
    fn from(error: E) -> Self {
        Error::Database(Box::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("deadlock detected")]
    struct Deadlock;

    impl DatabaseError for Deadlock {
        fn message(&self) -> &str {
            "deadlock detected"
        }

        fn code(&self) -> Option<Cow<'_, str>> {
            Some(Cow::Borrowed("40P01"))
        }

        fn as_error(&self) -> &(dyn StdError + Send + Sync + 'static) {
            self
        }
    }

    #[test]
    fn it_classifies_fatal_errors() {
        assert!(Error::from(io::Error::from(io::ErrorKind::BrokenPipe)).is_fatal());
        assert!(Error::protocol("unexpected message").is_fatal());
        assert!(!Error::from(Deadlock).is_fatal());
        assert!(!Error::PoolTimedOut.is_fatal());
    }

    #[test]
    fn it_downcasts_database_errors() {
        let err = Error::from(Deadlock);

        let db = err.as_database_error().unwrap();
        assert_eq!(db.code().as_deref(), Some("40P01"));
        assert!(db.try_downcast_ref::<Deadlock>().is_some());

        assert!(Error::PoolClosed.as_database_error().is_none());
    }

    #[test]
    fn it_displays_database_errors() {
        let err = Error::from(Deadlock);

        assert_eq!(
            err.to_string(),
            "error returned from database: deadlock detected"
        );
    }
}
