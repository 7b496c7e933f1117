//! An async connection pool with scoped, one-statement transactions.
//!
//! A [`Pool`] keeps at most `max_connections` connections to a database, opened through a
//! [`Connector`] and handed out first-come first-served. A [`Session`] over the pool runs every
//! statement inside its own transaction: acquire, begin, run, commit or roll back, release.
//!
//! ```rust,ignore
//! use sessionpool::{mock::MockDatabase, PoolOptions};
//!
//! let db = MockDatabase::new();
//! let pool = PoolOptions::new().max_connections(4).connect(db.connector()).await?;
//! let session = pool.session();
//!
//! session.execute("CREATE TABLE users (id BIGINT, name TEXT)", ()).await?;
//! session
//!     .execute_many("INSERT INTO users VALUES ($1, $2)", [(1, "alice"), (2, "bob")])
//!     .await?;
//!
//! let count: Option<i64> = session.fetch_val("SELECT COUNT(*) FROM users", ()).await?;
//! assert_eq!(count, Some(2));
//! ```
#![cfg_attr(docsrs, feature(doc_cfg))]

// Modules
pub use sessionpool_core::{
    arguments, connection, decode, error, from_row, pool, query_result, row, session,
    transaction, value,
};

// Types
pub use sessionpool_core::{
    Arguments, BoxDynError, CloseEvent, ColumnIndex, Columns, Connection, Connector,
    DatabaseError, Decode, Error, FromRow, IntoArguments, LogSettings, Outcome, Pool,
    PoolConnection, PoolOptions, QueryResult, Result, Row, Session, Transaction, Value,
};

#[cfg(feature = "config")]
#[cfg_attr(docsrs, doc(cfg(feature = "config")))]
pub use sessionpool_core::{config, LogConfig, PoolConfig};

#[cfg(feature = "mock")]
#[cfg_attr(docsrs, doc(cfg(feature = "mock")))]
pub use sessionpool_mock as mock;
