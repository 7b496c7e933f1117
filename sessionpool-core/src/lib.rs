//! Core of sessionpool, the async connection pool with one-statement transactions.
//!
//! Not intended to be used directly; depend on `sessionpool` instead.
#![recursion_limit = "256"]
#![warn(future_incompatible, rust_2018_idioms)]

// Logging macros must be declared before the modules that use them.
#[macro_use]
pub mod logger;

pub mod error;

pub mod arguments;
pub mod connection;
pub mod decode;
pub mod from_row;
pub mod pool;
pub mod query_result;
pub mod row;
pub mod rt;
pub mod session;
pub mod transaction;
pub mod value;

#[cfg(feature = "config")]
pub mod config;

#[doc(inline)]
pub use self::{
    arguments::{Arguments, IntoArguments},
    connection::{Connection, Connector},
    decode::Decode,
    error::{BoxDynError, DatabaseError, Error, Result},
    from_row::FromRow,
    logger::LogSettings,
    pool::{CloseEvent, Pool, PoolConnection, PoolOptions},
    query_result::{Outcome, QueryResult},
    row::{ColumnIndex, Columns, Row},
    session::Session,
    transaction::Transaction,
    value::Value,
};

#[cfg(feature = "config")]
#[doc(inline)]
pub use self::config::{LogConfig, PoolConfig};
