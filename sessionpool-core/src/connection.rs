use std::fmt::Debug;
use std::future::Future;

use futures_core::future::BoxFuture;

use crate::arguments::Arguments;
use crate::error::Error;
use crate::query_result::Outcome;

/// A single connection (also known as a session) with a specific database.
///
/// With a client/server model, this is equivalent to a network connection
/// to the server.
///
/// This is the boundary between the pool and a database driver: the pool and
/// [`Session`][crate::session::Session] only ever talk to the database through these methods.
/// Statements are run one at a time; a connection is never shared between two leases.
pub trait Connection: 'static + Send + Sized + Debug {
    /// Execute one statement with its positional arguments, returning all rows it produced
    /// along with the driver's status summary.
    fn run<'c>(
        &'c mut self,
        sql: &'c str,
        arguments: Arguments,
    ) -> BoxFuture<'c, Result<Outcome, Error>>;

    /// Begin a new transaction.
    fn begin(&mut self) -> BoxFuture<'_, Result<(), Error>>;

    /// Commit the active transaction.
    fn commit(&mut self) -> BoxFuture<'_, Result<(), Error>>;

    /// Abort the active transaction.
    ///
    /// Rolling back while no transaction is active should succeed without effect, the way
    /// `ROLLBACK` outside a transaction only warns in PostgreSQL.
    fn rollback(&mut self) -> BoxFuture<'_, Result<(), Error>>;

    /// Explicitly close this database connection.
    ///
    /// This method is **not required** for safe and consistent operation. However, it is
    /// recommended to call it instead of letting a connection `drop` as the database backend
    /// will be faster at cleaning up resources.
    fn close(self) -> BoxFuture<'static, Result<(), Error>>;

    /// Checks if a connection to the database is still valid.
    fn ping(&mut self) -> BoxFuture<'_, Result<(), Error>>;

    /// Returns `false` once the driver has seen an error after which this session cannot be
    /// reused. The pool discards invalid connections instead of idling them.
    fn is_valid(&self) -> bool;
}

/// Opens new connections on behalf of a [`Pool`][crate::pool::Pool].
///
/// Implemented for any `Fn() -> impl Future<Output = Result<C, Error>>`, so a closure
/// capturing the connection parameters is usually all a pool needs:
///
/// ```rust,ignore
/// let pool = PoolOptions::new()
///     .max_connections(5)
///     .connect(move || MyConnection::connect(url.clone()))
///     .await?;
/// ```
pub trait Connector<C>: Send + Sync + 'static
where
    C: Connection,
{
    fn connect(&self) -> BoxFuture<'_, Result<C, Error>>;
}

impl<C, F, Fut> Connector<C> for F
where
    C: Connection,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<C, Error>> + Send + 'static,
{
    fn connect(&self) -> BoxFuture<'_, Result<C, Error>> {
        Box::pin(self())
    }
}
