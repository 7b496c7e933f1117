use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, DerefMut};

use crate::arguments::IntoArguments;
use crate::connection::Connection;
use crate::error::Error;
use crate::pool::PoolConnection;
use crate::query_result::Outcome;

/// An in-progress database transaction on a pooled connection.
///
/// A transaction starts with a call to [`Pool::begin`] or [`PoolConnection::begin`].
///
/// A transaction should end with a call to [`commit`] or [`rollback`]. If neither is called
/// before the transaction goes out of scope, the connection stays flagged as being inside a
/// transaction and is rolled back before it is used again or returned to the pool. This also
/// covers a transaction whose statement future was cancelled halfway through.
///
/// [`Pool::begin`]: crate::pool::Pool::begin
/// [`commit`]: Self::commit
/// [`rollback`]: Self::rollback
pub struct Transaction<'c, C: Connection> {
    connection: Lease<'c, C>,
}

/// The lease a transaction runs on; owned when it came straight from [`Pool::begin`].
///
/// [`Pool::begin`]: crate::pool::Pool::begin
enum Lease<'c, C: Connection> {
    Borrowed(&'c mut PoolConnection<C>),
    Owned(PoolConnection<C>),
}

impl<'c, C: Connection> Transaction<'c, C> {
    async fn begin(mut connection: Lease<'c, C>) -> Result<Self, Error> {
        connection.resolve_abandoned_transaction().await?;

        // Flag first: if `begin` is cancelled or fails halfway, the release path still
        // issues a rollback, which drivers treat as a no-op outside a transaction.
        connection.set_in_transaction(true);

        (**connection).begin().await?;

        tracing::trace!(
            target: "sessionpool::session",
            connection_id = connection.id(),
            "began transaction"
        );

        Ok(Self { connection })
    }

    pub(crate) async fn begin_owned(connection: PoolConnection<C>) -> Result<Self, Error> {
        Self::begin(Lease::Owned(connection)).await
    }

    /// Run one statement inside this transaction.
    pub async fn run(
        &mut self,
        sql: &str,
        arguments: impl IntoArguments,
    ) -> Result<Outcome, Error> {
        self.connection
            .run_logged(sql, arguments.into_arguments())
            .await
    }

    /// Commits this transaction.
    pub async fn commit(mut self) -> Result<(), Error> {
        (**self.connection).commit().await?;
        self.connection.set_in_transaction(false);

        Ok(())
    }

    /// Aborts this transaction.
    pub async fn rollback(mut self) -> Result<(), Error> {
        (**self.connection).rollback().await?;
        self.connection.set_in_transaction(false);

        Ok(())
    }

    /// The pool-assigned id of the connection this transaction runs on.
    pub fn connection_id(&self) -> u64 {
        self.connection.id()
    }
}

impl<C: Connection> PoolConnection<C> {
    /// Begin a transaction on this connection.
    ///
    /// The transaction borrows the connection until it is committed, rolled back or dropped.
    pub async fn begin(&mut self) -> Result<Transaction<'_, C>, Error> {
        Transaction::begin(Lease::Borrowed(self)).await
    }
}

impl<'c, C: Connection> Debug for Transaction<'c, C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("connection", &*self.connection)
            .finish()
    }
}

impl<'c, C: Connection> Deref for Transaction<'c, C> {
    type Target = C;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<'c, C: Connection> DerefMut for Transaction<'c, C> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<'c, C: Connection> Deref for Lease<'c, C> {
    type Target = PoolConnection<C>;

    fn deref(&self) -> &Self::Target {
        match self {
            Lease::Borrowed(connection) => connection,
            Lease::Owned(connection) => connection,
        }
    }
}

impl<'c, C: Connection> DerefMut for Lease<'c, C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Lease::Borrowed(connection) => connection,
            Lease::Owned(connection) => connection,
        }
    }
}
