//! Scoped, transactional execution of single statements over a [`Pool`].

use std::fmt::{self, Debug, Formatter};
use std::iter;
use std::time::Duration;

use crate::arguments::IntoArguments;
use crate::connection::Connection;
use crate::decode::Decode;
use crate::error::Error;
use crate::from_row::FromRow;
use crate::pool::Pool;
use crate::query_result::{Outcome, QueryResult};
use crate::row::Row;
use crate::transaction::Transaction;

/// Runs statements against a [`Pool`], each inside its own transaction.
///
/// Every method follows the same steps: acquire a connection (waiting at most
/// [`timeout()`][Self::timeout]), begin a transaction, run the statement, commit on success or
/// roll back on failure, and hand the connection back to the pool. The connection is returned
/// on every exit path, including when the returned future is dropped before it completes; in
/// that case the open transaction is rolled back before the connection is reused.
///
/// Reads are wrapped in a transaction as well, so a `fetch` never observes a half-applied
/// `execute_many` from another session.
///
/// ```rust,ignore
/// let session = Session::new(pool);
///
/// session.execute("INSERT INTO users VALUES ($1, $2)", (1, "alice")).await?;
///
/// let name: Option<String> = session
///     .fetch_val("SELECT name FROM users WHERE id = $1", (1,))
///     .await?;
/// ```
pub struct Session<C: Connection> {
    pool: Pool<C>,
    timeout: Duration,
}

impl<C: Connection> Session<C> {
    /// Wrap `pool`, using its [`acquire_timeout`][crate::pool::PoolOptions::acquire_timeout].
    pub fn new(pool: Pool<C>) -> Self {
        let timeout = pool.options().get_acquire_timeout();

        Self { pool, timeout }
    }

    /// Override how long each call waits for a connection.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn pool(&self) -> &Pool<C> {
        &self.pool
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Execute the statement and return all rows it produced, in order.
    ///
    /// A statement that produces no rows returns an empty `Vec`.
    pub async fn fetch(&self, sql: &str, arguments: impl IntoArguments) -> Result<Vec<Row>, Error> {
        self.transact(sql, iter::once(arguments), |outcome| Ok(outcome.rows))
            .await
    }

    /// Execute the statement and map every row into `T`.
    pub async fn fetch_as<T>(&self, sql: &str, arguments: impl IntoArguments) -> Result<Vec<T>, Error>
    where
        T: FromRow,
    {
        self.transact(sql, iter::once(arguments), |outcome| {
            outcome.rows.iter().map(T::from_row).collect()
        })
        .await
    }

    /// Execute the statement and return its first row, if any.
    pub async fn fetch_row(
        &self,
        sql: &str,
        arguments: impl IntoArguments,
    ) -> Result<Option<Row>, Error> {
        self.transact(sql, iter::once(arguments), |outcome| {
            Ok(outcome.rows.into_iter().next())
        })
        .await
    }

    /// Execute the statement and map its first row, if any, into `T`.
    pub async fn fetch_row_as<T>(
        &self,
        sql: &str,
        arguments: impl IntoArguments,
    ) -> Result<Option<T>, Error>
    where
        T: FromRow,
    {
        self.transact(sql, iter::once(arguments), |outcome| {
            outcome.rows.first().map(T::from_row).transpose()
        })
        .await
    }

    /// Execute the statement and decode the first column of its first row.
    ///
    /// Returns `None` when the statement produced no rows. A SQL `NULL` in that column is only
    /// accepted when `T` is an `Option`, so `fetch_val::<Option<i64>>` tells "no row" apart from
    /// "a row holding `NULL`".
    ///
    /// # Errors
    ///
    /// [`Error::ColumnIndexOutOfBounds`] if the first row has no columns, and
    /// [`Error::ColumnDecode`] if the value does not decode into `T`.
    pub async fn fetch_val<T>(
        &self,
        sql: &str,
        arguments: impl IntoArguments,
    ) -> Result<Option<T>, Error>
    where
        T: Decode,
    {
        self.transact(sql, iter::once(arguments), |outcome| {
            match outcome.rows.into_iter().next() {
                Some(row) => row.take(0usize).map(Some),
                None => Ok(None),
            }
        })
        .await
    }

    /// Execute the statement and return the driver's status for it.
    pub async fn execute(
        &self,
        sql: &str,
        arguments: impl IntoArguments,
    ) -> Result<QueryResult, Error> {
        self.transact(sql, iter::once(arguments), |outcome| Ok(outcome.result))
            .await
    }

    /// Execute the statement once per argument set, in order, inside a single transaction.
    ///
    /// Either every execution is committed or, if any of them fails, none is: the transaction
    /// is rolled back and the error of the failing execution is returned. The returned
    /// [`QueryResult`] sums `rows_affected` over all executions.
    pub async fn execute_many<I, A>(&self, sql: &str, argument_sets: I) -> Result<QueryResult, Error>
    where
        I: IntoIterator<Item = A>,
        A: IntoArguments,
    {
        self.transact(sql, argument_sets, |outcome| Ok(outcome.result))
            .await
    }

    /// Close the underlying pool.
    ///
    /// Other handles to the same pool observe the close as well.
    pub async fn close(&self) {
        self.pool.close().await
    }

    async fn transact<I, A, T, F>(&self, sql: &str, argument_sets: I, finish: F) -> Result<T, Error>
    where
        I: IntoIterator<Item = A>,
        A: IntoArguments,
        F: FnOnce(Outcome) -> Result<T, Error>,
    {
        let mut conn = self.pool.acquire_timeout(self.timeout).await?;

        let result = match conn.begin().await {
            // Decoding happens before the commit so a row that fails to map also rolls back.
            Ok(mut tx) => match run_all(&mut tx, sql, argument_sets).await.and_then(finish) {
                Ok(value) => tx.commit().await.map(|()| value),
                Err(error) => Err(error),
            },

            Err(error) => Err(error),
        };

        // Any failure above leaves the lease flagged as in a transaction. Roll it back
        // here so the connection is idle again before the caller sees the error.
        if result.is_err() {
            if let Err(rollback_error) = conn.resolve_abandoned_transaction().await {
                tracing::warn!(
                    target: "sessionpool::session",
                    %rollback_error,
                    connection_id = conn.id(),
                    "error rolling back failed transaction; discarding connection"
                );

                conn.invalidate();
            }
        }

        drop(conn);

        result
    }
}

async fn run_all<C, I, A>(
    tx: &mut Transaction<'_, C>,
    sql: &str,
    argument_sets: I,
) -> Result<Outcome, Error>
where
    C: Connection,
    I: IntoIterator<Item = A>,
    A: IntoArguments,
{
    let mut outcome = Outcome::default();

    for arguments in argument_sets {
        outcome.extend(Some(tx.run(sql, arguments).await?));
    }

    Ok(outcome)
}

impl<C: Connection> Clone for Session<C> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            timeout: self.timeout,
        }
    }
}

impl<C: Connection> Debug for Session<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("pool", &self.pool)
            .field("timeout", &self.timeout)
            .finish()
    }
}
