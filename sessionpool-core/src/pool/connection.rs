use std::fmt::{self, Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_intrusive::sync::SemaphoreReleaser;

use super::inner::{DecrementSizeGuard, SharedPool};
use crate::arguments::Arguments;
use crate::connection::Connection;
use crate::error::Error;
use crate::logger::QueryLogger;
use crate::query_result::Outcome;
use crate::rt;

const CLOSE_ON_DROP_TIMEOUT: Duration = Duration::from_secs(5);

const DEREF_ERR: &str = "(bug) connection already released to pool";

/// A connection checked out from [`Pool`][crate::pool::Pool].
///
/// This is the lease on a pooled connection: while it exists no other caller can obtain the
/// same connection. It is returned to the pool on drop, on every exit path. If it is dropped
/// with a transaction still open, the transaction is rolled back before the connection becomes
/// idle again.
pub struct PoolConnection<C: Connection> {
    live: Option<Live<C>>,
    pub(crate) pool: Arc<SharedPool<C>>,
    in_transaction: bool,
    invalidated: bool,
}

pub(super) struct Live<C> {
    pub(super) raw: C,
    pub(super) id: u64,
    pub(super) created_at: Instant,
}

pub(super) struct Idle<C> {
    pub(super) live: Live<C>,
    pub(super) idle_since: Instant,
}

/// RAII wrapper for connections being handled by functions that may drop them
pub(super) struct Floating<C: Connection, T> {
    pub(super) inner: T,
    pub(super) guard: DecrementSizeGuard<C>,
}

impl<C: Connection> Debug for PoolConnection<C> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConnection")
            .field("id", &self.live.as_ref().map(|live| live.id))
            .field("in_transaction", &self.in_transaction)
            .field("invalidated", &self.invalidated)
            .finish()
    }
}

impl<C: Connection> Deref for PoolConnection<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        &self.live.as_ref().expect(DEREF_ERR).raw
    }
}

impl<C: Connection> DerefMut for PoolConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.live.as_mut().expect(DEREF_ERR).raw
    }
}

impl<C: Connection> PoolConnection<C> {
    /// The pool-assigned id of the underlying connection, as it appears in log events.
    pub fn id(&self) -> u64 {
        self.live.as_ref().expect(DEREF_ERR).id
    }

    /// Returns `true` if a transaction was begun on this connection and not yet finished.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Mark this connection as unusable. It will be closed instead of being returned to the
    /// pool, and the pool will open a replacement on demand.
    pub fn invalidate(&mut self) {
        self.invalidated = true;
    }

    /// Execute one statement on this connection and log it.
    ///
    /// If a [`Transaction`][crate::transaction::Transaction] was dropped on this connection
    /// without being finished, it is rolled back first.
    pub async fn run(&mut self, sql: &str, arguments: Arguments) -> Result<Outcome, Error> {
        self.resolve_abandoned_transaction().await?;

        self.run_logged(sql, arguments).await
    }

    pub(crate) async fn run_logged(
        &mut self,
        sql: &str,
        arguments: Arguments,
    ) -> Result<Outcome, Error> {
        let pool = Arc::clone(&self.pool);
        let mut logger = QueryLogger::new(sql, &pool.options.log_settings);

        match (**self).run(sql, arguments).await {
            Ok(outcome) => {
                logger.increase_rows_returned(outcome.rows.len() as u64);
                logger.increase_rows_affected(outcome.result.rows_affected());

                Ok(outcome)
            }

            Err(error) => {
                logger.mark_failed();

                if error.is_fatal() {
                    self.invalidated = true;
                }

                Err(error)
            }
        }
    }

    pub(crate) fn set_in_transaction(&mut self, in_transaction: bool) {
        self.in_transaction = in_transaction;
    }

    /// Roll back a transaction whose guard was dropped before `commit` or `rollback`.
    pub(crate) async fn resolve_abandoned_transaction(&mut self) -> Result<(), Error> {
        if self.in_transaction {
            (**self).rollback().await?;
            self.in_transaction = false;
        }

        Ok(())
    }

    /// Detach this connection from the pool, allowing it to open a replacement.
    ///
    /// Note that if your application uses a single shared pool, this
    /// effectively lets the application exceed the `max_connections` setting.
    ///
    /// If `min_connections` is nonzero, a task will be spawned to replace this connection.
    pub fn detach(mut self) -> C {
        let live = self.take_live();
        let pool = Arc::clone(&self.pool);

        // give back this connection's size slot and permit
        drop(DecrementSizeGuard::new_permit(Arc::clone(&pool)));

        let _ = rt::try_spawn(async move {
            pool.min_connections_maintenance().await;
        });

        live.raw
    }

    /// Close this connection, allowing the pool to open a replacement.
    ///
    /// Equivalent to calling [`.detach()`][Self::detach] then [`.close()`][Connection::close],
    /// but the connection permit is retained for the duration so the pool will not exceed
    /// `max_connections`.
    pub async fn close(mut self) -> Result<(), Error> {
        let Floating { inner, guard } = self.take_live().float(Arc::clone(&self.pool));

        let res = inner.raw.close().await;
        drop(guard);

        res
    }

    fn take_live(&mut self) -> Live<C> {
        self.live.take().expect(DEREF_ERR)
    }
}

/// Returns the connection to the [`Pool`][crate::pool::Pool] it was checked-out from.
impl<C: Connection> Drop for PoolConnection<C> {
    fn drop(&mut self) {
        let Some(live) = self.live.take() else {
            return;
        };

        let floating = live.float(Arc::clone(&self.pool));

        if self.invalidated || !floating.inner.raw.is_valid() {
            tracing::debug!(
                target: "sessionpool::pool",
                connection_id = floating.inner.id,
                "discarding invalidated connection"
            );

            floating.discard();
            return;
        }

        if self.in_transaction {
            // `Drop` cannot await, so the rollback happens on the runtime. If there is none,
            // the future is dropped here, which closes the connection without returning it.
            let _ = rt::try_spawn(floating.rollback_and_release());
            return;
        }

        self.pool.release(floating);
    }
}

impl<C: Connection> Live<C> {
    pub(super) fn float(self, pool: Arc<SharedPool<C>>) -> Floating<C, Self> {
        Floating {
            inner: self,
            // create a new guard from a previously leaked permit
            guard: DecrementSizeGuard::new_permit(pool),
        }
    }

    pub(super) fn into_idle(self) -> Idle<C> {
        Idle {
            live: self,
            idle_since: Instant::now(),
        }
    }
}

impl<C> Deref for Idle<C> {
    type Target = Live<C>;

    fn deref(&self) -> &Self::Target {
        &self.live
    }
}

impl<C> DerefMut for Idle<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.live
    }
}

impl<C: Connection> Floating<C, Live<C>> {
    pub(super) fn new_live(conn: C, id: u64, guard: DecrementSizeGuard<C>) -> Self {
        Self {
            inner: Live {
                raw: conn,
                id,
                created_at: Instant::now(),
            },
            guard,
        }
    }

    pub(super) fn attach(self) -> PoolConnection<C> {
        let Floating { inner, guard } = self;

        let pool = Arc::clone(&guard.pool);

        guard.cancel();
        PoolConnection {
            live: Some(inner),
            pool,
            in_transaction: false,
            invalidated: false,
        }
    }

    pub(super) fn into_idle(self) -> Floating<C, Idle<C>> {
        Floating {
            inner: self.inner.into_idle(),
            guard: self.guard,
        }
    }

    async fn rollback_and_release(mut self) {
        match self.inner.raw.rollback().await {
            Ok(()) => {
                let pool = Arc::clone(&self.guard.pool);
                pool.release(self);
            }

            Err(error) => {
                tracing::warn!(
                    target: "sessionpool::pool",
                    %error,
                    connection_id = self.inner.id,
                    "error rolling back abandoned transaction; closing connection"
                );

                self.close_and_replace().await;
            }
        }
    }

    /// Close this connection in the background and let the pool replace it.
    pub(super) fn discard(self) {
        // without a runtime the connection is simply dropped along with the future
        let _ = rt::try_spawn(self.close_and_replace());
    }

    async fn close_and_replace(self) {
        let pool = Arc::clone(&self.guard.pool);

        drop(self.close().await);

        if !pool.is_closed() {
            pool.min_connections_maintenance().await;
        }
    }

    pub(super) async fn close(self) -> DecrementSizeGuard<C> {
        let Floating { inner, guard } = self;

        let id = inner.id;

        match rt::timeout(CLOSE_ON_DROP_TIMEOUT, inner.raw.close()).await {
            Ok(Ok(())) => {
                tracing::debug!(target: "sessionpool::pool", connection_id = id, "closed connection");
            }

            Ok(Err(error)) => {
                tracing::debug!(
                    target: "sessionpool::pool",
                    %error,
                    connection_id = id,
                    "error closing connection"
                );
            }

            Err(_) => {
                tracing::debug!(
                    target: "sessionpool::pool",
                    connection_id = id,
                    "timed out closing connection"
                );
            }
        }

        guard
    }
}

impl<C: Connection> Floating<C, Idle<C>> {
    pub(super) fn from_idle(
        idle: Idle<C>,
        pool: Arc<SharedPool<C>>,
        permit: SemaphoreReleaser<'_>,
    ) -> Self {
        Self {
            inner: idle,
            guard: DecrementSizeGuard::from_permit(pool, permit),
        }
    }

    pub(super) async fn ping(&mut self) -> Result<(), Error> {
        self.inner.live.raw.ping().await
    }

    pub(super) fn into_live(self) -> Floating<C, Live<C>> {
        Floating {
            inner: self.inner.live,
            guard: self.guard,
        }
    }

    pub(super) fn into_leakable(self) -> Idle<C> {
        self.guard.cancel();
        self.inner
    }

    pub(super) async fn close(self) -> DecrementSizeGuard<C> {
        self.into_live().close().await
    }

    /// Drop the connection without saying goodbye, for sessions we no longer trust.
    pub(super) fn close_hard(self) -> DecrementSizeGuard<C> {
        let Floating { inner, guard } = self;
        drop(inner);
        guard
    }
}

impl<C: Connection, T> Deref for Floating<C, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl<C: Connection, T> DerefMut for Floating<C, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.inner
    }
}
