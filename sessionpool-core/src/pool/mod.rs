//! Provides the connection pool for asynchronous connections.
//!
//! Opening a database connection for each and every operation to the database can quickly
//! become expensive. Furthermore, sharing a database connection between threads and functions
//! can be difficult to express in Rust.
//!
//! A connection pool is a standard technique that can manage opening and re-using connections.
//! Normally it also enforces a maximum number of connections as these are an expensive resource
//! on the database server.
//!
//! [`Pool::acquire`] hands out a [`PoolConnection`], a lease on one connection that returns it
//! to the pool when dropped. Callers waiting for a connection are served in the order they
//! called `acquire`.
//!
//! Most code should go through a [`Session`][crate::session::Session] instead, which wraps
//! every statement in its own transaction.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use event_listener::EventListener;
use futures_util::FutureExt;

use self::inner::SharedPool;
use crate::connection::{Connection, Connector};
use crate::error::Error;
use crate::session::Session;
use crate::transaction::Transaction;

mod connection;
mod inner;
mod options;

pub use self::connection::PoolConnection;
pub use self::options::PoolOptions;

/// An asynchronous pool of database connections.
///
/// Create a pool with [`PoolOptions::connect`] or [`PoolOptions::connect_lazy`] and then call
/// [`Pool::acquire`] to get a connection from the pool; when the connection is dropped it will
/// return to the pool so it can be reused.
///
/// `Pool` is `Send`, `Sync` and `Clone`. It is intended to be created once at the start of your
/// application/daemon/web server/etc. and then shared with all tasks throughout the process'
/// lifetime. How best to accomplish this depends on your program architecture.
///
/// Cloning `Pool` is cheap as it is simply a reference-counted handle to the inner pool state.
/// When the last remaining handle to the pool is dropped, the connections owned by the pool are
/// immediately closed (also by dropping). `PoolConnection` returned by [`Pool::acquire`] and
/// `Transaction` returned by [`Pool::begin`] both implicitly hold a reference to the pool for
/// their lifetimes.
///
/// If you prefer to explicitly shutdown the pool and gracefully close its connections (which
/// depending on the database type, may include sending a message to the database server that the
/// connection is being closed), you can call [`Pool::close`] which causes all waiting and
/// subsequent calls to [`Pool::acquire`] to return [`Error::PoolClosed`], and waits until all
/// connections have been returned to the pool and gracefully closed.
pub struct Pool<C: Connection>(pub(crate) Arc<SharedPool<C>>);

/// A future that resolves when the pool is closed.
///
/// See [`Pool::close_event()`] for details.
pub struct CloseEvent {
    listener: Option<EventListener>,
}

impl<C: Connection> Pool<C> {
    /// Create a new connection pool with a default pool configuration and
    /// the given connector, and immediately establish one connection.
    pub async fn connect<F>(connector: F) -> Result<Self, Error>
    where
        F: Connector<C>,
    {
        PoolOptions::new().min_connections(1).connect(connector).await
    }

    /// Create a new connection pool with a default pool configuration and
    /// the given connector.
    ///
    /// The pool will establish connections only as needed.
    pub fn connect_lazy<F>(connector: F) -> Result<Self, Error>
    where
        F: Connector<C>,
    {
        PoolOptions::new().connect_lazy(connector)
    }

    /// Retrieves a connection from the pool.
    ///
    /// The total time this method is allowed to execute is capped by
    /// [`PoolOptions::acquire_timeout`].
    /// If that timeout elapses, this will return [`Error::PoolTimedOut`].
    ///
    /// ### Note: Cancellation/Timeout May Drop Connections
    /// If `acquire` is cancelled or times out after it acquires a connection from the idle queue or
    /// opens a new one, it will drop that connection because we don't want to assume it
    /// is safe to return to the pool, and a database server may not appreciate a connection
    /// being closed in the middle of a handshake.
    ///
    /// This is not an issue for waiters that never got a permit: they simply leave the queue.
    pub fn acquire(&self) -> impl Future<Output = Result<PoolConnection<C>, Error>> + 'static {
        let shared = self.0.clone();
        async move {
            let timeout = shared.options.acquire_timeout;

            shared.acquire(timeout).await.map(|conn| conn.attach())
        }
    }

    /// Retrieves a connection from the pool, waiting at most `timeout`.
    ///
    /// Fails with [`Error::PoolTimedOut`] if no connection became available in time and with
    /// [`Error::PoolClosed`] if the pool is closed, including while waiting.
    pub fn acquire_timeout(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<PoolConnection<C>, Error>> + 'static {
        let shared = self.0.clone();
        async move { shared.acquire(timeout).await.map(|conn| conn.attach()) }
    }

    /// Attempts to retrieve a connection from the pool if there is one available.
    ///
    /// Returns `None` immediately if there are no idle connections available in the pool
    /// or there are tasks waiting for a connection which have yet to wake.
    pub fn try_acquire(&self) -> Option<PoolConnection<C>> {
        self.0.try_acquire().map(|conn| conn.attach())
    }

    /// Retrieves a connection and immediately begins a new transaction.
    pub async fn begin(&self) -> Result<Transaction<'static, C>, Error> {
        Transaction::begin_owned(self.acquire().await?).await
    }

    /// Wrap this pool in a [`Session`] that runs every statement in its own transaction.
    pub fn session(&self) -> Session<C> {
        Session::new(self.clone())
    }

    /// Shut down the connection pool, immediately waking all tasks waiting for a connection.
    ///
    /// Upon calling this method, any currently waiting or subsequent calls to [`Pool::acquire`] and
    /// the like will immediately return [`Error::PoolClosed`] and no new connections will be opened.
    ///
    /// Checked-out connections are unaffected, but will be gracefully closed on-drop
    /// rather than being returned to the pool.
    ///
    /// Returns a `Future` which can be `.await`ed to ensure all connections are
    /// gracefully closed. It waits for all checked-out connections to be returned or closed,
    /// then closes the connections left in the idle queue.
    ///
    /// Calling this more than once is fine; every call waits for the same shutdown.
    pub fn close(&self) -> impl Future<Output = ()> + '_ {
        self.0.close()
    }

    /// Returns `true` if [`.close()`][Pool::close] has been called on the pool, `false` otherwise.
    pub fn is_closed(&self) -> bool {
        self.0.is_closed()
    }

    /// Get a future that resolves when [`Pool::close()`] is called.
    ///
    /// If the pool is already closed, the future resolves immediately.
    ///
    /// This can be used to cancel long-running operations that hold onto a [`PoolConnection`]
    /// so they don't prevent the pool from closing (which would otherwise wait until all
    /// connections are returned).
    pub fn close_event(&self) -> CloseEvent {
        self.0.close_event()
    }

    /// Returns the number of connections currently active. This includes idle connections.
    pub fn size(&self) -> u32 {
        self.0.size()
    }

    /// Returns the number of connections active and idle (not in use).
    pub fn num_idle(&self) -> usize {
        self.0.num_idle()
    }

    /// Gets the options this pool was created with.
    pub fn options(&self) -> &PoolOptions {
        &self.0.options
    }
}

/// Returns a new [Pool] tied to the same shared connection pool.
impl<C: Connection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<C: Connection> fmt::Debug for Pool<C> {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt.debug_struct("Pool")
            .field("size", &self.0.size())
            .field("num_idle", &self.0.num_idle())
            .field("is_closed", &self.0.is_closed())
            .field("options", &self.0.options)
            .finish()
    }
}

impl CloseEvent {
    /// Execute the given future until it returns or the pool is closed.
    ///
    /// Cancels the future and returns `Err(PoolClosed)` if/when the pool is closed.
    /// If the pool was already closed, the future is never run.
    pub async fn do_until<Fut: Future>(&mut self, fut: Fut) -> Result<Fut::Output, Error> {
        // Check that the pool wasn't closed already.
        //
        // We use `poll_immediate()` as it will use the correct waker instead of
        // a no-op one like `.now_or_never()`, but it won't actually suspend execution here.
        futures_util::future::poll_immediate(&mut *self)
            .await
            .map_or(Ok(()), |_| Err(Error::PoolClosed))?;

        futures_util::pin_mut!(fut);

        // I find that this is clearer in intent than `futures_util::future::select()`
        // or `futures_util::select_biased!{}` (which isn't enabled anyway).
        futures_util::future::poll_fn(|cx| {
            // Poll `fut` first as the wakeup event is more likely for it than `self`.
            if let Poll::Ready(ret) = fut.as_mut().poll(cx) {
                return Poll::Ready(Ok(ret));
            }

            self.poll_unpin(cx).map(|_| Err(Error::PoolClosed))
        })
        .await
    }
}

impl Future for CloseEvent {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if let Some(listener) = &mut self.listener {
            futures_core::ready!(listener.poll_unpin(cx));
        }

        // `EventListener` doesn't like being polled after it yields, and even if it did it
        // wouldn't yield anything more.
        self.listener = None;

        Poll::Ready(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[allow(dead_code)]
    fn assert_pool_traits() {
        fn assert_send_sync<T: Send + Sync>() {}
        fn assert_clone<T: Clone>() {}

        fn assert_pool<C: Connection + Sync>() {
            assert_send_sync::<Pool<C>>();
            assert_clone::<Pool<C>>();
        }
    }

    #[tokio::test]
    async fn close_event_resolves_once_notified() {
        let event = event_listener::Event::new();

        let mut close_event = CloseEvent {
            listener: Some(event.listen()),
        };

        let pending = close_event.do_until(std::future::pending::<()>());
        futures_util::pin_mut!(pending);

        assert!(pending.as_mut().now_or_never().is_none());

        event.notify(usize::MAX);

        assert!(matches!(pending.await, Err(Error::PoolClosed)));
    }

    #[tokio::test]
    async fn closed_event_never_runs_the_future() {
        let mut close_event = CloseEvent { listener: None };

        let ran = close_event.do_until(async { true }).await;

        assert!(matches!(ran, Err(Error::PoolClosed)));
    }
}
