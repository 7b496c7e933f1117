use std::cmp;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_queue::ArrayQueue;
use futures_intrusive::sync::{Semaphore, SemaphoreReleaser};
use tracing::Level;

use super::connection::{Floating, Idle, Live};
use super::options::PoolOptions;
use super::CloseEvent;
use crate::connection::{Connection, Connector};
use crate::error::Error;
use crate::logger::private_level_filter_to_trace_level;
use crate::rt;

const GRACEFUL_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

pub(crate) struct SharedPool<C: Connection> {
    pub(super) connector: Box<dyn Connector<C>>,
    pub(crate) options: PoolOptions,
    pub(super) idle_conns: ArrayQueue<Idle<C>>,
    pub(super) semaphore: Semaphore,
    pub(super) size: AtomicU32,
    next_id: AtomicU64,
    is_closed: AtomicBool,
    pub(super) on_closed: event_listener::Event,
    acquire_time_level: Option<Level>,
    acquire_slow_level: Option<Level>,
}

impl<C: Connection> SharedPool<C> {
    pub(super) fn new_arc(options: PoolOptions, connector: Box<dyn Connector<C>>) -> Arc<Self> {
        let capacity = options.max_connections as usize;

        Arc::new(Self {
            connector,
            idle_conns: ArrayQueue::new(capacity),
            // a fair semaphore hands out permits in the order they were requested,
            // which is what makes `acquire()` first-come first-served
            semaphore: Semaphore::new(true, capacity),
            size: AtomicU32::new(0),
            next_id: AtomicU64::new(1),
            is_closed: AtomicBool::new(false),
            on_closed: event_listener::Event::new(),
            acquire_time_level: private_level_filter_to_trace_level(options.acquire_time_level),
            acquire_slow_level: private_level_filter_to_trace_level(options.acquire_slow_level),
            options,
        })
    }

    pub(super) fn size(&self) -> u32 {
        self.size.load(Ordering::Acquire)
    }

    pub(super) fn num_idle(&self) -> usize {
        // NOTE: this is racy, but not unsafe
        self.idle_conns.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.is_closed.load(Ordering::Acquire)
    }

    fn mark_closed(&self) {
        self.is_closed.store(true, Ordering::Release);
        self.on_closed.notify(usize::MAX);
    }

    pub(super) fn close<'a>(self: &'a Arc<Self>) -> impl Future<Output = ()> + 'a {
        self.mark_closed();

        async move {
            // Holding every permit means no connection is leased, so whatever is still
            // counted in `size` is sitting in the idle queue.
            let _permits = self
                .semaphore
                .acquire(self.options.max_connections as usize)
                .await;

            while let Some(idle) = self.idle_conns.pop() {
                let id = idle.live.id;

                match rt::timeout(GRACEFUL_CLOSE_TIMEOUT, idle.live.raw.close()).await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        tracing::debug!(target: "sessionpool::pool", %error, connection_id = id, "error closing connection");
                    }
                    Err(_) => {
                        tracing::debug!(target: "sessionpool::pool", connection_id = id, "timed out closing connection");
                    }
                }

                self.size.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }

    pub(super) fn close_event(&self) -> CloseEvent {
        // Listen before checking the flag; `mark_closed()` stores then notifies, so either
        // we see the flag or the listener sees the notification.
        let listener = self.on_closed.listen();

        CloseEvent {
            listener: (!self.is_closed()).then_some(listener),
        }
    }

    /// Take an idle connection without waiting, if a permit and a usable one are free.
    ///
    /// Expired or broken connections found this way are discarded and `None` is returned.
    #[inline]
    pub(super) fn try_acquire(self: &Arc<Self>) -> Option<Floating<C, Live<C>>> {
        if self.is_closed() {
            return None;
        }

        let permit = self.semaphore.try_acquire(1)?;

        let idle = self.pop_idle(permit).ok()?;

        if !idle.inner.live.raw.is_valid()
            || is_beyond_max_lifetime(&idle.inner.live, &self.options)
            || is_beyond_idle_timeout(&idle.inner, &self.options)
        {
            idle.into_live().discard();
            return None;
        }

        Some(idle.into_live())
    }

    fn pop_idle<'a>(
        self: &'a Arc<Self>,
        permit: SemaphoreReleaser<'a>,
    ) -> Result<Floating<C, Idle<C>>, SemaphoreReleaser<'a>> {
        match self.idle_conns.pop() {
            Some(idle) => Ok(Floating::from_idle(idle, Arc::clone(self), permit)),
            None => Err(permit),
        }
    }

    /// Put a connection back into the idle queue without resetting its idle clock.
    fn restore_idle(&self, idle: Floating<C, Idle<C>>) {
        if self.idle_conns.push(idle.into_leakable()).is_err() {
            panic!("BUG: connection queue overflow in restore_idle()");
        }

        // the permit was leaked by `into_leakable()`; hand it back
        self.semaphore.release(1);
    }

    pub(super) fn release(&self, floating: Floating<C, Live<C>>) {
        if self.is_closed() || is_beyond_max_lifetime(&floating.inner, &self.options) {
            floating.discard();
            return;
        }

        let idle = floating.into_idle();

        if self.idle_conns.push(idle.into_leakable()).is_err() {
            panic!("BUG: connection queue overflow in release()");
        }

        // NOTE: we need to make sure we drop the permit *after* we push to the idle queue
        // don't decrease the size
        self.semaphore.release(1);
    }

    /// Try to atomically increment the pool size for a new connection.
    ///
    /// Returns `Err` if the pool is at max capacity already or is closed.
    fn try_increment_size<'a>(
        self: &'a Arc<Self>,
        permit: SemaphoreReleaser<'a>,
    ) -> Result<DecrementSizeGuard<C>, SemaphoreReleaser<'a>> {
        match self
            .size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                if self.is_closed() {
                    return None;
                }

                size.checked_add(1)
                    .filter(|size| size <= &self.options.max_connections)
            }) {
            // we successfully incremented the size
            Ok(_) => Ok(DecrementSizeGuard::from_permit(Arc::clone(self), permit)),
            // the pool is at max capacity or is closed
            Err(_) => Err(permit),
        }
    }

    pub(super) async fn acquire(
        self: &Arc<Self>,
        timeout: Duration,
    ) -> Result<Floating<C, Live<C>>, Error> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let acquire_started_at = Instant::now();
        let deadline = acquire_started_at.checked_add(timeout);

        let mut close_event = self.close_event();

        let acquired = rt::timeout(
            timeout,
            close_event.do_until(async {
                loop {
                    // Waiters queue up here in arrival order.
                    let permit = self.semaphore.acquire(1).await;

                    // First attempt to pop a connection from the idle queue.
                    let guard = match self.pop_idle(permit) {
                        // Then, check that we can use it...
                        Ok(conn) => match check_idle_conn(conn, &self.options).await {
                            // All good!
                            Ok(live) => return Ok(live),

                            // if the connection was closed, we can reuse its size slot
                            Err(guard) => guard,
                        },

                        // If there are no idle connections, try to open a new one
                        Err(permit) => match self.try_increment_size(permit) {
                            Ok(guard) => guard,

                            // Only a connection in the middle of being closed holds the slot
                            // we need; give the permit back and try again shortly.
                            Err(permit) => {
                                drop(permit);
                                rt::yield_now().await;
                                continue;
                            }
                        },
                    };

                    // Attempt to connect...
                    return self.connection(deadline, guard).await;
                }
            }),
        )
        .await
        .map_err(|_| Error::PoolTimedOut)???;

        let acquired_after = acquire_started_at.elapsed();

        let acquire_slow_level = self
            .acquire_slow_level
            .filter(|_| acquired_after > self.options.acquire_slow_threshold);

        if let Some(level) = acquire_slow_level {
            crate::private_tracing_dynamic_event!(
                target: "sessionpool::pool::acquire",
                level,
                connection_id = acquired.inner.id,
                acquired_after_secs = acquired_after.as_secs_f64(),
                slow_acquire_threshold_secs = self.options.acquire_slow_threshold.as_secs_f64(),
                "acquired connection, but time to acquire exceeded slow threshold"
            );
        } else if let Some(level) = self.acquire_time_level {
            crate::private_tracing_dynamic_event!(
                target: "sessionpool::pool::acquire",
                level,
                connection_id = acquired.inner.id,
                acquired_after_secs = acquired_after.as_secs_f64(),
                "acquired connection"
            );
        }

        Ok(acquired)
    }

    /// Open a new connection, retrying refused connects until `deadline`.
    ///
    /// A `deadline` of `None` never times out.
    pub(super) async fn connection(
        self: &Arc<Self>,
        deadline: Option<Instant>,
        guard: DecrementSizeGuard<C>,
    ) -> Result<Floating<C, Live<C>>, Error> {
        if self.is_closed() {
            return Err(Error::PoolClosed);
        }

        let mut backoff = Duration::from_millis(10);
        let max_backoff = deadline_as_timeout(deadline)? / 5;

        loop {
            let timeout = deadline_as_timeout(deadline)?;

            // result here is `Result<Result<C, Error>, TimeoutError>`
            // if this block does not return, sleep for the backoff timeout and try again
            match rt::timeout(timeout, self.connector.connect()).await {
                // successfully established connection
                Ok(Ok(raw)) => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);

                    tracing::debug!(target: "sessionpool::pool", connection_id = id, "opened connection");

                    return Ok(Floating::new_live(raw, id, guard));
                }

                // an IO error while connecting is assumed to be the system starting up
                Ok(Err(Error::Io(e))) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    tracing::debug!(target: "sessionpool::pool", error = %e, "connection refused; retrying");
                }

                // Any other error while connection should immediately
                // terminate and bubble the error up
                Ok(Err(e)) => return Err(e),

                // timed out
                Err(_) => return Err(Error::PoolTimedOut),
            }

            // If the connection is refused, wait in exponentially
            // increasing steps for the server to come up,
            // capped by a factor of the remaining time until the deadline
            rt::sleep(backoff).await;
            backoff = cmp::min(backoff * 2, max_backoff);
        }
    }

    /// Open connections until there are `min_connections`, giving up at `deadline`.
    ///
    /// Never waits for a permit: if callers are queued for connections, they come first.
    pub(super) async fn try_min_connections(
        self: &Arc<Self>,
        deadline: Option<Instant>,
    ) -> Result<(), Error> {
        while self.size() < self.options.min_connections {
            if self.is_closed() {
                return Ok(());
            }

            let Some(permit) = self.semaphore.try_acquire(1) else {
                return Ok(());
            };

            // We must always obey `max_connections`.
            let Ok(guard) = self.try_increment_size(permit) else {
                return Ok(());
            };

            let conn = self.connection(deadline, guard).await?;

            self.release(conn);
        }

        Ok(())
    }

    /// Replace connections lost below `min_connections`, logging instead of returning errors.
    pub(crate) async fn min_connections_maintenance(self: &Arc<Self>) {
        if self.options.min_connections == 0 || self.is_closed() {
            return;
        }

        let deadline = deadline_after(self.options.acquire_timeout);

        if let Err(error) = self.try_min_connections(deadline).await {
            tracing::error!(
                target: "sessionpool::pool",
                %error,
                "error maintaining min_connections"
            );
        }
    }

    /// Close idle connections that outlived `idle_timeout` or `max_lifetime`.
    async fn reap_idle_connections(self: &Arc<Self>) {
        // Only visit each idle connection once; ones we keep go to the back of the queue.
        let max_reaped = self.num_idle();

        for _ in 0..max_reaped {
            // Reaping never competes with waiting callers for a permit.
            let Some(permit) = self.semaphore.try_acquire(1) else {
                return;
            };

            let Ok(idle) = self.pop_idle(permit) else {
                return;
            };

            if is_beyond_idle_timeout(&idle.inner, &self.options)
                || is_beyond_max_lifetime(&idle.inner.live, &self.options)
            {
                tracing::debug!(
                    target: "sessionpool::pool",
                    connection_id = idle.inner.live.id,
                    "reaping expired idle connection"
                );

                // dropping the guard frees the size slot and the permit
                drop(idle.close().await);
            } else {
                self.restore_idle(idle);
            }
        }
    }
}

impl<C: Connection> Drop for SharedPool<C> {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

/// Returns `true` if the connection has exceeded `options.max_lifetime` if set, `false` otherwise.
fn is_beyond_max_lifetime<C>(live: &Live<C>, options: &PoolOptions) -> bool {
    options
        .max_lifetime
        .map_or(false, |max| live.created_at.elapsed() > max)
}

/// Returns `true` if the connection has exceeded `options.idle_timeout` if set, `false` otherwise.
fn is_beyond_idle_timeout<C>(idle: &Idle<C>, options: &PoolOptions) -> bool {
    options
        .idle_timeout
        .map_or(false, |timeout| idle.idle_since.elapsed() > timeout)
}

async fn check_idle_conn<C: Connection>(
    mut conn: Floating<C, Idle<C>>,
    options: &PoolOptions,
) -> Result<Floating<C, Live<C>>, DecrementSizeGuard<C>> {
    // If the connection we pulled has expired, close the connection and
    // immediately create a new connection
    if is_beyond_max_lifetime(&conn.inner.live, options) || is_beyond_idle_timeout(&conn.inner, options)
    {
        return Err(conn.close().await);
    }

    if !conn.inner.live.raw.is_valid() {
        return Err(conn.close_hard());
    }

    if options.test_before_acquire {
        // Check that the connection is still live
        if let Err(error) = conn.ping().await {
            // an error here means the other end has hung up or we lost connectivity
            // either way we're fine to just discard the connection
            // the error itself here isn't necessarily unexpected so WARN is too strong
            tracing::info!(
                target: "sessionpool::pool",
                %error,
                connection_id = conn.inner.live.id,
                "ping on idle connection returned error"
            );

            // connection is broken so don't try to close nicely
            return Err(conn.close_hard());
        }
    }

    // No need to re-connect; connection is alive or we don't care
    Ok(conn.into_live())
}

pub(super) fn spawn_maintenance_tasks<C: Connection>(pool: &Arc<SharedPool<C>>) {
    // NOTE: use `pool_weak` for the maintenance tasks
    // so they don't keep `SharedPool` from being dropped.
    let pool_weak = Arc::downgrade(pool);

    let period = match (pool.options.max_lifetime, pool.options.idle_timeout) {
        (Some(it), None) | (None, Some(it)) => it,

        (Some(a), Some(b)) => cmp::min(a, b),

        (None, None) => {
            if pool.options.min_connections > 0 {
                let _ = rt::try_spawn(async move {
                    if let Some(pool) = pool_weak.upgrade() {
                        pool.min_connections_maintenance().await;
                    }
                });
            }

            return;
        }
    };

    // Immediately cancel this task if the pool is closed.
    let mut close_event = pool.close_event();

    let spawned = rt::try_spawn(async move {
        let _ = close_event
            .do_until(async {
                // If the last handle to the pool was dropped while we were sleeping
                while let Some(pool) = pool_weak.upgrade() {
                    if pool.is_closed() {
                        return;
                    }

                    let next_run = deadline_after(period);

                    // Go over all idle connections, check for idleness and lifetime,
                    // and if we have fewer than min_connections after reaping a connection,
                    // open a new one immediately.
                    pool.reap_idle_connections().await;

                    if let Err(error) = pool.try_min_connections(next_run).await {
                        tracing::error!(
                            target: "sessionpool::pool",
                            %error,
                            "error maintaining min_connections"
                        );
                    }

                    // Don't hold a reference to the pool while sleeping.
                    drop(pool);

                    // a period this long never expires anything
                    let Some(next_run) = next_run else {
                        return;
                    };

                    rt::sleep_until(next_run).await;
                }
            })
            .await;
    });

    if spawned.is_err() {
        tracing::warn!(
            target: "sessionpool::pool",
            "no async runtime available; idle connections will only be reaped on acquire"
        );
    }
}

/// RAII guard returned by `Pool::try_increment_size()` and others.
///
/// Will decrement the pool size if dropped, to avoid semantically "leaking" connections
/// (where the pool thinks it has more connections than it does).
pub(crate) struct DecrementSizeGuard<C: Connection> {
    pub(super) pool: Arc<SharedPool<C>>,
    cancelled: bool,
}

impl<C: Connection> DecrementSizeGuard<C> {
    /// Create a new guard that will release a semaphore permit on-drop.
    pub fn new_permit(pool: Arc<SharedPool<C>>) -> Self {
        Self {
            pool,
            cancelled: false,
        }
    }

    pub fn from_permit(pool: Arc<SharedPool<C>>, mut permit: SemaphoreReleaser<'_>) -> Self {
        // here we effectively take ownership of the permit
        permit.disarm();
        Self::new_permit(pool)
    }

    pub fn cancel(mut self) {
        self.cancelled = true;
    }
}

impl<C: Connection> Drop for DecrementSizeGuard<C> {
    fn drop(&mut self) {
        if !self.cancelled {
            self.pool.size.fetch_sub(1, Ordering::AcqRel);

            // and here we release the permit we got on construction
            self.pool.semaphore.release(1);
        }
    }
}

/// The instant `timeout` from now, or `None` if that is too far out to represent.
pub(super) fn deadline_after(timeout: Duration) -> Option<Instant> {
    Instant::now().checked_add(timeout)
}

fn deadline_as_timeout(deadline: Option<Instant>) -> Result<Duration, Error> {
    match deadline {
        Some(deadline) => deadline
            .checked_duration_since(Instant::now())
            .ok_or(Error::PoolTimedOut),
        None => Ok(Duration::MAX),
    }
}
