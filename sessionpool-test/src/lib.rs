use std::future::Future;
use std::task::Poll;

use anyhow::Context;
use futures::future::poll_fn;
use futures::pin_mut;
use sessionpool_core::{Error, Pool, PoolOptions, Session};
use sessionpool_mock::{MockConnection, MockDatabase};

pub use sessionpool_mock::Event;

pub fn setup_if_needed() {
    let _ = dotenvy::dotenv();
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Options the integration tests start from; `max_connections` defaults to 5.
pub fn options() -> PoolOptions {
    let max_connections = std::env::var("SESSIONPOOL_TEST_MAX_CONNECTIONS")
        .ok()
        .and_then(|max| max.parse().ok())
        .unwrap_or(5);

    PoolOptions::new()
        .max_connections(max_connections)
        .min_connections(0)
        .test_before_acquire(true)
        .log_statements(log::LevelFilter::Debug)
}

// Make a new pool over a fresh mock database
pub async fn pool() -> Result<(MockDatabase, Pool<MockConnection>), Error> {
    pool_with(options()).await
}

pub async fn pool_with(options: PoolOptions) -> Result<(MockDatabase, Pool<MockConnection>), Error> {
    setup_if_needed();

    let db = MockDatabase::new();
    let pool = options.connect(db.connector()).await?;

    Ok((db, pool))
}

/// A session over a fresh mock database with table `t (id, name)` already created.
pub async fn session() -> anyhow::Result<(MockDatabase, Session<MockConnection>)> {
    let (db, pool) = pool().await?;
    let session = pool.session();

    session.execute("CREATE TABLE t (id BIGINT, name TEXT)", ()).await?;
    db.clear_journal();

    Ok((db, session))
}

/// Events of one kind in `db`'s journal.
pub fn count_events(db: &MockDatabase, pred: impl Fn(&Event) -> bool) -> usize {
    db.journal().iter().filter(|event| pred(event)).count()
}

/// Drop the future built by `start` after 0, 1, 2, ... polls, running `check` after every
/// cancellation, until the future completes on its own.
///
/// `check` should fail if the cancellation left the pool or the data in a bad state.
pub async fn test_cancellation<S, Fut, K, KFut>(mut start: S, mut check: K) -> anyhow::Result<()>
where
    S: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
    K: FnMut() -> KFut,
    KFut: Future<Output = anyhow::Result<()>>,
{
    for max_polls in 0.. {
        let mut num_polls = 0;

        let finished = {
            let fut = start();
            pin_mut!(fut);

            poll_fn(|cx| {
                if num_polls == max_polls {
                    return Poll::Ready(None);
                }

                num_polls += 1;
                fut.as_mut().poll(cx).map(Some)
            })
            .await
        };

        check()
            .await
            .with_context(|| format!("state broken after cancelling at {num_polls} polls"))?;

        if let Some(res) = finished {
            return res.with_context(|| format!("future failed after {num_polls} polls"));
        }
    }

    Ok(())
}
