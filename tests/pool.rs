use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::try_join_all;
use sessionpool::mock::{Event, MockDatabase};
use sessionpool::{Error, PoolOptions};
use sessionpool_test::{options, pool, pool_with, setup_if_needed};
use tokio::sync::Mutex;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn it_never_exceeds_max_connections() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(3)).await?;
    let session = pool.session();

    let tasks = (0..20).map(|_| {
        let session = session.clone();

        tokio::spawn(async move { session.fetch("SLEEP 5", ()).await })
    });

    for res in try_join_all(tasks).await? {
        res?;
    }

    assert!(pool.size() <= 3, "size: {}", pool.size());
    assert!(
        db.peak_open_connections() <= 3,
        "peak: {}",
        db.peak_open_connections()
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_are_served_in_arrival_order() -> anyhow::Result<()> {
    let (_db, pool) = pool_with(options().max_connections(1)).await?;

    let held = pool.acquire().await?;
    let order = Arc::new(Mutex::new(Vec::new()));

    let mut waiters = Vec::new();

    for n in 0..3 {
        let pool = pool.clone();
        let order = Arc::clone(&order);

        waiters.push(tokio::spawn(async move {
            let conn = pool.acquire().await?;
            order.lock().await.push(n);
            tokio::time::sleep(Duration::from_millis(5)).await;
            drop(conn);

            Ok::<_, Error>(())
        }));

        // let the waiter queue up before the next one arrives
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    drop(held);

    for res in try_join_all(waiters).await? {
        res?;
    }

    assert_eq!(*order.lock().await, [0, 1, 2]);

    Ok(())
}

#[tokio::test]
async fn it_reuses_idle_connections() -> anyhow::Result<()> {
    let (db, pool) = pool().await?;

    let first_id = {
        let conn = pool.acquire().await?;
        conn.id()
    };

    assert_eq!(pool.num_idle(), 1);

    let conn = pool.acquire().await?;
    assert_eq!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 1);

    Ok(())
}

#[tokio::test]
async fn acquire_times_out() -> anyhow::Result<()> {
    let (_db, pool) = pool_with(options().max_connections(1)).await?;

    let _held = pool.acquire().await?;

    let started = Instant::now();
    let res = pool.acquire_timeout(Duration::from_millis(100)).await;
    let elapsed = started.elapsed();

    assert!(matches!(res, Err(Error::PoolTimedOut)), "{res:?}");
    assert!(elapsed >= Duration::from_millis(100), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "{elapsed:?}");

    Ok(())
}

#[tokio::test]
async fn try_acquire_only_takes_idle_connections() -> anyhow::Result<()> {
    let (_db, pool) = pool().await?;

    assert!(pool.try_acquire().is_none());

    drop(pool.acquire().await?);

    let conn = pool.try_acquire();
    assert!(conn.is_some());

    Ok(())
}

#[tokio::test]
async fn acquire_fails_after_close() -> anyhow::Result<()> {
    let (db, pool) = pool().await?;

    drop(pool.acquire().await?);
    assert_eq!(db.open_connections(), 1);

    pool.close().await;

    assert!(pool.is_closed());
    assert_eq!(db.open_connections(), 0);
    assert!(matches!(pool.acquire().await, Err(Error::PoolClosed)));
    assert!(pool.try_acquire().is_none());

    // closing again is a no-op
    pool.close().await;

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn close_wakes_waiters_and_waits_for_leases() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(1)).await?;

    let held = pool.acquire().await?;

    let waiter = tokio::spawn({
        let pool = pool.clone();
        async move { pool.acquire().await.map(drop) }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;

    let close = tokio::spawn({
        let pool = pool.clone();
        async move { pool.close().await }
    });

    assert!(matches!(waiter.await?, Err(Error::PoolClosed)));

    // the lease is still out, so the pool cannot finish closing
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!close.is_finished());
    assert_eq!(db.open_connections(), 1);

    drop(held);
    close.await?;

    assert_eq!(db.open_connections(), 0);
    assert_eq!(pool.size(), 0);

    Ok(())
}

#[tokio::test]
async fn close_event_cancels_long_work() -> anyhow::Result<()> {
    let (_db, pool) = pool().await?;

    let mut close_event = pool.close_event();
    let mut conn = pool.acquire().await?;

    let closer = pool.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        closer.close().await;
    });

    let res = close_event
        .do_until(conn.run("SLEEP 5000", Default::default()))
        .await;
    assert!(matches!(res, Err(Error::PoolClosed)));

    Ok(())
}

#[tokio::test]
async fn eager_pool_opens_min_connections() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().min_connections(3)).await?;

    assert_eq!(pool.size(), 3);
    assert_eq!(pool.num_idle(), 3);
    assert_eq!(db.open_connections(), 3);

    Ok(())
}

#[tokio::test]
async fn failed_eager_connect_tears_the_pool_down() -> anyhow::Result<()> {
    setup_if_needed();

    let db = MockDatabase::new();
    db.fail_connect(2);

    let res = options()
        .min_connections(3)
        .connect(db.connector())
        .await;

    let err = match res {
        Err(Error::PoolInit(cause)) => cause,
        other => panic!("expected PoolInit, got {other:?}"),
    };

    assert_eq!(
        err.as_database_error().and_then(|e| e.code()).as_deref(),
        Some("08006")
    );

    assert_eq!(db.connect_attempts(), 2);
    assert_eq!(db.open_connections(), 0);

    Ok(())
}

#[tokio::test]
async fn lazy_pool_connects_on_demand() -> anyhow::Result<()> {
    setup_if_needed();

    let db = MockDatabase::new();
    let pool = options().connect_lazy(db.connector())?;

    assert_eq!(pool.size(), 0);
    assert_eq!(db.connect_attempts(), 0);

    let _conn = pool.acquire().await?;
    assert_eq!(pool.size(), 1);

    Ok(())
}

#[tokio::test]
async fn invalid_options_are_rejected_before_connecting() -> anyhow::Result<()> {
    let db = MockDatabase::new();

    let res = PoolOptions::new()
        .max_connections(1)
        .min_connections(2)
        .connect(db.connector())
        .await;

    assert!(matches!(res, Err(Error::Configuration(_))));
    assert_eq!(db.connect_attempts(), 0);

    Ok(())
}

#[tokio::test]
async fn invalidated_connections_are_replaced() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(1)).await?;

    let mut conn = pool.acquire().await?;
    let first_id = conn.id();
    conn.invalidate();
    drop(conn);

    let conn = pool.acquire().await?;
    assert_ne!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 2);
    assert!(db.peak_open_connections() <= 1);

    let closes = db
        .journal()
        .into_iter()
        .filter(|event| matches!(event, Event::Close { .. }))
        .count();
    assert_eq!(closes, 1);

    Ok(())
}

#[tokio::test]
async fn detach_frees_the_slot() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(1)).await?;

    let conn = pool.acquire().await?;
    let raw = conn.detach();

    assert_eq!(pool.size(), 0);

    let _second = pool.acquire_timeout(Duration::from_secs(1)).await?;
    assert_eq!(db.open_connections(), 2);

    drop(raw);
    assert_eq!(db.open_connections(), 1);

    Ok(())
}

#[tokio::test]
async fn it_can_be_cloned_and_shared() -> anyhow::Result<()> {
    let (_db, pool) = pool().await?;

    let other = pool.clone();
    let conn = other.acquire().await?;

    assert_eq!(pool.size(), 1);
    drop(conn);
    assert_eq!(pool.num_idle(), 1);

    Ok(())
}

#[tokio::test]
async fn idle_connections_are_reaped() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().idle_timeout(Duration::from_millis(50))).await?;

    let first_id = pool.acquire().await?.id();
    assert_eq!(pool.num_idle(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(pool.size(), 0);
    assert_eq!(db.open_connections(), 0);
    assert_eq!(
        db.journal()
            .iter()
            .filter(|event| matches!(event, Event::Close { .. }))
            .count(),
        1
    );

    let conn = pool.acquire().await?;
    assert_ne!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 2);

    Ok(())
}

#[tokio::test]
async fn expired_idle_connection_is_replaced_on_acquire() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().idle_timeout(Duration::from_millis(30))).await?;

    let first_id = pool.acquire().await?.id();

    // block the runtime so the reaper cannot get to the connection first
    std::thread::sleep(Duration::from_millis(60));

    let conn = pool.acquire().await?;
    assert_ne!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 2);
    assert_eq!(db.open_connections(), 1);
    assert_eq!(pool.size(), 1);

    Ok(())
}

#[tokio::test]
async fn connection_past_max_lifetime_is_closed_on_release() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_lifetime(Duration::from_millis(30))).await?;

    let conn = pool.acquire().await?;
    let first_id = conn.id();

    std::thread::sleep(Duration::from_millis(60));
    drop(conn);

    assert_eq!(pool.num_idle(), 0);

    let conn = pool.acquire().await?;
    assert_ne!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 2);

    Ok(())
}

#[tokio::test]
async fn failed_ping_discards_the_idle_connection() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().test_before_acquire(true)).await?;

    let first_id = pool.acquire().await?.id();

    db.fail_next_ping();

    let conn = pool.acquire().await?;
    assert_ne!(conn.id(), first_id);
    assert_eq!(db.connect_attempts(), 2);
    assert_eq!(db.open_connections(), 1);
    assert_eq!(pool.size(), 1);

    Ok(())
}

#[tokio::test]
async fn unbounded_timeouts_are_accepted() -> anyhow::Result<()> {
    let (db, pool) = pool_with(
        options()
            .min_connections(1)
            .acquire_timeout(Duration::MAX)
            .idle_timeout(Duration::MAX)
            .max_lifetime(Duration::MAX),
    )
    .await?;

    assert_eq!(pool.size(), 1);

    let conn = pool.acquire_timeout(Duration::MAX).await?;
    drop(conn);

    let session = pool.session().with_timeout(Duration::MAX);
    session.execute("CREATE TABLE t (id BIGINT)", ()).await?;
    assert_eq!(db.committed_rows("t"), Some(0));

    Ok(())
}
