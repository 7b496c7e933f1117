use std::time::Duration;

use sessionpool::mock::Event;
use sessionpool::{Arguments, Error};
use sessionpool_test::{count_events, options, pool, pool_with, test_cancellation};

#[tokio::test]
async fn it_commits_a_pool_transaction() -> anyhow::Result<()> {
    let (db, pool) = pool().await?;

    pool.session().execute("CREATE TABLE t (id BIGINT)", ()).await?;

    let mut tx = pool.begin().await?;
    assert!(tx.in_transaction());

    tx.run("INSERT INTO t VALUES ($1)", (1,)).await?;
    tx.run("INSERT INTO t VALUES ($1)", (2,)).await?;
    assert_eq!(db.committed_rows("t"), Some(0));

    tx.commit().await?;
    assert_eq!(db.committed_rows("t"), Some(2));

    Ok(())
}

#[tokio::test]
async fn it_rolls_back_explicitly() -> anyhow::Result<()> {
    let (db, pool) = pool().await?;

    pool.session().execute("CREATE TABLE t (id BIGINT)", ()).await?;

    let mut conn = pool.acquire().await?;

    let mut tx = conn.begin().await?;
    tx.run("INSERT INTO t VALUES ($1)", (1,)).await?;
    tx.rollback().await?;

    assert!(!conn.in_transaction());
    assert_eq!(db.committed_rows("t"), Some(0));

    Ok(())
}

#[tokio::test]
async fn dropped_transaction_is_rolled_back_before_reuse() -> anyhow::Result<()> {
    let (db, pool) = pool().await?;

    pool.session().execute("CREATE TABLE t (id BIGINT)", ()).await?;

    let mut conn = pool.acquire().await?;

    {
        let mut tx = conn.begin().await?;
        tx.run("INSERT INTO t VALUES ($1)", (1,)).await?;
    }

    assert!(conn.in_transaction());

    // the abandoned insert is gone before the next statement runs
    let outcome = conn.run("SELECT COUNT(*) FROM t", Arguments::new()).await?;
    assert_eq!(outcome.rows[0].get::<i64, _>(0usize), 0);
    assert!(!conn.in_transaction());

    assert_eq!(count_events(&db, |e| matches!(e, Event::Rollback { .. })), 1);

    // a new transaction on the same lease starts clean
    let mut tx = conn.begin().await?;
    tx.run("INSERT INTO t VALUES ($1)", (2,)).await?;
    tx.commit().await?;
    assert_eq!(db.committed_rows("t"), Some(1));

    Ok(())
}

#[tokio::test]
async fn dropped_pool_transaction_is_rolled_back_on_release() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(1)).await?;

    pool.session().execute("CREATE TABLE t (id BIGINT)", ()).await?;

    let mut tx = pool.begin().await?;
    tx.run("INSERT INTO t VALUES ($1)", (1,)).await?;
    drop(tx);

    // with one connection this waits for the rollback to hand it back
    let conn = pool.acquire_timeout(Duration::from_secs(1)).await?;
    assert!(!conn.in_transaction());

    assert_eq!(count_events(&db, |e| matches!(e, Event::Rollback { .. })), 1);
    assert_eq!(db.committed_rows("t"), Some(0));
    assert_eq!(db.connect_attempts(), 1);

    Ok(())
}

#[tokio::test]
async fn cancelled_session_call_releases_its_connection() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(1)).await?;
    let session = pool.session();

    session.execute("CREATE TABLE t (id BIGINT)", ()).await?;
    db.clear_journal();

    let res = tokio::time::timeout(
        Duration::from_millis(50),
        session.execute("SLEEP 5000", ()),
    )
    .await;
    assert!(res.is_err(), "the statement should still be sleeping");

    let count: Option<i64> = session.fetch_val("SELECT COUNT(*) FROM t", ()).await?;
    assert_eq!(count, Some(0));

    let journal = db.journal();
    assert!(matches!(journal[0], Event::Begin { .. }), "{journal:?}");
    assert!(
        matches!(journal[2], Event::Rollback { .. }),
        "the abandoned transaction must be rolled back first: {journal:?}"
    );

    assert_eq!(pool.size(), 1);
    assert_eq!(db.connect_attempts(), 1);

    Ok(())
}

#[tokio::test]
async fn cancellation_at_any_point_is_atomic() -> anyhow::Result<()> {
    let (db, pool) = pool_with(options().max_connections(2)).await?;

    pool.session().execute("CREATE TABLE t (id BIGINT)", ()).await?;

    test_cancellation(
        || {
            let pool = pool.clone();

            async move {
                let mut tx = pool.begin().await?;
                tx.run("INSERT INTO t VALUES ($1)", (1,)).await?;
                tx.run("SLEEP 20", ()).await?;
                tx.run("INSERT INTO t VALUES ($1)", (2,)).await?;
                tx.commit().await?;

                Ok(())
            }
        },
        || {
            let db = db.clone();
            let pool = pool.clone();

            async move {
                let rows = db.committed_rows("t");
                anyhow::ensure!(
                    rows == Some(0) || rows == Some(2),
                    "partial commit: {rows:?}"
                );

                // the pool still hands out working connections
                let mut conn = pool.acquire_timeout(Duration::from_secs(1)).await?;
                conn.run("SELECT 1", Arguments::new()).await?;

                Ok(())
            }
        },
    )
    .await?;

    assert_eq!(db.committed_rows("t"), Some(2));
    assert!(db.peak_open_connections() <= 2);

    Ok(())
}

#[tokio::test]
async fn begin_on_closed_pool_fails() -> anyhow::Result<()> {
    let (_db, pool) = pool().await?;

    pool.close().await;

    assert!(matches!(pool.begin().await, Err(Error::PoolClosed)));

    Ok(())
}
