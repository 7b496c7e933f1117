//! An in-memory, transactional backing store for `sessionpool`.
//!
//! [`MockDatabase`] keeps committed tables in memory and hands out [`MockConnection`]s that
//! implement the pool's driver boundary. It understands a tiny SQL dialect (see below), can be
//! told to fail connects, pings, statements or commits on purpose, and journals every driver call so
//! tests can assert on what the pool and session did.
//!
//! Supported statements:
//!
//! ```text
//! CREATE TABLE t (a <type>, b <type>, ...)
//! INSERT INTO t VALUES ($1, $2, ...)
//! SELECT * FROM t [WHERE col = $n]
//! SELECT a, b FROM t [WHERE col = $n]
//! SELECT COUNT(*) FROM t [WHERE col = $n]
//! SELECT $1, $2
//! DELETE FROM t [WHERE col = $n]
//! SLEEP <millis>
//! ```
//!
//! Statements are parsed as PostgreSQL with `sqlparser`. Malformed SQL fails with SQLSTATE
//! `42601`; valid SQL outside these forms fails with `0A000`.
//!
//! ```rust,ignore
//! let db = MockDatabase::new();
//!
//! let pool = PoolOptions::new()
//!     .max_connections(2)
//!     .connect(db.connector())
//!     .await?;
//! ```

mod connection;
mod database;
pub mod error;
mod statement;

pub use self::connection::MockConnection;
pub use self::database::{Event, MockDatabase};
pub use self::error::MockError;

#[cfg(test)]
mod tests {
    use sessionpool_core::connection::Connection;
    use sessionpool_core::{Arguments, Error, Value};

    use super::*;

    fn args<const N: usize>(values: [Value; N]) -> Arguments {
        Arguments::from(values.to_vec())
    }

    #[tokio::test]
    async fn writes_stay_private_until_commit() -> Result<(), Error> {
        let db = MockDatabase::new();

        let mut a = db.connect().await?;
        let mut b = db.connect().await?;

        a.run("CREATE TABLE t (id BIGINT, name TEXT)", Arguments::new()).await?;

        a.begin().await?;
        a.run("INSERT INTO t VALUES ($1, $2)", args([1.into(), "x".into()]))
            .await?;

        let own = a.run("SELECT * FROM t", Arguments::new()).await?;
        assert_eq!(own.rows.len(), 1);

        let other = b.run("SELECT COUNT(*) FROM t", Arguments::new()).await?;
        assert_eq!(other.rows[0].try_get::<i64, _>(0usize)?, 0);

        a.commit().await?;

        let other = b.run("SELECT name FROM t WHERE id = $1", args([1.into()])).await?;
        assert_eq!(other.rows[0].try_get::<String, _>("name")?, "x");

        Ok(())
    }

    #[tokio::test]
    async fn rollback_discards_writes() -> Result<(), Error> {
        let db = MockDatabase::new();
        let mut conn = db.connect().await?;

        conn.run("CREATE TABLE t (id BIGINT)", Arguments::new()).await?;

        conn.begin().await?;
        conn.run("INSERT INTO t VALUES (1)", Arguments::new()).await?;
        conn.rollback().await?;

        assert_eq!(db.committed_rows("t"), Some(0));

        // outside a transaction a rollback does nothing and is not journaled
        conn.rollback().await?;

        let rollbacks = db
            .journal()
            .into_iter()
            .filter(|event| matches!(event, Event::Rollback { .. }))
            .count();
        assert_eq!(rollbacks, 1);

        Ok(())
    }

    #[tokio::test]
    async fn it_reports_sqlstate_codes() -> Result<(), Error> {
        let db = MockDatabase::new();
        let mut conn = db.connect().await?;

        let err = conn
            .run("SELEC 1", Arguments::new())
            .await
            .unwrap_err();
        let err = err.as_database_error().unwrap();
        assert_eq!(err.code().as_deref(), Some("42601"));

        let err = conn
            .run("SELECT * FROM missing", Arguments::new())
            .await
            .unwrap_err();
        assert_eq!(
            err.as_database_error().unwrap().code().as_deref(),
            Some("42P01")
        );

        // a failed statement outside a fault does not invalidate the connection
        assert!(conn.is_valid());

        Ok(())
    }

    #[tokio::test]
    async fn fatal_faults_invalidate_the_connection() -> Result<(), Error> {
        let db = MockDatabase::new();
        db.fail_statements_fatally(|sql, _| sql.contains("boom"));

        let mut conn = db.connect().await?;

        let err = conn
            .run("SELECT 'boom'", Arguments::new())
            .await
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(!conn.is_valid());

        assert!(matches!(
            conn.run("SELECT 1", Arguments::new()).await,
            Err(Error::Io(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn nth_connect_fails() -> Result<(), Error> {
        let db = MockDatabase::new();
        db.fail_connect(2);

        let _first = db.connect().await?;
        assert!(db.connect().await.is_err());
        let _third = db.connect().await?;

        assert_eq!(db.connect_attempts(), 3);
        assert_eq!(db.open_connections(), 2);

        Ok(())
    }

    #[tokio::test]
    async fn failed_commit_discards_the_transaction() -> Result<(), Error> {
        let db = MockDatabase::new();
        let mut conn = db.connect().await?;

        conn.run("CREATE TABLE t (id BIGINT)", Arguments::new()).await?;

        db.fail_next_commit();

        conn.begin().await?;
        conn.run("INSERT INTO t VALUES (1)", Arguments::new()).await?;
        assert!(conn.commit().await.is_err());

        assert!(!conn.in_transaction());
        assert_eq!(db.committed_rows("t"), Some(0));

        Ok(())
    }
}
