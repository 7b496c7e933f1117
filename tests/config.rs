use std::io::Write;
use std::time::Duration;

use serde::Deserialize;
use sessionpool::mock::MockDatabase;
use sessionpool::{Error, PoolConfig};
use sessionpool_test::setup_if_needed;

#[tokio::test]
async fn pool_from_config_file() -> anyhow::Result<()> {
    setup_if_needed();

    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(
        file,
        r#"
max-connections = 2
min-connections = 1
acquire-timeout = 1

[log]
statements-level = "trace"
"#
    )?;

    let options = PoolConfig::read_from(file.path())?.into_options()?;
    assert_eq!(options.get_acquire_timeout(), Duration::from_secs(1));

    let db = MockDatabase::new();
    let pool = options.connect(db.connector()).await?;

    assert_eq!(pool.size(), 1);
    assert_eq!(pool.options().get_max_connections(), 2);

    let _a = pool.acquire().await?;
    let _b = pool.acquire().await?;

    // the configured timeout applies to a third caller
    let res = pool.acquire().await;
    assert!(matches!(res, Err(Error::PoolTimedOut)), "{res:?}");
    assert!(db.peak_open_connections() <= 2);

    Ok(())
}

#[test]
fn it_nests_in_an_application_config() -> anyhow::Result<()> {
    #[derive(Deserialize)]
    struct AppConfig {
        name: String,
        database: PoolConfig,
    }

    let config: AppConfig = toml::from_str(
        r#"
        name = "inventory"

        [database]
        max-connections = 8
        idle-timeout = 0
        "#,
    )?;

    assert_eq!(config.name, "inventory");

    let options = config.database.into_options()?;
    assert_eq!(options.get_max_connections(), 8);
    assert_eq!(options.get_idle_timeout(), None);

    Ok(())
}

#[test]
fn it_reports_the_file_of_a_bad_config() -> anyhow::Result<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "max-connections = \"lots\"")?;

    let err = PoolConfig::read_from(file.path()).unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");
    assert!(
        err.to_string().contains(&*file.path().to_string_lossy()),
        "{err}"
    );

    Ok(())
}

#[test]
fn missing_config_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();

    let err = PoolConfig::read_from(dir.path().join("pool.toml")).unwrap_err();
    assert!(matches!(err, Error::Io(_)), "{err:?}");
}

#[test]
fn zero_max_connections_is_rejected() -> anyhow::Result<()> {
    let config = PoolConfig::from_toml_str("max-connections = 0")?;

    let err = config.into_options().unwrap_err();
    assert!(matches!(err, Error::Configuration(_)), "{err:?}");

    Ok(())
}
