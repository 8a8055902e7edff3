//! Integration tests for configuration and ORM assembly.

mod common;

use std::time::Duration;

use common::{Post, User};
use pretty_assertions::assert_eq;
use quarry::core::{ConnectionString, MapEnvSource};
use quarry::{DatabaseConfig, DialectKind, ErrorCode, OrmBuilder};

#[test]
fn test_builder_validates_before_connecting() {
    let err = DatabaseConfig::builder().database("app").build().unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingConfiguration);

    let err = DatabaseConfig::builder().with_dialect("oracle").database("app").build().unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedDialect);

    let err = DatabaseConfig::builder().with_dialect("postgres").database("app").build().unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingConfiguration);

    let config = DatabaseConfig::builder()
        .with_dialect("postgres")
        .host("db.internal")
        .user("app")
        .password("secret")
        .database("app")
        .connection_pool(20, 5)
        .acquire_timeout(Duration::from_secs(3))
        .statement_timeout(Duration::from_secs(10))
        .build()
        .unwrap();
    assert_eq!(config.dialect, DialectKind::Postgres);
    assert_eq!(config.port, Some(5432));
    assert_eq!(config.pool.max_connections, 20);
    assert_eq!(config.pool.max_idle, 5);
    assert_eq!(config.statement_timeout, Some(Duration::from_secs(10)));
}

#[test]
fn test_url_configuration() {
    let config = DatabaseConfig::from_url("mysql://root:pw@localhost:3307/shop").unwrap();
    assert_eq!(config.dialect, DialectKind::MySql);
    assert_eq!(config.host.as_deref(), Some("localhost"));
    assert_eq!(config.port, Some(3307));
    assert_eq!(config.user.as_deref(), Some("root"));
    assert_eq!(config.database, "shop");

    assert!(DatabaseConfig::from_url("sqlite::memory:").unwrap().is_memory());

    let parsed = ConnectionString::parse("sqlite://data/app.db?busy_timeout=100").unwrap();
    assert_eq!(parsed.database(), Some("data/app.db"));
    assert_eq!(parsed.params().get("busy_timeout").map(String::as_str), Some("100"));
}

#[test]
fn test_environment_configuration() {
    let env = MapEnvSource::new()
        .set("DB_DIALECT", "postgres")
        .set("DB_HOST", "pg")
        .set("DB_PORT", "6543")
        .set("DB_USER", "svc")
        .set("DB_PASSWORD", "pw")
        .set("DB_NAME", "orders")
        .set("DB_MAX_OPEN", "8")
        .set("DB_MAX_IDLE", "2");
    let config = DatabaseConfig::from_env_source(&env).unwrap();
    assert_eq!(config.port, Some(6543));
    assert_eq!(config.database, "orders");
    assert_eq!(config.pool.max_connections, 8);
    assert_eq!(config.pool.max_idle, 2);

    let url_wins = MapEnvSource::new()
        .set("DATABASE_URL", "sqlite::memory:")
        .set("DB_DIALECT", "mysql");
    assert_eq!(DatabaseConfig::from_env_source(&url_wins).unwrap().dialect, DialectKind::Sqlite);

    let err = DatabaseConfig::from_env_source(&MapEnvSource::new()).unwrap_err();
    assert_eq!(err.code, ErrorCode::MissingConfiguration);
}

#[tokio::test]
async fn test_duplicate_registration_fails_connect() {
    let err = OrmBuilder::new(DatabaseConfig::sqlite_memory())
        .register::<User>()
        .register::<User>()
        .connect()
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::DuplicateModel);
}

#[tokio::test]
async fn test_connect_requires_a_driver_for_network_dialects() {
    let config = DatabaseConfig::builder()
        .with_dialect("postgres")
        .host("localhost")
        .database("app")
        .build()
        .unwrap();
    let err = OrmBuilder::new(config).connect().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnsupportedDialect);
}

#[tokio::test]
async fn test_auto_migrate_on_connect_and_register() {
    let mut config = DatabaseConfig::sqlite_memory();
    config.auto_migrate = true;
    let orm = OrmBuilder::new(config).register::<User>().connect().await.unwrap();
    assert!(orm.schema().has_table::<User>().await.unwrap());

    orm.register::<Post>().await.unwrap();
    assert!(orm.schema().has_table::<Post>().await.unwrap());
    assert_eq!(orm.register::<Post>().await.unwrap_err().code, ErrorCode::DuplicateModel);
}

#[tokio::test]
async fn test_without_auto_migrate_tables_are_not_created() {
    let orm = OrmBuilder::new(DatabaseConfig::sqlite_memory())
        .register::<User>()
        .connect()
        .await
        .unwrap();
    assert!(!orm.schema().has_table::<User>().await.unwrap());
    assert_eq!(orm.dialect().kind(), DialectKind::Sqlite);
}

#[tokio::test]
async fn test_close_rejects_further_work() {
    let orm = common::setup().await;
    orm.close();
    let err = orm.query::<User>().unwrap().count().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::PoolClosed);
}
