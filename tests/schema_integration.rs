//! Integration tests for schema management against file and in-memory
//! databases.

mod common;

use common::{Post, User};
use pretty_assertions::assert_eq;
use quarry::{DatabaseConfig, DialectFactory, DialectKind, ErrorCode, OrmBuilder, QueryError};

fn file_config(path: &std::path::Path) -> DatabaseConfig {
    DatabaseConfig::builder()
        .with_dialect("sqlite")
        .database(path.display().to_string())
        .auto_create_database(true)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_migrate_is_additive_and_idempotent() {
    let orm = OrmBuilder::new(DatabaseConfig::sqlite_memory())
        .register::<User>()
        .register::<Post>()
        .connect()
        .await
        .unwrap();
    let schema = orm.schema();

    let report = schema.migrate().await.unwrap();
    assert_eq!(report.created, vec!["users".to_string(), "posts".to_string()]);

    orm.repository::<User>()
        .unwrap()
        .save(&mut User::new("Yara", "yara@example.com", 33))
        .await
        .unwrap();

    let again = schema.migrate().await.unwrap();
    assert!(again.created.is_empty());
    assert_eq!(orm.repository::<User>().unwrap().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_drop_then_create_resets_the_table() {
    let orm = common::setup().await;
    common::seed_users(&orm).await;
    let schema = orm.schema();

    schema.drop_table::<User>().await.unwrap();
    assert!(!schema.has_table::<User>().await.unwrap());
    let err: QueryError = orm.query::<User>().unwrap().count().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::DatabaseError);

    schema.create_table::<User>().await.unwrap();
    assert_eq!(orm.repository::<User>().unwrap().count().await.unwrap(), 0);

    let err: QueryError = schema.create_table::<User>().await.unwrap_err().into();
    assert_eq!(err.code, ErrorCode::DatabaseError);
}

#[tokio::test]
async fn test_file_database_persists_across_connections() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("quarry.db");

    let mut config = file_config(&path);
    config.auto_migrate = true;
    let orm = OrmBuilder::new(config.clone()).register::<User>().connect().await.unwrap();
    let mut user = User::new("Zoe", "zoe@example.com", 29);
    orm.repository::<User>().unwrap().save(&mut user).await.unwrap();
    orm.close();

    let reopened = OrmBuilder::new(config).register::<User>().connect().await.unwrap();
    let found = reopened
        .repository::<User>()
        .unwrap()
        .find(user.id.unwrap())
        .await
        .unwrap();
    assert_eq!(found, Some(user));
}

#[tokio::test]
async fn test_missing_file_without_auto_create_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = file_config(&dir.path().join("absent.db"));
    config.auto_create_database = false;

    let orm = OrmBuilder::new(config).register::<User>().connect().await.unwrap();
    let err = orm.query::<User>().unwrap().count().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::ConnectionFailed);
}

#[test]
fn test_generated_ddl_matches_dialects() {
    let registry = quarry::Registry::new();
    let meta = registry.register::<Post>().unwrap();

    let sqlite = quarry::DdlGenerator::new(DialectFactory::for_kind(DialectKind::Sqlite));
    assert_eq!(
        sqlite.create_statements(&meta).unwrap(),
        vec![
            "CREATE TABLE \"posts\" (\n    \
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT,\n    \
             \"user_id\" INTEGER NOT NULL,\n    \
             \"title\" TEXT NOT NULL\n)"
                .to_string(),
            "CREATE INDEX \"idx_posts_user_id\" ON \"posts\" (\"user_id\")".to_string(),
        ]
    );

    let mysql = quarry::DdlGenerator::new(DialectFactory::for_kind(DialectKind::MySql));
    assert!(mysql.create_table(&meta).unwrap().contains("`title` VARCHAR(255) NOT NULL"));
}
