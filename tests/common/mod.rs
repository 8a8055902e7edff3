//! Models and setup shared by the integration tests.

#![allow(dead_code)]

use quarry::{Column, DatabaseConfig, LogicalType, Model, ModelSchema, Orm, OrmBuilder, QueryError};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: Option<i64>,
    pub name: String,
    pub email: String,
    pub age: i64,
    pub active: bool,
    pub deleted_at: Option<String>,
}

impl User {
    pub fn new(name: &str, email: &str, age: i64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            email: email.to_string(),
            age,
            active: true,
            deleted_at: None,
        }
    }
}

impl Model for User {
    fn schema() -> ModelSchema<Self> {
        ModelSchema::<Self>::new()
            .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
            .column(Column::new("name", LogicalType::String).index())
            .column(Column::new("email", LogicalType::String).unique())
            .column(Column::new("age", LogicalType::Integer))
            .column(Column::new("active", LogicalType::Boolean).default_value(true))
            .column(Column::new("deleted_at", LogicalType::DateTime).nullable())
            .soft_delete("deleted_at")
            .has_many::<Post>("posts", "user_id")
            .scope("adults", |q| q.r#where("age", ">=", 18))
            .scope("active", |q| q.where_eq("active", true))
            .before_create(|user| {
                if user.email.is_empty() {
                    return Err(QueryError::invalid_parameter("email is required"));
                }
                user.email = user.email.to_lowercase();
                Ok(())
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub id: Option<i64>,
    pub user_id: i64,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Box<User>>,
}

impl Post {
    pub fn new(user_id: i64, title: &str) -> Self {
        Self {
            id: None,
            user_id,
            title: title.to_string(),
            author: None,
        }
    }
}

impl Model for Post {
    fn schema() -> ModelSchema<Self> {
        ModelSchema::<Self>::new()
            .column(Column::new("id", LogicalType::BigInt).primary_key().auto_increment())
            .column(Column::new("user_id", LogicalType::BigInt).index())
            .column(Column::new("title", LogicalType::String))
            .belongs_to::<User>("author", "user_id")
    }
}

/// A fresh in-memory database with `User` and `Post` tables.
pub async fn setup() -> Orm {
    let mut config = DatabaseConfig::sqlite_memory();
    config.auto_migrate = true;
    OrmBuilder::new(config)
        .register::<User>()
        .register::<Post>()
        .connect()
        .await
        .unwrap()
}

/// Save Alice, Bob and Charlie, in that order.
pub async fn seed_users(orm: &Orm) -> Vec<User> {
    let repo = orm.repository::<User>().unwrap();
    let mut users = vec![
        User::new("Alice", "alice@example.com", 30),
        User::new("Bob", "bob@example.com", 17),
        User::new("Charlie", "charlie@example.com", 45),
    ];
    for user in &mut users {
        repo.save(user).await.unwrap();
    }
    users
}
