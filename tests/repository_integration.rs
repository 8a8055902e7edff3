//! Integration tests for repositories: save/find, soft deletes, hooks,
//! scopes, batches, chunked iteration and eager loading.

mod common;

use common::{Post, User, seed_users, setup};
use pretty_assertions::assert_eq;
use quarry::{ErrorCode, QueryError};

#[tokio::test]
async fn test_save_then_find_returns_equal_entity() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut user = User::new("Dana", "dana@example.com", 28);
    repo.save(&mut user).await.unwrap();
    let id = user.id.expect("generated key written back");

    let found = repo.find(id).await.unwrap().expect("row exists");
    assert_eq!(found, user);
}

#[tokio::test]
async fn test_save_updates_when_key_is_set() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    let mut users = seed_users(&orm).await;

    users[0].name = "Alicia".to_string();
    repo.save(&mut users[0]).await.unwrap();

    assert_eq!(repo.count().await.unwrap(), 3);
    let found = repo.find(users[0].id.unwrap()).await.unwrap().unwrap();
    assert_eq!(found.name, "Alicia");
}

#[tokio::test]
async fn test_update_of_missing_row_is_not_found() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut ghost = User::new("Ghost", "ghost@example.com", 1);
    ghost.id = Some(999);
    let err = repo.update(&mut ghost).await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_find_missing_is_none() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    assert_eq!(repo.find(42).await.unwrap(), None);
    assert!(!repo.exists(42).await.unwrap());
}

#[tokio::test]
async fn test_duplicate_unique_email_is_constraint_violation() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut first = User::new("Eve", "eve@example.com", 22);
    repo.save(&mut first).await.unwrap();

    let mut second = User::new("Eve Again", "eve@example.com", 23);
    let err = repo.save(&mut second).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UniqueConstraint);
    assert!(err.is_constraint_violation());
    assert_eq!(err.context.model.as_deref(), Some("User"));

    let count = orm
        .query::<User>()
        .unwrap()
        .where_eq("email", "eve@example.com")
        .count()
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_soft_delete_round_trip() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    let mut users = seed_users(&orm).await;
    let bob = &mut users[1];
    let id = bob.id.unwrap();

    repo.soft_delete(bob).await.unwrap();
    assert!(bob.deleted_at.is_some());
    assert_eq!(repo.find(id).await.unwrap(), None);
    assert_eq!(repo.count().await.unwrap(), 2);
    let trashed = repo.find_trashed().await.unwrap();
    assert_eq!(trashed.iter().map(|u| u.id).collect::<Vec<_>>(), vec![Some(id)]);

    repo.restore(bob).await.unwrap();
    assert_eq!(bob.deleted_at, None);
    assert_eq!(repo.find(id).await.unwrap().as_ref(), Some(&*bob));

    repo.delete(bob).await.unwrap();
    assert_eq!(repo.find_trashed().await.unwrap().len(), 1);
    repo.force_delete(bob).await.unwrap();
    assert!(repo.find_trashed().await.unwrap().is_empty());
    assert_eq!(
        orm.query::<User>().unwrap().with_trashed().count().await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_increment_then_decrement() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    let mut user = User::new("Finn", "finn@example.com", 20);
    repo.save(&mut user).await.unwrap();
    let id = user.id.unwrap();

    let query = || orm.query::<User>().unwrap().where_eq("id", id);
    assert_eq!(query().increment("age", 5).await.unwrap(), 1);
    assert_eq!(query().decrement("age", 2).await.unwrap(), 1);

    let found = repo.find(id).await.unwrap().unwrap();
    assert_eq!(found.age, 23);
}

#[tokio::test]
async fn test_before_create_hook_can_abort_and_mutate() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut invalid = User::new("Nobody", "", 30);
    let err = repo.save(&mut invalid).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::HookAborted);
    assert_eq!(invalid.id, None);
    assert_eq!(repo.count().await.unwrap(), 0);

    let mut shouty = User::new("Gus", "GUS@EXAMPLE.COM", 30);
    repo.save(&mut shouty).await.unwrap();
    assert_eq!(shouty.email, "gus@example.com");
    let stored = repo.find(shouty.id.unwrap()).await.unwrap().unwrap();
    assert_eq!(stored.email, "gus@example.com");
}

#[tokio::test]
async fn test_scopes_compose() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    let mut users = seed_users(&orm).await;

    assert_eq!(repo.scope("adults").count().await.unwrap(), 2);

    users[2].active = false;
    repo.save(&mut users[2]).await.unwrap();
    let active_adults = repo.scope("adults").scope("active").find_all().await.unwrap();
    assert_eq!(active_adults.len(), 1);
    assert_eq!(active_adults[0].name, "Alice");

    let err = repo.scope("missing").count().await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownScope);
}

#[tokio::test]
async fn test_batch_create_assigns_keys_in_order() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut batch = vec![
        User::new("H1", "h1@example.com", 1),
        User::new("H2", "h2@example.com", 2),
        User::new("H3", "h3@example.com", 3),
    ];
    assert_eq!(repo.batch_create(&mut batch).await.unwrap(), 3);

    let ids: Vec<i64> = batch.iter().map(|u| u.id.unwrap()).collect();
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    for user in &batch {
        let found = repo.find(user.id.unwrap()).await.unwrap().unwrap();
        assert_eq!(&found, user);
    }
}

#[tokio::test]
async fn test_batch_create_is_all_or_nothing() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();

    let mut batch = vec![
        User::new("I1", "same@example.com", 1),
        User::new("I2", "same@example.com", 2),
    ];
    let err = repo.batch_create(&mut batch).await.unwrap_err();
    assert!(err.is_constraint_violation());
    assert_eq!(repo.count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_chunk_pages_and_stops_on_error() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    seed_users(&orm).await;

    let mut sizes = Vec::new();
    repo.chunk(2, |batch| {
        sizes.push(batch.len());
        async { Ok(()) }
    })
    .await
    .unwrap();
    assert_eq!(sizes, vec![2, 1]);

    let mut calls = 0;
    let err = repo
        .chunk(1, |_| {
            calls += 1;
            async { Err(QueryError::invalid_operation("stop")) }
        })
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidOperation);
    assert_eq!(calls, 1);

    let err = repo.chunk(0, |_| async { Ok(()) }).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidParameter);
}

#[tokio::test]
async fn test_each_visits_in_key_order() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    seed_users(&orm).await;

    let mut names = Vec::new();
    repo.each(|user| {
        names.push(user.name);
        async { Ok(()) }
    })
    .await
    .unwrap();
    assert_eq!(names, vec!["Alice", "Bob", "Charlie"]);
}

#[tokio::test]
async fn test_eager_loading_both_directions() {
    let orm = setup().await;
    let users = seed_users(&orm).await;
    let alice = users[0].id.unwrap();
    let posts = orm.repository::<Post>().unwrap();

    let mut first = Post::new(alice, "First");
    let mut second = Post::new(alice, "Second");
    posts.save(&mut first).await.unwrap();
    posts.save(&mut second).await.unwrap();

    let rows = orm
        .query::<User>()
        .unwrap()
        .with(["posts"])
        .where_eq("id", alice)
        .find_records()
        .await
        .unwrap();
    let loaded = rows[0].get("posts").and_then(|p| p.as_array()).map(Vec::len);
    assert_eq!(loaded, Some(2));

    let post = posts
        .find_with_relations(first.id.unwrap(), &["author"])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(post.author.map(|a| a.name), Some("Alice".to_string()));

    let err = posts.find_with_relations(first.id.unwrap(), &["editor"]).await.unwrap_err();
    assert_eq!(err.code, ErrorCode::UnknownRelation);
}

#[tokio::test]
async fn test_decrement_by_minimum_is_exact() {
    let orm = setup().await;
    let repo = orm.repository::<User>().unwrap();
    let mut user = User::new("Nia", "nia@example.com", -1);
    repo.save(&mut user).await.unwrap();
    let id = user.id.unwrap();

    let query = orm.query::<User>().unwrap().where_eq("id", id);
    assert_eq!(query.decrement("age", i64::MIN).await.unwrap(), 1);

    let found = repo.find(id).await.unwrap().unwrap();
    assert_eq!(found.age, i64::MAX);
}
