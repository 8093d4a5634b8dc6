//! Tests for cached reads: enable gating, deduplication, refetch on
//! invalidation

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeGateway, eventually, test_state};
use snapgram::hooks::options;
use snapgram::models::NewPost;
use snapgram::query::{QueryKey, QueryTag};

#[tokio::test]
async fn test_disabled_reads_never_call_gateway() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1"]));
    let state = test_state(gateway.clone());

    let by_id = state.post_by_id(None);
    let by_user = state.user_posts(Some(""));
    let user = state.user_by_id(None);
    let search = state.search_posts("");

    assert!(by_id.fetch().await.data.is_none());
    assert!(by_user.fetch().await.data.is_none());
    assert!(user.fetch().await.data.is_none());
    assert!(search.fetch().await.data.is_none());

    assert_eq!(gateway.calls("get_post_by_id"), 0);
    assert_eq!(gateway.calls("get_user_posts"), 0);
    assert_eq!(gateway.calls("get_user_by_id"), 0);
    assert_eq!(gateway.calls("search_posts"), 0);
}

#[tokio::test]
async fn test_concurrent_identical_reads_share_one_call() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1", "p2"]));
    gateway.set_delay(Duration::from_millis(30));
    let state = test_state(gateway.clone());

    let first = state.recent_posts();
    let second = state.recent_posts();
    let (a, b) = tokio::join!(first.fetch(), second.fetch());

    assert_eq!(gateway.calls("get_recent_posts"), 1);
    assert_eq!(a.data, b.data);
    assert_eq!(a.data.map(|posts| posts.len()), Some(2));
}

#[tokio::test]
async fn test_fresh_result_is_served_from_cache() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1"]));
    let state = test_state(gateway.clone());

    state.post_by_id(Some("p1")).fetch().await;
    let again = state.post_by_id(Some("p1")).fetch().await;

    assert_eq!(gateway.calls("get_post_by_id"), 1);
    assert_eq!(again.data.map(|post| post.id), Some("p1".to_string()));
}

#[tokio::test]
async fn test_post_by_id_activates_when_id_arrives() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1"]));
    let state = test_state(gateway.clone());

    let observer = state.post_by_id(None);
    let _mounted = observer.mount();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(gateway.calls("get_post_by_id"), 0);

    observer
        .set_options(options::post_by_id(&state.gateway, Some("p1")))
        .await;

    eventually(|| observer.data().is_some()).await;
    assert_eq!(gateway.calls("get_post_by_id"), 1);
    assert_eq!(observer.key().await, QueryKey::new(QueryTag::GetPostById).with("p1"));
}

#[tokio::test]
async fn test_create_post_refetches_mounted_recent_posts() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1"]));
    let state = test_state(gateway.clone());

    let recent = state.recent_posts();
    let _mounted = recent.mount();
    eventually(|| recent.data().is_some()).await;
    assert_eq!(gateway.calls("get_recent_posts"), 1);

    let created = state
        .create_post()
        .mutate(NewPost {
            creator: "u1".to_string(),
            caption: "fresh".to_string(),
            location: None,
            tags: vec![],
            image: None,
        })
        .await
        .unwrap();

    eventually(|| gateway.calls("get_recent_posts") == 2).await;
    eventually(|| {
        recent
            .data()
            .is_some_and(|posts| posts.iter().any(|post| post.id == created.id))
    })
    .await;
}

#[tokio::test]
async fn test_invalidated_data_stays_readable() {
    let gateway = Arc::new(FakeGateway::new().with_posts(&["p1"]));
    let state = test_state(gateway.clone());

    state.recent_posts().fetch().await;
    let key = QueryKey::new(QueryTag::GetRecentPosts);
    state.query_client.invalidate_queries(key.clone()).await;

    assert!(state.query_client.is_stale(&key).await);
    let cached = state
        .query_client
        .get_query_data::<Vec<snapgram::models::Post>>(&key)
        .await;
    assert_eq!(cached.map(|posts| posts.len()), Some(1));
}

#[tokio::test]
async fn test_failed_read_is_reported_and_not_cached() {
    let gateway = Arc::new(FakeGateway::new().with_users(&["u1"]));
    gateway.fail("get_users");
    let state = test_state(gateway.clone());

    let users = state.users(Some(10));
    let first = users.fetch().await;
    let second = users.fetch().await;

    assert!(first.is_error());
    assert!(first.error.is_some());
    assert!(second.is_error());
    assert_eq!(gateway.calls("get_users"), 2);
}

#[tokio::test]
async fn test_check_auth_user() {
    let gateway = Arc::new(FakeGateway::new().with_users(&["u1"]));
    let state = test_state(gateway.clone());
    assert_eq!(state.check_auth_user().await.unwrap(), None);

    let gateway = Arc::new(FakeGateway::new().with_users(&["u1"]).signed_in_as("u1"));
    let state = test_state(gateway);
    let user = state.check_auth_user().await.unwrap();
    assert_eq!(user.map(|user| user.id), Some("u1".to_string()));
}
