//! Integration tests for the HTTP client against a mock posts server.
//!
//! Each test starts its own wiremock server mounted under `/api`, matching
//! the base path the real backend is served from.

use postfeed::api::{ApiError, HttpApi, PageRequest, PostQuery, PostsApi};
use postfeed::model::{AuthorType, FeedCreate, Tag};
use postfeed::query::{ClientOptions, QueryClient, RetryPolicy};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn post_json(id: &str, tags: &[&str]) -> serde_json::Value {
    json!({
        "id": id,
        "channel_name": "AI Engineering",
        "channel_username": "aieng",
        "content": format!("post {id}"),
        "media_urls": [],
        "original_url": format!("https://t.me/aieng/{id}"),
        "published_at": "2024-05-01T12:00:00Z",
        "tags": tags
            .iter()
            .map(|t| json!({"name": t, "author_type": "llm", "created_at": "2024-05-01T12:00:00Z"}))
            .collect::<Vec<_>>(),
        "is_bookmarked": false,
        "created_at": "2024-05-01T12:00:00Z"
    })
}

fn api_for(server: &MockServer) -> HttpApi {
    HttpApi::new(&format!("{}/api", server.uri()), None).unwrap()
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_list_posts_sends_filters_as_query() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .and(query_param("limit", "20"))
        .and(query_param("offset", "20"))
        .and(query_param("tags", "tutorial,educational"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [post_json("3", &["tutorial"])],
            "total": 21,
            "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    let page = api
        .list_posts(&PostQuery {
            page: PageRequest::new(2, 20),
            tags: Some(vec!["tutorial".into(), "educational".into()]),
            ..PostQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(page.total, 21);
    assert_eq!(page.data[0].id, "3");
    assert!(page.data[0].has_tag("tutorial"));
}

#[tokio::test]
async fn test_feeds_accept_numeric_ids() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feeds"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "feeds": [
                {"id": "all", "name": "All Posts", "tag_filters": []},
                {"id": 7, "name": "Tutorials", "tag_filters": ["tutorial"], "created_at": "2024-05-01T12:00:00Z"}
            ]
        })))
        .mount(&server)
        .await;

    let feeds = api_for(&server).list_feeds().await.unwrap();
    let ids: Vec<&str> = feeds.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["all", "7"]);
    assert!(!feeds[0].is_deletable());
}

#[tokio::test]
async fn test_bare_tag_listing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"id": 1, "name": "llm", "author_type": "llm", "usage_count": 12},
            {"id": 2, "name": "important", "author_type": "human", "usage_count": 1}
        ])))
        .mount(&server)
        .await;

    let tags = api_for(&server).list_tags().await.unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].count, 12);
    assert_eq!(tags[1].source, AuthorType::Human);
}

#[tokio::test]
async fn test_search_sends_query_and_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/search"))
        .and(query_param("q", "fine-tune"))
        .and(query_param("limit", "20"))
        .and(query_param("offset", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [], "total": 0, "has_more": false
        })))
        .expect(1)
        .mount(&server)
        .await;

    let api: Arc<dyn PostsApi> = Arc::new(api_for(&server));
    let client = QueryClient::new(api, ClientOptions::default());
    let page = client
        .search(" fine-tune ", PageRequest::default())
        .await
        .unwrap();
    assert!(page.data.is_empty());
}

// ============================================================================
// Errors
// ============================================================================

#[tokio::test]
async fn test_missing_post_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = api_for(&server).get_post("404").await.unwrap_err();
    assert!(matches!(err, ApiError::NotFound(_)));
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/channels"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = api_for(&server).list_channels().await.unwrap_err();
    assert!(matches!(err, ApiError::Decode(_)));
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/feeds"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"feeds": []}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let api = HttpApi::new(
        &format!("{}/api", server.uri()),
        Some(Duration::from_millis(50)),
    )
    .unwrap();
    let err = api.list_feeds().await.unwrap_err();
    assert!(matches!(err, ApiError::Timeout));
}

#[tokio::test]
async fn test_server_errors_retried_through_query_client() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/channels"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let api: Arc<dyn PostsApi> = Arc::new(api_for(&server));
    let client = QueryClient::new(
        api,
        ClientOptions {
            cache_capacity: 16,
            retry: RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(5),
            },
        },
    );

    let err = client.channels().await.unwrap_err();
    assert!(matches!(err.api_error(), Some(ApiError::HttpStatus(502))));
}

#[tokio::test]
async fn test_post_listing_errors_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/posts"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let api: Arc<dyn PostsApi> = Arc::new(api_for(&server));
    let client = QueryClient::new(api, ClientOptions::default());
    assert!(client.posts(&PostQuery::default()).await.is_err());
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_update_tags_sends_names_and_authors() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/api/posts/3/tags"))
        .and(body_json(json!({
            "tags": [
                {"name": "tutorial", "author_type": "llm"},
                {"name": "must-read", "author_type": "human"}
            ]
        })))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(post_json("3", &["tutorial", "must-read"])),
        )
        .expect(1)
        .mount(&server)
        .await;

    let tags = vec![
        Tag {
            name: "tutorial".to_string(),
            author_type: AuthorType::Llm,
            created_at: None,
        },
        Tag::human("Must-Read"),
    ];
    let post = api_for(&server).update_post_tags("3", &tags).await.unwrap();
    assert_eq!(post.tags.len(), 2);
}

#[tokio::test]
async fn test_bookmark_endpoints() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/bookmarks/42"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"status": "ok"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/bookmarks/42"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let api = api_for(&server);
    api.add_bookmark("42").await.unwrap();
    api.remove_bookmark("42").await.unwrap();
}

#[tokio::test]
async fn test_create_feed_posts_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/feeds"))
        .and(body_json(json!({"name": "Rust", "tag_filters": ["rust"]})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "id": 9, "name": "Rust", "tag_filters": ["rust"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let feed = api_for(&server)
        .create_feed(&FeedCreate {
            name: "Rust".to_string(),
            tag_filters: vec!["rust".to_string()],
        })
        .await
        .unwrap();
    assert_eq!(feed.id, "9");
}
