//! Integration tests for the HTTP collaborators.
//!
//! Each test spins up an Axum stub of the platform / model services on a
//! random port and drives the real clients against it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::{Value, json};
use tokio::net::TcpListener;

use reply_agent::channels::TwitterChannel;
use reply_agent::config::{GenerationConfig, RetrievalConfig, ServiceConfig, TwitterConfig};
use reply_agent::error::{ChannelError, InferenceError};
use reply_agent::inference::{HttpGenerator, HttpRetriever, HttpSpamClassifier};
use reply_agent::pipeline::types::{
    Generator, InboundMessage, InboundSource, MessageId, OutboundChannel, RetrievalResult,
    Retriever, SpamClassifier,
};

const TOKEN: &str = "test-token";

#[derive(Default)]
struct StubState {
    mention_queries: Mutex<Vec<HashMap<String, String>>>,
    tweets: Mutex<Vec<Value>>,
    likes: Mutex<Vec<(String, Value)>>,
    rate_limited: AtomicBool,
}

// ── Platform stub ───────────────────────────────────────────────────

async fn mentions(
    State(state): State<Arc<StubState>>,
    Path(user_id): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer test-token") {
        return (StatusCode::UNAUTHORIZED, "Unauthorized").into_response();
    }
    if state.rate_limited.load(Ordering::SeqCst) {
        let reset = Utc::now().timestamp() + 60;
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [("x-rate-limit-reset", reset.to_string())],
            "Too Many Requests",
        )
            .into_response();
    }
    assert_eq!(user_id, "42");
    let page_token = query.get("pagination_token").cloned();
    state.mention_queries.lock().unwrap().push(query);

    let body = match page_token.as_deref() {
        None => json!({
            "data": [
                {"id": "20", "text": "@replybot hello there", "author_id": "7", "created_at": "2021-11-15T18:40:00.000Z"},
                {"id": "18", "text": "@replybot our own post", "author_id": "42"}
            ],
            "includes": {"users": [{"id": "7", "username": "alice"}]},
            "meta": {"result_count": 2, "next_token": "p2"}
        }),
        Some("p2") => json!({
            "data": [
                {"id": "19", "text": "@replybot @alice me too", "author_id": "8"}
            ],
            "includes": {"users": [{"id": "8", "username": "bob"}]},
            "meta": {"result_count": 1}
        }),
        Some(_) => json!({"meta": {"result_count": 0}}),
    };
    Json(body).into_response()
}

async fn create_tweet(State(state): State<Arc<StubState>>, Json(body): Json<Value>) -> Response {
    if body["text"].as_str() == Some("fail") {
        return (StatusCode::SERVICE_UNAVAILABLE, "over capacity").into_response();
    }
    if body["reply"]["in_reply_to_tweet_id"].as_str() == Some("404") {
        return (
            StatusCode::FORBIDDEN,
            Json(json!({"detail": "You attempted to reply to a Tweet that is deleted or not visible to you."})),
        )
            .into_response();
    }
    state.tweets.lock().unwrap().push(body);
    (StatusCode::CREATED, Json(json!({"data": {"id": "99", "text": "ok"}}))).into_response()
}

async fn like(
    State(state): State<Arc<StubState>>,
    Path(user_id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    state.likes.lock().unwrap().push((user_id, body));
    Json(json!({"data": {"liked": true}})).into_response()
}

// ── Model stubs ─────────────────────────────────────────────────────

async fn predict(Json(body): Json<Value>) -> Json<Value> {
    let text = body["text"].as_str().unwrap_or_default();
    let label = if text.contains("spam") { 1 } else { 0 };
    Json(json!({ "label": label }))
}

async fn retrieve(Json(body): Json<Value>) -> Json<Value> {
    match body["text"].as_str().unwrap_or_default() {
        "hello" => Json(json!({"query": "hello", "answer": "hi , friend", "score": 11.0})),
        "weak" => Json(json!({"query": "weak", "answer": "meh", "score": 1.0})),
        _ => Json(json!({"query": null, "answer": null, "score": 0.0})),
    }
}

async fn generate(Json(body): Json<Value>) -> Json<Value> {
    let reply = format!(
        "{} n={} max={}",
        body["text"].as_str().unwrap_or_default(),
        body["num_return_sequences"],
        body["max_length"]
    );
    Json(json!({"candidates": ["", reply]}))
}

async fn broken() -> Response {
    (StatusCode::INTERNAL_SERVER_ERROR, "model crashed").into_response()
}

/// Start the stub on a random port, return (base url, state).
async fn start_server() -> (String, Arc<StubState>) {
    let state = Arc::new(StubState::default());
    let app = Router::new()
        .route("/2/users/{id}/mentions", get(mentions))
        .route("/2/tweets", post(create_tweet))
        .route("/2/users/{id}/likes", post(like))
        .route("/predict", post(predict))
        .route("/retrieve", post(retrieve))
        .route("/generate", post(generate))
        .route("/broken/generate", post(broken))
        .with_state(Arc::clone(&state));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    // Give the server a moment to start accepting connections.
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), state)
}

fn twitter(base: &str, token: &str) -> TwitterChannel {
    twitter_with_pages(base, token, 5)
}

fn twitter_with_pages(base: &str, token: &str, max_pages: u32) -> TwitterChannel {
    let config = TwitterConfig {
        api_base: format!("{base}/2"),
        user_id: "42".into(),
        username: "replybot".into(),
        token_env: "UNUSED".into(),
        max_results: 10,
        max_pages,
        timeout_secs: 5,
    };
    TwitterChannel::new(&config, token.to_string().into()).unwrap()
}

fn inbound(id: u64) -> InboundMessage {
    InboundMessage {
        id: MessageId(id),
        author_id: "7".into(),
        author_handle: "alice".into(),
        text: "hello there".into(),
        received_at: Utc::now(),
    }
}

// ── Twitter channel ─────────────────────────────────────────────────

#[tokio::test]
async fn mentions_follow_pagination_and_skip_own_posts() {
    let (base, state) = start_server().await;
    let channel = twitter(&base, TOKEN);

    let messages = channel.list_new_messages(Some(MessageId(10))).await.unwrap();
    let ids: Vec<u64> = messages.iter().map(|m| m.id.0).collect();
    assert_eq!(ids, vec![20, 19]);
    assert_eq!(messages[0].author_handle, "alice");
    assert_eq!(messages[0].text, "hello there");
    assert_eq!(messages[1].author_handle, "bob");
    assert_eq!(messages[1].text, "me too");

    let queries = state.mention_queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0].get("since_id").map(String::as_str), Some("10"));
    assert_eq!(queries[0].get("max_results").map(String::as_str), Some("10"));
    assert_eq!(queries[1].get("pagination_token").map(String::as_str), Some("p2"));
}

#[tokio::test]
async fn first_poll_without_cursor_reads_one_page() {
    let (base, state) = start_server().await;
    let channel = twitter(&base, TOKEN);

    let messages = channel.list_new_messages(None).await.unwrap();
    assert_eq!(messages.len(), 1);
    let queries = state.mention_queries.lock().unwrap().clone();
    assert_eq!(queries.len(), 1);
    assert!(!queries[0].contains_key("since_id"));
}

#[tokio::test]
async fn backlog_beyond_page_limit_is_a_fetch_error() {
    let (base, _state) = start_server().await;
    let err = twitter_with_pages(&base, TOKEN, 1)
        .list_new_messages(Some(MessageId(10)))
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::FetchFailed { .. }));
}

#[tokio::test]
async fn rate_limit_and_auth_errors_are_typed() {
    let (base, state) = start_server().await;

    let err = twitter(&base, "wrong-token")
        .list_new_messages(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::AuthFailed { .. }));

    state.rate_limited.store(true, Ordering::SeqCst);
    let err = twitter(&base, TOKEN)
        .list_new_messages(None)
        .await
        .unwrap_err();
    match err {
        ChannelError::RateLimited { retry_after, .. } => {
            let wait = retry_after.unwrap();
            assert!(wait <= Duration::from_secs(60));
        }
        other => panic!("expected rate limit, got {other:?}"),
    }
}

#[tokio::test]
async fn reply_and_like_hit_the_api() {
    let (base, state) = start_server().await;
    let channel = twitter(&base, TOKEN);

    channel.send_reply(&inbound(20), "@alice Hi there").await.unwrap();
    channel.acknowledge(&inbound(20)).await.unwrap();

    let tweets = state.tweets.lock().unwrap().clone();
    assert_eq!(tweets.len(), 1);
    assert_eq!(tweets[0]["text"], "@alice Hi there");
    assert_eq!(tweets[0]["reply"]["in_reply_to_tweet_id"], "20");

    let likes = state.likes.lock().unwrap().clone();
    assert_eq!(likes, vec![("42".to_string(), json!({"tweet_id": "20"}))]);
}

#[tokio::test]
async fn failed_reply_is_send_error() {
    let (base, _state) = start_server().await;
    let err = twitter(&base, TOKEN)
        .send_reply(&inbound(20), "fail")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::SendFailed { .. }));
}

#[tokio::test]
async fn reply_to_deleted_post_is_rejected() {
    let (base, state) = start_server().await;
    let err = twitter(&base, TOKEN)
        .send_reply(&inbound(404), "@alice Hi there")
        .await
        .unwrap_err();
    assert!(matches!(err, ChannelError::Rejected { .. }));
    assert!(state.tweets.lock().unwrap().is_empty());
}

// ── Model clients ───────────────────────────────────────────────────

#[tokio::test]
async fn spam_classifier_reads_label() {
    let (base, _state) = start_server().await;
    let classifier = HttpSpamClassifier::new(&ServiceConfig {
        endpoint: base,
        timeout_secs: 5,
    })
    .unwrap();

    assert!(classifier.predict("buy spam now").await.unwrap());
    assert!(!classifier.predict("hello").await.unwrap());
}

#[tokio::test]
async fn retriever_applies_threshold() {
    let (base, _state) = start_server().await;
    let retriever = HttpRetriever::new(&RetrievalConfig {
        endpoint: format!("{base}/"),
        min_score: 5.0,
        timeout_secs: 5,
    })
    .unwrap();

    match retriever.retrieve("hello").await.unwrap() {
        RetrievalResult::Matched(answer) => {
            assert_eq!(answer.reply, "hi , friend");
            assert_eq!(answer.score, 11.0);
        }
        RetrievalResult::NoMatch => panic!("expected a match"),
    }
    assert_eq!(retriever.retrieve("weak").await.unwrap(), RetrievalResult::NoMatch);
    assert_eq!(retriever.retrieve("unknown").await.unwrap(), RetrievalResult::NoMatch);
}

#[tokio::test]
async fn generator_sends_sizes_and_picks_candidate() {
    let (base, _state) = start_server().await;
    let generator = HttpGenerator::new(&GenerationConfig {
        endpoint: base,
        num_candidates: 3,
        max_length: 64,
        timeout_secs: 5,
    })
    .unwrap();

    let text = generator.generate("hello", 3, 64).await.unwrap();
    assert_eq!(text, "hello n=3 max=64");
}

#[tokio::test]
async fn generator_server_error_is_request_failure() {
    let (base, _state) = start_server().await;
    let generator = HttpGenerator::new(&GenerationConfig {
        endpoint: format!("{base}/broken"),
        num_candidates: 1,
        max_length: 64,
        timeout_secs: 5,
    })
    .unwrap();

    let err = generator.generate("hello", 1, 64).await.unwrap_err();
    assert!(matches!(err, InferenceError::RequestFailed { .. }));
}

#[tokio::test]
async fn unreachable_service_is_request_failure() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let classifier = HttpSpamClassifier::new(&ServiceConfig {
        endpoint: format!("http://127.0.0.1:{port}"),
        timeout_secs: 1,
    })
    .unwrap();
    let err = classifier.predict("hello").await.unwrap_err();
    assert!(matches!(err, InferenceError::RequestFailed { .. }));
}
