use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;
use tower::ServiceExt;

fn write_tiny_corpus(dir: &std::path::Path) -> String {
    let corpus = serde_json::json!([
        {
            "text": "Quantum computers use qubits to represent information.",
            "keywords": ["quantum", "qubit"],
            "topic": "quantum"
        },
        {
            "text": "Solar panels convert sunlight into electricity.",
            "keywords": ["solar", "energy"],
            "topic": "energy",
            "meta": { "category": "technology" }
        }
    ]);
    let path = dir.join("corpus.json");
    fs::write(&path, corpus.to_string()).unwrap();
    path.to_string_lossy().to_string()
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let req = Request::get(uri).body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn post_json(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let resp = app.oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn query_returns_cited_answer() {
    let dir = tempdir().unwrap();
    let corpus = write_tiny_corpus(dir.path());
    let app = server::build_app(&corpus, None).unwrap();

    let (status, json) = get(app, "/query?q=what%20is%20quantum&session=t1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["query"], "what is quantum");
    assert_eq!(json["intent"], "definition");
    let citations = json["citations"].as_object().unwrap();
    assert!(!citations.is_empty());
    assert!(json["took_s"].as_f64().unwrap() >= 0.0);
}

#[tokio::test]
async fn empty_query_gets_the_greeting() {
    let dir = tempdir().unwrap();
    let corpus = write_tiny_corpus(dir.path());
    let app = server::build_app(&corpus, None).unwrap();

    let (status, json) = get(app, "/query?q=%20%20").await;
    assert_eq!(status, StatusCode::OK);
    assert!(json["main"].as_str().unwrap().contains("Ask me anything"));
    assert!(json["details"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn feedback_route_validates_delta() {
    let dir = tempdir().unwrap();
    let corpus = write_tiny_corpus(dir.path());
    let app = server::build_app(&corpus, None).unwrap();

    let (status, json) = post_json(
        app.clone(),
        "/feedback",
        serde_json::json!({ "session": "t1", "doc_id": 0, "delta": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");

    let (status, _) = post_json(
        app,
        "/feedback",
        serde_json::json!({ "session": "t1", "doc_id": 0, "delta": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn bookmarks_round_trip_through_the_api() {
    let dir = tempdir().unwrap();
    let corpus = write_tiny_corpus(dir.path());
    let app = server::build_app(&corpus, None).unwrap();

    let (status, _) = post_json(
        app.clone(),
        "/bookmark",
        serde_json::json!({ "session": "t1", "text": "what is quantum" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) = get(app, "/bookmarks?session=t1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn malformed_corpus_fails_at_startup() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.json");
    fs::write(&path, "[]").unwrap();
    assert!(server::build_app(&path.to_string_lossy(), None).is_err());
}

#[tokio::test]
async fn health_is_ok() {
    let dir = tempdir().unwrap();
    let corpus = write_tiny_corpus(dir.path());
    let app = server::build_app(&corpus, None).unwrap();
    let req = Request::get("/health").body(Body::empty()).unwrap();
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
