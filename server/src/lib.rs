use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use engine::corpus::load_corpus_file;
use engine::{Answer, AnswerEngine, RawFact, SessionStore};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

/// Shared application state. Sessions never share an engine; each session
/// id lazily gets its own engine over the same corpus and store.
#[derive(Clone)]
pub struct AppState {
    facts: Vec<RawFact>,
    store: SessionStore,
    engines: Arc<Mutex<HashMap<String, AnswerEngine>>>,
}

fn default_session() -> String {
    "default".to_string()
}

#[derive(Deserialize)]
pub struct QueryParams {
    pub q: String,
    #[serde(default = "default_session")]
    pub session: String,
}

#[derive(Serialize)]
pub struct QueryResponse {
    pub query: String,
    pub took_s: f64,
    #[serde(flatten)]
    pub answer: Answer,
}

#[derive(Deserialize)]
pub struct FeedbackBody {
    #[serde(default = "default_session")]
    pub session: String,
    pub doc_id: u32,
    pub delta: i32,
}

#[derive(Deserialize)]
pub struct BookmarkBody {
    #[serde(default = "default_session")]
    pub session: String,
    pub text: String,
}

#[derive(Deserialize)]
pub struct SessionParams {
    #[serde(default = "default_session")]
    pub session: String,
}

pub fn build_app(corpus_path: &str, store_dir: Option<&str>) -> Result<Router> {
    let facts = load_corpus_file(corpus_path)?;
    let store = match store_dir {
        Some(dir) => SessionStore::open(dir),
        None => SessionStore::disabled(),
    };
    // Fail fast at startup if the corpus cannot be indexed at all.
    AnswerEngine::new(facts.clone(), "startup-probe", SessionStore::disabled())?;
    tracing::info!(facts = facts.len(), "corpus loaded");

    // CORS: read CORS_ALLOW_ORIGIN (comma-separated) or allow Any by default
    let cors = match std::env::var("CORS_ALLOW_ORIGIN") {
        Ok(val) => {
            let origins: Vec<_> = val
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if origins.is_empty() {
                CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any)
            } else {
                CorsLayer::new()
                    .allow_origin(AllowOrigin::list(origins))
                    .allow_methods(Any)
                    .allow_headers(Any)
            }
        }
        Err(_) => CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any),
    };

    let state = AppState {
        facts,
        store,
        engines: Arc::new(Mutex::new(HashMap::new())),
    };
    let app = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/query", get(query_handler))
        .route("/feedback", post(feedback_handler))
        .route("/bookmark", post(bookmark_handler))
        .route("/bookmarks", get(bookmarks_handler))
        .with_state(state)
        .layer(cors);
    Ok(app)
}

/// Run a closure against the session's engine, creating it on first use.
/// One query is fully processed before the next; the lock enforces that.
fn with_engine<T>(
    state: &AppState,
    session: &str,
    f: impl FnOnce(&mut AnswerEngine) -> T,
) -> Result<T> {
    let mut engines = state.engines.lock();
    let engine = match engines.entry(session.to_string()) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(v) => v.insert(AnswerEngine::new(
            state.facts.clone(),
            session,
            state.store.clone(),
        )?),
    };
    Ok(f(engine))
}

fn internal_error(err: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}

pub async fn query_handler(
    State(state): State<AppState>,
    Query(params): Query<QueryParams>,
) -> Result<Json<QueryResponse>, (StatusCode, String)> {
    let start = std::time::Instant::now();
    let answer = with_engine(&state, &params.session, |engine| {
        engine.process_query(&params.q)
    })
    .map_err(internal_error)?;
    Ok(Json(QueryResponse {
        query: params.q,
        took_s: start.elapsed().as_secs_f64(),
        answer,
    }))
}

pub async fn feedback_handler(
    State(state): State<AppState>,
    Json(body): Json<FeedbackBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    let outcome = with_engine(&state, &body.session, |engine| {
        engine.apply_feedback(body.doc_id, body.delta)
    })
    .map_err(internal_error)?;
    match outcome {
        Ok(()) => Ok(Json(serde_json::json!({ "status": "ok" }))),
        Err(err) => Err((StatusCode::BAD_REQUEST, err.to_string())),
    }
}

pub async fn bookmark_handler(
    State(state): State<AppState>,
    Json(body): Json<BookmarkBody>,
) -> Result<Json<serde_json::Value>, (StatusCode, String)> {
    with_engine(&state, &body.session, |engine| engine.save_query(&body.text))
        .map_err(internal_error)?;
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

pub async fn bookmarks_handler(
    State(state): State<AppState>,
    Query(params): Query<SessionParams>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    let bookmarks = with_engine(&state, &params.session, |engine| {
        engine.bookmarks().to_vec()
    })
    .map_err(internal_error)?;
    Ok(Json(bookmarks))
}
