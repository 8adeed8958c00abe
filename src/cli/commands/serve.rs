//! HTTP server for the chat widget.
//!
//! Serves the page at `/` and a JSON API the page drives: sessions, questions
//! and feedback.

use crate::bot::{Event, Kingbot, View};
use crate::cli::preflight::{self, Operation};
use crate::cli::Output;
use crate::config::{MainSettings, SideSettings, Settings};
use crate::error::KingbotError;
use crate::feedback::FeedbackEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("index.html");

/// Shared application state.
struct AppState {
    bot: Kingbot,
}

/// Run the HTTP server.
pub async fn run_serve(host: &str, port: u16, settings: Settings) -> anyhow::Result<()> {
    if let Err(e) = preflight::check(Operation::Chat, &settings) {
        Output::error(&e.to_string());
        return Err(e.into());
    }

    let bot = Kingbot::new(settings)?;
    let sweep_every = sweep_interval(bot.settings().session.idle_timeout_secs);
    let state = Arc::new(AppState { bot });

    let sweeper = state.clone();
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_every);
        loop {
            ticker.tick().await;
            sweeper.bot.sweep_idle_sessions().await;
        }
    });

    let app = router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    Output::header("Kingbot");
    println!();
    Output::success(&format!("Listening on http://{}", addr));
    println!();
    println!("Endpoints:");
    Output::kv("Chat page", "GET    /");
    Output::kv("Health", "GET    /health");
    Output::kv("Page config", "GET    /api/config");
    Output::kv("New session", "POST   /api/sessions");
    Output::kv("Session view", "GET    /api/sessions/{id}");
    Output::kv("End session", "DELETE /api/sessions/{id}");
    Output::kv("Ask", "POST   /api/sessions/{id}/query");
    Output::kv("Feedback", "POST   /api/sessions/{id}/feedback");
    println!();
    Output::info("Press Ctrl+C to stop the server.");

    info!("Serving on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/api/config", get(page_config))
        .route("/api/sessions", post(create_session))
        .route("/api/sessions/{id}", get(get_session).delete(delete_session))
        .route("/api/sessions/{id}/query", post(query))
        .route("/api/sessions/{id}/feedback", post(feedback))
        .layer(cors)
        .with_state(state)
}

/// Sweep often enough to honor the timeout, but at most once a minute.
fn sweep_interval(idle_timeout_secs: u64) -> Duration {
    Duration::from_secs(idle_timeout_secs.clamp(1, 60))
}

// === Request/Response Types ===

#[derive(Deserialize)]
struct QueryRequest {
    /// Free text from the input box
    #[serde(default)]
    text: Option<String>,
    /// Index of a quick question button
    #[serde(default)]
    button: Option<usize>,
}

#[derive(Serialize)]
struct PageConfigResponse<'a> {
    page_title: &'a str,
    side: &'a SideSettings,
    main: &'a MainSettings,
    buttons: Vec<&'a str>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(e: KingbotError) -> Response {
    let status = match &e {
        KingbotError::SessionBusy => StatusCode::CONFLICT,
        KingbotError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        KingbotError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    debug!(status = %status, "Request failed: {}", e);
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
        .into_response()
}

fn view_response(result: crate::error::Result<View>) -> Response {
    match result {
        Ok(view) => Json(view).into_response(),
        Err(e) => error_response(e),
    }
}

// === Handlers ===

async fn index() -> impl IntoResponse {
    Html(INDEX_HTML)
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn page_config(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let ui = &state.bot.settings().ui;
    Json(PageConfigResponse {
        page_title: &ui.page_title,
        side: &ui.side,
        main: &ui.main,
        buttons: ui.buttons.iter().map(|b| b.label.as_str()).collect(),
    })
    .into_response()
}

async fn create_session(State(state): State<Arc<AppState>>) -> Response {
    let id = state.bot.open_session().await;
    match state.bot.view(id).await {
        Ok(view) => (StatusCode::CREATED, Json(view)).into_response(),
        Err(e) => error_response(e),
    }
}

async fn get_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    view_response(state.bot.view(id).await)
}

async fn delete_session(State(state): State<Arc<AppState>>, Path(id): Path<Uuid>) -> Response {
    if state.bot.close_session(id).await {
        StatusCode::NO_CONTENT.into_response()
    } else {
        error_response(KingbotError::SessionNotFound(id.to_string()))
    }
}

async fn query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<QueryRequest>,
) -> Response {
    let event = match (req.text, req.button) {
        (Some(text), None) => Event::Query { text },
        (None, Some(index)) => Event::QuickQuestion { index },
        _ => {
            return error_response(KingbotError::InvalidInput(
                "expected exactly one of 'text' or 'button'".to_string(),
            ))
        }
    };
    view_response(state.bot.dispatch(id, event).await)
}

async fn feedback(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<FeedbackEvent>,
) -> Response {
    view_response(state.bot.dispatch(id, Event::Feedback(req)).await)
}
