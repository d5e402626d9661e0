//! HTTP routes for opscopilot-server
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/ai/summarize` | cached JSON result or an SSE chunk stream |
//! | `GET /api/ai/providers` | usable backends and the default |
//! | `GET`/`PUT /api/settings` | masked provider settings |
//! | `POST /api/tickets` | create a ticket |
//! | `PATCH /api/tickets/{id}` | edit a ticket; drops its cached summary |

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Request, State};
use axum::http::header::AUTHORIZATION;
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use futures::StreamExt;
use opscopilot_core::request::TicketFields;
use opscopilot_core::{
    available_providers, Database, Error, SettingsUpdate, SettingsView, SummarizeRequest,
    SummaryOutcome, Summarizer, ValidationErrors,
};
use serde::de::DeserializeOwned;
use serde_json::json;

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub summarizer: Summarizer,
    /// Bearer token required on every route when set
    pub auth_token: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ai/summarize", post(summarize))
        .route("/api/ai/providers", get(providers))
        .route("/api/settings", get(get_settings).put(put_settings))
        .route("/api/tickets", post(create_ticket))
        .route("/api/tickets/{id}", patch(update_ticket))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_token))
        .with_state(state)
}

// ============================================
// Errors
// ============================================

/// Core error rendered as a JSON error response.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self.0 {
            Error::Validation(details) => (
                StatusCode::BAD_REQUEST,
                json!({ "error": "Validation failed", "details": details }),
            ),
            Error::TicketNotFound(_) => {
                (StatusCode::NOT_FOUND, json!({ "error": "Ticket not found" }))
            }
            Error::ProviderNotConfigured { message, .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, json!({ "error": message }))
            }
            other => {
                tracing::error!(error = %other, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn parse_body<T: DeserializeOwned>(bytes: &[u8]) -> ApiResult<T> {
    serde_json::from_slice(bytes).map_err(|e| {
        let mut errors = ValidationErrors::default();
        errors.add("body", format!("invalid JSON body: {e}"));
        ApiError(Error::Validation(errors))
    })
}

// ============================================
// Auth
// ============================================

async fn require_token(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.auth_token.as_deref() else {
        return next.run(request).await;
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    if presented == Some(expected) {
        next.run(request).await
    } else {
        tracing::debug!(path = %request.uri().path(), "Rejected request without valid token");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Unauthorized" })),
        )
            .into_response()
    }
}

// ============================================
// Handlers
// ============================================

async fn summarize(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let request = SummarizeRequest::from_json(&body).map_err(Error::Validation)?;

    match state.summarizer.summarize(request).await? {
        SummaryOutcome::Cached(result) => {
            Ok(Json(json!({ "data": result, "cached": true })).into_response())
        }
        SummaryOutcome::Streaming { chunks, .. } => {
            let events = chunks.map(|chunk| {
                let event = Event::default().json_data(&chunk).unwrap_or_else(|e| {
                    tracing::error!(error = %e, "Failed to encode stream chunk");
                    Event::default().data(r#"{"type":"error","message":"Failed to generate summary."}"#)
                });
                Ok::<_, Infallible>(event)
            });
            Ok(Sse::new(events).into_response())
        }
    }
}

async fn providers(State(state): State<AppState>) -> ApiResult<Response> {
    let settings = state.summarizer.settings().current()?;
    Ok(Json(json!({
        "providers": available_providers(&settings),
        "default": settings.default_provider,
    }))
    .into_response())
}

async fn get_settings(State(state): State<AppState>) -> ApiResult<Json<SettingsView>> {
    let settings = state.summarizer.settings().current()?;
    Ok(Json(SettingsView::from(&settings)))
}

async fn put_settings(State(state): State<AppState>, body: Bytes) -> ApiResult<Json<SettingsView>> {
    let update: SettingsUpdate = parse_body(&body)?;
    let settings = state.summarizer.settings().update(update)?;
    Ok(Json(SettingsView::from(&settings)))
}

async fn create_ticket(State(state): State<AppState>, body: Bytes) -> ApiResult<Response> {
    let fields: TicketFields = parse_body(&body)?;
    let content = fields.validate_new().map_err(Error::Validation)?;
    let ticket = state.db.create_ticket(&content.title, &content.description)?;
    tracing::info!(ticket_id = %ticket.id, "Ticket created");
    Ok((StatusCode::CREATED, Json(ticket)).into_response())
}

async fn update_ticket(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ApiResult<Response> {
    let fields: TicketFields = parse_body(&body)?;
    let fields = fields.validate_patch().map_err(Error::Validation)?;

    let update = state
        .db
        .update_ticket_content(&id, fields.title.as_deref(), fields.description.as_deref())?
        .ok_or(Error::TicketNotFound(id))?;
    Ok(Json(update.ticket).into_response())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
    use http_body_util::BodyExt;
    use opscopilot_core::config::AiConfig;
    use opscopilot_core::{SettingsStore, StreamChunk, StructuredResult, SummaryCache};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    fn state_with(config: AiConfig, auth_token: Option<&str>) -> AppState {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let settings = Arc::new(SettingsStore::new(db.clone(), config).with_env(|_| None));
        AppState {
            summarizer: Summarizer::new(db.clone(), db.clone(), settings, Duration::from_secs(30)),
            db,
            auth_token: auth_token.map(Arc::from),
        }
    }

    fn state() -> AppState {
        state_with(AiConfig::default(), None)
    }

    fn request(method: &str, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Response) {
        let response = router(state.clone()).oneshot(req).await.unwrap();
        (response.status(), response)
    }

    async fn json_body(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn sse_chunks(response: Response) -> Vec<StreamChunk> {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec())
            .unwrap()
            .lines()
            .filter_map(|line| line.strip_prefix("data: "))
            .map(|json| serde_json::from_str(json).unwrap())
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_summarize_streams_sse() {
        let state = state();
        let (status, response) = send(
            &state,
            request(
                "POST",
                "/api/ai/summarize",
                json!({ "title": "Crash on upload", "description": "Uploading a PNG crashes the app." }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            response.headers()[CONTENT_TYPE].to_str().unwrap(),
            "text/event-stream"
        );
        assert_eq!(response.headers()[CACHE_CONTROL].to_str().unwrap(), "no-cache");

        let chunks = sse_chunks(response).await;
        assert!(matches!(chunks.last(), Some(StreamChunk::Done { .. })));
    }

    #[tokio::test]
    async fn test_summarize_cache_hit_is_plain_json() {
        let state = state();
        let ticket = state
            .db
            .create_ticket("Slow search", "Search takes ten seconds on large projects.")
            .unwrap();
        let result = opscopilot_core::providers::mock::build_result(&ticket.content());
        state
            .db
            .put(&ticket.id, &result, Duration::from_secs(60))
            .unwrap();

        let (status, response) = send(
            &state,
            request("POST", "/api/ai/summarize", json!({ "ticketId": ticket.id })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["cached"], true);
        let data: StructuredResult = serde_json::from_value(body["data"].clone()).unwrap();
        assert_eq!(data, result);
    }

    #[tokio::test]
    async fn test_summarize_pre_stream_failures() {
        let state = state();

        let (status, response) =
            send(&state, request("POST", "/api/ai/summarize", json!({ "title": "x" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Validation failed");
        assert!(body["details"]["description"].is_array());

        let (status, _) = send(
            &state,
            request("POST", "/api/ai/summarize", json!({ "ticketId": "nope" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, response) = send(
            &state,
            request(
                "POST",
                "/api/ai/summarize",
                json!({ "title": "Broken login", "description": "Nobody can sign in.", "provider": "gemini" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error"], "Gemini API key is not configured");
    }

    #[tokio::test]
    async fn test_auth_token_is_enforced() {
        let state = state_with(AiConfig::default(), Some("secret"));

        let (status, response) = send(
            &state,
            Request::builder()
                .uri("/api/ai/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(json_body(response).await["error"], "Unauthorized");

        let (status, _) = send(
            &state,
            Request::builder()
                .uri("/api/ai/providers")
                .header(AUTHORIZATION, "Bearer secret")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_providers_and_settings_round_trip() {
        let state = state();

        let (_, response) = send(
            &state,
            Request::builder()
                .uri("/api/ai/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(
            json_body(response).await,
            json!({ "providers": ["mock"], "default": "mock" })
        );

        let (status, response) = send(
            &state,
            request(
                "PUT",
                "/api/settings",
                json!({ "defaultProvider": "anthropic", "anthropicApiKey": "sk-ant-12345678" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let view = json_body(response).await;
        assert_eq!(view["defaultProvider"], "anthropic");
        assert_eq!(view["anthropicApiKey"], "•••••••••••5678");

        // Sending the masked value back leaves the key alone
        send(
            &state,
            request("PUT", "/api/settings", json!({ "anthropicApiKey": "•••••••••••5678" })),
        )
        .await;
        let settings = state.summarizer.settings().current().unwrap();
        assert_eq!(settings.anthropic.credential(), Some("sk-ant-12345678"));

        let (_, response) = send(
            &state,
            Request::builder()
                .uri("/api/ai/providers")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(
            json_body(response).await,
            json!({ "providers": ["mock", "anthropic"], "default": "anthropic" })
        );

        let (status, _) = send(&state, request("PUT", "/api/settings", json!({ "cacheTtlMs": 0 }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ticket_edit_invalidates_cached_summary() {
        let state = state();
        let (status, response) = send(
            &state,
            request(
                "POST",
                "/api/tickets",
                json!({ "title": "Billing export", "description": "Export invoices as CSV files." }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let id = json_body(response).await["id"].as_str().unwrap().to_string();

        let result = opscopilot_core::providers::mock::build_result(
            &state.db.get_ticket(&id).unwrap().unwrap().content(),
        );
        state.db.put(&id, &result, Duration::from_secs(60)).unwrap();

        let (status, response) = send(
            &state,
            request(
                "PATCH",
                &format!("/api/tickets/{id}"),
                json!({ "title": "Billing export to CSV" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json_body(response).await["title"], "Billing export to CSV");
        assert!(state.db.cache_entry(&id).unwrap().is_none());

        let (status, _) = send(
            &state,
            request("PATCH", "/api/tickets/missing", json!({ "title": "Anything" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
