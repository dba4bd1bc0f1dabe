use std::net::SocketAddr;
use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use serde_json::{Map, Value as JsonValue, json};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::config::RelayConfig;
use crate::client::endpoint_url;
use super::error::{Capability, RelayError};
use super::extractor::CallerIdentity;
use super::state::RelayState;

/// Business capabilities: relay path and the upstream path it forwards to.
const BUSINESS_ROUTES: [(&str, &str); 4] = [
    ("/api/redeem", "/api/gift/redeem"),
    ("/api/check-balance", "/api/gift/check-balance"),
    ("/api/register-card", "/api/gift/register-card"),
    ("/api/personalize-pin", "/api/gift/personalize-pin"),
];

const PAYLOAD_KEYS: [&str; 2] = ["cardData", "formData"];

/// Create the relay router.
pub fn relay_routes(config: RelayConfig) -> Router {
    let state = RelayState::new(config);

    let mut router = Router::new()
        .route("/api/validate-token", post(validate_token))
        .route("/api/status/{token}", get(status))
        .route("/health", get(health));

    for (path, upstream) in BUSINESS_ROUTES {
        router = router.route(
            path,
            post(
                move |state: State<RelayState>, caller: CallerIdentity, body: Bytes| {
                    business(state, caller, body, upstream)
                },
            ),
        );
    }

    router.with_state(state)
}

/// Bind `0.0.0.0:{port}` and serve the relay until the process stops.
///
/// # Errors
///
/// Returns the I/O error if the port cannot be bound or the server fails.
pub async fn serve(config: RelayConfig) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, backend = %config.backend_url, "Gift relay listening");

    axum::serve(
        listener,
        relay_routes(config).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

// ── Validation ─────────────────────────────────────────────────────

async fn validate_token(
    State(state): State<RelayState>,
    caller: CallerIdentity,
    body: Bytes,
) -> Result<Response, RelayError> {
    let body = parse_body(&body);
    let token = required_token(&body).ok_or(RelayError::MissingInput(Capability::Validation))?;

    let upstream = Upstream {
        state: &state,
        capability: Capability::Validation,
        timeout: state.config.validate_timeout,
    };
    upstream
        .post("/api/auth/validate-token", &caller, &json!({ "token": token }))
        .await
}

// ── Business ───────────────────────────────────────────────────────

async fn business(
    State(state): State<RelayState>,
    caller: CallerIdentity,
    body: Bytes,
    upstream_path: &'static str,
) -> Result<Response, RelayError> {
    let body = parse_body(&body);
    let missing = || RelayError::MissingInput(Capability::Business);
    let token = required_token(&body).ok_or_else(missing)?;

    let mut forwarded = Map::new();
    forwarded.insert("token".into(), JsonValue::String(token.into()));
    for key in PAYLOAD_KEYS {
        if let Some(payload) = body.get(key).filter(|v| !v.is_null()) {
            forwarded.insert(key.into(), payload.clone());
        }
    }
    if forwarded.len() == 1 {
        return Err(missing());
    }

    let upstream = Upstream {
        state: &state,
        capability: Capability::Business,
        timeout: state.config.business_timeout,
    };
    upstream
        .post(upstream_path, &caller, &JsonValue::Object(forwarded))
        .await
}

// ── Status ─────────────────────────────────────────────────────────

async fn status(
    State(state): State<RelayState>,
    caller: CallerIdentity,
    Path(token): Path<String>,
) -> Result<Response, RelayError> {
    let path = format!("/api/gift/status/{}", urlencoding::encode(&token));
    let url = endpoint(&state, &path, Capability::Status)?;

    let mut request = state.http.get(url).timeout(state.config.status_timeout);
    if let Some(ip) = &caller.ip {
        request = request.header("X-Forwarded-For", ip).header("X-Real-IP", ip);
    }

    let response = request
        .send()
        .await
        .and_then(reqwest::Response::error_for_status)
        .map_err(|e| RelayError::from_reqwest(Capability::Status, &e))?;
    let body = response
        .bytes()
        .await
        .map_err(|e| RelayError::from_reqwest(Capability::Status, &e))?;

    Ok(json_response(StatusCode::OK, body))
}

// ── Health ─────────────────────────────────────────────────────────

async fn health(State(state): State<RelayState>) -> Response {
    match probe_backend(&state).await {
        Ok(backend) => Json(json!({
            "status": "healthy",
            "giftService": "operational",
            "backend": backend,
            "timestamp": OffsetDateTime::now_utc().format(&Rfc3339).unwrap_or_default(),
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(error = %e, "Backend health probe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "degraded",
                    "giftService": "operational",
                    "backend": "unavailable",
                    "error": e,
                })),
            )
                .into_response()
        }
    }
}

async fn probe_backend(state: &RelayState) -> Result<JsonValue, String> {
    let url = endpoint_url(&state.config.backend_url, "/health")
        .map_err(|e| format!("invalid backend URL: {e}"))?;
    let body = async {
        state
            .http
            .get(url)
            .timeout(state.config.health_timeout)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await
    }
    .await
    .map_err(|e| e.to_string())?;

    Ok(serde_json::from_slice(&body)
        .unwrap_or_else(|_| JsonValue::String(String::from_utf8_lossy(&body).into_owned())))
}

// ── Helpers ────────────────────────────────────────────────────────

struct Upstream<'a> {
    state: &'a RelayState,
    capability: Capability,
    timeout: Duration,
}

impl Upstream<'_> {
    /// Forward `body` and pass whatever the authority answers straight back.
    async fn post(
        &self,
        path: &str,
        caller: &CallerIdentity,
        body: &JsonValue,
    ) -> Result<Response, RelayError> {
        let url = endpoint(self.state, path, self.capability)?;

        let mut request = self.state.http.post(url).timeout(self.timeout).json(body);
        if let Some(ip) = &caller.ip {
            request = request.header("X-Forwarded-For", ip).header("X-Real-IP", ip);
        }
        if let Some(agent) = &caller.user_agent {
            request = request.header("User-Agent", agent);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RelayError::from_reqwest(self.capability, &e))?;
        let status = StatusCode::from_u16(response.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        let body = response
            .bytes()
            .await
            .map_err(|e| RelayError::from_reqwest(self.capability, &e))?;

        if !status.is_success() {
            tracing::warn!(%status, path, "Upstream answered with an error");
        }
        Ok(json_response(status, body))
    }
}

fn endpoint(state: &RelayState, path: &str, capability: Capability) -> Result<url::Url, RelayError> {
    endpoint_url(&state.config.backend_url, path).map_err(|e| RelayError::Unavailable {
        capability,
        detail: format!("invalid endpoint {path}: {e}"),
    })
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    (status, [(CONTENT_TYPE, "application/json")], body).into_response()
}

/// Lenient body parse: anything that is not a JSON object counts as empty.
fn parse_body(body: &[u8]) -> JsonValue {
    serde_json::from_slice(body).unwrap_or(JsonValue::Null)
}

fn required_token(body: &JsonValue) -> Option<&str> {
    body.get("token")
        .and_then(JsonValue::as_str)
        .filter(|token| !token.is_empty())
}
