use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::header::{HOST, USER_AGENT};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use hui_schema::{AuthRequest, AuthResponse};
use tower_http::trace::TraceLayer;

use crate::derive::context_prefix;
use crate::error::ControlError;
use crate::sessions::SessionAccounting;
use crate::subscription::SubscriptionGenerator;

const SUBSCRIPTION_USERINFO: HeaderName = HeaderName::from_static("subscription-userinfo");

/// Shared state accessible by handlers.
#[derive(Clone)]
pub(crate) struct AppState {
    pub sessions: Arc<SessionAccounting>,
    pub subscriptions: Arc<SubscriptionGenerator>,
}

/// Router for the endpoints the nodes and their clients call.
///
/// Serves `POST {context}/hui/hysteria2/auth` (the Hysteria2 HTTP auth
/// callback), `GET {context}/hui/{secret}` (subscriptions) and `/health`.
pub fn build_router(
    sessions: Arc<SessionAccounting>,
    subscriptions: Arc<SubscriptionGenerator>,
    web_context: &str,
) -> Router {
    let prefix = context_prefix(web_context);
    let state = AppState {
        sessions,
        subscriptions,
    };

    Router::new()
        .route(&format!("{prefix}/hui/hysteria2/auth"), post(hysteria2_auth))
        .route(&format!("{prefix}/hui/{{secret}}"), get(subscribe))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Hysteria2 expects `200` with `ok: false` for a rejection.
async fn hysteria2_auth(
    State(state): State<AppState>,
    Json(request): Json<AuthRequest>,
) -> Json<AuthResponse> {
    match state.sessions.authenticate(&request.auth).await {
        Ok(account) => {
            tracing::debug!(user = %account.username, addr = %request.addr, "client admitted");
            Json(AuthResponse::allow(account.username))
        }
        Err(err) => {
            tracing::debug!(addr = %request.addr, reason = err.as_label(), error = %err, "client rejected");
            Json(AuthResponse::deny())
        }
    }
}

async fn subscribe(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    headers: HeaderMap,
) -> Response {
    let header = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    };
    let user_agent = header(USER_AGENT);
    let host = header(HOST);

    match state.subscriptions.subscribe(&secret, user_agent, host) {
        Ok(rendered) => {
            let mut response = rendered.body.into_response();
            if let Some(info) = rendered.user_info {
                if let Ok(value) = HeaderValue::from_str(&info) {
                    response.headers_mut().insert(SUBSCRIPTION_USERINFO, value);
                }
            }
            response
        }
        Err(ControlError::Unauthorized) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            tracing::warn!(error = %err, "subscription failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
