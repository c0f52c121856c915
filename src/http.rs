//! HTTP API: login, token refresh, logout, handoff tickets, account
//! recovery, and the Prometheus metrics endpoint.
//!
//! This is the thin edge in front of the credential stores; everything it
//! does goes through the store and registry operations, never the backing
//! maps.

use crate::auth::TokenKind;
use crate::metrics;
use crate::state::AppState;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Build the API router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/ws-ticket", post(ws_ticket))
        .route("/recovery/request", post(recovery_request))
        .route("/recovery/verify", post(recovery_verify))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Serve the API on an already-bound listener until shutdown.
pub async fn serve(
    listener: tokio::net::TcpListener,
    state: Arc<AppState>,
    shutdown: CancellationToken,
) {
    let app = router(state);
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
    {
        tracing::error!(error = %e, "HTTP server error");
    }
}

#[derive(Debug, Deserialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct TokenPairResponse {
    user_id: String,
    access_token: String,
    access_expires_at: DateTime<Utc>,
    refresh_token: String,
    refresh_expires_at: DateTime<Utc>,
}

/// POST /auth/login - check credentials, issue an access/refresh pair.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<TokenPairResponse>, StatusCode> {
    let user = state
        .directory
        .authenticate(&req.email, &req.password)
        .await
        .map_err(|e| {
            warn!(error = %e, "Directory unavailable during login");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    let Some(user) = user else {
        metrics::auth_failure();
        return Err(StatusCode::UNAUTHORIZED);
    };

    let access = state
        .sessions
        .issue_access(&user.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let refresh = state
        .sessions
        .issue_refresh(&user.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!(user_id = %user.user_id, "User logged in");
    Ok(Json(TokenPairResponse {
        user_id: user.user_id,
        access_token: access.token,
        access_expires_at: access.expires_at,
        refresh_token: refresh.token,
        refresh_expires_at: refresh.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
struct AccessTokenResponse {
    user_id: String,
    access_token: String,
    access_expires_at: DateTime<Utc>,
}

/// POST /auth/refresh - trade a live refresh token for a new access token.
async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RefreshRequest>,
) -> Result<Json<AccessTokenResponse>, StatusCode> {
    let claims = state.sessions.validate(&req.refresh_token).map_err(|e| {
        warn!(code = e.error_code(), "Refresh rejected");
        metrics::auth_failure();
        StatusCode::UNAUTHORIZED
    })?;

    if claims.kind != TokenKind::Refresh {
        metrics::auth_failure();
        return Err(StatusCode::UNAUTHORIZED);
    }

    let access = state
        .sessions
        .issue_access(&claims.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(AccessTokenResponse {
        user_id: claims.user_id,
        access_token: access.token,
        access_expires_at: access.expires_at,
    }))
}

/// POST /auth/logout - revoke the presented token and drop the user's
/// connection. Logout wins over the token's own expiry.
async fn logout(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<StatusCode, StatusCode> {
    let token = bearer_token(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let session = state.sessions.lookup(token).ok_or(StatusCode::UNAUTHORIZED)?;

    state.sessions.revoke(token);
    state.registry.disconnect(&session.user_id);
    info!(user_id = %session.user_id, "User logged out");
    Ok(StatusCode::OK)
}

#[derive(Debug, Serialize)]
struct WsTicketResponse {
    otp: String,
    expires_at: DateTime<Utc>,
}

/// POST /auth/ws-ticket - issue a single-use code for the next WebSocket
/// upgrade. Supersedes any unredeemed ticket for the same user.
async fn ws_ticket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<WsTicketResponse>, StatusCode> {
    let token = bearer_token(&headers).ok_or(StatusCode::UNAUTHORIZED)?;
    let claims = state.sessions.validate(token).map_err(|e| {
        warn!(code = e.error_code(), "Ticket request rejected");
        metrics::auth_failure();
        StatusCode::UNAUTHORIZED
    })?;

    let code = state.handoff_codes.issue(&claims.user_id);
    Ok(Json(WsTicketResponse {
        otp: code.code,
        expires_at: code.expires_at,
    }))
}

#[derive(Debug, Deserialize)]
struct RecoveryRequest {
    email: String,
}

/// POST /recovery/request - issue an account-recovery code.
///
/// Delivery is an external concern; the code is logged until a mail
/// collaborator is wired in.
async fn recovery_request(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecoveryRequest>,
) -> Result<StatusCode, StatusCode> {
    let user = state
        .directory
        .user_by_email(&req.email)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    if user.is_none() {
        return Err(StatusCode::NOT_FOUND);
    }

    let code = state.recovery_codes.issue(&req.email);
    info!(email = %req.email, recovery_code = %code.code, "Recovery code issued");
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct RecoveryVerifyRequest {
    email: String,
    code: String,
}

/// POST /recovery/verify - consume a recovery code; success logs the user
/// in with a fresh access token.
async fn recovery_verify(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RecoveryVerifyRequest>,
) -> Result<Json<AccessTokenResponse>, StatusCode> {
    if !state.recovery_codes.verify(&req.code, &req.email) {
        metrics::auth_failure();
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user = state
        .directory
        .user_by_email(&req.email)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .ok_or(StatusCode::NOT_FOUND)?;

    let access = state
        .sessions
        .issue_access(&user.user_id)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    info!(user_id = %user.user_id, "Recovery verified");
    Ok(Json(AccessTokenResponse {
        user_id: user.user_id,
        access_token: access.token,
        access_expires_at: access.expires_at,
    }))
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler() -> String {
    metrics::gather()
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
