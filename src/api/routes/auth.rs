//! Auth Routes
//!
//! - POST /api/v1/auth/login - Exchange email and password for a bearer token
//! - POST /api/v1/auth/logout - Revoke the current token
//! - GET /api/v1/auth/me - Current profile
//! - PUT /api/v1/auth/password - Change own password (revokes all tokens)

use axum::{extract::State, http::HeaderMap, http::StatusCode, Json};
use std::sync::Arc;

use crate::api::auth::{bearer_token, CurrentUser};
use crate::api::dto::{ChangePasswordRequest, LoginRequest, LoginResponse};
use crate::api::error::{ApiError, ApiResult};
use crate::api::state::AppState;
use crate::auth;
use crate::store::Profile;

fn bad_credentials() -> ApiError {
    ApiError::Unauthorized("Invalid email or password".to_string())
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let email = req.email.clone();
    let found = state
        .run(move |store| store.find_profile_by_email(&email))
        .await?;

    // Unknown emails still pay for one Argon2 check
    let hash = found.as_ref().map(|p| p.password_hash.clone());
    let verified = tokio::task::spawn_blocking(move || {
        auth::verify_password_or_decoy(&req.password, hash.as_deref())
    })
    .await
    .map_err(|e| ApiError::Internal(format!("Password check failed: {}", e)))?;

    let profile = match found {
        Some(profile) if verified => profile,
        Some(profile) => {
            tracing::warn!(profile_id = profile.id, "Failed login");
            return Err(bad_credentials());
        }
        None => return Err(bad_credentials()),
    };

    let ttl = state.session_ttl();
    let profile_id = profile.id;
    let session = state
        .run(move |store| {
            store.purge_expired_sessions()?;
            store.create_session(profile_id, ttl)
        })
        .await?;

    tracing::info!(profile_id, "Logged in");
    Ok(Json(LoginResponse {
        token: session.token,
        expires_at: session.expires_at,
        profile,
    }))
}

/// POST /api/v1/auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    headers: HeaderMap,
) -> ApiResult<StatusCode> {
    let token = bearer_token(&headers)
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".to_string()))?
        .to_string();
    state.run(move |store| store.delete_session(&token)).await?;

    tracing::info!(profile_id = user.id(), "Logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/auth/me
pub async fn me(CurrentUser(profile): CurrentUser) -> Json<Profile> {
    Json(profile)
}

/// PUT /api/v1/auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    CurrentUser(profile): CurrentUser,
    Json(req): Json<ChangePasswordRequest>,
) -> ApiResult<StatusCode> {
    let hash = profile.password_hash.clone();
    let current = req.current_password;
    let verified = tokio::task::spawn_blocking(move || auth::verify_password(&current, &hash))
        .await
        .map_err(|e| ApiError::Internal(format!("Password check failed: {}", e)))?;
    if !verified {
        return Err(ApiError::Unauthorized("Current password is wrong".to_string()));
    }

    let id = profile.id;
    state
        .run(move |store| store.set_password(id, &req.new_password))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
