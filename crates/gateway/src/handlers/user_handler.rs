//! Session handlers for an authenticated caller.

use axum::{
    extract::{Extension, State},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use utoipa::ToSchema;
use validator::Validate;

use common::AppResult;
use domain::{TokenPair, UserResponse};

use crate::extractors::ValidatedJson;
use crate::middleware::CurrentUser;
use crate::response::{ApiResponse, MessageResponse};
use crate::state::AppState;

/// Request carrying a refresh token
#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshTokenRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

/// Create routes that require a bearer access token
pub fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/me", get(get_current_user))
        .route("/refresh-token", post(refresh_token))
        .route("/logout", post(logout))
}

/// Get current authenticated user
#[utoipa::path(
    get,
    path = "/users/me",
    tag = "Users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user profile", body = UserResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn get_current_user(
    Extension(current_user): Extension<CurrentUser>,
    State(state): State<AppState>,
) -> AppResult<ApiResponse<UserResponse>> {
    let user = state.auth.get_profile(current_user.id).await?;
    Ok(ApiResponse::ok(UserResponse::from(user)))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/users/refresh-token",
    tag = "Users",
    security(("bearer_auth" = [])),
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPair),
        (status = 401, description = "Token not found, revoked, expired or invalid")
    )
)]
pub async fn refresh_token(
    Extension(current_user): Extension<CurrentUser>,
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshTokenRequest>,
) -> AppResult<ApiResponse<TokenPair>> {
    let pair = state
        .auth
        .refresh_token(current_user.id, payload.token)
        .await?;

    Ok(ApiResponse::ok(pair))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/users/logout",
    tag = "Users",
    security(("bearer_auth" = [])),
    request_body = RefreshTokenRequest,
    responses(
        (status = 200, description = "Refresh token revoked", body = MessageResponse),
        (status = 401, description = "Token not found or already revoked")
    )
)]
pub async fn logout(
    Extension(current_user): Extension<CurrentUser>,
    State(state): State<AppState>,
    ValidatedJson(payload): ValidatedJson<RefreshTokenRequest>,
) -> AppResult<ApiResponse<MessageResponse>> {
    state.auth.logout(payload.token).await?;
    tracing::debug!(user_id = %current_user.id, "Logged out");

    Ok(ApiResponse::ok(MessageResponse::new("Logged out")))
}
