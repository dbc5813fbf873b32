use axum::{
    extract::{ConnectInfo, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use service_core::error::AppError;
use std::net::SocketAddr;

use crate::{
    dtos::auth::{
        LogoutRequest, MessageResponse, OtpLoginRequest, RefreshRequest, RequestOtpRequest,
        TokenResponse,
    },
    utils::ValidatedJson,
    AppState,
};

/// Request a one-time passcode by email
#[utoipa::path(
    post,
    path = "/auth/otp/request",
    request_body = RequestOtpRequest,
    responses(
        (status = 202, description = "Passcode sent if the address is registered", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RequestOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let cancel = state.shutdown.child_token();
    state.flow.request_otp(&req.email, &cancel).await?;

    // Same answer whether or not the address exists.
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse {
            message: "If the address is registered, a passcode has been sent".to_string(),
        }),
    ))
}

/// Exchange a one-time passcode for an access and refresh token
#[utoipa::path(
    post,
    path = "/auth/otp/login",
    request_body = OtpLoginRequest,
    responses(
        (status = 200, description = "Login successful", body = TokenResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<OtpLoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers, connect_info.as_ref());
    let cancel = state.shutdown.child_token();

    let pair = state
        .flow
        .login_with_otp(&req.email, &req.code, &ip, &cancel)
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Rotate a refresh token and mint a new access token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid, expired or revoked token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers, connect_info.as_ref());
    let cancel = state.shutdown.child_token();

    let pair = state
        .flow
        .refresh_session(&req.refresh_token, &ip, &cancel)
        .await?;
    Ok((StatusCode::OK, Json(TokenResponse::from(pair))))
}

/// Revoke a refresh token
#[utoipa::path(
    post,
    path = "/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 204, description = "Logged out"),
        (status = 401, description = "Invalid or revoked token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    ValidatedJson(req): ValidatedJson<LogoutRequest>,
) -> Result<impl IntoResponse, AppError> {
    let ip = client_ip(&headers, connect_info.as_ref());
    let cancel = state.shutdown.child_token();

    state.flow.logout(&req.refresh_token, &ip, &cancel).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// First `X-Forwarded-For` hop, then the socket peer, then "unknown".
pub fn client_ip(headers: &HeaderMap, connect_info: Option<&ConnectInfo<SocketAddr>>) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_string)
        .or_else(|| connect_info.map(|ConnectInfo(addr)| addr.ip().to_string()))
        .unwrap_or_else(|| "unknown".to_string())
}
