use axum::{
    Extension, Json,
    extract::{ConnectInfo, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::net::SocketAddr;

use crate::AppState;
use crate::api::{ApiResponse, user_agent};
use crate::error::ApiError;
use crate::middleware::auth::{BearerToken, CurrentUser};
use crate::services::auth_service::{LoginData, RefreshData, RegisterData};
use crate::services::rate_limiter::{EndpointClass, auth_identifier};

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub device_id: Option<String>,
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Deserialize)]
pub struct LogoutRequest {
    pub refresh_token: Option<String>,
}

#[derive(Deserialize)]
pub struct VerifyEmailRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct ResendVerificationRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub code: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub async fn register(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<RegisterRequest>,
) -> Result<Json<ApiResponse<RegisterData>>, ApiError> {
    let ip = addr.ip().to_string();
    let email = normalize_email(&payload.email);

    state
        .limiter
        .check(&auth_identifier(&ip, Some(&email)), EndpointClass::Auth)
        .await?;

    let data = state
        .auth
        .register(
            payload.username.trim(),
            &email,
            &payload.password,
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::ok("Account created", data)))
}

pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<LoginData>>, ApiError> {
    let ip = addr.ip().to_string();
    let email = normalize_email(&payload.email);

    // The gate runs before any credential work.
    state
        .limiter
        .check(&auth_identifier(&ip, Some(&email)), EndpointClass::Auth)
        .await?;

    let data = state
        .auth
        .login(
            &email,
            &payload.password,
            payload.device_id.as_deref(),
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::ok("Login successful", data)))
}

pub async fn refresh(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<RefreshRequest>,
) -> Result<Json<ApiResponse<RefreshData>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .limiter
        .check(&auth_identifier(&ip, None), EndpointClass::Auth)
        .await?;

    let data = state
        .auth
        .refresh(
            &payload.refresh_token,
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::ok("Tokens refreshed", data)))
}

pub async fn logout(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(CurrentUser(account)): Extension<CurrentUser>,
    Extension(BearerToken(access_token)): Extension<BearerToken>,
    headers: HeaderMap,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .auth
        .logout(
            &account,
            &access_token,
            payload.refresh_token.as_deref(),
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::message("Logged out")))
}

pub async fn logout_all(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(CurrentUser(account)): Extension<CurrentUser>,
    Extension(BearerToken(access_token)): Extension<BearerToken>,
    headers: HeaderMap,
    Json(payload): Json<LogoutRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .auth
        .logout_all(
            &account,
            &access_token,
            payload.refresh_token.as_deref(),
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::message("All sessions ended")))
}

pub async fn verify_email(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<VerifyEmailRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .limiter
        .check(&auth_identifier(&ip, None), EndpointClass::Auth)
        .await?;

    state
        .auth
        .verify_email(&payload.code, Some(&ip), user_agent(&headers).as_deref())
        .await?;

    Ok(Json(ApiResponse::message("Email verified")))
}

pub async fn resend_verification(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Json(payload): Json<ResendVerificationRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();
    let email = normalize_email(&payload.email);

    state
        .limiter
        .check(&auth_identifier(&ip, Some(&email)), EndpointClass::Auth)
        .await?;

    state.auth.resend_verification(&email).await?;

    // Same response whether or not the account exists.
    Ok(Json(ApiResponse::message(
        "If the address is registered, a verification email is on its way",
    )))
}

pub async fn forgot_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();
    let email = normalize_email(&payload.email);

    state
        .limiter
        .check(&auth_identifier(&ip, Some(&email)), EndpointClass::Auth)
        .await?;

    state
        .auth
        .forgot_password(&email, Some(&ip), user_agent(&headers).as_deref())
        .await?;

    // Same response whether or not the account exists.
    Ok(Json(ApiResponse::message(
        "If the address is registered, a reset email is on its way",
    )))
}

pub async fn reset_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .limiter
        .check(&auth_identifier(&ip, None), EndpointClass::Auth)
        .await?;

    state
        .auth
        .reset_password(
            &payload.code,
            &payload.new_password,
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::message("Password reset")))
}

pub async fn change_password(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Extension(CurrentUser(account)): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<()>>, ApiError> {
    let ip = addr.ip().to_string();

    state
        .auth
        .change_password(
            &account,
            &payload.current_password,
            &payload.new_password,
            Some(&ip),
            user_agent(&headers).as_deref(),
        )
        .await?;

    Ok(Json(ApiResponse::message("Password changed")))
}
