use axum::{
    Extension, Json,
    extract::{ConnectInfo, Path, State},
};
use serde::Serialize;
use std::net::SocketAddr;

use crate::AppState;
use crate::api::ApiResponse;
use crate::error::ApiError;
use crate::middleware::auth::CurrentUser;
use crate::models::account::{Account, AccountSummary};
use crate::services::auth_service::validate_username;
use crate::services::rate_limiter::EndpointClass;

#[derive(Debug, Serialize)]
pub struct AvailabilityData {
    pub username: String,
    pub available: bool,
}

pub async fn check_username(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path(username): Path<String>,
) -> Result<Json<ApiResponse<AvailabilityData>>, ApiError> {
    let ip = addr.ip().to_string();

    state.limiter.check(&ip, EndpointClass::Default).await?;

    validate_username(&username)?;

    let available = Account::find_by_username(&state.db, &username)
        .await?
        .is_none();

    Ok(Json(ApiResponse::ok(
        "Username availability checked",
        AvailabilityData {
            username,
            available,
        },
    )))
}

pub async fn get_current_user(
    Extension(CurrentUser(account)): Extension<CurrentUser>,
) -> Json<ApiResponse<AccountSummary>> {
    Json(ApiResponse::ok(
        "Current user",
        AccountSummary::from(&account),
    ))
}
