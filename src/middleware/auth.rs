use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};

use crate::AppState;
use crate::error::ApiError;
use crate::models::account::Account;
use crate::models::claims::TokenType;
use crate::services::token_service::TokenService;

/// The authenticated account, stashed in request extensions.
#[derive(Clone)]
pub struct CurrentUser(pub Account);

/// The raw access token the request presented. Logout needs it back to
/// blacklist the JTI.
#[derive(Clone)]
pub struct BearerToken(pub String);

pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = TokenService::extract_bearer(request.headers())?.to_string();

    let claims = state.tokens.verify(&token, TokenType::Access).await?;

    let account = Account::find_by_id(&state.db, claims.sub)
        .await?
        .ok_or(ApiError::Unauthorized("Unknown account"))?;

    if !account.is_active {
        return Err(ApiError::Unauthorized("Account is deactivated"));
    }

    request.extensions_mut().insert(CurrentUser(account));
    request.extensions_mut().insert(BearerToken(token));

    Ok(next.run(request).await)
}
