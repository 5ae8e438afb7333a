use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task;
use tower_sessions::Session;

use super::{ApiError, ApiResponse, AppState};
use crate::constants::session::ACCOUNT_ID_KEY;
use crate::db::repositories::account::verify_password;
use crate::models::account::{Account, RoleSet};
use crate::services::{SignupCommand, UpdateCommand};
use crate::session::AuthContext;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct VerifyRequest {
    pub code: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    pub code: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct AccountResponse {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub roles: RoleSet,
}

impl From<Account> for AccountResponse {
    fn from(account: Account) -> Self {
        Self {
            id: account.id,
            email: account.email,
            name: account.name,
            roles: account.roles,
        }
    }
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

// ============================================================================
// Session plumbing
// ============================================================================

/// Build the explicit auth context for this request from the session cookie.
async fn auth_context(state: &AppState, session: &Session) -> Result<AuthContext, ApiError> {
    let account_id: Option<i64> = session
        .get(ACCOUNT_ID_KEY)
        .await
        .map_err(|e| ApiError::internal(format!("Session error: {e}")))?;

    let Some(id) = account_id else {
        return Ok(AuthContext::anonymous());
    };

    match state.store().accounts().get_by_id(id).await? {
        Some(account) => Ok(AuthContext::authenticated(account)),
        // Stale cookie for a vanished account; treat as anonymous.
        None => Ok(AuthContext::anonymous()),
    }
}

/// Write the context's identity back into the session store after commit.
async fn sync_session(session: &Session, ctx: &AuthContext) -> Result<(), ApiError> {
    if let Some(account) = ctx.current().await {
        session
            .insert(ACCOUNT_ID_KEY, account.id)
            .await
            .map_err(|e| ApiError::internal(format!("Failed to update session: {e}")))?;
    }
    Ok(())
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /accounts
/// Sign up a new account; establishes a session and mails a verification link.
pub async fn signup(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<SignupCommand>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    if payload.email.is_empty() || !payload.email.contains('@') {
        return Err(ApiError::validation("A valid email is required"));
    }
    if payload.name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }
    if payload.password.len() < 8 {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    // Friendlier than the unique-index error; the index still backstops races.
    if state
        .store()
        .accounts()
        .find_by_email(&payload.email)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict("Email is already registered".to_string()));
    }

    let ctx = AuthContext::anonymous();
    let mut uow = state.store().begin().await?;
    let account = state.accounts().signup(&mut uow, &ctx, payload).await?;
    uow.commit().await?;

    sync_session(&session, &ctx).await?;

    Ok(Json(ApiResponse::success(account.into())))
}

/// POST /accounts/verify
pub async fn verify(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<VerifyRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let ctx = auth_context(&state, &session).await?;

    let mut uow = state.store().begin().await?;
    state.accounts().verify(&mut uow, &ctx, &payload.code).await?;
    uow.commit().await?;

    sync_session(&session, &ctx).await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Account verified".to_string(),
    })))
}

/// POST /accounts/{id}/resend-verification
pub async fn resend_verification(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let ctx = auth_context(&state, &session).await?;

    let mut uow = state.store().begin().await?;
    state
        .accounts()
        .resend_verification_mail(&mut uow, &ctx, id)
        .await?;
    uow.commit().await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Verification mail sent".to_string(),
    })))
}

/// POST /forgot-password
/// Always answers 200; whether the address exists is never revealed.
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let mut uow = state.store().begin().await?;
    state
        .accounts()
        .forgot_password(&mut uow, &payload.email)
        .await?;
    uow.commit().await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "If that address is registered, a reset mail is on its way".to_string(),
    })))
}

/// POST /reset-password
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.password.len() < 8 {
        return Err(ApiError::validation("Password must be at least 8 characters"));
    }

    let mut uow = state.store().begin().await?;
    state
        .accounts()
        .reset_password(&mut uow, &payload.code, &payload.password)
        .await?;
    uow.commit().await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Password updated".to_string(),
    })))
}

/// GET /accounts/{id}
pub async fn fetch(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<crate::services::AccountView>>, ApiError> {
    let ctx = auth_context(&state, &session).await?;

    let mut uow = state.store().begin().await?;
    let view = state.accounts().fetch_by_id(&mut uow, &ctx, id).await?;
    uow.commit().await?;

    Ok(Json(ApiResponse::success(view)))
}

/// PUT /accounts/{id}
pub async fn update(
    State(state): State<Arc<AppState>>,
    session: Session,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCommand>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if payload.name.is_empty() {
        return Err(ApiError::validation("Name is required"));
    }

    let ctx = auth_context(&state, &session).await?;

    let mut uow = state.store().begin().await?;
    state.accounts().update(&mut uow, &ctx, id, payload).await?;
    uow.commit().await?;

    sync_session(&session, &ctx).await?;

    Ok(Json(ApiResponse::success(MessageResponse {
        message: "Account updated".to_string(),
    })))
}

/// POST /auth/login
/// Credential check lives at the transport edge; the account service only
/// ever sees an established context.
pub async fn login(
    State(state): State<Arc<AppState>>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<ApiResponse<AccountResponse>>, ApiError> {
    if payload.email.is_empty() {
        return Err(ApiError::validation("Email is required"));
    }
    if payload.password.is_empty() {
        return Err(ApiError::validation("Password is required"));
    }

    let account = state
        .store()
        .accounts()
        .find_by_email(&payload.email)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid credentials".to_string()))?;

    let hash = account.password_hash.clone();
    let password = payload.password;
    // Argon2 verification is CPU-bound
    let is_valid = task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .map_err(|e| ApiError::internal(format!("Password verification task panicked: {e}")))?
        .map_err(ApiError::from)?;

    if !is_valid {
        return Err(ApiError::Unauthorized("Invalid credentials".to_string()));
    }

    session
        .insert(ACCOUNT_ID_KEY, account.id)
        .await
        .map_err(|e| ApiError::internal(format!("Failed to create session: {e}")))?;

    Ok(Json(ApiResponse::success(account.into())))
}

/// POST /auth/logout
/// Invalidate the current session
pub async fn logout(session: Session) -> impl IntoResponse {
    let _ = session.flush().await;
    (StatusCode::OK, "Logged out")
}
