//! Domain service for the account lifecycle.
//!
//! Signup, email verification, password reset, profile update, and the
//! idempotent admin bootstrap. Every operation runs inside a caller-owned
//! [`UnitOfWork`]; mail and session refreshes are queued as commit hooks.
//!
//! [`UnitOfWork`]: crate::db::UnitOfWork

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::UnitOfWork;
use crate::models::account::{Account, RoleSet};
use crate::session::AuthContext;

/// Errors specific to account operations.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("User not found")]
    UserNotFound,

    #[error("Not permitted")]
    NotPermitted,

    #[error("Account is already verified")]
    AlreadyVerified,

    #[error("Wrong verification code")]
    WrongVerificationCode,

    #[error("Wrong reset password code")]
    WrongResetPasswordCode,

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Mail error: {0}")]
    Mail(#[from] crate::mail::MailError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sea_orm::DbErr> for AccountError {
    fn from(err: sea_orm::DbErr) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<anyhow::Error> for AccountError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

/// New-account command. Any roles a client might try to smuggle in are
/// ignored; signup always starts as unverified.
#[derive(Debug, Clone, Deserialize)]
pub struct SignupCommand {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Profile update command. `roles` only takes effect for admin callers.
#[derive(Debug, Clone, Deserialize)]
pub struct UpdateCommand {
    pub name: String,
    #[serde(default)]
    pub roles: Option<RoleSet>,
}

/// Account as seen by a specific viewer: the transient `editable` flag plus
/// email redaction for third parties.
#[derive(Debug, Clone, Serialize)]
pub struct AccountView {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub roles: RoleSet,
    pub editable: bool,
}

/// Domain service trait for account lifecycle operations.
#[async_trait::async_trait]
pub trait AccountService: Send + Sync {
    /// Creates the configured admin account if it does not exist yet.
    /// Safe to run on every startup.
    async fn bootstrap_admin(&self, uow: &mut UnitOfWork) -> Result<(), AccountError>;

    /// Registers a new unverified account. On commit: logs the account in
    /// via `ctx`, then sends the verification mail (failures swallowed).
    async fn signup(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        command: SignupCommand,
    ) -> Result<Account, AccountError>;

    /// Consumes the caller's verification code.
    ///
    /// # Errors
    ///
    /// [`AccountError::NotAuthenticated`] without a session,
    /// [`AccountError::AlreadyVerified`] if nothing is left to verify,
    /// [`AccountError::WrongVerificationCode`] on mismatch.
    async fn verify(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        code: &str,
    ) -> Result<(), AccountError>;

    /// Re-sends the verification mail with the unchanged stored code.
    /// Admin-or-self only.
    async fn resend_verification_mail(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
    ) -> Result<(), AccountError>;

    /// Starts a password-reset flow for the given address. An unknown
    /// address is a silent no-op so the endpoint cannot be used to probe
    /// which emails are registered.
    async fn forgot_password(&self, uow: &mut UnitOfWork, email: &str)
    -> Result<(), AccountError>;

    /// Consumes a reset code and stores the new password.
    async fn reset_password(
        &self,
        uow: &mut UnitOfWork,
        code: &str,
        new_password: &str,
    ) -> Result<(), AccountError>;

    /// Loads an account as seen by the caller; email is redacted unless the
    /// viewer is admin-or-self.
    async fn fetch_by_id(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
    ) -> Result<AccountView, AccountError>;

    /// Updates display name (always) and roles (admin callers only).
    /// On commit refreshes the session if the caller edited themselves.
    async fn update(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
        command: UpdateCommand,
    ) -> Result<(), AccountError>;
}
