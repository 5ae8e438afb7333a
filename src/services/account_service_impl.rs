//! `SeaORM` implementation of the `AccountService` trait.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::AdminConfig;
use crate::db::repositories::account::{generate_code, hash_password};
use crate::db::{AccountRepository, UnitOfWork};
use crate::mail::{Mailer, Messages};
use crate::models::account::{Account, Role, RoleSet};
use crate::services::account_service::{
    AccountError, AccountService, AccountView, SignupCommand, UpdateCommand,
};
use crate::session::AuthContext;

pub struct SeaOrmAccountService {
    mailer: Arc<dyn Mailer>,
    messages: Arc<Messages>,
    app_url: String,
    admin: AdminConfig,
}

impl SeaOrmAccountService {
    #[must_use]
    pub fn new(mailer: Arc<dyn Mailer>, app_url: String, admin: AdminConfig) -> Self {
        Self {
            mailer,
            messages: Arc::new(Messages::builtin()),
            app_url: app_url.trim_end_matches('/').to_string(),
            admin,
        }
    }

    /// Admin-or-self: the single predicate gating resend, fetch editability
    /// and update. Anonymous callers are always denied.
    async fn is_admin_or_self(ctx: &AuthContext, target: &Account) -> bool {
        match ctx.current().await {
            None => false,
            Some(caller) => caller.is_admin() || caller.id == target.id,
        }
    }

    fn verification_mail(&self, account: &Account) -> Result<(String, String), AccountError> {
        let Some(code) = &account.verification_code else {
            // Unverified iff code present; a missing code here is corrupt data.
            return Err(AccountError::Database(format!(
                "Account {} is unverified but has no verification code",
                account.id
            )));
        };

        let link = format!("{}/accounts/{code}/verify", self.app_url);
        let subject = self.messages.get("verify.subject", &[]);
        let body = self.messages.get("verify.body", &[&link]);
        Ok((subject, body))
    }

    async fn hash_blocking(password: &str) -> Result<String, AccountError> {
        let password = password.to_string();
        // CPU-intensive, keep it off the async runtime
        let hash = task::spawn_blocking(move || hash_password(&password))
            .await
            .context("Password hashing task panicked")??;
        Ok(hash)
    }
}

#[async_trait]
impl AccountService for SeaOrmAccountService {
    async fn bootstrap_admin(&self, uow: &mut UnitOfWork) -> Result<(), AccountError> {
        let repo = AccountRepository::new(uow.conn());

        if repo.find_by_email(&self.admin.email).await?.is_some() {
            debug!("Bootstrap admin {} already exists", self.admin.email);
            return Ok(());
        }

        let hash = Self::hash_blocking(&self.admin.password).await?;
        repo.insert(
            &self.admin.email,
            &self.admin.name,
            &hash,
            RoleSet::of(&[Role::Admin]),
            None,
        )
        .await?;

        info!("Bootstrap admin account created: {}", self.admin.email);
        Ok(())
    }

    async fn signup(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        command: SignupCommand,
    ) -> Result<Account, AccountError> {
        let hash = Self::hash_blocking(&command.password).await?;
        let code = generate_code();

        let repo = AccountRepository::new(uow.conn());
        let account = repo
            .insert(
                &command.email,
                &command.name,
                &hash,
                RoleSet::of(&[Role::Unverified]),
                Some(&code),
            )
            .await?;

        let (subject, body) = self.verification_mail(&account)?;
        let mailer = Arc::clone(&self.mailer);
        let ctx = ctx.clone();
        let hooked = account.clone();
        uow.on_commit(async move {
            ctx.login(hooked.clone()).await;
            if let Err(e) = mailer.send(&hooked.email, &subject, &body).await {
                warn!("Sending verification mail to {} failed: {e}", hooked.email);
            }
        });

        Ok(account)
    }

    async fn verify(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        code: &str,
    ) -> Result<(), AccountError> {
        let current = ctx.current().await.ok_or(AccountError::NotAuthenticated)?;

        // Re-fetch: the session copy may be stale.
        let repo = AccountRepository::new(uow.conn());
        let mut account = repo
            .get_by_id(current.id)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        if !account.is_unverified() {
            return Err(AccountError::AlreadyVerified);
        }
        if account.verification_code.as_deref() != Some(code) {
            return Err(AccountError::WrongVerificationCode);
        }

        account.roles.remove(Role::Unverified);
        account.verification_code = None;
        repo.save(&account).await?;

        let ctx = ctx.clone();
        uow.on_commit(async move {
            ctx.login(account).await;
        });

        Ok(())
    }

    async fn resend_verification_mail(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
    ) -> Result<(), AccountError> {
        let repo = AccountRepository::new(uow.conn());
        let account = repo
            .get_by_id(account_id)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        if !Self::is_admin_or_self(ctx, &account).await {
            return Err(AccountError::NotPermitted);
        }
        if !account.is_unverified() {
            return Err(AccountError::AlreadyVerified);
        }

        // Same mail, same stored code; nothing is persisted here, so a
        // transport failure surfaces to the caller.
        let (subject, body) = self.verification_mail(&account)?;
        self.mailer.send(&account.email, &subject, &body).await?;

        Ok(())
    }

    async fn forgot_password(
        &self,
        uow: &mut UnitOfWork,
        email: &str,
    ) -> Result<(), AccountError> {
        let repo = AccountRepository::new(uow.conn());
        let Some(mut account) = repo.find_by_email(email).await? else {
            // Deliberate no-op: don't leak which addresses are registered.
            debug!("Password reset requested for unknown address");
            return Ok(());
        };

        let code = generate_code();
        account.reset_password_code = Some(code.clone());
        repo.save(&account).await?;

        let link = format!("{}/reset-password/{code}", self.app_url);
        let subject = self.messages.get("reset-password.subject", &[]);
        let body = self.messages.get("reset-password.body", &[&link]);
        let mailer = Arc::clone(&self.mailer);
        let to = account.email.clone();
        uow.on_commit(async move {
            if let Err(e) = mailer.send(&to, &subject, &body).await {
                warn!("Error sending reset password mail to {to}: {e}");
            }
        });

        Ok(())
    }

    async fn reset_password(
        &self,
        uow: &mut UnitOfWork,
        code: &str,
        new_password: &str,
    ) -> Result<(), AccountError> {
        let repo = AccountRepository::new(uow.conn());
        let mut account = repo
            .find_by_reset_code(code)
            .await?
            .ok_or(AccountError::WrongResetPasswordCode)?;

        account.password_hash = Self::hash_blocking(new_password).await?;
        // Single-use: a consumed code can never match again.
        account.reset_password_code = None;
        repo.save(&account).await?;

        Ok(())
    }

    async fn fetch_by_id(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
    ) -> Result<AccountView, AccountError> {
        let repo = AccountRepository::new(uow.conn());
        let account = repo
            .get_by_id(account_id)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        let editable = Self::is_admin_or_self(ctx, &account).await;
        let email = if editable {
            account.email
        } else {
            crate::constants::CONFIDENTIAL_EMAIL.to_string()
        };

        Ok(AccountView {
            id: account.id,
            email,
            name: account.name,
            roles: account.roles,
            editable,
        })
    }

    async fn update(
        &self,
        uow: &mut UnitOfWork,
        ctx: &AuthContext,
        account_id: i64,
        command: UpdateCommand,
    ) -> Result<(), AccountError> {
        let repo = AccountRepository::new(uow.conn());
        let mut account = repo
            .get_by_id(account_id)
            .await?
            .ok_or(AccountError::UserNotFound)?;

        if !Self::is_admin_or_self(ctx, &account).await {
            return Err(AccountError::NotPermitted);
        }
        let caller = ctx.current().await.ok_or(AccountError::NotAuthenticated)?;

        account.name = command.name;

        // Only admins may touch role sets; a self-edit of the name alone
        // cannot smuggle in a role change.
        if caller.is_admin()
            && let Some(roles) = command.roles
        {
            let was_unverified = account.is_unverified();
            account.roles = roles;

            // Keep "unverified iff a code exists" true through admin edits.
            if was_unverified && !account.is_unverified() {
                account.verification_code = None;
            } else if account.is_unverified() && account.verification_code.is_none() {
                account.verification_code = Some(generate_code());
            }
        }

        repo.save(&account).await?;

        if caller.id == account.id {
            let ctx = ctx.clone();
            uow.on_commit(async move {
                ctx.login(account).await;
            });
        }

        Ok(())
    }
}
