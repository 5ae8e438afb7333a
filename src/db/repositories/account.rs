use anyhow::{Context, Result};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use sea_orm::{ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, Set};

use crate::entities::accounts;
use crate::models::account::Account;

fn to_account(model: accounts::Model) -> Result<Account> {
    let roles = model
        .roles
        .parse()
        .with_context(|| format!("Corrupt roles column for account {}", model.id))?;

    Ok(Account {
        id: model.id,
        email: model.email,
        name: model.name,
        password_hash: model.password_hash,
        roles,
        verification_code: model.verification_code,
        reset_password_code: model.reset_password_code,
        created_at: model.created_at,
        updated_at: model.updated_at,
    })
}

/// Account persistence, generic over the connection so calls run either on
/// the pool or inside a unit of work's transaction.
pub struct AccountRepository<'a, C: ConnectionTrait> {
    conn: &'a C,
}

impl<'a, C: ConnectionTrait> AccountRepository<'a, C> {
    #[must_use]
    pub const fn new(conn: &'a C) -> Self {
        Self { conn }
    }

    /// Get account by email (unique column, at most one match)
    pub async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let model = accounts::Entity::find()
            .filter(accounts::Column::Email.eq(email))
            .one(self.conn)
            .await
            .context("Failed to query account by email")?;

        model.map(to_account).transpose()
    }

    /// Get the account currently holding a reset-password code, if any
    pub async fn find_by_reset_code(&self, code: &str) -> Result<Option<Account>> {
        let model = accounts::Entity::find()
            .filter(accounts::Column::ResetPasswordCode.eq(code))
            .one(self.conn)
            .await
            .context("Failed to query account by reset code")?;

        model.map(to_account).transpose()
    }

    /// Get account by ID
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Account>> {
        let model = accounts::Entity::find_by_id(id)
            .one(self.conn)
            .await
            .context("Failed to query account by ID")?;

        model.map(to_account).transpose()
    }

    /// Insert a new account, returning it with its assigned identifier
    pub async fn insert(
        &self,
        email: &str,
        name: &str,
        password_hash: &str,
        roles: crate::models::account::RoleSet,
        verification_code: Option<&str>,
    ) -> Result<Account> {
        let now = chrono::Utc::now().to_rfc3339();

        let active = accounts::ActiveModel {
            email: Set(email.to_string()),
            name: Set(name.to_string()),
            password_hash: Set(password_hash.to_string()),
            roles: Set(roles.to_string()),
            verification_code: Set(verification_code.map(ToString::to_string)),
            reset_password_code: Set(None),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        };

        let model = active
            .insert(self.conn)
            .await
            .context("Failed to insert account")?;

        to_account(model)
    }

    /// Update an existing account by identity (all mutable columns)
    pub async fn save(&self, account: &Account) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();

        let active = accounts::ActiveModel {
            id: Set(account.id),
            email: Set(account.email.clone()),
            name: Set(account.name.clone()),
            password_hash: Set(account.password_hash.clone()),
            roles: Set(account.roles.to_string()),
            verification_code: Set(account.verification_code.clone()),
            reset_password_code: Set(account.reset_password_code.clone()),
            created_at: Set(account.created_at.clone()),
            updated_at: Set(now),
        };

        active
            .update(self.conn)
            .await
            .with_context(|| format!("Failed to update account {}", account.id))?;

        Ok(())
    }
}

/// Hash a password using Argon2id with default params.
///
/// CPU-intensive; async call sites wrap this in `spawn_blocking`.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();

    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Failed to hash password: {e}"))?;

    Ok(hash.to_string())
}

/// Check a plaintext password against a stored Argon2 hash.
pub fn verify_password(password: &str, password_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(password_hash)
        .map_err(|e| anyhow::anyhow!("Invalid password hash format: {e}"))?;

    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

/// Generate an opaque single-use code (64 character hex string)
#[must_use]
pub fn generate_code() -> String {
    use rand::Rng;

    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();

    bytes.iter().fold(String::with_capacity(64), |mut acc, b| {
        use std::fmt::Write;
        let _ = write!(acc, "{b:02x}");
        acc
    })
}
