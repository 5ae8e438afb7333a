//! Explicit per-request authentication context.
//!
//! The original ambient "current user" becomes a handle the transport layer
//! builds per request and threads through each operation. Commit hooks hold a
//! clone so they can refresh the cached identity after the unit of work lands;
//! the transport layer then syncs the result back into its own session store.

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::account::Account;

#[derive(Clone, Default)]
pub struct AuthContext {
    current: Arc<RwLock<Option<Account>>>,
}

impl AuthContext {
    #[must_use]
    pub fn anonymous() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn authenticated(account: Account) -> Self {
        Self {
            current: Arc::new(RwLock::new(Some(account))),
        }
    }

    /// The account this request is acting as, if any.
    pub async fn current(&self) -> Option<Account> {
        self.current.read().await.clone()
    }

    /// Establish or refresh the session identity (cached roles included).
    pub async fn login(&self, account: Account) {
        *self.current.write().await = Some(account);
    }
}
