//! Explicit unit of work: one transaction per operation, with side effects
//! deferred until the commit has actually happened.

use anyhow::{Context, Result};
use futures::future::BoxFuture;
use sea_orm::DatabaseTransaction;
use std::future::Future;
use tracing::debug;

/// Wraps a database transaction together with a queue of commit hooks.
///
/// Every persisted mutation of a public operation goes through [`conn`],
/// so either all of them become visible at [`commit`] or none do. Hooks
/// registered via [`on_commit`] run once, in registration order, strictly
/// after a successful commit; on rollback (explicit or by drop) they are
/// discarded unrun. Mail and session refreshes only ever happen in hooks,
/// which keeps "verification mail for an account that was never persisted"
/// impossible.
///
/// [`conn`]: UnitOfWork::conn
/// [`commit`]: UnitOfWork::commit
/// [`on_commit`]: UnitOfWork::on_commit
pub struct UnitOfWork {
    txn: DatabaseTransaction,
    hooks: Vec<BoxFuture<'static, ()>>,
}

impl UnitOfWork {
    #[must_use]
    pub fn new(txn: DatabaseTransaction) -> Self {
        Self {
            txn,
            hooks: Vec::new(),
        }
    }

    /// The transaction all writes of this operation must go through.
    #[must_use]
    pub const fn conn(&self) -> &DatabaseTransaction {
        &self.txn
    }

    /// Queue a side effect to run only after a successful commit.
    pub fn on_commit<F>(&mut self, hook: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.hooks.push(Box::pin(hook));
    }

    /// Commit the transaction, then run the queued hooks in order.
    ///
    /// Hooks are infallible by construction; anything that can fail inside
    /// one (mail transport, above all) logs and swallows its own error.
    pub async fn commit(self) -> Result<()> {
        self.txn.commit().await.context("Failed to commit unit of work")?;

        let hooks = self.hooks;
        if !hooks.is_empty() {
            debug!("Running {} commit hook(s)", hooks.len());
        }
        for hook in hooks {
            hook.await;
        }

        Ok(())
    }

    /// Roll back the transaction; queued hooks are dropped without running.
    pub async fn rollback(self) -> Result<()> {
        self.txn
            .rollback()
            .await
            .context("Failed to roll back unit of work")
    }
}
