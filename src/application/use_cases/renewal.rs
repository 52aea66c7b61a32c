use std::sync::Arc;

use async_trait::async_trait;

use crate::app_error::AppResult;

#[async_trait]
pub trait RenewalRepo: Send + Sync {
    /// Run the storage-side procedure that applies every deferred downgrade whose period
    /// has ended. Returns how many subscriptions were transitioned.
    async fn apply_deferred_downgrades(&self) -> AppResult<i64>;
}

/// Entry point for the external renewal scheduler.
#[derive(Clone)]
pub struct RenewalUseCases {
    repo: Arc<dyn RenewalRepo>,
}

impl RenewalUseCases {
    pub fn new(repo: Arc<dyn RenewalRepo>) -> Self {
        Self { repo }
    }

    #[tracing::instrument(skip(self))]
    pub async fn apply_deferred_downgrades(&self) -> AppResult<i64> {
        let applied = self.repo.apply_deferred_downgrades().await?;
        if applied > 0 {
            tracing::info!(applied, "Applied deferred downgrades");
        } else {
            tracing::debug!("No deferred downgrades due");
        }
        Ok(applied)
    }
}
