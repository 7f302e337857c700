//! Trigger installation.
//!
//! Notifications only flow once the target table carries the notify trigger.
//! [`TriggerAdmin`] installs and removes it over a regular connection pool,
//! separate from any listening connection.

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use pgtrigger_proto::{SubscriptionTarget, TriggerDdl, TRIGGER_EXISTS_SQL};

use crate::error::Error;

/// Installs, removes and inspects notify triggers.
#[derive(Debug, Clone)]
pub struct TriggerAdmin {
    pool: PgPool,
}

impl TriggerAdmin {
    /// Connect with a small dedicated pool.
    pub async fn connect(database_url: &str) -> Result<Self, Error> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    /// Use an existing pool.
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the notify function and trigger for `target`.
    ///
    /// Replaces any existing trigger of the same name. Runs in one
    /// transaction.
    pub async fn install(&self, target: &SubscriptionTarget) -> Result<(), Error> {
        let ddl = TriggerDdl::for_target(target);
        self.execute_all(ddl.install()).await?;
        info!(
            subscription = %target,
            trigger = %target.trigger_name(),
            channel = %target.channel(),
            "trigger installed"
        );
        Ok(())
    }

    /// Drop the trigger and notify function for `target`, if present.
    pub async fn uninstall(&self, target: &SubscriptionTarget) -> Result<(), Error> {
        let ddl = TriggerDdl::for_target(target);
        self.execute_all(ddl.uninstall()).await?;
        info!(subscription = %target, trigger = %target.trigger_name(), "trigger removed");
        Ok(())
    }

    /// Whether the notify trigger exists on the target table.
    pub async fn is_installed(&self, target: &SubscriptionTarget) -> Result<bool, Error> {
        let installed: bool = sqlx::query_scalar(TRIGGER_EXISTS_SQL)
            .bind(target.trigger_name())
            .bind(target.schema())
            .bind(target.table())
            .fetch_one(&self.pool)
            .await?;
        Ok(installed)
    }

    /// Close the pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn execute_all(&self, statements: Vec<String>) -> Result<(), Error> {
        let mut tx = self.pool.begin().await?;
        for statement in &statements {
            sqlx::raw_sql(statement).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        Ok(())
    }
}
