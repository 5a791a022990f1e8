//! Background tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::interval;

use fusion_ledger_store::{reconcile_all, Store};

/// Run a full reconciliation pass every `every`, starting one period after
/// startup. Failed passes are logged and retried on the next tick.
pub fn spawn_reconciliation(store: Arc<dyn Store>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(every);

        // skip the immediate tick
        interval.tick().await;

        loop {
            interval.tick().await;

            match reconcile_all(&*store).await {
                Ok(report) if report.is_clean() => {
                    tracing::info!(
                        users_checked = report.users_checked,
                        "Reconciliation: all projections consistent"
                    );
                }
                Ok(report) => {
                    // Each correction is already logged by the store
                    tracing::warn!(
                        users_checked = report.users_checked,
                        corrections = report.corrections.len(),
                        "Reconciliation finished with corrections"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, "Reconciliation pass failed");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fusion_ledger_core::ExternalUserId;
    use fusion_ledger_store::MemoryStore;

    #[tokio::test(start_paused = true)]
    async fn periodic_pass_repairs_drift() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let user = store
            .ensure_user(&ExternalUserId::new("user_drift").unwrap())
            .await
            .unwrap();
        store.purchase(&user.id, 10, "cs_drift", "Starter Pack").await.unwrap();
        store.overwrite_balance_unchecked(&user.id, 99).await.unwrap();

        let every = Duration::from_secs(60);
        let handle = spawn_reconciliation(Arc::clone(&store), every);

        // Nothing runs at startup.
        tokio::time::sleep(every / 2).await;
        assert_eq!(store.balance(&user.id).await.unwrap(), 99);

        tokio::time::sleep(every).await;
        assert_eq!(store.balance(&user.id).await.unwrap(), 10);

        handle.abort();
    }
}
