use std::time::Duration;

use log::*;
use payflow_engine::{
    events::EventProducers,
    payment_api::reconciliation_api::ReconciliationConfig,
    providers::ProviderRegistry,
    ReconciliationApi,
    SqliteDatabase,
    TransitionApi,
};
use tokio::{task::JoinHandle, time::MissedTickBehavior};

/// Starts the reconciliation worker. Do not await the returned JoinHandle, as it will run indefinitely.
///
/// Batches never overlap: the next tick is only awaited once the current batch has finished, and ticks missed while a
/// slow batch was running are skipped rather than fired back to back.
pub fn start_reconciliation_worker(
    db: SqliteDatabase,
    providers: ProviderRegistry,
    producers: EventProducers,
    config: ReconciliationConfig,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let transitions = TransitionApi::new(db.clone(), producers);
        let api = ReconciliationApi::new(db, transitions, providers, config);
        info!(
            "🔁 Reconciliation worker started. Checking up to {} payments every {}s",
            config.batch_size,
            interval.as_secs()
        );
        loop {
            timer.tick().await;
            trace!("🔁 Running reconciliation job");
            match api.sync_batch().await {
                Ok(summary) if summary.failed > 0 => {
                    warn!("🔁 {} of {} payments could not be reconciled this round", summary.failed, summary.total)
                },
                Ok(summary) => debug!("🔁 {} payments reconciled", summary.synced),
                Err(e) => error!("🔁 Error running reconciliation job: {e}"),
            }
        }
    })
}
