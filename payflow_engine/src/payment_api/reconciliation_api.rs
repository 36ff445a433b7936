use std::fmt::Debug;

use futures_util::{stream, StreamExt};
use log::*;

use crate::{
    db_types::{PaymentTransaction, ProviderResult, ResultSource, TransactionId, TransactionStatus},
    payment_api::{
        errors::PaymentApiError,
        payment_objects::{SyncOutcome, SyncSummary},
        transition_api::{check_paid_amount, TransitionApi},
    },
    providers::{ProviderRegistry, ProviderStatusReport, QueryOutcome},
    traits::PaymentLedger,
};

pub const DEFAULT_BATCH_SIZE: i64 = 50;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, Copy)]
pub struct ReconciliationConfig {
    /// The most transactions looked at in one batch
    pub batch_size: i64,
    /// The most provider queries in flight at once
    pub concurrency: usize,
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE, concurrency: DEFAULT_CONCURRENCY }
    }
}

/// Asks the providers about transactions that have been `PROCESSING` for a while and applies their answers. Nothing
/// here writes to the ledger directly: every answer goes through the same [`TransitionApi`] the webhooks use.
#[derive(Clone)]
pub struct ReconciliationApi<B> {
    db: B,
    transitions: TransitionApi<B>,
    providers: ProviderRegistry,
    config: ReconciliationConfig,
}

impl<B> Debug for ReconciliationApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ReconciliationApi({:?}, {:?})", self.config, self.providers)
    }
}

impl<B> ReconciliationApi<B> {
    pub fn new(
        db: B,
        transitions: TransitionApi<B>,
        providers: ProviderRegistry,
        config: ReconciliationConfig,
    ) -> Self {
        Self { db, transitions, providers, config }
    }

    pub fn config(&self) -> &ReconciliationConfig {
        &self.config
    }
}

impl<B> ReconciliationApi<B>
where B: PaymentLedger
{
    /// Syncs the oldest `PROCESSING` transactions with their providers. A failure on one transaction is counted and
    /// logged; it never stops the batch.
    pub async fn sync_batch(&self) -> Result<SyncSummary, PaymentApiError> {
        let candidates = self.db.fetch_reconcilable(self.config.batch_size).await?;
        let total = candidates.len();
        if total == 0 {
            trace!("🔁 No transactions awaiting reconciliation");
            return Ok(SyncSummary::default());
        }
        debug!("🔁 Reconciling {total} transaction(s)");
        let results = stream::iter(candidates)
            .map(|tx| async move {
                let id = tx.id.clone();
                (id, self.sync_processing(tx).await)
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .collect::<Vec<_>>()
            .await;
        let mut summary = SyncSummary { total, ..Default::default() };
        for (id, result) in results {
            match result {
                Ok(outcome) => {
                    trace!("🔁 {id}: {outcome:?}");
                    summary.synced += 1;
                },
                Err(e) => {
                    warn!("🔁 Could not reconcile transaction {id}. {e}");
                    summary.failed += 1;
                },
            }
        }
        info!("🔁 Reconciliation batch complete. {} synced, {} failed of {}", summary.synced, summary.failed, total);
        Ok(summary)
    }

    /// Syncs one transaction. A transaction that is not `PROCESSING` is returned as is, without asking the provider.
    pub async fn sync_transaction(&self, id: &TransactionId) -> Result<SyncOutcome, PaymentApiError> {
        let tx = self
            .db
            .fetch_transaction(id)
            .await?
            .ok_or_else(|| PaymentApiError::NotFound(format!("Payment {id}")))?;
        self.sync_loaded(tx).await
    }

    /// As [`Self::sync_transaction`], for a transaction that has already been loaded.
    pub async fn sync_loaded(&self, tx: PaymentTransaction) -> Result<SyncOutcome, PaymentApiError> {
        if tx.status != TransactionStatus::Processing {
            trace!("🔁 Transaction {} is {}. No need to ask the provider.", tx.id, tx.status);
            return Ok(SyncOutcome::NotProcessing(tx));
        }
        self.sync_processing(tx).await
    }

    async fn sync_processing(&self, tx: PaymentTransaction) -> Result<SyncOutcome, PaymentApiError> {
        let external_id = tx.external_id.clone().ok_or_else(|| {
            PaymentApiError::ValidationError(format!("Transaction {} has no provider trade number", tx.id))
        })?;
        let adapter = self.providers.get(tx.payment_provider)?;
        let report = match adapter.query_status(&external_id).await {
            QueryOutcome::Found(report) => report,
            QueryOutcome::Unknown(reason) => {
                debug!("🔁 {} has no definitive answer for {external_id}. {reason}", tx.payment_provider);
                return Err(PaymentApiError::ProviderUnavailable(reason));
            },
        };
        check_reported_amount(&tx, &report)?;
        let mut result = ProviderResult::new(report.external_status, ResultSource::Reconciliation);
        if let Some(paid_at) = report.paid_at {
            result = result.with_paid_at(paid_at);
        }
        if let Some(detail) = report.failure_detail {
            result = result.with_failure_reason(detail);
        }
        let outcome = self.transitions.apply(&tx, result).await?;
        Ok(SyncOutcome::Synced(outcome))
    }
}

/// A provider that reports a trade as paid must agree with us on how much.
fn check_reported_amount(tx: &PaymentTransaction, report: &ProviderStatusReport) -> Result<(), PaymentApiError> {
    check_paid_amount(tx, &report.external_status, report.paid_amount).map_err(|reason| {
        error!("🔁 {} report for transaction {} rejected. {reason}", tx.payment_provider, tx.id);
        PaymentApiError::SecurityRejection(reason)
    })
}
