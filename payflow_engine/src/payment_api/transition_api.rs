use std::fmt::Debug;

use log::*;
use payflow_common::Cents;

use crate::{
    db_types::{PaymentTransaction, ProviderResult, TransactionStatus},
    events::{EventProducers, PaymentCancelledEvent, PaymentCompletedEvent, PaymentFailedEvent},
    payment_api::{errors::PaymentApiError, payment_objects::TransitionOutcome},
    providers::{map_status, MappedStatus},
    traits::{PaymentLedger, TransitionResult},
};

/// Every report of a result is held to the same amount rule, whichever path it came in on: a stated amount must be
/// the payment amount, and a report that the trade was paid must state the amount.
pub fn check_paid_amount(tx: &PaymentTransaction, external_status: &str, paid: Option<Cents>) -> Result<(), String> {
    match paid {
        Some(paid) if paid != tx.amount => {
            Err(format!("Reported amount {paid} does not match the payment amount {}", tx.amount))
        },
        None if map_status(external_status) == MappedStatus::Completed => {
            Err(format!("{external_status} was reported without the amount paid"))
        },
        _ => Ok(()),
    }
}

/// `TransitionApi` is the single path by which a provider-reported status reaches the ledger. Webhooks,
/// reconciliation and status pushes all end up in [`TransitionApi::apply`].
#[derive(Clone)]
pub struct TransitionApi<B> {
    db: B,
    producers: EventProducers,
}

impl<B> Debug for TransitionApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "TransitionApi")
    }
}

impl<B> TransitionApi<B> {
    pub fn new(db: B, producers: EventProducers) -> Self {
        Self { db, producers }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

impl<B> TransitionApi<B>
where B: PaymentLedger
{
    /// Maps the provider status and applies it to the transaction.
    ///
    /// A status that means "not paid yet" changes nothing and is reported as [`TransitionOutcome::StillPending`].
    /// Events are only published when this call is the one that resolved the transaction.
    pub async fn apply(
        &self,
        transaction: &PaymentTransaction,
        result: ProviderResult,
    ) -> Result<TransitionOutcome, PaymentApiError> {
        let Some(target) = map_status(&result.external_status).target_status() else {
            trace!(
                "🔁 Transaction {} is still awaiting payment ({}). Nothing to do.",
                transaction.id,
                result.external_status
            );
            return Ok(TransitionOutcome::StillPending(transaction.clone()));
        };
        let result = match (target, &result.failure_reason) {
            (TransactionStatus::Failed, None) => {
                let reason = format!("Provider reported {}", result.external_status);
                result.with_failure_reason(reason)
            },
            _ => result,
        };
        let outcome = self.db.apply_result(&transaction.id, target, &result).await?;
        match outcome {
            TransitionResult::Applied { transaction, order, revenue_shares } => {
                info!("🗃️ Transaction {} is now {} (via {})", transaction.id, transaction.status, result.source);
                match transaction.status {
                    TransactionStatus::Completed => {
                        let event = PaymentCompletedEvent::new(transaction.clone(), order, revenue_shares);
                        for producer in &self.producers.payment_completed_producer {
                            producer.publish_event(event.clone()).await;
                        }
                    },
                    TransactionStatus::Failed => {
                        let reason = transaction.failure_reason.clone().unwrap_or_default();
                        let event = PaymentFailedEvent::new(transaction.clone(), order, reason);
                        self.publish_failed(event).await;
                    },
                    TransactionStatus::Cancelled => {
                        let event = PaymentCancelledEvent::new(transaction.clone());
                        for producer in &self.producers.payment_cancelled_producer {
                            producer.publish_event(event.clone()).await;
                        }
                    },
                    _ => {},
                }
                Ok(TransitionOutcome::Applied(transaction))
            },
            TransitionResult::AlreadyResolved { current } => {
                debug!(
                    "🗃️ Transaction {} was already resolved as {}. Ignoring {} from {}",
                    current.id, current.status, result.external_status, result.source
                );
                Ok(TransitionOutcome::AlreadyResolved(current))
            },
            TransitionResult::DuplicatePayment { transaction } => {
                warn!(
                    "🗃️ Order {} was paid twice. Transaction {} has been failed and must be refunded",
                    transaction.order_id, transaction.id
                );
                match self.db.fetch_order(&transaction.order_id).await? {
                    Some(order) => {
                        let reason = transaction.failure_reason.clone().unwrap_or_default();
                        let event = PaymentFailedEvent::new(transaction.clone(), order, reason).with_refund();
                        self.publish_failed(event).await;
                    },
                    None => error!("🗃️ Order {} for transaction {} has vanished", transaction.order_id, transaction.id),
                }
                Ok(TransitionOutcome::DuplicatePayment(transaction))
            },
        }
    }

    async fn publish_failed(&self, event: PaymentFailedEvent) {
        for producer in &self.producers.payment_failed_producer {
            debug!("📬️ Notifying payment failed subscribers for {}", event.transaction.id);
            producer.publish_event(event.clone()).await;
        }
    }
}
