use std::fmt::Debug;

use chrono::{Duration, Utc};
use log::*;

use crate::{
    db_types::{
        new_external_id,
        NewPaymentTransaction,
        Order,
        OrderId,
        PaymentTransaction,
        ProviderResult,
        ResultSource,
        TransactionId,
    },
    events::EventProducers,
    payment_api::{
        errors::PaymentApiError,
        payment_objects::{
            ClientRequest,
            CreatePaymentRequest,
            PaymentCreated,
            PaymentStatusSnapshot,
            StatusPush,
            SyncOutcome,
            TransitionOutcome,
        },
        reconciliation_api::{ReconciliationApi, ReconciliationConfig},
        security_gate::{GateConfig, GateRequest, SecurityGate},
        transition_api::{check_paid_amount, TransitionApi},
    },
    providers::{ProviderRegistry, RedirectRequest},
    traits::PaymentLedger,
};

/// How long a payment URL stays valid, in minutes.
pub const DEFAULT_PAYMENT_EXPIRY_MINUTES: i64 = 30;

#[derive(Debug, Clone)]
pub struct PaymentFlowConfig {
    pub gate: GateConfig,
    pub payment_expiry: Duration,
}

impl Default for PaymentFlowConfig {
    fn default() -> Self {
        Self { gate: GateConfig::default(), payment_expiry: Duration::minutes(DEFAULT_PAYMENT_EXPIRY_MINUTES) }
    }
}

/// `PaymentFlowApi` creates payment attempts and reports on them.
///
/// Creating an attempt is a three-step affair: the request is run past the [`SecurityGate`], a `PENDING` transaction
/// is stored, and the provider is asked for a payment URL. Once the customer has a URL the transaction is
/// `PROCESSING`. If the provider cannot be reached, the transaction is abandoned as `CANCELLED`.
#[derive(Clone)]
pub struct PaymentFlowApi<B> {
    db: B,
    gate: SecurityGate<B>,
    transitions: TransitionApi<B>,
    reconciler: ReconciliationApi<B>,
    providers: ProviderRegistry,
    payment_expiry: Duration,
}

impl<B> Debug for PaymentFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PaymentFlowApi({:?})", self.providers)
    }
}

impl<B: Clone> PaymentFlowApi<B> {
    pub fn new(db: B, providers: ProviderRegistry, producers: EventProducers, config: PaymentFlowConfig) -> Self {
        let gate = SecurityGate::new(db.clone(), config.gate);
        let transitions = TransitionApi::new(db.clone(), producers);
        let reconciler =
            ReconciliationApi::new(db.clone(), transitions.clone(), providers.clone(), ReconciliationConfig::default());
        Self { db, gate, transitions, reconciler, providers, payment_expiry: config.payment_expiry }
    }
}

impl<B> PaymentFlowApi<B> {
    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn gate(&self) -> &SecurityGate<B> {
        &self.gate
    }

    pub fn payment_expiry(&self) -> Duration {
        self.payment_expiry
    }
}

impl<B> PaymentFlowApi<B>
where B: PaymentLedger
{
    /// Creates a new payment attempt for a solution in one of the caller's orders.
    pub async fn create_payment(
        &self,
        client: &ClientRequest,
        request: CreatePaymentRequest,
    ) -> Result<PaymentCreated, PaymentApiError> {
        let order = self.fetch_owned_order(client, &request.order_id).await?;
        let solution = self
            .db
            .fetch_solution(&request.solution_id)
            .await?
            .ok_or_else(|| PaymentApiError::NotFound(format!("Solution {}", request.solution_id)))?;
        let line_items = self.db.fetch_order_line_items(&order.id).await?;
        if !line_items.iter().any(|item| item.solution_id == solution.id) {
            return Err(PaymentApiError::ValidationError(format!(
                "Solution {} is not part of order {}",
                solution.id, order.id
            )));
        }
        let gate_request =
            GateRequest { client, order: &order, solution_price: solution.price, amount: request.amount };
        self.gate.check(&gate_request).await?;
        let mut new_tx = NewPaymentTransaction::new(
            order.id.clone(),
            solution.id.clone(),
            request.amount,
            request.payment_method,
            client.context.clone(),
        );
        new_tx.currency = order.currency.clone();
        self.start_attempt(new_tx, &solution.title).await
    }

    /// Stores the attempt and hands the customer over to the provider. Shared by fresh payments and retries; the
    /// caller has already run the security gate.
    pub(crate) async fn start_attempt(
        &self,
        new_tx: NewPaymentTransaction,
        subject: &str,
    ) -> Result<PaymentCreated, PaymentApiError> {
        let adapter = self.providers.get(new_tx.payment_method.provider())?;
        let tx = self.db.create_transaction(new_tx).await?;
        debug!("🗃️ Created transaction {} for order {}", tx.id, tx.order_id);
        let now = Utc::now();
        let external_id = new_external_id(now);
        let expires_at = now + self.payment_expiry;
        let redirect = RedirectRequest { transaction: &tx, external_id: &external_id, subject, expires_at };
        let payment_url = match adapter.create_redirect(redirect).await {
            Ok(url) => url,
            Err(e) => {
                warn!("💳️ Could not get a payment URL for transaction {}. {e}", tx.id);
                let reason = format!("Payment provider unavailable: {e}");
                if let Err(abandon_err) = self.db.abandon_transaction(&tx.id, &reason).await {
                    error!("🗃️ Could not abandon transaction {}. {abandon_err}", tx.id);
                }
                return Err(PaymentApiError::ProviderUnavailable(e.to_string()));
            },
        };
        let tx = self.db.mark_processing(&tx.id, &external_id).await?;
        info!("🗃️ Transaction {} for order {} is awaiting payment as {external_id}", tx.id, tx.order_id);
        Ok(PaymentCreated { payment_id: tx.id, payment_url, expires_at, status: tx.status })
    }

    /// The transaction and its order. A transaction that is still waiting on the provider is synced first, so the
    /// caller sees the freshest state available. If the provider cannot be reached, the stored state is returned.
    pub async fn payment_status(
        &self,
        client: &ClientRequest,
        id: &TransactionId,
    ) -> Result<PaymentStatusSnapshot, PaymentApiError> {
        let tx = self.fetch_transaction(id).await?;
        let order = self.fetch_owned_order(client, &tx.order_id).await?;
        let transaction = match self.reconciler.sync_loaded(tx.clone()).await {
            Ok(SyncOutcome::NotProcessing(tx)) => tx,
            Ok(SyncOutcome::Synced(outcome)) => {
                trace!("🔁 Status check synced {id}: {outcome:?}");
                outcome.transaction().clone()
            },
            Err(e) => {
                debug!("🔁 Status check could not sync {id}. Returning stored state. {e}");
                tx
            },
        };
        // The order may have been confirmed by the sync
        let order = self.db.fetch_order(&order.id).await?.unwrap_or(order);
        Ok(PaymentStatusSnapshot { transaction, order })
    }

    /// Applies a status relayed by a trusted internal service. The caller has already been authenticated.
    pub async fn push_status(&self, id: &TransactionId, push: StatusPush) -> Result<TransitionOutcome, PaymentApiError> {
        let tx = self.fetch_transaction(id).await?;
        check_paid_amount(&tx, &push.external_status, push.paid_amount).map_err(PaymentApiError::SecurityRejection)?;
        let mut result = ProviderResult::new(push.external_status, ResultSource::StatusPush);
        if let Some(paid_at) = push.paid_at {
            result = result.with_paid_at(paid_at);
        }
        if let Some(reason) = push.reason {
            result = result.with_failure_reason(reason);
        }
        self.transitions.apply(&tx, result).await
    }

    pub(crate) async fn fetch_transaction(&self, id: &TransactionId) -> Result<PaymentTransaction, PaymentApiError> {
        self.db.fetch_transaction(id).await?.ok_or_else(|| PaymentApiError::NotFound(format!("Payment {id}")))
    }

    pub(crate) async fn fetch_owned_order(
        &self,
        client: &ClientRequest,
        order_id: &OrderId,
    ) -> Result<Order, PaymentApiError> {
        let order =
            self.db.fetch_order(order_id).await?.ok_or_else(|| PaymentApiError::NotFound(format!("Order {order_id}")))?;
        if order.user_id != client.user_id {
            warn!("🛡️ User {} tried to access order {order_id}, which belongs to someone else", client.user_id);
            return Err(PaymentApiError::Forbidden(format!("Order {order_id} does not belong to you")));
        }
        Ok(order)
    }
}
