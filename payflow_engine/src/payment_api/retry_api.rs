use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{AuditEventType, NewAuditEntry, NewPaymentTransaction, OrderStatusType, TransactionId, TransactionStatus},
    payment_api::{
        errors::PaymentApiError,
        payment_flow_api::PaymentFlowApi,
        payment_objects::{ClientRequest, PaymentCreated, RetryEligibility},
        security_gate::{GateRequest, MAX_RETRIES_EXCEEDED},
    },
    traits::PaymentLedger,
};

/// `RetryApi` lets a customer have another go at a failed payment, a bounded number of times per order.
#[derive(Clone)]
pub struct RetryApi<B> {
    flow: PaymentFlowApi<B>,
}

impl<B> Debug for RetryApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RetryApi")
    }
}

impl<B> RetryApi<B> {
    pub fn new(flow: PaymentFlowApi<B>) -> Self {
        Self { flow }
    }
}

impl<B> RetryApi<B>
where B: PaymentLedger
{
    pub async fn retry_eligibility(
        &self,
        client: &ClientRequest,
        id: &TransactionId,
    ) -> Result<RetryEligibility, PaymentApiError> {
        let tx = self.flow.fetch_transaction(id).await?;
        let order = self.flow.fetch_owned_order(client, &tx.order_id).await?;
        let failed_count = self.flow.db().count_failed_transactions(&order.id).await?;
        let in_flight = self.flow.db().count_in_flight_transactions(&order.id).await?;
        let max_retries = self.flow.gate().config().max_retries;
        let reason = if tx.status != TransactionStatus::Failed {
            Some(format!("Only failed payments can be retried. This payment is {}", tx.status))
        } else if failed_count >= max_retries {
            Some(MAX_RETRIES_EXCEEDED.to_string())
        } else if order.status != OrderStatusType::Pending {
            Some(format!("Order {} is {} and is not awaiting payment", order.id, order.status))
        } else if failed_count + in_flight >= max_retries {
            Some(format!("Order {} has {in_flight} payment(s) in progress. Wait for them to finish", order.id))
        } else {
            None
        };
        Ok(RetryEligibility {
            transaction_id: tx.id,
            can_retry: reason.is_none(),
            failed_count,
            max_retries,
            remaining_attempts: (max_retries - failed_count).max(0),
            reason,
        })
    }

    /// Issues a new attempt for a failed payment. The new transaction records which transaction it retries and its
    /// attempt number. The security gate is run again, so a retry is subject to the same checks as a new payment.
    pub async fn retry_payment(
        &self,
        client: &ClientRequest,
        id: &TransactionId,
    ) -> Result<PaymentCreated, PaymentApiError> {
        let eligibility = self.retry_eligibility(client, id).await?;
        let tx = self.flow.fetch_transaction(id).await?;
        if let Some(reason) = eligibility.reason {
            info!("♻️ Retry of {id} by {} refused. {reason}", client.user_id);
            let entry = NewAuditEntry::new(AuditEventType::RetryRejected, &reason)
                .with_user(client.user_id.clone())
                .with_ip(client.context.ip.clone())
                .with_order(&tx.order_id)
                .with_transaction(&tx.id);
            self.flow.db().record_audit(entry).await?;
            return Err(match eligibility.failed_count >= eligibility.max_retries {
                true => PaymentApiError::SecurityRejection(reason),
                false => PaymentApiError::ValidationError(reason),
            });
        }
        let order = self.flow.fetch_owned_order(client, &tx.order_id).await?;
        let solution = self
            .flow
            .db()
            .fetch_solution(&tx.solution_id)
            .await?
            .ok_or_else(|| PaymentApiError::NotFound(format!("Solution {}", tx.solution_id)))?;
        let gate_request = GateRequest { client, order: &order, solution_price: solution.price, amount: tx.amount };
        self.flow.gate().check(&gate_request).await?;
        let attempt_number = eligibility.failed_count + 1;
        let mut new_tx = NewPaymentTransaction::new(
            tx.order_id.clone(),
            tx.solution_id.clone(),
            tx.amount,
            tx.payment_method,
            client.context.clone(),
        )
        .as_retry_of(&tx.id, attempt_number);
        new_tx.currency = tx.currency.clone();
        let created = self.flow.start_attempt(new_tx, &solution.title).await?;
        info!("♻️ Payment {} retried as {} (attempt {attempt_number})", tx.id, created.payment_id);
        Ok(created)
    }
}
