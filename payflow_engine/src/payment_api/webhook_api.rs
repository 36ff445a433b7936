use std::fmt::Debug;

use log::*;

use crate::{
    db_types::{AuditEventType, NewAuditEntry, PaymentProvider, PaymentTransaction, ProviderResult, ResultSource},
    payment_api::{
        errors::PaymentApiError,
        payment_objects::{WebhookOutcome, WebhookResponse},
        transition_api::{check_paid_amount, TransitionApi},
    },
    providers::{AckKind, ProviderAdapter, ProviderNotification, ProviderRegistry},
    traits::PaymentLedger,
};

/// `WebhookApi` consumes provider callbacks.
///
/// A callback is only trusted once its signature checks out and the amount it reports matches the transaction. The
/// provider always gets a reply in its own format, including for callbacks that change nothing because the
/// transaction was already resolved.
#[derive(Clone)]
pub struct WebhookApi<B> {
    db: B,
    transitions: TransitionApi<B>,
    providers: ProviderRegistry,
}

impl<B> Debug for WebhookApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WebhookApi({:?})", self.providers)
    }
}

impl<B> WebhookApi<B> {
    pub fn new(db: B, transitions: TransitionApi<B>, providers: ProviderRegistry) -> Self {
        Self { db, transitions, providers }
    }
}

impl<B> WebhookApi<B>
where B: PaymentLedger
{
    /// Handles one callback. The only error is a callback for a provider that is not configured, since there is no
    /// way to render a reply for it.
    pub async fn handle_notification(
        &self,
        provider: PaymentProvider,
        body: &[u8],
        content_type: Option<&str>,
        remote_ip: &str,
    ) -> Result<WebhookResponse, PaymentApiError> {
        let adapter = self.providers.get(provider)?;
        let adapter = adapter.as_ref();
        let notification = match adapter.parse_notification(body, content_type) {
            Ok(n) => n,
            Err(e) => {
                warn!("🔔 Could not parse {provider} notification from {remote_ip}. {e}");
                let reason = format!("Unreadable {provider} notification");
                self.audit_rejection(NewAuditEntry::new(AuditEventType::WebhookRejected, &reason), remote_ip).await;
                return Ok(reject(adapter, WebhookOutcome::Rejected(reason)));
            },
        };
        if !notification.system_ok {
            let message = notification.system_message.clone().unwrap_or_else(|| "unspecified".to_string());
            warn!("🔔 {provider} reported a system failure in its notification: {message}");
            return Ok(reject(adapter, WebhookOutcome::SystemFailure(message)));
        }
        if !adapter.verify_notification(&notification) {
            warn!("🔔 {provider} notification from {remote_ip} has a missing or invalid signature");
            let mut entry = NewAuditEntry::new(AuditEventType::WebhookRejected, "Invalid notification signature");
            if let Some(ext) = &notification.external_id {
                entry.reason = format!("Invalid notification signature for {ext}");
            }
            self.audit_rejection(entry, remote_ip).await;
            return Ok(reject(adapter, WebhookOutcome::Rejected("Invalid signature".to_string())));
        }
        let Some(external_id) = notification.external_id.clone() else {
            warn!("🔔 Signed {provider} notification has no merchant trade number");
            return Ok(reject(adapter, WebhookOutcome::Rejected("Missing trade number".to_string())));
        };
        let tx = match self.db.fetch_transaction_by_external_id(&external_id).await {
            Ok(Some(tx)) => tx,
            Ok(None) => {
                info!("🔔 {provider} notification for unknown trade {external_id}");
                return Ok(WebhookResponse {
                    outcome: WebhookOutcome::UnknownTransaction(external_id),
                    ack: adapter.ack(AckKind::NotFound),
                });
            },
            Err(e) => return Ok(internal_error(adapter, e.to_string())),
        };
        let result = match self.check_notification(&tx, &notification) {
            Ok(result) => result,
            Err(reason) => {
                warn!("🔔 {provider} notification for transaction {} rejected. {reason}", tx.id);
                let entry = NewAuditEntry::new(AuditEventType::WebhookRejected, &reason)
                    .with_order(&tx.order_id)
                    .with_transaction(&tx.id);
                self.audit_rejection(entry, remote_ip).await;
                return Ok(reject(adapter, WebhookOutcome::Rejected(reason)));
            },
        };
        match self.transitions.apply(&tx, result).await {
            Ok(outcome) => {
                debug!("🔔 {provider} notification for {} processed: {outcome:?}", tx.id);
                Ok(WebhookResponse { outcome: WebhookOutcome::Processed(outcome), ack: adapter.ack(AckKind::Success) })
            },
            Err(e) => Ok(internal_error(adapter, e.to_string())),
        }
    }

    /// Checks the notification agrees with the transaction and turns it into a result to apply.
    fn check_notification(
        &self,
        tx: &PaymentTransaction,
        notification: &ProviderNotification,
    ) -> Result<ProviderResult, String> {
        let status = notification.external_status.clone().ok_or("Missing trade status")?;
        check_paid_amount(tx, &status, notification.paid_amount)?;
        let mut result = ProviderResult::new(status, ResultSource::Webhook);
        if let Some(paid_at) = notification.paid_at {
            result = result.with_paid_at(paid_at);
        }
        if let Some(detail) = &notification.failure_detail {
            result = result.with_failure_reason(detail.clone());
        }
        Ok(result)
    }

    async fn audit_rejection(&self, entry: NewAuditEntry, remote_ip: &str) {
        if let Err(e) = self.db.record_audit(entry.with_ip(remote_ip)).await {
            error!("🔔 Could not record webhook rejection. {e}");
        }
    }
}

fn reject(adapter: &dyn ProviderAdapter, outcome: WebhookOutcome) -> WebhookResponse {
    let reason = match &outcome {
        WebhookOutcome::Rejected(r) | WebhookOutcome::SystemFailure(r) => r.clone(),
        _ => String::new(),
    };
    WebhookResponse { outcome, ack: adapter.ack(AckKind::Rejected(reason)) }
}

fn internal_error(adapter: &dyn ProviderAdapter, message: String) -> WebhookResponse {
    error!("🔔 Could not process {} notification. It will be redelivered. {message}", adapter.provider());
    WebhookResponse { outcome: WebhookOutcome::InternalError(message), ack: adapter.ack(AckKind::Retry) }
}
