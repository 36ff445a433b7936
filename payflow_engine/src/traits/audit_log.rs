use crate::{
    db_types::{AuditEntry, NewAuditEntry, OrderId},
    traits::LedgerError,
};

/// The audit sink. Gate decisions, rejected notifications and applied transitions all end up here.
#[allow(async_fn_in_trait)]
pub trait AuditLog {
    async fn record_audit(&self, entry: NewAuditEntry) -> Result<(), LedgerError>;

    /// Audit records for the order, oldest first.
    async fn fetch_audit_log_for_order(&self, order_id: &OrderId) -> Result<Vec<AuditEntry>, LedgerError>;
}
