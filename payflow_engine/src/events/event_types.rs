use serde::{Deserialize, Serialize};

use crate::db_types::{Order, PaymentTransaction, RevenueShare};

/// A payment completed, the order was confirmed and revenue was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCompletedEvent {
    pub transaction: PaymentTransaction,
    pub order: Order,
    pub revenue_shares: Vec<RevenueShare>,
}

impl PaymentCompletedEvent {
    pub fn new(transaction: PaymentTransaction, order: Order, revenue_shares: Vec<RevenueShare>) -> Self {
        Self { transaction, order, revenue_shares }
    }
}

/// A payment failed. This is where the customer gets told their payment did not go through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentFailedEvent {
    pub transaction: PaymentTransaction,
    pub order: Order,
    pub reason: String,
    /// True if the customer was charged and must be refunded
    pub refund_required: bool,
}

impl PaymentFailedEvent {
    pub fn new<S: Into<String>>(transaction: PaymentTransaction, order: Order, reason: S) -> Self {
        Self { transaction, order, reason: reason.into(), refund_required: false }
    }

    pub fn with_refund(mut self) -> Self {
        self.refund_required = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentCancelledEvent {
    pub transaction: PaymentTransaction,
}

impl PaymentCancelledEvent {
    pub fn new(transaction: PaymentTransaction) -> Self {
        Self { transaction }
    }
}
