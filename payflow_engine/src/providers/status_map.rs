//! The status vocabulary shared by both providers.
use serde::{Deserialize, Serialize};

use crate::db_types::TransactionStatus;

/// A provider trade status, reduced to what it means for the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MappedStatus {
    Completed,
    Cancelled,
    /// The customer has not paid yet. Not a transition.
    Pending,
    Failed,
}

impl MappedStatus {
    /// The terminal status to apply, or `None` if the transaction should stay where it is.
    pub fn target_status(&self) -> Option<TransactionStatus> {
        match self {
            MappedStatus::Completed => Some(TransactionStatus::Completed),
            MappedStatus::Cancelled => Some(TransactionStatus::Cancelled),
            MappedStatus::Pending => None,
            MappedStatus::Failed => Some(TransactionStatus::Failed),
        }
    }
}

/// Maps an Alipay `trade_status` or WeChat `trade_state`/`result_code` to a ledger outcome. Anything unrecognised is
/// a failure.
pub fn map_status(external_status: &str) -> MappedStatus {
    match external_status.trim().to_ascii_uppercase().as_str() {
        "TRADE_SUCCESS" | "TRADE_FINISHED" | "SUCCESS" => MappedStatus::Completed,
        "TRADE_CLOSED" | "CLOSED" | "REVOKED" => MappedStatus::Cancelled,
        "WAIT_BUYER_PAY" | "NOTPAY" | "USERPAYING" => MappedStatus::Pending,
        _ => MappedStatus::Failed,
    }
}
