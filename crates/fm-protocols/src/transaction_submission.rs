//! # Transaction Submission
//!
//! Drives one transaction through the chain collaborator:
//!
//! ```text
//! WaitForSend -> WaitForSubmission -> WaitForConfirmation -> Success
//!                      |                     |
//!                      v                     v
//!                 ApproveRetry ----------> Failure
//! ```
//!
//! A submission failure is never retried silently: it parks in
//! `ApproveRetry` until the caller answers with `TransactionRetryApproved`
//! or `TransactionRetryDenied`. One retry cycle is allowed per submission.

use shared_types::Address;
use tracing::{debug, warn};

use crate::actions::ProtocolAction;
use crate::outbox::{TransactionKind, TransactionRequest};
use crate::shared_data::SharedData;

const MAX_RETRIES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    TransactionFailed,
    RetryDenied,
    RetryBudgetExhausted,
}

#[derive(Debug, Clone)]
pub enum TransactionSubmission {
    WaitForSend {
        process_id: String,
        kind: TransactionKind,
        retries: u32,
    },
    WaitForSubmission {
        process_id: String,
        kind: TransactionKind,
        retries: u32,
    },
    WaitForConfirmation {
        process_id: String,
        kind: TransactionKind,
        retries: u32,
    },
    ApproveRetry {
        process_id: String,
        kind: TransactionKind,
        retries: u32,
    },
    Success {
        /// Populated for deploy transactions.
        contract_address: Option<Address>,
    },
    Failure {
        reason: FailureReason,
    },
}

impl TransactionSubmission {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success { .. } | Self::Failure { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Queue the transaction and start waiting for the chain collaborator.
pub fn initialize(
    process_id: &str,
    kind: TransactionKind,
    shared: &mut SharedData,
) -> TransactionSubmission {
    shared.queue_transaction(TransactionRequest {
        process_id: process_id.to_string(),
        kind: kind.clone(),
    });
    TransactionSubmission::WaitForSend {
        process_id: process_id.to_string(),
        kind,
        retries: 0,
    }
}

pub fn reduce(
    state: TransactionSubmission,
    shared: &mut SharedData,
    action: &ProtocolAction,
) -> TransactionSubmission {
    use TransactionSubmission::*;

    match (state, action) {
        (
            WaitForSend {
                process_id,
                kind,
                retries,
            },
            ProtocolAction::TransactionSent { .. },
        ) => WaitForSubmission {
            process_id,
            kind,
            retries,
        },
        (
            WaitForSubmission {
                process_id,
                kind,
                retries,
            },
            ProtocolAction::TransactionSubmitted { .. },
        ) => WaitForConfirmation {
            process_id,
            kind,
            retries,
        },
        (
            WaitForSend {
                process_id,
                kind,
                retries,
            }
            | WaitForSubmission {
                process_id,
                kind,
                retries,
            },
            ProtocolAction::TransactionSubmissionFailed { .. },
        ) => ApproveRetry {
            process_id,
            kind,
            retries,
        },
        (
            WaitForConfirmation { .. },
            ProtocolAction::TransactionConfirmed {
                contract_address, ..
            },
        ) => Success {
            contract_address: *contract_address,
        },
        (WaitForConfirmation { .. }, ProtocolAction::TransactionFailed { .. }) => Failure {
            reason: FailureReason::TransactionFailed,
        },
        (
            ApproveRetry {
                process_id,
                kind,
                retries,
            },
            ProtocolAction::TransactionRetryApproved { .. },
        ) => {
            if retries >= MAX_RETRIES {
                return Failure {
                    reason: FailureReason::RetryBudgetExhausted,
                };
            }
            debug!(process_id = %process_id, retry = retries + 1, "resubmitting transaction");
            shared.queue_transaction(TransactionRequest {
                process_id: process_id.clone(),
                kind: kind.clone(),
            });
            WaitForSend {
                process_id,
                kind,
                retries: retries + 1,
            }
        }
        (ApproveRetry { .. }, ProtocolAction::TransactionRetryDenied { .. }) => Failure {
            reason: FailureReason::RetryDenied,
        },
        (state, action) => {
            warn!(
                process_id = action.process_id(),
                "transaction submission ignored action"
            );
            state
        }
    }
}
