use cosmwasm_std::StdError;
use holder_lottery_common::{SelectionError, TicketError};
use thiserror::Error;

use crate::execute::PipelineStep;

#[derive(Error, Debug)]
pub enum KeeperError {
    #[error("{0}")]
    Std(#[from] StdError),

    #[error("{0}")]
    Ticket(#[from] TicketError),

    #[error("{0}")]
    Selection(#[from] SelectionError),

    #[error("{step} step failed: {reason}")]
    StepFailed { step: PipelineStep, reason: String },

    #[error("{step} step timed out after {seconds}s")]
    StepTimedOut { step: PipelineStep, seconds: u64 },

    #[error("failed to persist draw result: {reason}")]
    Persistence { reason: String },

    #[error("invalid config: {reason}")]
    InvalidConfig { reason: String },
}

/// Error returned by external collaborators (ledger, VRF, fees, swap, ...).
#[derive(Error, Debug)]
pub enum CollaboratorError {
    #[error("{0}")]
    Std(#[from] StdError),

    #[error("{reason}")]
    Failed { reason: String },

    #[error("timed out after {seconds}s")]
    TimedOut { seconds: u64 },
}

impl CollaboratorError {
    pub fn failed(reason: impl Into<String>) -> Self {
        CollaboratorError::Failed {
            reason: reason.into(),
        }
    }
}
