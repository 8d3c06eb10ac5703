//! Interfaces to everything outside the draw core: the ledger, the VRF
//! network, the fee pool, the swap aggregator, prize transfer, persistence
//! and push delivery. Implementations live with the embedding binary.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Decimal256, Timestamp, Uint128, Uint512};
use holder_lottery_common::{BlockInfo, Holder};

use crate::error::CollaboratorError;
use crate::query::StatusMessage;
use crate::retry::{retry, RetryPolicy};
use crate::state::DrawResult;

/// Holders of a token at one ledger block.
#[cw_serde]
pub struct HolderList {
    pub holders: Vec<Holder>,
    pub block: BlockInfo,
}

/// A verifiable random value and where it came from.
#[cw_serde]
pub struct Randomness {
    pub value: Uint512,
    pub request_tx: String,
    pub randomness_account: String,
}

/// Fees accrued to the creator position, in base units.
#[cw_serde]
pub struct FeeAmounts {
    pub base_fee: Uint128,
    pub quote_fee: Uint128,
}

#[cw_serde]
pub struct Distribution {
    pub tx: String,
    /// Prize amount in human units of the prize token
    pub amount: Decimal256,
}

#[async_trait]
pub trait HolderSource: Send + Sync {
    async fn list_holders(
        &self,
        token_mint: &str,
        excluded: &[String],
    ) -> Result<HolderList, CollaboratorError>;
}

#[async_trait]
pub trait RandomnessSource: Send + Sync {
    async fn request_randomness(&self) -> Result<Randomness, CollaboratorError>;
}

#[async_trait]
pub trait FeeSource: Send + Sync {
    async fn check_fees(&self) -> Result<FeeAmounts, CollaboratorError>;

    /// Returns the claim transaction, or `None` when nothing had to be sent.
    async fn claim_fees(&self, amounts: &FeeAmounts) -> Result<Option<String>, CollaboratorError>;
}

#[async_trait]
pub trait Swapper: Send + Sync {
    async fn swap(&self, amount_in: Uint128) -> Result<String, CollaboratorError>;
}

#[async_trait]
pub trait PrizeDistributor: Send + Sync {
    async fn distribute(&self, winner: &str) -> Result<Distribution, CollaboratorError>;
}

#[async_trait]
pub trait DrawRecorder: Send + Sync {
    async fn save(&self, result: &DrawResult) -> Result<(), CollaboratorError>;
}

/// Push delivery to connected observers. Must not block.
pub trait Broadcaster: Send + Sync {
    fn notify(&self, message: &StatusMessage);
}

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::from_nanos(elapsed.as_nanos() as u64)
    }
}

/// The full set of collaborators a keeper drives.
#[derive(Clone)]
pub struct Collaborators {
    pub holders: Arc<dyn HolderSource>,
    pub randomness: Arc<dyn RandomnessSource>,
    pub fees: Arc<dyn FeeSource>,
    pub swapper: Arc<dyn Swapper>,
    pub distributor: Arc<dyn PrizeDistributor>,
    pub recorder: Arc<dyn DrawRecorder>,
}

/// Fee source for a jackpot that is already sitting in the prize wallet.
pub struct FixedFeeSource {
    amounts: FeeAmounts,
}

impl FixedFeeSource {
    pub fn new(base_fee: Uint128, quote_fee: Uint128) -> Self {
        FixedFeeSource {
            amounts: FeeAmounts {
                base_fee,
                quote_fee,
            },
        }
    }
}

#[async_trait]
impl FeeSource for FixedFeeSource {
    async fn check_fees(&self) -> Result<FeeAmounts, CollaboratorError> {
        Ok(self.amounts.clone())
    }

    async fn claim_fees(&self, _amounts: &FeeAmounts) -> Result<Option<String>, CollaboratorError> {
        Ok(None)
    }
}

/// Randomness source that re-requests on failure or timeout.
pub struct RetryingRandomness {
    inner: Arc<dyn RandomnessSource>,
    policy: RetryPolicy,
}

impl RetryingRandomness {
    pub fn new(inner: Arc<dyn RandomnessSource>, policy: RetryPolicy) -> Self {
        RetryingRandomness { inner, policy }
    }
}

#[async_trait]
impl RandomnessSource for RetryingRandomness {
    async fn request_randomness(&self) -> Result<Randomness, CollaboratorError> {
        retry("randomness", &self.policy, |_| self.inner.request_randomness()).await
    }
}

pub struct RetryingSwapper {
    inner: Arc<dyn Swapper>,
    policy: RetryPolicy,
}

impl RetryingSwapper {
    pub fn new(inner: Arc<dyn Swapper>, policy: RetryPolicy) -> Self {
        RetryingSwapper { inner, policy }
    }
}

#[async_trait]
impl Swapper for RetryingSwapper {
    async fn swap(&self, amount_in: Uint128) -> Result<String, CollaboratorError> {
        retry("swap", &self.policy, |_| self.inner.swap(amount_in)).await
    }
}
