//! In-memory collaborators for exercising the keeper without a ledger,
//! a VRF network or a swap route. Used by the unit tests and the
//! integration test crate.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use cosmwasm_std::{Decimal256, Timestamp, Uint128, Uint256, Uint512};
use holder_lottery_common::{
    allocate_tickets, order_holders, select_winner, BlockInfo, Holder,
};
use tokio::sync::Notify;

use crate::collaborators::{
    Broadcaster, Clock, Collaborators, DrawRecorder, Distribution, FeeAmounts, FeeSource,
    HolderList, HolderSource, PrizeDistributor, Randomness, RandomnessSource, Swapper,
};
use crate::error::CollaboratorError;
use crate::query::{FeesResponse, StatusMessage, StatusResponse};
use crate::state::{DrawResult, FeeData, PrizeData, VerificationData};

pub const MOCK_SLOT: u64 = 250_000_000;
pub const MOCK_QUOTE_FEE: u128 = 1_000_000_000;

/// Clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn at_seconds(seconds: u64) -> Arc<Self> {
        Arc::new(ManualClock {
            now: Mutex::new(Timestamp::from_seconds(seconds)),
        })
    }

    pub fn set_seconds(&self, seconds: u64) {
        *self.now.lock().unwrap() = Timestamp::from_seconds(seconds);
    }

    pub fn advance_seconds(&self, seconds: u64) {
        let mut now = self.now.lock().unwrap();
        *now = now.plus_seconds(seconds);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap()
    }
}

fn mock_block() -> BlockInfo {
    BlockInfo {
        slot: MOCK_SLOT,
        blockhash: "9xQeWvG816bUx9EPjHmaT23yvVM2ZWbrrpZb9PusVFin".to_string(),
        block_time: Some(Timestamp::from_seconds(1_704_103_200)),
    }
}

/// Holder list served from memory. Balances have zero decimals.
#[derive(Default)]
pub struct MockHolderSource {
    holders: Mutex<Vec<Holder>>,
    failing: AtomicBool,
}

impl MockHolderSource {
    pub fn push(&self, owner: &str, raw_balance: Uint256) {
        let holder = Holder::from_raw(owner, raw_balance, 0).expect("zero decimals always fit");
        self.holders.lock().unwrap().push(holder);
    }

    pub fn fail_always(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl HolderSource for MockHolderSource {
    async fn list_holders(
        &self,
        _token_mint: &str,
        _excluded: &[String],
    ) -> Result<HolderList, CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("rpc unavailable"));
        }
        Ok(HolderList {
            holders: self.holders.lock().unwrap().clone(),
            block: mock_block(),
        })
    }
}

/// Returns a fixed random value, optionally held back until released.
pub struct MockRandomness {
    value: Mutex<Uint512>,
    calls: AtomicU32,
    hanging: AtomicBool,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockRandomness {
    pub fn new(value: u128) -> Self {
        MockRandomness {
            value: Mutex::new(Uint512::from(value)),
            calls: AtomicU32::new(0),
            hanging: AtomicBool::new(false),
            gate: Mutex::new(None),
        }
    }

    pub fn set_value(&self, value: Uint512) {
        *self.value.lock().unwrap() = value;
    }

    /// Never answer.
    pub fn hang(&self) {
        self.hanging.store(true, Ordering::SeqCst);
    }

    /// Hold every request until the returned handle is notified.
    pub fn gate(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RandomnessSource for MockRandomness {
    async fn request_randomness(&self) -> Result<Randomness, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hanging.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(Randomness {
            value: *self.value.lock().unwrap(),
            request_tx: format!("vrf-request-{call}"),
            randomness_account: "vrf-account".to_string(),
        })
    }
}

pub struct MockFees {
    amounts: Mutex<FeeAmounts>,
    checks: AtomicU32,
    claims: AtomicU32,
    failing: AtomicBool,
}

impl Default for MockFees {
    fn default() -> Self {
        MockFees {
            amounts: Mutex::new(FeeAmounts {
                base_fee: Uint128::new(42),
                quote_fee: Uint128::new(MOCK_QUOTE_FEE),
            }),
            checks: AtomicU32::new(0),
            claims: AtomicU32::new(0),
            failing: AtomicBool::new(false),
        }
    }
}

impl MockFees {
    pub fn amounts(&self) -> FeeAmounts {
        self.amounts.lock().unwrap().clone()
    }

    pub fn set_quote_fee(&self, quote_fee: u128) {
        self.amounts.lock().unwrap().quote_fee = Uint128::new(quote_fee);
    }

    /// Every later fee check errors.
    pub fn fail_checks(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    pub fn checks(&self) -> u32 {
        self.checks.load(Ordering::SeqCst)
    }

    pub fn claims(&self) -> u32 {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeeSource for MockFees {
    async fn check_fees(&self) -> Result<FeeAmounts, CollaboratorError> {
        self.checks.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("pool account not found"));
        }
        Ok(self.amounts())
    }

    async fn claim_fees(&self, _amounts: &FeeAmounts) -> Result<Option<String>, CollaboratorError> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(Some("claim-tx".to_string()))
    }
}

/// Swapper that fails a set number of times before succeeding.
#[derive(Default)]
pub struct MockSwapper {
    failures_left: AtomicU32,
    calls: AtomicU32,
    amounts: Mutex<Vec<Uint128>>,
}

impl MockSwapper {
    pub fn failing_times(failures: u32) -> Self {
        MockSwapper {
            failures_left: AtomicU32::new(failures),
            ..MockSwapper::default()
        }
    }

    pub fn fail_always(&self) {
        self.failures_left.store(u32::MAX, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Input amount of every call, failed ones included.
    pub fn amounts(&self) -> Vec<Uint128> {
        self.amounts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Swapper for MockSwapper {
    async fn swap(&self, amount_in: Uint128) -> Result<String, CollaboratorError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.amounts.lock().unwrap().push(amount_in);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            return Err(CollaboratorError::failed("no route found"));
        }
        Ok(format!("swap-tx-{call}"))
    }
}

#[derive(Default)]
pub struct MockDistributor {
    paid: Mutex<Vec<String>>,
}

impl MockDistributor {
    pub fn paid(&self) -> Vec<String> {
        self.paid.lock().unwrap().clone()
    }
}

#[async_trait]
impl PrizeDistributor for MockDistributor {
    async fn distribute(&self, winner: &str) -> Result<Distribution, CollaboratorError> {
        let mut paid = self.paid.lock().unwrap();
        paid.push(winner.to_string());
        Ok(Distribution {
            tx: format!("distribution-tx-{}", paid.len()),
            amount: Decimal256::percent(150),
        })
    }
}

#[derive(Default)]
pub struct MockRecorder {
    saved: Mutex<Vec<DrawResult>>,
    failing: AtomicBool,
}

impl MockRecorder {
    pub fn saved(&self) -> Vec<DrawResult> {
        self.saved.lock().unwrap().clone()
    }

    pub fn fail_always(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl DrawRecorder for MockRecorder {
    async fn save(&self, result: &DrawResult) -> Result<(), CollaboratorError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CollaboratorError::failed("database unreachable"));
        }
        self.saved.lock().unwrap().push(result.clone());
        Ok(())
    }
}

/// Keeps every pushed status message.
#[derive(Default)]
pub struct RecordingBroadcaster {
    messages: Mutex<Vec<StatusMessage>>,
}

impl RecordingBroadcaster {
    pub fn messages(&self) -> Vec<StatusMessage> {
        self.messages.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<StatusResponse> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                StatusMessage::DrawStatusUpdate(status) => Some(status),
                StatusMessage::FeesUpdate(_) => None,
            })
            .collect()
    }

    pub fn fee_updates(&self) -> Vec<FeesResponse> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                StatusMessage::FeesUpdate(fees) => Some(fees),
                StatusMessage::DrawStatusUpdate(_) => None,
            })
            .collect()
    }
}

impl Broadcaster for RecordingBroadcaster {
    fn notify(&self, message: &StatusMessage) {
        self.messages.lock().unwrap().push(message.clone());
    }
}

/// One mock of each collaborator, kept around for assertions.
pub struct MockHarness {
    pub holders: Arc<MockHolderSource>,
    pub randomness: Arc<MockRandomness>,
    pub fees: Arc<MockFees>,
    pub swapper: Arc<MockSwapper>,
    pub distributor: Arc<MockDistributor>,
    pub recorder: Arc<MockRecorder>,
}

impl MockHarness {
    pub fn with_holders(holders: &[(&str, u128)], randomness: u128) -> Self {
        let source = MockHolderSource::default();
        for (owner, balance) in holders {
            source.push(owner, Uint256::from(*balance));
        }
        MockHarness {
            holders: Arc::new(source),
            randomness: Arc::new(MockRandomness::new(randomness)),
            fees: Arc::new(MockFees::default()),
            swapper: Arc::new(MockSwapper::default()),
            distributor: Arc::new(MockDistributor::default()),
            recorder: Arc::new(MockRecorder::default()),
        }
    }

    /// A = 50000, B = 9999, C = 20000: seven tickets, A on 0..=4, C on 5..=6.
    pub fn reference(randomness: u128) -> Self {
        MockHarness::with_holders(&[("A", 50_000), ("B", 9_999), ("C", 20_000)], randomness)
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            holders: self.holders.clone(),
            randomness: self.randomness.clone(),
            fees: self.fees.clone(),
            swapper: self.swapper.clone(),
            distributor: self.distributor.clone(),
            recorder: self.recorder.clone(),
        }
    }
}

/// A completed draw over the reference holders, won by A with ticket 2.
pub fn sample_result() -> DrawResult {
    let mut holders: Vec<Holder> = [("A", 50_000u128), ("B", 9_999), ("C", 20_000)]
        .iter()
        .map(|(owner, balance)| Holder::from_raw(*owner, Uint256::from(*balance), 0).unwrap())
        .collect();
    order_holders(&mut holders);

    let snapshot = allocate_tickets(&holders, Uint128::new(10_000), mock_block()).unwrap();
    let winner = select_winner(&snapshot, Uint512::from(23u128)).unwrap();
    let snapshot_root = snapshot.merkle_root().unwrap();
    let winner_proof = snapshot.inclusion_proof(0).unwrap();

    DrawResult {
        snapshot,
        snapshot_root,
        verification: VerificationData {
            random_number: Uint512::from(23u128),
            request_tx: "vrf-request-1".to_string(),
            randomness_account: "vrf-account".to_string(),
        },
        winner,
        winner_proof,
        fees: FeeData {
            base_fee: Uint128::new(42),
            quote_fee: Uint128::new(MOCK_QUOTE_FEE),
            claim_tx: Some("claim-tx".to_string()),
        },
        prize: PrizeData {
            swap_tx: "swap-tx-1".to_string(),
            distribution_tx: "distribution-tx-1".to_string(),
            amount: Decimal256::percent(150),
        },
        completed_at: Timestamp::from_seconds(1_704_103_260),
    }
}
