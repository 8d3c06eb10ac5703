use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use cosmwasm_std::Uint128;
use holder_lottery_common::{
    allocate_tickets, order_holders, select_winner, SelectionError, Snapshot, WinnerData,
};
use tracing::{error, info, warn};

use crate::collaborators::{Clock, Collaborators};
use crate::error::{CollaboratorError, KeeperError};
use crate::state::{DrawResult, FeeData, PrizeData, VerificationData};

/// One step of the draw pipeline, in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PipelineStep {
    Snapshot,
    Randomness,
    Selection,
    FeeCheck,
    FeeClaim,
    Swap,
    Distribution,
    Persistence,
}

/// What a failure of a step does to the rest of the pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepPolicy {
    /// Stop the draw; nothing is announced.
    Abort,
    /// Log and carry on with the result assembled so far.
    Continue,
}

impl PipelineStep {
    pub const fn policy(self) -> StepPolicy {
        match self {
            // The prize has already moved by the time results are persisted
            PipelineStep::Persistence => StepPolicy::Continue,
            _ => StepPolicy::Abort,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            PipelineStep::Snapshot => "snapshot",
            PipelineStep::Randomness => "randomness",
            PipelineStep::Selection => "selection",
            PipelineStep::FeeCheck => "fee_check",
            PipelineStep::FeeClaim => "fee_claim",
            PipelineStep::Swap => "swap",
            PipelineStep::Distribution => "distribution",
            PipelineStep::Persistence => "persistence",
        }
    }
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Result of one step after its policy has been applied.
#[derive(Debug)]
pub enum StepOutcome<T> {
    Completed(T),
    Aborted(KeeperError),
    Skipped(KeeperError),
}

impl<T> StepOutcome<T> {
    /// The step's value; any failure ends the draw since later steps need it.
    pub fn into_value(self) -> Result<T, KeeperError> {
        match self {
            StepOutcome::Completed(value) => Ok(value),
            StepOutcome::Aborted(err) | StepOutcome::Skipped(err) => Err(err),
        }
    }

    /// `Ok(None)` for a tolerated failure, `Err` for an aborting one.
    pub fn tolerate(self) -> Result<Option<T>, KeeperError> {
        match self {
            StepOutcome::Completed(value) => Ok(Some(value)),
            StepOutcome::Skipped(_) => Ok(None),
            StepOutcome::Aborted(err) => Err(err),
        }
    }
}

fn step_failed(step: PipelineStep) -> impl FnOnce(CollaboratorError) -> KeeperError {
    move |err| match (step, err) {
        (PipelineStep::Persistence, err) => KeeperError::Persistence {
            reason: err.to_string(),
        },
        (step, err) => KeeperError::StepFailed {
            step,
            reason: err.to_string(),
        },
    }
}

/// Run one step under `timeout` and fold its result through the step policy.
pub async fn run_step<T, Fut>(step: PipelineStep, timeout: Duration, fut: Fut) -> StepOutcome<T>
where
    Fut: Future<Output = Result<T, KeeperError>>,
{
    info!(step = %step, "pipeline step started");
    let result = match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(KeeperError::StepTimedOut {
            step,
            seconds: timeout.as_secs(),
        }),
    };

    match result {
        Ok(value) => StepOutcome::Completed(value),
        Err(err) => match step.policy() {
            StepPolicy::Abort => {
                error!(step = %step, error = %err, "pipeline step failed, aborting draw");
                StepOutcome::Aborted(err)
            }
            StepPolicy::Continue => {
                warn!(step = %step, error = %err, "pipeline step failed, continuing");
                StepOutcome::Skipped(err)
            }
        },
    }
}

/// Inclusion proof of the winner's range and the snapshot root it proves against.
fn winner_commitment(
    snapshot: &Snapshot,
    winner: &WinnerData,
) -> Result<(Vec<String>, String), SelectionError> {
    snapshot
        .holders
        .iter()
        .position(|entry| *entry == winner.winner)
        .and_then(|index| snapshot.inclusion_proof(index))
        .zip(snapshot.merkle_root())
        .ok_or(SelectionError::CorruptSnapshot {
            ticket: winner.winning_ticket,
            total: snapshot.total_tickets,
        })
}

/// Settings the pipeline needs from [`KeeperConfig`](crate::msg::KeeperConfig).
#[derive(Clone, Debug)]
pub struct PipelineSettings {
    pub token_mint: String,
    pub excluded_addresses: Vec<String>,
    pub balance_per_ticket: Uint128,
    pub randomness_timeout: Duration,
    pub step_timeout: Duration,
}

/// Runs steps 1-7 of a draw, strictly one after another.
pub struct DrawPipeline {
    settings: PipelineSettings,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
}

impl DrawPipeline {
    pub fn new(settings: PipelineSettings, collaborators: Collaborators, clock: Arc<dyn Clock>) -> Self {
        DrawPipeline {
            settings,
            collaborators,
            clock,
        }
    }

    pub async fn execute(&self) -> Result<DrawResult, KeeperError> {
        let timeout = self.settings.step_timeout;

        // 1. Snapshot holders and allocate tickets
        let snapshot = run_step(PipelineStep::Snapshot, timeout, self.take_snapshot())
            .await
            .into_value()?;

        // 2. Verifiable randomness
        let randomness = self.collaborators.randomness.clone();
        let randomness = run_step(
            PipelineStep::Randomness,
            self.settings.randomness_timeout,
            async move {
                randomness
                    .request_randomness()
                    .await
                    .map_err(step_failed(PipelineStep::Randomness))
            },
        )
        .await
        .into_value()?;

        // 3. Winner selection, in-process
        let (winner, winner_proof, snapshot_root) =
            run_step(PipelineStep::Selection, timeout, async {
                let winner = select_winner(&snapshot, randomness.value)?;
                let (proof, root) = winner_commitment(&snapshot, &winner)?;
                Ok::<_, KeeperError>((winner, proof, root))
            })
            .await
            .into_value()?;
        info!(
            winner = %winner.winner.owner,
            winning_ticket = %winner.winning_ticket,
            total_tickets = %snapshot.total_tickets,
            "winner selected"
        );

        // 4. Accrued fees
        let fees = self.collaborators.fees.clone();
        let amounts = run_step(PipelineStep::FeeCheck, timeout, async move {
            fees.check_fees()
                .await
                .map_err(step_failed(PipelineStep::FeeCheck))
        })
        .await
        .into_value()?;

        let fees = self.collaborators.fees.clone();
        let claim_amounts = amounts.clone();
        let claim_tx = run_step(PipelineStep::FeeClaim, timeout, async move {
            fees.claim_fees(&claim_amounts)
                .await
                .map_err(step_failed(PipelineStep::FeeClaim))
        })
        .await
        .into_value()?;

        // 5. Swap claimed quote fees into the prize token
        let swapper = self.collaborators.swapper.clone();
        let quote_fee = amounts.quote_fee;
        let swap_tx = run_step(PipelineStep::Swap, timeout, async move {
            swapper
                .swap(quote_fee)
                .await
                .map_err(step_failed(PipelineStep::Swap))
        })
        .await
        .into_value()?;

        // 6. Pay the winner
        let distributor = self.collaborators.distributor.clone();
        let winner_owner = winner.winner.owner.clone();
        let distribution = run_step(PipelineStep::Distribution, timeout, async move {
            distributor
                .distribute(&winner_owner)
                .await
                .map_err(step_failed(PipelineStep::Distribution))
        })
        .await
        .into_value()?;

        let result = DrawResult {
            snapshot,
            snapshot_root,
            verification: VerificationData {
                random_number: randomness.value,
                request_tx: randomness.request_tx,
                randomness_account: randomness.randomness_account,
            },
            winner,
            winner_proof,
            fees: FeeData {
                base_fee: amounts.base_fee,
                quote_fee: amounts.quote_fee,
                claim_tx,
            },
            prize: PrizeData {
                swap_tx,
                distribution_tx: distribution.tx,
                amount: distribution.amount,
            },
            completed_at: self.clock.now(),
        };

        // 7. Persist, best effort
        let recorder = self.collaborators.recorder.clone();
        let saved = run_step(PipelineStep::Persistence, timeout, async {
            recorder
                .save(&result)
                .await
                .map_err(step_failed(PipelineStep::Persistence))
        })
        .await
        .tolerate()?;
        if saved.is_none() {
            warn!(
                winner = %result.winner.winner.owner,
                distribution_tx = %result.prize.distribution_tx,
                "draw result not persisted, announcing from memory"
            );
        }

        Ok(result)
    }

    async fn take_snapshot(&self) -> Result<Snapshot, KeeperError> {
        let list = self
            .collaborators
            .holders
            .list_holders(&self.settings.token_mint, &self.settings.excluded_addresses)
            .await
            .map_err(step_failed(PipelineStep::Snapshot))?;

        let excluded = &self.settings.excluded_addresses;
        let mut holders: Vec<_> = list
            .holders
            .into_iter()
            .filter(|h| !h.raw_balance.is_zero() && !excluded.contains(&h.owner))
            .collect();
        order_holders(&mut holders);

        let snapshot = allocate_tickets(&holders, self.settings.balance_per_ticket, list.block)?;
        info!(
            holders = snapshot.holders.len(),
            total_tickets = %snapshot.total_tickets,
            slot = snapshot.block.slot,
            "holder snapshot taken"
        );
        Ok(snapshot)
    }
}
