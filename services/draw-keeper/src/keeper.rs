use std::sync::Arc;
use std::time::Duration;

use cosmwasm_std::Uint128;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::collaborators::{
    Broadcaster, Clock, Collaborators, FeeSource, FixedFeeSource, RetryingRandomness,
    RetryingSwapper,
};
use crate::error::{CollaboratorError, KeeperError};
use crate::execute::{DrawPipeline, PipelineSettings};
use crate::fees::{spawn_fee_poller, FeeMonitor};
use crate::msg::{FeeMode, KeeperConfig};
use crate::query::{query_status, spawn_relay, FeesResponse, StatusMessage, StatusResponse};
use crate::schedule::DrawSchedule;
use crate::state::{DrawState, DrawStateMachine, Idle};

/// What one trigger tick did.
#[derive(Debug)]
pub enum TickOutcome {
    /// Waiting, and the next draw time has not been reached
    NotDue,
    /// A draw is executing or being announced; the tick did nothing
    Busy,
    Announced {
        winner: String,
        winning_ticket: Uint128,
    },
    Failed {
        error: KeeperError,
    },
}

/// The draw core: state machine plus pipeline, driven by [`tick`](DrawKeeper::tick).
pub struct DrawKeeper {
    config: KeeperConfig,
    machine: Arc<DrawStateMachine>,
    pipeline: DrawPipeline,
    fee_monitor: Arc<FeeMonitor>,
}

impl DrawKeeper {
    pub fn new(
        config: KeeperConfig,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, KeeperError> {
        config.validate()?;

        let schedule = DrawSchedule::new(&config.draw_minutes)?;
        let machine = DrawStateMachine::new(
            clock.clone(),
            schedule,
            Duration::from_secs(config.announce_seconds),
        );

        let fees: Arc<dyn FeeSource> = match &config.fee_mode {
            FeeMode::Live => collaborators.fees.clone(),
            FeeMode::Fixed {
                base_fee,
                quote_fee,
            } => Arc::new(FixedFeeSource::new(*base_fee, *quote_fee)),
        };
        let fee_monitor = Arc::new(FeeMonitor::new(fees.clone(), clock.clone()));
        let collaborators = Collaborators {
            randomness: Arc::new(RetryingRandomness::new(
                collaborators.randomness.clone(),
                config.randomness_retry.clone(),
            )),
            swapper: Arc::new(RetryingSwapper::new(
                collaborators.swapper.clone(),
                config.swap_retry.clone(),
            )),
            fees,
            ..collaborators
        };

        let settings = PipelineSettings {
            token_mint: config.token_mint.clone(),
            excluded_addresses: config.excluded_addresses.clone(),
            balance_per_ticket: config.balance_per_ticket,
            randomness_timeout: Duration::from_secs(config.randomness_timeout_seconds),
            step_timeout: Duration::from_secs(config.step_timeout_seconds),
        };

        Ok(DrawKeeper {
            pipeline: DrawPipeline::new(settings, collaborators, clock),
            machine,
            fee_monitor,
            config,
        })
    }

    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    /// Start a draw if one is due and run it to completion.
    ///
    /// Safe to call from overlapping triggers: only one call at a time gets
    /// past the `Waiting -> Executing` check, the others return `Busy`.
    pub async fn tick(&self) -> TickOutcome {
        let guard = match self.machine.begin_execution() {
            Ok(guard) => guard,
            Err(Idle::NotDue { next_draw_time }) => {
                debug!(next_draw_time = %next_draw_time, "draw not due");
                return TickOutcome::NotDue;
            }
            Err(Idle::Busy { phase }) => {
                debug!(?phase, "draw keeper busy, tick skipped");
                return TickOutcome::Busy;
            }
        };

        match self.pipeline.execute().await {
            Ok(result) => {
                let winner = result.winner.winner.owner.clone();
                let winning_ticket = result.winner.winning_ticket;
                guard.announce(result);
                TickOutcome::Announced {
                    winner,
                    winning_ticket,
                }
            }
            Err(error) => {
                error!(cycle = guard.cycle(), error = %error, "draw failed, waiting for next slot");
                guard.fail();
                TickOutcome::Failed { error }
            }
        }
    }

    pub fn state(&self) -> DrawState {
        self.machine.state()
    }

    pub fn status(&self) -> StatusResponse {
        query_status(&self.machine.state(), self.config.status_holder_limit)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DrawState> {
        self.machine.subscribe()
    }

    /// Push every state change to `broadcaster` from a background task.
    pub fn spawn_relay(&self, broadcaster: Arc<dyn Broadcaster>) -> JoinHandle<()> {
        spawn_relay(
            self.machine.subscribe(),
            broadcaster,
            self.config.status_holder_limit,
        )
    }

    /// Unclaimed fees as of the last successful read.
    pub fn unclaimed_fees(&self) -> FeesResponse {
        self.fee_monitor.latest()
    }

    pub async fn refresh_fees(&self) -> Result<FeesResponse, CollaboratorError> {
        self.fee_monitor.refresh().await
    }

    /// Re-read unclaimed fees every `fee_poll_seconds` while no draw is
    /// running and push each value to `broadcaster`.
    pub fn spawn_fee_poller(&self, broadcaster: Arc<dyn Broadcaster>) -> JoinHandle<()> {
        spawn_fee_poller(
            self.fee_monitor.clone(),
            Arc::downgrade(&self.machine),
            broadcaster,
            Duration::from_secs(self.config.fee_poll_seconds),
        )
    }

    /// Bring a newly connected observer up to date: current status first,
    /// then the last known fees.
    pub fn welcome(&self, observer: &dyn Broadcaster) {
        observer.notify(&StatusMessage::DrawStatusUpdate(self.status()));
        observer.notify(&StatusMessage::FeesUpdate(self.unclaimed_fees()));
    }

    /// End the current announcement early.
    pub fn reset_to_waiting(&self) -> bool {
        self.machine.reset_to_waiting()
    }

    /// Tick every `tick_interval_seconds` forever.
    ///
    /// Each draw runs on its own task so a long pipeline never delays the
    /// trigger; overlapping ticks fall through as `Busy`.
    pub async fn run(self: Arc<Self>) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.tick_interval_seconds));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            token_mint = %self.config.token_mint,
            interval_seconds = self.config.tick_interval_seconds,
            "draw keeper started"
        );

        loop {
            interval.tick().await;
            let keeper = Arc::clone(&self);
            tokio::spawn(async move {
                keeper.tick().await;
            });
        }
    }
}
