use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use holder_lottery_common::DrawPhase;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::collaborators::{Broadcaster, Clock, FeeSource};
use crate::error::CollaboratorError;
use crate::query::{FeesResponse, StatusMessage};
use crate::state::DrawStateMachine;

/// Last known unclaimed fees, served to observers between draws.
pub struct FeeMonitor {
    source: Arc<dyn FeeSource>,
    clock: Arc<dyn Clock>,
    latest: Mutex<FeesResponse>,
}

impl FeeMonitor {
    pub fn new(source: Arc<dyn FeeSource>, clock: Arc<dyn Clock>) -> Self {
        FeeMonitor {
            source,
            clock,
            latest: Mutex::new(FeesResponse::unknown()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeesResponse> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn latest(&self) -> FeesResponse {
        self.lock().clone()
    }

    /// Read the fee source and remember the result. A failed read keeps the
    /// previous value.
    pub async fn refresh(&self) -> Result<FeesResponse, CollaboratorError> {
        let amounts = self.source.check_fees().await?;
        let fees = FeesResponse {
            base_fee: amounts.base_fee,
            quote_fee: amounts.quote_fee,
            updated_at: Some(self.clock.now()),
        };
        *self.lock() = fees.clone();
        Ok(fees)
    }
}

/// Re-read fees every `period` and push each fresh value as a `feesUpdate`.
///
/// Reads only happen while the keeper is Waiting; during a draw the pipeline
/// reads and claims the fees itself. Stops once the state machine is gone.
pub fn spawn_fee_poller(
    monitor: Arc<FeeMonitor>,
    machine: Weak<DrawStateMachine>,
    broadcaster: Arc<dyn Broadcaster>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            interval.tick().await;
            let phase = match machine.upgrade() {
                Some(machine) => machine.phase(),
                None => break,
            };
            if phase != DrawPhase::Waiting {
                debug!(?phase, "fee poll skipped while drawing");
                continue;
            }

            match monitor.refresh().await {
                Ok(fees) => broadcaster.notify(&StatusMessage::FeesUpdate(fees)),
                Err(err) => warn!(error = %err, "unclaimed fee check failed"),
            }
        }
    })
}
