use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cosmwasm_schema::cw_serde;
use cosmwasm_std::{Decimal256, Timestamp, Uint128, Uint512};
use holder_lottery_common::{DrawPhase, Snapshot, WinnerData};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::collaborators::Clock;
use crate::schedule::DrawSchedule;

/// Buffered change events per subscriber before it starts lagging.
const UPDATE_CHANNEL_CAPACITY: usize = 64;

#[cw_serde]
pub struct VerificationData {
    pub random_number: Uint512,
    pub request_tx: String,
    pub randomness_account: String,
}

#[cw_serde]
pub struct FeeData {
    pub base_fee: Uint128,
    pub quote_fee: Uint128,
    pub claim_tx: Option<String>,
}

#[cw_serde]
pub struct PrizeData {
    pub swap_tx: String,
    pub distribution_tx: String,
    pub amount: Decimal256,
}

/// Everything one successful draw produced.
#[cw_serde]
pub struct DrawResult {
    pub snapshot: Snapshot,
    /// Merkle root over the snapshot's ticket ranges (hex)
    pub snapshot_root: String,
    pub verification: VerificationData,
    pub winner: WinnerData,
    /// Proof that the winner's range is under `snapshot_root`
    pub winner_proof: Vec<String>,
    pub fees: FeeData,
    pub prize: PrizeData,
    pub completed_at: Timestamp,
}

/// Read-only copy of the lifecycle state, as handed to observers.
#[cw_serde]
pub struct DrawState {
    pub phase: DrawPhase,
    pub next_draw_time: Timestamp,
    pub last_draw_result: Option<DrawResult>,
}

/// Why a tick did not start a draw.
#[derive(Clone, Debug, PartialEq)]
pub enum Idle {
    NotDue { next_draw_time: Timestamp },
    Busy { phase: DrawPhase },
}

struct Inner {
    state: DrawState,
    /// Bumped on every draw start; the announcement timer only resets the
    /// cycle it was scheduled for.
    cycle: u64,
    announce_timer: Option<JoinHandle<()>>,
}

impl Inner {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.announce_timer.take() {
            timer.abort();
        }
    }
}

/// Owner of the draw lifecycle.
///
/// State is only changed through the transition methods below; each
/// committed transition publishes the full new state on a broadcast channel.
/// Publishing never waits for subscribers.
pub struct DrawStateMachine {
    inner: Mutex<Inner>,
    updates: broadcast::Sender<DrawState>,
    clock: Arc<dyn Clock>,
    schedule: DrawSchedule,
    announce_window: Duration,
}

impl DrawStateMachine {
    pub fn new(clock: Arc<dyn Clock>, schedule: DrawSchedule, announce_window: Duration) -> Arc<Self> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let next_draw_time = schedule.next_after(clock.now());
        info!(next_draw_time = %next_draw_time, "draw keeper waiting");

        Arc::new(DrawStateMachine {
            inner: Mutex::new(Inner {
                state: DrawState {
                    phase: DrawPhase::Waiting,
                    next_draw_time,
                    last_draw_result: None,
                },
                cycle: 0,
                announce_timer: None,
            }),
            updates,
            clock,
            schedule,
            announce_window,
        })
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, state: &DrawState) {
        // Err only means nobody is listening
        let _ = self.updates.send(state.clone());
    }

    pub fn state(&self) -> DrawState {
        self.lock().state.clone()
    }

    pub fn phase(&self) -> DrawPhase {
        self.lock().state.phase.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DrawState> {
        self.updates.subscribe()
    }

    /// `Waiting -> Executing`, if a draw is due.
    ///
    /// Check and set happen under one lock, so of any number of concurrent
    /// callers at most one receives a guard.
    pub fn begin_execution(self: &Arc<Self>) -> Result<ExecutionGuard, Idle> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if inner.state.phase != DrawPhase::Waiting {
            return Err(Idle::Busy {
                phase: inner.state.phase.clone(),
            });
        }
        if now < inner.state.next_draw_time {
            return Err(Idle::NotDue {
                next_draw_time: inner.state.next_draw_time,
            });
        }

        inner.cycle += 1;
        inner.state.phase = DrawPhase::Executing;
        inner.state.last_draw_result = None;
        info!(cycle = inner.cycle, "draw execution started");
        self.publish(&inner.state);

        Ok(ExecutionGuard {
            machine: Arc::clone(self),
            cycle: inner.cycle,
            settled: false,
        })
    }

    /// `Executing -> Announcing`. Schedules the automatic return to Waiting.
    fn announce(self: &Arc<Self>, cycle: u64, result: DrawResult) {
        let mut inner = self.lock();
        if inner.state.phase != DrawPhase::Executing || inner.cycle != cycle {
            warn!(cycle, "announcement for a draw that is no longer executing, ignored");
            return;
        }

        info!(
            cycle,
            winner = %result.winner.winner.owner,
            winning_ticket = %result.winner.winning_ticket,
            "announcing draw result"
        );
        inner.state.phase = DrawPhase::Announcing;
        inner.state.last_draw_result = Some(result);

        inner.cancel_timer();
        let machine: Weak<Self> = Arc::downgrade(self);
        let window = self.announce_window;
        inner.announce_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(window).await;
            if let Some(machine) = machine.upgrade() {
                machine.finish_announcement(cycle);
            }
        }));

        self.publish(&inner.state);
    }

    /// `Executing -> Waiting` after a failed pipeline.
    fn fail_execution(&self, cycle: u64) {
        let mut inner = self.lock();
        if inner.state.phase != DrawPhase::Executing || inner.cycle != cycle {
            return;
        }
        self.return_to_waiting(&mut inner);
    }

    /// `Announcing -> Waiting` when the display window ends.
    ///
    /// A no-op unless the announcement for `cycle` is still showing, so a
    /// timer that fires after a manual reset changes nothing.
    fn finish_announcement(&self, cycle: u64) {
        let mut inner = self.lock();
        if inner.state.phase != DrawPhase::Announcing || inner.cycle != cycle {
            debug!(cycle, "stale announcement timer fired, ignored");
            return;
        }
        inner.announce_timer = None;
        self.return_to_waiting(&mut inner);
    }

    /// End the current announcement early. Returns false when not announcing.
    pub fn reset_to_waiting(&self) -> bool {
        let mut inner = self.lock();
        if inner.state.phase != DrawPhase::Announcing {
            return false;
        }
        self.return_to_waiting(&mut inner);
        true
    }

    fn return_to_waiting(&self, inner: &mut Inner) {
        inner.cancel_timer();
        inner.state.phase = DrawPhase::Waiting;
        inner.state.last_draw_result = None;
        inner.state.next_draw_time = self.schedule.next_after(self.clock.now());
        info!(next_draw_time = %inner.state.next_draw_time, "draw keeper waiting");
        self.publish(&inner.state);
    }
}

/// Proof that the holder is the one in-flight draw.
///
/// Consumed by [`announce`](ExecutionGuard::announce) or
/// [`fail`](ExecutionGuard::fail). Dropping it unsettled, for example when
/// the pipeline panics or the tick future is cancelled, takes the failure
/// path so the machine never stays in Executing.
pub struct ExecutionGuard {
    machine: Arc<DrawStateMachine>,
    cycle: u64,
    settled: bool,
}

impl ExecutionGuard {
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn announce(mut self, result: DrawResult) {
        self.settled = true;
        self.machine.announce(self.cycle, result);
    }

    pub fn fail(mut self) {
        self.settled = true;
        self.machine.fail_execution(self.cycle);
    }
}

impl fmt::Debug for ExecutionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionGuard")
            .field("cycle", &self.cycle)
            .field("settled", &self.settled)
            .finish()
    }
}

impl Drop for ExecutionGuard {
    fn drop(&mut self) {
        if !self.settled {
            warn!(cycle = self.cycle, "draw abandoned mid-pipeline, returning to waiting");
            self.machine.fail_execution(self.cycle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_result, ManualClock};

    // 2024-01-01T10:00:00Z
    const TEN_OCLOCK: u64 = 1_704_103_200;

    fn machine(clock: &Arc<ManualClock>) -> Arc<DrawStateMachine> {
        DrawStateMachine::new(
            clock.clone(),
            DrawSchedule::new(&[0, 45]).unwrap(),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_initial_state() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
        let machine = machine(&clock);
        let state = machine.state();
        assert_eq!(state.phase, DrawPhase::Waiting);
        assert_eq!(state.next_draw_time, Timestamp::from_seconds(TEN_OCLOCK + 45 * 60));
        assert!(state.last_draw_result.is_none());
    }

    #[tokio::test]
    async fn test_not_due_before_next_draw_time() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
        let machine = machine(&clock);
        let idle = machine.begin_execution().unwrap_err();
        assert_eq!(
            idle,
            Idle::NotDue {
                next_draw_time: Timestamp::from_seconds(TEN_OCLOCK + 45 * 60)
            }
        );
        assert_eq!(machine.phase(), DrawPhase::Waiting);
    }

    #[tokio::test]
    async fn test_second_begin_is_rejected_while_executing() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 45 * 60);

        let guard = machine.begin_execution().unwrap();
        assert_eq!(machine.phase(), DrawPhase::Executing);

        let idle = machine.begin_execution().unwrap_err();
        assert_eq!(
            idle,
            Idle::Busy {
                phase: DrawPhase::Executing
            }
        );
        guard.fail();
    }

    #[tokio::test]
    async fn test_failure_returns_to_waiting_with_future_time() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 45 * 60);
        let mut updates = machine.subscribe();

        let guard = machine.begin_execution().unwrap();
        // pipeline took a while before failing
        clock.set_seconds(TEN_OCLOCK + 46 * 60);
        guard.fail();

        let state = machine.state();
        assert_eq!(state.phase, DrawPhase::Waiting);
        assert!(state.last_draw_result.is_none());
        assert!(state.next_draw_time > clock.now());
        assert_eq!(state.next_draw_time, Timestamp::from_seconds(TEN_OCLOCK + 3_600));

        assert_eq!(updates.recv().await.unwrap().phase, DrawPhase::Executing);
        assert_eq!(updates.recv().await.unwrap().phase, DrawPhase::Waiting);
    }

    #[tokio::test]
    async fn test_dropped_guard_fails_the_draw() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 45 * 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 3_600);
        {
            let _guard = machine.begin_execution().unwrap();
        }
        assert_eq!(machine.phase(), DrawPhase::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_announcement_times_out_to_waiting() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 45 * 60);
        let mut updates = machine.subscribe();

        let guard = machine.begin_execution().unwrap();
        guard.announce(sample_result());

        let state = machine.state();
        assert_eq!(state.phase, DrawPhase::Announcing);
        assert!(state.last_draw_result.is_some());

        assert_eq!(updates.recv().await.unwrap().phase, DrawPhase::Executing);
        assert_eq!(updates.recv().await.unwrap().phase, DrawPhase::Announcing);
        // paused runtime auto-advances to the display timer
        let state = updates.recv().await.unwrap();
        assert_eq!(state.phase, DrawPhase::Waiting);
        assert!(state.last_draw_result.is_none());
        assert_eq!(state.next_draw_time, Timestamp::from_seconds(TEN_OCLOCK + 3_600));
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_reset_races_timer_harmlessly() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 45 * 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 3_600);

        let guard = machine.begin_execution().unwrap();
        guard.announce(sample_result());
        let mut updates = machine.subscribe();

        assert!(machine.reset_to_waiting());
        assert!(!machine.reset_to_waiting());
        assert_eq!(updates.recv().await.unwrap().phase, DrawPhase::Waiting);

        // let the original 30s window elapse: no second Waiting transition
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(matches!(
            updates.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ));

        // the stale timer must not touch a later cycle either
        machine.finish_announcement(1);
        assert_eq!(machine.phase(), DrawPhase::Waiting);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_timer_does_not_end_next_announcement() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 45 * 60);
        let machine = machine(&clock);

        clock.set_seconds(TEN_OCLOCK + 3_600);
        machine.begin_execution().unwrap().announce(sample_result());
        assert!(machine.reset_to_waiting());

        clock.set_seconds(TEN_OCLOCK + 3_600 + 45 * 60);
        let guard = machine.begin_execution().unwrap();
        assert_eq!(guard.cycle(), 2);
        guard.announce(sample_result());

        // a timer from cycle 1 firing now is ignored
        machine.finish_announcement(1);
        assert_eq!(machine.phase(), DrawPhase::Announcing);
    }

    #[tokio::test]
    async fn test_guard_debug_shows_cycle() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 45 * 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 3_600);

        let guard = machine.begin_execution().unwrap();
        assert_eq!(
            format!("{guard:?}"),
            "ExecutionGuard { cycle: 1, settled: false }"
        );
        // busy while the guard is held
        assert!(machine.begin_execution().is_err());
        guard.fail();
    }

    #[tokio::test]
    async fn test_announce_after_failure_is_ignored() {
        let clock = ManualClock::at_seconds(TEN_OCLOCK + 45 * 60);
        let machine = machine(&clock);
        clock.set_seconds(TEN_OCLOCK + 3_600);

        let guard = machine.begin_execution().unwrap();
        let cycle = guard.cycle();
        guard.fail();
        machine.announce(cycle, sample_result());
        assert_eq!(machine.phase(), DrawPhase::Waiting);
        assert!(machine.state().last_draw_result.is_none());
    }
}
