//! Integration tests for the holder lottery keeper.
//!
//! These tests drive a `DrawKeeper` end to end through its public entry
//! points (`tick`, `status`, `spawn_relay`, `spawn_fee_poller`, `welcome`,
//! `run`) with the in-memory collaborators from
//! `holder_lottery_keeper::testing`. Time-dependent tests run on a paused
//! tokio clock so announcement windows and retry backoff elapse instantly.
//!
//! Run:
//! ```bash
//! cargo test -p holder-lottery-integration-tests
//! ```

use std::sync::Arc;
use std::time::Duration;

use cosmwasm_std::{MemoryStorage, Uint128, Uint256, Uint512};
use holder_lottery_common::merkle::merkle_root;
use holder_lottery_common::{
    allocate_tickets, compute_leaf_hash, order_holders, select_winner, verify_merkle_proof,
    BlockInfo, DrawPhase, Holder,
};
use holder_lottery_keeper::collaborators::{Clock, Collaborators};
use holder_lottery_keeper::execute::PipelineStep;
use holder_lottery_keeper::testing::{
    ManualClock, MockHarness, MockSwapper, RecordingBroadcaster,
};
use holder_lottery_keeper::{
    DrawKeeper, FeeMode, KeeperConfig, KeeperError, StorageRecorder, TickOutcome,
};

// ─── Constants ───

/// 2024-01-01T10:00:00Z
const TEN_OCLOCK: u64 = 1_704_103_200;
const MINT: &str = "HLTRYmint1111111111111111111111111111111111";

// ─── Helpers ───

/// Keeper created at 10:01 with the clock already moved to the 10:45 draw.
fn due_keeper(config: KeeperConfig, collaborators: Collaborators) -> (DrawKeeper, Arc<ManualClock>) {
    let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
    let keeper = DrawKeeper::new(config, collaborators, clock.clone()).unwrap();
    clock.set_seconds(TEN_OCLOCK + 45 * 60);
    (keeper, clock)
}

fn announced_winner(outcome: TickOutcome) -> (String, Uint128) {
    match outcome {
        TickOutcome::Announced {
            winner,
            winning_ticket,
        } => (winner, winning_ticket),
        other => panic!("expected an announcement, got: {:?}", other),
    }
}

fn reference_holders() -> Vec<Holder> {
    let mut holders: Vec<Holder> = [("A", 50_000u128), ("B", 9_999), ("C", 20_000)]
        .iter()
        .map(|(owner, raw)| Holder::from_raw(*owner, Uint256::from(*raw), 0).unwrap())
        .collect();
    order_holders(&mut holders);
    holders
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[test]
fn test_ticket_boundaries_select_expected_owner() {
    // A = [0, 4], C = [5, 6], total 7. B holds less than one ticket.
    let block = BlockInfo {
        slot: 1,
        blockhash: "hash".to_string(),
        block_time: None,
    };
    let snapshot = allocate_tickets(&reference_holders(), Uint128::new(10_000), block).unwrap();
    assert_eq!(snapshot.total_tickets, Uint128::new(7));
    assert!(snapshot.holders.iter().all(|e| e.owner != "B"));

    for (randomness, ticket, owner) in [
        (23u128, 2u128, "A"),
        (4, 4, "A"),
        (5, 5, "C"),
        (6, 6, "C"),
        (7, 0, "A"),
    ] {
        let winner = select_winner(&snapshot, Uint512::from(randomness)).unwrap();
        assert_eq!(winner.winning_ticket, Uint128::new(ticket), "randomness {randomness}");
        assert_eq!(winner.winner.owner, owner, "randomness {randomness}");
    }

    eprintln!("test_ticket_boundaries_select_expected_owner passed");
}

#[tokio::test(start_paused = true)]
async fn test_full_draw_cycle_with_storage() {
    // Two consecutive draws through the keeper, persisted to a storage
    // backed recorder, with status pushes observed on a broadcaster.

    let harness = MockHarness::reference(23);
    let recorder = Arc::new(StorageRecorder::new(MemoryStorage::new()));
    let collaborators = Collaborators {
        recorder: recorder.clone(),
        ..harness.collaborators()
    };
    let (keeper, clock) = due_keeper(KeeperConfig::new(MINT), collaborators);
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let _relay = keeper.spawn_relay(broadcaster.clone());

    // 1. First draw at 10:45: randomness 23 -> ticket 2 -> A
    let (winner, ticket) = announced_winner(keeper.tick().await);
    assert_eq!(winner, "A");
    assert_eq!(ticket, Uint128::new(2));

    // 2. Status while announcing carries the whole result
    let status = keeper.status();
    assert_eq!(status.current_state, DrawPhase::Announcing);
    let result = status.last_draw_result.unwrap();
    assert_eq!(result.snapshot.total_tickets, Uint128::new(7));
    assert_eq!(result.fees.claim_tx.as_deref(), Some("claim-tx"));
    assert_eq!(result.prize.distribution_tx, "distribution-tx-1");

    // 3. The winner's range is committed under the snapshot root
    let leaf = compute_leaf_hash("A", 0, 4);
    assert!(
        verify_merkle_proof(&result.snapshot_root, &result.winner_proof, &leaf),
        "winner proof should verify"
    );
    let tampered = compute_leaf_hash("A", 0, 5);
    assert!(!verify_merkle_proof(
        &result.snapshot_root,
        &result.winner_proof,
        &tampered
    ));

    // 4. Announcement window ends, next slot is 11:00
    clock.advance_seconds(30);
    tokio::time::sleep(Duration::from_secs(31)).await;
    let state = keeper.state();
    assert_eq!(state.phase, DrawPhase::Waiting);
    assert_eq!(
        state.next_draw_time,
        cosmwasm_std::Timestamp::from_seconds(TEN_OCLOCK + 3_600)
    );
    assert!(matches!(keeper.tick().await, TickOutcome::NotDue));

    // 5. Second draw at 11:00 lands on C
    harness.randomness.set_value(Uint512::from(6u128));
    clock.set_seconds(TEN_OCLOCK + 3_600);
    let (winner, ticket) = announced_winner(keeper.tick().await);
    assert_eq!(winner, "C");
    assert_eq!(ticket, Uint128::new(6));

    // 6. Both draws are in storage, indexed by winner
    let history = recorder.history(None, None).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].result.winner.winner.owner, "A");
    assert_eq!(recorder.wins("C", None, None).unwrap(), vec![2]);

    // 7. Every transition was pushed in order
    tokio::time::sleep(Duration::from_secs(31)).await;
    let phases: Vec<DrawPhase> = broadcaster
        .statuses()
        .into_iter()
        .map(|status| status.current_state)
        .collect();
    assert_eq!(
        phases,
        vec![
            DrawPhase::Executing,
            DrawPhase::Announcing,
            DrawPhase::Waiting,
            DrawPhase::Executing,
            DrawPhase::Announcing,
            DrawPhase::Waiting,
        ]
    );

    eprintln!("test_full_draw_cycle_with_storage passed");
}

#[tokio::test(start_paused = true)]
async fn test_flaky_swap_recovers_within_retry_budget() {
    let mut harness = MockHarness::reference(23);
    harness.swapper = Arc::new(MockSwapper::failing_times(2));
    let (keeper, _clock) = due_keeper(KeeperConfig::new(MINT), harness.collaborators());

    announced_winner(keeper.tick().await);
    let result = keeper.state().last_draw_result.unwrap();
    assert_eq!(result.prize.swap_tx, "swap-tx-3");
    assert_eq!(harness.swapper.calls(), 3);
    assert_eq!(harness.distributor.paid(), vec!["A".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_hung_randomness_fails_and_rearms() {
    let harness = MockHarness::reference(23);
    harness.randomness.hang();
    let mut config = KeeperConfig::new(MINT);
    config.randomness_timeout_seconds = 5;
    let (keeper, clock) = due_keeper(config, harness.collaborators());

    match keeper.tick().await {
        TickOutcome::Failed {
            error: KeeperError::StepTimedOut { step, seconds },
        } => {
            assert_eq!(step, PipelineStep::Randomness);
            assert_eq!(seconds, 5);
        }
        other => panic!("expected a randomness timeout, got: {:?}", other),
    }

    // No fee, swap or prize side effects
    assert_eq!(harness.fees.claims(), 0);
    assert!(harness.swapper.calls() == 0);
    assert!(harness.distributor.paid().is_empty());

    let state = keeper.state();
    assert_eq!(state.phase, DrawPhase::Waiting);
    assert!(state.next_draw_time > clock.now());
    assert!(state.last_draw_result.is_none());
}

#[tokio::test]
async fn test_no_eligible_holders_fails_cleanly() {
    let harness = MockHarness::with_holders(&[("dust_1", 9_999), ("dust_2", 500)], 23);
    let (keeper, _clock) = due_keeper(KeeperConfig::new(MINT), harness.collaborators());

    assert!(matches!(
        keeper.tick().await,
        TickOutcome::Failed {
            error: KeeperError::Selection(_)
        }
    ));
    assert_eq!(harness.fees.claims(), 0);
    assert_eq!(keeper.state().phase, DrawPhase::Waiting);
}

#[tokio::test]
async fn test_persistence_failure_still_announces() {
    let harness = MockHarness::reference(5);
    harness.recorder.fail_always();
    let (keeper, _clock) = due_keeper(KeeperConfig::new(MINT), harness.collaborators());

    let (winner, ticket) = announced_winner(keeper.tick().await);
    assert_eq!((winner.as_str(), ticket), ("C", Uint128::new(5)));
    assert_eq!(harness.distributor.paid().len(), 1);
    assert!(harness.recorder.saved().is_empty());
    assert_eq!(keeper.state().phase, DrawPhase::Announcing);
}

#[tokio::test]
async fn test_fixed_jackpot_from_json_config() {
    let config = KeeperConfig::from_json(
        r#"{
            "token_mint": "HLTRYmint1111111111111111111111111111111111",
            "excluded_addresses": ["C"],
            "fee_mode": { "fixed": { "base_fee": "0", "quote_fee": "220000000000" } }
        }"#,
    )
    .unwrap();
    assert_eq!(config.draw_minutes, vec![0, 45]);
    assert_eq!(
        config.fee_mode,
        FeeMode::Fixed {
            base_fee: Uint128::zero(),
            quote_fee: Uint128::new(220_000_000_000),
        }
    );

    let harness = MockHarness::reference(6);
    let (keeper, _clock) = due_keeper(config, harness.collaborators());

    // C is excluded, so A holds every ticket
    let (winner, ticket) = announced_winner(keeper.tick().await);
    assert_eq!(winner, "A");
    assert_eq!(ticket, Uint128::new(1));
    assert_eq!(harness.fees.claims(), 0);
    assert_eq!(harness.swapper.amounts(), vec![Uint128::new(220_000_000_000)]);

    // unknown fields are rejected
    assert!(KeeperConfig::from_json(r#"{"token_mint":"m","bogus":1}"#).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_pay_once() {
    let harness = MockHarness::reference(23);
    let gate = harness.randomness.gate();
    let (keeper, _clock) = due_keeper(KeeperConfig::new(MINT), harness.collaborators());
    let keeper = Arc::new(keeper);

    let first = {
        let keeper = keeper.clone();
        tokio::spawn(async move { keeper.tick().await })
    };
    // wait until the first trigger is inside the pipeline
    while harness.randomness.calls() == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let others: Vec<_> = (0..8)
        .map(|_| {
            let keeper = keeper.clone();
            tokio::spawn(async move { keeper.tick().await })
        })
        .collect();
    for handle in others {
        assert!(matches!(handle.await.unwrap(), TickOutcome::Busy));
    }

    gate.notify_one();
    announced_winner(first.await.unwrap());
    assert_eq!(harness.distributor.paid(), vec!["A".to_string()]);
    assert_eq!(harness.randomness.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_triggers_due_draw() {
    let harness = MockHarness::reference(23);
    let (keeper, _clock) = due_keeper(KeeperConfig::new(MINT), harness.collaborators());
    let keeper = Arc::new(keeper);

    let runner = tokio::spawn(keeper.clone().run());
    // first interval tick fires immediately
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(keeper.state().phase, DrawPhase::Announcing);

    // later ticks during the announcement do not start another draw
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(harness.distributor.paid().len(), 1);

    runner.abort();
}

#[tokio::test(start_paused = true)]
async fn test_fee_updates_reach_new_observers() {
    let mut config = KeeperConfig::new(MINT);
    config.fee_mode = FeeMode::Fixed {
        base_fee: Uint128::zero(),
        quote_fee: Uint128::new(220_000_000_000),
    };
    let harness = MockHarness::reference(23);
    let clock = ManualClock::at_seconds(TEN_OCLOCK + 60);
    let keeper = DrawKeeper::new(config, harness.collaborators(), clock).unwrap();

    // 1. The poller reads the configured amounts, never the live pool
    let broadcaster = Arc::new(RecordingBroadcaster::default());
    let poller = keeper.spawn_fee_poller(broadcaster.clone());
    tokio::time::sleep(Duration::from_secs(25)).await;
    let updates = broadcaster.fee_updates();
    assert_eq!(updates.len(), 3);
    assert!(updates
        .iter()
        .all(|fees| fees.quote_fee == Uint128::new(220_000_000_000)));
    assert_eq!(harness.fees.checks(), 0);

    // 2. A late observer gets status then fees, in wire form
    let observer = RecordingBroadcaster::default();
    keeper.welcome(&observer);
    let wire: Vec<serde_json::Value> = observer
        .messages()
        .iter()
        .map(|message| serde_json::from_str(&message.to_json().unwrap()).unwrap())
        .collect();
    assert_eq!(wire.len(), 2);
    assert_eq!(wire[0]["type"], "drawStatusUpdate");
    assert_eq!(wire[0]["data"]["current_state"], "waiting");
    assert_eq!(wire[1]["type"], "feesUpdate");
    assert_eq!(wire[1]["data"]["quote_fee"], "220000000000");

    // 3. The poller ends with the keeper
    drop(keeper);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(poller.is_finished());
}

#[test]
fn test_snapshot_root_matches_manual_tree() {
    let block = BlockInfo {
        slot: 1,
        blockhash: "hash".to_string(),
        block_time: None,
    };
    let snapshot = allocate_tickets(&reference_holders(), Uint128::new(10_000), block).unwrap();

    let leaves = vec![compute_leaf_hash("A", 0, 4), compute_leaf_hash("C", 5, 6)];
    let expected = merkle_root(&leaves).unwrap();
    assert_eq!(snapshot.merkle_root().unwrap(), hex::encode(expected));

    for (index, leaf) in leaves.iter().enumerate() {
        let proof = snapshot.inclusion_proof(index).unwrap();
        assert!(verify_merkle_proof(&hex::encode(expected), &proof, leaf));
    }
}
