//! End-to-end round flows: gated admission, streaming, settlement, payout.

use std::sync::Arc;
use std::time::Duration;

use lotto::config::AppConfig;
use lotto::engine::gate::{GateState, RejectReason};
use lotto::engine::Lottery;
use lotto::types::{Entry, LottoError, PayoutStatus};

use crate::mock_gateway::{MockGateway, PaymentScript};

fn lottery_with(cfg: AppConfig) -> (Arc<Lottery>, Arc<MockGateway>) {
    let gw = Arc::new(MockGateway::new());
    (Arc::new(Lottery::new(&cfg, gw.clone())), gw)
}

fn lottery() -> (Arc<Lottery>, Arc<MockGateway>) {
    lottery_with(AppConfig::default())
}

/// Request an entry, pay its invoice, and wait for the gate.
async fn enter(lottery: &Lottery, gw: &MockGateway, id: &str, amount: u64) -> GateState {
    let pending = lottery.request_entry(id, amount).await.unwrap();
    gw.settle(&pending.invoice.handle);
    pending.outcome().await
}

#[tokio::test]
async fn test_replay_then_live_in_order() {
    let (lottery, gw) = lottery();
    enter(&lottery, &gw, "A", 10).await;
    enter(&lottery, &gw, "B", 20).await;

    let mut stream = lottery.subscribe_entries().await;
    enter(&lottery, &gw, "C", 30).await;

    assert_eq!(stream.recv().await, Some(Entry::new("A", 10)));
    assert_eq!(stream.recv().await, Some(Entry::new("B", 20)));
    assert_eq!(stream.recv().await, Some(Entry::new("C", 30)));
    assert_eq!(stream.try_recv(), None);
}

#[tokio::test]
async fn test_settlement_pays_winner_and_resets() {
    let (lottery, gw) = lottery();
    assert_eq!(enter(&lottery, &gw, "alice", 100).await, GateState::Admitted { round: 0 });
    assert_eq!(enter(&lottery, &gw, "bob", 300).await, GateState::Admitted { round: 0 });

    let settlement = lottery.settle_round().await.unwrap();
    let record = &settlement.record;
    assert_eq!(record.round_index, 0);
    assert_eq!(record.pot, 400);
    assert_eq!(record.payout_amount, 396);
    assert!(record.participant_id == "alice" || record.participant_id == "bob");

    let snap = lottery.snapshot().await;
    assert_eq!(snap.round_index, 1);
    assert_eq!(snap.pot, 0);
    assert!(snap.entries.is_empty());

    let status = settlement.payout.unwrap().await.unwrap();
    assert_eq!(status, PayoutStatus::Succeeded);

    let payments = gw.payments();
    assert_eq!(payments.len(), 1);
    assert_eq!(payments[0].target, record.participant_id);
    assert_eq!(payments[0].amount, 396);
    assert_eq!(payments[0].timeout, Duration::from_secs(60));

    let snap = lottery.snapshot().await;
    assert_eq!(snap.winners.len(), 1);
    assert_eq!(snap.winners[0].payout_status, PayoutStatus::Succeeded);
}

#[tokio::test]
async fn test_empty_round_has_no_winner() {
    let (lottery, gw) = lottery();
    assert!(lottery.settle_round().await.is_none());
    assert!(lottery.settle_round().await.is_none());

    let snap = lottery.snapshot().await;
    assert_eq!(snap.round_index, 2);
    assert!(snap.winners.is_empty());
    assert!(gw.payments().is_empty());
}

#[tokio::test]
async fn test_gateway_error_surfaces_to_requester() {
    let (lottery, gw) = lottery();
    gw.set_error("node offline");

    let result = lottery.request_entry("alice", 50).await;
    match result {
        Err(LottoError::Gateway { operation, message }) => {
            assert_eq!(operation, "create_invoice");
            assert!(message.contains("node offline"));
        }
        other => panic!("expected gateway error, got {other:?}"),
    }
    assert_eq!(lottery.snapshot().await.pot, 0);

    gw.clear_error();
    assert_eq!(enter(&lottery, &gw, "alice", 50).await, GateState::Admitted { round: 0 });
}

#[tokio::test]
async fn test_validation_error_issues_no_invoice() {
    let (lottery, _gw) = lottery();
    let result = lottery.request_entry("   ", 50).await;
    assert!(matches!(result, Err(LottoError::Validation(_))));

    let result = lottery.request_entry("alice", 0).await;
    assert!(matches!(result, Err(LottoError::Validation(_))));
}

#[tokio::test]
async fn test_canceled_invoice_is_not_admitted() {
    let (lottery, gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();
    assert_eq!(pending.state(), GateState::AwaitingSettlement);

    gw.cancel(&pending.invoice.handle);
    assert_eq!(
        pending.outcome().await,
        GateState::Rejected(RejectReason::Canceled)
    );
    assert_eq!(lottery.snapshot().await.pot, 0);
}

#[tokio::test]
async fn test_broken_settlement_stream_rejects_entry() {
    let (lottery, gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();
    gw.break_stream(&pending.invoice.handle);

    let outcome = pending.outcome().await;
    assert!(matches!(
        outcome,
        GateState::Rejected(RejectReason::StreamLost(_))
    ));
    assert!(lottery.snapshot().await.entries.is_empty());
}

#[tokio::test]
async fn test_late_settlement_lands_in_next_round() {
    let (lottery, gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();

    // Round 0 closes while the invoice is still open.
    assert!(lottery.settle_round().await.is_none());

    gw.settle(&pending.invoice.handle);
    assert_eq!(pending.outcome().await, GateState::Admitted { round: 1 });

    let snap = lottery.snapshot().await;
    assert_eq!(snap.round_index, 1);
    assert_eq!(snap.pot, 50);
}

#[tokio::test]
async fn test_invoice_watch_reports_settlement() {
    let (lottery, gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();
    let handle = pending.invoice.handle.clone();

    let watcher = {
        let lottery = Arc::clone(&lottery);
        let handle = handle.clone();
        tokio::spawn(async move { lottery.watch_invoice(&handle).await })
    };
    tokio::task::yield_now().await;
    gw.settle(&handle);

    let state = watcher.await.unwrap().unwrap();
    assert_eq!(state, lotto::gateway::InvoiceState::Settled);
    pending.outcome().await;
}

#[tokio::test]
async fn test_failed_payout_is_recorded() {
    let (lottery, gw) = lottery();
    gw.set_payment_script(PaymentScript::Fail);
    enter(&lottery, &gw, "alice", 1_000).await;

    let settlement = lottery.settle_round().await.unwrap();
    assert_eq!(settlement.payout.unwrap().await.unwrap(), PayoutStatus::Failed);
    assert_eq!(
        lottery.snapshot().await.winners[0].payout_status,
        PayoutStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn test_hung_payout_times_out() {
    let (lottery, gw) = lottery();
    gw.set_payment_script(PaymentScript::Hang);
    enter(&lottery, &gw, "alice", 1_000).await;

    let settlement = lottery.settle_round().await.unwrap();
    assert_eq!(
        settlement.payout.unwrap().await.unwrap(),
        PayoutStatus::TimedOut
    );
    assert_eq!(
        lottery.snapshot().await.winners[0].payout_status,
        PayoutStatus::TimedOut
    );
}

#[tokio::test]
async fn test_shutdown_stops_pending_gates() {
    let (lottery, _gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();

    lottery.shutdown();
    assert_eq!(
        pending.outcome().await,
        GateState::Rejected(RejectReason::Shutdown)
    );
    assert_eq!(lottery.snapshot().await.pot, 0);
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_releases_invoice_watchers() {
    let (lottery, _gw) = lottery();
    let pending = lottery.request_entry("alice", 50).await.unwrap();

    let watcher = {
        let lottery = Arc::clone(&lottery);
        let handle = pending.invoice.handle.clone();
        tokio::spawn(async move { lottery.watch_invoice(&handle).await })
    };
    tokio::task::yield_now().await;

    let started = tokio::time::Instant::now();
    lottery.shutdown();
    assert!(matches!(
        watcher.await.unwrap(),
        Err(LottoError::ShuttingDown)
    ));
    assert!(started.elapsed() < Duration::from_secs(600));
}

#[tokio::test]
async fn test_house_win_is_retained_in_history() {
    let mut cfg = AppConfig::default();
    cfg.lottery.house_node_id = Some("house".into());
    let (lottery, gw) = lottery_with(cfg);
    enter(&lottery, &gw, "house", 10).await;

    let settlement = lottery.settle_round().await.unwrap();
    assert!(settlement.payout.is_none());
    assert_eq!(
        lottery.snapshot().await.winners[0].payout_status,
        PayoutStatus::Retained
    );
    assert!(gw.payments().is_empty());
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_admission() {
    let mut cfg = AppConfig::default();
    cfg.lottery.subscriber_queue_capacity = 2;
    let (lottery, _gw) = lottery_with(cfg);

    let mut stream = lottery.subscribe_entries().await;
    for i in 0..10 {
        lottery.ledger().admit(Entry::new(format!("p{i}"), 1)).await;
    }

    let snap = lottery.snapshot().await;
    assert_eq!(snap.entries.len(), 10);
    assert_eq!(lottery.ledger().broadcaster().dropped_for(stream.id()), 8);
    assert_eq!(stream.recv().await, Some(Entry::new("p0", 1)));
    assert_eq!(stream.recv().await, Some(Entry::new("p1", 1)));
}

#[tokio::test]
async fn test_dropped_stream_unsubscribes() {
    let (lottery, _gw) = lottery();
    let stream = lottery.subscribe_entries().await;
    assert_eq!(lottery.ledger().broadcaster().subscriber_count(), 1);

    drop(stream);
    assert_eq!(lottery.ledger().broadcaster().subscriber_count(), 0);
    lottery.ledger().admit(Entry::new("alice", 5)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_entries_and_settlements_conserve_stake() {
    let (lottery, gw) = lottery();

    let mut workers = Vec::new();
    for w in 0..4u64 {
        let lottery = Arc::clone(&lottery);
        let gw = Arc::clone(&gw);
        workers.push(tokio::spawn(async move {
            let mut admitted = 0u64;
            for i in 0..50u64 {
                let amount = w * 100 + i + 1;
                let state = enter(&lottery, &gw, &format!("w{w}-{i}"), amount).await;
                if matches!(state, GateState::Admitted { .. }) {
                    admitted += amount;
                }
            }
            admitted
        }));
    }

    let settler = {
        let lottery = Arc::clone(&lottery);
        tokio::spawn(async move {
            for _ in 0..20 {
                lottery.settle_round().await;
                tokio::task::yield_now().await;
            }
        })
    };

    let mut staked = 0u64;
    for worker in workers {
        staked += worker.await.unwrap();
    }
    settler.await.unwrap();
    lottery.settle_round().await;

    let snap = lottery.snapshot().await;
    assert_eq!(snap.pot, 0);
    let won: u64 = snap.winners.iter().map(|w| w.pot).sum();
    assert_eq!(won, staked);

    let expected: u64 = (0..4u64)
        .flat_map(|w| (0..50u64).map(move |i| w * 100 + i + 1))
        .sum();
    assert_eq!(staked, expected);
}
