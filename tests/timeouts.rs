//! Inactivity timeouts and restart recovery, on a paused clock.

mod fixtures;

use chrono::{Duration as ChronoDuration, Utc};
use fieldflow::workflows::{RegistrationData, SessionData};
use fieldflow::{ActorId, ActorSession, RawInput, Role, Step, Workflow};
use fixtures::*;
use std::time::Duration;

const NOTICE: &str = "Your warehouse receive session timed out. Nothing was saved.";

async fn idle_for(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn test_untouched_session_is_reset_after_ten_minutes() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;
    h.text(WAREHOUSE, "SKU-7").await;

    idle_for(599).await;
    assert!(h.session(WAREHOUSE).await.is_some());

    idle_for(2).await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), NOTICE);
    assert!(h.business.calls().is_empty());

    h.text(WAREHOUSE, "12").await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert!(h.last_reply(WAREHOUSE).starts_with("Hello Wes."));
}

#[tokio::test(start_paused = true)]
async fn test_progress_pushes_the_deadline_back() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;

    idle_for(500).await;
    h.text(WAREHOUSE, "SKU-7").await;

    // The first timer fires here and must not touch the newer position.
    idle_for(200).await;
    let session = h.session(WAREHOUSE).await.expect("still active");
    assert_eq!(session.state, Step::AwaitingQuantity);
    assert!(!h.replies(WAREHOUSE).iter().any(|r| r == NOTICE));

    idle_for(401).await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(
        h.replies(WAREHOUSE).iter().filter(|r| *r == NOTICE).count(),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_input_does_not_extend_the_window() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;
    h.text(WAREHOUSE, "SKU-7").await;

    idle_for(550).await;
    h.text(WAREHOUSE, "-1").await;
    idle_for(51).await;

    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), NOTICE);
}

#[tokio::test(start_paused = true)]
async fn test_approvals_wait_for_their_own_window() {
    let h = Harness::new();
    h.text("new-1", "hi").await;
    h.text("new-1", "5550102030").await;
    let subject = ActorId::new("new-1");

    idle_for(3_600).await;
    assert_eq!(h.session("new-1").await.unwrap().state, Step::AwaitingApproval);
    assert!(h.coordinator.approvals().is_pending(&subject));

    idle_for(86_400).await;
    assert!(h.session("new-1").await.is_none());
    assert!(!h.coordinator.approvals().is_pending(&subject));
    assert_eq!(
        h.last_reply(SUPERVISOR_A),
        "Request from new-1 was withdrawn by new-1."
    );

    h.choose(SUPERVISOR_B, "approve:new-1").await;
    assert!(h.business.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_cancels_timers_without_touching_sessions() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;
    assert_eq!(h.coordinator.supervisor().pending(), 1);

    assert_eq!(h.coordinator.shutdown(), 1);
    idle_for(700).await;

    // Still persisted for the next start to recover.
    assert_eq!(h.store.list_sessions().await.len(), 1);
    assert!(!h.replies(WAREHOUSE).iter().any(|r| r == NOTICE));
}

fn stored_session(actor: &str, workflow: Workflow, role: Role, state: Step) -> ActorSession {
    let data = match workflow {
        Workflow::Registration => SessionData::Registration(RegistrationData {
            phone: Some("5550102030".to_string()),
            display_name: None,
        }),
        other => SessionData::empty_for(other),
    };
    ActorSession::start(ActorId::new(actor), role, workflow, state, data, Utc::now())
}

#[tokio::test(start_paused = true)]
async fn test_recovery_rearms_expires_and_rebroadcasts() {
    let h = Harness::new();

    let mut live = stored_session(
        WAREHOUSE,
        Workflow::WarehouseReceive,
        Role::Warehouse,
        Step::AwaitingItemIdentifier,
    );
    live.expires_at = Some(Utc::now() + ChronoDuration::seconds(120));
    live.last_seq = Some(7);
    h.store.set(&live).await;

    let mut stale = stored_session(
        OPERATOR,
        Workflow::TaskReport,
        Role::Operator,
        Step::AwaitingProblemDescription,
    );
    stale.expires_at = Some(Utc::now() - ChronoDuration::seconds(5));
    h.store.set(&stale).await;

    let mut waiting = stored_session(
        "new-1",
        Workflow::Registration,
        Role::Registrant,
        Step::AwaitingApproval,
    );
    waiting.expires_at = Some(Utc::now() + ChronoDuration::hours(20));
    h.store.set(&waiting).await;

    let report = h.coordinator.recover().await;
    assert_eq!(report.rearmed, 2);
    assert_eq!(report.expired, 1);
    assert_eq!(report.rebroadcast, 1);

    assert!(h.session(OPERATOR).await.is_none());
    assert_eq!(
        h.last_reply(OPERATOR),
        "Your task report session timed out. Nothing was saved."
    );
    assert!(h.coordinator.approvals().is_pending(&ActorId::new("new-1")));
    assert_eq!(
        h.last_reply(SUPERVISOR_A),
        "New registration from new-1 (phone 5550102030)."
    );

    // Sequence numbers persisted before the restart still count as seen.
    h.send_seq(WAREHOUSE, 7, RawInput::text("SKU-7"))
        .await
        .unwrap();
    assert_eq!(
        h.session(WAREHOUSE).await.unwrap().state,
        Step::AwaitingItemIdentifier
    );

    // The re-armed timer uses the time that was left, not a fresh window.
    idle_for(121).await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), NOTICE);
}
