//! End-to-end runs of each workflow through the coordinator, from the first
//! input to the committed business call.

mod fixtures;

use fieldflow::external::RecordedCall;
use fieldflow::store::MemoryBackend;
use fieldflow::{ActorId, FlowError, RawInput, StartRequest, Step, Workflow};
use fixtures::*;
use std::sync::Arc;
use tokio_test::assert_ok;

#[tokio::test]
async fn test_warehouse_receive_commits_one_stock_movement() {
    let h = Harness::new();

    h.choose(WAREHOUSE, "start:warehouse_receive").await;
    assert_eq!(h.last_reply(WAREHOUSE), "Receiving stock. Send the item code.");

    h.text(WAREHOUSE, "SKU-7").await;
    let session = h.session(WAREHOUSE).await.unwrap();
    assert_eq!(session.state, Step::AwaitingQuantity);

    // A negative quantity is refused and the session stays where it was.
    h.text(WAREHOUSE, "-3").await;
    let after_reject = h.session(WAREHOUSE).await.unwrap();
    assert_eq!(after_reject.state, Step::AwaitingQuantity);
    assert_eq!(after_reject.revision, session.revision);
    assert_eq!(after_reject.data, session.data);
    let reply = h.last_reply(WAREHOUSE);
    assert!(reply.starts_with("The quantity"), "unexpected reply: {reply}");
    assert!(reply.contains("How many units of SKU-7 arrived?"));

    h.text(WAREHOUSE, "12").await;
    assert_eq!(
        h.session(WAREHOUSE).await.unwrap().state,
        Step::AwaitingConfirmationPhoto
    );

    h.photo(WAREHOUSE, "att-42").await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), "Received 12 x SKU-7. Thank you!");

    let calls = h.business.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        RecordedCall::StockMovement(_, movement) => {
            assert_eq!(movement.item_id, "item-7");
            assert_eq!(movement.quantity, 12.0);
            assert_eq!(movement.confirmation_photo_url, "https://media.local/att-42");
            assert_eq!(movement.received_by, ActorId::new(WAREHOUSE));
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn test_remains_adjustment_walks_every_bunker_and_sends_one_batch() {
    let h = Harness::new();
    let operator = ActorId::new(OPERATOR);

    assert_ok!(
        h.coordinator
            .start_workflow(
                &operator,
                StartRequest::RemainsAdjustment {
                    machine_id: "VM-12".to_string(),
                    bunkers: vec![("B1".to_string(), 4.0), ("B2".to_string(), 7.5)],
                },
            )
            .await
    );
    let first = h.last_reply(OPERATOR);
    assert!(first.contains("bunker B1 (1 of 2)"), "unexpected prompt: {first}");

    h.text(OPERATOR, "3").await;
    let session = h.session(OPERATOR).await.unwrap();
    assert_eq!(session.state, Step::AwaitingRemainsForBunker);
    assert!(h.last_reply(OPERATOR).contains("bunker B2 (2 of 2)"));
    assert!(h.business.calls().is_empty());

    h.text(OPERATOR, "0").await;
    assert!(h.session(OPERATOR).await.is_none());
    assert_eq!(
        h.last_reply(OPERATOR),
        "Remains for machine VM-12 submitted (2 bunker(s))."
    );

    let calls = h.business.calls();
    assert_eq!(calls.len(), 1);
    match &calls[0] {
        RecordedCall::RemainsAdjustment(_, adjustment) => {
            assert_eq!(adjustment.machine_id, "VM-12");
            let readings: Vec<_> = adjustment
                .bunkers
                .iter()
                .map(|b| (b.bunker_id.as_str(), b.old_quantity, b.new_quantity))
                .collect();
            assert_eq!(readings, vec![("B1", 4.0, Some(3.0)), ("B2", 7.5, Some(0.0))]);
        }
        other => panic!("unexpected call {other:?}"),
    }
}

#[tokio::test]
async fn test_remains_adjustment_cannot_start_without_a_snapshot_or_role() {
    let h = Harness::new();

    let empty = h
        .coordinator
        .start_workflow(
            &ActorId::new(OPERATOR),
            StartRequest::RemainsAdjustment {
                machine_id: "VM-12".to_string(),
                bunkers: Vec::new(),
            },
        )
        .await;
    assert!(matches!(empty, Err(FlowError::InputValidation(_))));

    let not_operator = h
        .coordinator
        .start_workflow(
            &ActorId::new(DRIVER),
            StartRequest::RemainsAdjustment {
                machine_id: "VM-12".to_string(),
                bunkers: vec![("B1".to_string(), 1.0)],
            },
        )
        .await;
    assert!(matches!(
        not_operator,
        Err(FlowError::NotPermitted {
            workflow: Workflow::RemainsAdjustment,
            ..
        })
    ));
    assert!(h.session(OPERATOR).await.is_none());
    assert!(h.session(DRIVER).await.is_none());
}

#[tokio::test]
async fn test_starting_over_an_active_session_is_refused() {
    let h = Harness::new();
    h.choose(OPERATOR, "start:task_report").await;

    let result = h
        .coordinator
        .start_workflow(
            &ActorId::new(OPERATOR),
            StartRequest::RemainsAdjustment {
                machine_id: "VM-1".to_string(),
                bunkers: vec![("B1".to_string(), 1.0)],
            },
        )
        .await;
    assert!(matches!(
        result,
        Err(FlowError::SessionActive {
            workflow: Workflow::TaskReport,
            state: Step::AwaitingProblemDescription,
            ..
        })
    ));
    assert_eq!(
        h.session(OPERATOR).await.unwrap().workflow,
        Workflow::TaskReport
    );
}

#[tokio::test]
async fn test_driver_route_records_stops_and_photos() {
    let h = Harness::new();
    assert_ok!(
        h.coordinator
            .start_workflow(
                &ActorId::new(DRIVER),
                StartRequest::DriverRoute {
                    route_id: Some("R-9".to_string()),
                },
            )
            .await
    );

    h.text(DRIVER, "15230").await;
    h.choose(DRIVER, "next_stop").await;
    h.send(DRIVER, RawInput::location(55.75, 37.61)).await.unwrap();
    h.photo(DRIVER, "stop-1-a").await;
    h.photo(DRIVER, "stop-1-b").await;
    assert_eq!(h.last_reply(DRIVER).lines().next(), Some("Photo 2 saved."));
    h.choose(DRIVER, "finish_route").await;

    assert!(h.session(DRIVER).await.is_none());
    assert_eq!(h.last_reply(DRIVER), "Route complete: 1 stop(s) recorded.");
    match h.business.calls().as_slice() {
        [RecordedCall::RouteCompletion(_, completion)] => {
            assert_eq!(completion.route_id.as_deref(), Some("R-9"));
            assert_eq!(completion.start_mileage, 15230.0);
            assert_eq!(completion.stops.len(), 1);
            assert_eq!(completion.stops[0].photos.len(), 2);
        }
        other => panic!("unexpected calls {other:?}"),
    }
}

#[tokio::test]
async fn test_task_report_from_the_menu_creates_a_task() {
    let h = Harness::new();

    h.text(OPERATOR, "hello").await;
    assert!(h.last_reply(OPERATOR).starts_with("Hello Oli."));
    assert!(h.session(OPERATOR).await.is_none());

    h.choose(OPERATOR, "start:task_report").await;
    h.text(OPERATOR, "Coin slot jammed").await;
    h.photo(OPERATOR, "jam-1").await;

    assert!(h.session(OPERATOR).await.is_none());
    assert_eq!(
        h.last_reply(OPERATOR),
        "Problem reported. A task has been created."
    );
    match h.business.calls().as_slice() {
        [RecordedCall::Task(_, task)] => {
            assert_eq!(task.description, "Coin slot jammed");
            assert_eq!(task.photo_url, "https://media.local/jam-1");
            assert_eq!(task.reported_by, ActorId::new(OPERATOR));
        }
        other => panic!("unexpected calls {other:?}"),
    }
}

#[tokio::test]
async fn test_menu_refuses_workflows_outside_the_actor_roles() {
    let h = Harness::new();

    h.choose(WAREHOUSE, "start:driver_route").await;
    assert!(h.session(WAREHOUSE).await.is_none());
    let reply = h.last_reply(WAREHOUSE);
    assert!(reply.starts_with("That option is not available to you."));
    assert!(reply.contains("What would you like to do?"));
}

#[tokio::test]
async fn test_wrong_input_class_is_explained_without_moving() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;

    h.photo(WAREHOUSE, "too-early").await;
    let session = h.session(WAREHOUSE).await.unwrap();
    assert_eq!(session.state, Step::AwaitingItemIdentifier);
    assert!(h.last_reply(WAREHOUSE).starts_with("Please send"));
}

#[tokio::test]
async fn test_cancel_discards_collected_data() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;
    h.text(WAREHOUSE, "SKU-7").await;

    h.text(WAREHOUSE, "cancel").await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), "Cancelled. Nothing was saved.");
    assert!(h.business.calls().is_empty());

    // Cancelling while idle says so and shows the menu again.
    h.text(WAREHOUSE, "cancel").await;
    let reply = h.last_reply(WAREHOUSE);
    assert!(reply.starts_with("There is nothing to cancel."));
    assert!(reply.contains("Hello Wes."));
    assert!(h.session(WAREHOUSE).await.is_none());
}

#[tokio::test]
async fn test_cancel_from_an_unknown_actor_opens_nothing() {
    let h = Harness::new();

    for word in ["cancel", "/cancel", "stop"] {
        h.text("new-5", word).await;
        assert_eq!(h.last_reply("new-5"), "There is nothing to cancel.");
        assert!(h.session("new-5").await.is_none());
    }

    // Anything else still starts a registration.
    h.text("new-5", "hello").await;
    assert_eq!(
        h.session("new-5").await.unwrap().workflow,
        Workflow::Registration
    );
}

#[tokio::test]
async fn test_unknown_item_code_is_refused_at_once() {
    let h = Harness::new();
    h.choose(WAREHOUSE, "start:warehouse_receive").await;

    h.text(WAREHOUSE, "SKU-404").await;
    let session = h.session(WAREHOUSE).await.unwrap();
    assert_eq!(session.state, Step::AwaitingItemIdentifier);
    assert!(h
        .last_reply(WAREHOUSE)
        .starts_with("No item with code SKU-404 was found."));

    h.text(WAREHOUSE, "SKU-9").await;
    assert_eq!(
        h.session(WAREHOUSE).await.unwrap().state,
        Step::AwaitingQuantity
    );
}

#[tokio::test]
async fn test_decision_shaped_text_belongs_to_the_workflow() {
    let h = Harness::new();
    h.choose(OPERATOR, "start:task_report").await;

    h.text(OPERATOR, "reject: coin slot jammed").await;
    assert_eq!(
        h.session(OPERATOR).await.unwrap().state,
        Step::AwaitingProblemPhoto
    );
    h.photo(OPERATOR, "slot-1").await;

    match h.business.calls().as_slice() {
        [RecordedCall::Task(_, task)] => {
            assert_eq!(task.description, "reject: coin slot jammed");
        }
        other => panic!("unexpected calls {other:?}"),
    }
}

#[tokio::test]
async fn test_warehouse_receive_resumes_after_restart() {
    let backend = Arc::new(MemoryBackend::default());
    {
        let first_run = Harness::with_backend(backend.clone());
        first_run.choose(WAREHOUSE, "start:warehouse_receive").await;
        first_run.text(WAREHOUSE, "SKU-7").await;
        first_run.text(WAREHOUSE, "12").await;
    }

    let h = Harness::with_backend(backend);
    let report = h.coordinator.recover().await;
    assert_eq!(report.rearmed, 1);

    // A redelivery numbered by the first run is still recognised.
    h.send_seq(WAREHOUSE, 2, RawInput::text("12")).await.unwrap();
    assert_eq!(h.last_reply(WAREHOUSE), ALREADY_PROCESSED);

    h.photo(WAREHOUSE, "att-9").await;
    assert!(h.session(WAREHOUSE).await.is_none());
    assert_eq!(h.last_reply(WAREHOUSE), "Received 12 x SKU-7. Thank you!");
    assert_eq!(h.business.calls().len(), 1);
}
