mod test_utils;

use chrono::Duration;
use followup::error::FollowUpError;
use followup::models::conversation::TrackConversation;
use followup::models::{ContactRef, ExecutionStatus};
use uuid::Uuid;

use test_utils::*;

fn track(organization_id: Uuid, conversation_id: &str) -> TrackConversation {
    TrackConversation {
        organization_id,
        conversation_id: conversation_id.to_string(),
        inbox_id: Some("inbox-7".to_string()),
        account_id: None,
        contact: ContactRef {
            phone: "+549111".to_string(),
            name: Some("Ana".to_string()),
        },
    }
}

#[tokio::test]
async fn test_idle_conversations_after_outbound() {
    let state = app_state(ScriptedDispatcher::new());
    let organization_id = Uuid::new_v4();

    state
        .tracker
        .track_for_follow_up(track(organization_id, "conv-1"), t0())
        .await
        .unwrap();
    state
        .tracker
        .track_for_follow_up(track(organization_id, "conv-2"), t0() + Duration::minutes(50))
        .await
        .unwrap();
    state
        .tracker
        .track_for_follow_up(track(Uuid::new_v4(), "conv-3"), t0())
        .await
        .unwrap();

    let idle = state
        .tracker
        .idle_conversations(organization_id, Duration::minutes(60), t0() + Duration::minutes(90))
        .await
        .unwrap();
    assert_eq!(idle.len(), 1);
    assert_eq!(idle[0].conversation_id, "conv-1");
    assert!(idle[0].awaiting_response);

    // A reply takes the conversation out of the idle set.
    state
        .tracker
        .cancel_on_response("conv-1", Some("hola"), t0() + Duration::minutes(95))
        .await
        .unwrap();
    let idle = state
        .tracker
        .idle_conversations(organization_id, Duration::minutes(60), t0() + Duration::hours(5))
        .await
        .unwrap();
    let ids: Vec<_> = idle.iter().map(|l| l.conversation_id.as_str()).collect();
    assert_eq!(ids, vec!["conv-2"]);
}

#[tokio::test]
async fn test_retracking_keeps_creation_time() {
    let state = app_state(ScriptedDispatcher::new());
    let organization_id = Uuid::new_v4();

    let first = state
        .tracker
        .track_for_follow_up(track(organization_id, "conv-1"), t0())
        .await
        .unwrap();
    let second = state
        .tracker
        .track_for_follow_up(track(organization_id, "conv-1"), t0() + Duration::hours(1))
        .await
        .unwrap();

    assert_eq!(second.created_at, first.created_at);
    assert_eq!(second.last_outbound_at, t0() + Duration::hours(1));
}

#[tokio::test]
async fn test_track_validates_input() {
    let state = app_state(ScriptedDispatcher::new());
    let err = state
        .tracker
        .track_for_follow_up(track(Uuid::new_v4(), "  "), t0())
        .await
        .unwrap_err();
    assert!(matches!(err, FollowUpError::Validation(_)));
}

#[tokio::test]
async fn test_response_leaves_paused_executions() {
    let state = app_state(ScriptedDispatcher::new());
    let sequence = create_sequence(&state, carrito_abandonado(Uuid::new_v4())).await;
    let execution = state
        .machine
        .start_execution(start_request(sequence.id, "+549111", "conv-1"), t0())
        .await
        .unwrap();
    state.machine.pause(execution.id).await.unwrap();

    let cancelled = state
        .tracker
        .cancel_on_response("conv-1", None, t0() + Duration::minutes(10))
        .await
        .unwrap();
    assert!(cancelled.is_empty());

    let stored = state.machine.get_execution(execution.id).await.unwrap();
    assert_eq!(stored.status, ExecutionStatus::Paused);
}

#[tokio::test]
async fn test_reply_cancels_every_execution_when_bookkeeping_fails() {
    let dispatcher = ScriptedDispatcher::new();
    let state = app_state_on(ReplyFailingStore::stores(), dispatcher.clone());
    let organization_id = Uuid::new_v4();
    let carrito = create_sequence(&state, carrito_abandonado(organization_id)).await;
    let mut second = carrito_abandonado(organization_id);
    second["name"] = "Recordatorio de pago".into();
    let pago = create_sequence(&state, second).await;

    let mut ids = Vec::new();
    for sequence in [&carrito, &pago] {
        let execution = state
            .machine
            .start_execution(start_request(sequence.id, "+549111", "conv-1"), t0())
            .await
            .unwrap();
        ids.push(execution.id);
    }
    state
        .scheduler
        .run_once_at(t0() + Duration::hours(1))
        .await
        .unwrap();

    let cancelled = state
        .tracker
        .cancel_on_response("conv-1", Some("ya pagué"), t0() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(cancelled.len(), 2);

    for id in ids {
        let stored = state.machine.get_execution(id).await.unwrap();
        assert_eq!(stored.status, ExecutionStatus::Cancelled);
    }

    let report = state
        .scheduler
        .run_once_at(t0() + Duration::days(2))
        .await
        .unwrap();
    assert_eq!(report.claimed, 0);
    assert_eq!(dispatcher.delivered().len(), 2);
}
