//! Shared fixtures for the integration tests.

pub mod failing_store;
pub mod scripted_dispatcher;

#[allow(unused_imports)]
pub use failing_store::ReplyFailingStore;
#[allow(unused_imports)]
pub use scripted_dispatcher::{GatedDispatcher, ScriptedDispatcher, SentMessage};

use chrono::{DateTime, TimeZone, Utc};
use followup::api::AppState;
use followup::config::Config;
use followup::models::step::build_steps;
use followup::models::{ContactRef, CreateSequence, Sequence, StartExecution};
use followup::repositories::Stores;
use followup::services::MessageDispatcher;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

#[allow(dead_code)]
pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 15, 12, 0, 0).unwrap()
}

#[allow(dead_code)]
pub fn app_state(dispatcher: Arc<dyn MessageDispatcher>) -> AppState {
    AppState::new(Stores::in_memory(), dispatcher, &Config::default())
}

#[allow(dead_code)]
pub fn app_state_on(stores: Stores, dispatcher: Arc<dyn MessageDispatcher>) -> AppState {
    AppState::new(stores, dispatcher, &Config::default())
}

#[allow(dead_code)]
pub fn app_state_with(dispatcher: Arc<dyn MessageDispatcher>, config: &Config) -> AppState {
    AppState::new(Stores::in_memory(), dispatcher, config)
}

/// Creates a sequence from a JSON body shaped like `POST /sequences`.
#[allow(dead_code)]
pub async fn create_sequence(state: &AppState, body: Value) -> Sequence {
    let create: CreateSequence = serde_json::from_value(body).unwrap();
    let sequence = Sequence::new(&create).unwrap();
    let steps = build_steps(sequence.id, &create.steps).unwrap();
    state
        .stores()
        .sequences
        .create_sequence(&sequence, &steps)
        .await
        .unwrap();
    sequence
}

#[allow(dead_code)]
pub fn carrito_abandonado(organization_id: Uuid) -> Value {
    json!({
        "organization_id": organization_id,
        "name": "Carrito Abandonado",
        "trigger_type": "action",
        "trigger_config": {"action": "cart_abandoned"},
        "steps": [
            {"delay_amount": 1, "delay_unit": "hours", "message_template": "Hola {nombre}, ¿sigues interesado?"},
            {"delay_amount": 1, "delay_unit": "days", "message_template": "Última oportunidad, {nombre}!"}
        ]
    })
}

#[allow(dead_code)]
pub fn start_request(sequence_id: Uuid, phone: &str, conversation_id: &str) -> StartExecution {
    StartExecution {
        sequence_id,
        contact: ContactRef {
            phone: phone.to_string(),
            name: Some("Ana".to_string()),
        },
        context: json!({"nombre": "Ana"}),
        trigger_data: json!({"conversation_id": conversation_id}),
    }
}
