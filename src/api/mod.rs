pub mod conversations;
pub mod executions;
pub mod health;
pub mod response;
pub mod scheduler;
pub mod sequences;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use crate::config::Config;
use crate::engine::{ConversationLinkTracker, ExecutionStateMachine, Scheduler, StatsAggregator};
use crate::repositories::Stores;
use crate::services::MessageDispatcher;

#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<ExecutionStateMachine>,
    pub tracker: Arc<ConversationLinkTracker>,
    pub scheduler: Arc<Scheduler>,
    pub stats: Arc<StatsAggregator>,
}

impl AppState {
    pub fn new(stores: Stores, dispatcher: Arc<dyn MessageDispatcher>, config: &Config) -> Self {
        let machine = Arc::new(ExecutionStateMachine::new(
            stores.clone(),
            dispatcher,
            config.engine.clone(),
        ));

        Self {
            tracker: Arc::new(ConversationLinkTracker::new(machine.clone())),
            scheduler: Arc::new(Scheduler::new(machine.clone(), config.scheduler.clone())),
            stats: Arc::new(StatsAggregator::new(stores)),
            machine,
        }
    }

    pub fn stores(&self) -> &Stores {
        self.machine.stores()
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route(
            "/sequences",
            get(sequences::list_sequences).post(sequences::create_sequence),
        )
        .route(
            "/sequences/{id}",
            get(sequences::get_sequence)
                .put(sequences::update_sequence)
                .delete(sequences::delete_sequence),
        )
        .route("/sequences/{id}/stats", get(sequences::sequence_stats))
        .route("/stats", get(sequences::organization_stats))
        .route(
            "/executions",
            get(executions::list_executions).post(executions::start_execution),
        )
        .route("/executions/{id}", get(executions::get_execution))
        .route("/executions/{id}/logs", get(executions::list_logs))
        .route(
            "/executions/{id}/logs/{step_order}/status",
            post(executions::update_delivery_status),
        )
        .route("/executions/{id}/cancel", post(executions::cancel_execution))
        .route("/executions/{id}/convert", post(executions::convert_execution))
        .route("/executions/{id}/pause", post(executions::pause_execution))
        .route("/executions/{id}/resume", post(executions::resume_execution))
        .route("/conversations/track", post(conversations::track_conversation))
        .route("/conversations/idle", get(conversations::idle_conversations))
        .route(
            "/conversations/{conversation_id}/inbound",
            post(conversations::inbound_message),
        )
        .route("/scheduler/run", post(scheduler::run_scheduler))
        .with_state(state)
}
