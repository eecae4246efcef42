pub mod link_tracker;
pub mod retry;
pub mod scheduler;
pub mod state_machine;
pub mod stats;
pub mod template;

pub use link_tracker::ConversationLinkTracker;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use scheduler::{Scheduler, SweepReport};
pub use state_machine::ExecutionStateMachine;
pub use stats::StatsAggregator;
pub use template::TemplateRenderer;
