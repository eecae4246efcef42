pub mod conversation;
pub mod execution;
pub mod message_log;
pub mod sequence;
pub mod stats;
pub mod step;

pub use conversation::ConversationLink;
pub use execution::{AdvanceOutcome, ContactRef, Execution, ExecutionStatus, StartExecution};
pub use message_log::{DeliveryStatus, MessageLog};
pub use sequence::{CreateSequence, Sequence, TriggerConfig, UpdateSequence};
pub use stats::SequenceStats;
pub use step::{CreateStep, DelayUnit, SendConditions, SequenceStep};
