pub mod dispatcher;

pub use dispatcher::{DispatchReceipt, DryRunDispatcher, HttpDispatcher, MessageDispatcher};
