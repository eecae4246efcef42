pub mod whitelist;

pub use whitelist::{whitelist_middleware, Whitelist};
