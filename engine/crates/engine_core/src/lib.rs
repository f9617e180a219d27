pub mod deferred;
pub mod tick;

pub use deferred::DeferredQueue;
pub use tick::{IntervalTimer, TickConfig};
