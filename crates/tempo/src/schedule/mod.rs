mod config;
mod deferred;
mod error;
mod event;
mod interval;
mod scheduler;
mod stats;

pub use config::{SchedulerConfig, SLOW_TICK_ENV_VAR};
pub use deferred::{DeferredCommand, DeferredQueue};
pub use error::{CallbackError, CallbackResult};
pub use event::{
    Event, EventCallback, EventHandle, EventId, EventOwner, EventSnapshot, EventState,
    MAX_LINEAGE_DEPTH,
};
pub use interval::{IntervalHandle, IntervalScheduler};
pub use scheduler::{EventScheduler, TickReport};
pub use stats::TickStats;
