// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod metrics;
pub mod notify;
pub mod scan;

// ---- Re-exports for stable public API ----
pub use crate::notify::{Observer, ObserverId, PollEvent};
pub use crate::scan::config::{load_config_default, load_config_from, MonitorConfig};
pub use crate::scan::scheduler::{Phase, Scheduler, SchedulerCfg, SourceSnapshot};
pub use crate::scan::state::SourceState;
pub use crate::scan::types::{Item, Outcome, PollError, PollResult, Source, SourceStatus};
