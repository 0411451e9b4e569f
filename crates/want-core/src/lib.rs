//! Engine runtime for the Want reconciliation engine: fractional order
//! keys, schedule parsing, the Want object and its progress cycle, the
//! agent registry, pluggable executors, the notification bus, the
//! scheduler Want, and the chain builder that ties them together.

pub mod chain;
pub mod config;
pub mod error;
pub mod executor;
pub mod monitor_want;
pub mod notifiable;
pub mod notify;
pub mod order_key;
pub mod registry;
pub mod schedule;
pub mod scheduler_want;
pub mod want;

pub use chain::ChainBuilder;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use monitor_want::{Alert, AlertAction, MonitorWant};
pub use notify::{NotificationBus, NotificationKind, StateNotification};
pub use registry::AgentRegistry;
pub use scheduler_want::{SchedulerWant, WantBuilder, WantHandle};
pub use want::Want;
