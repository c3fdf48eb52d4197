//! DIVER Worker - Scheduled Entry Point
//!
//! Wires configuration, tracing, the search client and the model runner
//! into a [`Relay`], then runs it once or on a fixed schedule.

pub mod config;
pub mod error;
pub mod handler;
pub mod schedule;
pub mod telemetry;

pub use config::{ConfigError, WorkerConfig};
pub use error::{WorkerError, WorkerResult};
pub use handler::{ProcessFailure, ProcessOutcome, Relay, TriggerEvent, TriggerSource};
pub use schedule::{relay_schedule_task, ScheduleConfig, ScheduleMetrics, ScheduleSnapshot};
pub use telemetry::init_tracing;
