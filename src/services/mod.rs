//! Services module: dispatch, health monitoring, and summary aggregation

pub mod dispatch;
pub mod health_monitor;
pub mod summary;

pub use dispatch::{DispatchEngine, IntakeOutcome};
pub use health_monitor::HealthMonitor;
pub use summary::{PaymentsSummary, SummaryService};
