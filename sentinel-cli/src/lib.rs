//! Runtime wiring for the Sentinel bot: alert dispatch, tracing setup, and
//! the anomaly-polling monitor loop. The `sentinel` binary is a thin shell
//! over these modules so the loop stays testable.

pub mod alerts;
pub mod monitor;
pub mod telemetry;
