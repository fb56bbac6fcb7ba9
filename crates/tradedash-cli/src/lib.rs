/*
[INPUT]:  Public API exports for tradedash-cli crate
[OUTPUT]: Module declarations and public re-exports
[POS]:    Crate root - library entry point
[UPDATE]: When adding new modules or public exports
*/

pub mod config;
pub mod monitor;

pub use config::{ChartConfig, StreamConfig};
pub use monitor::{MonitorExit, StreamMonitor};
