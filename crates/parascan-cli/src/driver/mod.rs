pub mod audit;
pub mod config;
pub mod telemetry;
pub mod workload;
