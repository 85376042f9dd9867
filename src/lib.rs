use std::sync::Arc;

pub mod actor;
pub mod config;
pub mod drain_server;
pub mod fleet;
pub mod latency;
pub mod orchestrator;
pub mod router;
pub mod strategy;
pub mod telemetry;
pub mod transfer;

pub type AppConfig = Arc<config::Config>;
