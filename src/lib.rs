pub mod agents;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod config;
pub mod doctor;
pub mod error;
pub mod executor;
pub mod hub;
pub mod interactive;
pub mod ledger;
pub mod orchestrator;
pub mod profiles;
pub mod quality;
pub mod registry;
pub mod router;
pub mod server;
pub mod store;
pub mod telemetry;
