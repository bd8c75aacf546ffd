//! Library interface for the serverinfo agent: samples host metrics on fixed
//! intervals and pushes them to dashboard clients over WebSocket.

pub mod broadcast;
pub mod calc;
pub mod command;
pub mod config;
pub mod containers;
pub mod history;
pub mod kv;
pub mod metrics;
pub mod netload;
pub mod sampler;
pub mod state;
pub mod types;
pub mod ws;
