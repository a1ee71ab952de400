//! Agent workforce dispatcher
//!
//! A registry of scheduled agents, a dispatcher that runs the ones that are
//! due, a proposal queue reviewed by a supervisor agent and by admins, and a
//! Slack notification outbox, served over an axum admin API.

pub mod agents;
pub mod api;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod events;
pub mod llm;
pub mod logging;
pub mod notify;
pub mod scheduler;
pub mod services;
