//! Nemawashi — a human-in-the-loop approval coordinator.
//!
//! Mediates between autonomous risk-monitoring pipelines and human
//! approvers: machine-drafted actions (emails, calendar bookings, HR
//! requests) are shepherded through a durable approval state machine,
//! decided over chat or the operator API, and — once approved — executed
//! against external providers with at-most-once semantics per thread.
//!
//! Component map:
//! - [`coordinator`]: the state machine and its idempotent intake surface
//! - [`executor`]: provider dispatch with an append-only run record
//! - [`chat`]: approval prompts, thread notifications, webhook decoding
//! - [`db`]: SQLite checkpoint store and related tables
//! - [`watchdog`]: periodic analysis that mints proposed actions
//! - [`demo`]: a compressed state machine for live demonstrations
//! - [`credentials`] / [`crypto`]: encrypted provider tokens
//! - [`http`]: axum intake translating REST and webhooks into operations

pub mod calendar;
pub mod chat;
pub mod config;
pub mod coordinator;
pub mod credentials;
pub mod crypto;
pub mod db;
pub mod demo;
pub mod error;
pub mod executor;
pub mod http;
pub mod logging;
pub mod types;
pub mod watchdog;
