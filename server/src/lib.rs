//! # Login Gate Server Library
//!
//! This library decides, for every login attempt against the lobby, whether
//! the caller may enter right now or has to wait. Waiting callers are parked
//! in tiered queues and released as the lobby reports free slots.
//!
//! ## Core Responsibilities
//!
//! ### Capacity Tracking
//! The lobby periodically reports how many clients it holds. The gate turns
//! that count into a remaining-capacity figure against a configured limit
//! which is re-read on every report, so the limit can be changed at runtime.
//!
//! ### Tiered Admission
//! Each user maps to exactly one tier:
//! - Bots always pass, even when the lobby is full
//! - Moderators, contributors and VIPs wait ahead of regular members
//! - Members with a low behaviour score wait last and are released only
//!   when capacity has been spare for a while
//!
//! ### Reconciliation
//! A background loop wakes on a fixed interval and drains the queues in
//! priority order while capacity lasts. Released callers are told through
//! the notification handle they supplied when they were queued.
//!
//! ## Architecture Design
//!
//! ### Single Coordinator Lock
//! All mutable state (capacity, queues, waiter handles, gate streak) sits
//! behind one lock inside [`throttle::LoginThrottle`]. Every operation is
//! atomic with respect to every other, and notifications are sent only
//! after the lock has been released.
//!
//! ### UDP Front-End
//! [`network::Server`] speaks the bincode protocol from the `shared` crate
//! and forwards logins, cancellations, telemetry and snapshot requests to
//! the coordinator.
//!
//! ## Module Organization
//!
//! - `capacity`: remaining-capacity arithmetic over telemetry samples
//! - `config`: YAML configuration and the hot-reloaded client limit
//! - `error`: error types for configuration and networking
//! - `network`: UDP server and packet dispatch
//! - `notify`: accepted events and the waiter registry
//! - `policy`: release gate for the lowest tier
//! - `queues`: per-tier FIFO queues
//! - `roles`: user profiles and tier classification
//! - `scheduler`: periodic reconciliation task
//! - `throttle`: the coordinator itself
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::config::{FileLimit, ServerConfig};
//! use server::network::Server;
//! use server::roles::StaticDirectory;
//! use server::scheduler::spawn_reconciliation;
//! use server::throttle::{LoginThrottle, ThrottleSettings};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServerConfig::from_file("conf/gate.yaml")?;
//!     let throttle = Arc::new(LoginThrottle::new(
//!         Arc::new(FileLimit::new("conf/gate.yaml", config.max_clients)),
//!         Arc::new(StaticDirectory::from_config(&config)),
//!         ThrottleSettings::from(&config),
//!     ));
//!
//!     spawn_reconciliation(Arc::clone(&throttle), Duration::from_millis(config.tick_interval_ms));
//!
//!     let server = Server::bind("127.0.0.1:8080", throttle).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod capacity;
pub mod config;
pub mod error;
pub mod network;
pub mod notify;
pub mod policy;
pub mod queues;
pub mod roles;
pub mod scheduler;
pub mod throttle;
