//! # Login Gate Client Library
//!
//! Client side of the login gate protocol. Game front-ends use it to ask for
//! entry to the lobby, the lobby itself uses it to report how many clients it
//! holds, and operators use it to inspect the gate.
//!
//! ## Module Organization
//!
//! ### Network Module (`network`)
//! [`network::LoginClient`] wraps one UDP socket talking to the gate:
//! - Login requests that stay on the line while queued
//! - Telemetry reports and cancellations (fire and forget)
//! - Snapshot requests for diagnostics
//!
//! ### Retry Module (`retry`)
//! Exponential backoff with random jitter for logins that time out. The gate
//! loses its queues on restart, so clients are expected to come back.
//!
//! ### Error Module (`error`)
//! [`error::ClientError`] covers socket, codec and protocol failures.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::network::LoginClient;
//! use client::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut gate = LoginClient::connect("127.0.0.1:8080").await?;
//!     let outcome = gate
//!         .login_with_retry("alice", Duration::from_secs(30), &RetryPolicy::default())
//!         .await?;
//!     println!("{:?}", outcome);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod network;
pub mod retry;
