//! # rwisp - Bulk SSH Configuration for Wireless APs and CPEs
//!
//! `rwisp` connects to fleets of wireless access points and customer premises
//! equipment over SSH and applies small configuration changes to each one:
//! country code checks and rewrites, PPPoE MTU/MRU fixes, and `radio.1.*`
//! parameter updates. Every host runs the same probe, connect, read, decide,
//! apply, verify, persist and reboot sequence, concurrently and independently.
//!
//! ## Features
//!
//! - **Fallback Credentials**: The primary password first, then each alternate in order
//! - **Dry-Run**: Simulated sessions log every intended command and send nothing
//! - **Bounded Concurrency**: One task per host, at most `max_workers` in flight
//! - **Structured Results**: Exactly one tagged result per host, grouped into a fixed-order summary
//! - **Legacy Compatibility**: Algorithm profiles down to the ciphers old dropbear builds offer
//! - **Audit Trail**: Optional JSONL-exportable record of every attempt and command
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rwisp::batch::BatchExecutor;
//! use rwisp::config::RunConfig;
//! use rwisp::credentials::{CredentialStore, DeviceClass};
//! use rwisp::hosts::load_host_list;
//! use rwisp::probe::PingProbe;
//! use rwisp::protocol::{DeviceRunner, Operation};
//! use rwisp::report::{paginate, Summary, DEFAULT_PAGE_SIZE};
//! use rwisp::session::SshConnector;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = CredentialStore::load("credentials.json").await?;
//!     let credentials = store.get(DeviceClass::Ap)?.clone();
//!
//!     let mut config = RunConfig::new(credentials, "511", "32");
//!     config.reboot = true;
//!     config.validate()?;
//!     let config = Arc::new(config);
//!
//!     let hosts = load_host_list("ap_list.txt").await?;
//!     let runner = Arc::new(DeviceRunner::new(
//!         SshConnector::from_config(&config),
//!         PingProbe::default(),
//!         Arc::clone(&config),
//!     ));
//!
//!     let results = BatchExecutor::from_config(&config)
//!         .run_operation(runner, hosts, Operation::UpdateCountry)
//!         .await;
//!
//!     let summary = Summary::from_results(&results);
//!     for page in paginate(&summary.lines(), DEFAULT_PAGE_SIZE) {
//!         println!("{}", page.join("\n"));
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`session::open_session`] - Opens a live or simulated [`session::DeviceSession`]
//! - [`ops`] - Single remote configuration steps
//! - [`protocol::DeviceRunner`] - Per-host state machine
//! - [`batch::BatchExecutor`] - Bounded concurrent runner over a host list
//! - [`report::Summary`] - Categorized, paginated results
//! - [`error::ConnectError`] - Error type for every fallible operation
//! - [`config`] - Run configuration and SSH algorithm profiles

pub mod batch;
pub mod config;
pub mod credentials;
pub mod error;
pub mod hosts;
pub mod ops;
pub mod probe;
pub mod protocol;
pub mod report;
pub mod retry;
pub mod session;
pub mod snapshot;
