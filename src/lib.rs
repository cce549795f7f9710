//! # rfleet - managed switch fleet polling and configuration
//!
//! `rfleet` keeps a live, in-memory picture of a fleet of managed switches
//! and applies port-level changes to them. Each switch is reached over its
//! HTTPS management API or, on legacy firmware, by driving the CLI over an
//! SSH shell with a prompt-matching state machine.
//!
//! ## Features
//!
//! - **Dual-path polling**: probes the out-of-band and trunk addresses and
//!   prefers OOB whenever it answers
//! - **Failure isolation**: every device polls in its own task; one slow or
//!   broken switch only degrades its own snapshot
//! - **CLI automaton**: login, enable, paging off and scripted captures with
//!   offline replay of recorded JSONL transcripts
//! - **REST transactions**: VLAN membership and PVID changes that report the
//!   step a failure stopped at
//! - **Legacy SSH**: algorithm profiles down to group1 key exchange and DSA
//!   host keys
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use rfleet::channel::FleetChannels;
//! use rfleet::fleet::{Credentials, FleetConfig};
//! use rfleet::poller::Poller;
//! use rfleet::service::FleetService;
//! use rfleet::store::SnapshotStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = FleetConfig::from_path("fleet.json")?;
//!     let settings = config.poll.clone();
//!     let fleet = Arc::new(config.into_fleet());
//!     let credentials = Arc::new(Credentials::new("admin", "password"));
//!
//!     let store = SnapshotStore::new();
//!     let channels = Arc::new(FleetChannels::new(credentials, settings.clone()));
//!     let poller = Poller::new(fleet.clone(), store.clone(), channels.clone(), settings);
//!     let service = FleetService::new(fleet, store, channels);
//!
//!     tokio::spawn(async move {
//!         poller.run_until(std::future::pending()).await;
//!     });
//!
//!     service.set_vlan("SW-CORE", 7, 20).await?;
//!     let snapshot = service.get_snapshot("SW-CORE").await?;
//!     println!("port 7 vlan: {:?}", snapshot.ports[&7].vlan_id);
//!     Ok(())
//! }
//! ```
//!
//! ## Main Components
//!
//! - [`poller::Poller`] - batched fleet polling into the snapshot store
//! - [`service::FleetService`] - snapshot reads and config commands
//! - [`channel::DeviceChannel`] - REST and CLI implementations per device
//! - [`automaton::Automaton`] - the CLI prompt state machine
//! - [`api::ApiAgent`] - one authenticated management API session
//! - [`error::ConnectError`] / [`error::CommandError`] - failure taxonomy

pub mod api;
pub mod automaton;
pub mod channel;
pub mod config;
pub mod error;
pub mod fleet;
pub mod model;
pub mod parse;
pub mod poller;
pub mod service;
pub mod session;
pub mod store;
pub mod templates;
