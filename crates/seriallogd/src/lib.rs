//! seriallog daemon - serial ingestion and live broadcast
//!
//! This crate provides the concurrent engine behind `seriallogd`:
//! - `ingest` - one supervised ingestor per serial device
//! - `hub` - publish/subscribe fan-out with slow-consumer eviction
//! - `delete` - best-effort "delete log N" signalling to ingestors
//! - `persist` - append-only per-device log files
//! - `server` - HTTP/WebSocket surface for subscribers and delete requests
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   lines   ┌────────────────┐  offer   ┌─────────────┐
//! │ serial port  │──────────▶│ SourceIngestor │─────────▶│  Publisher  │
//! │ (per index)  │           │  (supervised)  │          │   (queue)   │
//! └──────────────┘           └───────┬────────┘          └──────┬──────┘
//!                                    │ append                   │ fan-out
//!                                    ▼                          ▼
//!                            ┌───────────────┐          ┌──────────────┐
//!                            │ prefix_N.txt  │          │ BroadcastHub │
//!                            └───────────────┘          └──────┬───────┘
//!                                    ▲                         │ mailbox (15)
//!                   DeleteCoordinator│                         ▼
//!                            ┌───────┴───────┐          ┌──────────────┐
//!                            │ POST /delete/N│          │  WebSocket   │
//!                            └───────────────┘          │  sessions    │
//!                                                       └──────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod config;
pub mod daemon;
pub mod delete;
pub mod device;
pub mod hub;
pub mod ingest;
pub mod persist;
pub mod server;

pub use config::{ConfigError, DaemonConfig};
pub use daemon::{Daemon, DaemonError, DaemonHandle};
