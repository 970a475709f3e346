//! Networked node runtime for the Tessera ledger.
//!
//! This crate wraps the agreement machinery from `tessera-bft` with real
//! async I/O:
//!
//! - Signed UDP datagrams via [`network::SignedTransport`]
//! - Retry-until-acknowledged requests via [`network::ReliableSender`]
//! - Client request handling via [`LedgerService`]
//! - Prometheus metrics and tracing setup via [`metrics`] and [`telemetry`]
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                            Tessera Node                              │
//! │                                                                      │
//! │  receive loop (one task)                                             │
//! │    └─ loop { datagram = recv(); spawn(process(datagram)); }          │
//! │                                │                                     │
//! │                                ▼                                     │
//! │  per-request task: authenticate ─► dedup ─► start_consensus          │
//! │                                              │                       │
//! │                                              ▼                       │
//! │                    ConsensusDriver ──finalize──► Ledger (watch)      │
//! │                                                     │                │
//! │  per-request task: wait_for_length ◄────────────────┘ ─► reply       │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod metrics;
pub mod network;
mod registry;
mod service;
pub mod telemetry;

pub use config::{ConfigError, NodeConfig};
pub use registry::RequestRegistry;
pub use service::{ClientDirectory, LedgerService, ServiceConfig, ServiceError, ServiceHandle};
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryError, TelemetryGuard};
