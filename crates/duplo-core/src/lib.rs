//! Duplo core library: continuous duplicate-code remediation.
//!
//! The crate scans a repository for symbols with origin tracking, finds
//! duplicated code through a similarity index, decides per finding whether
//! to fix it automatically, escalate it to a human, or batch it for a
//! language expert, and drives the matching external actuator. A memory
//! governor sizes each batch of work.
//!
//! [`bridge::OrchestrationBridge`] is the entry point.

pub mod bridge;
pub mod config;
pub mod decision;
pub mod errors;
pub mod finder;
pub mod indexer;
pub mod memory;
pub mod models;
pub mod router;
pub mod store;
pub mod telemetry;

pub use bridge::{BridgeSummary, OrchestrationBridge};
pub use config::DuploConfig;
pub use errors::{DuploError, DuploResult};
