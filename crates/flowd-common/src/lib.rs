//! flowd Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the flowd workspace.
//!
//! # Overview
//!
//! - **Types**: the [`FlowRecord`](types::FlowRecord) exchanged between flow
//!   producers and the collector
//! - **Error Handling**: common error and result types
//! - **Logging**: `tracing` subscriber setup shared by every binary
//!
//! # Example
//!
//! ```no_run
//! use flowd_common::{Result, types::FlowRecord};
//!
//! fn handle(body: &[u8]) -> Result<()> {
//!     let record = FlowRecord::decode(body)?;
//!     println!("flow {} last seen at {}", record.id, record.last_seen);
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{FlowdError, Result};
