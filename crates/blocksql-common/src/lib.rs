//! blocksql Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the blocksql workspace.
//!
//! # Overview
//!
//! - **Error Handling**: Custom error type and result alias
//! - **Logging**: Tracing subscriber setup shared by every binary
//! - **Assets**: The catalogue of supported ledgers and their block times
//!
//! # Example
//!
//! ```no_run
//! use blocksql_common::{Asset, Result};
//!
//! fn lag_for(name: &str) -> Result<u64> {
//!     let asset: Asset = name.parse()?;
//!     Ok(asset.block_lag(7200))
//! }
//! ```

pub mod asset;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use asset::Asset;
pub use error::{BlocksqlError, Result};
