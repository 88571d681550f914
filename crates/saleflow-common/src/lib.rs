//! Saleflow Common Library
//!
//! Pieces shared by every saleflow binary:
//!
//! - **Error Handling**: [`CommonError`] and the crate [`Result`] alias
//! - **Environment**: typed lookups of process environment variables
//! - **Logging**: `tracing` subscriber setup driven by `LOG_*` variables
//!
//! # Example
//!
//! ```no_run
//! use saleflow_common::logging::{init_logging, LogConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = LogConfig::from_env()?;
//!     let _guard = init_logging(&config)?;
//!     tracing::info!("ready");
//!     Ok(())
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]

pub mod env;
pub mod error;
pub mod logging;

pub use error::{CommonError, Result};
