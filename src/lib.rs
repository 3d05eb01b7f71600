//! # Secrets Store CSI
//!
//! Node-side driver that mounts secrets, keys and certificates from external
//! secret backends into pod volumes and keeps them current.
//!
//! ## Architecture
//!
//! ```text
//! NodeServer ─┐
//!             ├─> ProviderRegistry -> ProviderClient -> provider plugin (unix socket)
//! Reconciler ─┘                                │
//!                                              v
//!                               AtomicWriter -> target directory
//! ```
//!
//! Publish and rotation both call the provider through the registry and
//! project the returned files with the atomic writer. Publish creates a mount
//! status record; the reconciler walks those records on a ticker.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use secrets_store_csi::{
//!     node::SystemMounter, observability::StatsReporter, platform::MemoryPlatform,
//!     platform::Platform, Driver, DriverConfig, Result,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = DriverConfig::from_env()?;
//!     let platform = Platform::in_memory(Arc::new(MemoryPlatform::new()));
//!     let reporter = StatsReporter::new(config.node_id.clone());
//!     let driver = Driver::new(config, platform, Arc::new(SystemMounter::new()), reporter);
//!     driver.run(async { let _ = tokio::signal::ctrl_c().await; }).await
//! }
//! ```

pub mod config;
pub mod driver;
pub mod errors;
pub mod fileutil;
pub mod node;
pub mod observability;
pub mod platform;
pub mod proto;
pub mod provider;
pub mod rotation;
pub mod utils;

pub use config::DriverConfig;
pub use driver::Driver;
pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name from Cargo.toml
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
