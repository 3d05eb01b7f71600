//! # Configuration Management
//!
//! Driver configuration is read from `SECRETS_STORE_*` environment variables
//! and validated with `validator` before any component is constructed.

pub mod settings;

pub use settings::{DriverConfig, ObservabilityConfig, ProviderConfig, RotationConfig};
