//! # Provider Plugins
//!
//! Driver-side clients for out-of-process secret providers, the registry that
//! caches them, and the provider-side server used by plugin binaries and tests.

pub mod client;
pub mod mock;
pub mod plugin;
pub mod registry;

pub use client::{ClientOptions, MountOutcome, ProviderClient};
pub use mock::MockProvider;
pub use plugin::{serve_unix, validate_mount_request, PluginServer, ProviderFactoryRegistry, SecretProvider};
pub use registry::{validate_provider_name, ProviderRegistry};
