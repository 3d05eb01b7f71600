//! gRPC protocol definitions for the provider plugin contract
//!
//! Generated from `proto/v1alpha1/provider.proto`. The driver is the client;
//! provider plugins (and the in-crate mock provider) implement the server.

#![allow(missing_docs)]
#![allow(clippy::doc_overindented_list_items)]

/// Version 1alpha1 of the provider contract
pub mod v1alpha1 {
    tonic::include_proto!("v1alpha1");
}

pub use v1alpha1::csi_driver_provider_client::CsiDriverProviderClient;
pub use v1alpha1::csi_driver_provider_server::{CsiDriverProvider, CsiDriverProviderServer};
pub use v1alpha1::{
    Error as ProviderErrorMessage, File, MountRequest, MountResponse, ObjectVersion,
    VersionRequest, VersionResponse,
};

/// Contract version sent in `VersionRequest`
pub const CONTRACT_VERSION: &str = "v1alpha1";
