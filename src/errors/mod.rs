//! # Error Handling
//!
//! Error types shared by the provider client, the atomic writer, the node
//! service and the rotation reconciler.

pub mod types;

pub use types::{Error, Result};
