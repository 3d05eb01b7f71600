//! In-process mock backend with scriptable objects and failures.

use super::plugin::SecretProvider;
use crate::errors::{Error, Result};
use crate::proto::{File, MountRequest, MountResponse, ObjectVersion, ProviderErrorMessage};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;

#[derive(Debug, Clone)]
struct MockObject {
    version: String,
    contents: Vec<u8>,
}

#[derive(Debug, Default)]
struct MockState {
    objects: BTreeMap<String, MockObject>,
    error_code: Option<String>,
    unavailable_remaining: u32,
    omit_versions: bool,
    calls: u32,
    last_request: Option<MountRequest>,
}

/// Serves a fixed set of objects, one file per object id.
///
/// Objects, provider error codes and transient `Unavailable` failures are
/// scripted through the setters.
#[derive(Debug)]
pub struct MockProvider {
    name: String,
    state: Mutex<MockState>,
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), state: Mutex::new(MockState::default()) }
    }

    /// Builder form of [`MockProvider::set_object`]
    pub fn with_object(self, id: &str, version: &str, contents: impl Into<Vec<u8>>) -> Self {
        self.set_object(id, version, contents);
        self
    }

    pub fn set_object(&self, id: &str, version: &str, contents: impl Into<Vec<u8>>) {
        self.state().objects.insert(
            id.to_string(),
            MockObject { version: version.to_string(), contents: contents.into() },
        );
    }

    pub fn remove_object(&self, id: &str) {
        self.state().objects.remove(id);
    }

    /// Every subsequent Mount answers with this provider error code
    pub fn set_error_code(&self, code: Option<&str>) {
        self.state().error_code = code.map(str::to_string);
    }

    /// The next `count` Mount calls fail with `Unavailable`
    pub fn fail_unavailable(&self, count: u32) {
        self.state().unavailable_remaining = count;
    }

    /// Answer with files but no object versions
    pub fn omit_versions(&self, omit: bool) {
        self.state().omit_versions = omit;
    }

    pub fn calls(&self) -> u32 {
        self.state().calls
    }

    pub fn last_request(&self) -> Option<MountRequest> {
        self.state().last_request.clone()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        // state stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SecretProvider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn mount(&self, request: MountRequest) -> Result<MountResponse> {
        let mut state = self.state();
        state.calls += 1;
        state.last_request = Some(request.clone());

        if state.unavailable_remaining > 0 {
            state.unavailable_remaining -= 1;
            return Err(Error::grpc_status(
                "mock provider unavailable",
                tonic::Status::unavailable("mock provider unavailable"),
            ));
        }

        if let Some(code) = &state.error_code {
            return Ok(MountResponse {
                object_version: vec![],
                error: Some(ProviderErrorMessage { code: code.clone() }),
                files: vec![],
            });
        }

        let mode = serde_json::from_str::<u32>(&request.permission)
            .ok()
            .and_then(|mode| i32::try_from(mode).ok())
            .ok_or_else(|| {
                Error::invalid_field(format!("invalid file permission: {:?}", request.permission), "permission")
            })?;
        let files = state
            .objects
            .iter()
            .map(|(id, object)| File { path: id.clone(), mode, contents: object.contents.clone() })
            .collect();
        let object_version = if state.omit_versions {
            vec![]
        } else {
            state
                .objects
                .iter()
                .map(|(id, object)| ObjectVersion { id: id.clone(), version: object.version.clone() })
                .collect()
        };

        Ok(MountResponse { object_version, error: None, files })
    }
}
