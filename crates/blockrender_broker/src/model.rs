use serde::{Deserialize, Serialize};

use crate::protocol::RenderOptions;

/// Readiness of the embedded context serving one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Uninitialized,
    Provisioning,
    Ready,
}

/// Outcome delivered to whoever asked for a render
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RenderResult {
    Success {
        #[serde(rename = "imageUri")]
        image_uri: String,
        width: f64,
        height: f64,
    },
    Failure {
        message: String,
    },
}

impl RenderResult {
    pub fn failure(message: impl Into<String>) -> Self {
        Self::Failure {
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// A render asked of the broker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderRequest {
    /// Caller supplied, unique among in-flight requests
    pub request_id: String,
    pub source_code: String,
    /// Unknown keys resolve to the default target
    pub target_key: String,
    pub options: RenderOptions,
}

impl RenderRequest {
    pub fn new(
        request_id: impl Into<String>,
        source_code: impl Into<String>,
        target_key: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            source_code: source_code.into(),
            target_key: target_key.into(),
            options: RenderOptions::default(),
        }
    }

    #[must_use]
    pub fn with_package_id(mut self, package_id: impl Into<String>) -> Self {
        self.options.package_id = Some(package_id.into());
        self
    }
}
