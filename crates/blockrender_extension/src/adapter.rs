use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use blockrender_broker::{BrokerError, RenderBroker, RenderRequest, RenderResult};

/// Trace type the extension responds to
pub const TRACE_TYPE: &str = "makecode_blocks";

pub const MISSING_SOURCE_MESSAGE: &str = "No code provided";

/// A trace emitted by the host chat widget
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// What the host asks the extension to display
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayCommand {
    #[serde(default, alias = "code", skip_serializing_if = "Option::is_none")]
    pub source_code: Option<String>,
    #[serde(default, alias = "platform", skip_serializing_if = "Option::is_none")]
    pub target_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package_id: Option<String>,
    /// Caller-chosen request id, generated when absent
    #[serde(default, alias = "id", skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl DisplayCommand {
    /// Reads the command out of a trace payload. A trace without payload
    /// yields an empty command.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::InvalidPayload`] if the payload has the wrong shape
    pub fn from_trace(trace: &Trace) -> Result<Self, AdapterError> {
        match &trace.payload {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(payload) => Self::deserialize(payload)
                .map_err(|e| AdapterError::InvalidPayload(e.to_string())),
        }
    }

    fn has_source(&self) -> bool {
        self.source_code.as_deref().is_some_and(|s| !s.is_empty()) || self.package_id.is_some()
    }
}

/// What the output slot currently shows
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Artifact {
    Loading {
        #[serde(rename = "requestId")]
        request_id: String,
    },
    Image {
        uri: String,
        width: f64,
        height: f64,
    },
    Error {
        message: String,
    },
}

impl Artifact {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

impl From<RenderResult> for Artifact {
    fn from(result: RenderResult) -> Self {
        match result {
            RenderResult::Success {
                image_uri,
                width,
                height,
            } => Self::Image {
                uri: image_uri,
                width,
                height,
            },
            RenderResult::Failure { message } => Self::Error { message },
        }
    }
}

/// Where the host mounts the extension's output
pub trait OutputSlot {
    fn replace(&mut self, artifact: Artifact);
}

/// Keeps every artifact shown, last one is current
impl OutputSlot for Vec<Artifact> {
    fn replace(&mut self, artifact: Artifact) {
        self.push(artifact);
    }
}

impl OutputSlot for watch::Sender<Artifact> {
    fn replace(&mut self, artifact: Artifact) {
        self.send_replace(artifact);
    }
}

/// Final state of a displayed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rendered {
    pub request_id: String,
    pub artifact: Artifact,
}

/// Bridges host display commands to the render broker
#[derive(Clone)]
pub struct ExtensionAdapter {
    broker: RenderBroker,
}

impl ExtensionAdapter {
    pub fn new(broker: RenderBroker) -> Self {
        Self { broker }
    }

    pub fn broker(&self) -> &RenderBroker {
        &self.broker
    }

    pub fn matches(trace: &Trace) -> bool {
        trace.kind == TRACE_TYPE
    }

    /// Displays a host trace, see [`ExtensionAdapter::display`]
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::UnsupportedTrace`] for traces of another type,
    /// otherwise the errors of [`ExtensionAdapter::display`]
    pub async fn display_trace<S>(&self, trace: &Trace, slot: &mut S) -> Result<Rendered, AdapterError>
    where
        S: OutputSlot + ?Sized,
    {
        if !Self::matches(trace) {
            return Err(AdapterError::UnsupportedTrace(trace.kind.clone()));
        }

        let command = match DisplayCommand::from_trace(trace) {
            Ok(command) => command,
            Err(e) => {
                slot.replace(Artifact::error(e.to_string()));
                return Err(e);
            }
        };
        self.display(command, slot).await
    }

    /// Shows a loading placeholder in `slot`, renders the command and replaces
    /// the placeholder with the image or the error. A render the service
    /// refused is still `Ok`, with an [`Artifact::Error`].
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::MissingSource`] when the command has neither
    /// code nor package, or a broker error if the render could not be submitted.
    /// The slot shows the error in both cases.
    pub async fn display<S>(&self, command: DisplayCommand, slot: &mut S) -> Result<Rendered, AdapterError>
    where
        S: OutputSlot + ?Sized,
    {
        if !command.has_source() {
            slot.replace(Artifact::error(MISSING_SOURCE_MESSAGE));
            return Err(AdapterError::MissingSource);
        }

        let request_id = command
            .request_id
            .unwrap_or_else(|| format!("mc-{}", Uuid::new_v4().simple()));
        let target_key = command
            .target_key
            .unwrap_or_else(|| self.broker.targets().default_target().key.clone());

        let mut request = RenderRequest::new(
            request_id.clone(),
            command.source_code.unwrap_or_default(),
            target_key,
        );
        if let Some(package_id) = command.package_id {
            request = request.with_package_id(package_id);
        }

        slot.replace(Artifact::Loading {
            request_id: request_id.clone(),
        });
        debug!("Rendering blocks for {request_id}");

        let pending = match self.broker.request_render(request).await {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Failed submitting render {request_id}: {e}");
                slot.replace(Artifact::error(e.to_string()));
                return Err(e.into());
            }
        };

        let artifact = Artifact::from(pending.wait().await);
        match &artifact {
            Artifact::Error { message } => info!("Render {request_id} failed: {message}"),
            _ => info!("Render {request_id} completed"),
        }
        slot.replace(artifact.clone());

        Ok(Rendered {
            request_id,
            artifact,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    #[error("No code provided")]
    MissingSource,
    #[error("Invalid trace payload: {0}")]
    InvalidPayload(String),
    #[error("Unsupported trace type: {0}")]
    UnsupportedTrace(String),
    #[error(transparent)]
    Broker(#[from] BrokerError),
}
