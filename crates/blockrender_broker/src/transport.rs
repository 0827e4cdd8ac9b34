//! Provisioning of embedded render contexts and the events they deliver.
//!
//! A [`ContextProvisioner`] creates one embedded context per target origin and
//! returns a [`ContextHandle`] used to post envelopes into it. Everything the
//! context posts back arrives on the shared event sender as [`ChannelEvent`]s.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde_json::Value;
use tokio::sync::mpsc;
use url::Url;

use crate::protocol::OutboundMessage;

/// What a provisioner needs to know to bring up one context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextSpec {
    /// Origin envelopes are scoped to, and that inbound messages must come from
    pub origin: String,
    /// Address of the render-mode page
    pub render_url: Url,
    /// Distinguishes successive contexts for the same origin
    pub generation: u64,
}

/// Raw events delivered by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    /// A cross-context message, not yet checked or decoded
    Message { origin: String, data: Value },
    /// The transport behind a context went away
    Closed {
        origin: String,
        generation: u64,
        reason: String,
    },
}

impl ChannelEvent {
    pub fn message(origin: impl Into<String>, data: Value) -> Self {
        Self::Message {
            origin: origin.into(),
            data,
        }
    }
}

/// Write half of a provisioned context. Dropping it releases the context.
#[derive(Debug)]
pub struct ContextHandle {
    origin: String,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl ContextHandle {
    pub fn new(origin: impl Into<String>, outbound: mpsc::UnboundedSender<OutboundMessage>) -> Self {
        Self {
            origin: origin.into(),
            outbound,
        }
    }

    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Posts an envelope to the context
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::ContextClosed`] if the transport is gone
    pub fn post(&self, message: OutboundMessage) -> Result<(), ChannelError> {
        self.outbound
            .send(message)
            .map_err(|_| ChannelError::ContextClosed(self.origin.clone()))
    }
}

pub trait ContextProvisioner: Send + Sync {
    /// Brings up a context for `spec`. Must not block: loading happens in the
    /// background and the service announces itself with a `renderready` message.
    ///
    /// # Errors
    ///
    /// Returns an error if the context cannot even be started
    fn provision(
        &self,
        spec: &ContextSpec,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<ContextHandle, ChannelError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Inbound message handler already registered")]
    HandlerAlreadyRegistered,
    #[error("Invalid render url for {address}: {source}")]
    InvalidRenderUrl {
        address: String,
        source: url::ParseError,
    },
    #[error("Unsupported url scheme for render transport: {0}")]
    UnsupportedScheme(String),
    #[error("No async runtime available to start the render transport")]
    NoRuntime,
    #[error("Render context for {0} is closed")]
    ContextClosed(String),
}

struct MemoryContext {
    spec: ContextSpec,
    outbound: mpsc::UnboundedReceiver<OutboundMessage>,
    events: mpsc::UnboundedSender<ChannelEvent>,
}

/// In-process contexts for hosts that carry the messages themselves.
///
/// The host drains what the broker posted with [`MemoryProvisioner::take_outbound`]
/// and hands back whatever the service answered with [`MemoryProvisioner::deliver`].
#[derive(Clone, Default)]
pub struct MemoryProvisioner {
    contexts: Arc<Mutex<HashMap<String, MemoryContext>>>,
    history: Arc<Mutex<Vec<ContextSpec>>>,
}

impl MemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every context provisioned so far, in provisioning order
    pub fn provisioned(&self) -> Vec<ContextSpec> {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn render_url(&self, origin: &str) -> Option<Url> {
        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(origin)
            .map(|ctx| ctx.spec.render_url.clone())
    }

    /// Drains envelopes posted to the context for `origin`
    pub fn take_outbound(&self, origin: &str) -> Vec<OutboundMessage> {
        let mut contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(ctx) = contexts.get_mut(origin) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        while let Ok(message) = ctx.outbound.try_recv() {
            messages.push(message);
        }
        messages
    }

    /// Delivers a payload as if the context for `origin` had posted it.
    /// Returns false if there is no such context or nobody listens anymore.
    pub fn deliver(&self, origin: &str, data: Value) -> bool {
        let contexts = self.contexts.lock().unwrap_or_else(PoisonError::into_inner);
        contexts.get(origin).is_some_and(|ctx| {
            ctx.events
                .send(ChannelEvent::message(origin, data))
                .is_ok()
        })
    }

    /// Simulates the transport for `origin` going away
    pub fn close(&self, origin: &str, reason: impl Into<String>) -> bool {
        let Some(ctx) = self
            .contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(origin)
        else {
            return false;
        };

        ctx.events
            .send(ChannelEvent::Closed {
                origin: origin.to_string(),
                generation: ctx.spec.generation,
                reason: reason.into(),
            })
            .is_ok()
    }
}

impl ContextProvisioner for MemoryProvisioner {
    fn provision(
        &self,
        spec: &ContextSpec,
        events: mpsc::UnboundedSender<ChannelEvent>,
    ) -> Result<ContextHandle, ChannelError> {
        let (tx, rx) = mpsc::unbounded_channel();

        self.contexts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                spec.origin.clone(),
                MemoryContext {
                    spec: spec.clone(),
                    outbound: rx,
                    events,
                },
            );
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spec.clone());

        Ok(ContextHandle::new(spec.origin.clone(), tx))
    }
}
