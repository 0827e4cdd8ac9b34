use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

use blockrender_config::targets::render_url;

use crate::{
    model::{ChannelState, RenderResult},
    protocol::{OutboundMessage, ServiceMessage, decode_inbound},
    transport::{ChannelError, ChannelEvent, ContextHandle, ContextProvisioner, ContextSpec},
};

/// What an inbound event means to the broker once decoded
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelSignal {
    /// The context for `origin` became ready for the first time
    Ready { origin: String },
    /// The context for `origin` answered request `id`
    Reply {
        origin: String,
        id: String,
        result: RenderResult,
    },
    /// The context for `origin` is gone
    Lost { origin: String, reason: String },
}

struct EmbeddedContext {
    render_url: Url,
    generation: u64,
    state: ChannelState,
    handle: ContextHandle,
}

/// Owns the embedded render contexts, one per target origin, and is the only
/// reader and writer of the render protocol.
pub struct RenderChannel {
    provisioner: Arc<dyn ContextProvisioner>,
    service_tag: String,
    contexts: HashMap<String, EmbeddedContext>,
    next_generation: u64,
    events_tx: mpsc::UnboundedSender<ChannelEvent>,
    events_rx: Option<mpsc::UnboundedReceiver<ChannelEvent>>,
}

impl RenderChannel {
    pub fn new(provisioner: Arc<dyn ContextProvisioner>, service_tag: impl Into<String>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            provisioner,
            service_tag: service_tag.into(),
            contexts: HashMap::new(),
            next_generation: 0,
            events_tx,
            events_rx: Some(events_rx),
        }
    }

    pub fn service_tag(&self) -> &str {
        &self.service_tag
    }

    /// Hands out the receiver of every inbound event. There is only one.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::HandlerAlreadyRegistered`] on the second call
    pub fn on_message(&mut self) -> Result<mpsc::UnboundedReceiver<ChannelEvent>, ChannelError> {
        self.events_rx
            .take()
            .ok_or(ChannelError::HandlerAlreadyRegistered)
    }

    /// Makes sure a context exists for the origin of `address`, creating it
    /// on first use. Returns the state of that context.
    ///
    /// # Errors
    ///
    /// Returns an error if the render url cannot be built or the provisioner fails
    pub fn ensure_provisioned(&mut self, address: &Url) -> Result<ChannelState, ChannelError> {
        let origin = origin_of(address);
        if let Some(ctx) = self.contexts.get(&origin) {
            return Ok(ctx.state);
        }

        let render_url = render_url(address).map_err(|source| ChannelError::InvalidRenderUrl {
            address: address.to_string(),
            source,
        })?;
        self.next_generation += 1;
        let spec = ContextSpec {
            origin: origin.clone(),
            render_url: render_url.clone(),
            generation: self.next_generation,
        };

        let handle = self.provisioner.provision(&spec, self.events_tx.clone())?;
        info!("Provisioning render context at {render_url}");

        self.contexts.insert(
            origin,
            EmbeddedContext {
                render_url,
                generation: spec.generation,
                state: ChannelState::Provisioning,
                handle,
            },
        );

        Ok(ChannelState::Provisioning)
    }

    pub fn state(&self, address: &Url) -> ChannelState {
        self.contexts
            .get(&origin_of(address))
            .map_or(ChannelState::Uninitialized, |ctx| ctx.state)
    }

    pub fn render_url(&self, address: &Url) -> Option<&Url> {
        self.contexts
            .get(&origin_of(address))
            .map(|ctx| &ctx.render_url)
    }

    /// Posts an envelope to the context serving `address`. Fire and forget:
    /// a missing or closed context is only logged.
    pub fn send(&self, address: &Url, message: OutboundMessage) {
        let origin = origin_of(address);
        let Some(ctx) = self.contexts.get(&origin) else {
            debug!(
                "Dropping render request {} for {origin}: no context",
                message.id()
            );
            return;
        };

        trace!("Posting render request {} to {origin}", message.id());
        if let Err(e) = ctx.handle.post(message) {
            warn!("Failed posting render request: {e}");
        }
    }

    /// Decodes an inbound event. Noise (unknown origins, foreign or malformed
    /// payloads, repeated readiness) yields `None`.
    pub fn accept(&mut self, event: ChannelEvent) -> Option<ChannelSignal> {
        match event {
            ChannelEvent::Message { origin, data } => {
                let Some(ctx) = self.contexts.get_mut(&origin) else {
                    trace!("Ignoring message from {origin}: no context");
                    return None;
                };

                let message = match decode_inbound(&data, &self.service_tag) {
                    Ok(message) => message,
                    Err(e) => {
                        trace!("Ignoring message from {origin}: {e}");
                        return None;
                    }
                };

                match message {
                    ServiceMessage::RenderReady if ctx.state == ChannelState::Ready => {
                        debug!("Render context {origin} confirmed readiness again");
                        None
                    }
                    ServiceMessage::RenderReady => {
                        ctx.state = ChannelState::Ready;
                        info!("Render context {origin} is ready");
                        Some(ChannelSignal::Ready { origin })
                    }
                    ServiceMessage::RenderBlocks(reply) => match reply.into_result() {
                        Ok((id, result)) => Some(ChannelSignal::Reply { origin, id, result }),
                        Err(e) => {
                            debug!("Ignoring reply from {origin}: {e}");
                            None
                        }
                    },
                }
            }
            ChannelEvent::Closed {
                origin,
                generation,
                reason,
            } => {
                match self.contexts.get(&origin) {
                    Some(ctx) if ctx.generation == generation => {}
                    _ => {
                        trace!("Ignoring close of a retired context for {origin}");
                        return None;
                    }
                }

                self.contexts.remove(&origin);
                warn!("Render context {origin} lost: {reason}");
                Some(ChannelSignal::Lost { origin, reason })
            }
        }
    }

    /// Releases every context. Returns the origins that were torn down.
    pub fn teardown(&mut self) -> Vec<String> {
        let origins: Vec<String> = self.contexts.drain().map(|(origin, _)| origin).collect();
        if !origins.is_empty() {
            info!("Tore down {} render context(s)", origins.len());
        }
        origins
    }
}

pub(crate) fn origin_of(address: &Url) -> String {
    address.origin().ascii_serialization()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::RenderOptions;
    use crate::transport::MemoryProvisioner;
    use serde_json::json;

    const MICROBIT: &str = "https://makecode.microbit.org";

    fn setup() -> (MemoryProvisioner, RenderChannel) {
        let provisioner = MemoryProvisioner::new();
        let channel = RenderChannel::new(Arc::new(provisioner.clone()), "makecode");
        (provisioner, channel)
    }

    fn address(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_on_message_only_once() {
        let (_, mut channel) = setup();
        assert!(channel.on_message().is_ok());
        assert!(matches!(
            channel.on_message(),
            Err(ChannelError::HandlerAlreadyRegistered)
        ));
    }

    #[test]
    fn test_ensure_provisioned_is_idempotent_per_origin() {
        let (provisioner, mut channel) = setup();
        let microbit = address("https://makecode.microbit.org/");

        assert_eq!(channel.state(&microbit), ChannelState::Uninitialized);
        assert_eq!(
            channel.ensure_provisioned(&microbit).unwrap(),
            ChannelState::Provisioning
        );
        assert_eq!(
            channel.ensure_provisioned(&microbit).unwrap(),
            ChannelState::Provisioning
        );

        let specs = provisioner.provisioned();
        assert_eq!(specs.len(), 1);
        assert_eq!(
            specs[0].render_url.as_str(),
            "https://makecode.microbit.org/--docs?render=1"
        );
        assert_eq!(specs[0].origin, MICROBIT);

        channel
            .ensure_provisioned(&address("https://arcade.makecode.com/"))
            .unwrap();
        assert_eq!(provisioner.provisioned().len(), 2);
    }

    #[test]
    fn test_ready_fires_once() {
        let (_, mut channel) = setup();
        let microbit = address("https://makecode.microbit.org/");
        channel.ensure_provisioned(&microbit).unwrap();

        let ready = json!({ "source": "makecode", "type": "renderready" });
        assert_eq!(
            channel.accept(ChannelEvent::message(MICROBIT, ready.clone())),
            Some(ChannelSignal::Ready {
                origin: MICROBIT.to_string()
            })
        );
        assert_eq!(channel.state(&microbit), ChannelState::Ready);
        assert_eq!(channel.accept(ChannelEvent::message(MICROBIT, ready)), None);
    }

    #[test]
    fn test_noise_is_discarded() {
        let (_, mut channel) = setup();
        channel
            .ensure_provisioned(&address("https://makecode.microbit.org/"))
            .unwrap();

        let noise = [
            ChannelEvent::message(MICROBIT, json!({ "type": "renderready" })),
            ChannelEvent::message(MICROBIT, json!({ "source": "devtools", "type": "renderready" })),
            ChannelEvent::message(MICROBIT, json!({ "source": "makecode", "type": "other" })),
            ChannelEvent::message(
                MICROBIT,
                json!({ "source": "makecode", "type": "renderblocks", "id": "r1" }),
            ),
            ChannelEvent::message(
                "https://evil.example",
                json!({ "source": "makecode", "type": "renderready" }),
            ),
        ];
        for event in noise {
            assert_eq!(channel.accept(event), None);
        }
    }

    #[test]
    fn test_reply_is_routed_by_id() {
        let (_, mut channel) = setup();
        channel
            .ensure_provisioned(&address("https://makecode.microbit.org/"))
            .unwrap();

        let signal = channel.accept(ChannelEvent::message(
            MICROBIT,
            json!({ "source": "makecode", "type": "renderblocks", "id": "r9", "error": "bad" }),
        ));
        assert_eq!(
            signal,
            Some(ChannelSignal::Reply {
                origin: MICROBIT.into(),
                id: "r9".into(),
                result: RenderResult::failure("bad")
            })
        );
    }

    #[test]
    fn test_send_without_context_is_silent() {
        let (provisioner, channel) = setup();
        let microbit = address("https://makecode.microbit.org/");

        channel.send(
            &microbit,
            OutboundMessage::render_blocks("r1", "", RenderOptions::default()),
        );
        assert!(provisioner.take_outbound(MICROBIT).is_empty());
    }

    #[test]
    fn test_closed_event_retires_context() {
        let (provisioner, mut channel) = setup();
        let microbit = address("https://makecode.microbit.org/");
        channel.ensure_provisioned(&microbit).unwrap();

        // a close from an older generation is ignored
        assert_eq!(
            channel.accept(ChannelEvent::Closed {
                origin: MICROBIT.into(),
                generation: 99,
                reason: "stale".into()
            }),
            None
        );

        let generation = provisioner.provisioned()[0].generation;
        assert_eq!(
            channel.accept(ChannelEvent::Closed {
                origin: MICROBIT.into(),
                generation,
                reason: "gone".into()
            }),
            Some(ChannelSignal::Lost {
                origin: MICROBIT.into(),
                reason: "gone".into()
            })
        );
        assert_eq!(channel.state(&microbit), ChannelState::Uninitialized);

        channel.ensure_provisioned(&microbit).unwrap();
        assert_eq!(provisioner.provisioned().len(), 2);
        assert!(provisioner.provisioned()[1].generation > generation);
    }

    #[test]
    fn test_teardown_returns_origins() {
        let (_, mut channel) = setup();
        let microbit = address("https://makecode.microbit.org/");
        channel.ensure_provisioned(&microbit).unwrap();

        assert_eq!(channel.teardown(), vec![MICROBIT.to_string()]);
        assert_eq!(channel.state(&microbit), ChannelState::Uninitialized);
        assert!(channel.teardown().is_empty());
    }
}
