//! # blockrender broker
//!
//! Renders MakeCode block diagrams by delegating to the MakeCode render
//! service running in an embedded context.
//!
//! [`RenderChannel`] owns one embedded context per target origin and speaks
//! the render protocol. [`RenderBroker`] holds render requests back until
//! their context announces readiness, multiplexes them over the channel and
//! resolves each one exactly once when its reply arrives.

pub mod broker;
pub mod channel;
pub mod model;
pub mod protocol;
pub mod transport;
pub mod websocket;

pub use broker::{BrokerError, PendingRender, PendingRequest, RenderBroker};
pub use channel::{ChannelSignal, RenderChannel};
pub use model::{ChannelState, RenderRequest, RenderResult};
pub use protocol::{OutboundMessage, RenderOptions, ServiceMessage};
pub use transport::{
    ChannelError, ChannelEvent, ContextHandle, ContextProvisioner, ContextSpec, MemoryProvisioner,
};
pub use websocket::WebSocketProvisioner;
