//! Chat widget extension for MakeCode block traces.
//!
//! [`adapter::ExtensionAdapter`] turns `makecode_blocks` traces into render
//! requests and keeps an output slot up to date. [`server`] exposes the same
//! flow over HTTP.

pub mod adapter;
pub mod server;

use std::sync::Arc;

use blockrender_broker::RenderBroker;

pub use adapter::{AdapterError, Artifact, DisplayCommand, ExtensionAdapter, Rendered, Trace};
pub use server::start_server;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub adapter: Arc<ExtensionAdapter>,
}

impl AppState {
    pub fn new(broker: RenderBroker) -> Self {
        Self {
            adapter: Arc::new(ExtensionAdapter::new(broker)),
        }
    }
}
