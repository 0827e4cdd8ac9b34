use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, trace, warn};
use url::Url;

use blockrender_config::{Config, targets::TargetTable};

use crate::{
    channel::{ChannelSignal, RenderChannel, origin_of},
    model::{ChannelState, RenderRequest, RenderResult},
    protocol::{OutboundMessage, RenderOptions},
    transport::{ChannelError, ChannelEvent, ContextProvisioner},
};

pub const TIMEOUT_MESSAGE: &str = "timed out";
pub const TEARDOWN_MESSAGE: &str = "render channel torn down";

/// Request held back until its target's context is ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRequest {
    pub request_id: String,
    pub source_code: String,
    pub target_key: String,
    pub address: Url,
    pub options: RenderOptions,
}

impl PendingRequest {
    fn envelope(&self) -> OutboundMessage {
        OutboundMessage::render_blocks(
            self.request_id.clone(),
            self.source_code.clone(),
            self.options.clone(),
        )
    }
}

/// Registry entry for a request waiting on its reply
struct OutstandingRender {
    origin: String,
    /// Distinguishes this submission from earlier ones that reused the id
    ticket: u64,
    completion: oneshot::Sender<RenderResult>,
    timer: Option<AbortHandle>,
}

struct BrokerState {
    channel: RenderChannel,
    pending: VecDeque<PendingRequest>,
    outstanding: HashMap<String, OutstandingRender>,
    next_ticket: u64,
}

impl BrokerState {
    /// Removes the entry before completing it, so a request completes at most
    /// once. A still queued copy of the request is dropped with it.
    fn complete(&mut self, request_id: &str, result: RenderResult) -> bool {
        let Some(entry) = self.outstanding.remove(request_id) else {
            return false;
        };
        self.pending.retain(|p| p.request_id != request_id);

        if let Some(timer) = entry.timer {
            timer.abort();
        }
        if entry.completion.send(result).is_err() {
            trace!("Nobody is waiting on render {request_id} anymore");
        }
        true
    }

    /// Completes `request_id` with a reply from `origin`. Replies from any
    /// other context are not trusted.
    fn complete_from(&mut self, origin: &str, request_id: &str, result: RenderResult) -> bool {
        match self.outstanding.get(request_id) {
            Some(entry) if entry.origin == origin => self.complete(request_id, result),
            Some(entry) => {
                debug!(
                    "Discarding reply for render {request_id} from {origin}, it was sent to {}",
                    entry.origin
                );
                false
            }
            None => false,
        }
    }

    fn fail_origin(&mut self, origin: &str, reason: &str) {
        self.pending.retain(|p| origin_of(&p.address) != origin);

        let ids: Vec<String> = self
            .outstanding
            .iter()
            .filter(|(_, entry)| entry.origin == origin)
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            self.complete(&id, RenderResult::failure(reason));
        }
    }

    fn dispatch_ready(&mut self, origin: &str) {
        let (ready, waiting): (VecDeque<_>, VecDeque<_>) = self
            .pending
            .drain(..)
            .partition(|p| origin_of(&p.address) == origin);
        self.pending = waiting;

        debug!("Dispatching {} queued render(s) to {origin}", ready.len());
        for request in ready {
            self.channel.send(&request.address, request.envelope());
        }
    }
}

/// Sequences render requests against context readiness and resolves each
/// request exactly once.
///
/// Cloning is cheap; all clones share the same channel and registry.
#[derive(Clone)]
pub struct RenderBroker {
    targets: Arc<TargetTable>,
    timeout: Option<Duration>,
    state: Arc<Mutex<BrokerState>>,
}

impl RenderBroker {
    pub fn new(channel: RenderChannel, targets: TargetTable) -> Self {
        Self {
            targets: Arc::new(targets),
            timeout: None,
            state: Arc::new(Mutex::new(BrokerState {
                channel,
                pending: VecDeque::new(),
                outstanding: HashMap::new(),
                next_ticket: 0,
            })),
        }
    }

    /// Builds a broker over `provisioner` with the targets, service tag and
    /// timeout from `cfg`
    ///
    /// # Errors
    ///
    /// Returns an error if the config has no targets
    pub fn from_config(
        cfg: &Config,
        provisioner: Arc<dyn ContextProvisioner>,
    ) -> Result<Self, BrokerError> {
        let targets = cfg
            .target_table()
            .map_err(|e| BrokerError::Config(e.to_string()))?;
        let channel = RenderChannel::new(provisioner, cfg.service_tag.clone());

        let broker = Self::new(channel, targets);
        Ok(match cfg.render_timeout() {
            Some(timeout) => broker.with_timeout(timeout),
            None => broker,
        })
    }

    /// Fails renders that get no reply within `timeout`
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn targets(&self) -> &TargetTable {
        &self.targets
    }

    /// Spawns the task that feeds inbound channel events into the broker
    ///
    /// # Errors
    ///
    /// Returns an error if the channel's inbound receiver was already taken
    pub async fn start(&self) -> Result<JoinHandle<()>, BrokerError> {
        let mut events = self.state.lock().await.channel.on_message()?;
        let broker = self.clone();

        Ok(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                broker.handle_event(event).await;
            }
            debug!("Render channel event stream ended");
        }))
    }

    /// Submits a render. Returns as soon as the request is dispatched or queued.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::DuplicateRequest`] if `request_id` is still in
    /// flight (the first request is left untouched), or a channel error if
    /// the target's context cannot be provisioned
    pub async fn request_render(&self, request: RenderRequest) -> Result<PendingRender, BrokerError> {
        let RenderRequest {
            request_id,
            source_code,
            target_key,
            options,
        } = request;

        let mut state = self.state.lock().await;
        if state.outstanding.contains_key(&request_id) {
            return Err(BrokerError::DuplicateRequest(request_id));
        }

        let target = self.targets.resolve(&target_key);
        if target.key != target_key {
            debug!(
                "Unknown target `{target_key}`, using default target `{}`",
                target.key
            );
        }
        let address = target.address.clone();

        let channel_state = state.channel.ensure_provisioned(&address)?;

        state.next_ticket += 1;
        let ticket = state.next_ticket;
        let timer = self.timeout.map(|timeout| {
            let broker = self.clone();
            let id = request_id.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                broker.expire(&id, ticket).await;
            })
            .abort_handle()
        });

        let (completion, receiver) = oneshot::channel();
        state.outstanding.insert(
            request_id.clone(),
            OutstandingRender {
                origin: origin_of(&address),
                ticket,
                completion,
                timer,
            },
        );

        let request = PendingRequest {
            request_id: request_id.clone(),
            source_code,
            target_key,
            address,
            options,
        };
        if channel_state == ChannelState::Ready {
            trace!("Dispatching render {request_id}");
            state.channel.send(&request.address, request.envelope());
        } else {
            trace!("Queueing render {request_id} until the render context is ready");
            state.pending.push_back(request);
        }
        drop(state);

        Ok(PendingRender {
            request_id,
            receiver,
        })
    }

    /// Like [`RenderBroker::request_render`], but hands the result to
    /// `on_complete` from a spawned task
    ///
    /// # Errors
    ///
    /// Same as [`RenderBroker::request_render`]; `on_complete` is not called then
    pub async fn request_render_then<F>(
        &self,
        request: RenderRequest,
        on_complete: F,
    ) -> Result<(), BrokerError>
    where
        F: FnOnce(RenderResult) + Send + 'static,
    {
        let pending = self.request_render(request).await?;
        tokio::spawn(async move {
            on_complete(pending.wait().await);
        });
        Ok(())
    }

    /// Applies one inbound channel event
    pub async fn handle_event(&self, event: ChannelEvent) {
        let mut state = self.state.lock().await;
        let Some(signal) = state.channel.accept(event) else {
            return;
        };

        match signal {
            ChannelSignal::Ready { origin } => state.dispatch_ready(&origin),
            ChannelSignal::Reply { origin, id, result } => {
                if !state.complete_from(&origin, &id, result) {
                    trace!("Discarding reply for unknown render {id}");
                }
            }
            ChannelSignal::Lost { origin, reason } => state.fail_origin(&origin, &reason),
        }
    }

    /// Fails submission `ticket` of `request_id` with [`TIMEOUT_MESSAGE`] if
    /// it is still waiting
    async fn expire(&self, request_id: &str, ticket: u64) {
        let mut state = self.state.lock().await;
        match state.outstanding.get_mut(request_id) {
            // this timer is the one running, nothing to abort
            Some(entry) if entry.ticket == ticket => entry.timer = None,
            _ => return,
        }
        state.complete(request_id, RenderResult::failure(TIMEOUT_MESSAGE));
        warn!("Render {request_id} timed out");
    }

    /// Releases every render context and fails everything still waiting
    pub async fn teardown(&self) {
        let mut state = self.state.lock().await;
        state.channel.teardown();
        state.pending.clear();

        let ids: Vec<String> = state.outstanding.keys().cloned().collect();
        if !ids.is_empty() {
            info!("Failing {} render(s) on teardown", ids.len());
        }
        for id in ids {
            state.complete(&id, RenderResult::failure(TEARDOWN_MESSAGE));
        }
    }

    pub async fn channel_state(&self, target_key: &str) -> ChannelState {
        let address = &self.targets.resolve(target_key).address;
        self.state.lock().await.channel.state(address)
    }

    pub async fn outstanding_count(&self) -> usize {
        self.state.lock().await.outstanding.len()
    }

    pub async fn pending_count(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_outstanding(&self, request_id: &str) -> bool {
        self.state.lock().await.outstanding.contains_key(request_id)
    }
}

/// Completion of one submitted render
#[derive(Debug)]
pub struct PendingRender {
    request_id: String,
    receiver: oneshot::Receiver<RenderResult>,
}

impl PendingRender {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    /// Waits for the result. Resolves to a failure if the broker was dropped.
    pub async fn wait(self) -> RenderResult {
        self.receiver
            .await
            .unwrap_or_else(|_| RenderResult::failure("render broker dropped the request"))
    }

    /// Returns the result if it already arrived
    pub fn try_result(&mut self) -> Option<RenderResult> {
        self.receiver.try_recv().ok()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Render request `{0}` is already in flight")]
    DuplicateRequest(String),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Invalid broker configuration: {0}")]
    Config(String),
}
