//! The relay transport seam (C4's upstream dependency). Connecting to real
//! relay websockets is out of scope; this module defines only the narrow
//! trait a relay-pool client would implement, plus the wire event shape the
//! router and endpoint agree on: a trait for the real network boundary,
//! a deterministic in-memory fake for tests.

use async_trait::async_trait;
use swm_api::ServicePubkey;
use tokio::sync::mpsc;

/// A single inbound wallet-request event, already filtered by kind but not
/// yet dispatched to a sub-wallet.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    /// The service pubkey this event is tagged as addressed to, if any.
    /// The router drops events with no recognized tag.
    pub recipient: Option<ServicePubkey>,
    /// Opaque NIP-44 ciphertext payload; the endpoint decrypts it.
    pub ciphertext: Vec<u8>,
    /// The requesting client's pubkey, needed to encrypt the response back.
    pub sender: swm_api::ClientPubkey,
}

/// An outbound response event ready to publish.
#[derive(Clone, Debug)]
pub struct OutboundEvent {
    pub recipient: swm_api::ClientPubkey,
    pub ciphertext: Vec<u8>,
}

/// The narrow seam between the router (C4) and a real relay-pool client. A
/// production implementation holds live websocket connections; for this
/// crate only the trait and a deterministic in-memory fake are in scope.
#[async_trait]
pub trait RelayTransport: Send + Sync + 'static {
    /// Replaces the active subscription filter with exactly this key set.
    /// Called once at startup and again every time the registry's active
    /// key set changes.
    async fn set_filter(&self, service_pubkeys: Vec<ServicePubkey>);

    /// Takes ownership of the inbound event stream. May only be called
    /// once; the router holds the receiver for its lifetime.
    fn take_inbound(&self) -> mpsc::Receiver<InboundEvent>;

    async fn publish(&self, event: OutboundEvent) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport is not connected to any relay")]
    Disconnected,
}

/// An in-memory fake transport for tests: `set_filter` just records the
/// latest call, `publish` appends to a log, and inbound events are injected
/// directly through [`MockRelayTransport::inject`].
pub struct MockRelayTransport {
    inbound_tx: mpsc::Sender<InboundEvent>,
    inbound_rx: std::sync::Mutex<Option<mpsc::Receiver<InboundEvent>>>,
    published: std::sync::Mutex<Vec<OutboundEvent>>,
    last_filter: std::sync::Mutex<Vec<ServicePubkey>>,
}

impl MockRelayTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        Self {
            inbound_tx,
            inbound_rx: std::sync::Mutex::new(Some(inbound_rx)),
            published: std::sync::Mutex::new(Vec::new()),
            last_filter: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Test-only: pushes an event as if it had arrived from a relay.
    pub async fn inject(&self, event: InboundEvent) {
        self.inbound_tx
            .send(event)
            .await
            .expect("inbound channel receiver dropped");
    }

    pub fn published(&self) -> Vec<OutboundEvent> {
        self.published.lock().unwrap().clone()
    }

    pub fn last_filter(&self) -> Vec<ServicePubkey> {
        self.last_filter.lock().unwrap().clone()
    }
}

impl Default for MockRelayTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayTransport for MockRelayTransport {
    async fn set_filter(&self, service_pubkeys: Vec<ServicePubkey>) {
        *self.last_filter.lock().unwrap() = service_pubkeys;
    }

    fn take_inbound(&self) -> mpsc::Receiver<InboundEvent> {
        self.inbound_rx
            .lock()
            .unwrap()
            .take()
            .expect("take_inbound called more than once")
    }

    async fn publish(&self, event: OutboundEvent) -> Result<(), TransportError> {
        self.published.lock().unwrap().push(event);
        Ok(())
    }
}
