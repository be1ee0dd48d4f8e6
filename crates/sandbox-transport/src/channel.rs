//! Reconnecting client side of the connection channel.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use sandbox_core::{Envelope, EnvelopeKind};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

/// Reconnect attempts made after a lost connection before giving up.
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Default base for the linear reconnect backoff.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Channel error.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("connection lost after {MAX_RECONNECT_ATTEMPTS} reconnect attempts")]
    ConnectionLost,
}

/// Connection state exposed to consumers.
///
/// A UI can render ok / retrying / broken from these three fields alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelState {
    pub connected: bool,
    pub reconnecting: bool,
    pub error: Option<String>,
}

type Handler = Box<dyn FnMut(Envelope) + Send>;
type HandlerMap = Arc<Mutex<HashMap<EnvelopeKind, Handler>>>;
type OutboundSlot = Arc<Mutex<Option<mpsc::UnboundedSender<Envelope>>>>;

/// Client channel: typed subscribe, fire-and-forget send, bounded
/// reconnect.
///
/// The channel never buffers across a disconnect — envelopes sent while
/// disconnected are dropped with a warning, because resource state is
/// replayed by the registries after reconnect, not by queued messages.
pub struct Channel {
    url: String,
    base_delay: Duration,
    handlers: HandlerMap,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: OutboundSlot,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Create a channel for `url` with the default backoff base.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_base_delay(url, DEFAULT_BASE_DELAY)
    }

    /// Create a channel with an explicit backoff base (attempt N waits
    /// `base_delay * N`).
    #[must_use]
    pub fn with_base_delay(url: impl Into<String>, base_delay: Duration) -> Self {
        let (state, _) = watch::channel(ChannelState::default());
        Self {
            url: url.into(),
            base_delay,
            handlers: Arc::new(Mutex::new(HashMap::new())),
            state: Arc::new(state),
            outbound: Arc::new(Mutex::new(None)),
            task: Mutex::new(None),
        }
    }

    /// Register the handler for one envelope kind. Exactly one handler per
    /// kind; the last registration wins. Envelopes dispatch synchronously
    /// on the receive task, in the order received.
    pub fn on_message(&self, kind: EnvelopeKind, handler: impl FnMut(Envelope) + Send + 'static) {
        self.handlers.lock().unwrap().insert(kind, Box::new(handler));
    }

    /// Snapshot of the connection state.
    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Subscribe to connection state transitions.
    #[must_use]
    pub fn state_changes(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    /// Queue an envelope for delivery if connected; warn and drop
    /// otherwise. Callers needing guaranteed delivery must queue
    /// externally.
    pub fn send(&self, envelope: Envelope) {
        let outbound = self.outbound.lock().unwrap();
        match outbound.as_ref() {
            Some(tx) if self.state.borrow().connected => {
                let _ = tx.send(envelope);
            }
            _ => tracing::warn!("channel is not connected, dropping envelope"),
        }
    }

    /// Open the channel unless it is already running.
    pub fn connect(&self) {
        let mut task = self.task.lock().unwrap();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *task = Some(tokio::spawn(run(
            self.url.clone(),
            self.base_delay,
            Arc::clone(&self.handlers),
            Arc::clone(&self.state),
            Arc::clone(&self.outbound),
        )));
    }

    /// Tear the channel down deliberately, without entering the error
    /// state.
    pub fn close(&self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
        *self.outbound.lock().unwrap() = None;
        self.state.send_replace(ChannelState::default());
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(handle) = self.task.lock().unwrap().take() {
            handle.abort();
        }
    }
}

async fn run(
    url: String,
    base_delay: Duration,
    handlers: HandlerMap,
    state: Arc<watch::Sender<ChannelState>>,
    outbound: OutboundSlot,
) {
    let mut attempts: u32 = 0;
    loop {
        state.send_replace(ChannelState {
            connected: false,
            reconnecting: true,
            error: None,
        });

        match connect_async(url.as_str()).await {
            Ok((stream, _response)) => {
                attempts = 0;
                tracing::info!(%url, "channel connected");
                state.send_replace(ChannelState {
                    connected: true,
                    reconnecting: false,
                    error: None,
                });

                drive(stream, &handlers, &outbound).await;

                *outbound.lock().unwrap() = None;
                tracing::warn!(%url, "channel disconnected");
            }
            Err(err) => tracing::warn!(%url, %err, "channel connect failed"),
        }

        attempts += 1;
        if attempts > MAX_RECONNECT_ATTEMPTS {
            tracing::error!(%url, "reconnect attempts exhausted");
            state.send_replace(ChannelState {
                connected: false,
                reconnecting: false,
                error: Some(ChannelError::ConnectionLost.to_string()),
            });
            return;
        }
        tokio::time::sleep(base_delay * attempts).await;
    }
}

/// Pump one live connection until it drops: forward queued envelopes out,
/// dispatch incoming ones to the registered handlers.
async fn drive(
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    handlers: &HandlerMap,
    outbound: &OutboundSlot,
) {
    let (mut sink, mut source) = stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Envelope>();
    *outbound.lock().unwrap() = Some(tx);

    loop {
        tokio::select! {
            queued = rx.recv() => match queued {
                Some(envelope) => {
                    let json = match serde_json::to_string(&envelope) {
                        Ok(json) => json,
                        Err(err) => {
                            tracing::error!(%err, "failed to serialize envelope");
                            continue;
                        }
                    };
                    if sink.send(Message::Text(json.into())).await.is_err() {
                        break;
                    }
                }
                None => break,
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => dispatch(handlers, text.as_str()),
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    tracing::warn!(%err, "channel read error");
                    break;
                }
            },
        }
    }
}

fn dispatch(handlers: &HandlerMap, text: &str) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(err) => {
            tracing::warn!(%err, "malformed envelope dropped");
            return;
        }
    };
    match handlers.lock().unwrap().get_mut(&envelope.kind) {
        Some(handler) => handler(envelope),
        None => tracing::debug!(kind = ?envelope.kind, "no handler registered, envelope dropped"),
    }
}
