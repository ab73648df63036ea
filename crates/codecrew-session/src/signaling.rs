//! WebSocket signaling channel to the session relay.
//!
//! One bidirectional message-oriented connection per session. A
//! supervisor task owns the socket: it forwards decoded inbound
//! messages and state changes to the session, drains the outbound
//! queue, and schedules one reconnection attempt after a fixed
//! backoff whenever the connection dies without an explicit close.
//!
//! Every reconnect is a *new* logical connection: the relay keeps no
//! session affinity, so the session re-announces itself with a fresh
//! `join` on every `Open`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codecrew_protocol::SignalingMessage;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{
    connect_async,
    tungstenite::protocol::frame::coding::CloseCode,
    tungstenite::Message,
};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Connecting,
    Open,
    Closed,
}

/// What the channel delivers to the session's event queue.
#[derive(Debug)]
pub enum SignalingEvent {
    Message(SignalingMessage),
    State(ChannelState),
}

#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub url: String,
    pub reconnect_backoff: Duration,
}

impl ChannelConfig {
    /// Relay endpoint for one session, bearer credential in the URI.
    pub fn for_session(base_url: &str, session_id: Uuid, token: &str) -> Self {
        Self {
            url: format!("{base_url}/ws/session/{session_id}?token={token}"),
            reconnect_backoff: Duration::from_secs(3),
        }
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.reconnect_backoff = backoff;
        self
    }
}

/// Cloneable outbound handle. Sends while the channel is not open are
/// logged no-ops; callers that need delivery check `is_open` first.
#[derive(Clone)]
pub struct SignalingSender {
    tx: mpsc::UnboundedSender<SignalingMessage>,
    open: Arc<AtomicBool>,
}

impl SignalingSender {
    pub fn new(tx: mpsc::UnboundedSender<SignalingMessage>, open: Arc<AtomicBool>) -> Self {
        Self { tx, open }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn send(&self, message: SignalingMessage) {
        if !self.is_open() {
            tracing::warn!("dropping outbound signaling message: channel not open");
            return;
        }
        if self.tx.send(message).is_err() {
            tracing::warn!("dropping outbound signaling message: channel task gone");
        }
    }
}

pub struct SignalingChannel {
    sender: SignalingSender,
    shutdown: watch::Sender<bool>,
}

impl SignalingChannel {
    /// Spawn the supervisor task and return the channel handle plus
    /// the inbound event stream.
    pub fn connect(config: ChannelConfig) -> (Self, mpsc::UnboundedReceiver<SignalingEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let open = Arc::new(AtomicBool::new(false));

        let sender = SignalingSender::new(out_tx, open.clone());
        tokio::spawn(supervise(config, open, out_rx, event_tx, shutdown_rx));

        (
            Self {
                sender,
                shutdown: shutdown_tx,
            },
            event_rx,
        )
    }

    pub fn sender(&self) -> SignalingSender {
        self.sender.clone()
    }

    pub fn is_open(&self) -> bool {
        self.sender.is_open()
    }

    /// Explicitly close the channel. No reconnection is scheduled;
    /// queued outbound messages are flushed before the close frame.
    pub fn close(&self) {
        let _ = self.shutdown.send(true);
    }
}

async fn supervise(
    config: ChannelConfig,
    open: Arc<AtomicBool>,
    mut out_rx: mpsc::UnboundedReceiver<SignalingMessage>,
    event_tx: mpsc::UnboundedSender<SignalingEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        let _ = event_tx.send(SignalingEvent::State(ChannelState::Connecting));

        let ws = match connect_async(config.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                tracing::warn!("signaling connect failed: {e}");
                let _ = event_tx.send(SignalingEvent::State(ChannelState::Closed));
                tokio::time::sleep(config.reconnect_backoff).await;
                continue;
            }
        };

        tracing::info!("signaling channel open");
        open.store(true, Ordering::SeqCst);
        let _ = event_tx.send(SignalingEvent::State(ChannelState::Open));

        let (mut sink, mut stream) = ws.split();
        let mut reconnect = true;

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    // Flush what the session queued (its leave
                    // announcement) before saying goodbye.
                    while let Ok(message) = out_rx.try_recv() {
                        if let Ok(json) = serde_json::to_string(&message) {
                            let _ = sink.send(Message::Text(json.into())).await;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    reconnect = false;
                    break;
                }
                outbound = out_rx.recv() => {
                    let Some(message) = outbound else {
                        reconnect = false;
                        break;
                    };
                    let json = match serde_json::to_string(&message) {
                        Ok(json) => json,
                        Err(e) => {
                            tracing::error!("failed to serialize signaling message: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(json.into())).await {
                        tracing::warn!("signaling send failed: {e}");
                        break;
                    }
                }
                inbound = stream.next() => {
                    match inbound {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<SignalingMessage>(&text) {
                                Ok(message) => {
                                    let _ = event_tx.send(SignalingEvent::Message(message));
                                }
                                // Malformed payloads never crash the
                                // channel; drop and log.
                                Err(e) => tracing::warn!("dropping malformed signaling payload: {e}"),
                            }
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let normal = frame
                                .as_ref()
                                .map(|f| f.code == CloseCode::Normal)
                                .unwrap_or(false);
                            tracing::info!(normal, "signaling channel closed by relay");
                            reconnect = !normal;
                            break;
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            tracing::warn!("signaling channel error: {e}");
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        open.store(false, Ordering::SeqCst);
        let _ = event_tx.send(SignalingEvent::State(ChannelState::Closed));

        if !reconnect || *shutdown_rx.borrow() {
            return;
        }
        tracing::info!(
            backoff_ms = config.reconnect_backoff.as_millis() as u64,
            "scheduling signaling reconnect"
        );
        tokio::time::sleep(config.reconnect_backoff).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_url_carries_token() {
        let id = Uuid::nil();
        let config = ChannelConfig::for_session("ws://relay.example.com", id, "secret");
        assert_eq!(
            config.url,
            format!("ws://relay.example.com/ws/session/{id}?token=secret")
        );
        assert_eq!(config.reconnect_backoff, Duration::from_secs(3));
    }

    #[tokio::test]
    async fn sends_on_closed_channel_are_dropped() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = SignalingSender::new(tx, Arc::new(AtomicBool::new(false)));
        sender.send(SignalingMessage::WhiteboardClear);
        assert!(rx.try_recv().is_err());
    }
}
