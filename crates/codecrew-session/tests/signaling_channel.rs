//! Signaling channel behavior against a real in-process WebSocket
//! relay: reconnection policy, re-announce on reopen, malformed
//! payload handling, and the leave-before-close flush.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use codecrew_protocol::{ParticipantRole, SignalingMessage};
use codecrew_session::{ChannelConfig, ChannelState, SignalingChannel, SignalingEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

const BACKOFF: Duration = Duration::from_millis(100);

/// What the relay does with a connection after reading its first
/// message.
#[derive(Clone, Copy)]
enum RelayBehavior {
    /// Kill the first connection abnormally, keep later ones open.
    AbnormalCloseFirst,
    /// Close every connection with a normal close frame.
    NormalClose,
    /// Send one garbage frame, then a valid roster, then stay open.
    GarbageThenRoster,
    /// Echo inbound messages back to the test and stay open.
    Collect,
}

struct Relay {
    addr: SocketAddr,
    connections: Arc<AtomicUsize>,
    inbound: mpsc::UnboundedReceiver<SignalingMessage>,
}

async fn spawn_relay(behavior: RelayBehavior) -> Relay {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

    let counter = connections.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            let mut ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(_) => continue,
            };

            match behavior {
                RelayBehavior::GarbageThenRoster => {
                    let _ = ws.send(Message::Text("{not json".into())).await;
                    let roster = SignalingMessage::ParticipantsList {
                        participants: vec![],
                    };
                    let _ = ws
                        .send(Message::Text(serde_json::to_string(&roster).unwrap().into()))
                        .await;
                }
                _ => {}
            }

            let inbound_tx = inbound_tx.clone();
            while let Some(Ok(frame)) = ws.next().await {
                if let Message::Text(text) = frame {
                    if let Ok(message) = serde_json::from_str::<SignalingMessage>(&text) {
                        let _ = inbound_tx.send(message);
                    }
                    match behavior {
                        RelayBehavior::AbnormalCloseFirst if n == 1 => {
                            let _ = ws
                                .send(Message::Close(Some(CloseFrame {
                                    code: CloseCode::Error,
                                    reason: "relay restarting".into(),
                                })))
                                .await;
                            break;
                        }
                        RelayBehavior::NormalClose => {
                            let _ = ws
                                .send(Message::Close(Some(CloseFrame {
                                    code: CloseCode::Normal,
                                    reason: "session over".into(),
                                })))
                                .await;
                            break;
                        }
                        _ => {}
                    }
                }
            }
        }
    });

    Relay {
        addr,
        connections,
        inbound: inbound_rx,
    }
}

fn config(addr: SocketAddr) -> ChannelConfig {
    ChannelConfig {
        url: format!("ws://{addr}"),
        reconnect_backoff: BACKOFF,
    }
}

fn join(user: u128) -> SignalingMessage {
    SignalingMessage::Join {
        session_id: Uuid::from_u128(99),
        user_id: Uuid::from_u128(user),
        user_name: format!("user-{user}"),
        role: ParticipantRole::Attendee,
    }
}

/// Announce on every `Open`, the way the session runner does.
fn announce_on_open(
    channel: &SignalingChannel,
    mut events: mpsc::UnboundedReceiver<SignalingEvent>,
) -> mpsc::UnboundedReceiver<ChannelState> {
    let sender = channel.sender();
    let (state_tx, state_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let SignalingEvent::State(state) = event {
                if state == ChannelState::Open {
                    sender.send(join(7));
                }
                let _ = state_tx.send(state);
            }
        }
    });
    state_rx
}

async fn expect_state(rx: &mut mpsc::UnboundedReceiver<ChannelState>, expected: ChannelState) {
    let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for channel state")
        .expect("channel event stream ended");
    assert_eq!(state, expected);
}

#[tokio::test]
async fn abnormal_close_schedules_one_reconnect_and_reannounces() {
    let mut relay = spawn_relay(RelayBehavior::AbnormalCloseFirst).await;
    let (channel, events) = SignalingChannel::connect(config(relay.addr));
    let mut states = announce_on_open(&channel, events);

    expect_state(&mut states, ChannelState::Connecting).await;
    expect_state(&mut states, ChannelState::Open).await;
    // First join, then the relay kills the connection.
    assert!(relay.inbound.recv().await.is_some());
    expect_state(&mut states, ChannelState::Closed).await;

    // One scheduled attempt after the fixed backoff, with a fresh
    // announce on the new connection.
    expect_state(&mut states, ChannelState::Connecting).await;
    expect_state(&mut states, ChannelState::Open).await;
    let reannounce = tokio::time::timeout(Duration::from_secs(5), relay.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(reannounce, SignalingMessage::Join { .. }));

    // The second connection is healthy: no further attempts pile up.
    tokio::time::sleep(BACKOFF * 3).await;
    assert_eq!(relay.connections.load(Ordering::SeqCst), 2);
    channel.close();
}

#[tokio::test]
async fn normal_close_does_not_reconnect() {
    let relay = spawn_relay(RelayBehavior::NormalClose).await;
    let (channel, events) = SignalingChannel::connect(config(relay.addr));
    let mut states = announce_on_open(&channel, events);

    expect_state(&mut states, ChannelState::Connecting).await;
    expect_state(&mut states, ChannelState::Open).await;
    expect_state(&mut states, ChannelState::Closed).await;

    tokio::time::sleep(BACKOFF * 3).await;
    assert_eq!(relay.connections.load(Ordering::SeqCst), 1);
    assert!(!channel.is_open());
}

#[tokio::test]
async fn malformed_payload_is_dropped_without_breaking_the_stream() {
    let relay = spawn_relay(RelayBehavior::GarbageThenRoster).await;
    let (channel, mut events) = SignalingChannel::connect(config(relay.addr));

    // The garbage frame arrives first; the next decoded message must
    // still come through.
    let message = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let SignalingEvent::Message(message) = event {
                return message;
            }
        }
        panic!("event stream ended before a message arrived");
    })
    .await
    .unwrap();
    assert!(matches!(
        message,
        SignalingMessage::ParticipantsList { .. }
    ));
    channel.close();
}

#[tokio::test]
async fn explicit_close_flushes_queued_leave_first() {
    let mut relay = spawn_relay(RelayBehavior::Collect).await;
    let (channel, events) = SignalingChannel::connect(config(relay.addr));
    let mut states = announce_on_open(&channel, events);

    expect_state(&mut states, ChannelState::Connecting).await;
    expect_state(&mut states, ChannelState::Open).await;
    assert!(relay.inbound.recv().await.is_some());

    channel.sender().send(SignalingMessage::Leave {
        user_id: Uuid::from_u128(7),
    });
    channel.close();

    let last = tokio::time::timeout(Duration::from_secs(5), relay.inbound.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        last,
        SignalingMessage::Leave {
            user_id: Uuid::from_u128(7)
        }
    );
    expect_state(&mut states, ChannelState::Closed).await;
    tokio::time::sleep(BACKOFF * 2).await;
    assert_eq!(relay.connections.load(Ordering::SeqCst), 1);
}
