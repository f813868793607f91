use crate::error::SignalingError;
use crate::signaling::{ChannelEvent, SignalingChannel};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use meshroom_core::{SignalMessage, encode};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// WebSocket relay connection with automatic reconnect. Outbound frames sent
/// while disconnected are queued and flushed in order once the socket is back.
#[derive(Clone)]
pub struct WsSignalingChannel {
    tx: mpsc::UnboundedSender<String>,
}

impl WsSignalingChannel {
    pub fn spawn(
        url: String,
        reconnect_delay: Duration,
    ) -> (Self, mpsc::Receiver<ChannelEvent>, JoinHandle<()>) {
        let (tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(256);

        let task = tokio::spawn(connection_loop(
            url,
            reconnect_delay,
            outbound_rx,
            inbound_tx,
        ));

        (Self { tx }, inbound_rx, task)
    }
}

#[async_trait]
impl SignalingChannel for WsSignalingChannel {
    async fn send(&self, msg: SignalMessage) -> Result<(), SignalingError> {
        let frame = encode(&msg)?;
        self.tx
            .send(frame)
            .map_err(|_| SignalingError::ChannelClosed)
    }
}

async fn connection_loop(
    url: String,
    reconnect_delay: Duration,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::Sender<ChannelEvent>,
) {
    let mut queue: VecDeque<String> = VecDeque::new();

    loop {
        info!("Connecting to relay {}", url);

        match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws_stream, _)) => {
                if inbound_tx.send(ChannelEvent::Connected).await.is_err() {
                    return;
                }
                let (mut write, mut read) = ws_stream.split();

                let mut healthy = true;
                while let Some(frame) = queue.pop_front() {
                    if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                        warn!("Failed to flush queued frame: {}", e);
                        queue.push_front(frame);
                        healthy = false;
                        break;
                    }
                }

                while healthy {
                    tokio::select! {
                        out = outbound_rx.recv() => match out {
                            Some(frame) => {
                                if let Err(e) = write.send(Message::Text(frame.clone().into())).await {
                                    warn!("Relay send failed: {}", e);
                                    queue.push_back(frame);
                                    healthy = false;
                                }
                            }
                            None => {
                                let _ = write.close().await;
                                info!("Signaling channel dropped, closing relay connection");
                                return;
                            }
                        },

                        inc = read.next() => match inc {
                            Some(Ok(Message::Text(text))) => {
                                debug!("Relay frame: {}", text.as_str());
                                let frame = ChannelEvent::Frame(text.to_string());
                                if inbound_tx.send(frame).await.is_err() {
                                    return;
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                info!("Relay closed the connection");
                                healthy = false;
                            }
                            Some(Err(e)) => {
                                warn!("Relay connection error: {}", e);
                                healthy = false;
                            }
                            Some(Ok(_)) => {}
                        },
                    }
                }

                if inbound_tx.send(ChannelEvent::Disconnected).await.is_err() {
                    return;
                }
            }
            Err(e) => error!("Failed to connect to relay {}: {}", url, e),
        }

        let sleep = tokio::time::sleep(reconnect_delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => break,
                out = outbound_rx.recv() => match out {
                    Some(frame) => queue.push_back(frame),
                    None => return,
                },
            }
        }
        debug!("Reconnecting with {} queued frames", queue.len());
    }
}
