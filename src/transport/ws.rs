//! WebSocket signaling transport.
//!
//! One writer task drains an outbound queue into the socket; one reader
//! task parses inbound frames, answers request/response correlation, and
//! queues data messages in delivery order.

use crate::config::SignalingConfig;
use crate::errors::CallError;
use crate::signaling::message::{parse_ice_servers, SignalMessage, SignalRequest};
use crate::transport::SignalingTransport;
use crate::types::IceServerInfo;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use url::Url;

#[derive(Serialize)]
struct RelayRequest<'a> {
    request: bool,
    id: u64,
    #[serde(rename = "type")]
    kind: &'a str,
    message: serde_json::Value,
}

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<serde_json::Value, CallError>>>>>;

/// Production transport: a WebSocket connection to the relay, identified
/// by room/peer/name query parameters.
pub struct WsTransport {
    outbound_tx: mpsc::UnboundedSender<Message>,
    inbound_rx: AsyncMutex<mpsc::UnboundedReceiver<SignalMessage>>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    request_timeout: Duration,
    open: Arc<AtomicBool>,
}

impl WsTransport {
    /// Connect to the relay. Fails if the endpoint URL is invalid or the
    /// socket handshake fails; never retried here.
    pub async fn connect(
        config: &SignalingConfig,
        session_id: &str,
        peer_id: &str,
        display_name: &str,
    ) -> Result<Self, CallError> {
        let mut url = derive_ws_url(&config.endpoint)?;
        url.query_pairs_mut()
            .append_pair("roomId", session_id)
            .append_pair("peerId", peer_id)
            .append_pair("peerName", display_name);

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| CallError::transport(format!("websocket connect failed: {}", e)))?;
        log::info!("signaling websocket connected: {}", url);

        let (mut ws_write, mut ws_read) = ws_stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel::<SignalMessage>();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let open = Arc::new(AtomicBool::new(true));

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if ws_write.send(message).await.is_err() {
                    break;
                }
                if closing {
                    break;
                }
            }
            log::debug!("signaling writer task ended");
        });

        let reader_pending = Arc::clone(&pending);
        let reader_open = Arc::clone(&open);
        tokio::spawn(async move {
            while let Some(frame) = ws_read.next().await {
                match frame {
                    Ok(Message::Text(text)) => {
                        route_frame(text.as_str(), &inbound_tx, &reader_pending);
                    }
                    Ok(Message::Close(_)) => {
                        log::info!("signaling relay closed the connection");
                        break;
                    }
                    Ok(Message::Ping(_)) | Ok(Message::Pong(_)) | Ok(Message::Frame(_)) => {}
                    Ok(Message::Binary(_)) => {
                        log::debug!("ignoring binary signaling frame");
                    }
                    Err(e) => {
                        log::warn!("signaling read error: {}", e);
                        break;
                    }
                }
            }
            reader_open.store(false, Ordering::SeqCst);
            // Fail whatever is still waiting for a response
            reader_pending.lock().expect("lock poisoned").clear();
            log::debug!("signaling reader task ended");
        });

        Ok(Self {
            outbound_tx,
            inbound_rx: AsyncMutex::new(inbound_rx),
            pending,
            next_request_id: AtomicU64::new(1),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            open,
        })
    }

    fn send_text(&self, text: String) -> Result<(), CallError> {
        if !self.is_open() {
            return Err(CallError::transport("transport is closed"));
        }
        self.outbound_tx
            .send(Message::Text(text.into()))
            .map_err(|_| CallError::transport("transport is closed"))
    }
}

#[async_trait]
impl SignalingTransport for WsTransport {
    async fn send(&self, message: &SignalMessage) -> Result<(), CallError> {
        let text = serde_json::to_string(message)
            .map_err(|e| CallError::transport(format!("failed to encode {}: {}", message.kind(), e)))?;
        log::debug!("sending {} message", message.kind());
        self.send_text(text)
    }

    async fn request_ice_servers(&self) -> Result<Vec<IceServerInfo>, CallError> {
        let request = SignalRequest::FetchIceServers;
        let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .expect("lock poisoned")
            .insert(id, tx);

        let frame = RelayRequest {
            request: true,
            id,
            kind: request.kind(),
            message: request.payload(),
        };
        let text = serde_json::to_string(&frame)
            .map_err(|e| CallError::transport(format!("failed to encode request: {}", e)))?;
        if let Err(e) = self.send_text(text) {
            self.pending.lock().expect("lock poisoned").remove(&id);
            return Err(e);
        }

        let data = match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result?,
            Ok(Err(_)) => return Err(CallError::transport("transport closed during request")),
            Err(_) => {
                self.pending.lock().expect("lock poisoned").remove(&id);
                return Err(CallError::transport(format!(
                    "request timed out: {}",
                    request.kind()
                )));
            }
        };
        parse_ice_servers(&data)
    }

    async fn recv(&self) -> Option<SignalMessage> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn close(&self) {
        if self.open.swap(false, Ordering::SeqCst) {
            log::info!("closing signaling transport");
            let _ = self.outbound_tx.send(Message::Close(None));
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// Route one inbound frame: correlate responses to pending requests,
/// queue everything else as a data message.
fn route_frame(
    text: &str,
    inbound_tx: &mpsc::UnboundedSender<SignalMessage>,
    pending: &PendingMap,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(e) => {
            log::warn!("discarding unparseable signaling frame: {}", e);
            return;
        }
    };

    if value.get("response").and_then(|v| v.as_bool()).unwrap_or(false) {
        let Some(id) = value.get("id").and_then(|v| v.as_u64()) else {
            log::warn!("discarding response frame without id");
            return;
        };
        let Some(tx) = pending.lock().expect("lock poisoned").remove(&id) else {
            log::warn!("discarding response for unknown request {}", id);
            return;
        };
        let ok = value.get("ok").and_then(|v| v.as_bool()).unwrap_or(true);
        let result = if ok {
            Ok(value.get("data").cloned().unwrap_or(serde_json::Value::Null))
        } else {
            let reason = value
                .get("errorReason")
                .and_then(|v| v.as_str())
                .unwrap_or("request rejected by relay");
            Err(CallError::server(reason))
        };
        let _ = tx.send(result);
        return;
    }

    match serde_json::from_value::<SignalMessage>(value) {
        Ok(message) => {
            log::debug!("received {} message", message.kind());
            let _ = inbound_tx.send(message);
        }
        Err(e) => {
            log::warn!("discarding malformed signaling frame: {}", e);
        }
    }
}

/// Map an http(s) endpoint to its ws(s) form; ws(s) passes through.
fn derive_ws_url(endpoint: &str) -> Result<Url, CallError> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| CallError::transport(format!("invalid relay endpoint: {}", e)))?;
    let mapped = match url.scheme() {
        "ws" | "wss" => None,
        "http" => Some("ws"),
        "https" => Some("wss"),
        other => {
            return Err(CallError::transport(format!(
                "unsupported relay scheme: {}",
                other
            )))
        }
    };
    if let Some(scheme) = mapped {
        url.set_scheme(scheme)
            .map_err(|_| CallError::transport("failed to derive websocket url"))?;
    }
    Ok(url)
}
