//! Realtime quote subscriptions over one shared WebSocket.
//!
//! The manager owns a single connection and the set of symbols subscribed on
//! it. Opening the connection sends one auth frame; each new symbol sends
//! exactly one subscribe frame. Inbound frames are JSON arrays of events
//! discriminated by `ev`: quotes and trades go to the registered handler,
//! status notices are logged, everything else is ignored.
//!
//! State machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticated -> Subscribed
//!       ^______________|______________|_____________|
//!                 failure / remote close / disconnect()
//! ```
//!
//! A connection that drops after being established is not reopened here.
//! The subscription set is cleared and the caller decides whether to call
//! [`RealtimeSubscriptionManager::connect`] again.

use crate::backoff::ReconnectPolicy;
use crate::error::MarketDataError;
use crate::types::{MarketTick, RealtimeEvent};
use crate::MarketDataResult;
use async_trait::async_trait;
use config::{ProviderConfig, RealtimeConfig};
use futures::stream::{BoxStream, SplitSink, StreamExt};
use futures::SinkExt;
use observability::RealtimeMetrics;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Callback receiving every quote and trade, in arrival order.
pub type TickHandler = Arc<dyn Fn(MarketTick) + Send + Sync>;

/// Inbound text frames. Transport errors end the connection.
pub type FrameStream = BoxStream<'static, MarketDataResult<String>>;

/// Write half of a realtime connection.
#[async_trait]
pub trait FrameSink: Send {
    async fn send_text(&mut self, text: String) -> MarketDataResult<()>;
    async fn close(&mut self) -> MarketDataResult<()>;
}

/// Opens realtime connections.
#[async_trait]
pub trait RealtimeConnector: Send + Sync {
    async fn connect(&self, url: &str) -> MarketDataResult<(Box<dyn FrameSink>, FrameStream)>;
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct WsSink(SplitSink<WsStream, Message>);

#[async_trait]
impl FrameSink for WsSink {
    async fn send_text(&mut self, text: String) -> MarketDataResult<()> {
        self.0.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn close(&mut self) -> MarketDataResult<()> {
        self.0.close().await?;
        Ok(())
    }
}

/// WebSocket connector backed by tokio-tungstenite.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

#[async_trait]
impl RealtimeConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> MarketDataResult<(Box<dyn FrameSink>, FrameStream)> {
        let (ws, response) = connect_async(url).await?;
        debug!(status = %response.status(), "WebSocket handshake complete");

        let (write, read) = ws.split();
        let frames = read
            .filter_map(|message| async move {
                match message {
                    Ok(Message::Text(text)) => Some(Ok(text)),
                    Ok(Message::Binary(bytes)) => Some(
                        String::from_utf8(bytes)
                            .map_err(|e| MarketDataError::Decode(e.to_string())),
                    ),
                    // Pings are answered by tungstenite; close ends the stream.
                    Ok(_) => None,
                    Err(e) => Some(Err(MarketDataError::from(e))),
                }
            })
            .boxed();

        Ok((Box::new(WsSink(write)), frames))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Socket open and auth frame sent.
    Authenticated,
    /// At least one symbol subscribed.
    Subscribed,
}

#[derive(Serialize)]
struct ControlFrame<'a> {
    action: &'a str,
    params: &'a str,
}

fn control_frame(action: &str, params: &str) -> MarketDataResult<String> {
    Ok(serde_json::to_string(&ControlFrame { action, params })?)
}

/// One inbound frame decoded event by event.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedFrame {
    pub events: Vec<RealtimeEvent>,
    /// Elements that failed to decode and were skipped.
    pub rejected: usize,
}

/// Parse one inbound frame. Frames are always JSON arrays; each element is
/// decoded separately so a bad event does not take its neighbours with it.
pub fn parse_frame(text: &str) -> MarketDataResult<ParsedFrame> {
    let raw: Vec<serde_json::Value> = serde_json::from_str(text)?;

    let mut frame = ParsedFrame {
        events: Vec::with_capacity(raw.len()),
        rejected: 0,
    };
    for value in raw {
        match serde_json::from_value::<RealtimeEvent>(value) {
            Ok(event) => frame.events.push(event),
            Err(e) => {
                debug!(error = %e, "Skipping malformed realtime event");
                frame.rejected += 1;
            }
        }
    }
    Ok(frame)
}

struct Connection {
    state: ConnectionState,
    sink: Option<Box<dyn FrameSink>>,
    subscriptions: HashSet<String>,
    reader: Option<JoinHandle<()>>,
    cancel: Option<CancellationToken>,
    /// Bumped per connection so a stale reader never resets a newer one.
    generation: u64,
}

impl Connection {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            sink: None,
            subscriptions: HashSet::new(),
            reader: None,
            cancel: None,
            generation: 0,
        }
    }

    fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.sink = None;
        self.subscriptions.clear();
        self.reader = None;
        self.cancel = None;
    }
}

pub struct RealtimeSubscriptionManager {
    url: String,
    api_key: String,
    event_prefix: String,
    connector: Arc<dyn RealtimeConnector>,
    connection: Arc<Mutex<Connection>>,
    handler: Arc<RwLock<Option<TickHandler>>>,
    metrics: RealtimeMetrics,
}

impl RealtimeSubscriptionManager {
    pub fn new(
        connector: Arc<dyn RealtimeConnector>,
        url: impl Into<String>,
        api_key: impl Into<String>,
        event_prefix: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            event_prefix: event_prefix.into(),
            connector,
            connection: Arc::new(Mutex::new(Connection::new())),
            handler: Arc::new(RwLock::new(None)),
            metrics: RealtimeMetrics::new(),
        }
    }

    /// Manager over a real WebSocket. Requires a usable API key.
    pub fn from_config(provider: &ProviderConfig, realtime: &RealtimeConfig) -> MarketDataResult<Self> {
        let api_key = provider.usable_api_key().ok_or_else(|| {
            MarketDataError::Provider(format!(
                "realtime feed unavailable: {}",
                provider.configuration_status()
            ))
        })?;

        Ok(Self::new(
            Arc::new(TungsteniteConnector),
            provider.ws_url.clone(),
            api_key,
            realtime.event_prefix.clone(),
        ))
    }

    pub async fn state(&self) -> ConnectionState {
        self.connection.lock().await.state
    }

    /// Currently subscribed symbols, sorted.
    pub async fn subscriptions(&self) -> Vec<String> {
        let connection = self.connection.lock().await;
        let mut symbols: Vec<String> = connection.subscriptions.iter().cloned().collect();
        symbols.sort();
        symbols
    }

    /// Open the connection if needed and subscribe `symbols`.
    ///
    /// When a connection is already open the handshake is skipped and only
    /// symbols not yet subscribed are sent. `on_message` replaces any
    /// previously registered handler. Returns the newly subscribed symbols.
    pub async fn connect(&self, symbols: &[String], on_message: TickHandler) -> MarketDataResult<Vec<String>> {
        *self.handler.write() = Some(on_message);

        let mut connection = self.connection.lock().await;
        if connection.sink.is_none() {
            self.open(&mut connection).await?;
        } else {
            debug!("Realtime connection already open, skipping handshake");
        }

        self.subscribe_on(&mut connection, symbols).await
    }

    /// [`connect`](Self::connect) with jittered backoff between failed attempts.
    pub async fn connect_with_retry(
        &self,
        symbols: &[String],
        on_message: TickHandler,
        policy: &ReconnectPolicy,
    ) -> MarketDataResult<Vec<String>> {
        policy
            .retry_async(move |_| self.connect(symbols, on_message.clone()))
            .await
    }

    /// Subscribe additional symbols on the open connection.
    pub async fn subscribe(&self, symbols: &[String]) -> MarketDataResult<Vec<String>> {
        let mut connection = self.connection.lock().await;
        self.subscribe_on(&mut connection, symbols).await
    }

    /// Close the connection. The subscription set is always cleared.
    pub async fn disconnect(&self) {
        let mut connection = self.connection.lock().await;

        if let Some(cancel) = connection.cancel.take() {
            cancel.cancel();
        }
        if let Some(mut sink) = connection.sink.take() {
            if let Err(e) = sink.close().await {
                debug!(error = %e, "Close frame not delivered");
            }
        }
        if let Some(reader) = connection.reader.take() {
            reader.abort();
        }

        let dropped = connection.subscriptions.len();
        connection.reset();
        connection.generation += 1;
        self.metrics.set_subscriptions(0);

        info!(dropped, "Realtime connection closed");
    }

    async fn open(&self, connection: &mut Connection) -> MarketDataResult<()> {
        connection.state = ConnectionState::Connecting;

        let (mut sink, frames) = match self.connector.connect(&self.url).await {
            Ok(pair) => pair,
            Err(e) => {
                connection.state = ConnectionState::Disconnected;
                return Err(e);
            }
        };

        let auth = control_frame("auth", &self.api_key)?;
        if let Err(e) = sink.send_text(auth).await {
            connection.state = ConnectionState::Disconnected;
            let _ = sink.close().await;
            return Err(MarketDataError::Subscription(format!("auth frame not sent: {}", e)));
        }

        connection.generation += 1;
        let cancel = CancellationToken::new();
        let reader = tokio::spawn(read_loop(
            frames,
            self.handler.clone(),
            self.connection.clone(),
            cancel.clone(),
            connection.generation,
            self.metrics.clone(),
        ));

        connection.sink = Some(sink);
        connection.cancel = Some(cancel);
        connection.reader = Some(reader);
        connection.state = ConnectionState::Authenticated;

        info!(url = %self.url, "Realtime connection authenticated");
        Ok(())
    }

    async fn subscribe_on(
        &self,
        connection: &mut Connection,
        symbols: &[String],
    ) -> MarketDataResult<Vec<String>> {
        if connection.sink.is_none() {
            return Err(MarketDataError::NotConnected);
        }

        let mut added = Vec::new();
        for symbol in symbols {
            let symbol = symbol.trim().to_ascii_uppercase();
            if symbol.is_empty() || connection.subscriptions.contains(&symbol) {
                continue;
            }

            let frame = control_frame("subscribe", &format!("{}.{}.*", self.event_prefix, symbol))?;
            let sink = connection.sink.as_mut().ok_or(MarketDataError::NotConnected)?;
            sink.send_text(frame)
                .await
                .map_err(|e| MarketDataError::Subscription(format!("{}: {}", symbol, e)))?;

            connection.subscriptions.insert(symbol.clone());
            added.push(symbol);
        }

        if !connection.subscriptions.is_empty() {
            connection.state = ConnectionState::Subscribed;
        }
        self.metrics.set_subscriptions(connection.subscriptions.len());

        if !added.is_empty() {
            info!(symbols = ?added, total = connection.subscriptions.len(), "Subscribed");
        }
        Ok(added)
    }
}

async fn read_loop(
    mut frames: FrameStream,
    handler: Arc<RwLock<Option<TickHandler>>>,
    connection: Arc<Mutex<Connection>>,
    cancel: CancellationToken,
    generation: u64,
    metrics: RealtimeMetrics,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return,
            frame = frames.next() => frame,
        };

        match frame {
            Some(Ok(text)) => {
                dispatch_frame(&text, &handler, &metrics);
            }
            Some(Err(e)) => {
                warn!(error = %e, "Realtime stream error");
                break;
            }
            None => {
                info!("Realtime stream closed by remote");
                break;
            }
        }
    }

    let mut connection = connection.lock().await;
    if connection.generation == generation {
        connection.reset();
        metrics.set_subscriptions(0);
    }
}

/// Deliver the ticks in one frame. Returns how many were delivered.
fn dispatch_frame(
    text: &str,
    handler: &RwLock<Option<TickHandler>>,
    metrics: &RealtimeMetrics,
) -> usize {
    let events = match parse_frame(text) {
        Ok(frame) => {
            if frame.rejected > 0 {
                warn!(rejected = frame.rejected, kept = frame.events.len(), "Dropped malformed realtime events");
                metrics.record_dropped_events(frame.rejected);
            }
            frame.events
        }
        Err(e) => {
            warn!(error = %e, "Dropping malformed realtime frame");
            metrics.record_dropped_frame();
            return 0;
        }
    };

    let handler = handler.read().clone();
    let mut delivered = 0;

    for event in events {
        match event {
            RealtimeEvent::Status(status) => {
                if status.status.contains("fail") || status.status == "error" {
                    warn!(status = %status.status, message = %status.message, "Realtime status");
                } else {
                    debug!(status = %status.status, message = %status.message, "Realtime status");
                }
            }
            RealtimeEvent::Other => {}
            event => {
                if let Some(tick) = event.into_tick() {
                    metrics.record_event(tick.kind());
                    if let Some(handler) = &handler {
                        handler(tick);
                        delivered += 1;
                    }
                }
            }
        }
    }

    delivered
}
