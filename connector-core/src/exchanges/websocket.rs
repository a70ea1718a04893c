//! Streaming subscription manager
//!
//! One background task owns the logical stream connection. It cycles through as many physical
//! connections as needed: every time one opens, the whole subscription set is announced again,
//! and every time one drops the task waits `reconnect_interval` and dials again until shutdown.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::interval_at;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};
use url::Url;

use super::binance_stream::{self, StreamEvent};
use super::errors::{ExchangeError, ExchangeResult};
use super::types::{Channel, Symbol};
use crate::strategy::Dispatcher;

/// Stream connection status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Open,
    Closed,
    Error,
    /// Shutdown was requested; the manager will not reconnect
    Stopped,
}

/// Stream health metrics
#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
    pub messages_received: u64,
    pub parse_errors: u64,
    pub connection_errors: u64,
    pub reconnections: u64,
    /// SUBSCRIBE requests the exchange rejected
    pub subscribe_errors: u64,
    pub last_message_time: Option<Instant>,
}

/// Stream manager configuration
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub url: String,
    /// Always subscribed on the book ticker channel
    pub default_symbol: Symbol,
    pub reconnect_interval: Duration,
    pub ping_interval: Duration,
    /// A connection silent for this long is considered dead
    pub message_timeout: Duration,
    pub event_buffer: usize,
    /// Largest SUBSCRIBE request the exchange reliably accepts
    pub max_subscribe_batch: usize,
}

impl StreamConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            default_symbol: Symbol::new("BTCUSDT"),
            reconnect_interval: Duration::from_secs(2),
            ping_interval: Duration::from_secs(180),
            message_timeout: Duration::from_secs(30),
            event_buffer: 1024,
            max_subscribe_batch: 200,
        }
    }
}

/// One physical stream connection
#[async_trait]
pub trait StreamConnection: Send {
    async fn send_text(&mut self, text: String) -> ExchangeResult<()>;

    async fn send_ping(&mut self) -> ExchangeResult<()>;

    /// Next text frame, or `None` once the peer closed the connection
    async fn next_text(&mut self) -> Option<ExchangeResult<String>>;

    async fn close(&mut self);
}

/// Opens stream connections
#[async_trait]
pub trait StreamTransport: Send + Sync {
    async fn connect(&self, url: &str) -> ExchangeResult<Box<dyn StreamConnection>>;
}

/// tokio-tungstenite transport
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteTransport;

#[async_trait]
impl StreamTransport for TungsteniteTransport {
    async fn connect(&self, url: &str) -> ExchangeResult<Box<dyn StreamConnection>> {
        let url = Url::parse(url)?;
        let (ws, _) = connect_async(url).await?;
        Ok(Box::new(TungsteniteConnection { ws }))
    }
}

struct TungsteniteConnection {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for TungsteniteConnection {
    async fn send_text(&mut self, text: String) -> ExchangeResult<()> {
        Ok(self.ws.send(Message::Text(text)).await?)
    }

    async fn send_ping(&mut self) -> ExchangeResult<()> {
        Ok(self.ws.send(Message::Ping(Vec::new())).await?)
    }

    async fn next_text(&mut self) -> Option<ExchangeResult<String>> {
        loop {
            match self.ws.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = self.ws.send(Message::Pong(payload)).await {
                        return Some(Err(e.into()));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!("Server closed stream: {:?}", frame);
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!("Error closing stream: {}", e);
        }
    }
}

/// What a `subscribe` call did
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeOutcome {
    /// Symbols that were not subscribed before
    pub added: Vec<Symbol>,
    /// Identifier of the SUBSCRIBE request, when one was written
    pub request_id: Option<u64>,
    /// The batch exceeds the exchange's subscription ceiling and will likely be rejected
    pub oversized: bool,
}

impl SubscribeOutcome {
    /// Every symbol was already subscribed; nothing went on the wire
    pub fn is_noop(&self) -> bool {
        self.added.is_empty()
    }
}

struct SubscriptionState {
    channels: BTreeMap<Channel, BTreeSet<Symbol>>,
    next_id: u64,
    /// Unanswered SUBSCRIBE requests on the live connection
    pending: BTreeMap<u64, (Channel, Vec<Symbol>)>,
    /// Frames for the live connection; `None` while disconnected
    outbound: Option<mpsc::UnboundedSender<String>>,
}

impl SubscriptionState {
    fn next_request_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    fn subscribe_frame(&mut self, channel: Channel, symbols: &[Symbol]) -> (u64, String) {
        let id = self.next_request_id();
        let params: Vec<String> = symbols.iter().map(|s| channel.stream_param(s.as_str())).collect();
        let frame = json!({"method": "SUBSCRIBE", "params": params, "id": id}).to_string();
        self.pending.insert(id, (channel, symbols.to_vec()));
        (id, frame)
    }
}

struct Shared {
    config: StreamConfig,
    transport: Arc<dyn StreamTransport>,
    dispatcher: Dispatcher,
    state: Mutex<SubscriptionState>,
    status: RwLock<ConnectionStatus>,
    metrics: RwLock<StreamMetrics>,
    events: broadcast::Sender<StreamEvent>,
}

enum SessionEnd {
    Dropped,
    Shutdown,
}

/// Owns the subscription set and the reconnecting stream task
pub struct StreamManager {
    shared: Arc<Shared>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamManager {
    pub fn new(config: StreamConfig, transport: Arc<dyn StreamTransport>, dispatcher: Dispatcher) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));
        let (shutdown, _) = watch::channel(false);

        Self {
            shared: Arc::new(Shared {
                config,
                transport,
                dispatcher,
                state: Mutex::new(SubscriptionState {
                    channels: BTreeMap::new(),
                    next_id: 1,
                    pending: BTreeMap::new(),
                    outbound: None,
                }),
                status: RwLock::new(ConnectionStatus::Closed),
                metrics: RwLock::new(StreamMetrics::default()),
                events,
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }

    /// Spawn the background stream task
    pub fn start(&self) -> ExchangeResult<()> {
        if *self.shutdown.borrow() {
            return Err(ExchangeError::Config("stream manager was stopped".to_string()));
        }

        let mut task = self.task.lock();
        if task.is_some() {
            warn!("Stream task already running");
            return Ok(());
        }

        let shared = self.shared.clone();
        let shutdown = self.shutdown.subscribe();
        *task = Some(tokio::spawn(async move { shared.run(shutdown).await }));
        Ok(())
    }

    /// Request shutdown and wait for the stream task to finish
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("Stream task ended abnormally: {}", e);
            }
        }
        self.shared.set_status(ConnectionStatus::Stopped);
    }

    /// Subscribe `symbols` on `channel`.
    ///
    /// Symbols already in the set are skipped. When connected, the new ones are announced in
    /// one request; otherwise they are announced as soon as the next connection opens.
    pub fn subscribe(&self, symbols: &[Symbol], channel: Channel) -> SubscribeOutcome {
        let max_batch = self.shared.config.max_subscribe_batch;
        let mut state = self.shared.state.lock();

        let set = state.channels.entry(channel).or_default();
        let added: Vec<Symbol> = symbols.iter().filter(|s| set.insert((*s).clone())).cloned().collect();

        if added.is_empty() {
            return SubscribeOutcome {
                added,
                request_id: None,
                oversized: false,
            };
        }

        let oversized = added.len() > max_batch;
        if oversized {
            warn!(
                "Subscribing to {} symbols on {} at once will most likely fail (limit {}); \
                 subscribe when a symbol is added to the watchlist or a strategy starts instead",
                added.len(),
                channel,
                max_batch
            );
        }

        let mut request_id = None;
        if state.outbound.is_some() {
            let (id, frame) = state.subscribe_frame(channel, &added);
            let sent = state
                .outbound
                .as_ref()
                .map(|tx| tx.send(frame).is_ok())
                .unwrap_or(false);
            if sent {
                info!("Subscribing to {} {} stream(s), request {}", added.len(), channel, id);
                request_id = Some(id);
            } else {
                state.pending.remove(&id);
            }
        } else {
            debug!("Not connected; {} {} subscription(s) deferred", added.len(), channel);
        }

        SubscribeOutcome {
            added,
            request_id,
            oversized,
        }
    }

    /// Symbols currently recorded on `channel`, ascending
    pub fn subscriptions(&self, channel: Channel) -> Vec<Symbol> {
        self.shared
            .state
            .lock()
            .channels
            .get(&channel)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, symbol: &str, channel: Channel) -> bool {
        self.shared
            .state
            .lock()
            .channels
            .get(&channel)
            .map_or(false, |set| set.contains(symbol))
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.read()
    }

    pub fn metrics(&self) -> StreamMetrics {
        self.shared.metrics.read().clone()
    }

    /// Observe every decoded stream event
    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events.subscribe()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

impl Shared {
    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut attempts: u64 = 0;

        while !*shutdown.borrow() {
            self.set_status(ConnectionStatus::Connecting);
            if attempts > 0 {
                self.metrics.write().reconnections += 1;
            }
            attempts += 1;

            let connected = tokio::select! {
                result = self.transport.connect(&self.config.url) => result,
                _ = stopped(&mut shutdown) => break,
            };

            match connected {
                Ok(connection) => {
                    if let SessionEnd::Shutdown = self.run_session(connection, &mut shutdown).await {
                        break;
                    }
                }
                Err(e) => {
                    error!("Stream connection to {} failed: {}", self.config.url, e);
                    self.metrics.write().connection_errors += 1;
                    self.set_status(ConnectionStatus::Error);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_interval) => {}
                _ = stopped(&mut shutdown) => break,
            }
        }

        self.state.lock().outbound = None;
        self.set_status(ConnectionStatus::Stopped);
        info!("Stream task stopped");
    }

    async fn run_session(
        &self,
        mut connection: Box<dyn StreamConnection>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let (tx, mut outbound) = mpsc::unbounded_channel();
        let resync = self.open_session(tx);

        info!("Stream connection opened, announcing {} subscription request(s)", resync.len());
        for frame in resync {
            if let Err(e) = connection.send_text(frame).await {
                error!("Stream resubscription failed: {}", e);
                return self.end_session(ConnectionStatus::Error, true);
            }
        }
        self.set_status(ConnectionStatus::Open);

        let period = self.config.ping_interval;
        let mut ping = interval_at(tokio::time::Instant::now() + period, period);
        let mut last_inbound = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = stopped(shutdown) => {
                    connection.close().await;
                    self.end_session(ConnectionStatus::Stopped, false);
                    return SessionEnd::Shutdown;
                }

                Some(frame) = outbound.recv() => {
                    if let Err(e) = connection.send_text(frame).await {
                        error!("Stream write failed: {}", e);
                        return self.end_session(ConnectionStatus::Error, true);
                    }
                }

                message = connection.next_text() => match message {
                    Some(Ok(text)) => {
                        last_inbound = tokio::time::Instant::now();
                        self.handle_text(&text);
                    }
                    Some(Err(e)) => {
                        error!("Stream connection error: {}", e);
                        return self.end_session(ConnectionStatus::Error, true);
                    }
                    None => {
                        warn!("Stream connection closed");
                        return self.end_session(ConnectionStatus::Closed, false);
                    }
                },

                _ = tokio::time::sleep_until(last_inbound + self.config.message_timeout) => {
                    warn!(
                        "No stream message for {:?}, dropping connection",
                        self.config.message_timeout
                    );
                    connection.close().await;
                    return self.end_session(ConnectionStatus::Error, true);
                }

                _ = ping.tick() => {
                    if let Err(e) = connection.send_ping().await {
                        error!("Stream ping failed: {}", e);
                        return self.end_session(ConnectionStatus::Error, true);
                    }
                }
            }
        }
    }

    /// Install the new outbound sender and build the frames re-announcing every subscription.
    ///
    /// Runs under the subscription lock so a concurrent `subscribe` is either part of the
    /// re-announcement or sent afterwards through the new sender, never both.
    fn open_session(&self, tx: mpsc::UnboundedSender<String>) -> Vec<String> {
        let max_batch = self.config.max_subscribe_batch.max(1);
        let mut state = self.state.lock();

        let default_symbol = self.config.default_symbol.clone();
        if state
            .channels
            .entry(Channel::BookTicker)
            .or_default()
            .insert(default_symbol.clone())
        {
            debug!("Adding default {} book ticker subscription", default_symbol);
        }

        state.pending.clear();
        let mut frames = Vec::new();
        for channel in Channel::ALL {
            let symbols: Vec<Symbol> = state
                .channels
                .get(&channel)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default();

            for chunk in symbols.chunks(max_batch) {
                let (_, frame) = state.subscribe_frame(channel, chunk);
                frames.push(frame);
            }
        }

        state.outbound = Some(tx);
        frames
    }

    fn end_session(&self, status: ConnectionStatus, failed: bool) -> SessionEnd {
        {
            let mut state = self.state.lock();
            state.outbound = None;
            state.pending.clear();
        }
        if failed {
            self.metrics.write().connection_errors += 1;
        }
        self.set_status(status);
        SessionEnd::Dropped
    }

    fn handle_text(&self, text: &str) {
        {
            let mut metrics = self.metrics.write();
            metrics.messages_received += 1;
            metrics.last_message_time = Some(Instant::now());
        }

        match binance_stream::decode(text) {
            Ok(Some(event)) => {
                self.settle_request(&event);
                self.dispatcher.dispatch(&event);
                if self.events.receiver_count() > 0 {
                    // Lagging observers only lose their own backlog
                    let _ = self.events.send(event);
                }
            }
            Ok(None) => {}
            Err(e) => {
                self.metrics.write().parse_errors += 1;
                warn!("Dropping malformed stream message: {}", e);
            }
        }
    }

    /// Match SUBSCRIBE replies to their requests. Symbols of a rejected request leave the set so a
    /// later `subscribe` asks for them again.
    fn settle_request(&self, event: &StreamEvent) {
        match event {
            StreamEvent::Ack { id } => {
                self.state.lock().pending.remove(id);
                debug!("Subscription request {} acknowledged", id);
            }
            StreamEvent::SubscribeError { id, code, message } => {
                self.metrics.write().subscribe_errors += 1;

                let mut state = self.state.lock();
                let rejected = state.pending.remove(id);
                let dropped = match rejected {
                    Some((channel, symbols)) => {
                        if let Some(set) = state.channels.get_mut(&channel) {
                            for symbol in &symbols {
                                set.remove(symbol);
                            }
                        }
                        symbols.len()
                    }
                    None => 0,
                };
                error!(
                    "Subscription request {} rejected ({}: {}), {} symbol(s) unsubscribed",
                    id, code, message, dropped
                );
            }
            _ => {}
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.write() = status;
    }
}

/// Resolves once shutdown is requested or the manager is gone
async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
