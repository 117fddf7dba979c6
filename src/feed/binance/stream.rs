//! Worker core shared by every Binance event stream.
//!
//! A [`Stream`] pairs a handle (start, close, wait until closed) with a
//! spawned worker task that owns the websocket connection. Failures before
//! the worker signals readiness are returned from [`Stream::start`]; failures
//! after readiness go through the stream's error sink exactly once. The
//! worker closes the websocket on every exit path, including cancellation.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::config::FeedConfig;
use crate::error::FeedError;
use crate::feed::binance::{depth, tick};
use crate::feed::{FeedData, FeedEvent};

/// Read inactivity after which a ping is sent to the server.
pub(crate) const HEARTBEAT: Duration = Duration::from_secs(60);

/// Sink invoked with every decoded event delivery.
pub(crate) type DataSink = Box<dyn Fn(FeedData) + Send + Sync>;

/// Sink invoked at most once, with the fatal error of a ready stream.
pub(crate) type ErrorSink = Box<dyn Fn(FeedError) + Send + Sync>;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Parse a wire decimal string.
///
/// # Errors
///
/// Will return a payload error naming `what` if the string is not a decimal.
pub(crate) fn parse_decimal(value: &str, what: &str) -> Result<Decimal, FeedError> {
    Decimal::from_str(value)
        .map_err(|_| FeedError::Payload(format!("invalid decimal {what}: {value}")))
}

/// An established websocket connection, split so the receive loop can answer
/// pings while a read is in flight.
pub(crate) struct WsConnection {
    write: SplitSink<WsStream, Message>,
    read: SplitStream<WsStream>,
}

impl WsConnection {
    /// Establish a connection to the stream server.
    ///
    /// # Errors
    ///
    /// Will return a connection error if the websocket handshake fails.
    pub(crate) async fn connect(url: &str) -> Result<Self, FeedError> {
        log::info!("connecting to <{url}>");

        let (ws, _) = connect_async(url).await.map_err(|err| {
            FeedError::Connection(format!("could not connect to websocket: {err}"))
        })?;
        let (write, read) = ws.split();

        Ok(Self { write, read })
    }

    /// Wait until a json frame is received from the server.
    ///
    /// Sends a ping once [`HEARTBEAT`] passes without traffic and reports the
    /// connection lost after twice that much silence.
    ///
    /// # Errors
    ///
    /// Will return a connection error if the transport fails, the peer
    /// closes, or the heartbeat goes unanswered, and a payload error if a
    /// frame is not valid json.
    pub(crate) async fn receive(&mut self) -> Result<serde_json::Value, FeedError> {
        let Self { write, read } = self;
        let mut ping = time::interval_at(Instant::now() + HEARTBEAT, HEARTBEAT);
        let deadline = time::sleep(HEARTBEAT * 2);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(err)) => return Err(FeedError::Connection(err.to_string())),
                        None => return Err(FeedError::Connection("connection closed".to_owned())),
                    };
                    // Any frame counts as liveness, a pong included.
                    deadline.as_mut().reset(Instant::now() + HEARTBEAT * 2);

                    match message {
                        Message::Text(text) => {
                            return serde_json::from_str(&text)
                                .map_err(|_| FeedError::Payload("received invalid json".to_owned()));
                        }
                        Message::Binary(data) => {
                            return serde_json::from_slice(&data)
                                .map_err(|_| FeedError::Payload("received invalid json".to_owned()));
                        }
                        Message::Close(_) => {
                            return Err(FeedError::Connection("connection closed".to_owned()));
                        }
                        Message::Ping(payload) => {
                            write
                                .send(Message::Pong(payload))
                                .await
                                .map_err(|err| FeedError::Connection(err.to_string()))?;
                        }
                        Message::Pong(_) | Message::Frame(_) => {}
                    }
                }
                _ = ping.tick() => {
                    write
                        .send(Message::Ping(Vec::new()))
                        .await
                        .map_err(|err| FeedError::Connection(err.to_string()))?;
                }
                _ = &mut deadline => {
                    return Err(FeedError::Connection("heartbeat lost".to_owned()));
                }
            }
        }
    }

    /// Close the connection, notifying the peer.
    pub(crate) async fn close(mut self) {
        if let Err(err) = self.write.close().await {
            log::warn!("error closing websocket: {err}");
        }
    }
}

/// State shared between a stream handle and its worker task.
pub(crate) struct Stream {
    /// Market symbol of the subscription.
    pub(crate) symbol: String,
    /// Event stream of the subscription; also selects the worker body.
    pub(crate) event: FeedEvent,
    /// HTTP session, shared with the owning feed.
    pub(crate) session: reqwest::Client,
    /// REST base URL, without a trailing slash.
    pub(crate) rest_url: String,
    /// Sink for decoded events.
    pub(crate) on_data: DataSink,
    /// Sink for fatal post-readiness errors.
    pub(crate) on_error: ErrorSink,
    ws_url: String,
    cancel: CancellationToken,
    done: CancellationToken,
    startup_error: Mutex<Option<FeedError>>,
}

impl Stream {
    pub(crate) fn new(
        symbol: &str,
        event: FeedEvent,
        config: &FeedConfig,
        session: reqwest::Client,
        on_data: DataSink,
        on_error: ErrorSink,
    ) -> Arc<Self> {
        let name = match event {
            FeedEvent::Tick => format!("{symbol}@trade"),
            FeedEvent::OrderBook => format!("{symbol}@depth"),
        };

        Arc::new(Self {
            symbol: symbol.to_owned(),
            event,
            session,
            rest_url: config.rest_url.as_str().trim_end_matches('/').to_owned(),
            on_data,
            on_error,
            ws_url: format!(
                "{}/{name}",
                config.websocket_url.as_str().trim_end_matches('/')
            ),
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            startup_error: Mutex::new(None),
        })
    }

    /// Spawn the worker task and wait until it signals readiness.
    ///
    /// The readiness channel is armed before the worker is spawned, so the
    /// worker cannot become ready unobserved. If the returned future is
    /// dropped before it resolves, the worker is cancelled and tears the
    /// connection down on its own.
    ///
    /// # Errors
    ///
    /// Will return the worker's error if it exits before becoming ready.
    pub(crate) async fn start(self: &Arc<Self>) -> Result<(), FeedError> {
        let (ready_tx, ready_rx) = oneshot::channel();
        let worker = Arc::clone(self);
        tokio::spawn(async move {
            worker.run(ready_tx).await;
            worker.done.cancel();
        });

        let guard = StartGuard {
            stream: self.as_ref(),
            armed: true,
        };
        let result = match ready_rx.await {
            Ok(()) => Ok(()),
            // Sender dropped without firing: the worker exited during startup.
            Err(_) => {
                self.done.cancelled().await;
                Err(self
                    .startup_error
                    .lock()
                    .expect("startup error slot poisoned")
                    .take()
                    .unwrap_or_else(|| {
                        FeedError::Connection("stream worker exited during startup".to_owned())
                    }))
            }
        };
        guard.disarm();

        result
    }

    /// Signal the worker to stop. Idempotent.
    pub(crate) fn close(&self) {
        self.cancel.cancel();
    }

    /// Wait until the worker has exited and its connection is closed.
    pub(crate) async fn wait_closed(&self) {
        self.done.cancelled().await;
    }

    /// Resolves once [`Stream::close`] has been called.
    pub(crate) fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Record a startup failure for [`Stream::start`] to pick up.
    pub(crate) fn fail(&self, err: FeedError) {
        *self
            .startup_error
            .lock()
            .expect("startup error slot poisoned") = Some(err);
    }

    /// Worker task body.
    async fn run(&self, ready: oneshot::Sender<()>) {
        let mut ws = tokio::select! {
            _ = self.cancel.cancelled() => return,
            result = WsConnection::connect(&self.ws_url) => match result {
                Ok(ws) => ws,
                Err(err) => {
                    self.fail(err);
                    return;
                }
            },
        };

        match self.event {
            FeedEvent::Tick => tick::run(self, &mut ws, ready).await,
            FeedEvent::OrderBook => depth::run(self, &mut ws, ready).await,
        }

        ws.close().await;
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("symbol", &self.symbol)
            .field("event", &self.event)
            .field("url", &self.ws_url)
            .finish_non_exhaustive()
    }
}

/// Cancels the worker if a [`Stream::start`] future is dropped mid-startup.
struct StartGuard<'a> {
    stream: &'a Stream,
    armed: bool,
}

impl StartGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for StartGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.stream.close();
        }
    }
}
