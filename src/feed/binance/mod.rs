//! Tick and order book update feed for <https://www.binance.com/>.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FeedConfig;
use crate::data::FeedDescription;
use crate::error::FeedError;
use crate::feed::binance::stream::{DataSink, ErrorSink, Stream};
use crate::feed::{Feed, FeedData, FeedEvent, FeedMessage};
use crate::prelude::FeedMessageSender;

mod depth;
mod stream;
mod tick;

/// Streams are keyed by market symbol and event kind.
type StreamKey = (String, FeedEvent);

#[derive(Debug, Default)]
struct Registry {
    /// Live streams, at most one per key.
    streams: HashMap<StreamKey, Arc<Stream>>,
    /// Streams whose close has been requested but whose teardown has not yet
    /// completed; shutdown waits on these too.
    closing: Vec<Arc<Stream>>,
}

/// Provide ticks and order book updates from <https://www.binance.com/>.
///
/// Decoded events are delivered in wire order through the
/// [`FeedMessageSender`] handed to the constructor. A stream that fails after
/// becoming ready is removed from the feed and reported with a single
/// [`FeedMessage::Error`]; no reconnect is attempted.
#[derive(Debug)]
pub struct BinanceFeed {
    config: FeedConfig,
    /// HTTP session shared by every stream. Dropped on shutdown only when
    /// this feed created it.
    session: Arc<Mutex<Option<reqwest::Client>>>,
    own_session: bool,
    registry: Arc<Mutex<Registry>>,
    data_tx: FeedMessageSender,
    close_task: Mutex<Option<JoinHandle<()>>>,
    closed: CancellationToken,
}

impl BinanceFeed {
    /// Feed name, for use in feed descriptions.
    pub const NAME: &'static str = "binance";

    /// Create a feed against the production Binance endpoints, owning its
    /// HTTP session.
    #[must_use]
    pub fn new(data_tx: FeedMessageSender) -> Self {
        Self::with_config(FeedConfig::default(), data_tx, None)
    }

    /// Create a feed with explicit endpoints and, optionally, a shared HTTP
    /// session. A session passed in remains owned by the caller and is left
    /// open on shutdown.
    #[must_use]
    pub fn with_config(
        config: FeedConfig,
        data_tx: FeedMessageSender,
        session: Option<reqwest::Client>,
    ) -> Self {
        let (session, own_session) = match session {
            Some(session) => (session, false),
            None => (reqwest::Client::new(), true),
        };

        Self {
            config,
            session: Arc::new(Mutex::new(Some(session))),
            own_session,
            registry: Arc::new(Mutex::new(Registry::default())),
            data_tx,
            close_task: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// Constructor with the signature [`crate::feed::factory::Factory`]
    /// registers.
    #[must_use]
    pub fn from_description(
        _description: &FeedDescription,
        data_tx: FeedMessageSender,
    ) -> Box<dyn Feed> {
        Box::new(Self::new(data_tx))
    }

    fn data_sink(&self, symbol: &str, event: FeedEvent) -> DataSink {
        let data_tx = self.data_tx.clone();
        let symbol = symbol.to_owned();

        Box::new(move |data: FeedData| {
            let _ = data_tx.unbounded_send(FeedMessage::Data {
                symbol: symbol.clone(),
                event,
                data,
            });
        })
    }

    fn error_sink(&self, symbol: &str, event: FeedEvent) -> ErrorSink {
        let data_tx = self.data_tx.clone();
        let registry = Arc::clone(&self.registry);
        let symbol = symbol.to_owned();

        Box::new(move |error: FeedError| {
            log::error!("in binance worker for {symbol} [{event:?}]: {error}");

            // The stream has already exited; unregister it so shutdown does
            // not wait on it and the key becomes free again.
            registry
                .lock()
                .expect("registry lock poisoned")
                .streams
                .remove(&(symbol.clone(), event));

            let message = error.to_string();
            let _ = data_tx.unbounded_send(FeedMessage::Error {
                symbol: symbol.clone(),
                event,
                error,
                message,
                retry: 0,
            });
        })
    }
}

#[async_trait]
impl Feed for BinanceFeed {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn enable(&self, symbol: &str, event: FeedEvent) -> Result<(), FeedError> {
        assert!(
            self.close_task
                .lock()
                .expect("close task lock poisoned")
                .is_none(),
            "calling enable() after close() is a bug"
        );

        let session = self
            .session
            .lock()
            .expect("session lock poisoned")
            .clone()
            .expect("session is present while the feed is open");
        let stream = Stream::new(
            symbol,
            event,
            &self.config,
            session,
            self.data_sink(symbol, event),
            self.error_sink(symbol, event),
        );

        let key: StreamKey = (symbol.to_owned(), event);
        {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            assert!(
                !registry.streams.contains_key(&key),
                "enabling a stream already enabled is a bug"
            );
            registry.streams.insert(key.clone(), Arc::clone(&stream));
        }

        let rollback = EnableRollback {
            registry: &self.registry,
            key: &key,
            stream: &stream,
            armed: true,
        };
        match stream.start().await {
            Ok(()) => {
                rollback.disarm();
                Ok(())
            }
            // The registration is rolled back by the guard; a concurrent
            // disable() may have removed it already, which is fine.
            Err(err) => Err(err),
        }
    }

    async fn disable(&self, symbol: &str, event: FeedEvent) {
        let stream = {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            let stream = registry
                .streams
                .remove(&(symbol.to_owned(), event))
                .expect("disabling a stream that is not enabled is a bug");
            registry.closing.push(Arc::clone(&stream));
            stream
        };

        stream.close();
        stream.wait_closed().await;

        self.registry
            .lock()
            .expect("registry lock poisoned")
            .closing
            .retain(|closing| !Arc::ptr_eq(closing, &stream));
    }

    fn close(&self) {
        let mut close_task = self.close_task.lock().expect("close task lock poisoned");
        if close_task.is_some() {
            return;
        }

        let registry = Arc::clone(&self.registry);
        let session = Arc::clone(&self.session);
        let own_session = self.own_session;
        let closed = self.closed.clone();
        *close_task = Some(tokio::spawn(async move {
            let to_wait = {
                let mut registry = registry.lock().expect("registry lock poisoned");
                let mut to_wait = std::mem::take(&mut registry.closing);
                for stream in registry.streams.values() {
                    stream.close();
                    to_wait.push(Arc::clone(stream));
                }
                registry.streams.clear();
                to_wait
            };

            join_all(to_wait.iter().map(|stream| stream.wait_closed())).await;

            if own_session {
                session.lock().expect("session lock poisoned").take();
            }
            closed.cancel();
        }));
    }

    async fn wait_closed(&self) {
        assert!(
            self.close_task
                .lock()
                .expect("close task lock poisoned")
                .is_some(),
            "wait_closed() is only valid after a close()"
        );
        self.closed.cancelled().await;
    }
}

/// Rolls a stream registration back when enable fails or its caller drops
/// the future mid-startup.
struct EnableRollback<'a> {
    registry: &'a Arc<Mutex<Registry>>,
    key: &'a StreamKey,
    stream: &'a Arc<Stream>,
    armed: bool,
}

impl EnableRollback<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for EnableRollback<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        self.stream.close();

        // Park the stream among the closing ones, as disable() does, so a
        // concurrent close() still waits on this teardown.
        {
            let mut registry = self.registry.lock().expect("registry lock poisoned");
            registry.streams.remove(self.key);
            registry.closing.push(Arc::clone(self.stream));
        }

        let registry = Arc::clone(self.registry);
        let stream = Arc::clone(self.stream);
        tokio::spawn(async move {
            stream.wait_closed().await;
            registry
                .lock()
                .expect("registry lock poisoned")
                .closing
                .retain(|closing| !Arc::ptr_eq(closing, &stream));
        });
    }
}
