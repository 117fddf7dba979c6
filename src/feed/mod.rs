//! Market data feed abstractions and the venues implementing them.

use async_trait::async_trait;

use crate::data::{OrderUpdate, Tick};
use crate::error::FeedError;

pub mod binance;
pub mod factory;

/// Event streams a feed can provide for a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedEvent {
    /// Tick (completed trade) event stream.
    Tick,
    /// Order book update event stream.
    OrderBook,
}

/// Payload of a single data delivery.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedData {
    /// A single completed trade.
    Tick(Tick),
    /// A non-empty batch of order book updates, in increasing id order.
    OrderBook(Vec<OrderUpdate>),
}

/// Data or error notification delivered to the feed consumer.
///
/// Messages for one stream arrive in wire order; no ordering is guaranteed
/// across streams.
#[derive(Debug)]
pub enum FeedMessage {
    /// A decoded market event.
    Data {
        /// Market symbol the event belongs to.
        symbol: String,
        /// Event stream the event belongs to.
        event: FeedEvent,
        /// Decoded payload.
        data: FeedData,
    },
    /// A fatal stream error. Sent at most once per stream lifetime; the
    /// stream has already shut down and closed its connection when this
    /// arrives.
    Error {
        /// Market symbol of the failed stream.
        symbol: String,
        /// Event stream that failed.
        event: FeedEvent,
        /// The failure.
        error: FeedError,
        /// Human readable rendering of `error`.
        message: String,
        /// Reserved for a future retry policy. Currently always 0.
        retry: u32,
    },
}

impl std::fmt::Debug for dyn Feed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Feed").field("name", &self.name()).finish()
    }
}

/// Abstraction of a single market data feed.
///
/// A feed owns one stream per `(symbol, event)` pair and fans every decoded
/// event into the message channel supplied at construction.
#[async_trait]
pub trait Feed: Send + Sync {
    /// Feed name, for use in feed descriptions.
    fn name(&self) -> &'static str;

    /// Enable an event stream.
    ///
    /// Resolves once the stream is connected and producing events.
    ///
    /// # Errors
    ///
    /// Will return `Err` if the stream fails before becoming ready; no
    /// registration is left behind and no message has been sent.
    ///
    /// # Panics
    ///
    /// A stream may only be enabled once, and not after [`Feed::close`];
    /// violating either is a bug in the caller.
    async fn enable(&self, symbol: &str, event: FeedEvent) -> Result<(), FeedError>;

    /// Disable an event stream, waiting until its connection is closed.
    ///
    /// # Panics
    ///
    /// A stream may only be disabled if it is enabled; anything else is a bug
    /// in the caller.
    async fn disable(&self, symbol: &str, event: FeedEvent);

    /// Request feed shutdown. Idempotent and non-blocking; teardown runs to
    /// completion on its own.
    fn close(&self);

    /// Wait until the feed is completely shut down.
    ///
    /// # Panics
    ///
    /// Only valid after [`Feed::close`] has been called.
    async fn wait_closed(&self);
}
