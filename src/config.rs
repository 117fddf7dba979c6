//! Crate config module.

use url::Url;

/// Endpoints a [`crate::feed::binance::BinanceFeed`] connects to.
///
/// The defaults point at the production Binance endpoints; tests point them at
/// local servers instead.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    /// Websocket stream base URL. Stream names are appended as one path
    /// segment, e.g. `{websocket_url}/btcusdt@trade`.
    pub websocket_url: Url,
    /// REST API base URL, used for the order book depth snapshot.
    pub rest_url: Url,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            websocket_url: Url::parse("wss://stream.binance.com:9443/ws")
                .expect("default websocket URL is valid"),
            rest_url: Url::parse("https://www.binance.com").expect("default REST URL is valid"),
        }
    }
}
