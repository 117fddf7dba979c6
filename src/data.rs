//! Normalized market data records shared by every feed.

use rust_decimal::Decimal;

/// Initiating side of a trade or order book change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Buyer-initiated, or a bid level.
    Buy,
    /// Seller-initiated, or an ask level.
    Sell,
}

/// A single transaction on a market.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    /// Id of the transaction. Unique for a given market.
    pub id: u64,
    /// Number of seconds elapsed from the Epoch to the transaction.
    pub timestamp: u64,
    /// Initiating side of the transaction.
    pub side: Side,
    /// Transaction volume in traded asset.
    pub amount: Decimal,
    /// Transaction price in secondary asset.
    pub price: Decimal,
}

/// A single order status event on a market's order book.
///
/// An `amount` of zero removes the price level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderUpdate {
    /// Id of the event. Unique for a given market.
    pub id: u64,
    /// Number of seconds elapsed from the Epoch to the event. `None` for
    /// records synthesized from a REST order book snapshot.
    pub timestamp: Option<u64>,
    /// Side of the order book the event applies to.
    pub side: Side,
    /// Order volume in traded asset.
    pub amount: Decimal,
    /// Order price in secondary asset.
    pub price: Decimal,
}

/// Identifies a market on a provider, with aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedDescription {
    /// Platform name.
    pub name: String,
    /// Market symbol. Actual meaning depends on platform.
    pub symbol: String,
    /// Aggregation timeframe in seconds. `None` for no aggregation
    /// (tick-based).
    pub period: Option<u32>,
}
