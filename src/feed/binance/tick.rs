//! Worker receiving events from a market tick stream (`{symbol}@trade`).

use serde::Deserialize;
use tokio::sync::oneshot;

use crate::data::{Side, Tick};
use crate::error::FeedError;
use crate::feed::binance::stream::{parse_decimal, Stream, WsConnection};
use crate::feed::FeedData;

/// The raw trade frame. Fields not listed here are ignored.
#[derive(Deserialize, Debug)]
struct RawTrade {
    /// Trade id.
    t: u64,
    /// Event timestamp.
    #[serde(rename = "E")]
    event_time: u64,
    /// Whether the buyer is the market maker, i.e. the trade was
    /// seller-initiated.
    m: bool,
    /// Trade quantity.
    q: String,
    /// Trade price.
    p: String,
}

impl TryFrom<RawTrade> for Tick {
    type Error = FeedError;

    fn try_from(value: RawTrade) -> Result<Self, Self::Error> {
        Ok(Self {
            id: value.t,
            timestamp: value.event_time,
            side: if value.m { Side::Sell } else { Side::Buy },
            amount: parse_decimal(&value.q, "trade quantity")?,
            price: parse_decimal(&value.p, "trade price")?,
        })
    }
}

/// Decode a trade frame into a [`Tick`].
///
/// # Errors
///
/// Will return a payload error if a required field is missing or ill-typed,
/// or if a decimal field does not parse.
fn decode(frame: serde_json::Value) -> Result<Tick, FeedError> {
    let raw: RawTrade = serde_json::from_value(frame)
        .map_err(|err| FeedError::Payload(format!("invalid trade event: {err}")))?;

    Tick::try_from(raw)
}

/// Tick stream worker body: signal readiness, then decode and deliver every
/// frame until cancelled or a fatal error occurs.
pub(crate) async fn run(stream: &Stream, ws: &mut WsConnection, ready: oneshot::Sender<()>) {
    let _ = ready.send(());

    if let Err(err) = read_loop(stream, ws).await {
        (stream.on_error)(err);
    }
}

async fn read_loop(stream: &Stream, ws: &mut WsConnection) -> Result<(), FeedError> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stream.cancelled() => return Ok(()),
            result = ws.receive() => result?,
        };
        let tick = decode(frame)?;
        (stream.on_data)(FeedData::Tick(tick));
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_seller_initiated_trade() {
        let frame = json!({
            "e": "trade",
            "E": 123_456_789_u64,
            "s": "BTCUSDT",
            "t": 12345,
            "p": "10.000",
            "q": "100",
            "m": true,
            "M": true,
        });

        let tick = decode(frame).expect("valid trade frame");

        assert_eq!(
            tick,
            Tick {
                id: 12345,
                timestamp: 123_456_789,
                side: Side::Sell,
                amount: dec!(100),
                price: dec!(10.000),
            }
        );
    }

    #[test]
    fn decodes_buyer_initiated_trade() {
        let frame = json!({
            "E": 123_456_790_u64,
            "t": 12346,
            "p": "9.980",
            "q": "100",
            "m": false,
        });

        let tick = decode(frame).expect("valid trade frame");

        assert_eq!(tick.side, Side::Buy);
        assert_eq!(tick.id, 12346);
        assert_eq!(tick.price, dec!(9.980));
    }

    #[test]
    fn missing_field_is_a_payload_error() {
        let frame = json!({ "E": 1_u64, "p": "1", "q": "1", "m": false });

        let err = decode(frame).expect_err("missing trade id");

        assert!(matches!(err, FeedError::Payload(_)));
    }

    #[test]
    fn bad_decimal_is_a_payload_error() {
        let frame = json!({
            "E": 1_u64,
            "t": 1,
            "p": "not-a-price",
            "q": "1",
            "m": false,
        });

        let err = decode(frame).expect_err("unparseable price");

        assert!(matches!(err, FeedError::Payload(_)));
    }
}
