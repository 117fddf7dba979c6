//! Worker receiving events from a market depth stream (`{symbol}@depth`).
//!
//! The order book has no usable zero state, so startup reconciles two
//! sources: a REST snapshot tagged with the last update id it reflects, and
//! the live update feed buffered while the snapshot request is in flight.
//! Buffered updates already covered by the snapshot are discarded; the rest
//! are replayed after it exactly once.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::data::{OrderUpdate, Side};
use crate::error::FeedError;
use crate::feed::binance::stream::{parse_decimal, Stream, WsConnection};
use crate::feed::FeedData;

/// Depth snapshot request path, relative to the REST base URL.
const DEPTH_PATH: &str = "/api/v1/depth";

/// Number of price levels requested with the snapshot.
const DEPTH_LIMIT: u32 = 1000;

/// The raw depth update frame. Fields not listed here are ignored.
#[derive(Deserialize, Debug)]
struct RawDepthUpdate {
    /// First update id in the frame.
    #[serde(rename = "U")]
    first_update_id: u64,
    /// Event timestamp.
    #[serde(rename = "E")]
    event_time: u64,
    /// Changed bid levels, as `[price, amount, ...]` arrays.
    b: Vec<Vec<Value>>,
    /// Changed ask levels, same shape as bids.
    a: Vec<Vec<Value>>,
}

/// The raw depth snapshot returned by the REST endpoint.
#[derive(Deserialize, Debug)]
struct RawDepthSnapshot {
    /// Id of the most recent update reflected in the snapshot.
    #[serde(rename = "lastUpdateId")]
    last_update_id: u64,
    /// Bid levels, as `[price, amount, ...]` arrays.
    bids: Vec<Vec<Value>>,
    /// Ask levels, same shape as bids.
    asks: Vec<Vec<Value>>,
}

/// Extract price and amount from a `[price, amount, ...]` level array.
fn parse_level(level: &[Value]) -> Result<(Decimal, Decimal), FeedError> {
    let (Some(price), Some(amount)) = (level.first(), level.get(1)) else {
        return Err(FeedError::Payload(
            "price level has fewer than two fields".to_owned(),
        ));
    };
    let (Some(price), Some(amount)) = (price.as_str(), amount.as_str()) else {
        return Err(FeedError::Payload(
            "price level fields must be strings".to_owned(),
        ));
    };

    Ok((
        parse_decimal(price, "level price")?,
        parse_decimal(amount, "level amount")?,
    ))
}

/// Decode a depth update frame into a batch of [`OrderUpdate`].
///
/// Update ids are assigned by sequential increment starting at the frame's
/// first update id, bids before asks.
///
/// # Errors
///
/// Will return a payload error if a required field is missing or ill-typed,
/// or if a level does not parse.
fn decode(frame: Value) -> Result<Vec<OrderUpdate>, FeedError> {
    let raw: RawDepthUpdate = serde_json::from_value(frame)
        .map_err(|err| FeedError::Payload(format!("invalid order book update: {err}")))?;

    let mut id = raw.first_update_id;
    let mut updates = Vec::with_capacity(raw.b.len() + raw.a.len());
    for (levels, side) in [(&raw.b, Side::Buy), (&raw.a, Side::Sell)] {
        for level in levels {
            let (price, amount) = parse_level(level)?;
            updates.push(OrderUpdate {
                id,
                timestamp: Some(raw.event_time),
                side,
                amount,
                price,
            });
            id += 1;
        }
    }

    Ok(updates)
}

/// Turn a snapshot body into update events diffing from an empty order book,
/// plus the id of the most recent update the snapshot reflects.
///
/// Every synthesized update carries that id and no timestamp, bids before
/// asks.
fn parse_snapshot(snapshot: Value) -> Result<(Vec<OrderUpdate>, u64), FeedError> {
    if let Some(code) = snapshot.get("code") {
        let code = code.as_i64().unwrap_or(0);
        let msg = snapshot
            .get("msg")
            .and_then(Value::as_str)
            .unwrap_or("unknown error returned by remote server")
            .to_owned();
        return Err(FeedError::Remote { code, msg });
    }

    let raw: RawDepthSnapshot = serde_json::from_value(snapshot)
        .map_err(|_| FeedError::Payload("invalid order book snapshot".to_owned()))?;

    let mut updates = Vec::with_capacity(raw.bids.len() + raw.asks.len());
    for (levels, side) in [(&raw.bids, Side::Buy), (&raw.asks, Side::Sell)] {
        for level in levels {
            let (price, amount) = parse_level(level)?;
            updates.push(OrderUpdate {
                id: raw.last_update_id,
                timestamp: None,
                side,
                amount,
                price,
            });
        }
    }

    Ok((updates, raw.last_update_id))
}

/// Fetch a full snapshot of order book depth from the REST endpoint.
async fn fetch_snapshot(stream: &Stream) -> Result<(Vec<OrderUpdate>, u64), FeedError> {
    let url = format!(
        "{}{DEPTH_PATH}?symbol={}&limit={DEPTH_LIMIT}",
        stream.rest_url,
        stream.symbol.to_uppercase(),
    );
    log::info!("fetching order book snapshot from <{url}>");

    let response = stream
        .session
        .get(&url)
        .send()
        .await
        .map_err(|err| FeedError::Connection(err.to_string()))?;
    let snapshot = response
        .json::<Value>()
        .await
        .map_err(|_| FeedError::Payload("invalid order book snapshot".to_owned()))?;

    parse_snapshot(snapshot)
}

/// Depth stream worker body: reconcile the snapshot with buffered live
/// updates, signal readiness, then deliver strictly newer updates as they
/// arrive.
pub(crate) async fn run(stream: &Stream, ws: &mut WsConnection, ready: oneshot::Sender<()>) {
    let last_applied = match startup(stream, ws).await {
        Ok(Some(last_applied)) => last_applied,
        // Cancelled before the snapshot was reconciled.
        Ok(None) => return,
        Err(err) => {
            stream.fail(err);
            return;
        }
    };

    let _ = ready.send(());

    if let Err(err) = read_loop(stream, ws, last_applied).await {
        (stream.on_error)(err);
    }
}

/// Build and deliver the initial order book batch.
///
/// Live updates are buffered locally while the snapshot request is in
/// flight; an error on either side fails startup and implicitly cancels the
/// other. Buffered updates with an id not greater than the snapshot's last
/// update id are discarded, the rest follow the snapshot in arrival order.
///
/// Returns the id of the last reconciled update, or `None` when cancelled.
async fn startup(stream: &Stream, ws: &mut WsConnection) -> Result<Option<u64>, FeedError> {
    let mut buffer: Vec<OrderUpdate> = Vec::new();
    let fetch = fetch_snapshot(stream);
    tokio::pin!(fetch);

    let (mut events, last_update_id) = loop {
        // Polled in order: frames already received are buffered before the
        // snapshot result is taken.
        tokio::select! {
            biased;
            _ = stream.cancelled() => return Ok(None),
            result = ws.receive() => buffer.extend(decode(result?)?),
            result = &mut fetch => break result?,
        }
    };

    events.extend(buffer.into_iter().filter(|update| update.id > last_update_id));
    let last_applied = events.last().map_or(last_update_id, |update| update.id);
    if !events.is_empty() {
        (stream.on_data)(FeedData::OrderBook(events));
    }

    Ok(Some(last_applied))
}

async fn read_loop(
    stream: &Stream,
    ws: &mut WsConnection,
    mut last_applied: u64,
) -> Result<(), FeedError> {
    loop {
        let frame = tokio::select! {
            biased;
            _ = stream.cancelled() => return Ok(()),
            result = ws.receive() => result?,
        };
        let events: Vec<OrderUpdate> = decode(frame)?
            .into_iter()
            .filter(|update| update.id > last_applied)
            .collect();
        if let Some(last) = events.last().map(|update| update.id) {
            last_applied = last;
            (stream.on_data)(FeedData::OrderBook(events));
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;
    use serde_json::json;

    use super::*;

    #[test]
    fn update_ids_count_up_across_bids_then_asks() {
        let frame = json!({
            "e": "depthUpdate",
            "E": 123_456_789_u64,
            "s": "BTCUSDT",
            "U": 157,
            "u": 160,
            "b": [["0.0024", "10"], ["0.0023", "5"]],
            "a": [["0.0026", "100"], ["0.0027", "0"]],
        });

        let updates = decode(frame).expect("valid depth frame");

        assert_eq!(updates.len(), 4);
        assert_eq!(
            updates.iter().map(|update| update.id).collect::<Vec<_>>(),
            vec![157, 158, 159, 160]
        );
        assert_eq!(
            updates.iter().map(|update| update.side).collect::<Vec<_>>(),
            vec![Side::Buy, Side::Buy, Side::Sell, Side::Sell]
        );
        assert!(updates
            .iter()
            .all(|update| update.timestamp == Some(123_456_789)));
        assert_eq!(updates[0].price, dec!(0.0024));
        assert_eq!(updates[0].amount, dec!(10));
        // A zero amount marks a removed price level.
        assert_eq!(updates[3].amount, dec!(0));
    }

    #[test]
    fn update_missing_first_id_is_a_payload_error() {
        let frame = json!({ "E": 1_u64, "b": [], "a": [] });

        let err = decode(frame).expect_err("missing U");

        assert!(matches!(err, FeedError::Payload(_)));
    }

    #[test]
    fn snapshot_updates_share_the_last_update_id() {
        let snapshot = json!({
            "lastUpdateId": 101,
            "bids": [["4.00000000", "431"]],
            "asks": [["4.00000200", "12"]],
        });

        let (updates, last_update_id) = parse_snapshot(snapshot).expect("valid snapshot");

        assert_eq!(last_update_id, 101);
        assert_eq!(updates.len(), 2);
        assert!(updates.iter().all(|update| update.id == 101));
        assert!(updates.iter().all(|update| update.timestamp.is_none()));
        assert_eq!(updates[0].side, Side::Buy);
        assert_eq!(updates[1].side, Side::Sell);
        assert_eq!(updates[1].price, dec!(4.00000200));
    }

    #[test]
    fn snapshot_tolerates_trailing_level_fields() {
        // The v1 endpoint appends an ignored extra element to each level.
        let snapshot = json!({
            "lastUpdateId": 7,
            "bids": [["4.00000000", "431", []]],
            "asks": [],
        });

        let (updates, _) = parse_snapshot(snapshot).expect("valid snapshot");

        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].amount, dec!(431));
    }

    #[test]
    fn snapshot_error_body_is_a_remote_error() {
        let snapshot = json!({ "code": -1121, "msg": "Invalid symbol." });

        let err = parse_snapshot(snapshot).expect_err("error body");

        assert!(
            matches!(err, FeedError::Remote { code: -1121, ref msg } if msg == "Invalid symbol.")
        );
    }

    #[test]
    fn malformed_snapshot_is_a_payload_error() {
        let snapshot = json!({ "bids": [], "asks": [] });

        let err = parse_snapshot(snapshot).expect_err("missing lastUpdateId");

        assert!(matches!(err, FeedError::Payload(_)));
    }
}
