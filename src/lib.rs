#![allow(clippy::module_name_repetitions)]
#![warn(
    missing_debug_implementations,
    missing_docs,
    rust_2018_idioms,
    unreachable_pub
)]
#![deny(unused_must_use)]
#![doc(test(
    no_crate_inject,
    attr(deny(warnings, rust_2018_idioms), allow(dead_code, unused_variables))
))]

//! A Binance market-data feed system providing tick and order book update
//! streams in accordance to the
//! [Binance spot docs](https://github.com/binance/binance-spot-api-docs).
//!
//! To start receiving market data, refer to
//! [`crate::feed::binance::BinanceFeed`].
//!
//! To construct feeds by venue name, refer to [`crate::feed::factory`].

pub mod config;
pub mod data;
pub mod error;
pub mod feed;
pub mod prelude;
