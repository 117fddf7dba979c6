//! Crate prelude.

use futures_channel::mpsc::{UnboundedReceiver, UnboundedSender};

pub use crate::data::{FeedDescription, OrderUpdate, Side, Tick};
pub use crate::error::FeedError;
pub use crate::feed::{Feed, FeedData, FeedEvent, FeedMessage};

/// Feed message sender type, handed to feed constructors.
pub type FeedMessageSender = UnboundedSender<FeedMessage>;

/// Feed message receiver type, consumed by the application.
pub type FeedMessageReceiver = UnboundedReceiver<FeedMessage>;
