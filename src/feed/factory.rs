//! Construction of feeds from venue-name-carrying descriptions.

use std::collections::HashMap;

use crate::data::FeedDescription;
use crate::feed::binance::BinanceFeed;
use crate::feed::Feed;
use crate::prelude::FeedMessageSender;

/// Errors raised by [`Factory`] registration and creation.
#[derive(thiserror::Error, Debug)]
pub enum FactoryError {
    /// A feed is already registered under this name.
    #[error("feed \"{0}\" already registered")]
    AlreadyRegistered(String),
    /// No feed is registered under this name.
    #[error("unknown feed \"{0}\"")]
    UnknownFeed(String),
}

/// Constructor turning a description into a feed delivering to `data_tx`.
pub type FeedConstructor = fn(&FeedDescription, FeedMessageSender) -> Box<dyn Feed>;

/// A name-indexed registry of feed constructors.
///
/// Factories are isolated instances; a constructor registered with one
/// factory is not known to another.
#[derive(Debug, Default)]
pub struct Factory {
    constructors: HashMap<String, FeedConstructor>,
}

impl Factory {
    /// Create an empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a feed constructor under `name`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if a constructor is already registered under `name`.
    pub fn register(
        &mut self,
        name: &str,
        constructor: FeedConstructor,
    ) -> Result<(), FactoryError> {
        if self.constructors.contains_key(name) {
            return Err(FactoryError::AlreadyRegistered(name.to_owned()));
        }
        self.constructors.insert(name.to_owned(), constructor);

        Ok(())
    }

    /// Create the feed named by `description`, delivering to `data_tx`.
    ///
    /// # Errors
    ///
    /// Will return `Err` if no constructor is registered under
    /// `description.name`.
    pub fn create(
        &self,
        description: &FeedDescription,
        data_tx: FeedMessageSender,
    ) -> Result<Box<dyn Feed>, FactoryError> {
        let constructor = self
            .constructors
            .get(&description.name)
            .ok_or_else(|| FactoryError::UnknownFeed(description.name.clone()))?;

        Ok(constructor(description, data_tx))
    }
}

/// A factory with all built-in feeds registered.
#[must_use]
pub fn default_factory() -> Factory {
    let mut factory = Factory::new();
    factory
        .register(BinanceFeed::NAME, BinanceFeed::from_description)
        .expect("an empty factory cannot hold a duplicate");

    factory
}
