// Storage port: the query contract consumed by the API layer.
// Implemented by the in-memory index and by the partitioned remote store.

use crate::filter::FilterPredicate;
use crate::models::{Hotel, HotelId, HotelWithBestOffer, Offer};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    // Store could not be reached, or not enough replicas answered
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Import failed: {0}")]
    Import(String),
}

impl StorageError {
    /// Connectivity problems are worth another attempt, query errors are not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Unavailable(_) | StorageError::Timeout(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub hotel_count: u64,
    pub offer_count: u64,
    pub hotels_with_offers_count: u64,
}

/// Read-only query contract shared by every backend.
///
/// A missing hotel is `Ok(None)`. An `Err` always means the store itself
/// failed, so callers can tell "not found" from "could not ask".
#[async_trait]
pub trait OfferStore: Send + Sync + 'static {
    async fn get_hotel(&self, id: HotelId) -> Result<Option<Hotel>>;

    // Ordered by id ascending
    async fn list_hotels(&self) -> Result<Vec<Hotel>>;

    // Matching offers of one hotel; the backends return them cheapest first
    async fn list_offers(&self, hotel_id: HotelId, predicate: &FilterPredicate) -> Result<Vec<Offer>>;

    /// The cheapest matching offer of every hotel that has one, sorted by
    /// that price ascending. Hotels without a match are left out.
    async fn best_offers_by_hotel(&self, predicate: &FilterPredicate) -> Result<Vec<HotelWithBestOffer>>;

    async fn stats(&self) -> Result<StoreStats>;

    // Distinct outbound departure airports, sorted
    async fn departure_airports(&self) -> Result<Vec<String>>;
}

pub type SharedStore = Arc<dyn OfferStore>;

// Equal prices keep their relative order (stable sort)
pub fn sort_by_best_price(results: &mut [HotelWithBestOffer]) {
    results.sort_by(|a, b| a.price().total_cmp(&b.price()));
}

/// First offer of a price-ordered sequence that satisfies the predicate.
///
/// Only correct because the input is sorted by price ascending: the first
/// match is the cheapest match.
pub fn first_match<'a, I>(price_ordered: I, predicate: &FilterPredicate) -> Option<&'a Offer>
where
    I: IntoIterator<Item = &'a Offer>,
{
    price_ordered.into_iter().find(|offer| predicate.matches(offer))
}
