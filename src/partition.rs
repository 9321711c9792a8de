// Client seam for a partitioned wide-column store.
// Offers are partitioned by hotel id and clustered by price ascending, so a
// partition scan yields the cheapest offer first.

use crate::models::{Hotel, HotelId, Offer};
use crate::storage::{Result, StorageError};
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Consistency {
    Any,
    One,
    Two,
    Three,
    #[default]
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    LocalOne,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("Unknown consistency level: {0}")]
pub struct UnknownConsistency(pub String);

impl Consistency {
    /// Replicas that must answer for a request at this level to succeed.
    /// Single data center, so the local and each-DC variants collapse onto
    /// their plain counterparts.
    pub fn required_replicas(self, replication_factor: u32) -> u32 {
        match self {
            Consistency::Any => 0,
            Consistency::One | Consistency::LocalOne => 1,
            Consistency::Two => 2,
            Consistency::Three => 3,
            Consistency::Quorum | Consistency::LocalQuorum | Consistency::EachQuorum => {
                replication_factor / 2 + 1
            }
            Consistency::All => replication_factor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Consistency::Any => "ANY",
            Consistency::One => "ONE",
            Consistency::Two => "TWO",
            Consistency::Three => "THREE",
            Consistency::Quorum => "QUORUM",
            Consistency::All => "ALL",
            Consistency::LocalQuorum => "LOCAL_QUORUM",
            Consistency::EachQuorum => "EACH_QUORUM",
            Consistency::LocalOne => "LOCAL_ONE",
        }
    }
}

impl fmt::Display for Consistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Consistency {
    type Err = UnknownConsistency;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANY" => Ok(Consistency::Any),
            "ONE" => Ok(Consistency::One),
            "TWO" => Ok(Consistency::Two),
            "THREE" => Ok(Consistency::Three),
            "QUORUM" => Ok(Consistency::Quorum),
            "ALL" => Ok(Consistency::All),
            "LOCAL_QUORUM" => Ok(Consistency::LocalQuorum),
            "EACH_QUORUM" => Ok(Consistency::EachQuorum),
            "LOCAL_ONE" => Ok(Consistency::LocalOne),
            _ => Err(UnknownConsistency(s.to_string())),
        }
    }
}

/// Requests the partitioned adapter sends to the store.
///
/// Every call is one request and may fail with `Unavailable` or `Timeout`.
/// `scan_partition` pages one row per round trip, so a consumer that stops
/// polling stops reading.
#[async_trait]
pub trait PartitionClient: Send + Sync + 'static {
    async fn fetch_hotel(&self, id: HotelId, consistency: Consistency) -> Result<Option<Hotel>>;

    // Partition order, not id order
    async fn scan_hotels(&self, consistency: Consistency) -> Result<Vec<Hotel>>;

    // Price ascending
    fn scan_partition(&self, hotel_id: HotelId, consistency: Consistency) -> BoxStream<'_, Result<Offer>>;

    // LIMIT 1 read: the cheapest offer of the partition, if any
    async fn first_in_partition(&self, hotel_id: HotelId, consistency: Consistency) -> Result<Option<Offer>>;

    async fn count_hotels(&self, consistency: Consistency) -> Result<u64>;

    async fn count_offers(&self, consistency: Consistency) -> Result<u64>;

    async fn write_hotels(&self, hotels: &[Hotel], consistency: Consistency) -> Result<()>;

    // Idempotent upsert: writing the same offer twice stores it once
    async fn write_offer(&self, offer: &Offer, consistency: Consistency) -> Result<()>;
}

// In-process clustered store with simulated replication
pub struct LocalPartitionStore {
    hotels: DashMap<HotelId, Hotel>,
    partitions: DashMap<HotelId, Vec<Offer>>,
    replication_factor: u32,
    live_replicas: AtomicU32,
    fail_next_requests: AtomicUsize,
    requests: AtomicU64,
    rows_read: AtomicU64,
}

impl Default for LocalPartitionStore {
    fn default() -> Self {
        Self::new(3)
    }
}

impl LocalPartitionStore {
    pub fn new(replication_factor: u32) -> Self {
        Self {
            hotels: DashMap::new(),
            partitions: DashMap::new(),
            replication_factor,
            live_replicas: AtomicU32::new(replication_factor),
            fail_next_requests: AtomicUsize::new(0),
            requests: AtomicU64::new(0),
            rows_read: AtomicU64::new(0),
        }
    }

    pub fn replication_factor(&self) -> u32 {
        self.replication_factor
    }

    pub fn set_live_replicas(&self, live: u32) {
        self.live_replicas
            .store(live.min(self.replication_factor), Ordering::SeqCst);
    }

    // The next `count` requests fail with `Unavailable`
    pub fn fail_next_requests(&self, count: usize) {
        self.fail_next_requests.store(count, Ordering::SeqCst);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    // Offer rows returned by partition reads so far
    pub fn rows_read(&self) -> u64 {
        self.rows_read.load(Ordering::Relaxed)
    }

    pub fn reset_counters(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.rows_read.store(0, Ordering::Relaxed);
    }

    fn begin_request(&self, consistency: Consistency) -> Result<()> {
        self.requests.fetch_add(1, Ordering::Relaxed);

        if self
            .fail_next_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StorageError::Unavailable("connection reset by peer".to_string()));
        }

        let live = self.live_replicas.load(Ordering::SeqCst);
        let required = consistency.required_replicas(self.replication_factor);
        if live < required {
            return Err(StorageError::Unavailable(format!(
                "cannot achieve consistency level {}: {} replicas required, {} alive",
                consistency, required, live
            )));
        }
        Ok(())
    }

    fn read_row(&self, hotel_id: HotelId, position: usize) -> Option<Offer> {
        let row = self
            .partitions
            .get(&hotel_id)
            .and_then(|partition| partition.get(position).cloned());
        if row.is_some() {
            self.rows_read.fetch_add(1, Ordering::Relaxed);
        }
        row
    }
}

#[async_trait]
impl PartitionClient for LocalPartitionStore {
    async fn fetch_hotel(&self, id: HotelId, consistency: Consistency) -> Result<Option<Hotel>> {
        self.begin_request(consistency)?;
        Ok(self.hotels.get(&id).map(|hotel| hotel.value().clone()))
    }

    async fn scan_hotels(&self, consistency: Consistency) -> Result<Vec<Hotel>> {
        self.begin_request(consistency)?;
        Ok(self.hotels.iter().map(|entry| entry.value().clone()).collect())
    }

    fn scan_partition(&self, hotel_id: HotelId, consistency: Consistency) -> BoxStream<'_, Result<Offer>> {
        Box::pin(stream::unfold(Some(0usize), move |state| async move {
            let position = state?;
            if let Err(err) = self.begin_request(consistency) {
                return Some((Err(err), None));
            }
            self.read_row(hotel_id, position)
                .map(|offer| (Ok(offer), Some(position + 1)))
        }))
    }

    async fn first_in_partition(&self, hotel_id: HotelId, consistency: Consistency) -> Result<Option<Offer>> {
        self.begin_request(consistency)?;
        Ok(self.read_row(hotel_id, 0))
    }

    async fn count_hotels(&self, consistency: Consistency) -> Result<u64> {
        self.begin_request(consistency)?;
        Ok(self.hotels.len() as u64)
    }

    async fn count_offers(&self, consistency: Consistency) -> Result<u64> {
        self.begin_request(consistency)?;
        Ok(self
            .partitions
            .iter()
            .map(|partition| partition.value().len() as u64)
            .sum())
    }

    async fn write_hotels(&self, hotels: &[Hotel], consistency: Consistency) -> Result<()> {
        self.begin_request(consistency)?;
        for hotel in hotels {
            self.hotels.insert(hotel.id, hotel.clone());
        }
        Ok(())
    }

    async fn write_offer(&self, offer: &Offer, consistency: Consistency) -> Result<()> {
        self.begin_request(consistency)?;
        if !offer.price.is_finite() {
            return Err(StorageError::Query(format!("invalid price {}", offer.price)));
        }

        let mut partition = self.partitions.entry(offer.hotel_id).or_default();
        let start = partition.partition_point(|row| row.price < offer.price);
        let end = partition.partition_point(|row| row.price <= offer.price);
        if !partition[start..end].iter().any(|row| row == offer) {
            partition.insert(end, offer.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{hotel, offer};
    use futures::StreamExt;
    use test_case::test_case;

    #[test_case("quorum", Consistency::Quorum; "#1 lower case")]
    #[test_case("LOCAL_ONE", Consistency::LocalOne; "#2 local one")]
    #[test_case(" each_quorum ", Consistency::EachQuorum; "#3 padded")]
    #[test_case("ANY", Consistency::Any; "#4 any")]
    fn test_parse_consistency(input: &str, expected: Consistency) {
        assert_eq!(input.parse::<Consistency>(), Ok(expected));
    }

    #[test]
    fn test_unknown_consistency_is_rejected() {
        assert_eq!(
            "MOSTLY".parse::<Consistency>(),
            Err(UnknownConsistency("MOSTLY".to_string()))
        );
        assert_eq!(Consistency::default(), Consistency::Quorum);
    }

    #[test_case(Consistency::One, 3, 1; "#1 one")]
    #[test_case(Consistency::Quorum, 3, 2; "#2 quorum of three")]
    #[test_case(Consistency::Quorum, 5, 3; "#3 quorum of five")]
    #[test_case(Consistency::All, 3, 3; "#4 all")]
    #[test_case(Consistency::Any, 3, 0; "#5 any")]
    fn test_required_replicas(consistency: Consistency, rf: u32, expected: u32) {
        assert_eq!(consistency.required_replicas(rf), expected);
    }

    #[test]
    fn test_consistency_serde_names() {
        let json = serde_json::to_string(&Consistency::LocalQuorum).unwrap();
        assert_eq!(json, "\"LOCAL_QUORUM\"");
        assert_eq!(Consistency::LocalQuorum.to_string(), "LOCAL_QUORUM");
    }

    async fn scan_prices(store: &LocalPartitionStore, hotel_id: u32) -> Vec<f64> {
        store
            .scan_partition(HotelId(hotel_id), Consistency::One)
            .map(|row| row.unwrap().price)
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_partition_is_clustered_by_price() {
        let store = LocalPartitionStore::default();
        for price in [300.0, 100.0, 200.0, 50.0] {
            store.write_offer(&offer(1, price, 2, "FRA"), Consistency::One).await.unwrap();
        }
        // Same price, different row
        store.write_offer(&offer(1, 100.0, 3, "MUC"), Consistency::One).await.unwrap();

        assert_eq!(scan_prices(&store, 1).await, vec![50.0, 100.0, 100.0, 200.0, 300.0]);
        assert!(scan_prices(&store, 2).await.is_empty());
    }

    #[tokio::test]
    async fn test_write_offer_is_idempotent() {
        let store = LocalPartitionStore::default();
        let row = offer(1, 99.0, 2, "FRA");
        for _ in 0..3 {
            store.write_offer(&row, Consistency::One).await.unwrap();
        }
        assert_eq!(store.count_offers(Consistency::One).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stopping_a_scan_stops_reading() {
        let store = LocalPartitionStore::default();
        for i in 0..50 {
            store
                .write_offer(&offer(1, 100.0 + f64::from(i), 2, "FRA"), Consistency::One)
                .await
                .unwrap();
        }
        store.reset_counters();

        let first: Vec<_> = store
            .scan_partition(HotelId(1), Consistency::One)
            .take(3)
            .collect()
            .await;
        assert_eq!(first.len(), 3);
        assert_eq!(store.rows_read(), 3);
    }

    #[tokio::test]
    async fn test_first_in_partition_returns_cheapest_row() {
        let store = LocalPartitionStore::default();
        store.write_offer(&offer(4, 80.0, 2, "FRA"), Consistency::One).await.unwrap();
        store.write_offer(&offer(4, 60.0, 2, "FRA"), Consistency::One).await.unwrap();

        let first = store.first_in_partition(HotelId(4), Consistency::One).await.unwrap();
        assert_eq!(first.map(|o| o.price), Some(60.0));
        assert!(store.first_in_partition(HotelId(5), Consistency::One).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_injected_failures_are_consumed() {
        let store = LocalPartitionStore::default();
        store.write_hotels(&[hotel(1, "A")], Consistency::Quorum).await.unwrap();
        store.fail_next_requests(2);

        assert!(matches!(
            store.fetch_hotel(HotelId(1), Consistency::One).await,
            Err(StorageError::Unavailable(_))
        ));
        assert!(store.count_hotels(Consistency::One).await.is_err());
        assert_eq!(store.count_hotels(Consistency::One).await, Ok(1));
    }

    #[tokio::test]
    async fn test_consistency_depends_on_live_replicas() {
        let store = LocalPartitionStore::new(3);
        store.write_hotels(&[hotel(1, "A")], Consistency::All).await.unwrap();
        store.set_live_replicas(1);

        // ONE still succeeds, QUORUM cannot
        assert!(store.fetch_hotel(HotelId(1), Consistency::One).await.unwrap().is_some());
        let err = store.fetch_hotel(HotelId(1), Consistency::Quorum).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("QUORUM"));
    }

    #[tokio::test]
    async fn test_scan_surfaces_failure_and_ends() {
        let store = LocalPartitionStore::default();
        store.write_offer(&offer(1, 10.0, 2, "FRA"), Consistency::One).await.unwrap();
        store.set_live_replicas(0);

        let rows: Vec<_> = store.scan_partition(HotelId(1), Consistency::One).collect().await;
        assert_eq!(rows.len(), 1);
        assert!(rows[0].is_err());
    }
}
