// Storage port over a partitioned wide-column store.
// Best-offer search reads each hotel's partition in price order and stops at
// the first matching row, so a hotel costs as many rows as it takes to find
// its cheapest match.

use crate::filter::FilterPredicate;
use crate::importer::OFFERS_DELIMITER;
use crate::ingest::{csv_reader, IngestConfig, Ingestor};
use crate::models::{Hotel, HotelId, HotelWithBestOffer, Offer};
use crate::partition::{Consistency, PartitionClient};
use crate::record::OfferParser;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::storage::{sort_by_best_price, OfferStore, Result, StorageError, StoreStats};
use async_trait::async_trait;
use futures::{stream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Read;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionedConfig {
    // Queries and offer writes
    pub read_consistency: Consistency,
    pub write_consistency: Consistency,
    // Hotel bootstrap and table counts
    pub session_consistency: Consistency,
    pub retry: RetryConfig,
    pub scan_concurrency: usize,
    pub write_concurrency: usize,
    pub hotel_write_chunk: usize,
    pub max_logged_write_errors: u64,
}

impl Default for PartitionedConfig {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map_or(1, |n| n.get());
        Self {
            read_consistency: Consistency::One,
            write_consistency: Consistency::One,
            session_consistency: Consistency::Quorum,
            retry: RetryConfig::default(),
            scan_concurrency: 16,
            write_concurrency: cpus * 4,
            hotel_write_chunk: 500,
            max_logged_write_errors: 10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub rows_read: u64,
    pub rows_skipped: u64,
    pub parse_errors: u64,
    pub offers_written: u64,
    pub write_errors: u64,
}

pub struct PartitionedStore<C> {
    client: Arc<C>,
    config: PartitionedConfig,
}

impl<C: PartitionClient> PartitionedStore<C> {
    pub fn new(client: Arc<C>, config: PartitionedConfig) -> Self {
        Self { client, config }
    }

    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    pub fn config(&self) -> &PartitionedConfig {
        &self.config
    }

    async fn hotels(&self) -> Result<Vec<Hotel>> {
        let consistency = self.config.read_consistency;
        retry_with_backoff(&self.config.retry, "scan_hotels", || {
            self.client.scan_hotels(consistency)
        })
        .await
    }

    // Cheapest matching offer of one partition; stops reading at the first match
    async fn best_in_partition(&self, hotel_id: HotelId, predicate: &FilterPredicate) -> Result<Option<Offer>> {
        let consistency = self.config.read_consistency;
        retry_with_backoff(&self.config.retry, "scan_partition", || async move {
            let mut rows = self.client.scan_partition(hotel_id, consistency);
            while let Some(offer) = rows.try_next().await? {
                if predicate.matches(&offer) {
                    return Ok(Some(offer));
                }
            }
            Ok(None)
        })
        .await
    }

    async fn matching_in_partition(&self, hotel_id: HotelId, predicate: &FilterPredicate) -> Result<Vec<Offer>> {
        let consistency = self.config.read_consistency;
        retry_with_backoff(&self.config.retry, "scan_partition", || {
            self.client
                .scan_partition(hotel_id, consistency)
                .try_filter(|offer| futures::future::ready(predicate.matches(offer)))
                .try_collect::<Vec<_>>()
        })
        .await
    }

    async fn has_offers(&self, hotel_id: HotelId) -> Result<bool> {
        let consistency = self.config.read_consistency;
        let first = retry_with_backoff(&self.config.retry, "first_in_partition", || {
            self.client.first_in_partition(hotel_id, consistency)
        })
        .await?;
        Ok(first.is_some())
    }

    /// Write `hotels` when the hotel table is empty. Returns whether anything
    /// was written.
    pub async fn ensure_hotels(&self, hotels: &[Hotel]) -> Result<bool> {
        let consistency = self.config.session_consistency;
        let existing = retry_with_backoff(&self.config.retry, "count_hotels", || {
            self.client.count_hotels(consistency)
        })
        .await?;

        if existing > 0 {
            debug!(existing, "hotel table already populated");
            return Ok(false);
        }

        for chunk in hotels.chunks(self.config.hotel_write_chunk.max(1)) {
            retry_with_backoff(&self.config.retry, "write_hotels", || {
                self.client.write_hotels(chunk, consistency)
            })
            .await?;
        }
        info!(hotels = hotels.len(), "hotel table bootstrapped");
        Ok(true)
    }

    /// One-shot offer import: parse `source` with the ingestion pipeline and
    /// write the parsed offers with bounded concurrency while parsing goes on.
    ///
    /// Parsed batches travel over a bounded channel, so slow writes hold back
    /// the reader and memory stays flat for any file size. Rows that fail to
    /// parse or to write are counted, not fatal. Only an unreadable source
    /// fails the import; offers written before that point stay written.
    pub async fn import_offers<R>(&self, source: R, ingest: IngestConfig) -> Result<ImportSummary>
    where
        R: Read + Send + 'static,
    {
        let started = Instant::now();
        let (batch_tx, batch_rx) = mpsc::channel::<Vec<Offer>>(ingest.batch_channel_capacity.max(1));

        let parser = tokio::task::spawn_blocking(move || {
            Ingestor::new(ingest).run_into(
                csv_reader(source, OFFERS_DELIMITER),
                &OfferParser::default(),
                |batch| batch_tx.blocking_send(batch).is_ok(),
            )
        });

        let written = AtomicU64::new(0);
        let failed = AtomicU64::new(0);
        let consistency = self.config.write_consistency;
        let max_logged = self.config.max_logged_write_errors;

        let offers = stream::unfold(batch_rx, |mut rx| async move {
            rx.recv().await.map(|batch| (stream::iter(batch), rx))
        })
        .flatten();

        offers
            .for_each_concurrent(self.config.write_concurrency.max(1), |offer| {
                let written = &written;
                let failed = &failed;
                async move {
                    let result = retry_with_backoff(&self.config.retry, "write_offer", || {
                        self.client.write_offer(&offer, consistency)
                    })
                    .await;
                    match result {
                        Ok(()) => {
                            written.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(err) => {
                            if failed.fetch_add(1, Ordering::Relaxed) < max_logged {
                                warn!(hotel_id = %offer.hotel_id, error = %err, "offer write failed");
                            }
                        }
                    }
                }
            })
            .await;

        let report = parser
            .await
            .map_err(|e| StorageError::Import(format!("parser task failed: {}", e)))?
            .map_err(|e| StorageError::Import(e.to_string()))?;

        let summary = ImportSummary {
            rows_read: report.rows_read,
            rows_skipped: report.rows_skipped,
            parse_errors: report.error_count,
            offers_written: written.into_inner(),
            write_errors: failed.into_inner(),
        };
        info!(
            rows = summary.rows_read,
            written = summary.offers_written,
            parse_errors = summary.parse_errors,
            write_errors = summary.write_errors,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "offer import finished"
        );
        Ok(summary)
    }
}

#[async_trait]
impl<C: PartitionClient> OfferStore for PartitionedStore<C> {
    async fn get_hotel(&self, id: HotelId) -> Result<Option<Hotel>> {
        let consistency = self.config.read_consistency;
        retry_with_backoff(&self.config.retry, "fetch_hotel", || {
            self.client.fetch_hotel(id, consistency)
        })
        .await
    }

    async fn list_hotels(&self) -> Result<Vec<Hotel>> {
        let mut hotels = self.hotels().await?;
        hotels.sort_by_key(|hotel| hotel.id);
        Ok(hotels)
    }

    async fn list_offers(&self, hotel_id: HotelId, predicate: &FilterPredicate) -> Result<Vec<Offer>> {
        self.matching_in_partition(hotel_id, predicate).await
    }

    async fn best_offers_by_hotel(&self, predicate: &FilterPredicate) -> Result<Vec<HotelWithBestOffer>> {
        let started = Instant::now();
        let hotels = self.hotels().await?;
        let scanned = hotels.len();

        let found: Vec<Option<HotelWithBestOffer>> = stream::iter(hotels)
            .map(|hotel| async move {
                let best = self.best_in_partition(hotel.id, predicate).await?;
                Ok::<_, StorageError>(best.map(|best_offer| HotelWithBestOffer { hotel, best_offer }))
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .try_collect()
            .await?;

        let mut results: Vec<HotelWithBestOffer> = found.into_iter().flatten().collect();
        sort_by_best_price(&mut results);

        debug!(
            hotels = scanned,
            matches = results.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "best offers resolved"
        );
        Ok(results)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let consistency = self.config.session_consistency;
        let hotel_count = retry_with_backoff(&self.config.retry, "count_hotels", || {
            self.client.count_hotels(consistency)
        })
        .await?;
        let offer_count = retry_with_backoff(&self.config.retry, "count_offers", || {
            self.client.count_offers(consistency)
        })
        .await?;

        let hotels = self.hotels().await?;
        let flags: Vec<bool> = stream::iter(hotels)
            .map(|hotel| self.has_offers(hotel.id))
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .try_collect()
            .await?;

        Ok(StoreStats {
            hotel_count,
            offer_count,
            hotels_with_offers_count: flags.into_iter().filter(|has| *has).count() as u64,
        })
    }

    async fn departure_airports(&self) -> Result<Vec<String>> {
        let hotels = self.hotels().await?;
        let per_hotel: Vec<Vec<Offer>> = stream::iter(hotels)
            .map(|hotel| async move {
                self.matching_in_partition(hotel.id, &FilterPredicate::default()).await
            })
            .buffer_unordered(self.config.scan_concurrency.max(1))
            .try_collect()
            .await?;

        let airports: BTreeSet<String> = per_hotel
            .into_iter()
            .flatten()
            .map(|offer| offer.outbound_departure_airport)
            .filter(|airport| !airport.is_empty())
            .collect();
        Ok(airports.into_iter().collect())
    }
}
