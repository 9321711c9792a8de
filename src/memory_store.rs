// In-memory index: hotels by id plus each hotel's offers sorted by price.
// One RwLock guards the whole index; a load swaps in a freshly built index.

use crate::filter::FilterPredicate;
use crate::models::{Hotel, HotelId, HotelWithBestOffer, Offer};
use crate::storage::{first_match, sort_by_best_price, OfferStore, Result, StoreStats};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use tracing::info;

#[derive(Debug, Default)]
struct Index {
    hotels: BTreeMap<HotelId, Hotel>,
    // Invariant: every list is sorted by price ascending
    offers_by_hotel: HashMap<HotelId, Vec<Offer>>,
    offer_count: u64,
    departure_airports: BTreeSet<String>,
}

impl Index {
    fn build(hotels: Vec<Hotel>, offers: Vec<Offer>) -> Self {
        let offer_count = offers.len() as u64;
        let mut departure_airports = BTreeSet::new();
        let mut offers_by_hotel: HashMap<HotelId, Vec<Offer>> = HashMap::new();

        for offer in offers {
            if !offer.outbound_departure_airport.is_empty()
                && !departure_airports.contains(&offer.outbound_departure_airport)
            {
                departure_airports.insert(offer.outbound_departure_airport.clone());
            }
            offers_by_hotel.entry(offer.hotel_id).or_default().push(offer);
        }

        for offers in offers_by_hotel.values_mut() {
            offers.sort_by(|a, b| a.price.total_cmp(&b.price));
        }

        Self {
            hotels: hotels.into_iter().map(|h| (h.id, h)).collect(),
            offers_by_hotel,
            offer_count,
            departure_airports,
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    index: RwLock<Index>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(hotels: Vec<Hotel>, offers: Vec<Offer>) -> Self {
        let store = Self::new();
        store.load(hotels, offers);
        store
    }

    /// Replace hotels and offers as one unit.
    ///
    /// The new index is built before the write lock is taken; readers see
    /// either the old or the new data, never a mix.
    pub fn load(&self, hotels: Vec<Hotel>, offers: Vec<Offer>) {
        let started = Instant::now();
        let hotel_count = hotels.len();
        let offer_count = offers.len();
        let previous = self.swap_index(Index::build(hotels, offers));
        drop(previous);

        info!(
            hotels = hotel_count,
            offers = offer_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "in-memory index loaded"
        );
    }
}

impl MemoryStore {
    // The old index is handed back so it is freed after the write lock is gone
    fn swap_index(&self, index: Index) -> Index {
        std::mem::replace(&mut *self.index.write(), index)
    }
}

#[async_trait]
impl OfferStore for MemoryStore {
    async fn get_hotel(&self, id: HotelId) -> Result<Option<Hotel>> {
        Ok(self.index.read().hotels.get(&id).cloned())
    }

    async fn list_hotels(&self) -> Result<Vec<Hotel>> {
        Ok(self.index.read().hotels.values().cloned().collect())
    }

    async fn list_offers(&self, hotel_id: HotelId, predicate: &FilterPredicate) -> Result<Vec<Offer>> {
        let index = self.index.read();
        let offers = index
            .offers_by_hotel
            .get(&hotel_id)
            .map(|offers| {
                offers
                    .iter()
                    .filter(|offer| predicate.matches(offer))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(offers)
    }

    async fn best_offers_by_hotel(&self, predicate: &FilterPredicate) -> Result<Vec<HotelWithBestOffer>> {
        let index = self.index.read();
        let mut results: Vec<HotelWithBestOffer> = index
            .offers_by_hotel
            .iter()
            .filter_map(|(hotel_id, offers)| {
                let hotel = index.hotels.get(hotel_id)?;
                let best = first_match(offers, predicate)?;
                Some(HotelWithBestOffer {
                    hotel: hotel.clone(),
                    best_offer: best.clone(),
                })
            })
            .collect();
        drop(index);

        sort_by_best_price(&mut results);
        Ok(results)
    }

    async fn stats(&self) -> Result<StoreStats> {
        let index = self.index.read();
        let hotels_with_offers = index
            .hotels
            .keys()
            .filter(|id| index.offers_by_hotel.get(*id).map_or(false, |o| !o.is_empty()))
            .count();
        Ok(StoreStats {
            hotel_count: index.hotels.len() as u64,
            offer_count: index.offer_count,
            hotels_with_offers_count: hotels_with_offers as u64,
        })
    }

    async fn departure_airports(&self) -> Result<Vec<String>> {
        Ok(self.index.read().departure_airports.iter().cloned().collect())
    }
}
