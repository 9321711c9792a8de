// Core value types shared by ingestion, filtering and both storage backends

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

// Externally assigned hotel identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HotelId(pub u32);

impl fmt::Display for HotelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for HotelId {
    fn from(id: u32) -> Self {
        HotelId(id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hotel {
    pub id: HotelId,
    pub name: String,
    pub stars: f64,
}

/// One bookable package: outbound and inbound flight plus the hotel stay.
///
/// The hotel reference is not checked against the hotel table. An offer for
/// an unknown hotel is valid data that simply never shows up in results
/// joined with hotels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub hotel_id: HotelId,
    pub outbound_departure: DateTime<Utc>,
    pub inbound_departure: DateTime<Utc>,
    pub count_adults: u32,
    pub count_children: u32,
    pub price: f64,
    pub inbound_departure_airport: String,
    pub inbound_arrival_airport: String,
    pub inbound_arrival: DateTime<Utc>,
    pub outbound_departure_airport: String,
    pub outbound_arrival_airport: String,
    pub outbound_arrival: DateTime<Utc>,
    pub meal_type: Option<String>,
    pub ocean_view: Option<bool>,
    pub room_type: Option<String>,
}

impl Offer {
    /// Whole days from outbound departure to inbound departure, truncated
    /// toward zero. Zero and negative values are legal.
    pub fn duration_days(&self) -> i64 {
        let seconds = (self.inbound_departure - self.outbound_departure).num_seconds();
        seconds / SECONDS_PER_DAY
    }
}

// Read-only projection: a hotel with its cheapest matching offer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HotelWithBestOffer {
    pub hotel: Hotel,
    pub best_offer: Offer,
}

impl HotelWithBestOffer {
    pub fn price(&self) -> f64 {
        self.best_offer.price
    }
}
