// Deterministic synthetic hotels and offers: weekly departures from FRA to
// PMI, seven-day stays, prices rising with departure week and hotel id

use crate::models::{Hotel, HotelId, Offer};
use chrono::{DateTime, Duration, Utc};

pub fn generate_hotels(count: u32) -> Vec<Hotel> {
    (1..=count)
        .map(|id| Hotel {
            id: HotelId(id),
            name: format!("Sample Hotel {}", id),
            stars: f64::from(id % 5 + 1),
        })
        .collect()
}

/// `offers_per_hotel` offers for hotels `1..=hotel_count`. Offer `i` departs
/// `7 * (i + 1)` days after `start` and costs `800 + 100 * i + 50 * hotel_id`.
pub fn generate_offers(hotel_count: u32, offers_per_hotel: u32, start: DateTime<Utc>) -> Vec<Offer> {
    let mut offers = Vec::with_capacity((hotel_count * offers_per_hotel) as usize);
    for hotel_id in 1..=hotel_count {
        for i in 0..offers_per_hotel {
            let departure = start + Duration::days(7 + i64::from(i) * 7);
            let inbound = departure + Duration::days(7);
            offers.push(Offer {
                hotel_id: HotelId(hotel_id),
                outbound_departure: departure,
                inbound_departure: inbound,
                count_adults: 2,
                count_children: 0,
                price: f64::from(800 + i * 100 + hotel_id * 50),
                inbound_departure_airport: "PMI".to_string(),
                inbound_arrival_airport: "FRA".to_string(),
                inbound_arrival: inbound + Duration::hours(2),
                outbound_departure_airport: "FRA".to_string(),
                outbound_arrival_airport: "PMI".to_string(),
                outbound_arrival: departure + Duration::hours(2),
                meal_type: None,
                ocean_view: None,
                room_type: None,
            });
        }
    }
    offers
}
