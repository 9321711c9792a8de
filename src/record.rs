// Record parsing: one delimited row in, one typed Hotel or Offer out.
// Nothing in here logs or touches I/O, callers decide what to do with failures.

use crate::models::{Hotel, HotelId, Offer};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed {field}: '{value}' ({reason})")]
pub struct MalformedRecord {
    pub field: &'static str,
    pub value: String,
    pub reason: String,
}

impl MalformedRecord {
    pub fn new(field: &'static str, value: &str, reason: impl Into<String>) -> Self {
        Self {
            field,
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

// Accepted timestamp layouts, tried in order
#[derive(Debug, Clone, Copy)]
enum TimestampLayout {
    Rfc3339,
    DateTime(&'static str),
    Date(&'static str),
}

const TIMESTAMP_LAYOUTS: &[TimestampLayout] = &[
    TimestampLayout::Rfc3339,
    TimestampLayout::DateTime("%Y-%m-%dT%H:%M:%S"),
    TimestampLayout::DateTime("%Y-%m-%dT%H:%M:%S%.f"),
    TimestampLayout::DateTime("%Y-%m-%d %H:%M:%S"),
    TimestampLayout::DateTime("%Y-%m-%d %H:%M:%S%.f"),
    TimestampLayout::Date("%Y-%m-%d"),
    TimestampLayout::DateTime("%d.%m.%Y %H:%M:%S"),
    TimestampLayout::Date("%d.%m.%Y"),
];

impl TimestampLayout {
    fn parse(self, value: &str) -> Option<DateTime<Utc>> {
        match self {
            TimestampLayout::Rfc3339 => DateTime::parse_from_rfc3339(value)
                .ok()
                .map(|t| t.with_timezone(&Utc)),
            TimestampLayout::DateTime(format) => NaiveDateTime::parse_from_str(value, format)
                .ok()
                .map(|t| t.and_utc()),
            TimestampLayout::Date(format) => NaiveDate::parse_from_str(value, format)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|t| t.and_utc()),
        }
    }
}

/// Parse a timestamp using the first layout that accepts it.
///
/// Values without zone information are taken as UTC, date-only values as
/// midnight UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    TIMESTAMP_LAYOUTS
        .iter()
        .find_map(|layout| layout.parse(value))
}

pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "true" | "1" | "yes" | "y"
    )
}

/// Turns a raw row into a typed record.
pub trait RecordParser: Send + Sync {
    type Record: Send;

    // Rows with fewer columns are skipped without being parsed
    fn min_columns(&self) -> usize;

    fn parse(&self, row: &StringRecord) -> Result<Self::Record, MalformedRecord>;
}

fn field<'a>(row: &'a StringRecord, index: usize, name: &'static str) -> Result<&'a str, MalformedRecord> {
    row.get(index)
        .map(str::trim)
        .ok_or_else(|| MalformedRecord::new(name, "", format!("missing column {}", index)))
}

fn parse_hotel_id(value: &str, name: &'static str) -> Result<HotelId, MalformedRecord> {
    value
        .parse::<u32>()
        .map(HotelId)
        .map_err(|e| MalformedRecord::new(name, value, e.to_string()))
}

fn parse_count(value: &str, name: &'static str) -> Result<u32, MalformedRecord> {
    value
        .parse::<u32>()
        .map_err(|e| MalformedRecord::new(name, value, e.to_string()))
}

fn parse_amount(value: &str, name: &'static str) -> Result<f64, MalformedRecord> {
    let amount = value
        .parse::<f64>()
        .map_err(|e| MalformedRecord::new(name, value, e.to_string()))?;
    if !amount.is_finite() || amount < 0.0 {
        return Err(MalformedRecord::new(name, value, "must be a non-negative number"));
    }
    Ok(amount)
}

fn parse_time_field(value: &str, name: &'static str) -> Result<DateTime<Utc>, MalformedRecord> {
    parse_timestamp(value).ok_or_else(|| MalformedRecord::new(name, value, "unknown timestamp format"))
}

fn optional_text(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

// Hotel rows: id;name;stars
#[derive(Debug, Clone, Copy, Default)]
pub struct HotelParser;

impl RecordParser for HotelParser {
    type Record = Hotel;

    fn min_columns(&self) -> usize {
        3
    }

    fn parse(&self, row: &StringRecord) -> Result<Hotel, MalformedRecord> {
        let id = parse_hotel_id(field(row, 0, "hotelid")?, "hotelid")?;
        let name = field(row, 1, "hotelname")?.to_string();
        let stars = parse_amount(field(row, 2, "hotelstars")?, "hotelstars")?;
        Ok(Hotel { id, name, stars })
    }
}

/// Column positions of the offers file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OfferColumns {
    pub hotel_id: usize,
    pub outbound_departure: usize,
    pub inbound_departure: usize,
    pub count_adults: usize,
    pub count_children: usize,
    pub price: usize,
    pub inbound_departure_airport: usize,
    pub inbound_arrival_airport: usize,
    pub inbound_arrival: usize,
    pub outbound_departure_airport: usize,
    pub outbound_arrival_airport: usize,
    pub outbound_arrival: usize,
    pub meal_type: usize,
    pub ocean_view: usize,
    pub room_type: usize,
}

impl Default for OfferColumns {
    fn default() -> Self {
        Self {
            hotel_id: 0,
            outbound_departure: 1,
            inbound_departure: 2,
            count_adults: 3,
            count_children: 4,
            price: 5,
            inbound_departure_airport: 6,
            inbound_arrival_airport: 7,
            inbound_arrival: 8,
            outbound_departure_airport: 9,
            outbound_arrival_airport: 10,
            outbound_arrival: 11,
            meal_type: 12,
            ocean_view: 13,
            room_type: 14,
        }
    }
}

impl OfferColumns {
    pub fn width(&self) -> usize {
        [
            self.hotel_id,
            self.outbound_departure,
            self.inbound_departure,
            self.count_adults,
            self.count_children,
            self.price,
            self.inbound_departure_airport,
            self.inbound_arrival_airport,
            self.inbound_arrival,
            self.outbound_departure_airport,
            self.outbound_arrival_airport,
            self.outbound_arrival,
            self.meal_type,
            self.ocean_view,
            self.room_type,
        ]
        .into_iter()
        .max()
        .map_or(0, |last| last + 1)
    }
}

#[derive(Debug, Clone, Default)]
pub struct OfferParser {
    columns: OfferColumns,
}

impl OfferParser {
    pub fn new(columns: OfferColumns) -> Self {
        Self { columns }
    }
}

impl RecordParser for OfferParser {
    type Record = Offer;

    fn min_columns(&self) -> usize {
        self.columns.width()
    }

    fn parse(&self, row: &StringRecord) -> Result<Offer, MalformedRecord> {
        let c = &self.columns;
        let text = |index: usize, name: &'static str| field(row, index, name);

        Ok(Offer {
            hotel_id: parse_hotel_id(text(c.hotel_id, "hotelid")?, "hotelid")?,
            outbound_departure: parse_time_field(
                text(c.outbound_departure, "outbounddeparturedatetime")?,
                "outbounddeparturedatetime",
            )?,
            inbound_departure: parse_time_field(
                text(c.inbound_departure, "inbounddeparturedatetime")?,
                "inbounddeparturedatetime",
            )?,
            count_adults: parse_count(text(c.count_adults, "countadults")?, "countadults")?,
            count_children: parse_count(text(c.count_children, "countchildren")?, "countchildren")?,
            price: parse_amount(text(c.price, "price")?, "price")?,
            inbound_departure_airport: text(c.inbound_departure_airport, "inbounddepartureairport")?
                .to_string(),
            inbound_arrival_airport: text(c.inbound_arrival_airport, "inboundarrivalairport")?
                .to_string(),
            inbound_arrival: parse_time_field(
                text(c.inbound_arrival, "inboundarrivaldatetime")?,
                "inboundarrivaldatetime",
            )?,
            outbound_departure_airport: text(c.outbound_departure_airport, "outbounddepartureairport")?
                .to_string(),
            outbound_arrival_airport: text(c.outbound_arrival_airport, "outboundarrivalairport")?
                .to_string(),
            outbound_arrival: parse_time_field(
                text(c.outbound_arrival, "outboundarrivaldatetime")?,
                "outboundarrivaldatetime",
            )?,
            meal_type: optional_text(text(c.meal_type, "mealtype")?),
            ocean_view: Some(text(c.ocean_view, "oceanview")?)
                .filter(|v| !v.is_empty())
                .map(parse_bool),
            room_type: optional_text(text(c.room_type, "roomtype")?),
        })
    }
}
