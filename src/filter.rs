// Search predicate applied to offers. Every constraint is optional, an empty
// predicate matches everything.

use crate::models::Offer;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FilterPredicate {
    pub departure_airports: Vec<String>,
    pub earliest_departure: Option<DateTime<Utc>>,
    pub latest_return: Option<DateTime<Utc>>,
    pub count_adults: Option<u32>,
    pub count_children: Option<u32>,
    pub duration: Option<u32>,
}

// Zero counts the same as unset
fn exact(constraint: Option<u32>) -> Option<u32> {
    constraint.filter(|value| *value > 0)
}

impl FilterPredicate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_airports<I, S>(mut self, airports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.departure_airports = airports.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_earliest_departure(mut self, bound: DateTime<Utc>) -> Self {
        self.earliest_departure = Some(bound);
        self
    }

    pub fn with_latest_return(mut self, bound: DateTime<Utc>) -> Self {
        self.latest_return = Some(bound);
        self
    }

    pub fn with_adults(mut self, count: u32) -> Self {
        self.count_adults = Some(count);
        self
    }

    pub fn with_children(mut self, count: u32) -> Self {
        self.count_children = Some(count);
        self
    }

    pub fn with_duration(mut self, days: u32) -> Self {
        self.duration = Some(days);
        self
    }

    pub fn is_unconstrained(&self) -> bool {
        self.departure_airports.is_empty()
            && self.earliest_departure.is_none()
            && self.latest_return.is_none()
            && exact(self.count_adults).is_none()
            && exact(self.count_children).is_none()
            && exact(self.duration).is_none()
    }

    /// True when the offer satisfies every set constraint. Stops at the
    /// first failing check.
    pub fn matches(&self, offer: &Offer) -> bool {
        if !self.departure_airports.is_empty()
            && !self
                .departure_airports
                .iter()
                .any(|airport| *airport == offer.outbound_departure_airport)
        {
            return false;
        }

        if !self
            .earliest_departure
            .map_or(true, |bound| offer.outbound_departure >= bound)
        {
            return false;
        }

        if !self
            .latest_return
            .map_or(true, |bound| offer.inbound_departure <= bound)
        {
            return false;
        }

        if !exact(self.count_adults).map_or(true, |count| offer.count_adults == count) {
            return false;
        }

        if !exact(self.count_children).map_or(true, |count| offer.count_children == count) {
            return false;
        }

        exact(self.duration).map_or(true, |days| offer.duration_days() == i64::from(days))
    }
}
