#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Validated crime query parameters.
//!
//! [`ValidatedParameters`] is the typed form of a `/crimes` request once the
//! sanitiser has accepted it. The query builder consumes it as-is and never
//! re-validates, so every invariant a pipeline relies on is carried by these
//! types: a [`GeoFilter`] exists only with all three of its coordinates, and
//! a [`QueryOption`] can only be one of the supported aggregations.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A radius filter around a coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoFilter {
    /// Longitude of the centre (WGS84, -180 to 180).
    pub longitude: f64,
    /// Latitude of the centre (WGS84, -90 to 90).
    pub latitude: f64,
    /// Maximum distance from the centre in meters.
    pub distance_meters: f64,
}

impl GeoFilter {
    /// Creates a new geo filter.
    #[must_use]
    pub const fn new(longitude: f64, latitude: f64, distance_meters: f64) -> Self {
        Self {
            longitude,
            latitude,
            distance_meters,
        }
    }
}

/// Aggregation a request asks for instead of raw records.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum QueryOption {
    /// A single document holding the number of matching records.
    Count,
    /// One document per month with its record count.
    GroupedMonth,
    /// One summary document per distinct location and street name.
    GroupedLocation,
}

impl QueryOption {
    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::Count, Self::GroupedMonth, Self::GroupedLocation]
    }
}

/// A fully validated `/crimes` request.
///
/// Absent fields mean "no filter". When [`Self::option`] is set,
/// [`Self::fields`] is ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatedParameters {
    /// Radius filter.
    pub geo: Option<GeoFilter>,
    /// First date bound, or the only date when [`Self::date2`] is absent.
    pub date1: Option<NaiveDate>,
    /// Second date bound, or the only date when [`Self::date1`] is absent.
    pub date2: Option<NaiveDate>,
    /// Crime types to keep, in request order.
    pub crime_types: Vec<String>,
    /// Aggregation to apply.
    pub option: Option<QueryOption>,
    /// Attributes to project, in request order.
    pub fields: Vec<String>,
}

impl ValidatedParameters {
    /// Returns the requested date filter, if any.
    #[must_use]
    pub fn date_filter(&self) -> Option<DateFilter> {
        match (self.date1, self.date2) {
            (Some(a), Some(b)) => Some(DateFilter::Range {
                from: a.min(b),
                to: a.max(b),
            }),
            (Some(d), None) | (None, Some(d)) => Some(DateFilter::Exact(d)),
            (None, None) => None,
        }
    }
}

/// Date restriction derived from `date1`/`date2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFilter {
    /// Records on exactly this date.
    Exact(NaiveDate),
    /// Records between `from` and `to`, inclusive. `from <= to` always holds.
    Range {
        /// Earlier bound.
        from: NaiveDate,
        /// Later bound.
        to: NaiveDate,
    },
}
