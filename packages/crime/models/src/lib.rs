#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Crime record schema shared across the crime API.
//!
//! Records live in a single document collection and are never written by
//! this system. The attribute names below are the ones the collection was
//! loaded with; every query stage and lookup refers to them through these
//! constants rather than string literals.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Identifier field the document store assigns to every record.
pub const ID_FIELD: &str = "_id";

/// Free-text crime type (e.g. `"Burglary"`).
pub const CRIME_TYPE_FIELD: &str = "crime_type";

/// Calendar date of the record, stored as a `YYYY-MM-DD` string.
pub const DATE_FIELD: &str = "date";

/// Year and month of the record, stored as a `YYYY-MM` string.
pub const MONTH_FIELD: &str = "month";

/// Police force whose jurisdiction the record falls within.
pub const FALLS_WITHIN_FIELD: &str = "falls_within";

/// GeoJSON `Point` of the record, indexed with a 2dsphere index.
pub const LOCATION_FIELD: &str = "location";

/// Approximate street name of the record.
pub const STREET_NAME_FIELD: &str = "street_name";

/// Output path the geo stage writes each record's computed distance to.
pub const DISTANCE_FIELD: &str = "dist.calculated";

/// Storage format of [`DATE_FIELD`] values.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Record attributes that can be listed with a distinct-values lookup.
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
pub enum LookupAttribute {
    /// Every crime type present in the collection.
    CrimeType,
    /// Every record date.
    Date,
    /// Every year-month.
    YearMonth,
    /// Every jurisdiction records fall within.
    FallsWithin,
}

impl LookupAttribute {
    /// Returns the record field this lookup reads.
    #[must_use]
    pub const fn field_name(self) -> &'static str {
        match self {
            Self::CrimeType => CRIME_TYPE_FIELD,
            Self::Date => DATE_FIELD,
            Self::YearMonth => MONTH_FIELD,
            Self::FallsWithin => FALLS_WITHIN_FIELD,
        }
    }

    /// Returns all variants of this enum.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[Self::CrimeType, Self::Date, Self::YearMonth, Self::FallsWithin]
    }
}
