#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Query parameter sanitisation for the `/crimes` endpoint.
//!
//! [`sanitise`] is the only way to obtain [`ValidatedParameters`] from a
//! request. It checks every recognised parameter in a single pass and
//! reports all problems together, so a client fixing a bad request sees the
//! full list at once. Unrecognised parameters are dropped.

use std::fmt::Display;
use std::ops::RangeInclusive;

use chrono::NaiveDate;
use crime_api_crime_models::{DATE_FORMAT, ID_FIELD};
use crime_api_query_models::{GeoFilter, QueryOption, ValidatedParameters};
use crime_api_server_models::RawParameters;
use thiserror::Error;

/// Longitude of the geo filter centre.
pub const LONGITUDE_PARAM: &str = "longitude";
/// Latitude of the geo filter centre.
pub const LATITUDE_PARAM: &str = "latitude";
/// Geo filter radius in meters.
pub const DISTANCE_PARAM: &str = "distance";
/// First date, or the only date.
pub const DATE1_PARAM: &str = "date1";
/// Second date, or the only date.
pub const DATE2_PARAM: &str = "date2";
/// Crime type filter (repeatable).
pub const CRIME_TYPE_PARAM: &str = "crime-type";
/// Aggregation option.
pub const OPTION_PARAM: &str = "option";
/// Projected fields (repeatable).
pub const FIELDS_PARAM: &str = "fields";

/// Every parameter name the sanitiser understands.
pub const RECOGNISED_PARAMS: &[&str] = &[
    LONGITUDE_PARAM,
    LATITUDE_PARAM,
    DISTANCE_PARAM,
    DATE1_PARAM,
    DATE2_PARAM,
    CRIME_TYPE_PARAM,
    OPTION_PARAM,
    FIELDS_PARAM,
];

const GEO_PARAMS: [&str; 3] = [LONGITUDE_PARAM, LATITUDE_PARAM, DISTANCE_PARAM];
const LONGITUDE_RANGE: RangeInclusive<f64> = -180.0..=180.0;
const LATITUDE_RANGE: RangeInclusive<f64> = -90.0..=90.0;

/// Every problem found with a request's parameters.
///
/// Never empty. Each entry reads `Invalid Request: <parameter> <problem>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .problems.join("; "))]
pub struct ValidationErrors {
    problems: Vec<String>,
}

impl ValidationErrors {
    /// The individual problems, in parameter order.
    #[must_use]
    pub fn problems(&self) -> &[String] {
        &self.problems
    }

    /// Consumes the error, returning the individual problems.
    #[must_use]
    pub fn into_problems(self) -> Vec<String> {
        self.problems
    }
}

/// Accumulates problems over one sanitisation pass.
#[derive(Default)]
struct Problems(Vec<String>);

impl Problems {
    fn invalid(&mut self, param: &str, problem: impl Display) {
        self.0.push(format!("Invalid Request: {param} {problem}"));
    }
}

/// Validates raw `/crimes` parameters.
///
/// A valid `option` replaces any projection, so `fields` is then dropped
/// without being checked.
///
/// # Errors
///
/// Returns [`ValidationErrors`] listing every invalid, out-of-range,
/// repeated, or missing-companion parameter.
pub fn sanitise(raw: &RawParameters) -> Result<ValidatedParameters, ValidationErrors> {
    let mut problems = Problems::default();

    for name in raw.names().filter(|name| !RECOGNISED_PARAMS.contains(name)) {
        log::debug!("Ignoring unrecognised parameter '{name}'");
    }

    let geo = sanitise_geo(raw, &mut problems);
    let date1 = sanitise_date(raw, DATE1_PARAM, &mut problems);
    let date2 = sanitise_date(raw, DATE2_PARAM, &mut problems);
    let crime_types = sanitise_crime_types(raw, &mut problems);
    let option = sanitise_option(raw, &mut problems);
    let fields = if option.is_some() {
        if raw.contains(FIELDS_PARAM) {
            log::debug!("Ignoring '{FIELDS_PARAM}' because '{OPTION_PARAM}' is set");
        }
        Vec::new()
    } else {
        sanitise_fields(raw, &mut problems)
    };

    if !problems.0.is_empty() {
        return Err(ValidationErrors {
            problems: problems.0,
        });
    }

    Ok(ValidatedParameters {
        geo,
        date1,
        date2,
        crime_types,
        option,
        fields,
    })
}

/// Returns the value of a parameter that may appear at most once.
fn single<'a>(raw: &'a RawParameters, param: &str, problems: &mut Problems) -> Option<&'a str> {
    match raw.get_all(param) {
        [] => None,
        [value] => Some(value.as_str()),
        _ => {
            problems.invalid(param, "must be given only once");
            None
        }
    }
}

/// Parses a finite float. `"NaN"` and `"inf"` parse as `f64` but are not
/// usable coordinates or distances. `-0` comes back as `0.0`.
fn parse_finite(value: &str) -> Option<f64> {
    value
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .map(|v| if v == 0.0 { 0.0 } else { v })
}

fn sanitise_coordinate(
    raw: &RawParameters,
    param: &str,
    range: &RangeInclusive<f64>,
    problems: &mut Problems,
) -> Option<f64> {
    let value = single(raw, param, problems)?;
    let parsed = parse_finite(value).filter(|v| range.contains(v));
    if parsed.is_none() {
        problems.invalid(
            param,
            format_args!(
                "must be a number between {} and {}",
                range.start(),
                range.end()
            ),
        );
    }
    parsed
}

fn sanitise_distance(raw: &RawParameters, problems: &mut Problems) -> Option<f64> {
    let value = single(raw, DISTANCE_PARAM, problems)?;
    let parsed = parse_finite(value).filter(|v| *v >= 0.0);
    if parsed.is_none() {
        problems.invalid(DISTANCE_PARAM, "must be a non-negative number of meters");
    }
    parsed
}

/// Validates the geo filter as a unit: either all three parameters are
/// given and valid, or none is given.
fn sanitise_geo(raw: &RawParameters, problems: &mut Problems) -> Option<GeoFilter> {
    let given: Vec<&str> = GEO_PARAMS
        .into_iter()
        .filter(|param| raw.contains(param))
        .collect();
    if given.is_empty() {
        return None;
    }

    let longitude = sanitise_coordinate(raw, LONGITUDE_PARAM, &LONGITUDE_RANGE, problems);
    let latitude = sanitise_coordinate(raw, LATITUDE_PARAM, &LATITUDE_RANGE, problems);
    let distance = sanitise_distance(raw, problems);

    for missing in GEO_PARAMS.iter().filter(|param| !given.contains(param)) {
        problems.invalid(missing, format_args!("is required with {}", given.join(" and ")));
    }

    Some(GeoFilter::new(longitude?, latitude?, distance?))
}

/// Dates must be in the exact storage format; records are compared as
/// strings, so `2023-1-5` would never match `2023-01-05`.
fn sanitise_date(raw: &RawParameters, param: &str, problems: &mut Problems) -> Option<NaiveDate> {
    let value = single(raw, param, problems)?;
    let parsed = NaiveDate::parse_from_str(value, DATE_FORMAT)
        .ok()
        .filter(|date| date.format(DATE_FORMAT).to_string() == value);
    if parsed.is_none() {
        problems.invalid(param, "must be a valid date in YYYY-MM-DD format");
    }
    parsed
}

fn sanitise_crime_types(raw: &RawParameters, problems: &mut Problems) -> Vec<String> {
    let values = raw.get_all(CRIME_TYPE_PARAM);
    if values.iter().any(|value| value.trim().is_empty()) {
        problems.invalid(CRIME_TYPE_PARAM, "must not be empty");
    }
    values.to_vec()
}

fn sanitise_option(raw: &RawParameters, problems: &mut Problems) -> Option<QueryOption> {
    let value = single(raw, OPTION_PARAM, problems)?;
    let parsed = value.parse::<QueryOption>().ok();
    if parsed.is_none() {
        let allowed: Vec<&str> = QueryOption::all().iter().map(AsRef::as_ref).collect();
        problems.invalid(
            OPTION_PARAM,
            format_args!("must be one of {}", allowed.join(", ")),
        );
    }
    parsed
}

fn sanitise_fields(raw: &RawParameters, problems: &mut Problems) -> Vec<String> {
    let values = raw.get_all(FIELDS_PARAM);
    for field in values {
        if field.trim().is_empty() {
            problems.invalid(FIELDS_PARAM, "must not be empty");
        } else if field.starts_with('$') {
            problems.invalid(FIELDS_PARAM, format_args!("'{field}' must not start with '$'"));
        } else if field == ID_FIELD {
            problems.invalid(FIELDS_PARAM, format_args!("must not include {ID_FIELD}"));
        }
    }
    values.to_vec()
}
