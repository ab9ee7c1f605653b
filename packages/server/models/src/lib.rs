#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! API request and response types for the crime API server.
//!
//! These types are the HTTP contract. Validated query parameters live in
//! `crime_api_query_models` so the query builder never depends on the wire
//! format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Query string parameters exactly as received, grouped by name.
///
/// Repeated parameters (`crime-type=a&crime-type=b`) keep every value in
/// the order they appeared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawParameters {
    values: BTreeMap<String, Vec<String>>,
}

impl RawParameters {
    /// Creates an empty parameter set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Appends a value for `name`.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.entry(name.into()).or_default().push(value.into());
    }

    /// Returns every value supplied for `name`, in request order.
    #[must_use]
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values.get(name).map(Vec::as_slice).unwrap_or_default()
    }

    /// Whether `name` was supplied at all.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    /// Iterates over parameter names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RawParameters {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.push(name, value);
        }
        params
    }
}

/// Body of a 400 response for a rejected `/crimes` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiValidationErrors {
    /// Every problem found with the request.
    pub errors: Vec<String>,
}

/// Body of a 500 response. Never carries backend details.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiError {
    /// Short description of the failed operation.
    pub error: String,
}

/// Health check response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiHealth {
    /// Whether the service is healthy.
    pub healthy: bool,
    /// Service version.
    pub version: String,
}
