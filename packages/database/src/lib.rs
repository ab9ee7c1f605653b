#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Storage access for crime records.
//!
//! The server only ever needs two read operations, captured by
//! [`CrimeStore`]: listing the distinct values of one attribute and running
//! an aggregation [`Pipeline`]. [`mongo::MongoCrimeStore`] runs them against
//! a MongoDB collection; [`memory::MemoryCrimeStore`] evaluates them over an
//! in-process list of documents.

pub mod db;
pub mod memory;
pub mod mongo;

use async_trait::async_trait;
use crime_api_crime_models::LookupAttribute;
use crime_api_query::Pipeline;
use mongodb::bson::{Bson, Document};

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// MongoDB driver error.
    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// The pipeline could not be evaluated.
    #[error("Pipeline error: {message}")]
    Pipeline {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    pub(crate) fn pipeline(message: impl Into<String>) -> Self {
        Self::Pipeline {
            message: message.into(),
        }
    }
}

/// Read access to the crime record collection.
#[async_trait]
pub trait CrimeStore: Send + Sync {
    /// Returns every distinct value of `attribute` across all records.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend query fails.
    async fn distinct_values(&self, attribute: LookupAttribute) -> Result<Vec<Bson>, DbError>;

    /// Runs `pipeline` over all records and returns the resulting documents.
    ///
    /// An empty pipeline returns every record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend rejects or fails the pipeline.
    async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>, DbError>;
}
