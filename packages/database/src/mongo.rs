//! MongoDB-backed [`CrimeStore`].

use async_trait::async_trait;
use crime_api_crime_models::LookupAttribute;
use crime_api_query::Pipeline;
use futures::TryStreamExt as _;
use mongodb::Collection;
use mongodb::bson::{Bson, Document};

use crate::{CrimeStore, DbError};

/// Crime records stored in a MongoDB collection.
///
/// The collection handle is cheap to clone and safe to share between
/// concurrent requests.
#[derive(Debug, Clone)]
pub struct MongoCrimeStore {
    collection: Collection<Document>,
}

impl MongoCrimeStore {
    /// Wraps an existing collection handle.
    #[must_use]
    pub const fn new(collection: Collection<Document>) -> Self {
        Self { collection }
    }
}

#[async_trait]
impl CrimeStore for MongoCrimeStore {
    async fn distinct_values(&self, attribute: LookupAttribute) -> Result<Vec<Bson>, DbError> {
        let values = self
            .collection
            .distinct(attribute.field_name(), None, None)
            .await?;
        Ok(values)
    }

    async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>, DbError> {
        let cursor = self.collection.aggregate(pipeline, None).await?;
        let documents = cursor.try_collect().await?;
        Ok(documents)
    }
}
