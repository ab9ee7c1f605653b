//! HTTP handler functions for the crime API.

use actix_web::{HttpRequest, HttpResponse, web};
use crime_api_crime_models::LookupAttribute;
use crime_api_query::build_pipeline;
use crime_api_sanitiser::sanitise;
use crime_api_server_models::{ApiError, ApiHealth, ApiValidationErrors, RawParameters};
use mongodb::bson::{Bson, Document};

use crate::AppState;

/// `GET /health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(ApiHealth {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// `GET /all-crime-types`
pub async fn all_crime_types(state: web::Data<AppState>) -> HttpResponse {
    distinct(&state, LookupAttribute::CrimeType).await
}

/// `GET /all-dates`
pub async fn all_dates(state: web::Data<AppState>) -> HttpResponse {
    distinct(&state, LookupAttribute::Date).await
}

/// `GET /all-year-months`
pub async fn all_year_months(state: web::Data<AppState>) -> HttpResponse {
    distinct(&state, LookupAttribute::YearMonth).await
}

/// `GET /all-falls-within-location`
pub async fn all_falls_within_location(state: web::Data<AppState>) -> HttpResponse {
    distinct(&state, LookupAttribute::FallsWithin).await
}

async fn distinct(state: &AppState, attribute: LookupAttribute) -> HttpResponse {
    match state.store.distinct_values(attribute).await {
        Ok(values) => {
            let values: Vec<serde_json::Value> =
                values.into_iter().map(Bson::into_relaxed_extjson).collect();
            HttpResponse::Ok().json(values)
        }
        Err(e) => {
            log::error!("Failed to list distinct {attribute} values: {e}");
            HttpResponse::InternalServerError().json(ApiError {
                error: format!("Failed to list {attribute} values"),
            })
        }
    }
}

/// `GET /crimes`
///
/// Filters and aggregates crime records. Responds 400 with every problem
/// found if the query string does not validate; the database is not
/// queried in that case.
pub async fn crimes(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let pairs = match web::Query::<Vec<(String, String)>>::from_query(req.query_string()) {
        Ok(pairs) => pairs.into_inner(),
        Err(e) => {
            log::debug!("Malformed /crimes query string: {e}");
            return HttpResponse::BadRequest().json(ApiValidationErrors {
                errors: vec!["Invalid Request: malformed query string".to_string()],
            });
        }
    };
    let raw: RawParameters = pairs.into_iter().collect();

    let params = match sanitise(&raw) {
        Ok(params) => params,
        Err(errors) => {
            log::debug!("Rejected /crimes request: {errors}");
            return HttpResponse::BadRequest().json(ApiValidationErrors {
                errors: errors.into_problems(),
            });
        }
    };

    match state.store.aggregate(build_pipeline(&params)).await {
        Ok(documents) => {
            let documents: Vec<serde_json::Value> =
                documents.into_iter().map(document_to_json).collect();
            HttpResponse::Ok().json(documents)
        }
        Err(e) => {
            log::error!("Failed to query crimes: {e}");
            HttpResponse::InternalServerError().json(ApiError {
                error: "Failed to query crimes".to_string(),
            })
        }
    }
}

/// Relaxed extended JSON: numbers stay numbers, `ObjectId`s and dates
/// become `{"$oid": ...}` / `{"$date": ...}`.
fn document_to_json(document: Document) -> serde_json::Value {
    Bson::Document(document).into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use actix_web::http::StatusCode;
    use actix_web::{App, test};
    use async_trait::async_trait;
    use crime_api_database::memory::MemoryCrimeStore;
    use crime_api_database::{CrimeStore, DbError};
    use crime_api_query::Pipeline;
    use mongodb::bson::{doc, oid::ObjectId};
    use serde_json::{Value, json};

    use super::*;
    use crate::configure;

    /// Records every pipeline it is asked to run and returns nothing.
    #[derive(Default)]
    struct RecordingStore {
        pipelines: Mutex<Vec<Pipeline>>,
    }

    #[async_trait]
    impl CrimeStore for RecordingStore {
        async fn distinct_values(
            &self,
            _attribute: LookupAttribute,
        ) -> Result<Vec<Bson>, DbError> {
            Ok(Vec::new())
        }

        async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>, DbError> {
            self.pipelines.lock().unwrap().push(pipeline);
            Ok(Vec::new())
        }
    }

    struct FailingStore;

    #[async_trait]
    impl CrimeStore for FailingStore {
        async fn distinct_values(
            &self,
            _attribute: LookupAttribute,
        ) -> Result<Vec<Bson>, DbError> {
            Err(DbError::Pipeline {
                message: "connection reset by 10.0.0.7".to_string(),
            })
        }

        async fn aggregate(&self, _pipeline: Pipeline) -> Result<Vec<Document>, DbError> {
            Err(DbError::Pipeline {
                message: "connection reset by 10.0.0.7".to_string(),
            })
        }
    }

    fn record(crime_type: &str, date: &str, street: &str, (lng, lat): (f64, f64)) -> Document {
        doc! {
            "_id": ObjectId::new(),
            "crime_type": crime_type,
            "date": date,
            "month": &date[..7],
            "falls_within": "Greater Manchester Police",
            "street_name": street,
            "location": { "type": "Point", "coordinates": [lng, lat] },
        }
    }

    fn records() -> Vec<Document> {
        let deansgate = (-2.2480, 53.4794);
        let oxford_road = (-2.2386, 53.4722);
        vec![
            record("Burglary", "2023-01-04", "Deansgate", deansgate),
            record("Robbery", "2023-01-19", "Deansgate", deansgate),
            record("Burglary", "2023-02-11", "Deansgate", deansgate),
            record("Burglary", "2023-02-12", "Oxford Road", oxford_road),
            record("Shoplifting", "2023-03-01", "Oxford Road", oxford_road),
        ]
    }

    fn state(store: Arc<dyn CrimeStore>) -> web::Data<AppState> {
        web::Data::new(AppState { store })
    }

    async fn get(state: web::Data<AppState>, uri: &str) -> (StatusCode, Value) {
        let app = test::init_service(App::new().app_data(state).configure(configure)).await;
        let resp = test::call_service(&app, test::TestRequest::get().uri(uri).to_request()).await;
        let status = resp.status();
        let body: Value = test::read_body_json(resp).await;
        (status, body)
    }

    #[actix_web::test]
    async fn health_reports_version() {
        let (status, body) = get(state(Arc::new(RecordingStore::default())), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["healthy"], json!(true));
        assert_eq!(body["version"], json!(env!("CARGO_PKG_VERSION")));
    }

    #[actix_web::test]
    async fn lookups_list_distinct_values() {
        let store = Arc::new(MemoryCrimeStore::new(records()));

        let (status, body) = get(state(store.clone()), "/all-crime-types").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["Burglary", "Robbery", "Shoplifting"]));

        let (_, body) = get(state(store.clone()), "/all-year-months").await;
        assert_eq!(body, json!(["2023-01", "2023-02", "2023-03"]));

        let (_, body) = get(state(store.clone()), "/all-dates").await;
        assert_eq!(body.as_array().unwrap().len(), 5);

        let (_, body) = get(state(store), "/all-falls-within-location").await;
        assert_eq!(body, json!(["Greater Manchester Police"]));
    }

    #[actix_web::test]
    async fn crimes_builds_date_then_type_stages() {
        let store = Arc::new(RecordingStore::default());
        let (status, _) = get(
            state(store.clone()),
            "/crimes?crime-type=burglary&crime-type=robbery&date1=2023-02-01&date2=2023-01-01",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let pipelines = store.pipelines.lock().unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(
            pipelines[0].stages(),
            &[
                doc! { "$match": { "date": { "$gte": "2023-01-01", "$lte": "2023-02-01" } } },
                doc! { "$match": { "crime_type": { "$in": ["burglary", "robbery"] } } },
            ]
        );
    }

    #[actix_web::test]
    async fn option_ignores_fields() {
        let store = Arc::new(RecordingStore::default());
        let (status, _) = get(state(store.clone()), "/crimes?option=count&fields=_id").await;
        assert_eq!(status, StatusCode::OK);

        let pipelines = store.pipelines.lock().unwrap();
        assert_eq!(pipelines[0].stages(), &[doc! { "$count": "count" }]);
    }

    #[actix_web::test]
    async fn invalid_longitude_is_rejected_before_querying() {
        let store = Arc::new(RecordingStore::default());
        let (status, body) = get(state(store.clone()), "/crimes?longitude=200").await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let errors: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e.as_str().unwrap())
            .collect();
        assert!(errors.iter().any(|e| e.contains("longitude must be")));
        assert!(errors.iter().any(|e| e.contains("latitude is required")));
        assert!(errors.iter().any(|e| e.contains("distance is required")));
        assert!(store.pipelines.lock().unwrap().is_empty());
    }

    #[actix_web::test]
    async fn unknown_option_is_rejected() {
        let (status, body) = get(
            state(Arc::new(RecordingStore::default())),
            "/crimes?option=grouped-street",
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"].as_array().unwrap().len(), 1);
    }

    #[actix_web::test]
    async fn no_parameters_return_every_record() {
        let (status, body) = get(state(Arc::new(MemoryCrimeStore::new(records()))), "/crimes").await;
        assert_eq!(status, StatusCode::OK);

        let documents = body.as_array().unwrap();
        assert_eq!(documents.len(), 5);
        assert!(documents[0]["_id"]["$oid"].is_string());
        assert_eq!(documents[0]["location"]["coordinates"], json!([-2.248, 53.4794]));
    }

    #[actix_web::test]
    async fn grouped_location_totals_match_type_counts() {
        let (status, body) = get(
            state(Arc::new(MemoryCrimeStore::new(records()))),
            "/crimes?option=grouped-location&fields=street_name",
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let summaries = body.as_array().unwrap();
        assert_eq!(summaries.len(), 2);
        for summary in summaries {
            let crime_types = summary["crime-types"].as_array().unwrap();
            assert!(!crime_types.is_empty());

            let per_type: i64 = crime_types
                .iter()
                .map(|entry| {
                    let (_, count) = entry.as_str().unwrap().rsplit_once(": ").unwrap();
                    count.parse::<i64>().unwrap()
                })
                .sum();
            assert_eq!(summary["location_total"].as_i64().unwrap(), per_type);
        }
    }

    #[actix_web::test]
    async fn count_within_radius() {
        let (status, body) = get(
            state(Arc::new(MemoryCrimeStore::new(records()))),
            "/crimes?longitude=-2.2480&latitude=53.4794&distance=200&option=count",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "count": 3 }]));
    }

    #[actix_web::test]
    async fn backend_failure_is_opaque_500() {
        let (status, body) = get(state(Arc::new(FailingStore)), "/crimes?option=count").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, json!({ "error": "Failed to query crimes" }));

        let (status, body) = get(state(Arc::new(FailingStore)), "/all-dates").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.to_string().contains("10.0.0.7"));
    }
}
