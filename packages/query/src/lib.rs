#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Aggregation pipeline construction for crime queries.
//!
//! [`build_pipeline`] turns [`ValidatedParameters`] into the ordered list of
//! MongoDB aggregation stages for a `/crimes` request. Stage order is fixed:
//!
//! 1. `$geoNear` (must be the first stage of any pipeline that uses it)
//! 2. date `$match`
//! 3. crime type `$match`
//! 4. the option stage(s), or else the field `$project`
//!
//! An empty pipeline is valid and returns every record.

use crime_api_crime_models::{
    CRIME_TYPE_FIELD, DATE_FIELD, DATE_FORMAT, DISTANCE_FIELD, ID_FIELD, LOCATION_FIELD,
    MONTH_FIELD, STREET_NAME_FIELD,
};
use crime_api_query_models::{DateFilter, GeoFilter, QueryOption, ValidatedParameters};
use mongodb::bson::{Document, doc};

/// Output field of the `count` option.
pub const COUNT_FIELD: &str = "count";

/// Per-location record total emitted by the `grouped-location` option.
pub const LOCATION_TOTAL_FIELD: &str = "location_total";

/// Set of `"<crime type>: <count>"` strings emitted by the
/// `grouped-location` option.
pub const CRIME_TYPES_FIELD: &str = "crime-types";

/// An ordered list of aggregation stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    stages: Vec<Document>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub const fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Appends a stage.
    pub fn push(&mut self, stage: Document) {
        self.stages.push(stage);
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[Document] {
        &self.stages
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Whether the pipeline has no stages (matches every record).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl Extend<Document> for Pipeline {
    fn extend<T: IntoIterator<Item = Document>>(&mut self, iter: T) {
        self.stages.extend(iter);
    }
}

impl IntoIterator for Pipeline {
    type Item = Document;
    type IntoIter = std::vec::IntoIter<Document>;

    fn into_iter(self) -> Self::IntoIter {
        self.stages.into_iter()
    }
}

/// Builds the aggregation pipeline for a validated `/crimes` request.
#[must_use]
pub fn build_pipeline(params: &ValidatedParameters) -> Pipeline {
    let mut pipeline = Pipeline::new();

    if let Some(geo) = &params.geo {
        pipeline.push(geo_stage(geo));
    }

    if let Some(filter) = params.date_filter() {
        pipeline.push(date_stage(filter));
    }

    if !params.crime_types.is_empty() {
        pipeline.push(crime_type_stage(&params.crime_types));
    }

    match params.option {
        Some(option) => pipeline.extend(option_stages(option)),
        None if !params.fields.is_empty() => pipeline.push(projection_stage(&params.fields)),
        None => {}
    }

    log::trace!("Built pipeline with {} stage(s)", pipeline.len());

    pipeline
}

/// `"$field"` reference to a field of the current document.
fn field_ref(field: &str) -> String {
    format!("${field}")
}

fn geo_stage(geo: &GeoFilter) -> Document {
    doc! {
        "$geoNear": {
            "near": {
                "type": "Point",
                "coordinates": [geo.longitude, geo.latitude],
            },
            "distanceField": DISTANCE_FIELD,
            "maxDistance": geo.distance_meters,
            "spherical": true,
        }
    }
}

fn date_stage(filter: DateFilter) -> Document {
    match filter {
        DateFilter::Exact(date) => doc! {
            "$match": { DATE_FIELD: date.format(DATE_FORMAT).to_string() }
        },
        DateFilter::Range { from, to } => doc! {
            "$match": {
                DATE_FIELD: {
                    "$gte": from.format(DATE_FORMAT).to_string(),
                    "$lte": to.format(DATE_FORMAT).to_string(),
                }
            }
        },
    }
}

fn crime_type_stage(crime_types: &[String]) -> Document {
    doc! {
        "$match": { CRIME_TYPE_FIELD: { "$in": crime_types.to_vec() } }
    }
}

fn option_stages(option: QueryOption) -> Vec<Document> {
    match option {
        QueryOption::Count => vec![doc! { "$count": COUNT_FIELD }],
        QueryOption::GroupedMonth => vec![doc! {
            "$group": {
                ID_FIELD: field_ref(MONTH_FIELD),
                COUNT_FIELD: { "$sum": 1 },
            }
        }],
        QueryOption::GroupedLocation => grouped_location_stages(),
    }
}

/// Summarises records per (location, street name).
///
/// Records are first counted per (location, crime type), each pair is then
/// rendered as a `"<crime type>: <count>"` string, and finally the pairs
/// are folded into one document per location holding the total and the set
/// of those strings.
fn grouped_location_stages() -> Vec<Document> {
    const CRIME_TYPE: &str = "crime-type";
    const STREET_NAME: &str = "street-name";
    const CRIME_AND_COUNT: &str = "crime-and-loc";

    vec![
        doc! {
            "$group": {
                ID_FIELD: {
                    LOCATION_FIELD: field_ref(LOCATION_FIELD),
                    CRIME_TYPE: field_ref(CRIME_TYPE_FIELD),
                },
                LOCATION_TOTAL_FIELD: { "$sum": 1 },
                STREET_NAME: { "$first": field_ref(STREET_NAME_FIELD) },
            }
        },
        doc! {
            "$project": {
                LOCATION_FIELD: format!("$_id.{LOCATION_FIELD}"),
                CRIME_TYPE: format!("$_id.{CRIME_TYPE}"),
                COUNT_FIELD: { "$toString": field_ref(LOCATION_TOTAL_FIELD) },
                LOCATION_TOTAL_FIELD: field_ref(LOCATION_TOTAL_FIELD),
                STREET_NAME: field_ref(STREET_NAME),
                ID_FIELD: 0,
            }
        },
        doc! {
            "$project": {
                CRIME_AND_COUNT: {
                    "$concat": [field_ref(CRIME_TYPE), ": ", field_ref(COUNT_FIELD)]
                },
                LOCATION_FIELD: 1,
                LOCATION_TOTAL_FIELD: 1,
                STREET_NAME: 1,
            }
        },
        doc! {
            "$group": {
                ID_FIELD: {
                    LOCATION_FIELD: field_ref(LOCATION_FIELD),
                    STREET_NAME: field_ref(STREET_NAME),
                },
                LOCATION_TOTAL_FIELD: { "$sum": field_ref(LOCATION_TOTAL_FIELD) },
                CRIME_TYPES_FIELD: { "$addToSet": field_ref(CRIME_AND_COUNT) },
            }
        },
    ]
}

fn projection_stage(fields: &[String]) -> Document {
    let mut projection = doc! { ID_FIELD: 0 };
    for field in fields {
        projection.insert(field.as_str(), 1);
    }
    doc! { "$project": projection }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use mongodb::bson::Bson;

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn stage_name(stage: &Document) -> &str {
        stage.keys().next().map(String::as_str).unwrap()
    }

    #[test]
    fn empty_parameters_build_empty_pipeline() {
        let pipeline = build_pipeline(&ValidatedParameters::default());
        assert!(pipeline.is_empty());
    }

    #[test]
    fn swapped_dates_build_identical_pipeline() {
        let forward = ValidatedParameters {
            date1: Some(date("2023-01-01")),
            date2: Some(date("2023-02-01")),
            ..Default::default()
        };
        let backward = ValidatedParameters {
            date1: Some(date("2023-02-01")),
            date2: Some(date("2023-01-01")),
            ..Default::default()
        };

        let pipeline = build_pipeline(&backward);
        assert_eq!(pipeline, build_pipeline(&forward));
        assert_eq!(
            pipeline.stages(),
            &[doc! {
                "$match": { "date": { "$gte": "2023-01-01", "$lte": "2023-02-01" } }
            }]
        );
    }

    #[test]
    fn single_date_matches_exactly() {
        let params = ValidatedParameters {
            date2: Some(date("2023-05-09")),
            ..Default::default()
        };
        assert_eq!(
            build_pipeline(&params).stages(),
            &[doc! { "$match": { "date": "2023-05-09" } }]
        );
    }

    #[test]
    fn stages_follow_geo_date_type_order() {
        let params = ValidatedParameters {
            geo: Some(GeoFilter::new(-1.5, 53.8, 500.0)),
            date1: Some(date("2023-02-01")),
            date2: Some(date("2023-01-01")),
            crime_types: vec!["burglary".to_string(), "robbery".to_string()],
            ..Default::default()
        };

        let pipeline = build_pipeline(&params);
        let names: Vec<&str> = pipeline.stages().iter().map(stage_name).collect();
        assert_eq!(names, ["$geoNear", "$match", "$match"]);

        assert_eq!(
            pipeline.stages()[0],
            doc! {
                "$geoNear": {
                    "near": { "type": "Point", "coordinates": [-1.5, 53.8] },
                    "distanceField": "dist.calculated",
                    "maxDistance": 500.0,
                    "spherical": true,
                }
            }
        );
        assert_eq!(
            pipeline.stages()[2],
            doc! { "$match": { "crime_type": { "$in": ["burglary", "robbery"] } } }
        );
    }

    #[test]
    fn zero_distance_is_kept() {
        let params = ValidatedParameters {
            geo: Some(GeoFilter::new(0.0, 0.0, 0.0)),
            ..Default::default()
        };
        let pipeline = build_pipeline(&params);
        let geo_near = pipeline.stages()[0].get_document("$geoNear").unwrap();
        assert_eq!(geo_near.get("maxDistance"), Some(&Bson::Double(0.0)));
    }

    #[test]
    fn count_option_appends_single_count_stage() {
        let params = ValidatedParameters {
            crime_types: vec!["Drugs".to_string()],
            option: Some(QueryOption::Count),
            ..Default::default()
        };
        let pipeline = build_pipeline(&params);
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stages()[1], doc! { "$count": "count" });
    }

    #[test]
    fn grouped_month_groups_by_month() {
        let params = ValidatedParameters {
            option: Some(QueryOption::GroupedMonth),
            ..Default::default()
        };
        assert_eq!(
            build_pipeline(&params).stages(),
            &[doc! { "$group": { "_id": "$month", "count": { "$sum": 1 } } }]
        );
    }

    #[test]
    fn grouped_location_appends_four_stages() {
        let params = ValidatedParameters {
            option: Some(QueryOption::GroupedLocation),
            ..Default::default()
        };
        let pipeline = build_pipeline(&params);
        let names: Vec<&str> = pipeline.stages().iter().map(stage_name).collect();
        assert_eq!(names, ["$group", "$project", "$project", "$group"]);

        let last = pipeline.stages()[3].get_document("$group").unwrap();
        assert_eq!(
            last.get_document("_id").unwrap(),
            &doc! { "location": "$location", "street-name": "$street-name" }
        );
        assert_eq!(
            last.get_document("crime-types").unwrap(),
            &doc! { "$addToSet": "$crime-and-loc" }
        );
    }

    #[test]
    fn fields_project_named_attributes_without_id() {
        let params = ValidatedParameters {
            fields: vec!["crime_type".to_string(), "street_name".to_string()],
            ..Default::default()
        };
        assert_eq!(
            build_pipeline(&params).stages(),
            &[doc! { "$project": { "_id": 0, "crime_type": 1, "street_name": 1 } }]
        );
    }

    #[test]
    fn option_suppresses_field_projection() {
        for option in QueryOption::all() {
            let params = ValidatedParameters {
                option: Some(*option),
                fields: vec!["crime_type".to_string()],
                ..Default::default()
            };
            let pipeline = build_pipeline(&params);
            let without_fields = build_pipeline(&ValidatedParameters {
                fields: Vec::new(),
                ..params
            });
            assert_eq!(pipeline, without_fields, "{option} picked up fields");
        }
    }
}
