//! In-memory [`CrimeStore`].
//!
//! Evaluates aggregation pipelines over a list of documents without a
//! database server. Only the part of the aggregation language the query
//! builder produces is understood:
//!
//! * stages: `$geoNear`, `$match`, `$count`, `$group`, `$project`
//! * query operators: `$eq`, `$gte`, `$lte`, `$in`
//! * accumulators: `$sum`, `$first`, `$addToSet`
//! * expressions: field paths, `$toString`, `$concat`
//!
//! Anything else fails with [`DbError::Pipeline`], the same way MongoDB
//! rejects a pipeline it cannot run.

use std::cmp::Ordering;

use async_trait::async_trait;
use crime_api_crime_models::{ID_FIELD, LOCATION_FIELD, LookupAttribute};
use crime_api_query::Pipeline;
use geo::{Distance, HaversineMeasure, Point};
use mongodb::bson::{Bson, Document, doc};

use crate::{CrimeStore, DbError};

/// Earth radius MongoDB uses for spherical distances.
pub const EARTH_RADIUS_METERS: f64 = 6_378_100.0;

/// Crime records held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryCrimeStore {
    records: Vec<Document>,
}

impl MemoryCrimeStore {
    /// Creates a store over `records`.
    #[must_use]
    pub const fn new(records: Vec<Document>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl CrimeStore for MemoryCrimeStore {
    async fn distinct_values(&self, attribute: LookupAttribute) -> Result<Vec<Bson>, DbError> {
        let mut values: Vec<Bson> = Vec::new();
        for record in &self.records {
            if let Some(value) = get_path(record, attribute.field_name())
                && !values.contains(value)
            {
                values.push(value.clone());
            }
        }
        Ok(values)
    }

    async fn aggregate(&self, pipeline: Pipeline) -> Result<Vec<Document>, DbError> {
        run_pipeline(self.records.clone(), pipeline.stages())
    }
}

/// Runs `stages` in order over `documents`.
///
/// # Errors
///
/// Returns [`DbError::Pipeline`] for malformed or unsupported stages.
pub fn run_pipeline(
    mut documents: Vec<Document>,
    stages: &[Document],
) -> Result<Vec<Document>, DbError> {
    for (index, stage) in stages.iter().enumerate() {
        documents = run_stage(documents, stage, index)?;
    }
    Ok(documents)
}

fn run_stage(
    documents: Vec<Document>,
    stage: &Document,
    index: usize,
) -> Result<Vec<Document>, DbError> {
    let mut entries = stage.iter();
    let (Some((name, spec)), None) = (entries.next(), entries.next()) else {
        return Err(DbError::pipeline("a pipeline stage must have exactly one field"));
    };

    match (name.as_str(), spec) {
        ("$geoNear", Bson::Document(spec)) => {
            if index != 0 {
                return Err(DbError::pipeline(
                    "$geoNear is only valid as the first stage in a pipeline",
                ));
            }
            geo_near(documents, spec)
        }
        ("$match", Bson::Document(filter)) => {
            let mut kept = Vec::with_capacity(documents.len());
            for document in documents {
                if matches(&document, filter)? {
                    kept.push(document);
                }
            }
            Ok(kept)
        }
        ("$count", Bson::String(field)) => Ok(count(&documents, field)),
        ("$group", Bson::Document(spec)) => group(documents, spec),
        ("$project", Bson::Document(spec)) => project(documents, spec),
        _ => Err(DbError::pipeline(format!("unsupported stage {name}"))),
    }
}

fn get_path<'a>(document: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;
    for segment in segments {
        current = current.as_document()?.get(segment)?;
    }
    Some(current)
}

fn set_path(document: &mut Document, path: &str, value: Bson) {
    let Some((head, rest)) = path.split_once('.') else {
        document.insert(path, value);
        return;
    };
    if !matches!(document.get(head), Some(Bson::Document(_))) {
        document.insert(head, Document::new());
    }
    if let Some(Bson::Document(child)) = document.get_mut(head) {
        set_path(child, rest, value);
    }
}

#[allow(clippy::cast_precision_loss)]
fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        _ => None,
    }
}

fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::String(a), Bson::String(b)) => Some(a.cmp(b)),
        _ => as_f64(a)?.partial_cmp(&as_f64(b)?),
    }
}

fn values_equal(a: &Bson, b: &Bson) -> bool {
    compare(a, b).map_or(a == b, Ordering::is_eq)
}

fn is_truthy(value: &Bson) -> bool {
    match value {
        Bson::Boolean(b) => *b,
        Bson::Null => false,
        other => as_f64(other).is_none_or(|v| v != 0.0),
    }
}

/// Splits `{ "$op": argument }` into its operator and argument.
fn single_operator<'a>(spec: &'a Bson, context: &str) -> Result<(&'a str, &'a Bson), DbError> {
    if let Bson::Document(spec) = spec {
        let mut entries = spec.iter();
        if let (Some((operator, argument)), None) = (entries.next(), entries.next())
            && operator.starts_with('$')
        {
            return Ok((operator.as_str(), argument));
        }
    }
    Err(DbError::pipeline(format!("{context} must be a single operator expression")))
}

/// `[longitude, latitude]` of a GeoJSON `Point`.
fn point_coordinates(point: &Document) -> Option<Point<f64>> {
    if point.get_str("type").ok()? != "Point" {
        return None;
    }
    match point.get_array("coordinates").ok()?.as_slice() {
        [lng, lat] => Some(Point::new(as_f64(lng)?, as_f64(lat)?)),
        _ => None,
    }
}

/// Records without a usable location are dropped, and the rest are
/// returned nearest first.
fn geo_near(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, DbError> {
    let near = spec
        .get_document("near")
        .ok()
        .and_then(point_coordinates)
        .ok_or_else(|| DbError::pipeline("$geoNear requires a GeoJSON Point for 'near'"))?;
    let distance_field = spec
        .get_str("distanceField")
        .map_err(|_| DbError::pipeline("$geoNear requires 'distanceField'"))?;
    let max_distance = match spec.get("maxDistance") {
        None => f64::INFINITY,
        Some(value) => as_f64(value)
            .filter(|d| *d >= 0.0)
            .ok_or_else(|| DbError::pipeline("$geoNear 'maxDistance' must be non-negative"))?,
    };

    let sphere = HaversineMeasure::new(EARTH_RADIUS_METERS);
    let mut nearby: Vec<(f64, Document)> = documents
        .into_iter()
        .filter_map(|document| {
            let location = get_path(&document, LOCATION_FIELD)?.as_document()?;
            let distance = sphere.distance(near, point_coordinates(location)?);
            (distance <= max_distance).then_some((distance, document))
        })
        .collect();
    nearby.sort_by(|(a, _), (b, _)| a.total_cmp(b));

    Ok(nearby
        .into_iter()
        .map(|(distance, mut document)| {
            set_path(&mut document, distance_field, Bson::Double(distance));
            document
        })
        .collect())
}

fn matches(document: &Document, filter: &Document) -> Result<bool, DbError> {
    for (path, condition) in filter {
        if !matches_condition(get_path(document, path), condition)? {
            return Ok(false);
        }
    }
    Ok(true)
}

fn matches_condition(value: Option<&Bson>, condition: &Bson) -> Result<bool, DbError> {
    let operators = match condition {
        Bson::Document(operators)
            if operators.keys().next().is_some_and(|k| k.starts_with('$')) =>
        {
            operators
        }
        literal => return Ok(value.is_some_and(|v| values_equal(v, literal))),
    };

    for (operator, operand) in operators {
        let satisfied = match operator.as_str() {
            "$eq" => value.is_some_and(|v| values_equal(v, operand)),
            "$gte" => value
                .and_then(|v| compare(v, operand))
                .is_some_and(Ordering::is_ge),
            "$lte" => value
                .and_then(|v| compare(v, operand))
                .is_some_and(Ordering::is_le),
            "$in" => {
                let Bson::Array(candidates) = operand else {
                    return Err(DbError::pipeline("$in needs an array"));
                };
                value.is_some_and(|v| candidates.iter().any(|c| values_equal(v, c)))
            }
            other => {
                return Err(DbError::pipeline(format!(
                    "unsupported query operator {other}"
                )));
            }
        };
        if !satisfied {
            return Ok(false);
        }
    }
    Ok(true)
}

/// No document is emitted for an empty input.
fn count(documents: &[Document], field: &str) -> Vec<Document> {
    if documents.is_empty() {
        return Vec::new();
    }
    let total = i32::try_from(documents.len()).map_or_else(
        |_| Bson::Int64(i64::try_from(documents.len()).unwrap_or(i64::MAX)),
        Bson::Int32,
    );
    vec![doc! { field: total }]
}

fn group(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, DbError> {
    let key_expr = spec
        .get(ID_FIELD)
        .ok_or_else(|| DbError::pipeline("$group requires an _id"))?;
    let accumulators = spec
        .iter()
        .filter(|(field, _)| field.as_str() != ID_FIELD)
        .map(|(field, accumulator)| {
            let (operator, expr) = single_operator(accumulator, field)?;
            Ok((field.as_str(), operator, expr))
        })
        .collect::<Result<Vec<_>, DbError>>()?;

    let mut groups: Vec<(Bson, Vec<Document>)> = Vec::new();
    for document in documents {
        let key = eval(&document, key_expr)?.unwrap_or(Bson::Null);
        match groups.iter_mut().find(|(existing, _)| *existing == key) {
            Some((_, members)) => members.push(document),
            None => groups.push((key, vec![document])),
        }
    }

    groups
        .into_iter()
        .map(|(key, members)| {
            let mut output = doc! { ID_FIELD: key };
            for (field, operator, expr) in &accumulators {
                output.insert(*field, accumulate(operator, expr, &members)?);
            }
            Ok(output)
        })
        .collect()
}

/// Running `$sum`. Stays integral until a double is added.
#[derive(Default)]
struct Sum {
    integer: i64,
    float: f64,
    is_float: bool,
}

impl Sum {
    fn add(&mut self, value: &Bson) {
        match value {
            Bson::Int32(v) => self.integer = self.integer.saturating_add(i64::from(*v)),
            Bson::Int64(v) => self.integer = self.integer.saturating_add(*v),
            Bson::Double(v) => {
                self.float += v;
                self.is_float = true;
            }
            _ => {}
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn into_bson(self) -> Bson {
        if self.is_float {
            Bson::Double(self.float + self.integer as f64)
        } else {
            i32::try_from(self.integer).map_or(Bson::Int64(self.integer), Bson::Int32)
        }
    }
}

fn accumulate(operator: &str, expr: &Bson, members: &[Document]) -> Result<Bson, DbError> {
    match operator {
        "$sum" => {
            let mut sum = Sum::default();
            for member in members {
                if let Some(value) = eval(member, expr)? {
                    sum.add(&value);
                }
            }
            Ok(sum.into_bson())
        }
        "$first" => Ok(match members.first() {
            Some(member) => eval(member, expr)?.unwrap_or(Bson::Null),
            None => Bson::Null,
        }),
        "$addToSet" => {
            let mut set: Vec<Bson> = Vec::new();
            for member in members {
                if let Some(value) = eval(member, expr)?
                    && !set.contains(&value)
                {
                    set.push(value);
                }
            }
            Ok(Bson::Array(set))
        }
        other => Err(DbError::pipeline(format!("unsupported accumulator {other}"))),
    }
}

fn project(documents: Vec<Document>, spec: &Document) -> Result<Vec<Document>, DbError> {
    let mut include_id = true;
    let mut included: Vec<&str> = Vec::new();
    let mut excluded: Vec<&str> = Vec::new();
    let mut computed: Vec<(&str, &Bson)> = Vec::new();

    for (field, value) in spec {
        match value {
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Boolean(_) => {
                if field == ID_FIELD {
                    include_id = is_truthy(value);
                } else if is_truthy(value) {
                    included.push(field.as_str());
                } else {
                    excluded.push(field.as_str());
                }
            }
            _ => computed.push((field.as_str(), value)),
        }
    }

    let inclusion = !included.is_empty() || !computed.is_empty();
    if inclusion && !excluded.is_empty() {
        return Err(DbError::pipeline("$project cannot mix inclusion and exclusion"));
    }

    documents
        .into_iter()
        .map(|mut document| {
            if !inclusion {
                for field in &excluded {
                    document.remove(*field);
                }
                if !include_id {
                    document.remove(ID_FIELD);
                }
                return Ok(document);
            }

            let mut output = Document::new();
            if include_id && let Some(id) = document.get(ID_FIELD) {
                output.insert(ID_FIELD, id.clone());
            }
            for field in &included {
                if let Some(value) = get_path(&document, field) {
                    set_path(&mut output, field, value.clone());
                }
            }
            for (field, expr) in &computed {
                if let Some(value) = eval(&document, expr)? {
                    set_path(&mut output, field, value);
                }
            }
            Ok(output)
        })
        .collect()
}

/// Evaluates an aggregation expression. `None` means the expression refers
/// to a missing field.
fn eval(document: &Document, expr: &Bson) -> Result<Option<Bson>, DbError> {
    if let Bson::String(s) = expr
        && let Some(path) = s.strip_prefix('$')
    {
        return Ok(get_path(document, path).cloned());
    }

    match expr {
        Bson::Array(items) => {
            let values = items
                .iter()
                .map(|item| Ok(eval(document, item)?.unwrap_or(Bson::Null)))
                .collect::<Result<Vec<_>, DbError>>()?;
            Ok(Some(Bson::Array(values)))
        }
        Bson::Document(spec) if spec.keys().next().is_some_and(|k| k.starts_with('$')) => {
            let (operator, argument) = single_operator(expr, "an expression")?;
            eval_operator(document, operator, argument)
        }
        Bson::Document(spec) => {
            let mut output = Document::new();
            for (field, value) in spec {
                if let Some(value) = eval(document, value)? {
                    output.insert(field.clone(), value);
                }
            }
            Ok(Some(Bson::Document(output)))
        }
        literal => Ok(Some(literal.clone())),
    }
}

fn eval_operator(
    document: &Document,
    operator: &str,
    argument: &Bson,
) -> Result<Option<Bson>, DbError> {
    match operator {
        "$toString" => match eval(document, argument)? {
            None | Some(Bson::Null) => Ok(Some(Bson::Null)),
            Some(value) => to_string(&value).map(|s| Some(Bson::String(s))),
        },
        "$concat" => {
            let Bson::Array(parts) = argument else {
                return Err(DbError::pipeline("$concat needs an array"));
            };
            let mut joined = String::new();
            for part in parts {
                match eval(document, part)? {
                    Some(Bson::String(s)) => joined.push_str(&s),
                    None | Some(Bson::Null) => return Ok(Some(Bson::Null)),
                    Some(other) => {
                        return Err(DbError::pipeline(format!(
                            "$concat only supports strings, got {other}"
                        )));
                    }
                }
            }
            Ok(Some(Bson::String(joined)))
        }
        other => Err(DbError::pipeline(format!(
            "unsupported expression operator {other}"
        ))),
    }
}

fn to_string(value: &Bson) -> Result<String, DbError> {
    match value {
        Bson::String(s) => Ok(s.clone()),
        Bson::Int32(v) => Ok(v.to_string()),
        Bson::Int64(v) => Ok(v.to_string()),
        Bson::Double(v) => Ok(v.to_string()),
        Bson::Boolean(v) => Ok(v.to_string()),
        other => Err(DbError::pipeline(format!("$toString cannot convert {other}"))),
    }
}
