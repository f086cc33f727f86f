//! Dataset wire representation and input validation

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::models::{Dataset, DatasetChanges, DatasetType, NewDataset};

const REQUIRED: &str = "This field is required.";
const NOT_NULL: &str = "This field may not be null.";
const DATETIME_FORMAT: &str =
    "Datetime has wrong format. Use one of these formats instead: YYYY-MM-DDThh:mm[:ss[.uuuuuu]][+HH:MM|-HH:MM|Z].";

/// Per-field validation messages, keyed by field name
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.entry(field.into()).or_default().push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

/// Outbound form of a dataset record
#[derive(Debug, Clone, Serialize)]
pub struct DatasetRepresentation {
    pub id: i64,
    pub data: Value,
    pub dataset_type: DatasetType,
    pub from_date: DateTime<Utc>,
    pub to_date: DateTime<Utc>,
    pub modified_on: DateTime<Utc>,
    /// Username of the last writer
    pub modified_by: String,
}

impl From<Dataset> for DatasetRepresentation {
    fn from(dataset: Dataset) -> Self {
        Self {
            id: dataset.id,
            data: dataset.data,
            dataset_type: dataset.dataset_type,
            from_date: dataset.from_date,
            to_date: dataset.to_date,
            modified_on: dataset.modified_on,
            modified_by: dataset.modified_by_username,
        }
    }
}

/// Validate a create / PUT body; every writable field must be present.
pub fn validate_full(body: &Value) -> Result<NewDataset, FieldErrors> {
    let changes = validate(body, false)?;
    match changes {
        DatasetChanges {
            data: Some(data),
            dataset_type: Some(dataset_type),
            from_date: Some(from_date),
            to_date: Some(to_date),
        } => Ok(NewDataset {
            data,
            dataset_type,
            from_date,
            to_date,
        }),
        incomplete => Err(missing_fields(&incomplete)),
    }
}

fn missing_fields(changes: &DatasetChanges) -> FieldErrors {
    let mut errors = FieldErrors::new();
    for (name, present) in [
        ("data", changes.data.is_some()),
        ("dataset_type", changes.dataset_type.is_some()),
        ("from_date", changes.from_date.is_some()),
        ("to_date", changes.to_date.is_some()),
    ] {
        if !present {
            errors.add(name, REQUIRED);
        }
    }
    errors
}

/// Validate a PATCH body; absent fields stay unchanged.
pub fn validate_partial(body: &Value) -> Result<DatasetChanges, FieldErrors> {
    validate(body, true)
}

fn validate(body: &Value, partial: bool) -> Result<DatasetChanges, FieldErrors> {
    let object = match body {
        Value::Object(object) => object,
        other => {
            let mut errors = FieldErrors::new();
            errors.add(
                "non_field_errors",
                format!("Invalid data. Expected an object, but got {}.", json_kind(other)),
            );
            return Err(errors);
        }
    };

    let mut errors = FieldErrors::new();
    let mut changes = DatasetChanges::default();

    if let Some(value) = field(object, "data", partial, &mut errors) {
        changes.data = Some(value.clone());
    }

    if let Some(value) = field(object, "dataset_type", partial, &mut errors) {
        match parse_dataset_type(value) {
            Ok(t) => changes.dataset_type = Some(t),
            Err(msg) => errors.add("dataset_type", msg),
        }
    }

    for (name, slot) in [
        ("from_date", &mut changes.from_date),
        ("to_date", &mut changes.to_date),
    ] {
        if let Some(value) = field(object, name, partial, &mut errors) {
            match value.as_str().and_then(parse_datetime) {
                Some(ts) => *slot = Some(ts),
                None => errors.add(name, DATETIME_FORMAT),
            }
        }
    }

    if errors.is_empty() {
        Ok(changes)
    } else {
        Err(errors)
    }
}

/// Look up a writable field, recording required / null errors.
fn field<'a>(
    object: &'a Map<String, Value>,
    name: &str,
    partial: bool,
    errors: &mut FieldErrors,
) -> Option<&'a Value> {
    match object.get(name) {
        None => {
            if !partial {
                errors.add(name, REQUIRED);
            }
            None
        }
        Some(Value::Null) => {
            errors.add(name, NOT_NULL);
            None
        }
        Some(value) => Some(value),
    }
}

fn parse_dataset_type(value: &Value) -> Result<DatasetType, String> {
    let raw = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    raw.parse::<DatasetType>().map_err(|e| e.to_string())
}

/// ISO 8601 at microsecond precision; values without an offset are taken as UTC.
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    parse_iso8601(raw).map(|ts| ts.trunc_subsecs(6))
}

fn parse_iso8601(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f%:z",
        "%Y-%m-%dT%H:%M%:z",
        "%Y-%m-%d %H:%M:%S%.f%:z",
    ] {
        if let Ok(ts) = DateTime::parse_from_str(raw, format) {
            return Some(ts.with_timezone(&Utc));
        }
    }

    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }

    None
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
