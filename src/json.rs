//! Typed access to JSON documents.
//!
//! Required getters fail with `MalformedInput` naming the key; optional getters
//! return `Ok(None)` for an absent or null key but still fail on a wrong type.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::{Map, Value};

use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;

pub type Document = Map<String, Value>;

// ------------- Keys -------------
pub const ID: &str = "id";
pub const NAME: &str = "name";
pub const ROW_TYPE: &str = "row_type";
pub const RACK_INDEX: &str = "rack_index";
pub const STUDY_INDEX: &str = "study_index";
pub const PLOT_ID: &str = "plot_id";
pub const STUDY_ID: &str = "study_id";
pub const REPLICATE: &str = "replicate";
pub const MATERIAL_ID: &str = "material_id";
pub const MATERIAL: &str = "material";
pub const OBSERVATIONS: &str = "observations";
pub const TREATMENTS: &str = "treatments";
pub const CONTROL: &str = "control";
pub const DISCARD: &str = "discard";
pub const ROWS: &str = "rows";

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

pub fn as_document<'a>(value: &'a Value, what: &str) -> Result<&'a Document> {
    value
        .as_object()
        .ok_or_else(|| FieldTrialError::malformed(what, "expected a JSON object"))
}

fn present<'a>(doc: &'a Document, key: &str) -> Option<&'a Value> {
    doc.get(key).filter(|v| !v.is_null())
}

pub fn required<'a>(doc: &'a Document, key: &str) -> Result<&'a Value> {
    present(doc, key).ok_or_else(|| FieldTrialError::malformed(key, "required field is missing"))
}

pub fn get_string(doc: &Document, key: &str) -> Result<Option<String>> {
    match present(doc, key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(FieldTrialError::malformed(key, "expected a string")),
    }
}

/// A required string that must also be non-blank.
pub fn require_string(doc: &Document, key: &str) -> Result<String> {
    match get_string(doc, key)? {
        Some(s) if !s.trim().is_empty() => Ok(s),
        Some(_) => Err(FieldTrialError::malformed(key, "must not be empty")),
        None => Err(FieldTrialError::malformed(key, "required field is missing")),
    }
}

pub fn get_u32(doc: &Document, key: &str) -> Result<Option<u32>> {
    match present(doc, key) {
        None => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| FieldTrialError::malformed(key, "expected a non-negative integer")),
    }
}

pub fn require_u32(doc: &Document, key: &str) -> Result<u32> {
    get_u32(doc, key)?.ok_or_else(|| FieldTrialError::malformed(key, "required field is missing"))
}

pub fn get_real(doc: &Document, key: &str) -> Result<Option<f64>> {
    match present(doc, key) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| FieldTrialError::malformed(key, "expected a number")),
    }
}

pub fn get_bool(doc: &Document, key: &str) -> Result<Option<bool>> {
    match present(doc, key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(FieldTrialError::malformed(key, "expected a boolean")),
    }
}

pub fn get_id(doc: &Document, key: &str) -> Result<Option<Identifier>> {
    match present(doc, key) {
        None => Ok(None),
        Some(Value::String(s)) => Identifier::parse(s)
            .map(Some)
            .map_err(|_| FieldTrialError::malformed(key, format!("\"{s}\" is not a valid identifier"))),
        Some(_) => Err(FieldTrialError::malformed(key, "expected an identifier string")),
    }
}

pub fn require_id(doc: &Document, key: &str) -> Result<Identifier> {
    get_id(doc, key)?.ok_or_else(|| FieldTrialError::malformed(key, "required field is missing"))
}

pub fn get_array<'a>(doc: &'a Document, key: &str) -> Result<Option<&'a Vec<Value>>> {
    match present(doc, key) {
        None => Ok(None),
        Some(Value::Array(a)) => Ok(Some(a)),
        Some(_) => Err(FieldTrialError::malformed(key, "expected an array")),
    }
}

pub fn get_string_array(doc: &Document, key: &str) -> Result<Option<Vec<String>>> {
    match get_array(doc, key)? {
        None => Ok(None),
        Some(values) => values
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| FieldTrialError::malformed(key, "expected an array of strings"))
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
    }
}

// ------------- Dates -------------
pub fn parse_date_time(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, DATE_TIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(s, DATE_FORMAT)
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        })
}

pub fn format_date_time(dt: &NaiveDateTime) -> String {
    if dt.time() == NaiveTime::MIN {
        dt.format(DATE_FORMAT).to_string()
    } else {
        dt.format(DATE_TIME_FORMAT).to_string()
    }
}

pub fn get_date_time(doc: &Document, key: &str) -> Result<Option<NaiveDateTime>> {
    match get_string(doc, key)? {
        None => Ok(None),
        Some(s) => parse_date_time(&s)
            .map(Some)
            .ok_or_else(|| FieldTrialError::malformed(key, format!("\"{s}\" is not a date"))),
    }
}

pub fn get_date(doc: &Document, key: &str) -> Result<Option<NaiveDate>> {
    Ok(get_date_time(doc, key)?.map(|dt| dt.date()))
}

// ------------- Writers -------------
pub fn put_string(doc: &mut Document, key: &str, value: &Option<String>) {
    if let Some(v) = value {
        doc.insert(key.to_string(), Value::from(v.as_str()));
    }
}

pub fn put_id(doc: &mut Document, key: &str, value: &Option<Identifier>) {
    if let Some(id) = value {
        doc.insert(key.to_string(), Value::from(id.to_hex()));
    }
}

pub fn put_date(doc: &mut Document, key: &str, value: &Option<NaiveDate>) {
    if let Some(d) = value {
        doc.insert(key.to_string(), Value::from(d.format(DATE_FORMAT).to_string()));
    }
}

pub fn put_date_time(doc: &mut Document, key: &str, value: &Option<NaiveDateTime>) {
    if let Some(dt) = value {
        doc.insert(key.to_string(), Value::from(format_date_time(dt)));
    }
}

/// Reals are always written as JSON floating point numbers.
pub fn put_real(doc: &mut Document, key: &str, value: Option<f64>) {
    if let Some(v) = value.and_then(serde_json::Number::from_f64) {
        doc.insert(key.to_string(), Value::Number(v));
    }
}
