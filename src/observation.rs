// custom made ordering for observation metadata
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::error::{FieldTrialError, Result};
use crate::json::{self, Document};
use crate::variable::{MeasuredVariable, VariableDataType, VariableResolver};

pub const VARIABLE: &str = "variable";
pub const VARIABLE_ID: &str = "variable_id";
pub const RAW_VALUE: &str = "raw_value";
pub const CORRECTED_VALUE: &str = "corrected_value";
pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";
pub const CORRECTED: &str = "corrected";
pub const SAMPLE_INDEX: &str = "index";
pub const NOTES: &str = "notes";

pub const DEFAULT_SAMPLE_INDEX: u32 = 1;

// ------------- ObservationMetadata -------------
#[derive(Clone, Debug)]
pub struct ObservationMetadata {
    pub start_date: Option<NaiveDateTime>,
    pub end_date: Option<NaiveDateTime>,
    pub corrected: bool,
    pub sample_index: u32,
}

impl ObservationMetadata {
    pub fn new(start_date: Option<NaiveDateTime>, end_date: Option<NaiveDateTime>, corrected: bool, sample_index: u32) -> Self {
        Self {
            start_date,
            end_date,
            corrected,
            sample_index,
        }
    }
    pub fn on(date: NaiveDate) -> Self {
        Self {
            start_date: Some(date.and_time(chrono::NaiveTime::MIN)),
            ..Self::default()
        }
    }
    pub fn write_into(&self, doc: &mut Document) {
        json::put_date_time(doc, START_DATE, &self.start_date);
        json::put_date_time(doc, END_DATE, &self.end_date);
        if self.corrected {
            doc.insert(CORRECTED.into(), Value::Bool(true));
        }
        if self.sample_index != DEFAULT_SAMPLE_INDEX {
            doc.insert(SAMPLE_INDEX.into(), Value::from(self.sample_index));
        }
    }
    pub fn read_from(doc: &Document) -> Result<Self> {
        Ok(Self {
            start_date: json::get_date_time(doc, START_DATE)?,
            end_date: json::get_date_time(doc, END_DATE)?,
            corrected: json::get_bool(doc, CORRECTED)?.unwrap_or(false),
            sample_index: json::get_u32(doc, SAMPLE_INDEX)?.unwrap_or(DEFAULT_SAMPLE_INDEX),
        })
    }
}
impl Default for ObservationMetadata {
    fn default() -> Self {
        Self::new(None, None, false, DEFAULT_SAMPLE_INDEX)
    }
}

// Dates compare on the calendar day only; an absent date sorts first.
fn compare_days(a: &Option<NaiveDateTime>, b: &Option<NaiveDateTime>) -> Ordering {
    a.map(|d| d.date()).cmp(&b.map(|d| d.date()))
}

impl Ord for ObservationMetadata {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_days(&self.start_date, &other.start_date)
            .then_with(|| compare_days(&self.end_date, &other.end_date))
            .then_with(|| self.corrected.cmp(&other.corrected))
            .then_with(|| self.sample_index.cmp(&other.sample_index))
    }
}
impl PartialOrd for ObservationMetadata {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl PartialEq for ObservationMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for ObservationMetadata {}

// ------------- ObservationValue -------------
#[derive(Clone, PartialEq, Debug)]
pub enum ObservationValue {
    Integer(i64),
    Real(f64),
    Text(String),
    Date(NaiveDate),
    Boolean(bool),
}

impl ObservationValue {
    /// Coerces a submitted JSON value to the variable's declared type. Strings
    /// are accepted for every type since spreadsheet cells arrive as text.
    /// Reals must be finite, as JSON has no encoding for NaN or infinity.
    pub fn from_json(value: &Value, data_type: VariableDataType) -> Option<Self> {
        match (data_type, value) {
            (VariableDataType::Integer, Value::Number(n)) => n.as_i64().map(Self::Integer),
            (VariableDataType::Integer, Value::String(s)) => s.trim().parse().ok().map(Self::Integer),
            (VariableDataType::Real, Value::Number(n)) => n.as_f64().map(Self::Real),
            (VariableDataType::Real, Value::String(s)) => {
                s.trim().parse::<f64>().ok().filter(|r| r.is_finite()).map(Self::Real)
            }
            (VariableDataType::Text, Value::String(s)) => Some(Self::Text(s.clone())),
            (VariableDataType::Text, Value::Number(n)) => Some(Self::Text(n.to_string())),
            (VariableDataType::Date, Value::String(s)) => json::parse_date_time(s).map(|d| Self::Date(d.date())),
            (VariableDataType::Boolean, Value::Bool(b)) => Some(Self::Boolean(*b)),
            (VariableDataType::Boolean, Value::String(s)) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" => Some(Self::Boolean(true)),
                "false" | "no" => Some(Self::Boolean(false)),
                _ => None,
            },
            _ => None,
        }
    }
    pub fn to_json(&self) -> Value {
        match self {
            Self::Integer(i) => Value::from(*i),
            Self::Real(r) => serde_json::Number::from_f64(*r).map(Value::Number).unwrap_or(Value::Null),
            Self::Text(s) => Value::from(s.as_str()),
            Self::Date(d) => Value::from(d.format(json::DATE_FORMAT).to_string()),
            Self::Boolean(b) => Value::Bool(*b),
        }
    }
}
impl fmt::Display for ObservationValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Integer(i) => write!(f, "{i}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::Date(d) => write!(f, "{}", d.format(json::DATE_FORMAT)),
            Self::Boolean(b) => write!(f, "{b}"),
        }
    }
}

// ------------- Observation -------------
#[derive(Clone, Debug)]
pub struct Observation {
    pub variable: Arc<MeasuredVariable>,
    pub raw_value: Option<ObservationValue>,
    pub corrected_value: Option<ObservationValue>,
    pub metadata: ObservationMetadata,
    pub notes: Option<String>,
}

impl Observation {
    pub fn new(variable: Arc<MeasuredVariable>, metadata: ObservationMetadata) -> Self {
        Self {
            variable,
            raw_value: None,
            corrected_value: None,
            metadata,
            notes: None,
        }
    }
    /// True when this observation has the given matching key.
    pub fn matches(&self, variable: &MeasuredVariable, metadata: &ObservationMetadata) -> bool {
        self.variable.same_as(variable) && self.metadata == *metadata
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        doc.insert(VARIABLE.into(), Value::from(self.variable.name.as_str()));
        json::put_id(&mut doc, VARIABLE_ID, &self.variable.id);
        if let Some(raw) = &self.raw_value {
            doc.insert(RAW_VALUE.into(), raw.to_json());
        }
        if let Some(corrected) = &self.corrected_value {
            doc.insert(CORRECTED_VALUE.into(), corrected.to_json());
        }
        self.metadata.write_into(&mut doc);
        json::put_string(&mut doc, NOTES, &self.notes);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value, resolver: &dyn VariableResolver) -> Result<Self> {
        let doc = json::as_document(value, "observation")?;
        let name = json::require_string(doc, VARIABLE)?;
        let variable = resolver
            .resolve_by_name(&name)
            .and_then(|link| link.resolve())
            .ok_or_else(|| FieldTrialError::unresolved("measured variable", name.as_str()))?;
        let mut observation = Observation::new(Arc::clone(&variable), ObservationMetadata::read_from(doc)?);
        observation.raw_value = typed_value(doc, RAW_VALUE, variable.data_type)?;
        observation.corrected_value = typed_value(doc, CORRECTED_VALUE, variable.data_type)?;
        if observation.raw_value.is_none() && observation.corrected_value.is_none() {
            return Err(FieldTrialError::malformed(RAW_VALUE, "an observation needs a raw or corrected value"));
        }
        observation.notes = json::get_string(doc, NOTES)?;
        Ok(observation)
    }
}

fn typed_value(doc: &Document, key: &str, data_type: VariableDataType) -> Result<Option<ObservationValue>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => ObservationValue::from_json(v, data_type).map(Some).ok_or_else(|| {
            FieldTrialError::malformed(key, format!("{v} is not a valid {} value", data_type.name()))
        }),
    }
}

// ------------- ObservationColumn -------------
lazy_static! {
    // VARIABLE [START[_END]] [corrected] [#N] [(corrected value)]
    static ref COLUMN: Regex = Regex::new(concat!(
        r"^(?P<variable>\S+)",
        r"(?:\s+(?P<start>\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2})?)(?:_(?P<end>\d{4}-\d{2}-\d{2}(?:T\d{2}:\d{2}:\d{2})?))?)?",
        r"(?P<corrected>\s+corrected)?",
        r"(?:\s+#(?P<sample>\d+))?",
        r"(?P<slot>\s+\(corrected value\))?$"
    ))
    .unwrap();
}

/// A table column holding one observation value per row, named by its
/// variable and metadata so that a table can be read back into observations.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ObservationColumn {
    pub variable: String,
    pub metadata: ObservationMetadata,
    pub corrected_value: bool,
}

impl ObservationColumn {
    pub fn for_observation(observation: &Observation, corrected_value: bool) -> Self {
        Self {
            variable: observation.variable.name.clone(),
            metadata: observation.metadata.clone(),
            corrected_value,
        }
    }
    pub fn parse(header: &str) -> Result<Self> {
        let captures = COLUMN.captures(header.trim()).ok_or_else(|| {
            FieldTrialError::malformed(header, "not a VARIABLE [START[_END]] [corrected] [#N] column")
        })?;
        let date = |name: &str| -> Result<Option<NaiveDateTime>> {
            match captures.name(name) {
                None => Ok(None),
                Some(m) => json::parse_date_time(m.as_str())
                    .map(Some)
                    .ok_or_else(|| FieldTrialError::malformed(header, format!("\"{}\" is not a date", m.as_str()))),
            }
        };
        let sample_index = match captures.name("sample") {
            None => DEFAULT_SAMPLE_INDEX,
            Some(m) => m
                .as_str()
                .parse()
                .map_err(|_| FieldTrialError::malformed(header, "sample index is out of range"))?,
        };
        Ok(Self {
            variable: captures["variable"].to_string(),
            metadata: ObservationMetadata::new(
                date("start")?,
                date("end")?,
                captures.name("corrected").is_some(),
                sample_index,
            ),
            corrected_value: captures.name("slot").is_some(),
        })
    }
}
impl fmt::Display for ObservationColumn {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.variable)?;
        if let Some(start) = &self.metadata.start_date {
            write!(f, " {}", json::format_date_time(start))?;
            if let Some(end) = &self.metadata.end_date {
                write!(f, "_{}", json::format_date_time(end))?;
            }
        }
        if self.metadata.corrected {
            write!(f, " corrected")?;
        }
        if self.metadata.sample_index != DEFAULT_SAMPLE_INDEX {
            write!(f, " #{}", self.metadata.sample_index)?;
        }
        if self.corrected_value {
            write!(f, " (corrected value)")?;
        }
        Ok(())
    }
}
