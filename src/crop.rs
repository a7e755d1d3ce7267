use serde_json::Value;
use tracing::debug;

use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::job::{OperationStatus, ReportSink, Tally};
use crate::json::{self, Document};

pub const AGROVOC_PREFERRED_TERM: &str = "agrovoc_preferred_term";
pub const AGROVOC_URI: &str = "agrovoc_uri";
pub const SYNONYMS: &str = "synonyms";

// ------------- Crop -------------
#[derive(Clone, PartialEq, Debug)]
pub struct Crop {
    pub id: Option<Identifier>,
    pub name: String,
    pub agrovoc_preferred_term: String,
    pub agrovoc_uri: String,
    pub synonyms: Option<Vec<String>>,
}

impl Crop {
    pub fn new(name: &str, agrovoc_preferred_term: &str, agrovoc_uri: &str) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            agrovoc_preferred_term: agrovoc_preferred_term.to_string(),
            agrovoc_uri: agrovoc_uri.to_string(),
            synonyms: None,
        }
    }
    /// Copies every usable synonym; blank or non-string entries are reported
    /// against the `synonyms` field and skipped.
    pub fn add_synonyms(&mut self, values: &[Value], sink: &mut dyn ReportSink) -> OperationStatus {
        let mut tally = Tally::new();
        let synonyms = self.synonyms.get_or_insert_with(Vec::new);
        for value in values {
            match value.as_str().map(str::trim) {
                Some(s) if !s.is_empty() => {
                    synonyms.push(s.to_string());
                    tally.record(true);
                }
                _ => {
                    sink.report_field_error(SYNONYMS, Some(value), "synonym must be a non-empty string");
                    tally.record(false);
                }
            }
        }
        if synonyms.is_empty() {
            self.synonyms = None;
        }
        debug!(crop = %self.name, added = tally.successes(), of = tally.total(), "synonyms copied");
        tally.status()
    }
    pub fn validate(&self) -> Result<()> {
        let required = [
            (json::NAME, &self.name),
            (AGROVOC_PREFERRED_TERM, &self.agrovoc_preferred_term),
            (AGROVOC_URI, &self.agrovoc_uri),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(FieldTrialError::malformed(key, "must not be empty"));
            }
        }
        Ok(())
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        doc.insert(AGROVOC_PREFERRED_TERM.into(), Value::from(self.agrovoc_preferred_term.as_str()));
        doc.insert(AGROVOC_URI.into(), Value::from(self.agrovoc_uri.as_str()));
        if let Some(synonyms) = &self.synonyms {
            doc.insert(SYNONYMS.into(), Value::from(synonyms.clone()));
        }
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "crop")?;
        let mut crop = Crop::new(
            &json::require_string(doc, json::NAME)?,
            &json::require_string(doc, AGROVOC_PREFERRED_TERM)?,
            &json::require_string(doc, AGROVOC_URI)?,
        );
        crop.id = json::get_id(doc, json::ID)?;
        crop.synonyms = json::get_string_array(doc, SYNONYMS)?;
        Ok(crop)
    }
}
