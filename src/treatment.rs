use std::sync::Arc;

use serde_json::Value;

use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::json::{self, Document};
use crate::ownership::Link;

pub const TREATMENT_ID: &str = "treatment_id";
pub const TREATMENT: &str = "treatment";
pub const LABEL: &str = "label";
pub const VALUE: &str = "value";
pub const VALUES: &str = "values";
pub const ONTOLOGY_TERM: &str = "ontology_term";
pub const PARENT_NAMES: &str = "parents";
pub const SYNONYMS: &str = "synonyms";

// ------------- OntologyTerm -------------
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct OntologyTerm {
    pub url: String,
    pub name: String,
    pub description: Option<String>,
    pub abbreviation: Option<String>,
}

impl OntologyTerm {
    pub fn new(url: &str, name: &str) -> Self {
        Self {
            url: url.to_string(),
            name: name.to_string(),
            description: None,
            abbreviation: None,
        }
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        doc.insert("url".into(), Value::from(self.url.as_str()));
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        json::put_string(&mut doc, "description", &self.description);
        json::put_string(&mut doc, "abbreviation", &self.abbreviation);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, ONTOLOGY_TERM)?;
        let mut term = OntologyTerm::new(&json::require_string(doc, "url")?, &json::require_string(doc, json::NAME)?);
        term.description = json::get_string(doc, "description")?;
        term.abbreviation = json::get_string(doc, "abbreviation")?;
        Ok(term)
    }
}

// ------------- Treatment -------------
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Treatment {
    pub id: Option<Identifier>,
    pub term: OntologyTerm,
    pub parent_names: Vec<String>,
    pub synonyms: Vec<String>,
}

impl Treatment {
    pub fn new(term: OntologyTerm) -> Self {
        Self {
            id: None,
            term,
            parent_names: Vec::new(),
            synonyms: Vec::new(),
        }
    }
    pub fn name(&self) -> &str {
        &self.term.name
    }
    /// Matches the term name or any synonym, ignoring case.
    pub fn is_named(&self, name: &str) -> bool {
        self.term.name.eq_ignore_ascii_case(name) || self.synonyms.iter().any(|s| s.eq_ignore_ascii_case(name))
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(ONTOLOGY_TERM.into(), self.term.to_json());
        if !self.parent_names.is_empty() {
            doc.insert(PARENT_NAMES.into(), Value::from(self.parent_names.clone()));
        }
        if !self.synonyms.is_empty() {
            doc.insert(SYNONYMS.into(), Value::from(self.synonyms.clone()));
        }
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, TREATMENT)?;
        let term = OntologyTerm::from_json(json::required(doc, ONTOLOGY_TERM)?)?;
        let mut treatment = Treatment::new(term);
        treatment.id = json::get_id(doc, json::ID)?;
        treatment.parent_names = json::get_string_array(doc, PARENT_NAMES)?.unwrap_or_default();
        treatment.synonyms = json::get_string_array(doc, SYNONYMS)?.unwrap_or_default();
        Ok(treatment)
    }
}

// ------------- TreatmentFactor -------------
// A treatment applied within one study, with its ordered levels.
#[derive(Debug)]
pub struct TreatmentFactor {
    treatment: Link<Treatment>,
    study_id: Option<Identifier>,
    levels: Vec<(String, String)>,
}

impl TreatmentFactor {
    pub fn new(treatment: Link<Treatment>, study_id: Option<Identifier>) -> Self {
        Self {
            treatment,
            study_id,
            levels: Vec::new(),
        }
    }
    pub fn treatment(&self) -> Option<Arc<Treatment>> {
        self.treatment.resolve()
    }
    pub fn treatment_id(&self) -> Option<Identifier> {
        self.treatment().and_then(|t| t.id)
    }
    pub fn study_id(&self) -> Option<Identifier> {
        self.study_id
    }
    pub fn set_study_id(&mut self, study_id: Identifier) {
        self.study_id = Some(study_id);
    }
    pub fn add_level(&mut self, label: &str, value: &str) -> Result<()> {
        let label = label.trim();
        if label.is_empty() {
            return Err(FieldTrialError::malformed(LABEL, "level label must not be empty"));
        }
        if self.level(label).is_some() {
            return Err(FieldTrialError::malformed(LABEL, format!("level \"{label}\" is already defined")));
        }
        self.levels.push((label.to_string(), value.to_string()));
        Ok(())
    }
    pub fn level(&self, label: &str) -> Option<&str> {
        self.levels
            .iter()
            .find(|(l, _)| l == label)
            .map(|(_, v)| v.as_str())
    }
    pub fn levels(&self) -> &[(String, String)] {
        &self.levels
    }
    /// The value of this factor at `label`, if that level is defined.
    pub fn value(self: &Arc<Self>, label: &str) -> Option<TreatmentFactorValue> {
        self.level(label).map(|_| TreatmentFactorValue {
            factor: Arc::clone(self),
            label: label.to_string(),
        })
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, TREATMENT_ID, &self.treatment_id());
        if let Some(treatment) = self.treatment() {
            doc.insert(TREATMENT.into(), Value::from(treatment.name()));
        }
        let values: Vec<Value> = self
            .levels
            .iter()
            .map(|(label, value)| {
                let mut level = Document::new();
                level.insert(LABEL.into(), Value::from(label.as_str()));
                level.insert(VALUE.into(), Value::from(value.as_str()));
                Value::Object(level)
            })
            .collect();
        doc.insert(VALUES.into(), Value::Array(values));
        Value::Object(doc)
    }
    /// `treatment` is the already resolved treatment named by `treatment_id`.
    pub fn from_json(value: &Value, treatment: Link<Treatment>, study_id: Option<Identifier>) -> Result<Self> {
        let doc = json::as_document(value, "treatment_factor")?;
        let mut factor = TreatmentFactor::new(treatment, study_id);
        for level in json::get_array(doc, VALUES)?.into_iter().flatten() {
            let level = json::as_document(level, VALUES)?;
            let label = json::require_string(level, LABEL)?;
            let value = json::get_string(level, VALUE)?.unwrap_or_default();
            factor.add_level(&label, &value)?;
        }
        Ok(factor)
    }
}

// ------------- TreatmentFactorValue -------------
// Only constructed through TreatmentFactor::value, so the label is always a
// defined level of its factor.
#[derive(Clone, Debug)]
pub struct TreatmentFactorValue {
    factor: Arc<TreatmentFactor>,
    label: String,
}

impl TreatmentFactorValue {
    pub fn factor(&self) -> &Arc<TreatmentFactor> {
        &self.factor
    }
    pub fn label(&self) -> &str {
        &self.label
    }
    pub fn value(&self) -> &str {
        self.factor.level(&self.label).unwrap_or_default()
    }
    pub fn to_json(&self, client: bool) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, TREATMENT_ID, &self.factor.treatment_id());
        doc.insert(LABEL.into(), Value::from(self.label.as_str()));
        if client {
            if let Some(treatment) = self.factor.treatment() {
                doc.insert(TREATMENT.into(), Value::from(treatment.name()));
            }
            doc.insert(VALUE.into(), Value::from(self.value()));
        }
        Value::Object(doc)
    }
}
impl PartialEq for TreatmentFactorValue {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.factor, &other.factor) && self.label == other.label
    }
}

pub trait TreatmentResolver {
    /// The stored treatment with this id, shared between all its factors.
    fn treatment_by_id(&self, id: &Identifier) -> Result<Option<Link<Treatment>>>;
}
