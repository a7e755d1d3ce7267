use serde_json::Value;

use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::json::{self, Document};
use crate::person::Person;

pub const ABBREVIATION: &str = "abbreviation";
pub const OBJECTIVE: &str = "objective";
pub const DOCUMENTATION_URL: &str = "documentation_url";
pub const PRINCIPAL_INVESTIGATOR: &str = "principal_investigator";
pub const CROP_ID: &str = "crop_id";
pub const FUNDING_ORGANISATION: &str = "funding_organisation";
pub const PROJECT_CODE: &str = "project_code";
pub const FIELD_TRIALS: &str = "field_trials";
pub const TEAM: &str = "team";
pub const PROGRAMME_ID: &str = "programme_id";
pub const PEOPLE: &str = "people";
pub const STUDIES: &str = "studies";

fn put_ids(doc: &mut Document, key: &str, ids: &[Identifier]) {
    if !ids.is_empty() {
        let ids: Vec<Value> = ids.iter().map(|id| Value::from(id.to_hex())).collect();
        doc.insert(key.to_string(), Value::Array(ids));
    }
}

fn get_ids(doc: &Document, key: &str) -> Result<Vec<Identifier>> {
    json::get_string_array(doc, key)?
        .unwrap_or_default()
        .iter()
        .map(|s| {
            Identifier::parse(s).map_err(|_| FieldTrialError::malformed(key, format!("\"{s}\" is not a valid identifier")))
        })
        .collect()
}

// ------------- Programme -------------
#[derive(Clone, PartialEq, Debug)]
pub struct Programme {
    pub id: Option<Identifier>,
    pub abbreviation: String,
    pub name: String,
    pub objective: Option<String>,
    pub documentation_url: Option<String>,
    pub principal_investigator: Option<Person>,
    pub crop_id: Option<Identifier>,
    pub funding_organisation: Option<String>,
    pub project_code: Option<String>,
    /// Field trials in the order they were added.
    pub field_trial_ids: Vec<Identifier>,
}

impl Programme {
    pub fn new(abbreviation: &str, name: &str) -> Self {
        Self {
            id: None,
            abbreviation: abbreviation.to_string(),
            name: name.to_string(),
            objective: None,
            documentation_url: None,
            principal_investigator: None,
            crop_id: None,
            funding_organisation: None,
            project_code: None,
            field_trial_ids: Vec::new(),
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.abbreviation.trim().is_empty() {
            return Err(FieldTrialError::malformed(ABBREVIATION, "must not be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(FieldTrialError::malformed(json::NAME, "must not be empty"));
        }
        Ok(())
    }
    pub fn add_field_trial(&mut self, field_trial_id: Identifier) {
        if !self.field_trial_ids.contains(&field_trial_id) {
            self.field_trial_ids.push(field_trial_id);
        }
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(ABBREVIATION.into(), Value::from(self.abbreviation.as_str()));
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        json::put_string(&mut doc, OBJECTIVE, &self.objective);
        json::put_string(&mut doc, DOCUMENTATION_URL, &self.documentation_url);
        if let Some(pi) = &self.principal_investigator {
            doc.insert(PRINCIPAL_INVESTIGATOR.into(), pi.to_json());
        }
        json::put_id(&mut doc, CROP_ID, &self.crop_id);
        json::put_string(&mut doc, FUNDING_ORGANISATION, &self.funding_organisation);
        json::put_string(&mut doc, PROJECT_CODE, &self.project_code);
        put_ids(&mut doc, FIELD_TRIALS, &self.field_trial_ids);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "programme")?;
        let mut programme = Programme::new(
            &json::require_string(doc, ABBREVIATION)?,
            &json::require_string(doc, json::NAME)?,
        );
        programme.id = json::get_id(doc, json::ID)?;
        programme.objective = json::get_string(doc, OBJECTIVE)?;
        programme.documentation_url = json::get_string(doc, DOCUMENTATION_URL)?;
        programme.principal_investigator = match doc.get(PRINCIPAL_INVESTIGATOR) {
            None | Some(Value::Null) => None,
            Some(pi) => Some(Person::from_json(pi)?),
        };
        programme.crop_id = json::get_id(doc, CROP_ID)?;
        programme.funding_organisation = json::get_string(doc, FUNDING_ORGANISATION)?;
        programme.project_code = json::get_string(doc, PROJECT_CODE)?;
        programme.field_trial_ids = get_ids(doc, FIELD_TRIALS)?;
        Ok(programme)
    }
}

// ------------- FieldTrial -------------
#[derive(Clone, PartialEq, Debug)]
pub struct FieldTrial {
    pub id: Option<Identifier>,
    pub name: String,
    pub team: Option<String>,
    pub programme_id: Option<Identifier>,
    pub people: Vec<Person>,
    pub study_ids: Vec<Identifier>,
}

impl FieldTrial {
    pub fn new(name: &str, team: Option<&str>, programme_id: Option<Identifier>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            team: team.map(str::to_string),
            programme_id,
            people: Vec::new(),
            study_ids: Vec::new(),
        }
    }
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(FieldTrialError::malformed(json::NAME, "must not be empty"));
        }
        Ok(())
    }
    pub fn add_person(&mut self, person: Person) {
        self.people.push(person);
    }
    pub fn add_study(&mut self, study_id: Identifier) {
        if !self.study_ids.contains(&study_id) {
            self.study_ids.push(study_id);
        }
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        json::put_string(&mut doc, TEAM, &self.team);
        json::put_id(&mut doc, PROGRAMME_ID, &self.programme_id);
        if !self.people.is_empty() {
            let people: Vec<Value> = self.people.iter().map(Person::to_json).collect();
            doc.insert(PEOPLE.into(), Value::Array(people));
        }
        put_ids(&mut doc, STUDIES, &self.study_ids);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "field_trial")?;
        let mut trial = FieldTrial::new(
            &json::require_string(doc, json::NAME)?,
            json::get_string(doc, TEAM)?.as_deref(),
            json::get_id(doc, PROGRAMME_ID)?,
        );
        trial.id = json::get_id(doc, json::ID)?;
        for person in json::get_array(doc, PEOPLE)?.into_iter().flatten() {
            trial.people.push(Person::from_json(person)?);
        }
        trial.study_ids = get_ids(doc, STUDIES)?;
        Ok(trial)
    }
}
