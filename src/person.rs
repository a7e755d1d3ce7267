use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::error::{FieldTrialError, Result};
use crate::json::{self, Document};

lazy_static! {
    static ref ORCID: Regex = Regex::new(r"^(https://orcid\.org/)?\d{4}-\d{4}-\d{4}-\d{3}[\dX]$").unwrap();
}

pub const EMAIL: &str = "email";
pub const ROLE: &str = "role";
pub const AFFILIATION: &str = "affiliation";
pub const ORCID_KEY: &str = "orcid";

// ------------- Person -------------
// Always embedded in another entity's document and copied by value.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Person {
    pub name: String,
    pub email: String,
    pub role: Option<String>,
    pub affiliation: Option<String>,
    pub orcid: Option<String>,
}

impl Person {
    pub fn new(name: &str, email: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            role: None,
            affiliation: None,
            orcid: None,
        }
    }
    pub fn with_role(mut self, role: &str) -> Self {
        self.role = Some(role.to_string());
        self
    }
    pub fn with_affiliation(mut self, affiliation: &str) -> Self {
        self.affiliation = Some(affiliation.to_string());
        self
    }
    pub fn with_orcid(mut self, orcid: &str) -> Result<Self> {
        if !ORCID.is_match(orcid) {
            return Err(FieldTrialError::malformed(ORCID_KEY, format!("\"{orcid}\" is not an ORCID")));
        }
        self.orcid = Some(orcid.to_string());
        Ok(self)
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        doc.insert(EMAIL.into(), Value::from(self.email.as_str()));
        json::put_string(&mut doc, ROLE, &self.role);
        json::put_string(&mut doc, AFFILIATION, &self.affiliation);
        json::put_string(&mut doc, ORCID_KEY, &self.orcid);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "person")?;
        let name = json::require_string(doc, json::NAME)?;
        let email = json::require_string(doc, EMAIL)?;
        let mut person = Person::new(&name, &email);
        person.role = json::get_string(doc, ROLE)?;
        person.affiliation = json::get_string(doc, AFFILIATION)?;
        if let Some(orcid) = json::get_string(doc, ORCID_KEY)? {
            person = person.with_orcid(&orcid)?;
        }
        Ok(person)
    }
}
