use std::collections::HashMap;
use std::hash::BuildHasherDefault;
use std::sync::Arc;

use seahash::SeaHasher;
use serde_json::Value;

use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::json::{self, Document};
use crate::ownership::Link;

pub type NameHasher = BuildHasherDefault<SeaHasher>;

pub const DATA_TYPE: &str = "data_type";
pub const UNIT: &str = "unit";
pub const ACCESSION: &str = "accession";
pub const SPECIES: &str = "species";

// ------------- VariableDataType -------------
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum VariableDataType {
    Integer,
    Real,
    Text,
    Date,
    Boolean,
}

impl VariableDataType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Real => "real",
            Self::Text => "text",
            Self::Date => "date",
            Self::Boolean => "boolean",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "integer" => Some(Self::Integer),
            "real" => Some(Self::Real),
            "text" | "string" => Some(Self::Text),
            "date" => Some(Self::Date),
            "boolean" => Some(Self::Boolean),
            _ => None,
        }
    }
}

// ------------- MeasuredVariable -------------
#[derive(Clone, PartialEq, Debug)]
pub struct MeasuredVariable {
    pub id: Option<Identifier>,
    pub name: String,
    pub data_type: VariableDataType,
    pub unit: Option<String>,
}

impl MeasuredVariable {
    pub fn new(name: &str, data_type: VariableDataType) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            data_type,
            unit: None,
        }
    }
    /// Two variables are the same when their identifiers match, or, for
    /// variables not yet stored, when their names do.
    pub fn same_as(&self, other: &MeasuredVariable) -> bool {
        match (self.id, other.id) {
            (Some(a), Some(b)) => a == b,
            _ => self.name == other.name,
        }
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        doc.insert(DATA_TYPE.into(), Value::from(self.data_type.name()));
        json::put_string(&mut doc, UNIT, &self.unit);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "measured_variable")?;
        let data_type = json::require_string(doc, DATA_TYPE)?;
        let data_type = VariableDataType::from_name(&data_type)
            .ok_or_else(|| FieldTrialError::malformed(DATA_TYPE, format!("unknown data type \"{data_type}\"")))?;
        let mut variable = MeasuredVariable::new(&json::require_string(doc, json::NAME)?, data_type);
        variable.id = json::get_id(doc, json::ID)?;
        variable.unit = json::get_string(doc, UNIT)?;
        Ok(variable)
    }
}

// ------------- Material -------------
// The seed material sown in a row.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Material {
    pub id: Option<Identifier>,
    pub accession: String,
    pub species: Option<String>,
}

impl Material {
    pub fn new(accession: &str) -> Self {
        Self {
            id: None,
            accession: accession.to_string(),
            species: None,
        }
    }
    pub fn to_json(&self) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(ACCESSION.into(), Value::from(self.accession.as_str()));
        json::put_string(&mut doc, SPECIES, &self.species);
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, json::MATERIAL)?;
        let mut material = Material::new(&json::require_string(doc, ACCESSION)?);
        material.id = json::get_id(doc, json::ID)?;
        material.species = json::get_string(doc, SPECIES)?;
        Ok(material)
    }
}

// ------------- Resolving -------------
pub trait MaterialResolver {
    fn material_by_id(&self, id: &Identifier) -> Result<Option<Material>>;
    fn material_by_accession(&self, accession: &str) -> Result<Option<Material>>;
}

pub trait VariableResolver {
    /// The variable with this name, and how the caller holds it.
    fn resolve_by_name(&self, name: &str) -> Option<Link<MeasuredVariable>>;
}

/// Keeps one canonical copy of every known measured variable.
#[derive(Debug, Default)]
pub struct VariableCatalogue {
    kept: HashMap<String, Arc<MeasuredVariable>, NameHasher>,
    detached: bool,
}

impl VariableCatalogue {
    pub fn new() -> Self {
        Self::default()
    }
    /// A catalogue whose lookups hand out private deep copies instead of shares.
    pub fn detached() -> Self {
        Self {
            detached: true,
            ..Self::default()
        }
    }
    pub fn keep(&mut self, variable: MeasuredVariable) -> (Arc<MeasuredVariable>, bool) {
        let keepsake = variable.name.to_lowercase();
        let mut previously_kept = true;
        let kept = self.kept.entry(keepsake).or_insert_with(|| {
            previously_kept = false;
            Arc::new(variable)
        });
        (Arc::clone(kept), previously_kept)
    }
    pub fn get(&self, name: &str) -> Option<Arc<MeasuredVariable>> {
        self.kept.get(&name.to_lowercase()).cloned()
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

impl VariableResolver for VariableCatalogue {
    fn resolve_by_name(&self, name: &str) -> Option<Link<MeasuredVariable>> {
        let kept = self.get(name)?;
        if self.detached {
            Some(Link::deep_copy(kept.as_ref()))
        } else {
            Some(Link::shallow(&kept))
        }
    }
}
