//! Service settings.
//!
//! Settings are read with the `config` crate from built-in defaults, an
//! optional settings file and `FIELDTRIALS__*` environment variables, in that
//! order of precedence.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use bimap::BiMap;
use serde::Deserialize;

use crate::error::{FieldTrialError, Result};

pub const ENVIRONMENT_PREFIX: &str = "FIELDTRIALS";
pub const MEMORY_DATABASE: &str = ":memory:";

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum PersistenceMode {
    InMemory,
    File(String),
}

// ------------- EntityKind -------------
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Programme,
    FieldTrial,
    Study,
    Plot,
    Row,
    Treatment,
    Crop,
    Material,
    MeasuredVariable,
}

impl EntityKind {
    pub const ALL: [EntityKind; 9] = [
        EntityKind::Programme,
        EntityKind::FieldTrial,
        EntityKind::Study,
        EntityKind::Plot,
        EntityKind::Row,
        EntityKind::Treatment,
        EntityKind::Crop,
        EntityKind::Material,
        EntityKind::MeasuredVariable,
    ];
    pub fn name(&self) -> &'static str {
        match self {
            Self::Programme => "programme",
            Self::FieldTrial => "field_trial",
            Self::Study => "study",
            Self::Plot => "plot",
            Self::Row => "row",
            Self::Treatment => "treatment",
            Self::Crop => "crop",
            Self::Material => "material",
            Self::MeasuredVariable => "measured_variable",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.name() == name)
    }
    fn default_collection(&self) -> &'static str {
        match self {
            Self::Programme => "programmes",
            Self::FieldTrial => "field_trials",
            Self::Study => "studies",
            Self::Plot => "plots",
            Self::Row => "rows",
            Self::Treatment => "treatments",
            Self::Crop => "crops",
            Self::Material => "materials",
            Self::MeasuredVariable => "measured_variables",
        }
    }
}
impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- CollectionNames -------------
// One collection per entity kind, and never one collection for two kinds.
#[derive(Clone, Debug)]
pub struct CollectionNames {
    names: BiMap<EntityKind, String>,
}

impl CollectionNames {
    pub fn with_overrides(overrides: &HashMap<String, String>) -> Result<Self> {
        let mut names = BiMap::new();
        for (kind_name, _) in overrides.iter() {
            if EntityKind::from_name(kind_name).is_none() {
                return Err(FieldTrialError::Config(format!(
                    "unknown entity kind \"{kind_name}\" in collection names"
                )));
            }
        }
        for kind in EntityKind::ALL {
            let collection = overrides
                .get(kind.name())
                .cloned()
                .unwrap_or_else(|| kind.default_collection().to_string());
            if collection.trim().is_empty() {
                return Err(FieldTrialError::Config(format!(
                    "empty collection name for {kind}"
                )));
            }
            if let Some(other) = names.get_by_right(&collection) {
                return Err(FieldTrialError::Config(format!(
                    "collection \"{collection}\" is assigned to both {other} and {kind}"
                )));
            }
            names.insert(kind, collection);
        }
        Ok(Self { names })
    }
    pub fn collection(&self, kind: EntityKind) -> &str {
        // every kind is inserted on construction
        self.names
            .get_by_left(&kind)
            .map(String::as_str)
            .unwrap_or_else(|| kind.default_collection())
    }
    pub fn kind(&self, collection: &str) -> Option<EntityKind> {
        self.names.get_by_right(collection).copied()
    }
}
impl Default for CollectionNames {
    fn default() -> Self {
        let mut names = BiMap::new();
        for kind in EntityKind::ALL {
            names.insert(kind, kind.default_collection().to_string());
        }
        Self { names }
    }
}

/// How a list of child documents is loaded when one of them is broken.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadPolicy {
    #[default]
    FailFast,
    CollectAndContinue,
}

/// Serialization depth and shape selector.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewFormat {
    #[default]
    Storage,
    ClientMinimal,
    ClientFull,
}

impl ViewFormat {
    pub fn is_client(&self) -> bool {
        !matches!(self, Self::Storage)
    }
}

// ------------- Settings -------------
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
struct RawSettings {
    database: String,
    log_filter: String,
    row_load_policy: LoadPolicy,
    default_view: ViewFormat,
    collections: HashMap<String, String>,
}
impl Default for RawSettings {
    fn default() -> Self {
        Self {
            database: MEMORY_DATABASE.to_string(),
            log_filter: "fieldtrials=info".to_string(),
            row_load_policy: LoadPolicy::default(),
            default_view: ViewFormat::default(),
            collections: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct Settings {
    pub persistence: PersistenceMode,
    pub log_filter: String,
    pub row_load_policy: LoadPolicy,
    pub default_view: ViewFormat,
    pub collections: CollectionNames,
}

impl Settings {
    pub fn in_memory() -> Self {
        Self {
            persistence: PersistenceMode::InMemory,
            ..Self::default()
        }
    }
    /// Reads settings from an optional file (any format the `config` crate
    /// recognises by extension) overlaid by `FIELDTRIALS__*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = ::config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(::config::File::from(path).required(true));
        } else {
            builder = builder.add_source(::config::File::with_name("fieldtrials").required(false));
        }
        let raw: RawSettings = builder
            .add_source(
                ::config::Environment::with_prefix(ENVIRONMENT_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;
        Self::from_raw(raw)
    }
    fn from_raw(raw: RawSettings) -> Result<Self> {
        let persistence = if raw.database.is_empty() || raw.database == MEMORY_DATABASE {
            PersistenceMode::InMemory
        } else {
            PersistenceMode::File(raw.database)
        };
        Ok(Self {
            persistence,
            log_filter: raw.log_filter,
            row_load_policy: raw.row_load_policy,
            default_view: raw.default_view,
            collections: CollectionNames::with_overrides(&raw.collections)?,
        })
    }
}
impl Default for Settings {
    fn default() -> Self {
        let raw = RawSettings::default();
        Self {
            persistence: PersistenceMode::InMemory,
            log_filter: raw.log_filter,
            row_load_policy: raw.row_load_policy,
            default_view: raw.default_view,
            collections: CollectionNames::default(),
        }
    }
}
