//! Frictionless Data export.
//!
//! A study is exported as a tabular data package with a single `plots`
//! resource holding one flat record per row. Rows must be loaded into the
//! study's plots before exporting.

use serde_json::{json, Value};

use crate::json as keys;
use crate::observation::ObservationColumn;
use crate::plot;
use crate::row::TREATMENT_COLUMN_PREFIX;
use crate::study::Study;
use crate::variable::{self, VariableDataType};

pub const PACKAGE_PROFILE: &str = "tabular-data-package";
pub const RESOURCE_PROFILE: &str = "tabular-data-resource";
pub const PLOTS_RESOURCE: &str = "plots";

fn field_type(data_type: VariableDataType) -> &'static str {
    match data_type {
        VariableDataType::Integer => "integer",
        VariableDataType::Real => "number",
        VariableDataType::Text => "string",
        VariableDataType::Date => "date",
        VariableDataType::Boolean => "boolean",
    }
}

#[derive(Default)]
struct Schema {
    fields: Vec<(String, &'static str)>,
}

impl Schema {
    fn add(&mut self, name: String, field_type: &'static str) {
        if !self.fields.iter().any(|(n, _)| *n == name) {
            self.fields.push((name, field_type));
        }
    }
    fn to_json(&self) -> Value {
        let fields: Vec<Value> = self
            .fields
            .iter()
            .map(|(name, field_type)| json!({ "name": name, "type": field_type }))
            .collect();
        json!({ "fields": fields })
    }
}

/// A package name must be lower case alphanumerics with `-`, `_` or `.`.
pub fn package_name(title: &str) -> String {
    let mut name = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            name.push(c.to_ascii_lowercase());
        } else if !name.ends_with('-') {
            name.push('-');
        }
    }
    name.trim_matches('-').to_string()
}

pub fn study_package(study: &Study) -> Value {
    let mut schema = Schema::default();
    for (name, field_type) in [
        (plot::ROW_INDEX, "integer"),
        (plot::COLUMN_INDEX, "integer"),
        (keys::STUDY_INDEX, "integer"),
        (keys::RACK_INDEX, "integer"),
        (keys::REPLICATE, "integer"),
        (keys::CONTROL, "boolean"),
        (variable::ACCESSION, "string"),
        (keys::DISCARD, "boolean"),
    ] {
        schema.add(name.to_string(), field_type);
    }
    let mut records = Vec::new();
    let mut row_count = 0;
    for plot in study.plots() {
        for row in plot.rows() {
            row_count += 1;
            let Some(standard) = row.as_standard() else {
                continue;
            };
            for observation in standard.observations() {
                let data_type = field_type(observation.variable.data_type);
                if observation.raw_value.is_some() {
                    schema.add(ObservationColumn::for_observation(observation, false).to_string(), data_type);
                }
                if observation.corrected_value.is_some() {
                    schema.add(ObservationColumn::for_observation(observation, true).to_string(), data_type);
                }
            }
            for value in standard.treatment_factor_values() {
                if let Some(treatment) = value.factor().treatment() {
                    schema.add(format!("{TREATMENT_COLUMN_PREFIX}{}", treatment.name()), "string");
                }
            }
        }
        records.extend(plot.to_frictionless());
    }
    tracing::debug!(study = %study.name, rows = row_count, fields = schema.fields.len(), "study exported");

    let mut package = json!({
        "profile": PACKAGE_PROFILE,
        "name": package_name(&study.name),
        "title": study.name,
        "resources": [{
            "name": PLOTS_RESOURCE,
            "profile": RESOURCE_PROFILE,
            "format": "json",
            "data": records,
            "schema": schema.to_json(),
        }],
    });
    if let (Some(id), Value::Object(doc)) = (study.id, &mut package) {
        doc.insert(keys::ID.into(), Value::from(id.to_hex()));
    }
    package
}
