//! Rows of a plot.
//!
//! A row is either a standard agronomic row, which carries the sown material,
//! its observations and its treatment factor values, or a discard row, a
//! placeholder for a blank rack position. Both share the positional fields in
//! [`RowCore`], which is all the persistence layer needs to handle a row
//! without knowing its variant.

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::config::ViewFormat;
use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::job::{OperationStatus, ReportSink, Tally};
use crate::json::{self, Document};
use crate::observation::{Observation, ObservationColumn, ObservationMetadata, ObservationValue};
use crate::ownership::Link;
use crate::plot::Plot;
use crate::study::Study;
use crate::treatment::{self, TreatmentFactorValue};
use crate::variable::{Material, MaterialResolver, MeasuredVariable, VariableResolver};

pub const TREATMENT_COLUMN_PREFIX: &str = "treatment:";

// ------------- RowType -------------
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum RowType {
    Standard,
    Blank,
}

impl RowType {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Standard => "standard",
            Self::Blank => "blank",
        }
    }
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "standard" => Some(Self::Standard),
            "blank" => Some(Self::Blank),
            _ => None,
        }
    }
}
impl fmt::Display for RowType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ------------- RowCore -------------
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RowCore {
    pub id: Option<Identifier>,
    pub plot_id: Option<Identifier>,
    pub study_id: Option<Identifier>,
    pub study_index: u32,
    pub rack_index: u32,
    pub replicate: u32,
    pub control: bool,
}

impl RowCore {
    /// The fields every row variant is initialised with. The plot is only
    /// referred to by its identifier, it is never owned by the row.
    pub fn new(id: Option<Identifier>, rack_index: u32, study_index: u32, replicate: u32, plot: &Plot) -> Self {
        Self {
            id,
            plot_id: plot.id,
            study_id: plot.study_id,
            study_index,
            rack_index,
            replicate,
            control: false,
        }
    }
    fn write_into(&self, doc: &mut Document, row_type: RowType) {
        json::put_id(doc, json::ID, &self.id);
        doc.insert(json::ROW_TYPE.into(), Value::from(row_type.name()));
        json::put_id(doc, json::PLOT_ID, &self.plot_id);
        json::put_id(doc, json::STUDY_ID, &self.study_id);
        self.write_positions(doc);
    }
    fn write_positions(&self, doc: &mut Document) {
        doc.insert(json::STUDY_INDEX.into(), Value::from(self.study_index));
        doc.insert(json::RACK_INDEX.into(), Value::from(self.rack_index));
        doc.insert(json::REPLICATE.into(), Value::from(self.replicate));
        doc.insert(json::CONTROL.into(), Value::Bool(self.control));
    }
    fn read_from(doc: &Document, plot: &Plot) -> Result<Self> {
        let mut core = RowCore::new(
            json::get_id(doc, json::ID)?,
            json::require_u32(doc, json::RACK_INDEX)?,
            json::require_u32(doc, json::STUDY_INDEX)?,
            json::get_u32(doc, json::REPLICATE)?.unwrap_or(1),
            plot,
        );
        // Ids stored on the row win over those of a plot that is not saved yet.
        if core.plot_id.is_none() {
            core.plot_id = json::get_id(doc, json::PLOT_ID)?;
        }
        if core.study_id.is_none() {
            core.study_id = json::get_id(doc, json::STUDY_ID)?;
        }
        core.control = json::get_bool(doc, json::CONTROL)?.unwrap_or(false);
        Ok(core)
    }
}

// ------------- Observation upsert -------------
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum UpsertMode {
    /// Overwrite the matching observation's value slot, or add one if none matches.
    #[default]
    Replace,
    /// Always add a new observation, as the next sample if the key is taken.
    Append,
}

/// One submitted observation value and what it was measured under.
#[derive(Clone, Debug, Default)]
pub struct ObservationParts {
    pub metadata: ObservationMetadata,
    pub raw: Option<Value>,
    pub corrected: Option<Value>,
    pub notes: Option<String>,
}

// ------------- StandardRow -------------
#[derive(Debug)]
pub struct StandardRow {
    core: RowCore,
    material: Link<Material>,
    observations: Vec<Observation>,
    treatment_factor_values: Vec<TreatmentFactorValue>,
}

impl StandardRow {
    pub fn new(
        id: Option<Identifier>,
        rack_index: u32,
        study_index: u32,
        replicate: u32,
        material: Link<Material>,
        plot: &Plot,
    ) -> Result<Self> {
        if material.resolve().is_none() {
            return Err(FieldTrialError::unresolved("material", format!("row {study_index}")));
        }
        Ok(Self {
            core: RowCore::new(id, rack_index, study_index, replicate, plot),
            material,
            observations: Vec::new(),
            treatment_factor_values: Vec::new(),
        })
    }
    pub fn core(&self) -> &RowCore {
        &self.core
    }
    pub fn core_mut(&mut self) -> &mut RowCore {
        &mut self.core
    }
    pub fn material(&self) -> Option<Arc<Material>> {
        self.material.resolve()
    }
    pub fn material_link(&self) -> &Link<Material> {
        &self.material
    }
    pub fn set_material(&mut self, material: Link<Material>) {
        self.material = material;
    }
    /// Observations in the order they were added.
    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }
    pub fn find_observation(&self, variable: &MeasuredVariable, metadata: &ObservationMetadata) -> Option<&Observation> {
        self.observations.iter().find(|o| o.matches(variable, metadata))
    }
    pub fn treatment_factor_values(&self) -> &[TreatmentFactorValue] {
        &self.treatment_factor_values
    }
    /// Adds an observation unless one with the same key is already present.
    pub fn add_observation(&mut self, observation: Observation) -> Result<()> {
        if self.find_observation(&observation.variable, &observation.metadata).is_some() {
            return Err(FieldTrialError::malformed(
                json::OBSERVATIONS,
                format!("duplicate observation of \"{}\"", observation.variable.name),
            ));
        }
        self.observations.push(observation);
        Ok(())
    }
    /// Sets the row's level of a treatment factor, replacing any previous
    /// level of the same factor.
    pub fn set_treatment_factor_value(&mut self, value: TreatmentFactorValue) {
        match self
            .treatment_factor_values
            .iter_mut()
            .find(|v| Arc::ptr_eq(v.factor(), value.factor()))
        {
            Some(existing) => *existing = value,
            None => self.treatment_factor_values.push(value),
        }
    }

    /// Merges one observation value into the row.
    ///
    /// An existing observation matches when its variable and metadata compare
    /// equal. The supplied value slot (raw and/or corrected) of the match is
    /// overwritten and everything else about it is kept, so a correction can be
    /// submitted separately from the raw value. Otherwise a new observation is
    /// appended. Problems are reported against `field`.
    ///
    /// The variable link is consumed: owned links are released when this
    /// returns, unless a new observation keeps the variable.
    pub fn add_observation_by_parts(
        &mut self,
        variable: Link<MeasuredVariable>,
        parts: &ObservationParts,
        mode: UpsertMode,
        sink: &mut dyn ReportSink,
        field: &str,
    ) -> OperationStatus {
        let Some(variable) = variable.resolve() else {
            sink.report_field_error(field, None, "the measured variable is no longer available");
            return OperationStatus::Failed;
        };
        if parts.raw.is_none() && parts.corrected.is_none() {
            sink.report_field_error(field, None, "no raw or corrected value was given");
            return OperationStatus::Failed;
        }
        let mut tally = Tally::new();
        let mut convert = |value: &Option<Value>, tally: &mut Tally| -> Option<ObservationValue> {
            let value = value.as_ref()?;
            let converted = ObservationValue::from_json(value, variable.data_type);
            if converted.is_none() {
                sink.report_field_error(
                    field,
                    Some(value),
                    &format!("not a valid {} value for \"{}\"", variable.data_type.name(), variable.name),
                );
            }
            tally.record(converted.is_some());
            converted
        };
        let raw = convert(&parts.raw, &mut tally);
        let corrected = convert(&parts.corrected, &mut tally);
        if raw.is_none() && corrected.is_none() {
            return OperationStatus::Failed;
        }

        let mut metadata = parts.metadata.clone();
        match mode {
            UpsertMode::Replace => {
                if let Some(existing) = self.observations.iter_mut().find(|o| o.matches(&variable, &metadata)) {
                    if raw.is_some() {
                        existing.raw_value = raw;
                    }
                    if corrected.is_some() {
                        existing.corrected_value = corrected;
                    }
                    debug!(row = ?self.core.id, variable = %variable.name, "observation updated");
                    return tally.status();
                }
            }
            UpsertMode::Append => {
                if self.find_observation(&variable, &metadata).is_some() {
                    let Some(sample_index) = self.next_sample_index(&variable, &metadata) else {
                        sink.report_field_error(field, None, "no sample index is left for another observation");
                        return OperationStatus::Failed;
                    };
                    metadata.sample_index = sample_index;
                }
            }
        }
        let mut observation = Observation::new(Arc::clone(&variable), metadata);
        observation.raw_value = raw;
        observation.corrected_value = corrected;
        observation.notes = parts.notes.clone();
        self.observations.push(observation);
        debug!(row = ?self.core.id, variable = %variable.name, "observation added");
        tally.status()
    }
    fn next_sample_index(&self, variable: &MeasuredVariable, metadata: &ObservationMetadata) -> Option<u32> {
        self.observations
            .iter()
            .filter(|o| {
                let mut key = o.metadata.clone();
                key.sample_index = metadata.sample_index;
                o.variable.same_as(variable) && key == *metadata
            })
            .map(|o| o.metadata.sample_index)
            .max()
            .unwrap_or(metadata.sample_index)
            .checked_add(1)
    }

    fn to_json(&self, view: ViewFormat) -> Value {
        let mut doc = Document::new();
        self.core.write_into(&mut doc, RowType::Standard);
        if let Some(material) = self.material() {
            json::put_id(&mut doc, json::MATERIAL_ID, &material.id);
            if view == ViewFormat::ClientFull {
                doc.insert(json::MATERIAL.into(), material.to_json());
            }
        }
        let observations: Vec<Value> = self.observations.iter().map(Observation::to_json).collect();
        doc.insert(json::OBSERVATIONS.into(), Value::Array(observations));
        let treatments: Vec<Value> = self
            .treatment_factor_values
            .iter()
            .map(|v| v.to_json(view.is_client()))
            .collect();
        doc.insert(json::TREATMENTS.into(), Value::Array(treatments));
        Value::Object(doc)
    }
    fn to_frictionless(&self) -> Value {
        let mut doc = Document::new();
        self.core.write_positions(&mut doc);
        if let Some(material) = self.material() {
            doc.insert(crate::variable::ACCESSION.into(), Value::from(material.accession.as_str()));
        }
        for observation in &self.observations {
            if let Some(raw) = &observation.raw_value {
                let column = ObservationColumn::for_observation(observation, false);
                doc.insert(column.to_string(), raw.to_json());
            }
            if let Some(corrected) = &observation.corrected_value {
                let column = ObservationColumn::for_observation(observation, true);
                doc.insert(column.to_string(), corrected.to_json());
            }
        }
        for value in &self.treatment_factor_values {
            if let Some(treatment) = value.factor().treatment() {
                doc.insert(
                    format!("{TREATMENT_COLUMN_PREFIX}{}", treatment.name()),
                    Value::from(value.label()),
                );
            }
        }
        Value::Object(doc)
    }

    fn from_json(doc: &Document, core: RowCore, context: &RowContext, material: Option<Link<Material>>, sink: &mut dyn ReportSink) -> Option<Self> {
        let material = match material {
            Some(material) => material,
            None => match resolve_material(doc, context.materials, context.view == ViewFormat::ClientFull) {
                Ok(material) => material,
                Err(e) => {
                    report(sink, json::MATERIAL_ID, doc.get(json::MATERIAL_ID), &e);
                    return None;
                }
            },
        };
        let mut row = Self {
            core,
            material,
            observations: Vec::new(),
            treatment_factor_values: Vec::new(),
        };

        match json::get_array(doc, json::OBSERVATIONS) {
            Ok(Some(items)) => {
                let mut tally = Tally::new();
                for item in items {
                    let added = Observation::from_json(item, context.resolver).and_then(|o| row.add_observation(o));
                    if let Err(e) = &added {
                        report(sink, json::OBSERVATIONS, Some(item), e);
                    }
                    tally.record(added.is_ok());
                }
                merge_partial(sink, &tally);
            }
            Ok(None) => {}
            Err(e) => {
                report(sink, json::OBSERVATIONS, doc.get(json::OBSERVATIONS), &e);
                sink.merge_status(OperationStatus::PartiallySucceeded);
            }
        }

        match json::get_array(doc, json::TREATMENTS) {
            Ok(Some(items)) => {
                let mut tally = Tally::new();
                for item in items {
                    let resolved = resolve_treatment_factor_value(item, context.study);
                    match resolved {
                        Ok(value) => {
                            row.set_treatment_factor_value(value);
                            tally.record(true);
                        }
                        Err(e) => {
                            report(sink, json::TREATMENTS, Some(item), &e);
                            tally.record(false);
                        }
                    }
                }
                merge_partial(sink, &tally);
            }
            Ok(None) => {}
            Err(e) => {
                report(sink, json::TREATMENTS, doc.get(json::TREATMENTS), &e);
                sink.merge_status(OperationStatus::PartiallySucceeded);
            }
        }
        Some(row)
    }
}

fn report(sink: &mut dyn ReportSink, field: &str, value: Option<&Value>, error: &FieldTrialError) {
    sink.report_field_error(error.field().unwrap_or(field), value, &error.to_string());
}

// Item failures inside a row leave the row usable, so they can only ever
// downgrade the job to a partial success.
fn merge_partial(sink: &mut dyn ReportSink, tally: &Tally) {
    if tally.total() > 0 && !tally.status().is_success() {
        sink.merge_status(OperationStatus::PartiallySucceeded);
    }
}

// Client views may carry an edited material inline, which then takes
// precedence over the stored reference.
fn resolve_material(doc: &Document, materials: &dyn MaterialResolver, prefer_embedded: bool) -> Result<Link<Material>> {
    if !prefer_embedded || !doc.contains_key(json::MATERIAL) {
        if let Some(id) = json::get_id(doc, json::MATERIAL_ID)? {
            if let Some(material) = materials.material_by_id(&id)? {
                return Ok(Link::owned(material));
            }
        }
    }
    match doc.get(json::MATERIAL) {
        Some(value @ Value::Object(_)) => {
            let submitted = Material::from_json(value)?;
            match materials.material_by_accession(&submitted.accession)? {
                Some(stored) => Ok(Link::owned(stored)),
                None => Ok(Link::owned(submitted)),
            }
        }
        Some(Value::String(accession)) if !accession.trim().is_empty() => {
            match materials.material_by_accession(accession.trim())? {
                Some(stored) => Ok(Link::owned(stored)),
                None => Ok(Link::owned(Material::new(accession.trim()))),
            }
        }
        _ => Err(FieldTrialError::unresolved(
            "material",
            json::get_string(doc, json::MATERIAL_ID).ok().flatten().unwrap_or_default(),
        )),
    }
}

fn resolve_treatment_factor_value(item: &Value, study: &Study) -> Result<TreatmentFactorValue> {
    let doc = json::as_document(item, json::TREATMENTS)?;
    let label = json::require_string(doc, treatment::LABEL)?;
    let factor = match json::get_id(doc, treatment::TREATMENT_ID)? {
        Some(id) => study.treatment_factor_by_treatment_id(&id),
        None => match json::get_string(doc, treatment::TREATMENT)? {
            Some(name) => study.treatment_factor_by_name(&name),
            None => return Err(FieldTrialError::malformed(treatment::TREATMENT_ID, "required field is missing")),
        },
    };
    let factor = factor.ok_or_else(|| FieldTrialError::unresolved("treatment factor", label.as_str()))?;
    factor
        .value(&label)
        .ok_or_else(|| FieldTrialError::unresolved("treatment factor level", label.as_str()))
}

// ------------- DiscardRow -------------
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct DiscardRow {
    core: RowCore,
}

impl DiscardRow {
    pub fn new(id: Option<Identifier>, rack_index: u32, study_index: u32, plot: &Plot) -> Self {
        Self {
            core: RowCore::new(id, rack_index, study_index, 1, plot),
        }
    }
    pub fn core(&self) -> &RowCore {
        &self.core
    }
    fn to_json(&self) -> Value {
        let mut doc = Document::new();
        self.core.write_into(&mut doc, RowType::Blank);
        doc.insert(json::DISCARD.into(), Value::Bool(true));
        Value::Object(doc)
    }
    fn to_frictionless(&self) -> Value {
        let mut doc = Document::new();
        self.core.write_positions(&mut doc);
        doc.insert(json::DISCARD.into(), Value::Bool(true));
        Value::Object(doc)
    }
}

// ------------- Row -------------
/// What a row needs to know about its surroundings when it is read from JSON.
pub struct RowContext<'a> {
    pub plot: &'a Plot,
    pub study: &'a Study,
    pub view: ViewFormat,
    pub resolver: &'a dyn VariableResolver,
    pub materials: &'a dyn MaterialResolver,
}

#[derive(Debug)]
pub enum Row {
    Standard(StandardRow),
    Discard(DiscardRow),
}

impl Row {
    pub fn core(&self) -> &RowCore {
        match self {
            Self::Standard(row) => &row.core,
            Self::Discard(row) => &row.core,
        }
    }
    pub fn core_mut(&mut self) -> &mut RowCore {
        match self {
            Self::Standard(row) => &mut row.core,
            Self::Discard(row) => &mut row.core,
        }
    }
    pub fn id(&self) -> Option<Identifier> {
        self.core().id
    }
    pub fn study_index(&self) -> u32 {
        self.core().study_index
    }
    pub fn row_type(&self) -> RowType {
        match self {
            Self::Standard(_) => RowType::Standard,
            Self::Discard(_) => RowType::Blank,
        }
    }
    pub fn as_standard(&self) -> Option<&StandardRow> {
        match self {
            Self::Standard(row) => Some(row),
            Self::Discard(_) => None,
        }
    }
    pub fn as_standard_mut(&mut self) -> Option<&mut StandardRow> {
        match self {
            Self::Standard(row) => Some(row),
            Self::Discard(_) => None,
        }
    }
    pub fn to_json(&self, view: ViewFormat) -> Value {
        match self {
            Self::Standard(row) => row.to_json(view),
            Self::Discard(row) => row.to_json(),
        }
    }
    pub fn to_frictionless(&self) -> Value {
        match self {
            Self::Standard(row) => row.to_frictionless(),
            Self::Discard(row) => row.to_frictionless(),
        }
    }

    /// Reads one row document, dispatching on its `row_type`.
    ///
    /// Returns `None`, with a field error reported, when the row itself cannot
    /// be built: a malformed id or position, an unknown row type or a standard
    /// row whose material cannot be found. Broken observations and treatment
    /// values are reported one by one and skipped.
    pub fn from_json(value: &Value, context: &RowContext, material: Option<Link<Material>>, sink: &mut dyn ReportSink) -> Option<Row> {
        let doc = match json::as_document(value, "row") {
            Ok(doc) => doc,
            Err(e) => {
                report(sink, "row", Some(value), &e);
                return None;
            }
        };
        let row_type = match json::require_string(doc, json::ROW_TYPE) {
            Ok(name) => match RowType::from_name(&name) {
                Some(row_type) => row_type,
                None => {
                    sink.report_field_error(
                        json::ROW_TYPE,
                        doc.get(json::ROW_TYPE),
                        &format!("unknown row type \"{name}\""),
                    );
                    return None;
                }
            },
            Err(e) => {
                report(sink, json::ROW_TYPE, doc.get(json::ROW_TYPE), &e);
                return None;
            }
        };
        let core = match RowCore::read_from(doc, context.plot) {
            Ok(core) => core,
            Err(e) => {
                let field = e.field().unwrap_or(json::ID).to_string();
                report(sink, &field, doc.get(&field), &e);
                return None;
            }
        };
        match row_type {
            RowType::Standard => StandardRow::from_json(doc, core, context, material, sink).map(Row::Standard),
            RowType::Blank => Some(Row::Discard(DiscardRow { core })),
        }
    }
}
