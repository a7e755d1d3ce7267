use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::Value;

use crate::config::ViewFormat;
use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::job::{OperationStatus, ReportSink, Tally};
use crate::json::{self, Document};
use crate::plot::Plot;
use crate::treatment::{self, TreatmentFactor, TreatmentResolver};

pub const DESCRIPTION: &str = "description";
pub const DESIGN: &str = "design";
pub const FIELD_TRIAL_ID: &str = "field_trial_id";
pub const LOCATION_ID: &str = "location_id";
pub const CURRENT_CROP_ID: &str = "current_crop_id";
pub const PREVIOUS_CROP_ID: &str = "previous_crop_id";
pub const START_DATE: &str = "start_date";
pub const END_DATE: &str = "end_date";
pub const TREATMENT_FACTORS: &str = "treatment_factors";
pub const PLOTS: &str = "plots";

// ------------- Study -------------
#[derive(Debug)]
pub struct Study {
    pub id: Option<Identifier>,
    pub name: String,
    pub description: Option<String>,
    pub design: Option<String>,
    pub field_trial_id: Option<Identifier>,
    pub location_id: Option<Identifier>,
    pub current_crop_id: Option<Identifier>,
    pub previous_crop_id: Option<Identifier>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    plots: Vec<Plot>,
    treatment_factors: Vec<Arc<TreatmentFactor>>,
}

impl Study {
    pub fn new(name: &str, field_trial_id: Option<Identifier>) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            description: None,
            design: None,
            field_trial_id,
            location_id: None,
            current_crop_id: None,
            previous_crop_id: None,
            start_date: None,
            end_date: None,
            plots: Vec::new(),
            treatment_factors: Vec::new(),
        }
    }

    // ------------- plots -------------
    pub fn plots(&self) -> &[Plot] {
        &self.plots
    }
    pub fn plots_mut(&mut self) -> &mut [Plot] {
        &mut self.plots
    }
    /// Adds a plot; no two plots of a study share a row and column index.
    pub fn add_plot(&mut self, mut plot: Plot) -> Result<&mut Plot> {
        if self.plot_at(plot.row_index, plot.column_index).is_some() {
            return Err(FieldTrialError::malformed(
                crate::plot::ROW_INDEX,
                format!(
                    "study already has a plot at row {} column {}",
                    plot.row_index, plot.column_index
                ),
            ));
        }
        plot.study_id = self.id;
        plot.relink_rows();
        self.plots.push(plot);
        let last = self.plots.len() - 1;
        Ok(&mut self.plots[last])
    }
    pub fn plot_at(&self, row_index: u32, column_index: u32) -> Option<&Plot> {
        self.plots.iter().find(|p| p.position() == (row_index, column_index))
    }
    pub fn plot_at_mut(&mut self, row_index: u32, column_index: u32) -> Option<&mut Plot> {
        self.plots.iter_mut().find(|p| p.position() == (row_index, column_index))
    }
    pub fn plot_by_id_mut(&mut self, id: &Identifier) -> Option<&mut Plot> {
        self.plots.iter_mut().find(|p| p.id.as_ref() == Some(id))
    }
    pub fn take_plots(&mut self) -> Vec<Plot> {
        std::mem::take(&mut self.plots)
    }
    pub fn clear_plots(&mut self) {
        self.plots.clear();
    }

    // ------------- treatment factors -------------
    pub fn treatment_factors(&self) -> &[Arc<TreatmentFactor>] {
        &self.treatment_factors
    }
    /// Adds a factor; a treatment can only be a factor of a study once.
    pub fn add_treatment_factor(&mut self, mut factor: TreatmentFactor) -> Result<Arc<TreatmentFactor>> {
        let Some(treatment) = factor.treatment() else {
            return Err(FieldTrialError::unresolved("treatment", "released treatment"));
        };
        if self.treatment_factor_by_name(treatment.name()).is_some() {
            return Err(FieldTrialError::malformed(
                TREATMENT_FACTORS,
                format!("\"{}\" is already a treatment factor of this study", treatment.name()),
            ));
        }
        if let Some(id) = self.id {
            factor.set_study_id(id);
        }
        let factor = Arc::new(factor);
        self.treatment_factors.push(Arc::clone(&factor));
        Ok(factor)
    }
    pub fn treatment_factor_by_treatment_id(&self, id: &Identifier) -> Option<Arc<TreatmentFactor>> {
        self.treatment_factors
            .iter()
            .find(|f| f.treatment_id().as_ref() == Some(id))
            .cloned()
    }
    pub fn treatment_factor_by_name(&self, name: &str) -> Option<Arc<TreatmentFactor>> {
        self.treatment_factors
            .iter()
            .find(|f| f.treatment().is_some_and(|t| t.is_named(name)))
            .cloned()
    }

    // ------------- JSON -------------
    /// The study document. Plots are embedded only when `expand` is set, and
    /// then without their rows.
    pub fn to_json(&self, view: ViewFormat, expand: bool) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        doc.insert(json::NAME.into(), Value::from(self.name.as_str()));
        json::put_string(&mut doc, DESCRIPTION, &self.description);
        json::put_string(&mut doc, DESIGN, &self.design);
        json::put_id(&mut doc, FIELD_TRIAL_ID, &self.field_trial_id);
        json::put_id(&mut doc, LOCATION_ID, &self.location_id);
        json::put_id(&mut doc, CURRENT_CROP_ID, &self.current_crop_id);
        json::put_id(&mut doc, PREVIOUS_CROP_ID, &self.previous_crop_id);
        json::put_date(&mut doc, START_DATE, &self.start_date);
        json::put_date(&mut doc, END_DATE, &self.end_date);
        let factors: Vec<Value> = self.treatment_factors.iter().map(|f| f.to_json()).collect();
        doc.insert(TREATMENT_FACTORS.into(), Value::Array(factors));
        if expand {
            let plots: Vec<Value> = self.plots.iter().map(|p| p.to_json(view, false)).collect();
            doc.insert(PLOTS.into(), Value::Array(plots));
        }
        Value::Object(doc)
    }
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "study")?;
        let mut study = Study::new(&json::require_string(doc, json::NAME)?, json::get_id(doc, FIELD_TRIAL_ID)?);
        study.id = json::get_id(doc, json::ID)?;
        study.description = json::get_string(doc, DESCRIPTION)?;
        study.design = json::get_string(doc, DESIGN)?;
        study.location_id = json::get_id(doc, LOCATION_ID)?;
        study.current_crop_id = json::get_id(doc, CURRENT_CROP_ID)?;
        study.previous_crop_id = json::get_id(doc, PREVIOUS_CROP_ID)?;
        study.start_date = json::get_date(doc, START_DATE)?;
        study.end_date = json::get_date(doc, END_DATE)?;
        Ok(study)
    }
    /// Reads the `treatment_factors` array of a study document. Factors whose
    /// treatment cannot be found are reported and skipped.
    pub fn add_treatment_factors_from_json(
        &mut self,
        value: &Value,
        treatments: &dyn TreatmentResolver,
        sink: &mut dyn ReportSink,
    ) -> Result<OperationStatus> {
        let doc = json::as_document(value, "study")?;
        let items = match json::get_array(doc, TREATMENT_FACTORS)? {
            Some(items) if !items.is_empty() => items,
            _ => return Ok(OperationStatus::Succeeded),
        };
        let mut tally = Tally::new();
        for item in items {
            let added = json::as_document(item, TREATMENT_FACTORS)
                .and_then(|factor| json::require_id(factor, treatment::TREATMENT_ID))
                .and_then(|id| {
                    treatments
                        .treatment_by_id(&id)?
                        .ok_or_else(|| FieldTrialError::unresolved("treatment", id.to_hex()))
                })
                .and_then(|treatment| TreatmentFactor::from_json(item, treatment, self.id))
                .and_then(|factor| self.add_treatment_factor(factor));
            if let Err(e) = &added {
                sink.report_field_error(TREATMENT_FACTORS, Some(item), &e.to_string());
            }
            tally.record(added.is_ok());
        }
        Ok(tally.status())
    }
}
