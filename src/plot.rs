use chrono::NaiveDate;
use serde_json::Value;

use crate::config::ViewFormat;
use crate::error::{FieldTrialError, Result};
use crate::identifier::Identifier;
use crate::job::{OperationStatus, ReportSink, Tally};
use crate::json::{self, Document};
use crate::row::{Row, RowContext};
use crate::study::Study;
use crate::variable::{MaterialResolver, VariableResolver};

pub const ROW_INDEX: &str = "row_index";
pub const COLUMN_INDEX: &str = "column_index";
pub const REPLICATE_INDEX: &str = "replicate_index";
pub const WIDTH: &str = "width";
pub const LENGTH: &str = "length";
pub const SOWING_DATE: &str = "sowing_date";
pub const HARVEST_DATE: &str = "harvest_date";
pub const GROWING_CONDITIONS: &str = "growing_conditions";
pub const COMMENT: &str = "comment";

// ------------- Plot -------------
#[derive(Debug)]
pub struct Plot {
    pub id: Option<Identifier>,
    pub study_id: Option<Identifier>,
    pub row_index: u32,
    pub column_index: u32,
    pub replicate_index: Option<u32>,
    pub width: Option<f64>,
    pub length: Option<f64>,
    pub sowing_date: Option<NaiveDate>,
    pub harvest_date: Option<NaiveDate>,
    pub growing_conditions: Option<String>,
    pub comment: Option<String>,
    rows: Vec<Row>,
    // stored rows removed since the last save
    removed: Vec<Identifier>,
}

impl Plot {
    pub fn new(study_id: Option<Identifier>, row_index: u32, column_index: u32) -> Self {
        Self {
            id: None,
            study_id,
            row_index,
            column_index,
            replicate_index: None,
            width: None,
            length: None,
            sowing_date: None,
            harvest_date: None,
            growing_conditions: None,
            comment: None,
            rows: Vec::new(),
            removed: Vec::new(),
        }
    }
    pub fn position(&self) -> (u32, u32) {
        (self.row_index, self.column_index)
    }
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
    pub fn rows_mut(&mut self) -> &mut [Row] {
        &mut self.rows
    }
    /// Adds a row, linking it to this plot. Rows are kept in the order added;
    /// two rows may not share a study index.
    pub fn add_row(&mut self, mut row: Row) -> Result<()> {
        if self.row_by_study_index(row.study_index()).is_some() {
            return Err(FieldTrialError::malformed(
                json::STUDY_INDEX,
                format!("plot already has a row with study index {}", row.study_index()),
            ));
        }
        let core = row.core_mut();
        core.plot_id = self.id;
        core.study_id = self.study_id;
        self.rows.push(row);
        Ok(())
    }
    pub fn row_by_study_index(&self, study_index: u32) -> Option<&Row> {
        self.rows.iter().find(|r| r.study_index() == study_index)
    }
    pub fn row_by_study_index_mut(&mut self, study_index: u32) -> Option<&mut Row> {
        self.rows.iter_mut().find(|r| r.study_index() == study_index)
    }
    /// Detaches the row at `study_index`, keeping the order of the others.
    /// A row that was already stored is deleted from the store on the next
    /// save of this plot.
    pub fn remove_row(&mut self, study_index: u32) -> Option<Row> {
        let position = self.rows.iter().position(|r| r.study_index() == study_index)?;
        let row = self.rows.remove(position);
        if let Some(id) = row.id() {
            self.removed.push(id);
        }
        Some(row)
    }
    pub fn take_removed(&mut self) -> Vec<Identifier> {
        std::mem::take(&mut self.removed)
    }
    pub fn take_rows(&mut self) -> Vec<Row> {
        std::mem::take(&mut self.rows)
    }
    pub fn clear_rows(&mut self) {
        self.rows.clear();
    }
    /// Points every row at this plot, e.g. once the plot has been given an id.
    pub fn relink_rows(&mut self) {
        for row in self.rows.iter_mut() {
            let core = row.core_mut();
            core.plot_id = self.id;
            core.study_id = self.study_id;
        }
    }

    /// The plot document. Rows are embedded as `rows` only when `expand` is
    /// set; otherwise the key is left out altogether.
    pub fn to_json(&self, view: ViewFormat, expand: bool) -> Value {
        let mut doc = Document::new();
        json::put_id(&mut doc, json::ID, &self.id);
        json::put_id(&mut doc, json::STUDY_ID, &self.study_id);
        doc.insert(ROW_INDEX.into(), Value::from(self.row_index));
        doc.insert(COLUMN_INDEX.into(), Value::from(self.column_index));
        if let Some(replicate) = self.replicate_index {
            doc.insert(REPLICATE_INDEX.into(), Value::from(replicate));
        }
        json::put_real(&mut doc, WIDTH, self.width);
        json::put_real(&mut doc, LENGTH, self.length);
        json::put_date(&mut doc, SOWING_DATE, &self.sowing_date);
        json::put_date(&mut doc, HARVEST_DATE, &self.harvest_date);
        json::put_string(&mut doc, GROWING_CONDITIONS, &self.growing_conditions);
        json::put_string(&mut doc, COMMENT, &self.comment);
        if expand {
            let rows: Vec<Value> = self.rows.iter().map(|r| r.to_json(view)).collect();
            doc.insert(json::ROWS.into(), Value::Array(rows));
        }
        Value::Object(doc)
    }
    /// Reads the plot's own fields; any embedded rows are left for
    /// [`Plot::add_rows_from_json`], which needs the plot to exist first.
    pub fn from_json(value: &Value) -> Result<Self> {
        let doc = json::as_document(value, "plot")?;
        let mut plot = Plot::new(
            json::get_id(doc, json::STUDY_ID)?,
            json::require_u32(doc, ROW_INDEX)?,
            json::require_u32(doc, COLUMN_INDEX)?,
        );
        plot.id = json::get_id(doc, json::ID)?;
        plot.replicate_index = json::get_u32(doc, REPLICATE_INDEX)?;
        plot.width = json::get_real(doc, WIDTH)?;
        plot.length = json::get_real(doc, LENGTH)?;
        plot.sowing_date = json::get_date(doc, SOWING_DATE)?;
        plot.harvest_date = json::get_date(doc, HARVEST_DATE)?;
        plot.growing_conditions = json::get_string(doc, GROWING_CONDITIONS)?;
        plot.comment = json::get_string(doc, COMMENT)?;
        Ok(plot)
    }
    /// Reads the `rows` array of a submitted plot document into this plot.
    /// Rows that cannot be built are reported and skipped.
    pub fn add_rows_from_json(
        &mut self,
        value: &Value,
        study: &Study,
        view: ViewFormat,
        resolver: &dyn VariableResolver,
        materials: &dyn MaterialResolver,
        sink: &mut dyn ReportSink,
    ) -> Result<OperationStatus> {
        let doc = json::as_document(value, "plot")?;
        let items = match json::get_array(doc, json::ROWS)? {
            Some(items) if !items.is_empty() => items,
            _ => return Ok(OperationStatus::Succeeded),
        };
        let mut rows = Vec::with_capacity(items.len());
        {
            let context = RowContext {
                plot: &*self,
                study,
                view,
                resolver,
                materials,
            };
            for item in items {
                rows.push(Row::from_json(item, &context, None, sink));
            }
        }
        let mut tally = Tally::new();
        for row in rows {
            let added = match row {
                Some(row) => match self.add_row(row) {
                    Ok(()) => true,
                    Err(e) => {
                        sink.report_field_error(json::STUDY_INDEX, None, &e.to_string());
                        false
                    }
                },
                None => false,
            };
            tally.record(added);
        }
        Ok(tally.status())
    }
    /// One flat record per row, prefixed with the plot's position.
    pub fn to_frictionless(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut record = Document::new();
                record.insert(ROW_INDEX.into(), Value::from(self.row_index));
                record.insert(COLUMN_INDEX.into(), Value::from(self.column_index));
                if let Value::Object(fields) = row.to_frictionless() {
                    record.extend(fields);
                }
                Value::Object(record)
            })
            .collect()
    }
}
