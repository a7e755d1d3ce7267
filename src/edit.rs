//! The edit-plot surface.
//!
//! Clients edit a plot as a table with one JSON object per row, keyed by
//! column header. A handful of reserved headers carry the row's own fields,
//! `treatment:<name>` headers carry treatment factor levels and every other
//! header names an observation column:
//!
//! ```text
//! VARIABLE [START[_END]] [corrected] [#N] [(corrected value)]
//! ```
//!
//! Every cell is applied independently, so one bad column never prevents the
//! rest of the row from being saved.

use serde_json::Value;
use tracing::{debug, info};

use crate::error::{FieldTrialError, Result};
use crate::job::{OperationStatus, ReportSink, Tally};
use crate::json::{self, Document};
use crate::observation::{self, ObservationColumn};
use crate::ownership::Link;
use crate::persist::Persistor;
use crate::plot::Plot;
use crate::row::{DiscardRow, ObservationParts, Row, StandardRow, UpsertMode, TREATMENT_COLUMN_PREFIX};
use crate::study::Study;
use crate::variable::{self, Material, MaterialResolver, VariableResolver};

pub const RESERVED_COLUMNS: [&str; 7] = [
    json::STUDY_INDEX,
    json::RACK_INDEX,
    json::REPLICATE,
    variable::ACCESSION,
    json::CONTROL,
    json::DISCARD,
    observation::NOTES,
];

#[derive(Clone, PartialEq, Debug)]
pub enum Column {
    Reserved(&'static str),
    Treatment(String),
    Observation(ObservationColumn),
}

impl Column {
    pub fn parse(header: &str) -> Result<Self> {
        let header = header.trim();
        if let Some(reserved) = RESERVED_COLUMNS.iter().copied().find(|r| *r == header) {
            return Ok(Self::Reserved(reserved));
        }
        if let Some(name) = header.strip_prefix(TREATMENT_COLUMN_PREFIX) {
            let name = name.trim();
            if name.is_empty() {
                return Err(FieldTrialError::malformed(header, "treatment column without a treatment name"));
            }
            return Ok(Self::Treatment(name.to_string()));
        }
        ObservationColumn::parse(header).map(Self::Observation)
    }
}

// Empty cells leave the row as it is.
fn is_blank(cell: &Value) -> bool {
    match cell {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

fn observation_tally(
    row: &mut StandardRow,
    table_row: &Document,
    resolver: &dyn VariableResolver,
    mode: UpsertMode,
    sink: &mut dyn ReportSink,
) -> Tally {
    let notes = table_row
        .get(observation::NOTES)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let mut tally = Tally::new();
    for (header, cell) in table_row {
        if is_blank(cell) {
            continue;
        }
        let column = match Column::parse(header) {
            Ok(Column::Observation(column)) => column,
            Ok(_) => continue,
            Err(e) => {
                sink.report_field_error(header, Some(cell), &e.to_string());
                tally.record(false);
                continue;
            }
        };
        let Some(variable) = resolver.resolve_by_name(&column.variable) else {
            let e = FieldTrialError::unresolved("measured variable", column.variable.as_str());
            sink.report_field_error(header, Some(cell), &e.to_string());
            tally.record(false);
            continue;
        };
        let mut parts = ObservationParts {
            metadata: column.metadata.clone(),
            notes: notes.clone(),
            ..ObservationParts::default()
        };
        if column.corrected_value {
            parts.corrected = Some(cell.clone());
        } else {
            parts.raw = Some(cell.clone());
        }
        tally.record_status(row.add_observation_by_parts(variable, &parts, mode, sink, header));
    }
    tally
}

fn treatment_tally(row: &mut StandardRow, table_row: &Document, study: &Study, sink: &mut dyn ReportSink) -> Tally {
    let mut tally = Tally::new();
    for (header, cell) in table_row {
        let Ok(Column::Treatment(name)) = Column::parse(header) else {
            continue;
        };
        if is_blank(cell) {
            continue;
        }
        let Some(label) = cell.as_str().map(str::trim) else {
            sink.report_field_error(header, Some(cell), "a treatment level must be given as its label");
            tally.record(false);
            continue;
        };
        let value = study
            .treatment_factor_by_name(&name)
            .ok_or_else(|| FieldTrialError::unresolved("treatment factor", name.as_str()))
            .and_then(|factor| {
                factor
                    .value(label)
                    .ok_or_else(|| FieldTrialError::unresolved("treatment factor level", label))
            });
        match value {
            Ok(value) => {
                row.set_treatment_factor_value(value);
                tally.record(true);
            }
            Err(e) => {
                sink.report_field_error(header, Some(cell), &e.to_string());
                tally.record(false);
            }
        }
    }
    tally
}

fn status_of(tally: &Tally) -> OperationStatus {
    if tally.total() == 0 {
        OperationStatus::Succeeded
    } else {
        tally.status()
    }
}

/// Upserts every observation column of one table row into the row. Failures
/// are reported against the column header; a row without observation cells
/// succeeds trivially.
pub fn process_observations(
    row: &mut StandardRow,
    table_row: &Document,
    resolver: &dyn VariableResolver,
    mode: UpsertMode,
    sink: &mut dyn ReportSink,
) -> OperationStatus {
    status_of(&observation_tally(row, table_row, resolver, mode, sink))
}

/// Sets the row's level of every factor named by a `treatment:` column.
pub fn process_treatment_factor_values(
    row: &mut StandardRow,
    table_row: &Document,
    study: &Study,
    sink: &mut dyn ReportSink,
) -> OperationStatus {
    status_of(&treatment_tally(row, table_row, study, sink))
}

// Finds the row for a table row, creating it when the plot has none at that
// study index yet. The flag tells whether the row was created.
fn locate_row<'p>(
    plot: &'p mut Plot,
    table_row: &Document,
    materials: &dyn MaterialResolver,
) -> Result<(&'p mut Row, bool)> {
    let study_index = json::require_u32(table_row, json::STUDY_INDEX)?;
    let accession = json::get_string(table_row, variable::ACCESSION)?.filter(|a| !a.trim().is_empty());
    let created = plot.row_by_study_index(study_index).is_none();
    if created {
        let rack_index = json::require_u32(table_row, json::RACK_INDEX)?;
        let row = if json::get_bool(table_row, json::DISCARD)?.unwrap_or(false) {
            Row::Discard(DiscardRow::new(None, rack_index, study_index, plot))
        } else {
            let accession = accession
                .as_deref()
                .ok_or_else(|| FieldTrialError::malformed(variable::ACCESSION, "a new row needs an accession"))?;
            let material = materials
                .material_by_accession(accession.trim())?
                .unwrap_or_else(|| Material::new(accession.trim()));
            let replicate = json::get_u32(table_row, json::REPLICATE)?.unwrap_or(1);
            Row::Standard(StandardRow::new(None, rack_index, study_index, replicate, Link::owned(material), plot)?)
        };
        plot.add_row(row)?;
        debug!(study_index, "row created from table");
    } else if let Some(accession) = accession {
        let row = plot
            .row_by_study_index_mut(study_index)
            .and_then(Row::as_standard_mut)
            .ok_or_else(|| FieldTrialError::malformed(variable::ACCESSION, "a discard row has no material"))?;
        if row.material().is_none_or(|m| m.accession != accession.trim()) {
            let material = materials
                .material_by_accession(accession.trim())?
                .unwrap_or_else(|| Material::new(accession.trim()));
            row.set_material(Link::owned(material));
        }
    }
    let row = plot
        .row_by_study_index_mut(study_index)
        .ok_or_else(|| FieldTrialError::Invariant(format!("row {study_index} vanished from its plot")))?;
    if let Some(replicate) = json::get_u32(table_row, json::REPLICATE)? {
        row.core_mut().replicate = replicate;
    }
    if let Some(control) = json::get_bool(table_row, json::CONTROL)? {
        row.core_mut().control = control;
    }
    Ok((row, created))
}

fn apply_table_row(
    persistor: &Persistor,
    plot: &mut Plot,
    study: &Study,
    table_row: &Document,
    resolver: &dyn VariableResolver,
    mode: UpsertMode,
    sink: &mut dyn ReportSink,
) -> OperationStatus {
    let (row, created) = match locate_row(plot, table_row, persistor) {
        Ok(located) => located,
        Err(e) => {
            let field = e.field().unwrap_or(json::STUDY_INDEX).to_string();
            sink.report_field_error(&field, table_row.get(&field), &e.to_string());
            return OperationStatus::Failed;
        }
    };
    let study_index = row.study_index();
    let Some(row) = row.as_standard_mut() else {
        return OperationStatus::Succeeded;
    };
    let mut tally = observation_tally(row, table_row, resolver, mode, sink);
    tally.absorb(treatment_tally(row, table_row, study, sink));
    let status = status_of(&tally);
    // a failed table row must not reach the store
    if created && status == OperationStatus::Failed {
        plot.remove_row(study_index);
        debug!(study_index, "row dropped, none of its cells applied");
    }
    status
}

/// Applies an edited plot table and saves the plot.
///
/// The plot's rows must already be loaded. Each table row finds its plot row
/// by `study_index`, or creates it, and then has its cells applied. The
/// three-state status over all table rows is merged into the sink; the plot
/// is saved unless every table row failed.
pub fn apply_plot_table(
    persistor: &Persistor,
    plot: &mut Plot,
    study: &Study,
    table: &[Value],
    resolver: &dyn VariableResolver,
    mode: UpsertMode,
    sink: &mut dyn ReportSink,
) -> Result<OperationStatus> {
    let mut tally = Tally::new();
    for item in table {
        let status = match item.as_object() {
            Some(table_row) => apply_table_row(persistor, plot, study, table_row, resolver, mode, sink),
            None => {
                sink.report_field_error(json::ROWS, Some(item), "a table row must be a JSON object");
                OperationStatus::Failed
            }
        };
        tally.record_status(status);
    }
    let status = status_of(&tally);
    if status != OperationStatus::Failed {
        persistor.save_plot(plot)?;
    }
    info!(plot = ?plot.id, table_rows = table.len(), %status, "plot table applied");
    sink.merge_status(status);
    Ok(status)
}
