//! Job status and error reporting.
//!
//! Every "submit many sub-items" operation (observation columns of a row, rows
//! of a plot table, synonyms of a crop) reports its outcome with the same
//! three-state rule: all succeeded, some succeeded, or none succeeded.

use std::fmt;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::identifier::{Identifier, IdentifierGenerator};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Succeeded,
    PartiallySucceeded,
    Failed,
}

impl OperationStatus {
    /// Status of a batch of `total` sub-operations of which `successes` succeeded.
    pub fn aggregate(total: usize, successes: usize) -> Self {
        if successes == 0 {
            Self::Failed
        } else if successes >= total {
            Self::Succeeded
        } else {
            Self::PartiallySucceeded
        }
    }
    /// Combines the status of two independent parts of one operation.
    pub fn merge(self, other: OperationStatus) -> Self {
        match (self, other) {
            (Self::Succeeded, Self::Succeeded) => Self::Succeeded,
            (Self::Failed, Self::Failed) => Self::Failed,
            _ => Self::PartiallySucceeded,
        }
    }
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}
impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Succeeded => write!(f, "succeeded"),
            Self::PartiallySucceeded => write!(f, "partially succeeded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Tallies the outcomes of a batch and folds them with the three-state rule.
#[derive(Clone, Copy, Default, Debug)]
pub struct Tally {
    total: usize,
    successes: usize,
}

impl Tally {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn record(&mut self, succeeded: bool) {
        self.total += 1;
        if succeeded {
            self.successes += 1;
        }
    }
    /// Counts a partially successful sub-operation as half a success: it is a
    /// success for the batch, but the batch can no longer be fully successful.
    pub fn record_status(&mut self, status: OperationStatus) {
        match status {
            OperationStatus::Succeeded => self.record(true),
            OperationStatus::Failed => self.record(false),
            OperationStatus::PartiallySucceeded => {
                self.total += 2;
                self.successes += 1;
            }
        }
    }
    /// Adds the outcomes of another batch to this one.
    pub fn absorb(&mut self, other: Tally) {
        self.total += other.total;
        self.successes += other.successes;
    }
    pub fn total(&self) -> usize {
        self.total
    }
    pub fn successes(&self) -> usize {
        self.successes
    }
    pub fn status(&self) -> OperationStatus {
        OperationStatus::aggregate(self.total, self.successes)
    }
}

// ------------- Reporting -------------
pub trait ReportSink {
    fn report_field_error(&mut self, field: &str, value: Option<&Value>, message: &str);
    fn report_general_error(&mut self, message: &str);
    fn merge_status(&mut self, status: OperationStatus);
}

#[derive(Clone, PartialEq, Debug, Serialize)]
pub struct JobError {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    pub message: String,
}

/// One service invocation. Runs to completion on the calling thread.
#[derive(Debug, Serialize)]
pub struct ServiceJob {
    id: Identifier,
    name: String,
    status: Option<OperationStatus>,
    errors: Vec<JobError>,
    results: Vec<Value>,
}

impl ServiceJob {
    pub fn new(name: &str, ids: &mut IdentifierGenerator) -> Self {
        Self {
            id: ids.generate(),
            name: name.to_string(),
            status: None,
            errors: Vec::new(),
            results: Vec::new(),
        }
    }
    pub fn id(&self) -> Identifier {
        self.id
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    /// `None` until the first sub-operation has reported.
    pub fn status(&self) -> Option<OperationStatus> {
        self.status
    }
    pub fn errors(&self) -> &[JobError] {
        &self.errors
    }
    pub fn field_errors<'a>(&'a self, field: &'a str) -> impl Iterator<Item = &'a JobError> + 'a {
        self.errors
            .iter()
            .filter(move |e| e.field.as_deref() == Some(field))
    }
    pub fn results(&self) -> &[Value] {
        &self.results
    }
    pub fn add_result(&mut self, result: Value) {
        self.results.push(result);
    }
}

impl ReportSink for ServiceJob {
    fn report_field_error(&mut self, field: &str, value: Option<&Value>, message: &str) {
        warn!(job = %self.id, field, message, "field error");
        self.errors.push(JobError {
            field: Some(field.to_string()),
            value: value.cloned(),
            message: message.to_string(),
        });
    }
    fn report_general_error(&mut self, message: &str) {
        warn!(job = %self.id, message, "job error");
        self.errors.push(JobError {
            field: None,
            value: None,
            message: message.to_string(),
        });
    }
    fn merge_status(&mut self, status: OperationStatus) {
        let merged = match self.status {
            Some(current) => current.merge(status),
            None => status,
        };
        debug!(job = %self.id, %status, %merged, "status merged");
        self.status = Some(merged);
    }
}
