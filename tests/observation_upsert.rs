use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::{json, Value};

use fieldtrials::identifier::IdentifierGenerator;
use fieldtrials::job::{OperationStatus, ServiceJob};
use fieldtrials::observation::{ObservationColumn, ObservationMetadata, ObservationValue};
use fieldtrials::ownership::Link;
use fieldtrials::plot::Plot;
use fieldtrials::row::{ObservationParts, StandardRow, UpsertMode};
use fieldtrials::variable::{Material, MeasuredVariable, VariableCatalogue, VariableDataType};

fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).expect("date")
}

fn fixture() -> (StandardRow, VariableCatalogue, ServiceJob) {
    let plot = Plot::new(None, 1, 1);
    let row = StandardRow::new(None, 1, 1, 1, Link::owned(Material::new("ACC-1")), &plot).expect("row");
    let mut catalogue = VariableCatalogue::new();
    catalogue.keep(MeasuredVariable::new("height", VariableDataType::Real));
    catalogue.keep(MeasuredVariable::new("stand", VariableDataType::Integer));
    let mut ids = IdentifierGenerator::new();
    let job = ServiceJob::new("upsert", &mut ids);
    (row, catalogue, job)
}

fn raw(value: Value, on: NaiveDate) -> ObservationParts {
    ObservationParts {
        metadata: ObservationMetadata::on(on),
        raw: Some(value),
        ..ObservationParts::default()
    }
}

fn height(catalogue: &VariableCatalogue) -> Link<MeasuredVariable> {
    Link::shallow(&catalogue.get("height").expect("height"))
}

#[test]
fn metadata_compares_dates_by_day() {
    let morning = ObservationMetadata::on(day(2024, 6, 1));
    let mut afternoon = morning.clone();
    afternoon.start_date = day(2024, 6, 1).and_hms_opt(15, 30, 0);
    assert_eq!(morning, afternoon);

    let undated = ObservationMetadata::default();
    let later = ObservationMetadata::on(day(2024, 6, 2));
    assert!(undated < morning);
    assert!(morning < later);

    let mut corrected = morning.clone();
    corrected.corrected = true;
    assert!(morning < corrected);
    let mut second = morning.clone();
    second.sample_index = 2;
    assert!(morning < second);
    assert!(second < corrected);
}

#[test]
fn repeating_a_submission_is_idempotent() {
    let (mut row, catalogue, mut job) = fixture();
    let parts = raw(json!(10.5), day(2024, 6, 1));
    for _ in 0..2 {
        let status = row.add_observation_by_parts(height(&catalogue), &parts, UpsertMode::Replace, &mut job, "height");
        assert_eq!(status, OperationStatus::Succeeded);
    }
    assert_eq!(row.observations().len(), 1);
    assert_eq!(row.observations()[0].raw_value, Some(ObservationValue::Real(10.5)));
    assert!(job.errors().is_empty());
}

#[test]
fn correction_leaves_raw_value_and_notes_alone() {
    let (mut row, catalogue, mut job) = fixture();
    let mut first = raw(json!("12"), day(2024, 6, 1));
    first.notes = Some("windy".to_string());
    row.add_observation_by_parts(height(&catalogue), &first, UpsertMode::Replace, &mut job, "height");

    let correction = ObservationParts {
        metadata: ObservationMetadata::on(day(2024, 6, 1)),
        corrected: Some(json!(11.0)),
        notes: Some("recalibrated".to_string()),
        ..ObservationParts::default()
    };
    let status = row.add_observation_by_parts(height(&catalogue), &correction, UpsertMode::Replace, &mut job, "height");
    assert_eq!(status, OperationStatus::Succeeded);

    assert_eq!(row.observations().len(), 1);
    let observation = &row.observations()[0];
    assert_eq!(observation.raw_value, Some(ObservationValue::Real(12.0)));
    assert_eq!(observation.corrected_value, Some(ObservationValue::Real(11.0)));
    assert_eq!(observation.notes.as_deref(), Some("windy"));
}

#[test]
fn different_metadata_adds_in_submission_order() {
    let (mut row, catalogue, mut job) = fixture();
    row.add_observation_by_parts(height(&catalogue), &raw(json!(14), day(2024, 7, 1)), UpsertMode::Replace, &mut job, "h");
    row.add_observation_by_parts(height(&catalogue), &raw(json!(9), day(2024, 6, 1)), UpsertMode::Replace, &mut job, "h");
    let values: Vec<_> = row.observations().iter().map(|o| o.raw_value.clone()).collect();
    assert_eq!(values, vec![Some(ObservationValue::Real(14.0)), Some(ObservationValue::Real(9.0))]);
}

#[test]
fn append_takes_the_next_sample_index() {
    let (mut row, catalogue, mut job) = fixture();
    let parts = raw(json!(3), day(2024, 6, 1));
    let stand = || Link::shallow(&catalogue.get("stand").expect("stand"));
    row.add_observation_by_parts(stand(), &parts, UpsertMode::Append, &mut job, "stand");
    row.add_observation_by_parts(stand(), &parts, UpsertMode::Append, &mut job, "stand");
    row.add_observation_by_parts(stand(), &parts, UpsertMode::Append, &mut job, "stand");
    let samples: Vec<u32> = row.observations().iter().map(|o| o.metadata.sample_index).collect();
    assert_eq!(samples, vec![1, 2, 3]);
}

#[test]
fn append_stops_when_sample_indexes_run_out() {
    let (mut row, catalogue, mut job) = fixture();
    let mut parts = raw(json!(3), day(2024, 6, 1));
    parts.metadata.sample_index = u32::MAX;
    let stand = || Link::shallow(&catalogue.get("stand").expect("stand"));
    let first = row.add_observation_by_parts(stand(), &parts, UpsertMode::Append, &mut job, "stand #4294967295");
    assert_eq!(first, OperationStatus::Succeeded);

    let second = row.add_observation_by_parts(stand(), &parts, UpsertMode::Append, &mut job, "stand #4294967295");
    assert_eq!(second, OperationStatus::Failed);
    assert_eq!(row.observations().len(), 1);
    assert_eq!(row.observations()[0].metadata.sample_index, u32::MAX);
    assert_eq!(job.field_errors("stand #4294967295").count(), 1);
}

#[test]
fn non_finite_reals_are_rejected() {
    let (mut row, catalogue, mut job) = fixture();
    for text in ["NaN", "inf", "-inf", " infinity "] {
        let status = row.add_observation_by_parts(
            height(&catalogue),
            &raw(json!(text), day(2024, 6, 1)),
            UpsertMode::Replace,
            &mut job,
            "height 2024-06-01",
        );
        assert_eq!(status, OperationStatus::Failed, "{text}");
    }
    assert!(row.observations().is_empty());
    assert_eq!(job.field_errors("height 2024-06-01").count(), 4);
    assert_eq!(
        ObservationValue::from_json(&json!(" 1e3 "), VariableDataType::Real),
        Some(ObservationValue::Real(1000.0))
    );
}

#[test]
fn unconvertible_value_fails_and_is_reported() {
    let (mut row, catalogue, mut job) = fixture();
    let status = row.add_observation_by_parts(
        height(&catalogue),
        &raw(json!("tall"), day(2024, 6, 1)),
        UpsertMode::Replace,
        &mut job,
        "height 2024-06-01",
    );
    assert_eq!(status, OperationStatus::Failed);
    assert!(row.observations().is_empty());
    let errors: Vec<_> = job.field_errors("height 2024-06-01").collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].value, Some(json!("tall")));
}

#[test]
fn one_bad_slot_is_a_partial_success() {
    let (mut row, catalogue, mut job) = fixture();
    let parts = ObservationParts {
        metadata: ObservationMetadata::on(day(2024, 6, 1)),
        raw: Some(json!(8.25)),
        corrected: Some(json!([1, 2])),
        notes: None,
    };
    let status = row.add_observation_by_parts(height(&catalogue), &parts, UpsertMode::Replace, &mut job, "height");
    assert_eq!(status, OperationStatus::PartiallySucceeded);
    assert_eq!(row.observations()[0].raw_value, Some(ObservationValue::Real(8.25)));
    assert_eq!(row.observations()[0].corrected_value, None);
}

#[test]
fn released_variable_is_not_used() {
    let (mut row, _, mut job) = fixture();
    let status = row.add_observation_by_parts(
        Link::Released,
        &raw(json!(1), day(2024, 6, 1)),
        UpsertMode::Replace,
        &mut job,
        "height",
    );
    assert_eq!(status, OperationStatus::Failed);
    assert_eq!(job.field_errors("height").count(), 1);
}

#[test]
fn upsert_frees_the_callers_link() {
    let (mut row, catalogue, mut job) = fixture();
    let kept = catalogue.get("height").expect("height");
    assert_eq!(Arc::strong_count(&kept), 2);

    row.add_observation_by_parts(Link::shallow(&kept), &raw(json!(1), day(2024, 6, 1)), UpsertMode::Replace, &mut job, "h");
    // catalogue, this test and the new observation
    assert_eq!(Arc::strong_count(&kept), 3);
    row.add_observation_by_parts(Link::shallow(&kept), &raw(json!(2), day(2024, 6, 1)), UpsertMode::Replace, &mut job, "h");
    assert_eq!(Arc::strong_count(&kept), 3);
    row.add_observation_by_parts(Link::shadow(&kept), &raw(json!(3), day(2024, 6, 1)), UpsertMode::Replace, &mut job, "h");
    assert_eq!(Arc::strong_count(&kept), 3);
    assert_eq!(row.observations().len(), 1);
}

#[test]
fn column_headers_parse_and_print() {
    let header = "height 2024-06-01_2024-06-03 corrected #2 (corrected value)";
    let column = ObservationColumn::parse(header).expect("column");
    assert_eq!(column.variable, "height");
    assert_eq!(column.metadata.start_date, day(2024, 6, 1).and_hms_opt(0, 0, 0));
    assert_eq!(column.metadata.end_date, day(2024, 6, 3).and_hms_opt(0, 0, 0));
    assert!(column.metadata.corrected);
    assert_eq!(column.metadata.sample_index, 2);
    assert!(column.corrected_value);
    assert_eq!(column.to_string(), header);

    let bare = ObservationColumn::parse("height").expect("bare");
    assert_eq!(bare.metadata, ObservationMetadata::default());
    assert!(!bare.corrected_value);

    let timed = ObservationColumn::parse("height 2024-06-01T10:30:00").expect("timed");
    assert_eq!(timed.to_string(), "height 2024-06-01T10:30:00");

    assert!(ObservationColumn::parse("height 2024-13-45").is_err());
    assert!(ObservationColumn::parse("plant height").is_err());
}
