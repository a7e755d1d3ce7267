use std::sync::Arc;

use chrono::NaiveDate;
use serde_json::json;

use fieldtrials::config::Settings;
use fieldtrials::edit::{self, Column};
use fieldtrials::frictionless;
use fieldtrials::job::OperationStatus;
use fieldtrials::observation::{ObservationMetadata, ObservationValue};
use fieldtrials::ownership::Link;
use fieldtrials::persist::Persistor;
use fieldtrials::plot::Plot;
use fieldtrials::row::{DiscardRow, ObservationParts, Row, StandardRow, UpsertMode};
use fieldtrials::study::Study;
use fieldtrials::treatment::{OntologyTerm, Treatment, TreatmentFactor};
use fieldtrials::variable::{Material, MaterialResolver, MeasuredVariable, VariableCatalogue, VariableDataType};

fn catalogue() -> VariableCatalogue {
    let mut catalogue = VariableCatalogue::new();
    catalogue.keep(MeasuredVariable::new("height", VariableDataType::Real));
    catalogue.keep(MeasuredVariable::new("lodging", VariableDataType::Boolean));
    catalogue
}

fn study_with_nitrogen(persistor: &Persistor) -> Study {
    let mut study = Study::new("Nitrogen response 2024", None);
    persistor.save_study(&mut study).expect("study");
    let mut nitrogen = Treatment::new(OntologyTerm::new("http://purl.obolibrary.org/obo/PECO_0007102", "Nitrogen"));
    persistor.save_treatment(&mut nitrogen).expect("treatment");
    let nitrogen = Arc::new(nitrogen);
    let mut factor = TreatmentFactor::new(Link::shallow(&nitrogen), study.id);
    factor.add_level("low", "20 kg/ha").expect("level");
    factor.add_level("high", "80 kg/ha").expect("level");
    study.add_treatment_factor(factor).expect("factor");
    study
}

#[test]
fn headers_are_classified() {
    assert_eq!(Column::parse("study_index").expect("reserved"), Column::Reserved("study_index"));
    assert_eq!(
        Column::parse("treatment:Nitrogen").expect("treatment"),
        Column::Treatment("Nitrogen".to_string())
    );
    match Column::parse("height 2024-06-01 (corrected value)").expect("observation") {
        Column::Observation(column) => {
            assert_eq!(column.variable, "height");
            assert!(column.corrected_value);
        }
        other => panic!("unexpected column {other:?}"),
    }
    assert!(Column::parse("treatment:").is_err());
}

#[test]
fn table_edits_apply_cell_by_cell() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let catalogue = catalogue();
    let study = study_with_nitrogen(&persistor);
    let mut plot = Plot::new(study.id, 1, 1);
    persistor.save_plot(&mut plot).expect("plot");

    let table = vec![
        json!({
            "study_index": 1,
            "rack_index": 1,
            "accession": "ACC-1",
            "height 2024-06-01": 12.5,
            "treatment:Nitrogen": "high",
            "notes": "windy",
        }),
        json!({ "study_index": 2, "rack_index": 2, "discard": true }),
        json!({
            "study_index": 3,
            "rack_index": 3,
            "accession": "ACC-2",
            "height 2024-06-01": "tall",
            "colour": "red",
        }),
    ];
    let mut job = persistor.new_job("edit").expect("job");
    let status = edit::apply_plot_table(&persistor, &mut plot, &study, &table, &catalogue, UpsertMode::Replace, &mut job)
        .expect("applied");
    assert_eq!(status, OperationStatus::PartiallySucceeded);
    assert_eq!(job.status(), Some(OperationStatus::PartiallySucceeded));
    assert_eq!(job.field_errors("height 2024-06-01").count(), 1);
    assert_eq!(job.field_errors("colour").count(), 1);
    // row 3 had no cell that applied, so it is not kept
    assert_eq!(plot.rows().len(), 2);
    assert!(plot.row_by_study_index(3).is_none());

    // a later correction leaves the raw value and the notes in place
    let correction = vec![json!({ "study_index": 1, "height 2024-06-01 (corrected value)": "12.0" })];
    let mut job = persistor.new_job("correct").expect("job");
    let status =
        edit::apply_plot_table(&persistor, &mut plot, &study, &correction, &catalogue, UpsertMode::Replace, &mut job)
            .expect("applied");
    assert_eq!(status, OperationStatus::Succeeded);

    let mut reloaded = persistor.get_plot(&plot.id.expect("id")).expect("load").expect("plot");
    let status = persistor.get_plot_rows(&mut reloaded, &study, &catalogue, &mut job).expect("rows");
    assert_eq!(status, OperationStatus::Succeeded);
    assert_eq!(reloaded.rows().len(), 2);

    let first = reloaded.row_by_study_index(1).and_then(Row::as_standard).expect("row 1");
    assert_eq!(first.material().map(|m| m.accession.clone()), Some("ACC-1".to_string()));
    let observation = &first.observations()[0];
    assert_eq!(observation.raw_value, Some(ObservationValue::Real(12.5)));
    assert_eq!(observation.corrected_value, Some(ObservationValue::Real(12.0)));
    assert_eq!(observation.notes.as_deref(), Some("windy"));
    assert_eq!(first.treatment_factor_values()[0].label(), "high");
    assert_eq!(first.treatment_factor_values()[0].value(), "80 kg/ha");

    assert!(reloaded.row_by_study_index(2).is_some_and(|r| r.as_standard().is_none()));
    assert!(reloaded.row_by_study_index(3).is_none());
    assert!(persistor.material_by_accession("ACC-2").expect("lookup").is_none());
}

#[test]
fn failed_table_rows_are_not_stored() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let catalogue = catalogue();
    let study = study_with_nitrogen(&persistor);
    let mut plot = Plot::new(study.id, 1, 1);

    let table = vec![
        json!({ "study_index": 1, "rack_index": 1, "accession": "ACC-1", "height 2024-06-01": 1.0 }),
        json!({ "study_index": 2, "rack_index": 2, "accession": "BAD", "height 2024-06-01": "tall" }),
        json!({ "study_index": 3, "rack_index": 3, "accession": "ACC-3", "height 2024-06-01": "NaN" }),
    ];
    let mut job = persistor.new_job("edit").expect("job");
    let status = edit::apply_plot_table(&persistor, &mut plot, &study, &table, &catalogue, UpsertMode::Replace, &mut job)
        .expect("applied");
    assert_eq!(status, OperationStatus::PartiallySucceeded);
    assert_eq!(job.field_errors("height 2024-06-01").count(), 2);

    let mut reloaded = persistor.get_plot(&plot.id.expect("id")).expect("load").expect("plot");
    let mut job = persistor.new_job("reload").expect("job");
    let status = persistor.get_plot_rows(&mut reloaded, &study, &catalogue, &mut job).expect("rows");
    assert_eq!(status, OperationStatus::Succeeded);
    let indexes: Vec<u32> = reloaded.rows().iter().map(Row::study_index).collect();
    assert_eq!(indexes, vec![1]);
    assert!(job.errors().is_empty());
    for accession in ["BAD", "ACC-3"] {
        assert!(persistor.material_by_accession(accession).expect("lookup").is_none(), "{accession}");
    }
}

#[test]
fn failed_cells_leave_an_existing_row_in_place() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let catalogue = catalogue();
    let study = study_with_nitrogen(&persistor);
    let mut plot = Plot::new(study.id, 1, 1);
    let mut job = persistor.new_job("edit").expect("job");
    let table = vec![json!({ "study_index": 1, "rack_index": 1, "accession": "ACC-1", "height 2024-06-01": 1.0 })];
    edit::apply_plot_table(&persistor, &mut plot, &study, &table, &catalogue, UpsertMode::Replace, &mut job)
        .expect("applied");

    let table = vec![json!({ "study_index": 1, "height 2024-06-01": "tall" })];
    let status = edit::apply_plot_table(&persistor, &mut plot, &study, &table, &catalogue, UpsertMode::Replace, &mut job)
        .expect("applied");
    assert_eq!(status, OperationStatus::Failed);
    let row = plot.row_by_study_index(1).and_then(Row::as_standard).expect("row 1");
    assert_eq!(row.observations()[0].raw_value, Some(ObservationValue::Real(1.0)));
}

#[test]
fn a_table_that_fails_entirely_is_not_saved() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let catalogue = catalogue();
    let study = study_with_nitrogen(&persistor);
    let mut plot = Plot::new(study.id, 1, 1);

    let table = vec![json!({ "rack_index": 1 }), json!("not a row")];
    let mut job = persistor.new_job("edit").expect("job");
    let status = edit::apply_plot_table(&persistor, &mut plot, &study, &table, &catalogue, UpsertMode::Replace, &mut job)
        .expect("applied");
    assert_eq!(status, OperationStatus::Failed);
    assert_eq!(plot.id, None);
    assert_eq!(job.errors().len(), 2);
}

#[test]
fn treatment_columns_need_a_defined_level() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let study = study_with_nitrogen(&persistor);
    let plot = Plot::new(study.id, 1, 1);
    let mut row = StandardRow::new(None, 1, 1, 1, Link::owned(Material::new("ACC-1")), &plot).expect("row");
    let mut job = persistor.new_job("levels").expect("job");

    let cells = json!({ "treatment:nitrogen": "medium", "treatment:Irrigation": "on" });
    let status = edit::process_treatment_factor_values(&mut row, cells.as_object().expect("cells"), &study, &mut job);
    assert_eq!(status, OperationStatus::Failed);
    assert!(row.treatment_factor_values().is_empty());

    let cells = json!({ "treatment:nitrogen": "low" });
    let status = edit::process_treatment_factor_values(&mut row, cells.as_object().expect("cells"), &study, &mut job);
    assert_eq!(status, OperationStatus::Succeeded);
    assert_eq!(row.treatment_factor_values()[0].label(), "low");
}

#[test]
fn observation_cells_without_values_succeed_trivially() {
    let plot = Plot::new(None, 1, 1);
    let catalogue = catalogue();
    let mut row = StandardRow::new(None, 1, 1, 1, Link::owned(Material::new("ACC-1")), &plot).expect("row");
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let mut job = persistor.new_job("cells").expect("job");

    let cells = json!({ "study_index": 1, "height 2024-06-01": "", "lodging 2024-06-01": null });
    let status = edit::process_observations(&mut row, cells.as_object().expect("cells"), &catalogue, UpsertMode::Replace, &mut job);
    assert_eq!(status, OperationStatus::Succeeded);
    assert!(row.observations().is_empty());

    let cells = json!({ "lodging 2024-06-01": "yes" });
    let status = edit::process_observations(&mut row, cells.as_object().expect("cells"), &catalogue, UpsertMode::Replace, &mut job);
    assert_eq!(status, OperationStatus::Succeeded);
    assert_eq!(row.observations()[0].raw_value, Some(ObservationValue::Boolean(true)));
}

#[test]
fn study_exports_as_a_data_package() {
    let catalogue = catalogue();
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let mut study = study_with_nitrogen(&persistor);
    let mut job = persistor.new_job("export").expect("job");

    let mut plot = Plot::new(None, 4, 2);
    let mut row = StandardRow::new(None, 1, 1, 1, Link::owned(Material::new("ACC-1")), &plot).expect("row");
    let parts = ObservationParts {
        metadata: ObservationMetadata::on(NaiveDate::from_ymd_opt(2024, 6, 1).expect("date")),
        raw: Some(json!(10)),
        corrected: Some(json!(9.5)),
        notes: None,
    };
    let height = catalogue.get("height").expect("height");
    row.add_observation_by_parts(Link::shallow(&height), &parts, UpsertMode::Replace, &mut job, "height");
    let nitrogen = study.treatment_factor_by_name("Nitrogen").expect("factor");
    row.set_treatment_factor_value(nitrogen.value("low").expect("level"));
    plot.add_row(Row::Standard(row)).expect("row");
    let discard = DiscardRow::new(None, 2, 2, &plot);
    plot.add_row(Row::Discard(discard)).expect("discard");
    study.add_plot(plot).expect("plot");

    let package = frictionless::study_package(&study);
    assert_eq!(package["profile"], frictionless::PACKAGE_PROFILE);
    assert_eq!(package["name"], "nitrogen-response-2024");
    assert_eq!(package["id"], json!(study.id));

    let resource = &package["resources"][0];
    assert_eq!(resource["name"], frictionless::PLOTS_RESOURCE);
    let data = resource["data"].as_array().expect("data");
    assert_eq!(data.len(), 2);
    assert_eq!(data[0]["row_index"], 4);
    assert_eq!(data[0]["column_index"], 2);
    assert_eq!(data[0]["accession"], "ACC-1");
    assert_eq!(data[0]["height 2024-06-01"], 10.0);
    assert_eq!(data[0]["height 2024-06-01 (corrected value)"], 9.5);
    assert_eq!(data[0]["treatment:Nitrogen"], "low");
    assert_eq!(data[1]["discard"], true);
    assert!(data[1].get("accession").is_none());

    let fields = resource["schema"]["fields"].as_array().expect("fields");
    let height_field = fields
        .iter()
        .find(|f| f["name"] == "height 2024-06-01")
        .expect("height field");
    assert_eq!(height_field["type"], "number");
    assert!(fields.iter().any(|f| f["name"] == "treatment:Nitrogen"));
}

#[test]
fn package_names_are_slugs() {
    assert_eq!(frictionless::package_name("  Wheat Trial 2024! "), "wheat-trial-2024");
    assert_eq!(frictionless::package_name("site_a.v2"), "site_a.v2");
}
