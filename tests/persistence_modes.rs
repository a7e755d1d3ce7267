use std::collections::HashMap;

use serde_json::json;

use fieldtrials::config::{CollectionNames, EntityKind, LoadPolicy, PersistenceMode, Settings, ViewFormat};
use fieldtrials::crop::Crop;
use fieldtrials::person::Person;
use fieldtrials::persist::Persistor;
use fieldtrials::plot::Plot;
use fieldtrials::store::{DocumentStore, Filter, MemoryStore, Sort, SqliteStore};
use fieldtrials::study::Study;
use fieldtrials::trial::{FieldTrial, Programme};
use fieldtrials::variable::{MeasuredVariable, VariableCatalogue, VariableDataType};

fn file_settings(path: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.persistence = PersistenceMode::File(path.to_string_lossy().into_owned());
    settings
}

#[test]
fn in_memory_mode_saves_and_loads_entities() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");

    let mut crop = Crop::new("maize", "Zea mays", "http://aims.fao.org/aos/agrovoc/c_12332");
    crop.synonyms = Some(vec!["corn".to_string()]);
    let crop_id = persistor.save_crop(&mut crop).expect("crop");
    assert_eq!(persistor.get_crop(&crop_id).expect("load"), Some(crop));

    let mut programme = Programme::new("CROP", "Crop improvement");
    programme.principal_investigator = Some(
        Person::new("Ada Lovelace", "ada@example.org")
            .with_orcid("0000-0002-1825-0097")
            .expect("orcid"),
    );
    persistor.save_programme(&mut programme).expect("programme");

    let mut late = FieldTrial::new("Yield 2025", Some("Field team"), programme.id);
    let mut early = FieldTrial::new("Yield 2024", Some("Field team"), programme.id);
    persistor.save_field_trial(&mut late).expect("trial");
    persistor.save_field_trial(&mut early).expect("trial");
    let mut stray = FieldTrial::new("Elsewhere", None, None);
    persistor.save_field_trial(&mut stray).expect("trial");

    let trials = persistor.get_programme_field_trials(&programme).expect("trials");
    let names: Vec<&str> = trials.iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["Yield 2024", "Yield 2025"]);

    let loaded = persistor.get_programme(&programme.id.expect("id")).expect("load").expect("programme");
    assert_eq!(loaded, programme);
}

#[test]
fn invalid_entities_are_not_saved() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let mut programme = Programme::new("", "Nameless");
    assert!(persistor.save_programme(&mut programme).is_err());
    assert_eq!(programme.id, None);
    let mut crop = Crop::new("maize", "Zea mays", " ");
    assert!(persistor.save_crop(&mut crop).is_err());
    assert!(Person::new("Bob", "bob@example.org").with_orcid("1234").is_err());
}

#[test]
fn studies_are_found_by_field_trial() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let mut trial = FieldTrial::new("Yield 2024", None, None);
    persistor.save_field_trial(&mut trial).expect("trial");
    for name in ["Site B", "Site A"] {
        let mut study = Study::new(name, trial.id);
        persistor.save_study(&mut study).expect("study");
    }
    let mut job = persistor.new_job("studies").expect("job");
    let studies = persistor.get_field_trial_studies(&trial, &mut job).expect("studies");
    let names: Vec<&str> = studies.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["Site A", "Site B"]);
}

#[test]
fn study_plots_load_in_grid_order() {
    let persistor = Persistor::open(&Settings::in_memory()).expect("persistor");
    let mut study = Study::new("Grid", None);
    persistor.save_study(&mut study).expect("study");
    for (row, column) in [(2, 1), (1, 2), (1, 1)] {
        let mut plot = Plot::new(study.id, row, column);
        persistor.save_plot(&mut plot).expect("plot");
    }
    assert_eq!(persistor.get_study_plots(&mut study).expect("plots"), 3);
    let positions: Vec<(u32, u32)> = study.plots().iter().map(Plot::position).collect();
    assert_eq!(positions, vec![(1, 1), (1, 2), (2, 1)]);
}

#[test]
fn file_mode_survives_reopening() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("trials.db");
    let crop_id = {
        let persistor = Persistor::open(&file_settings(&path)).expect("persistor");
        let mut crop = Crop::new("wheat", "Triticum aestivum", "http://aims.fao.org/aos/agrovoc/c_7951");
        let mut height = MeasuredVariable::new("height", VariableDataType::Real);
        persistor.save_measured_variable(&mut height).expect("variable");
        persistor.save_crop(&mut crop).expect("crop")
    };

    let persistor = Persistor::open(&file_settings(&path)).expect("reopen");
    let crop = persistor.get_crop(&crop_id).expect("load").expect("crop");
    assert_eq!(crop.name, "wheat");
    let mut catalogue = VariableCatalogue::new();
    assert_eq!(persistor.restore_variables(&mut catalogue).expect("restore"), 1);
    assert_eq!(catalogue.get("Height").map(|v| v.data_type), Some(VariableDataType::Real));
}

#[test]
fn collection_overrides_are_honoured() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("trials.db");
    let mut settings = file_settings(&path);
    settings.collections =
        CollectionNames::with_overrides(&HashMap::from([("plot".to_string(), "parcels".to_string())]))
            .expect("collections");
    {
        let persistor = Persistor::open(&settings).expect("persistor");
        let mut plot = Plot::new(None, 1, 1);
        persistor.save_plot(&mut plot).expect("plot");
    }
    let store = SqliteStore::open(&path).expect("store");
    assert_eq!(store.find("parcels", &Filter::all(), None).expect("find").len(), 1);
    assert!(store.find("plots", &Filter::all(), None).expect("find").is_empty());
}

#[test]
fn collection_names_stay_one_to_one() {
    let defaults = CollectionNames::default();
    assert_eq!(defaults.collection(EntityKind::Row), "rows");
    assert_eq!(defaults.kind("field_trials"), Some(EntityKind::FieldTrial));

    let clash = HashMap::from([("plot".to_string(), "rows".to_string())]);
    assert!(CollectionNames::with_overrides(&clash).is_err());
    let unknown = HashMap::from([("parcel".to_string(), "parcels".to_string())]);
    assert!(CollectionNames::with_overrides(&unknown).is_err());
}

#[test]
fn settings_file_is_read() {
    let dir = tempfile::tempdir().expect("tempdir");
    let database = dir.path().join("trials.db");
    let file = dir.path().join("fieldtrials.toml");
    std::fs::write(
        &file,
        format!(
            "database = {:?}\nlog_filter = \"fieldtrials=debug\"\nrow_load_policy = \"collect_and_continue\"\ndefault_view = \"client_full\"\n\n[collections]\nplot = \"parcels\"\n",
            database.to_string_lossy()
        ),
    )
    .expect("settings file");

    let settings = Settings::load(Some(file.as_path())).expect("settings");
    assert_eq!(settings.persistence, PersistenceMode::File(database.to_string_lossy().into_owned()));
    assert_eq!(settings.log_filter, "fieldtrials=debug");
    assert_eq!(settings.row_load_policy, LoadPolicy::CollectAndContinue);
    assert_eq!(settings.default_view, ViewFormat::ClientFull);
    assert_eq!(settings.collections.collection(EntityKind::Plot), "parcels");
    assert_eq!(settings.collections.kind("parcels"), Some(EntityKind::Plot));
}

#[test]
fn stores_agree_on_filtering_and_order() {
    let mut memory = MemoryStore::new();
    let mut sqlite = SqliteStore::in_memory().expect("sqlite");
    let mut ids = fieldtrials::identifier::IdentifierGenerator::new();
    let documents = [
        json!({ "name": "c", "plot_id": "p1", "study_index": 3 }),
        json!({ "name": "a", "plot_id": "p1", "study_index": 1 }),
        json!({ "name": "b", "plot_id": "p2", "study_index": 2 }),
    ];
    for document in &documents {
        let id = ids.generate();
        memory.upsert("rows", &id, document).expect("memory");
        sqlite.upsert("rows", &id, document).expect("sqlite");
    }
    let filter = Filter::all().eq("plot_id", "p1");
    let sort = Sort::ascending("study_index");
    for store in [&memory as &dyn DocumentStore, &sqlite as &dyn DocumentStore] {
        let found = store.find("rows", &filter, Some(&sort)).expect("find");
        let names: Vec<&str> = found.iter().filter_map(|d| d["name"].as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        let descending = store.find("rows", &Filter::all(), Some(&Sort::descending("name"))).expect("find");
        assert_eq!(descending[0]["name"], "c");
    }
    assert_eq!(memory.len("rows"), 3);
}
