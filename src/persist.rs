// used for persistence
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{CollectionNames, EntityKind, LoadPolicy, PersistenceMode, Settings, ViewFormat};
use crate::crop::Crop;
use crate::error::{FieldTrialError, Result};
use crate::identifier::{Identifier, IdentifierGenerator};
use crate::job::{OperationStatus, ReportSink, ServiceJob, Tally};
use crate::json;
use crate::ownership::Link;
use crate::plot::{self, Plot};
use crate::row::{Row, RowContext};
use crate::store::{DocumentStore, Filter, MemoryStore, Sort, SqliteStore};
use crate::study::{self, Study};
use crate::treatment::{Treatment, TreatmentResolver};
use crate::trial::{self, FieldTrial, Programme};
use crate::variable::{self, Material, MaterialResolver, MeasuredVariable, NameHasher, VariableCatalogue, VariableResolver};

// ------------- TreatmentKeeper -------------
// Treatments are shared by every factor that applies them, so one loaded
// copy is kept per identifier.
#[derive(Debug, Default)]
pub struct TreatmentKeeper {
    kept: HashMap<Identifier, Arc<Treatment>, NameHasher>,
}

impl TreatmentKeeper {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn keep(&mut self, id: Identifier, treatment: Treatment) -> (Arc<Treatment>, bool) {
        let mut previously_kept = true;
        let kept = self.kept.entry(id).or_insert_with(|| {
            previously_kept = false;
            Arc::new(treatment)
        });
        (Arc::clone(kept), previously_kept)
    }
    pub fn get(&self, id: &Identifier) -> Option<Arc<Treatment>> {
        self.kept.get(id).cloned()
    }
    pub fn forget(&mut self, id: &Identifier) {
        self.kept.remove(id);
    }
    pub fn len(&self) -> usize {
        self.kept.len()
    }
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty()
    }
}

// ------------- Persistence -------------
pub struct Persistor {
    store: Mutex<Box<dyn DocumentStore + Send>>,
    collections: CollectionNames,
    row_load_policy: LoadPolicy,
    identifier_generator: Mutex<IdentifierGenerator>,
    treatment_keeper: Mutex<TreatmentKeeper>,
}

fn poisoned<T>(_: T) -> FieldTrialError {
    FieldTrialError::Invariant("a lock was poisoned by a panicking thread".to_string())
}

impl Persistor {
    pub fn new(store: Box<dyn DocumentStore + Send>, settings: &Settings) -> Self {
        Self {
            store: Mutex::new(store),
            collections: settings.collections.clone(),
            row_load_policy: settings.row_load_policy,
            identifier_generator: Mutex::new(IdentifierGenerator::new()),
            treatment_keeper: Mutex::new(TreatmentKeeper::new()),
        }
    }
    /// Opens the store selected by the settings' persistence mode.
    pub fn open(settings: &Settings) -> Result<Self> {
        let store: Box<dyn DocumentStore + Send> = match &settings.persistence {
            PersistenceMode::InMemory => Box::new(MemoryStore::new()),
            PersistenceMode::File(path) => Box::new(SqliteStore::open(path)?),
        };
        info!(persistence = ?settings.persistence, policy = ?settings.row_load_policy, "persistor opened");
        Ok(Self::new(store, settings))
    }
    pub fn collections(&self) -> &CollectionNames {
        &self.collections
    }
    pub fn row_load_policy(&self) -> LoadPolicy {
        self.row_load_policy
    }
    pub fn set_row_load_policy(&mut self, policy: LoadPolicy) {
        self.row_load_policy = policy;
    }

    // ------------- plumbing -------------
    fn store(&self) -> Result<MutexGuard<'_, Box<dyn DocumentStore + Send>>> {
        self.store.lock().map_err(poisoned)
    }
    pub fn mint(&self) -> Result<Identifier> {
        Ok(self.identifier_generator.lock().map_err(poisoned)?.generate())
    }
    pub fn new_job(&self, name: &str) -> Result<ServiceJob> {
        let mut ids = self.identifier_generator.lock().map_err(poisoned)?;
        Ok(ServiceJob::new(name, &mut ids))
    }
    // Mints an identifier for a document that has none yet, so that the
    // following upsert knows which document it replaces.
    fn assign(&self, id: &mut Option<Identifier>) -> Result<Identifier> {
        match id {
            Some(id) => Ok(*id),
            None => {
                let minted = self.mint()?;
                *id = Some(minted);
                Ok(minted)
            }
        }
    }
    fn upsert(&self, kind: EntityKind, id: &Identifier, document: &Value) -> Result<()> {
        let collection = self.collections.collection(kind);
        self.store()?.upsert(collection, id, document).map_err(|e| {
            warn!(collection, %id, error = %e, "upsert failed");
            e
        })
    }
    fn find(&self, kind: EntityKind, filter: &Filter, sort: Option<&Sort>) -> Result<Vec<Value>> {
        let collection = self.collections.collection(kind);
        let found = self.store()?.find(collection, filter, sort)?;
        debug!(collection, found = found.len(), "find");
        Ok(found)
    }
    fn find_by_id(&self, kind: EntityKind, id: &Identifier) -> Result<Option<Value>> {
        self.store()?.find_by_id(self.collections.collection(kind), id)
    }
    fn remove(&self, kind: EntityKind, id: &Identifier) -> Result<bool> {
        self.store()?.remove(self.collections.collection(kind), id)
    }

    // ------------- crops, treatments, materials and variables -------------
    pub fn save_crop(&self, crop: &mut Crop) -> Result<Identifier> {
        crop.validate()?;
        let id = self.assign(&mut crop.id)?;
        self.upsert(EntityKind::Crop, &id, &crop.to_json())?;
        Ok(id)
    }
    pub fn get_crop(&self, id: &Identifier) -> Result<Option<Crop>> {
        self.find_by_id(EntityKind::Crop, id)?
            .map(|doc| Crop::from_json(&doc))
            .transpose()
    }
    pub fn save_treatment(&self, treatment: &mut Treatment) -> Result<Identifier> {
        let id = self.assign(&mut treatment.id)?;
        self.upsert(EntityKind::Treatment, &id, &treatment.to_json())?;
        // factors loaded from now on share the saved version
        self.treatment_keeper.lock().map_err(poisoned)?.forget(&id);
        Ok(id)
    }
    pub fn get_treatment(&self, id: &Identifier) -> Result<Option<Arc<Treatment>>> {
        if let Some(kept) = self.treatment_keeper.lock().map_err(poisoned)?.get(id) {
            return Ok(Some(kept));
        }
        let Some(doc) = self.find_by_id(EntityKind::Treatment, id)? else {
            return Ok(None);
        };
        let treatment = Treatment::from_json(&doc)?;
        let (kept, _) = self.treatment_keeper.lock().map_err(poisoned)?.keep(*id, treatment);
        Ok(Some(kept))
    }
    pub fn save_material(&self, material: &mut Material) -> Result<Identifier> {
        let id = self.assign(&mut material.id)?;
        self.upsert(EntityKind::Material, &id, &material.to_json())?;
        Ok(id)
    }
    pub fn save_measured_variable(&self, variable: &mut MeasuredVariable) -> Result<Identifier> {
        let id = self.assign(&mut variable.id)?;
        self.upsert(EntityKind::MeasuredVariable, &id, &variable.to_json())?;
        Ok(id)
    }
    /// Restores every stored measured variable into a catalogue.
    pub fn restore_variables(&self, catalogue: &mut VariableCatalogue) -> Result<usize> {
        let docs = self.find(EntityKind::MeasuredVariable, &Filter::all(), Some(&Sort::ascending(json::NAME)))?;
        let mut restored = 0;
        for doc in &docs {
            let (_, previously_kept) = catalogue.keep(MeasuredVariable::from_json(doc)?);
            if !previously_kept {
                restored += 1;
            }
        }
        info!(restored, "measured variables restored");
        Ok(restored)
    }

    // ------------- programmes, field trials and studies -------------
    pub fn save_programme(&self, programme: &mut Programme) -> Result<Identifier> {
        programme.validate()?;
        let id = self.assign(&mut programme.id)?;
        self.upsert(EntityKind::Programme, &id, &programme.to_json())?;
        Ok(id)
    }
    pub fn get_programme(&self, id: &Identifier) -> Result<Option<Programme>> {
        self.find_by_id(EntityKind::Programme, id)?
            .map(|doc| Programme::from_json(&doc))
            .transpose()
    }
    pub fn save_field_trial(&self, field_trial: &mut FieldTrial) -> Result<Identifier> {
        field_trial.validate()?;
        let id = self.assign(&mut field_trial.id)?;
        self.upsert(EntityKind::FieldTrial, &id, &field_trial.to_json())?;
        Ok(id)
    }
    pub fn get_field_trial(&self, id: &Identifier) -> Result<Option<FieldTrial>> {
        self.find_by_id(EntityKind::FieldTrial, id)?
            .map(|doc| FieldTrial::from_json(&doc))
            .transpose()
    }
    /// Field trials referring back to the programme, by name.
    pub fn get_programme_field_trials(&self, programme: &Programme) -> Result<Vec<FieldTrial>> {
        let Some(id) = programme.id else {
            return Ok(Vec::new());
        };
        self.find(
            EntityKind::FieldTrial,
            &Filter::all().eq(trial::PROGRAMME_ID, id.to_hex()),
            Some(&Sort::ascending(json::NAME)),
        )?
        .iter()
        .map(FieldTrial::from_json)
        .collect()
    }
    /// Saves the study document. Its plots are saved one by one with
    /// [`Persistor::save_plot`].
    pub fn save_study(&self, study: &mut Study) -> Result<Identifier> {
        if study.name.trim().is_empty() {
            return Err(FieldTrialError::malformed(json::NAME, "must not be empty"));
        }
        let id = self.assign(&mut study.id)?;
        for plot in study.plots_mut() {
            plot.study_id = Some(id);
            plot.relink_rows();
        }
        self.upsert(EntityKind::Study, &id, &study.to_json(ViewFormat::Storage, false))?;
        Ok(id)
    }
    /// Loads a study with its treatment factors but without its plots.
    pub fn get_study(&self, id: &Identifier, sink: &mut dyn ReportSink) -> Result<Option<Study>> {
        let Some(doc) = self.find_by_id(EntityKind::Study, id)? else {
            return Ok(None);
        };
        let mut study = Study::from_json(&doc)?;
        let status = study.add_treatment_factors_from_json(&doc, self, sink)?;
        if !status.is_success() {
            sink.merge_status(OperationStatus::PartiallySucceeded);
        }
        Ok(Some(study))
    }
    pub fn get_field_trial_studies(&self, field_trial: &FieldTrial, sink: &mut dyn ReportSink) -> Result<Vec<Study>> {
        let Some(id) = field_trial.id else {
            return Ok(Vec::new());
        };
        let docs = self.find(
            EntityKind::Study,
            &Filter::all().eq(study::FIELD_TRIAL_ID, id.to_hex()),
            Some(&Sort::ascending(json::NAME)),
        )?;
        let mut studies = Vec::with_capacity(docs.len());
        for doc in &docs {
            let mut study = Study::from_json(doc)?;
            if !study.add_treatment_factors_from_json(doc, self, sink)?.is_success() {
                sink.merge_status(OperationStatus::PartiallySucceeded);
            }
            studies.push(study);
        }
        Ok(studies)
    }
    /// Replaces the study's plots with the stored ones, ordered by row and
    /// then column index. Rows are not loaded.
    pub fn get_study_plots(&self, study: &mut Study) -> Result<usize> {
        let Some(id) = study.id else {
            return Err(FieldTrialError::malformed(json::ID, "the study has not been saved"));
        };
        study.clear_plots();
        let docs = self.find(
            EntityKind::Plot,
            &Filter::all().eq(json::STUDY_ID, id.to_hex()),
            Some(&Sort::ascending(plot::ROW_INDEX).then_ascending(plot::COLUMN_INDEX)),
        )?;
        for doc in &docs {
            study.add_plot(Plot::from_json(doc)?)?;
        }
        Ok(docs.len())
    }

    // ------------- plots and rows -------------
    pub fn get_plot(&self, id: &Identifier) -> Result<Option<Plot>> {
        self.find_by_id(EntityKind::Plot, id)?
            .map(|doc| Plot::from_json(&doc))
            .transpose()
    }

    /// Saves the plot and every row it holds.
    ///
    /// Identifiers are minted for the plot and for new rows before anything
    /// is written. Materials that rows name but that are not stored yet are
    /// saved first, reusing a stored material with the same accession. Rows
    /// taken off the plot with [`Plot::remove_row`] are deleted.
    pub fn save_plot(&self, plot: &mut Plot) -> Result<Identifier> {
        let id = self.assign(&mut plot.id)?;
        plot.relink_rows();
        self.upsert(EntityKind::Plot, &id, &plot.to_json(ViewFormat::Storage, false))?;
        for row_id in plot.take_removed() {
            if self.remove(EntityKind::Row, &row_id)? {
                debug!(plot = %id, row = %row_id, "row deleted");
            }
        }
        for row in plot.rows_mut() {
            if let Some(standard) = row.as_standard_mut() {
                if let Some(material) = standard.material().filter(|m| m.id.is_none()) {
                    let stored = match self.material_by_accession(&material.accession)? {
                        Some(stored) => stored,
                        None => {
                            let mut created = (*material).clone();
                            self.save_material(&mut created)?;
                            created
                        }
                    };
                    standard.set_material(Link::owned(stored));
                }
            }
            let row_id = self.assign(&mut row.core_mut().id)?;
            self.upsert(EntityKind::Row, &row_id, &row.to_json(ViewFormat::Storage))?;
        }
        info!(plot = %id, rows = plot.rows().len(), "plot saved");
        Ok(id)
    }

    /// Loads the rows of a saved plot, ordered by study index.
    ///
    /// Any rows already in memory are dropped first. A row document that
    /// cannot be turned into a row is handled by the row load policy: under
    /// `FailFast` the plot is left without rows and the load fails, under
    /// `CollectAndContinue` the row is reported and skipped.
    pub fn get_plot_rows(
        &self,
        plot: &mut Plot,
        study: &Study,
        resolver: &dyn VariableResolver,
        sink: &mut dyn ReportSink,
    ) -> Result<OperationStatus> {
        let Some(id) = plot.id else {
            return Err(FieldTrialError::malformed(json::ID, "the plot has not been saved"));
        };
        plot.clear_rows();
        let docs = self.find(
            EntityKind::Row,
            &Filter::all().eq(json::PLOT_ID, id.to_hex()),
            Some(&Sort::ascending(json::STUDY_INDEX)),
        )?;
        if docs.is_empty() {
            return Ok(OperationStatus::Succeeded);
        }
        let mut rows = Vec::with_capacity(docs.len());
        {
            let context = RowContext {
                plot: &*plot,
                study,
                view: ViewFormat::Storage,
                resolver,
                materials: self,
            };
            for doc in &docs {
                match Row::from_json(doc, &context, None, sink) {
                    Some(row) => rows.push(Some(row)),
                    None if self.row_load_policy == LoadPolicy::FailFast => {
                        warn!(plot = %id, "row failed to load, releasing the plot's rows");
                        sink.report_general_error(&format!("plot {id} has a row that cannot be loaded"));
                        return Ok(OperationStatus::Failed);
                    }
                    None => rows.push(None),
                }
            }
        }
        let mut tally = Tally::new();
        for row in rows {
            let added = match row {
                Some(row) => match plot.add_row(row) {
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
        let status = tally.status();
        if status == OperationStatus::Failed || (self.row_load_policy == LoadPolicy::FailFast && !status.is_success()) {
            plot.clear_rows();
            return Ok(OperationStatus::Failed);
        }
        debug!(plot = %id, rows = plot.rows().len(), %status, "plot rows loaded");
        Ok(status)
    }

    /// The plot as a JSON document. With `expand` set its rows are loaded
    /// from the store first and embedded under `rows`; otherwise the key is
    /// left out.
    pub fn get_plot_as_json(
        &self,
        plot: &mut Plot,
        study: &Study,
        view: ViewFormat,
        expand: bool,
        resolver: &dyn VariableResolver,
        sink: &mut dyn ReportSink,
    ) -> Result<Value> {
        if expand {
            let status = self.get_plot_rows(plot, study, resolver, sink)?;
            if status == OperationStatus::Failed {
                return Err(FieldTrialError::Persistence(format!(
                    "the rows of plot {} could not be loaded",
                    plot.id.map(|id| id.to_hex()).unwrap_or_default()
                )));
            }
            sink.merge_status(status);
        }
        Ok(plot.to_json(view, expand))
    }

    /// Removes the plot and all of its stored rows.
    pub fn delete_plot(&self, plot: &Plot) -> Result<usize> {
        let Some(id) = plot.id else {
            return Ok(0);
        };
        let rows = self.find(EntityKind::Row, &Filter::all().eq(json::PLOT_ID, id.to_hex()), None)?;
        let mut removed = 0;
        for row in &rows {
            if let Some(Value::String(row_id)) = row.get(json::ID) {
                if self.remove(EntityKind::Row, &Identifier::parse(row_id)?)? {
                    removed += 1;
                }
            }
        }
        self.remove(EntityKind::Plot, &id)?;
        info!(plot = %id, rows = removed, "plot deleted");
        Ok(removed)
    }
}

impl MaterialResolver for Persistor {
    fn material_by_id(&self, id: &Identifier) -> Result<Option<Material>> {
        self.find_by_id(EntityKind::Material, id)?
            .map(|doc| Material::from_json(&doc))
            .transpose()
    }
    fn material_by_accession(&self, accession: &str) -> Result<Option<Material>> {
        self.find(EntityKind::Material, &Filter::all().eq(variable::ACCESSION, accession), None)?
            .first()
            .map(Material::from_json)
            .transpose()
    }
}

impl TreatmentResolver for Persistor {
    fn treatment_by_id(&self, id: &Identifier) -> Result<Option<Link<Treatment>>> {
        Ok(self.get_treatment(id)?.map(|kept| Link::shallow(&kept)))
    }
}
