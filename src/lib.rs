//! Fieldtrials – a store for agricultural field trial data.
//!
//! The crate models field trials as a tree of documents:
//! * A [`trial::Programme`] groups [`trial::FieldTrial`]s run by a team.
//! * A [`study::Study`] is one season of a field trial at one location, with
//!   its [`treatment::TreatmentFactor`]s and its [`plot::Plot`]s.
//! * A [`plot::Plot`] is a physical location in the study, unique by row and
//!   column index, holding an ordered list of [`row::Row`]s.
//! * A [`row::Row`] is either a standard row, carrying its sown
//!   [`variable::Material`], its [`observation::Observation`]s and its
//!   treatment factor levels, or a discard row marking a blank rack position.
//!
//! Documents refer to their parents by [`identifier::Identifier`] only. Shared
//! entities such as treatments, materials and measured variables are held
//! through an [`ownership::Link`], which records whether the holder owns,
//! shares or merely shadows the referent.
//!
//! ## Observations
//! An observation is keyed by its measured variable and its
//! [`observation::ObservationMetadata`] (dates compared by day, the corrected
//! flag and a sample index). Submitting a value for an existing key overwrites
//! only the submitted value slot, so a corrected value can be added in a later
//! request without touching the raw value. See
//! [`row::StandardRow::add_observation_by_parts`].
//!
//! ## Partial success
//! Operations that apply many sub-items (observation columns, table rows,
//! synonyms, treatment factors) report per-item problems to a
//! [`job::ReportSink`] and keep going. Their outcome is one of
//! [`job::OperationStatus`]: succeeded when every item did, failed when none
//! did, partially succeeded otherwise.
//!
//! ## Persistence
//! The [`persist::Persistor`] saves and loads every entity through a
//! [`store::DocumentStore`], either in memory or in a SQLite file, with one
//! collection per entity kind as named in [`config::CollectionNames`].
//!
//! ## Quick Start
//! ```
//! use fieldtrials::config::{Settings, ViewFormat};
//! use fieldtrials::persist::Persistor;
//! use fieldtrials::plot::Plot;
//! use fieldtrials::study::Study;
//! use fieldtrials::variable::VariableCatalogue;
//!
//! let persistor = Persistor::open(&Settings::in_memory()).unwrap();
//! let mut study = Study::new("Wheat 2024", None);
//! persistor.save_study(&mut study).unwrap();
//! let mut plot = Plot::new(study.id, 1, 1);
//! persistor.save_plot(&mut plot).unwrap();
//!
//! let mut job = persistor.new_job("show plot").unwrap();
//! let document = persistor
//!     .get_plot_as_json(&mut plot, &study, ViewFormat::Storage, false, &VariableCatalogue::new(), &mut job)
//!     .unwrap();
//! assert!(document.get("rows").is_none());
//! ```

pub mod config;
pub mod crop;
pub mod edit;
pub mod error;
pub mod frictionless;
pub mod identifier;
pub mod job;
pub mod json;
pub mod observation;
pub mod ownership;
pub mod person;
pub mod persist;
pub mod plot;
pub mod row;
pub mod store;
pub mod study;
pub mod treatment;
pub mod trial;
pub mod variable;
