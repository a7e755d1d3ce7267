//! Operator command line for the field trials store.
//!
//! ```text
//! fieldtrials [--config FILE] import-plot STUDY_ID FILE
//! fieldtrials [--config FILE] show-plot PLOT_ID [--expand]
//! fieldtrials [--config FILE] export-study STUDY_ID
//! ```
//!
//! Every command runs as one job whose status, errors and results are printed
//! as JSON on stdout. Logging goes to stderr, filtered by `RUST_LOG` or else
//! by the configured `log_filter`.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use fieldtrials::config::Settings;
use fieldtrials::error::{FieldTrialError, Result};
use fieldtrials::frictionless;
use fieldtrials::identifier::Identifier;
use fieldtrials::job::{OperationStatus, ReportSink, ServiceJob, Tally};
use fieldtrials::persist::Persistor;
use fieldtrials::plot::Plot;
use fieldtrials::study::Study;
use fieldtrials::variable::VariableCatalogue;

#[derive(Parser, Debug)]
#[command(name = "fieldtrials")]
#[command(about = "Operator tools for the field trials store")]
struct Cli {
    /// Settings file, layered under FIELDTRIALS__* environment variables
    #[arg(long, global = true, env = "FIELDTRIALS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Command {
    /// Save a plot document, rows embedded
    ImportPlot { study_id: Identifier, file: PathBuf },
    /// Print a stored plot
    ShowPlot {
        plot_id: Identifier,
        /// Include the rows of the plot
        #[arg(long)]
        expand: bool,
    },
    /// Print a study as a Frictionless Data package
    ExportStudy { study_id: Identifier },
}

impl Command {
    fn name(&self) -> &'static str {
        match self {
            Self::ImportPlot { .. } => "import-plot",
            Self::ShowPlot { .. } => "show-plot",
            Self::ExportStudy { .. } => "export-study",
        }
    }
}

fn init_logging(filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_study(persistor: &Persistor, id: &Identifier, job: &mut ServiceJob) -> Result<Study> {
    persistor
        .get_study(id, job)?
        .ok_or_else(|| FieldTrialError::unresolved("study", id.to_hex()))
}

fn run(command: &Command, settings: &Settings, persistor: &Persistor, job: &mut ServiceJob) -> Result<()> {
    let mut catalogue = VariableCatalogue::new();
    persistor.restore_variables(&mut catalogue)?;
    match command {
        Command::ImportPlot { study_id, file } => {
            let study = load_study(persistor, study_id, job)?;
            let text = std::fs::read_to_string(file)
                .map_err(|e| FieldTrialError::malformed(file.display().to_string(), e.to_string()))?;
            let document: Value = serde_json::from_str(&text)
                .map_err(|e| FieldTrialError::malformed(file.display().to_string(), e.to_string()))?;
            let mut plot = Plot::from_json(&document)?;
            plot.study_id = study.id;
            let status =
                plot.add_rows_from_json(&document, &study, settings.default_view, &catalogue, persistor, job)?;
            job.merge_status(status);
            if status != OperationStatus::Failed {
                let plot_id = persistor.save_plot(&mut plot)?;
                job.add_result(json!({ "plot_id": plot_id, "rows": plot.rows().len() }));
            }
        }
        Command::ShowPlot { plot_id, expand } => {
            let mut plot = persistor
                .get_plot(plot_id)?
                .ok_or_else(|| FieldTrialError::unresolved("plot", plot_id.to_hex()))?;
            let study_id = plot
                .study_id
                .ok_or_else(|| FieldTrialError::malformed("study_id", "the plot belongs to no study"))?;
            let study = load_study(persistor, &study_id, job)?;
            let document =
                persistor.get_plot_as_json(&mut plot, &study, settings.default_view, *expand, &catalogue, job)?;
            job.add_result(document);
            job.merge_status(OperationStatus::Succeeded);
        }
        Command::ExportStudy { study_id } => {
            let mut study = load_study(persistor, study_id, job)?;
            persistor.get_study_plots(&mut study)?;
            let mut plots = study.take_plots();
            let mut tally = Tally::new();
            for plot in plots.iter_mut() {
                tally.record_status(persistor.get_plot_rows(plot, &study, &catalogue, job)?);
            }
            for plot in plots {
                study.add_plot(plot)?;
            }
            job.add_result(frictionless::study_package(&study));
            job.merge_status(if tally.total() == 0 {
                OperationStatus::Succeeded
            } else {
                tally.status()
            });
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };
    init_logging(&settings.log_filter);

    let persistor = match Persistor::open(&settings) {
        Ok(persistor) => persistor,
        Err(e) => {
            error!(error = %e, "could not open the store");
            return ExitCode::FAILURE;
        }
    };
    let mut job = match persistor.new_job(cli.command.name()) {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "could not start a job");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = run(&cli.command, &settings, &persistor, &mut job) {
        job.report_general_error(&e.to_string());
        job.merge_status(OperationStatus::Failed);
    }
    info!(job = %job.id(), status = ?job.status(), errors = job.errors().len(), "job finished");
    match serde_json::to_string_pretty(&job) {
        Ok(report) => println!("{report}"),
        Err(e) => error!(error = %e, "could not encode the job report"),
    }
    match job.status() {
        Some(OperationStatus::Failed) | None => ExitCode::FAILURE,
        Some(_) => ExitCode::SUCCESS,
    }
}
