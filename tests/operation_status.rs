use serde_json::json;

use fieldtrials::crop::{self, Crop};
use fieldtrials::identifier::IdentifierGenerator;
use fieldtrials::job::{OperationStatus, ReportSink, ServiceJob, Tally};

#[test]
fn three_state_rule_over_every_batch_size() {
    for total in 0..6 {
        for successes in 0..=total {
            let expected = if successes == 0 {
                OperationStatus::Failed
            } else if successes == total {
                OperationStatus::Succeeded
            } else {
                OperationStatus::PartiallySucceeded
            };
            assert_eq!(OperationStatus::aggregate(total, successes), expected, "{successes} of {total}");
        }
    }
}

#[test]
fn tally_counts_partial_items_as_incomplete() {
    let mut tally = Tally::new();
    tally.record_status(OperationStatus::Succeeded);
    assert_eq!(tally.status(), OperationStatus::Succeeded);
    tally.record_status(OperationStatus::PartiallySucceeded);
    assert_eq!(tally.status(), OperationStatus::PartiallySucceeded);

    let mut failures = Tally::new();
    failures.record(false);
    failures.record(false);
    assert_eq!(failures.status(), OperationStatus::Failed);
    failures.absorb(tally);
    assert_eq!(failures.status(), OperationStatus::PartiallySucceeded);
}

#[test]
fn job_status_merges() {
    let mut ids = IdentifierGenerator::new();
    let mut job = ServiceJob::new("merge", &mut ids);
    assert_eq!(job.status(), None);
    job.merge_status(OperationStatus::Succeeded);
    assert_eq!(job.status(), Some(OperationStatus::Succeeded));
    job.merge_status(OperationStatus::Succeeded);
    assert_eq!(job.status(), Some(OperationStatus::Succeeded));
    job.merge_status(OperationStatus::Failed);
    assert_eq!(job.status(), Some(OperationStatus::PartiallySucceeded));

    let mut failed = ServiceJob::new("fail", &mut ids);
    failed.merge_status(OperationStatus::Failed);
    failed.merge_status(OperationStatus::Failed);
    assert_eq!(failed.status(), Some(OperationStatus::Failed));
    assert_ne!(job.id(), failed.id());
}

#[test]
fn crop_synonyms_report_each_bad_entry() {
    let mut ids = IdentifierGenerator::new();
    let mut job = ServiceJob::new("synonyms", &mut ids);
    let mut maize = Crop::new("maize", "Zea mays", "http://aims.fao.org/aos/agrovoc/c_12332");

    let status = maize.add_synonyms(&[json!("corn"), json!(""), json!(3), json!("mealie")], &mut job);
    assert_eq!(status, OperationStatus::PartiallySucceeded);
    assert_eq!(maize.synonyms, Some(vec!["corn".to_string(), "mealie".to_string()]));
    assert_eq!(job.field_errors(crop::SYNONYMS).count(), 2);

    let mut wheat = Crop::new("wheat", "Triticum", "http://aims.fao.org/aos/agrovoc/c_7951");
    assert_eq!(wheat.add_synonyms(&[json!(null)], &mut job), OperationStatus::Failed);
    assert_eq!(wheat.synonyms, None);
    assert_eq!(wheat.add_synonyms(&[json!("bread wheat")], &mut job), OperationStatus::Succeeded);
}

#[test]
fn job_report_serializes_errors() {
    let mut ids = IdentifierGenerator::new();
    let mut job = ServiceJob::new("report", &mut ids);
    job.report_field_error("height", Some(&json!("tall")), "not a number");
    job.report_general_error("store unavailable");
    job.merge_status(OperationStatus::Failed);
    let report = serde_json::to_value(&job).expect("report");
    assert_eq!(report["status"], "failed");
    assert_eq!(report["errors"][0]["field"], "height");
    assert_eq!(report["errors"][0]["value"], "tall");
    assert!(report["errors"][1].get("field").is_none());
}
