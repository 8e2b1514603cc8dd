//! End-to-end pipeline: ingest canned Jenkins payloads, persist, resolve,
//! and run the failure analytics on top.

use std::collections::HashMap;

use serde_json::{json, Value};

use jank_db::analysis::{
    collect_from_runs, failed_test_details, partition, partition_all, test_stats, CombineMode,
    CompareOp, CompareParam, FailureFilter, ParamValue, TestFailureFilter,
};
use jank_db::config::Config;
use jank_db::db::MemoryStore;
use jank_db::services::{collect_all_job_runs, JenkinsApi};
use jank_db::{Error, Result};

struct CannedApi {
    responses: HashMap<String, Value>,
}

impl JenkinsApi for CannedApi {
    fn fetch_json(&self, url: &str) -> Result<Value> {
        self.responses
            .get(url)
            .cloned()
            .ok_or_else(|| Error::Api(format!("no canned response for {url}")))
    }

    fn fetch_json_opt(&self, url: &str) -> Result<Option<Value>> {
        Ok(self.responses.get(url).cloned())
    }
}

fn config() -> Config {
    Config {
        jenkins_url: "https://jenkins.example.com".to_string(),
        jenkins_api_url: "http://jenkins-be.internal:8080".to_string(),
        username: "analyst".to_string(),
        password: secrecy::SecretString::from("hunter2"),
    }
}

const JOB: &str = "24.04-Base-Oracle-Daily-Test";

fn failed_case(name: &str) -> Value {
    json!({
        "name": name,
        "className": "tests.suite.BasicUbuntu",
        "status": "FAILED",
        "duration": 2.0,
    })
}

fn canned_api(config: &Config) -> CannedApi {
    let mut responses = HashMap::new();

    responses.insert(
        config.job_api_url(JOB),
        json!({
            "fullDisplayName": JOB,
            "description": "daily",
            "builds": [{"number": 100}],
            "lastCompletedBuild": {"number": 100},
            "actions": [{
                "_class": "hudson.model.ParametersDefinitionProperty",
                "parameterDefinitions": [
                    {"name": "SUITE", "defaultParameterValue": {"value": "noble"}},
                ],
            }],
        }),
    );

    responses.insert(
        config.job_run_api_url(JOB, 100),
        json!({
            "url": format!("https://jenkins.example.com/job/{JOB}/100/"),
            "fullDisplayName": format!("{JOB} #100"),
            "number": 100,
            "timestamp": 1_700_000_000_000i64,
            "duration": 90_000,
            "result": "UNSTABLE",
            "actions": [{
                "_class": "hudson.model.ParametersAction",
                "parameters": [
                    {"name": "SERIAL", "value": "20260210"},
                    {"name": "SUITE", "value": "noble"},
                ],
            }],
            "runs": [
                {"url": format!("https://jenkins.example.com/job/{JOB}/ARCH=amd64/100/")},
            ],
        }),
    );

    responses.insert(
        config.to_api_url(&format!(
            "https://jenkins.example.com/job/{JOB}/ARCH=amd64/100/"
        )),
        json!({
            "url": format!("https://jenkins.example.com/job/{JOB}/ARCH=amd64/100/"),
            "fullDisplayName": format!("{JOB} » ARCH=amd64 #100"),
            "number": 100,
            "timestamp": 1_700_000_000_000i64,
            "duration": 80_000,
            "result": "UNSTABLE",
            "actions": [{
                "_class": "hudson.matrix.MatrixChildParametersAction",
                "parameters": [
                    {"name": "SERIAL", "value": "20260210"},
                    {"name": "SUITE", "value": "noble"},
                ],
            }],
        }),
    );

    responses.insert(
        config.test_report_api_url(JOB, 100),
        json!({
            "failCount": 2,
            "skipCount": 0,
            "totalCount": 3,
            "childReports": [{
                "child": {"url": format!("https://jenkins.example.com/job/{JOB}/ARCH=amd64/100/")},
                "result": {
                    "failCount": 2,
                    "passCount": 1,
                    "skipCount": 0,
                    "suites": [{
                        "cases": [
                            failed_case("test_snap_preseed"),
                            failed_case("test_lxd"),
                            {
                                "name": "test_boot",
                                "className": "tests.suite.BasicUbuntu",
                                "status": "PASSED",
                                "duration": 0.5,
                            },
                        ],
                        "name": "suite-a",
                        "timestamp": "2026-02-10T02:00:00Z",
                    }],
                },
            }],
        }),
    );

    // Error texts for both FAILED cases. The class-name path keeps all but
    // the last dot.
    for case in ["test_snap_preseed", "test_lxd"] {
        responses.insert(
            format!(
                "http://jenkins-be.internal:8080/job/{JOB}/ARCH=amd64/100\
                 /testReport/junit/tests.suite/BasicUbuntu/{case}/api/json"
            ),
            json!({
                "errorDetails": format!("{case} exploded"),
                "errorStackTrace": "Traceback (most recent call last): ...",
            }),
        );
    }

    CannedApi { responses }
}

#[test]
fn test_ingest_resolve_and_analyze() {
    let config = config();
    let api = canned_api(&config);
    let mut store = MemoryStore::new();

    let (job, fetched) = collect_all_job_runs(&api, &config, &mut store, JOB).unwrap();
    assert_eq!(job.name, JOB);
    assert_eq!(job.last_completed_build_number, Some(100));
    assert_eq!(fetched.len(), 1);

    // Ingestion is idempotent.
    let (_, again) = collect_all_job_runs(&api, &config, &mut store, JOB).unwrap();
    assert!(again.is_empty());

    // The stored document resolves back to a test matrix run with the
    // backfilled error texts in place.
    let runs = store.test_matrix_job_runs_matching("oracle").unwrap();
    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.matrix_runs.len(), 1);
    assert_eq!(run.matrix_runs[0].config_string(), "arch=amd64");

    let failures = collect_from_runs(&runs);
    assert_eq!(failures.len(), 2);
    assert_eq!(
        failures[0].core.error_text.as_deref(),
        Some("test_snap_preseed exploded")
    );
    assert_eq!(failures[0].suite, "noble");

    // AND filter: both slots must match.
    let and_filter = TestFailureFilter {
        test_case_name: Some("snap".to_string()),
        error_text: Some("exploded".to_string()),
        build_number: Some(CompareParam::new(ParamValue::Int(100), CompareOp::Ge)),
        ..TestFailureFilter::default()
    };
    let (matched, unmatched) = partition(&and_filter, &failures).unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].core.test_case_name, "test_snap_preseed");
    assert_eq!(unmatched.len(), 1);

    // OR filter with no active params matches nothing.
    let empty_or = TestFailureFilter {
        filter_operator: CombineMode::Or,
        ..TestFailureFilter::default()
    };
    let (matched, unmatched) = partition(&empty_or, &failures).unwrap();
    assert!(matched.is_empty());
    assert_eq!(unmatched.len(), 2);

    // Union across filters covers both failures.
    let lxd_filter = TestFailureFilter {
        test_case_name: Some("lxd".to_string()),
        ..TestFailureFilter::default()
    };
    let (matched, unmatched) =
        partition_all(&[&and_filter as &dyn FailureFilter, &lxd_filter], &failures).unwrap();
    assert_eq!(matched.len(), 2);
    assert!(unmatched.is_empty());

    // Rollups over the same resolved run.
    let details = failed_test_details(run);
    assert_eq!(details.len(), 2);
    assert_eq!(details[0].test_name, "test_snap_preseed");
    assert_eq!(details[0].fail_count, 1);
    assert!(details[0].runs[0]
        .url
        .ends_with("/testReport/junit/tests.suite/BasicUbuntu/test_snap_preseed"));

    let stats = test_stats(run);
    assert_eq!(stats["test_boot"].succeeded, 1);
    assert_eq!(stats["test_lxd"].failed, 1);
}
