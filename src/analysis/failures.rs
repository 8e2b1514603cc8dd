//! Extraction of flat failure records from resolved job-run trees.
//!
//! Filters operate on these records, not on the trees, so everything a
//! filter can match on is copied out at extraction time.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::filters::{FieldValue, Filterable};
use crate::models::{
    Family, MatrixTestReport, TestJobRun, TestMatrixJobRun, TestStatus,
};

/// Build parameter carrying the cloud-init version under test.
const CLOUD_INIT_VERSION_PARAM: &str = "CLOUD_INIT_VERSION";

/// One FAILED test case, flattened out of its run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub test_case_name: String,
    pub test_case_class_name: String,
    pub error_text: Option<String>,
    pub error_stack_trace: Option<String>,
    pub job_name: String,
    pub build_number: i64,
    pub job_run_url: String,
    pub test_case_url: String,
    /// When the containing suite ran.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "test_case_name" => Some(FieldValue::Str(&self.test_case_name)),
            "test_case_class_name" => Some(FieldValue::Str(&self.test_case_class_name)),
            "error_text" => self.error_text.as_deref().map(FieldValue::Str),
            "error_stack_trace" => self.error_stack_trace.as_deref().map(FieldValue::Str),
            "job_name" => Some(FieldValue::Str(&self.job_name)),
            "build_number" => Some(FieldValue::Int(self.build_number)),
            "job_run_url" => Some(FieldValue::Str(&self.job_run_url)),
            "test_case_url" => Some(FieldValue::Str(&self.test_case_url)),
            "timestamp" => Some(FieldValue::Time(self.timestamp)),
            _ => None,
        }
    }
}

/// Failure record from a matrix run, carrying the cell configuration and
/// the run's provenance fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixFailureRecord {
    #[serde(flatten)]
    pub core: FailureRecord,
    pub config_string: String,
    pub serial: String,
    pub suite: String,
    pub family: Family,
}

impl Filterable for MatrixFailureRecord {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "config_string" => Some(FieldValue::Str(&self.config_string)),
            "serial" => Some(FieldValue::Str(&self.serial)),
            "suite" => Some(FieldValue::Str(&self.suite)),
            "family" => Some(FieldValue::Str(self.family.as_str())),
            _ => self.core.field(name),
        }
    }
}

/// Failure record from a cloud-init leaf run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloudInitFailureRecord {
    #[serde(flatten)]
    pub core: FailureRecord,
    /// "generic" or "minimal", derived from the job name.
    pub image_type: String,
    pub suite: String,
    pub cloud_name: String,
    pub cloud_init_version: Option<String>,
}

impl Filterable for CloudInitFailureRecord {
    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "image_type" => Some(FieldValue::Str(&self.image_type)),
            "suite" => Some(FieldValue::Str(&self.suite)),
            "cloud_name" => Some(FieldValue::Str(&self.cloud_name)),
            "cloud_init_version" => self.cloud_init_version.as_deref().map(FieldValue::Str),
            _ => self.core.field(name),
        }
    }
}

/// Cloud name from a job name like `24.04-Minimal-GCE-Daily-Test`: the
/// second-to-last `-` token. A name too short to carry one yields the whole
/// name.
pub fn parse_cloud_name(job_name: &str) -> &str {
    job_name.rsplit('-').nth(1).unwrap_or(job_name)
}

/// Flatten every FAILED case of one matrix run, in document order.
pub fn collect_from_run(run: &TestMatrixJobRun) -> Vec<MatrixFailureRecord> {
    let Some(results) = &run.test_results else {
        return Vec::new();
    };
    let record = &run.record;

    let mut failures = Vec::new();
    for report in &results.matrix_test_reports {
        for suite in &report.test_result.suites {
            for case in &suite.cases {
                if case.status != TestStatus::Failed {
                    continue;
                }
                failures.push(MatrixFailureRecord {
                    core: FailureRecord {
                        test_case_name: case.name.clone(),
                        test_case_class_name: case.class_name.clone(),
                        error_text: case.error_details.clone(),
                        error_stack_trace: case.error_stack_trace.clone(),
                        job_name: record.job_name(),
                        build_number: record.build_number,
                        job_run_url: record.url.clone(),
                        test_case_url: report
                            .test_case_report_url(&case.name, &case.class_name),
                        timestamp: suite.timestamp,
                    },
                    config_string: report.test_config.config_string(),
                    serial: record.serial.clone(),
                    suite: record.suite.clone(),
                    family: record.family,
                });
            }
        }
    }
    failures
}

/// Flatten every FAILED case across several matrix runs, run order first.
pub fn collect_from_runs(runs: &[TestMatrixJobRun]) -> Vec<MatrixFailureRecord> {
    runs.iter().flat_map(collect_from_run).collect()
}

/// Flatten every FAILED case of one cloud-init leaf run.
pub fn collect_cloud_init_failures(run: &TestJobRun) -> Vec<CloudInitFailureRecord> {
    let Some(results) = &run.test_results else {
        return Vec::new();
    };
    let record = &run.record;
    let job_name = record.job_name();
    let image_type = if job_name.to_lowercase().contains("generic") {
        "generic"
    } else {
        "minimal"
    };
    let cloud_init_version = record.build_parameters.get(CLOUD_INIT_VERSION_PARAM).cloned();

    let mut failures = Vec::new();
    for suite in &results.suites {
        for case in &suite.cases {
            if case.status != TestStatus::Failed {
                continue;
            }
            failures.push(CloudInitFailureRecord {
                core: FailureRecord {
                    test_case_name: case.name.clone(),
                    test_case_class_name: case.class_name.clone(),
                    error_text: case.error_details.clone(),
                    error_stack_trace: case.error_stack_trace.clone(),
                    job_name: job_name.clone(),
                    build_number: record.build_number,
                    job_run_url: record.url.clone(),
                    test_case_url: run.test_case_report_url(&case.name, &case.class_name),
                    timestamp: suite.timestamp,
                },
                image_type: image_type.to_string(),
                suite: record.suite.clone(),
                cloud_name: parse_cloud_name(&job_name).to_string(),
                cloud_init_version: cloud_init_version.clone(),
            });
        }
    }
    failures
}

/// One failure occurrence inside a [`FailedTestDetails`] rollup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTestRun {
    pub url: String,
    pub config_string: String,
    pub error_text: Option<String>,
}

/// Rollup of one test name's failures across a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedTestDetails {
    pub test_name: String,
    pub fail_count: usize,
    pub ran_count: usize,
    pub runs: Vec<FailedTestRun>,
}

/// Accumulate per-test-name failure details across one matrix run.
///
/// Entries appear in the order their test name is first seen; later
/// occurrences increment the counts and append to `runs`.
pub fn failed_test_details(run: &TestMatrixJobRun) -> Vec<FailedTestDetails> {
    let Some(results) = &run.test_results else {
        return Vec::new();
    };

    let mut details: Vec<FailedTestDetails> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for report in &results.matrix_test_reports {
        for suite in &report.test_result.suites {
            for case in &suite.cases {
                if case.status != TestStatus::Failed {
                    continue;
                }
                let occurrence = FailedTestRun {
                    url: report.test_case_report_url(&case.name, &case.class_name),
                    config_string: report.test_config.config_string(),
                    error_text: case.error_details.clone(),
                };
                match index.get(&case.name) {
                    Some(&i) => {
                        details[i].fail_count += 1;
                        details[i].ran_count += 1;
                        details[i].runs.push(occurrence);
                    }
                    None => {
                        index.insert(case.name.clone(), details.len());
                        details.push(FailedTestDetails {
                            test_name: case.name.clone(),
                            fail_count: 1,
                            ran_count: 1,
                            runs: vec![occurrence],
                        });
                    }
                }
            }
        }
    }
    details
}

/// Every matrix report that contains a FAILED case with the given name,
/// across all runs, in document order.
pub fn test_reports_for_failed_test<'r>(
    test_name: &str,
    runs: &'r [TestMatrixJobRun],
) -> Vec<&'r MatrixTestReport> {
    let mut reports = Vec::new();
    for run in runs {
        let Some(results) = &run.test_results else {
            continue;
        };
        for report in &results.matrix_test_reports {
            let hit = report.test_result.suites.iter().any(|suite| {
                suite
                    .cases
                    .iter()
                    .any(|case| case.status == TestStatus::Failed && case.name == test_name)
            });
            if hit {
                reports.push(report);
            }
        }
    }
    reports
}
