//! Per-test and per-cell rollups over resolved runs.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::models::{MatrixChildRun, RunResult, TestMatrixJobRun, TestStatus};

/// Outcome counts for one test name across a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCaseStats {
    pub succeeded: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Count outcomes per test name across every cell of one matrix run.
///
/// Only observed names appear; a run without test results yields an empty
/// map.
pub fn test_stats(run: &TestMatrixJobRun) -> HashMap<String, TestCaseStats> {
    let mut stats: HashMap<String, TestCaseStats> = HashMap::new();
    let Some(results) = &run.test_results else {
        return stats;
    };

    for report in &results.matrix_test_reports {
        for suite in &report.test_result.suites {
            for case in &suite.cases {
                let entry = stats.entry(case.name.clone()).or_default();
                match case.status {
                    TestStatus::Passed => entry.succeeded += 1,
                    TestStatus::Skipped => entry.skipped += 1,
                    TestStatus::Failed => entry.failed += 1,
                }
            }
        }
    }
    stats
}

/// Every test name observed in one matrix run, sorted.
pub fn test_set(run: &TestMatrixJobRun) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    let Some(results) = &run.test_results else {
        return names;
    };
    for report in &results.matrix_test_reports {
        for suite in &report.test_result.suites {
            for case in &suite.cases {
                names.insert(case.name.clone());
            }
        }
    }
    names
}

/// Terminal result per matrix cell, keyed by the cell's config string.
pub fn matrix_run_results(children: &[MatrixChildRun]) -> HashMap<String, RunResult> {
    children
        .iter()
        .map(|child| (child.config_string(), child.record.result))
        .collect()
}

/// Counts per terminal-result bucket across matrix cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunResultCounts {
    pub success: usize,
    pub failure: usize,
    pub unstable: usize,
    pub aborted: usize,
}

pub fn matrix_run_result_counts(children: &[MatrixChildRun]) -> RunResultCounts {
    let mut counts = RunResultCounts::default();
    for child in children {
        match child.record.result {
            RunResult::Success => counts.success += 1,
            RunResult::Failure => counts.failure += 1,
            RunResult::Unstable => counts.unstable += 1,
            RunResult::Aborted => counts.aborted += 1,
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::JobRun;
    use crate::resolve::resolve_job_run;
    use serde_json::{json, Value};

    fn child(arch: &str, result: &str) -> Value {
        json!({
            "url": format!("https://host/job/t/ARCH={arch}/9/"),
            "fullDisplayName": "t #9",
            "buildNumber": 9,
            "serial": "20260210",
            "suite": "noble",
            "timestamp_ms": 1_700_000_000_000i64,
            "duration_ms": 30_000,
            "buildParameters": {},
            "result": result,
        })
    }

    fn run_with_children() -> TestMatrixJobRun {
        let payload = json!({
            "url": "https://host/job/t/9/",
            "fullDisplayName": "t #9",
            "buildNumber": 9,
            "serial": "20260210",
            "suite": "noble",
            "timestamp_ms": 1_700_000_000_000i64,
            "duration_ms": 60_000,
            "buildParameters": {},
            "result": "UNSTABLE",
            "childRunsUrls": ["https://host/job/t/ARCH=amd64/9/", "https://host/job/t/ARCH=arm64/9/"],
            "matrixRuns": [child("amd64", "SUCCESS"), child("arm64", "FAILURE")],
            "testResults": {
                "failCount": 1,
                "skipCount": 1,
                "totalCount": 4,
                "childReports": [{
                    "child": {"url": "https://host/job/t/ARCH=amd64/9/"},
                    "result": {
                        "failCount": 1,
                        "passCount": 2,
                        "skipCount": 1,
                        "suites": [{
                            "cases": [
                                {"name": "test_boot", "className": "c.X", "status": "PASSED", "duration": 0.1},
                                {"name": "test_boot", "className": "c.X", "status": "FAILED", "duration": 0.1,
                                 "errorDetails": "boom", "errorStackTrace": "trace"},
                                {"name": "test_lxd", "className": "c.X", "status": "SKIPPED", "duration": 0.0, "skipped": true},
                                {"name": "test_snap", "className": "c.X", "status": "PASSED", "duration": 0.2},
                            ],
                            "name": "a",
                            "timestamp": "2026-02-10T02:00:00Z",
                        }],
                    },
                }],
            },
        });
        match resolve_job_run(&payload).unwrap() {
            JobRun::TestMatrix(run) => run,
            other => panic!("expected TestMatrixJobRun, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_stats_count_only_observed_names() {
        let run = run_with_children();
        let stats = test_stats(&run);
        assert_eq!(stats.len(), 3);
        assert_eq!(
            stats["test_boot"],
            TestCaseStats { succeeded: 1, skipped: 0, failed: 1 }
        );
        assert_eq!(
            stats["test_lxd"],
            TestCaseStats { succeeded: 0, skipped: 1, failed: 0 }
        );
        assert_eq!(stats["test_snap"].succeeded, 1);
        assert!(!stats.contains_key("test_never_ran"));
    }

    #[test]
    fn test_set_lists_names_sorted() {
        let run = run_with_children();
        let names: Vec<String> = test_set(&run).into_iter().collect();
        assert_eq!(names, vec!["test_boot", "test_lxd", "test_snap"]);
    }

    #[test]
    fn test_matrix_cell_rollups() {
        let run = run_with_children();
        let results = matrix_run_results(&run.matrix_runs);
        assert_eq!(results.len(), 2);
        assert_eq!(results["arch=amd64"], RunResult::Success);
        assert_eq!(results["arch=arm64"], RunResult::Failure);

        let counts = matrix_run_result_counts(&run.matrix_runs);
        assert_eq!(counts.success, 1);
        assert_eq!(counts.failure, 1);
        assert_eq!(counts.unstable, 0);
    }
}
