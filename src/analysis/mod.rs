//! Failure analytics: flat failure records, the filter engine, and rollups.

pub mod failures;
pub mod filters;
pub mod stats;

pub use failures::{
    collect_cloud_init_failures, collect_from_run, collect_from_runs, failed_test_details,
    parse_cloud_name, test_reports_for_failed_test, CloudInitFailureRecord, FailedTestDetails,
    FailedTestRun, FailureRecord, MatrixFailureRecord,
};
pub use filters::{
    partition, partition_all, CiTestFailureFilter, CombineMode, CompareOp, CompareParam,
    FailureFilter, FieldValue, Filterable, ParamRef, ParamValue, TestFailureFilter, TextOrCompare,
};
pub use stats::{
    matrix_run_result_counts, matrix_run_results, test_set, test_stats, RunResultCounts,
    TestCaseStats,
};
