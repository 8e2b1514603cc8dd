//! The job-run hierarchy: one closed set of tagged variants over a shared
//! base record.
//!
//! The original system modeled these as a deep inheritance chain; here the
//! variants form the [`JobRun`] sum type with [`RunKind`] as the explicit
//! discriminator, persisted verbatim as the `self_class` field. The
//! discriminator is written at construction time and never mutated.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::job::{Family, RunResult};
use super::matrix::{
    class_name_path, parse_url, sanitize_test_name, MatrixTestResults, DEFAULT_IGNORE_KEYS,
};
use super::raw;
use super::test::{TestCase, TestResult, TestStatus};
use crate::error::{Error, Result};

/// Error type produced by an injected error-text fetch callback.
pub type FetchError = Box<dyn std::error::Error + Send + Sync>;

/// Error summary and stack trace returned by the fetch callback. Either may
/// legitimately be absent upstream; the backfill post-condition catches that.
pub type ErrorTexts = (Option<String>, Option<String>);

/// Discriminator identifying the concrete job-run variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunKind {
    JobRun,
    MatrixJobRun,
    TestMatrixJobRun,
    TestJobRun,
    MatrixChildRun,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobRun => "JobRun",
            Self::MatrixJobRun => "MatrixJobRun",
            Self::TestMatrixJobRun => "TestMatrixJobRun",
            Self::TestJobRun => "TestJobRun",
            Self::MatrixChildRun => "MatrixChildRun",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "JobRun" => Some(Self::JobRun),
            "MatrixJobRun" => Some(Self::MatrixJobRun),
            "TestMatrixJobRun" => Some(Self::TestMatrixJobRun),
            "TestJobRun" => Some(Self::TestJobRun),
            "MatrixChildRun" => Some(Self::MatrixChildRun),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Fields shared by every job-run variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub url: String,
    #[serde(rename = "fullDisplayName")]
    pub name: String,
    #[serde(rename = "buildNumber")]
    pub build_number: i64,
    pub serial: String,
    pub suite: String,
    pub family: Family,
    #[serde(default)]
    pub description: Option<String>,
    /// Start of the run, milliseconds since the epoch.
    pub timestamp_ms: i64,
    /// Duration of the run in milliseconds.
    pub duration_ms: i64,
    #[serde(rename = "buildParameters")]
    pub build_parameters: BTreeMap<String, String>,
    pub result: RunResult,
    /// URLs of the fanned-out child runs. `None` marks a leaf run; this is
    /// the shape discriminator between leaf and matrix variants.
    #[serde(rename = "childRunsUrls", default)]
    pub child_runs_urls: Option<Vec<String>>,
    #[serde(rename = "consoleOutput", default)]
    pub console_output: Option<String>,
}

impl JobRunRecord {
    /// Construct from a normalized payload, deriving the family when absent.
    pub fn from_data(data: &Value) -> Result<Self> {
        let result_str = raw::require_str(data, "result")?;
        let result = RunResult::parse(&result_str)
            .ok_or_else(|| Error::invalid_field("result", &result_str))?;

        let build_parameters = match data.get("buildParameters") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), value)
                })
                .collect(),
            Some(Value::Null) | None => BTreeMap::new(),
            Some(_) => {
                return Err(Error::invalid_field("buildParameters", "expected an object"))
            }
        };

        let child_runs_urls = match data.get("childRunsUrls") {
            Some(Value::Array(urls)) => Some(
                urls.iter()
                    .map(|u| {
                        u.as_str().map(str::to_string).ok_or_else(|| {
                            Error::invalid_field("childRunsUrls", "expected strings")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            Some(Value::Null) | None => None,
            Some(_) => return Err(Error::invalid_field("childRunsUrls", "expected an array")),
        };

        Ok(JobRunRecord {
            url: raw::require_str(data, "url")?,
            name: raw::require_str(data, "fullDisplayName")?,
            build_number: raw::require_i64(data, "buildNumber")?,
            serial: raw::require_str(data, "serial")?,
            suite: raw::require_str(data, "suite")?,
            family: Family::from_data(data)?,
            description: raw::opt_str(data, "description"),
            timestamp_ms: raw::require_i64(data, "timestamp_ms")?,
            duration_ms: raw::require_i64(data, "duration_ms")?,
            build_parameters,
            result,
            child_runs_urls,
            console_output: raw::opt_str(data, "consoleOutput"),
        })
    }

    /// Canonical identity string: display name, serial, and build number.
    pub fn unique_identifier(&self) -> String {
        format!("{}-{}-{}", self.name, self.serial, self.build_number)
    }

    /// Display name without the trailing `" #N"` build suffix.
    pub fn job_name(&self) -> String {
        self.name
            .split('#')
            .next()
            .unwrap_or(&self.name)
            .trim()
            .to_string()
    }
}

/// One cell execution of a matrix run, carrying its parsed configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixChildRun {
    #[serde(flatten)]
    pub record: JobRunRecord,
    /// `key=value` pairs parsed from the cell URL, in URL order.
    #[serde(rename = "matrixRunConfig")]
    pub matrix_run_config: Vec<(String, String)>,
}

impl MatrixChildRun {
    /// Construct from a normalized payload; the cell configuration comes
    /// from the run's own URL.
    pub fn from_data(data: &Value) -> Result<Self> {
        let record = JobRunRecord::from_data(data)?;
        let matrix_run_config = parse_url(&record.url, DEFAULT_IGNORE_KEYS);
        Ok(MatrixChildRun {
            record,
            matrix_run_config,
        })
    }

    /// Canonical comma-joined `key=value` rendering of the cell config.
    pub fn config_string(&self) -> String {
        self.matrix_run_config
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Space-joined config values only.
    pub fn config_values_string(&self) -> String {
        self.matrix_run_config
            .iter()
            .map(|(_, v)| v.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A run that fanned out into one child run per matrix cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixJobRun {
    #[serde(flatten)]
    pub record: JobRunRecord,
    #[serde(rename = "matrixRuns", default)]
    pub matrix_runs: Vec<MatrixChildRun>,
}

impl MatrixJobRun {
    /// Construct from a normalized payload plus the raw child-run payloads,
    /// children first.
    pub fn from_data(data: &Value, matrix_runs: &[Value]) -> Result<Self> {
        let matrix_runs = matrix_runs
            .iter()
            .map(MatrixChildRun::from_data)
            .collect::<Result<Vec<_>>>()?;
        let record = JobRunRecord::from_data(data)?;
        Ok(MatrixJobRun {
            record,
            matrix_runs,
        })
    }
}

/// A matrix run with per-cell test results attached.
///
/// The results are optional because some runs fail before producing a test
/// report at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestMatrixJobRun {
    #[serde(flatten)]
    pub record: JobRunRecord,
    #[serde(rename = "matrixRuns", default)]
    pub matrix_runs: Vec<MatrixChildRun>,
    #[serde(rename = "testResults", default)]
    pub test_results: Option<MatrixTestResults>,
}

impl TestMatrixJobRun {
    /// Construct from the normalized run payload, the aggregated test-report
    /// payload (if any), and the raw child-run payloads. Children and test
    /// results are built before the parent record.
    pub fn from_data(
        data: &Value,
        test_results: Option<&Value>,
        matrix_runs: &[Value],
    ) -> Result<Self> {
        let test_results = test_results
            .map(MatrixTestResults::from_data)
            .transpose()?;
        let matrix_runs = matrix_runs
            .iter()
            .map(MatrixChildRun::from_data)
            .collect::<Result<Vec<_>>>()?;
        let record = JobRunRecord::from_data(data)?;
        Ok(TestMatrixJobRun {
            record,
            matrix_runs,
            test_results,
        })
    }

    /// Backfill error texts for every FAILED case in the tree.
    ///
    /// All FAILED cases are collected up front, fetched sequentially, and
    /// the results buffered; nothing is written unless every fetch succeeds.
    /// Post-condition: every FAILED case has both error fields populated.
    pub fn fetch_error_texts_for_failed_tests<F>(&mut self, mut fetch: F) -> Result<()>
    where
        F: FnMut(&str) -> std::result::Result<ErrorTexts, FetchError>,
    {
        let Some(results) = self.test_results.as_mut() else {
            return Ok(());
        };

        // Flatten before fetching so the traversal is not interleaved with
        // the injected callback.
        let mut targets: Vec<(usize, usize, usize, String, String)> = Vec::new();
        for (ri, report) in results.matrix_test_reports.iter().enumerate() {
            for (si, suite) in report.test_result.suites.iter().enumerate() {
                for (ci, case) in suite.cases.iter().enumerate() {
                    if case.status == TestStatus::Failed {
                        let url = report.test_case_report_url(&case.name, &case.class_name);
                        targets.push((ri, si, ci, url, case.identity()));
                    }
                }
            }
        }
        debug!(failed_cases = targets.len(), run = %self.record.name, "backfilling error texts");

        let mut fetched: Vec<ErrorTexts> = Vec::with_capacity(targets.len());
        for (_, _, _, url, identity) in &targets {
            match fetch(url) {
                Ok(texts) => fetched.push(texts),
                Err(source) => {
                    return Err(Error::FetchFailed {
                        case: identity.clone(),
                        source,
                    })
                }
            }
        }

        for ((ri, si, ci, _, _), (details, trace)) in targets.iter().zip(fetched) {
            let case = &mut results.matrix_test_reports[*ri].test_result.suites[*si].cases[*ci];
            case.error_details = details;
            case.error_stack_trace = trace;
        }

        verify_backfilled(
            results
                .matrix_test_reports
                .iter()
                .flat_map(|r| r.test_result.suites.iter())
                .flat_map(|s| s.cases.iter()),
        )
    }
}

/// A leaf run with a flat (non-matrix) test report attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestJobRun {
    #[serde(flatten)]
    pub record: JobRunRecord,
    #[serde(rename = "testResults", default)]
    pub test_results: Option<TestResult>,
}

impl TestJobRun {
    /// Construct from the normalized run payload plus the flat test-report
    /// payload, results first.
    pub fn from_data(data: &Value, test_results: Option<&Value>) -> Result<Self> {
        let test_results = test_results.map(TestResult::from_data).transpose()?;
        let record = JobRunRecord::from_data(data)?;
        Ok(TestJobRun {
            record,
            test_results,
        })
    }

    /// Report URL for one test case of this run. The reporting endpoint for
    /// leaf runs does not URL-encode, so the test name goes through the
    /// strict sanitizer.
    pub fn test_case_report_url(&self, test_case_name: &str, test_case_class: &str) -> String {
        format!(
            "{}/testReport/junit/{}/{}",
            self.record.url.trim_end_matches('/'),
            class_name_path(test_case_class),
            sanitize_test_name(test_case_name)
        )
    }

    /// Backfill error texts for every FAILED case, all-or-nothing. See
    /// [`TestMatrixJobRun::fetch_error_texts_for_failed_tests`].
    pub fn fetch_error_texts_for_failed_tests<F>(&mut self, mut fetch: F) -> Result<()>
    where
        F: FnMut(&str) -> std::result::Result<ErrorTexts, FetchError>,
    {
        let Some(results) = self.test_results.as_mut() else {
            return Ok(());
        };

        let mut targets: Vec<(usize, usize, String, String)> = Vec::new();
        for (si, suite) in results.suites.iter().enumerate() {
            for (ci, case) in suite.cases.iter().enumerate() {
                if case.status == TestStatus::Failed {
                    let url = format!(
                        "{}/testReport/junit/{}/{}",
                        self.record.url.trim_end_matches('/'),
                        class_name_path(&case.class_name),
                        sanitize_test_name(&case.name)
                    );
                    targets.push((si, ci, url, case.identity()));
                }
            }
        }

        let mut fetched: Vec<ErrorTexts> = Vec::with_capacity(targets.len());
        for (_, _, url, identity) in &targets {
            match fetch(url) {
                Ok(texts) => fetched.push(texts),
                Err(source) => {
                    return Err(Error::FetchFailed {
                        case: identity.clone(),
                        source,
                    })
                }
            }
        }

        for ((si, ci, _, _), (details, trace)) in targets.iter().zip(fetched) {
            let case = &mut results.suites[*si].cases[*ci];
            case.error_details = details;
            case.error_stack_trace = trace;
        }

        verify_backfilled(results.suites.iter().flat_map(|s| s.cases.iter()))
    }
}

/// Post-condition of the backfill: every FAILED case carries both error
/// fields. A violation is an upstream inconsistency and is raised, never
/// swallowed.
fn verify_backfilled<'a>(cases: impl Iterator<Item = &'a TestCase>) -> Result<()> {
    for case in cases {
        if case.status == TestStatus::Failed
            && (case.error_details.is_none() || case.error_stack_trace.is_none())
        {
            return Err(Error::IncompleteBackfill {
                case: case.identity(),
            });
        }
    }
    Ok(())
}

/// One concrete execution of a job, in any of its variants.
///
/// Serialized with the discriminator inline as `self_class`, exactly as it
/// is persisted, so reconstruction from storage never re-inspects shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "self_class")]
pub enum JobRun {
    #[serde(rename = "JobRun")]
    Plain(JobRunRecord),
    #[serde(rename = "MatrixJobRun")]
    Matrix(MatrixJobRun),
    #[serde(rename = "TestMatrixJobRun")]
    TestMatrix(TestMatrixJobRun),
    #[serde(rename = "TestJobRun")]
    Test(TestJobRun),
    #[serde(rename = "MatrixChildRun")]
    MatrixChild(MatrixChildRun),
}

impl JobRun {
    pub fn kind(&self) -> RunKind {
        match self {
            Self::Plain(_) => RunKind::JobRun,
            Self::Matrix(_) => RunKind::MatrixJobRun,
            Self::TestMatrix(_) => RunKind::TestMatrixJobRun,
            Self::Test(_) => RunKind::TestJobRun,
            Self::MatrixChild(_) => RunKind::MatrixChildRun,
        }
    }

    /// The shared base record of any variant.
    pub fn record(&self) -> &JobRunRecord {
        match self {
            Self::Plain(r) => r,
            Self::Matrix(r) => &r.record,
            Self::TestMatrix(r) => &r.record,
            Self::Test(r) => &r.record,
            Self::MatrixChild(r) => &r.record,
        }
    }

    /// Child runs, when this is a matrix variant.
    pub fn matrix_runs(&self) -> Option<&[MatrixChildRun]> {
        match self {
            Self::Matrix(r) => Some(&r.matrix_runs),
            Self::TestMatrix(r) => Some(&r.matrix_runs),
            _ => None,
        }
    }

    pub fn as_test_matrix(&self) -> Option<&TestMatrixJobRun> {
        match self {
            Self::TestMatrix(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_test(&self) -> Option<&TestJobRun> {
        match self {
            Self::Test(r) => Some(r),
            _ => None,
        }
    }
}
