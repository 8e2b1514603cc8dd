//! Domain models for the Jenkins job-run hierarchy.
//!
//! Every composite entity exposes a `from_data` constructor over raw
//! `serde_json::Value` payloads. Children are always constructed and
//! validated before their parent, so a parent is never half-built when a
//! child fails validation.

pub mod job;
pub mod job_run;
pub mod matrix;

// Re-export commonly used types
pub use job::{Family, Job, RunResult};
pub use job_run::{
    ErrorTexts, FetchError, JobRun, JobRunRecord, MatrixChildRun, MatrixJobRun, RunKind,
    TestJobRun, TestMatrixJobRun,
};
pub use matrix::{
    parse_url, MatrixRunConfig, MatrixTestReport, MatrixTestResults, MatrixTestRunConfig,
    OracleMatrixTestRunConfig, DEFAULT_IGNORE_KEYS,
};
pub use test::{TestCase, TestResult, TestStatus, TestSuite};

/// Helpers for pulling validated fields out of raw upstream payloads.
///
/// All failures are [`crate::error::Error::Validation`] naming the offending
/// field; a required field is never silently defaulted.
pub(crate) mod raw {
    use chrono::{DateTime, TimeZone, Utc};
    use serde_json::Value;

    use crate::error::{Error, Result};

    /// A required field: present and non-null.
    pub fn require<'a>(data: &'a Value, field: &str) -> Result<&'a Value> {
        data.get(field)
            .filter(|v| !v.is_null())
            .ok_or_else(|| Error::missing_field(field))
    }

    pub fn require_str(data: &Value, field: &str) -> Result<String> {
        require(data, field)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::invalid_field(field, "expected a string"))
    }

    pub fn require_i64(data: &Value, field: &str) -> Result<i64> {
        require(data, field)?
            .as_i64()
            .ok_or_else(|| Error::invalid_field(field, "expected an integer"))
    }

    pub fn require_f64(data: &Value, field: &str) -> Result<f64> {
        require(data, field)?
            .as_f64()
            .ok_or_else(|| Error::invalid_field(field, "expected a number"))
    }

    pub fn require_array<'a>(data: &'a Value, field: &str) -> Result<&'a Vec<Value>> {
        require(data, field)?
            .as_array()
            .ok_or_else(|| Error::invalid_field(field, "expected an array"))
    }

    pub fn opt_str(data: &Value, field: &str) -> Option<String> {
        data.get(field)
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    pub fn opt_bool(data: &Value, field: &str) -> bool {
        data.get(field).and_then(Value::as_bool).unwrap_or(false)
    }

    pub fn opt_i64(data: &Value, field: &str) -> Option<i64> {
        data.get(field).and_then(Value::as_i64)
    }

    pub fn opt_f64(data: &Value, field: &str) -> Option<f64> {
        data.get(field).and_then(Value::as_f64)
    }

    /// A required timestamp, accepted either as an RFC 3339 string or as an
    /// integer count of milliseconds since the epoch.
    pub fn require_timestamp(data: &Value, field: &str) -> Result<DateTime<Utc>> {
        let value = require(data, field)?;
        if let Some(s) = value.as_str() {
            return DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| Error::invalid_field(field, e));
        }
        if let Some(ms) = value.as_i64() {
            return Utc
                .timestamp_millis_opt(ms)
                .single()
                .ok_or_else(|| Error::invalid_field(field, "timestamp out of range"));
        }
        Err(Error::invalid_field(
            field,
            "expected an RFC 3339 string or epoch milliseconds",
        ))
    }
}
