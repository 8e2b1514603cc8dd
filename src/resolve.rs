//! Classification of raw job-run documents into their concrete variant.
//!
//! Documents loaded from storage carry an explicit `self_class` tag; raw
//! payloads assembled at ingestion time are classified by shape. Both paths
//! go through [`resolve_job_run`], which also normalizes documents written
//! before the `family` field existed.

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Family, JobRun, MatrixTestResults, RunKind};

/// Decide which variant a raw job-run document is, without constructing it.
///
/// Classification is purely structural and runs in a fixed order:
///
/// 1. An explicit `self_class` tag wins outright. An unrecognized tag is an
///    error rather than a fall-through, so corrupted documents never get
///    silently reclassified.
/// 2. A present `childRunsUrls` array marks a matrix parent; with test
///    results attached it is a [`RunKind::TestMatrixJobRun`].
/// 3. A leaf with a test payload, or with a non-null fail count, is a
///    [`RunKind::TestJobRun`].
/// 4. Anything else is a plain [`RunKind::JobRun`].
///
/// [`RunKind::MatrixChildRun`] is never inferred: child runs only exist
/// inside their parent or with an explicit tag.
pub fn classify(data: &Value) -> Result<RunKind> {
    if let Some(tag) = data.get("self_class") {
        let tag = tag
            .as_str()
            .ok_or_else(|| Error::UnknownVariant(tag.to_string()))?;
        return RunKind::parse(tag).ok_or_else(|| Error::UnknownVariant(tag.to_string()));
    }

    let has_test_results = matches!(data.get("testResults"), Some(v) if !v.is_null());

    if matches!(data.get("childRunsUrls"), Some(v) if !v.is_null()) {
        if has_test_results {
            return Ok(RunKind::TestMatrixJobRun);
        }
        return Ok(RunKind::MatrixJobRun);
    }

    if has_test_results {
        return Ok(RunKind::TestJobRun);
    }

    // Older leaf documents stored counts inline instead of a result payload.
    if matches!(data.get("failCount"), Some(v) if !v.is_null()) {
        return Ok(RunKind::TestJobRun);
    }

    Ok(RunKind::JobRun)
}

/// Reconstruct a typed [`JobRun`] from a stored or assembled document.
///
/// Normalizes before deserializing: the variant tag is written in when
/// absent, and a missing `family` is derived from the display name on the
/// top-level record and on every matrix child. The result re-serializes to
/// the normalized document, so resolution is idempotent.
pub fn resolve_job_run(data: &Value) -> Result<JobRun> {
    let kind = classify(data)?;

    let mut doc = data.clone();
    let obj = doc
        .as_object_mut()
        .ok_or_else(|| Error::Validation("job run document must be an object".to_string()))?;
    obj.insert(
        "self_class".to_string(),
        Value::String(kind.as_str().to_string()),
    );
    normalize_family(&mut doc)?;
    if let Some(Value::Array(children)) = doc.get_mut("matrixRuns") {
        for child in children {
            normalize_family(child)?;
            normalize_child_config(child)?;
        }
    }
    normalize_matrix_results(&mut doc)?;

    debug!(kind = %kind, "resolving job run document");
    let run: JobRun = serde_json::from_value(doc)?;
    Ok(run)
}

/// Write an explicit `family` into a record-shaped document when it is
/// missing or null, deriving it from the display name.
fn normalize_family(doc: &mut Value) -> Result<()> {
    let needs_family = matches!(doc.get("family"), None | Some(Value::Null));
    if !needs_family {
        return Ok(());
    }
    let name = doc
        .get("fullDisplayName")
        .or_else(|| doc.get("name"))
        .and_then(Value::as_str)
        .ok_or_else(|| Error::missing_field("fullDisplayName"))?;
    let family = Family::from_display_name(name);
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(
            "family".to_string(),
            Value::String(family.as_str().to_string()),
        );
    }
    Ok(())
}

/// Derive a matrix child's cell configuration from its URL when the stored
/// document predates the `matrixRunConfig` field.
fn normalize_child_config(doc: &mut Value) -> Result<()> {
    let needs_config = matches!(doc.get("matrixRunConfig"), None | Some(Value::Null));
    if !needs_config {
        return Ok(());
    }
    let url = doc
        .get("url")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::missing_field("url"))?;
    let config = crate::models::parse_url(url, crate::models::DEFAULT_IGNORE_KEYS);
    if let Some(obj) = doc.as_object_mut() {
        obj.insert(
            "matrixRunConfig".to_string(),
            serde_json::to_value(config)?,
        );
    }
    Ok(())
}

/// Rebuild a raw upstream matrix test report (the `childReports` shape)
/// into the per-cell report form. Stored documents already carry the
/// rebuilt form and pass through untouched.
fn normalize_matrix_results(doc: &mut Value) -> Result<()> {
    let Some(results) = doc.get_mut("testResults") else {
        return Ok(());
    };
    if results.get("childReports").is_some() && results.get("matrixTestReports").is_none() {
        let rebuilt = MatrixTestResults::from_data(results)?;
        *results = serde_json::to_value(rebuilt)?;
    }
    Ok(())
}
