//! Jenkins ingestion: payload normalization and the collection orchestrator.
//!
//! Transport lives behind [`JenkinsApi`] so the assembly and persistence
//! logic stays synchronous and testable against canned payloads.

use std::collections::BTreeMap;

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::config::Config;
use crate::db::JobStore;
use crate::error::{Error, Result};
use crate::models::{Job, JobRun, TestMatrixJobRun};

/// Transport seam for the upstream build server's JSON API.
pub trait JenkinsApi {
    /// Fetch one JSON document; a missing document is an error.
    fn fetch_json(&self, url: &str) -> Result<Value>;

    /// Fetch one JSON document that may legitimately not exist, such as the
    /// test report of a run that failed before testing.
    fn fetch_json_opt(&self, url: &str) -> Result<Option<Value>> {
        self.fetch_json(url).map(Some)
    }
}

/// Extract the build-parameter map from an upstream `actions` array.
///
/// Parameters come from the first recognized action: `ParametersAction` and
/// `MatrixChildParametersAction` carry concrete values,
/// `ParametersDefinitionProperty` carries defaults only.
pub fn build_parameters_from_actions(actions: &Value) -> BTreeMap<String, String> {
    let Some(actions) = actions.as_array() else {
        return BTreeMap::new();
    };

    let as_text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };

    for action in actions {
        let class = action.get("_class").and_then(Value::as_str).unwrap_or("");
        match class {
            "hudson.model.ParametersAction" | "hudson.matrix.MatrixChildParametersAction" => {
                if let Some(params) = action.get("parameters").and_then(Value::as_array) {
                    return params
                        .iter()
                        .filter_map(|p| {
                            let name = p.get("name")?.as_str()?.to_string();
                            let value = as_text(p.get("value")?);
                            Some((name, value))
                        })
                        .collect();
                }
            }
            "hudson.model.ParametersDefinitionProperty" => {
                if let Some(defs) = action.get("parameterDefinitions").and_then(Value::as_array) {
                    return defs
                        .iter()
                        .filter_map(|d| {
                            let name = d.get("name")?.as_str()?.to_string();
                            let value = as_text(d.get("defaultParameterValue")?.get("value")?);
                            Some((name, value))
                        })
                        .collect();
                }
            }
            _ => {}
        }
    }
    BTreeMap::new()
}

/// Normalize a raw upstream run payload into the record document shape.
///
/// The SERIAL and SUITE build parameters are mandatory; a payload without
/// them is rejected before anything is constructed from it. A `runs` array
/// (matrix fan-out) becomes `childRunsUrls`.
pub fn job_run_record_payload(data: &Value) -> Result<Value> {
    let empty = Value::Null;
    let params = build_parameters_from_actions(data.get("actions").unwrap_or(&empty));
    let serial = params
        .get("SERIAL")
        .ok_or_else(|| Error::missing_field("SERIAL"))?;
    let suite = params
        .get("SUITE")
        .ok_or_else(|| Error::missing_field("SUITE"))?;

    let mut doc = json!({
        "url": data.get("url").cloned().unwrap_or(Value::Null),
        "fullDisplayName": data.get("fullDisplayName").cloned().unwrap_or(Value::Null),
        "buildNumber": data.get("number").cloned().unwrap_or(Value::Null),
        "serial": serial,
        "suite": suite,
        "description": data.get("description").cloned().unwrap_or(Value::Null),
        "timestamp_ms": data.get("timestamp").cloned().unwrap_or(Value::Null),
        "duration_ms": data.get("duration").cloned().unwrap_or(Value::Null),
        "result": data.get("result").cloned().unwrap_or(Value::Null),
        "buildParameters": params,
    });

    if let Some(runs) = data.get("runs").and_then(Value::as_array) {
        let urls: Vec<Value> = runs.iter().filter_map(|r| r.get("url").cloned()).collect();
        doc["childRunsUrls"] = Value::Array(urls);
    }
    Ok(doc)
}

/// Fetch one job's metadata from the upstream API.
pub fn fetch_job(api: &impl JenkinsApi, config: &Config, job_name: &str) -> Result<Job> {
    let data = api.fetch_json(&config.job_api_url(job_name))?;
    let params = build_parameters_from_actions(data.get("actions").unwrap_or(&Value::Null));
    let suite = params
        .get("SUITE")
        .ok_or_else(|| Error::missing_field("SUITE"))?;

    let build_numbers: Vec<Value> = data
        .get("builds")
        .and_then(Value::as_array)
        .map(|builds| builds.iter().filter_map(|b| b.get("number").cloned()).collect())
        .unwrap_or_default();
    let last_completed = data
        .get("lastCompletedBuild")
        .and_then(|b| b.get("number"))
        .cloned()
        .unwrap_or(Value::Null);

    Job::from_data(&json!({
        "url": config.job_url(job_name),
        "fullDisplayName": data.get("fullDisplayName").cloned().unwrap_or(Value::Null),
        "buildNumbers": build_numbers,
        "lastCompletedBuildNumber": last_completed,
        "suite": suite,
        "description": data.get("description").cloned().unwrap_or(Value::Null),
    }))
}

/// Fetch a job and merge it with what the store already has. Build numbers
/// only grow; the merged job is stored before it is returned.
pub fn refresh_job(
    api: &impl JenkinsApi,
    config: &Config,
    store: &mut impl JobStore,
    job_name: &str,
) -> Result<Job> {
    let fetched = fetch_job(api, config, job_name)?;
    let job = match store.load_job(&fetched.name)? {
        Some(mut existing) => {
            existing.refresh_from(&fetched);
            existing
        }
        None => fetched,
    };
    store.store_job(&job)?;
    Ok(job)
}

/// Fetch and normalize the payload of every matrix cell of one run.
pub fn fetch_matrix_child_runs(
    api: &impl JenkinsApi,
    config: &Config,
    run_payload: &Value,
) -> Result<Vec<Value>> {
    let Some(runs) = run_payload.get("runs").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };
    runs.iter()
        .filter_map(|r| r.get("url").and_then(Value::as_str))
        .map(|url| {
            let child = api.fetch_json(&config.to_api_url(url))?;
            job_run_record_payload(&child)
        })
        .collect()
}

/// Assemble one complete [`TestMatrixJobRun`]: the run payload, its test
/// report (absent reports are tolerated), and all child runs, then backfill
/// error texts for every FAILED case.
pub fn fetch_test_matrix_job_run(
    api: &impl JenkinsApi,
    config: &Config,
    job_name: &str,
    build_number: i64,
) -> Result<TestMatrixJobRun> {
    info!(job = job_name, build = build_number, "fetching full test job run");
    let run_payload = api.fetch_json(&config.job_run_api_url(job_name, build_number))?;
    let test_results = api.fetch_json_opt(&config.test_report_api_url(job_name, build_number))?;
    let matrix_runs = fetch_matrix_child_runs(api, config, &run_payload)?;

    let mut run = TestMatrixJobRun::from_data(
        &job_run_record_payload(&run_payload)?,
        test_results.as_ref(),
        &matrix_runs,
    )?;

    run.fetch_error_texts_for_failed_tests(|report_url| {
        let url = format!("{}/api/json", config.to_api_url(report_url).trim_end_matches('/'));
        let data = api.fetch_json(&url)?;
        Ok((
            data.get("errorDetails")
                .and_then(Value::as_str)
                .map(str::to_string),
            data.get("errorStackTrace")
                .and_then(Value::as_str)
                .map(str::to_string),
        ))
    })?;

    Ok(run)
}

/// Refresh one job and ingest every completed build the store does not have
/// yet. Returns the refreshed job and only the newly fetched runs; runs
/// already stored are skipped, so repeated calls are idempotent.
pub fn collect_all_job_runs(
    api: &impl JenkinsApi,
    config: &Config,
    store: &mut impl JobStore,
    job_name: &str,
) -> Result<(Job, Vec<JobRun>)> {
    let job = refresh_job(api, config, store, job_name)?;

    let Some(last_completed) = job.last_completed_build_number else {
        warn!(job = job_name, "job has no completed builds, nothing to fetch");
        return Ok((job, Vec::new()));
    };

    let mut fetched = Vec::new();
    for &build_number in &job.build_numbers {
        if build_number > last_completed {
            // Still running.
            continue;
        }
        if store.load_job_run(job_name, build_number)?.is_some() {
            info!(job = job_name, build = build_number, "job run already stored");
            continue;
        }

        info!(job = job_name, build = build_number, "fetching job run");
        let run = JobRun::TestMatrix(fetch_test_matrix_job_run(
            api,
            config,
            job_name,
            build_number,
        )?);
        store.store_job_run(&run)?;
        fetched.push(run);
    }

    Ok((job, fetched))
}
