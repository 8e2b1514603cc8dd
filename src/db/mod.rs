//! Document persistence for jobs and job runs.
//!
//! Storage is deliberately schemaless: jobs and runs are kept as JSON
//! documents, and typed values are reconstructed through the resolver on the
//! way out. [`JobStore`] is the seam; [`MemoryStore`] is the in-process
//! implementation used by the ingestion service and by tests.

use std::collections::BTreeMap;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{Job, JobRun, TestMatrixJobRun};
use crate::resolve::resolve_job_run;

/// Storage seam for job and job-run documents.
///
/// Jobs are keyed by display name. Runs are keyed by job name (without the
/// build suffix) and build number together; storing a run with an existing
/// key replaces the document.
pub trait JobStore {
    /// Upsert a job document, keyed by its display name.
    fn store_job(&mut self, job: &Job) -> Result<()>;

    /// Upsert a job-run document, keyed by display name and build number.
    fn store_job_run(&mut self, run: &JobRun) -> Result<()>;

    /// Load one job by display name.
    fn load_job(&self, name: &str) -> Result<Option<Job>>;

    /// Load one run by job display name and build number.
    fn load_job_run(&self, name: &str, build_number: i64) -> Result<Option<JobRun>>;

    /// Load every run whose job display name matches `pattern`
    /// (case-insensitive regex), ordered by name then build number.
    fn load_job_runs_matching(&self, pattern: &str) -> Result<Vec<JobRun>>;

    /// Load the highest-numbered run of one job.
    fn load_most_recent_job_run(&self, name: &str) -> Result<Option<JobRun>>;
}

/// In-memory [`JobStore`] over raw JSON documents.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: BTreeMap<String, Value>,
    // Keyed by job display name and build number. BTreeMap ordering gives
    // load_job_runs_matching its name-then-build order for free.
    runs: BTreeMap<(String, i64), Value>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_count(&self) -> usize {
        self.jobs.len()
    }

    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Typed convenience over [`JobStore::load_job_runs_matching`]: only the
    /// runs that resolve to [`TestMatrixJobRun`].
    pub fn test_matrix_job_runs_matching(&self, pattern: &str) -> Result<Vec<TestMatrixJobRun>> {
        Ok(self
            .load_job_runs_matching(pattern)?
            .into_iter()
            .filter_map(|run| match run {
                JobRun::TestMatrix(r) => Some(r),
                _ => None,
            })
            .collect())
    }
}

impl JobStore for MemoryStore {
    fn store_job(&mut self, job: &Job) -> Result<()> {
        let doc = serde_json::to_value(job)?;
        debug!(job = %job.name, "storing job document");
        self.jobs.insert(job.name.clone(), doc);
        Ok(())
    }

    fn store_job_run(&mut self, run: &JobRun) -> Result<()> {
        let record = run.record();
        let doc = serde_json::to_value(run)?;
        debug!(run = %record.name, build = record.build_number, "storing job run document");
        // Keyed by the job name without the build suffix, so all builds of
        // one job are adjacent.
        self.runs
            .insert((record.job_name(), record.build_number), doc);
        Ok(())
    }

    fn load_job(&self, name: &str) -> Result<Option<Job>> {
        self.jobs
            .get(name)
            .map(|doc| serde_json::from_value(doc.clone()).map_err(Error::from))
            .transpose()
    }

    fn load_job_run(&self, name: &str, build_number: i64) -> Result<Option<JobRun>> {
        self.runs
            .get(&(name.to_string(), build_number))
            .map(resolve_job_run)
            .transpose()
    }

    fn load_job_runs_matching(&self, pattern: &str) -> Result<Vec<JobRun>> {
        let re = Regex::new(&format!("(?i){pattern}"))?;
        self.runs
            .iter()
            .filter(|((name, _), _)| re.is_match(name))
            .map(|(_, doc)| resolve_job_run(doc))
            .collect()
    }

    fn load_most_recent_job_run(&self, name: &str) -> Result<Option<JobRun>> {
        self.runs
            .range((name.to_string(), i64::MIN)..=(name.to_string(), i64::MAX))
            .next_back()
            .map(|(_, doc)| resolve_job_run(doc))
            .transpose()
    }
}
