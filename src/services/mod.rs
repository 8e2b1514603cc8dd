//! Ingestion services.

pub mod jenkins;

pub use jenkins::{collect_all_job_runs, JenkinsApi};
