//! Typed store and failure analytics for Jenkins job runs.
//!
//! Ingests raw job-run payloads from a Jenkins-style build server,
//! normalizes them into a typed run hierarchy, persists them as JSON
//! documents, and provides a filter engine and rollups over the test
//! failures they contain.

pub mod analysis;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod resolve;
pub mod services;

pub use error::{Error, Result};
