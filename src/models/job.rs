//! Job domain models: pipeline entries and shared run enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::raw;
use crate::error::{Error, Result};

/// Image family a pipeline builds, derived from the display name when not
/// supplied explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Family {
    Base,
    Minimal,
}

impl Family {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Base => "Base",
            Self::Minimal => "Minimal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Base" => Some(Self::Base),
            "Minimal" => Some(Self::Minimal),
            _ => None,
        }
    }

    /// Derive the family from a display name: any case-insensitive
    /// occurrence of "minimal" means Minimal, everything else is Base.
    pub fn from_display_name(name: &str) -> Self {
        if name.to_lowercase().contains("minimal") {
            Self::Minimal
        } else {
            Self::Base
        }
    }

    /// Read the family from a raw payload, deriving it from the display name
    /// only when absent. An explicitly supplied family is never overwritten.
    pub(crate) fn from_data(data: &Value) -> Result<Self> {
        if let Some(explicit) = data.get("family").and_then(Value::as_str) {
            return Self::parse(explicit).ok_or_else(|| Error::invalid_field("family", explicit));
        }
        let name = raw::opt_str(data, "fullDisplayName")
            .or_else(|| raw::opt_str(data, "name"))
            .ok_or_else(|| Error::missing_field("fullDisplayName"))?;
        Ok(Self::from_display_name(&name))
    }
}

impl std::fmt::Display for Family {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Terminal result of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RunResult {
    Success,
    Failure,
    Unstable,
    Aborted,
}

impl RunResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::Unstable => "UNSTABLE",
            Self::Aborted => "ABORTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SUCCESS" => Some(Self::Success),
            "FAILURE" => Some(Self::Failure),
            "UNSTABLE" => Some(Self::Unstable),
            "ABORTED" => Some(Self::Aborted),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named build pipeline entry with its known build history.
///
/// The build-number set only grows across refreshes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub url: String,
    #[serde(rename = "fullDisplayName")]
    pub name: String,
    #[serde(rename = "buildNumbers")]
    pub build_numbers: Vec<i64>,
    #[serde(rename = "lastCompletedBuildNumber", default)]
    pub last_completed_build_number: Option<i64>,
    pub suite: String,
    pub family: Family,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

impl Job {
    /// Construct from a raw payload, deriving the family when absent.
    pub fn from_data(data: &Value) -> Result<Self> {
        let mut build_numbers = raw::require_array(data, "buildNumbers")?
            .iter()
            .map(|v| {
                v.as_i64()
                    .ok_or_else(|| Error::invalid_field("buildNumbers", "expected integers"))
            })
            .collect::<Result<Vec<_>>>()?;
        build_numbers.sort_unstable();
        build_numbers.dedup();

        Ok(Job {
            url: raw::require_str(data, "url")?,
            name: raw::require_str(data, "fullDisplayName")?,
            build_numbers,
            last_completed_build_number: raw::opt_i64(data, "lastCompletedBuildNumber"),
            suite: raw::require_str(data, "suite")?,
            family: Family::from_data(data)?,
            description: raw::opt_str(data, "description"),
            last_updated: data
                .get("lastUpdated")
                .map(|_| raw::require_timestamp(data, "lastUpdated"))
                .transpose()?
                .unwrap_or_else(Utc::now),
        })
    }

    /// Merge freshly fetched job data into this record. Build numbers only
    /// grow; description and the last completed build are replaced; the
    /// stored family and suite are kept.
    pub fn refresh_from(&mut self, newer: &Job) {
        for build in &newer.build_numbers {
            if !self.build_numbers.contains(build) {
                self.build_numbers.push(*build);
            }
        }
        self.build_numbers.sort_unstable();
        self.description = newer.description.clone();
        self.last_completed_build_number = newer.last_completed_build_number;
        self.last_updated = Utc::now();
    }
}
