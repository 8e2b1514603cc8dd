//! Matrix-cell configuration and per-cell test reports.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::raw;
use super::test::TestResult;
use crate::error::Result;

/// Keys stripped from parsed URL parameters by default. `node` identifies
/// the build executor, which is infrastructure noise rather than cell
/// configuration.
pub const DEFAULT_IGNORE_KEYS: &[&str] = &["node"];

static KEY_VALUE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?P<key>\w+?)=(?P<value>[\w.\-]+)").expect("literal pattern"));

/// Extract `key=value` segments from a URL path.
///
/// Keys are lower-cased; keys in `ignore_keys` are dropped; any segment not
/// matching the grammar is skipped. A repeated key keeps its first position
/// but takes the last value. Pair order follows the URL.
pub fn parse_url(url: &str, ignore_keys: &[&str]) -> Vec<(String, String)> {
    let mut params: Vec<(String, String)> = Vec::new();
    for caps in KEY_VALUE_RE.captures_iter(url) {
        let key = caps["key"].to_lowercase();
        if ignore_keys.iter().any(|k| *k == key) {
            continue;
        }
        let value = caps["value"].to_string();
        match params.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => params.push((key, value)),
        }
    }
    params
}

/// Configuration of one matrix cell (architecture, instance type, test, ...).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixTestRunConfig {
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
}

/// Oracle-specific matrix cell configuration. Oracle pipelines fan out over
/// launch mode and login method in addition to the common axes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleMatrixTestRunConfig {
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(default)]
    pub test: Option<String>,
    pub launch_mode: String,
    pub login_method: String,
}

/// A matrix cell configuration, std or provider-specific.
///
/// The variant is chosen by the presence of provider-specific keys among the
/// parsed URL parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MatrixRunConfig {
    Oracle(OracleMatrixTestRunConfig),
    Standard(MatrixTestRunConfig),
}

impl MatrixRunConfig {
    /// Build a configuration from the `key=value` segments of a cell URL.
    pub fn from_url(url: &str) -> Self {
        let params = parse_url(url, DEFAULT_IGNORE_KEYS);
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        match (get("launch_mode"), get("login_method")) {
            (Some(launch_mode), Some(login_method)) => {
                MatrixRunConfig::Oracle(OracleMatrixTestRunConfig {
                    arch: get("arch"),
                    instance_type: get("instance_type"),
                    test: get("test"),
                    launch_mode,
                    login_method,
                })
            }
            _ => MatrixRunConfig::Standard(MatrixTestRunConfig {
                arch: get("arch"),
                instance_type: get("instance_type"),
                test: get("test"),
            }),
        }
    }

    pub fn arch(&self) -> Option<&str> {
        match self {
            Self::Oracle(c) => c.arch.as_deref(),
            Self::Standard(c) => c.arch.as_deref(),
        }
    }

    pub fn instance_type(&self) -> Option<&str> {
        match self {
            Self::Oracle(c) => c.instance_type.as_deref(),
            Self::Standard(c) => c.instance_type.as_deref(),
        }
    }

    pub fn test(&self) -> Option<&str> {
        match self {
            Self::Oracle(c) => c.test.as_deref(),
            Self::Standard(c) => c.test.as_deref(),
        }
    }

    /// Canonical space-joined `key=value` rendering of the present fields.
    pub fn config_string(&self) -> String {
        let mut parts: Vec<String> = Vec::new();
        let mut push = |key: &str, value: Option<&str>| {
            if let Some(v) = value {
                parts.push(format!("{key}={v}"));
            }
        };
        push("arch", self.arch());
        push("instance_type", self.instance_type());
        push("test", self.test());
        if let Self::Oracle(c) = self {
            parts.push(format!("launch_mode={}", c.launch_mode));
            parts.push(format!("login_method={}", c.login_method));
        }
        parts.join(" ")
    }
}

/// Replace only the last `.` of a fully-qualified class name with `/`.
/// Package separators before the last one are preserved as-is.
pub(crate) fn class_name_path(class_name: &str) -> String {
    match class_name.rfind('.') {
        Some(i) => format!("{}/{}", &class_name[..i], &class_name[i + 1..]),
        None => class_name.to_string(),
    }
}

/// Sanitize a test name for the leaf-run report endpoint, which does not
/// URL-encode by itself: every character outside `[A-Za-z0-9_]` becomes `_`.
pub(crate) fn sanitize_test_name(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// One matrix cell's test report: its configuration, its results, and the
/// cell URL they came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixTestReport {
    #[serde(rename = "testConfig")]
    pub test_config: MatrixRunConfig,
    #[serde(rename = "testResult")]
    pub test_result: TestResult,
    pub url: String,
}

impl MatrixTestReport {
    /// Construct from a raw child-report payload: the child descriptor and
    /// its result subtree.
    pub fn from_data(child: &Value, result: &Value) -> Result<Self> {
        let url = raw::require_str(child, "url")?;
        let test_result = TestResult::from_data(result)?;
        let test_config = MatrixRunConfig::from_url(&url);
        Ok(MatrixTestReport {
            test_config,
            test_result,
            url,
        })
    }

    /// Deterministic report URL for one test case within this cell.
    pub fn test_case_report_url(&self, test_case_name: &str, test_case_class: &str) -> String {
        format!(
            "{}/testReport/junit/{}/{}",
            self.url.trim_end_matches('/'),
            class_name_path(test_case_class),
            test_case_name
        )
    }
}

/// Aggregated matrix test results: overall counts plus the per-cell reports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatrixTestResults {
    #[serde(rename = "failCount")]
    pub fail_count: i64,
    #[serde(rename = "skipCount")]
    pub skip_count: i64,
    #[serde(rename = "totalCount")]
    pub total_count: i64,
    #[serde(rename = "matrixTestReports")]
    pub matrix_test_reports: Vec<MatrixTestReport>,
}

impl MatrixTestResults {
    /// Construct from a raw aggregated test-report payload. Each entry of
    /// `childReports` pairs a child descriptor with its result subtree.
    pub fn from_data(data: &Value) -> Result<Self> {
        let matrix_test_reports = raw::require_array(data, "childReports")?
            .iter()
            .map(|report| {
                let child = raw::require(report, "child")?;
                let result = raw::require(report, "result")?;
                MatrixTestReport::from_data(child, result)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(MatrixTestResults {
            fail_count: raw::require_i64(data, "failCount")?,
            skip_count: raw::require_i64(data, "skipCount")?,
            total_count: raw::require_i64(data, "totalCount")?,
            matrix_test_reports,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_url_extracts_ordered_pairs() {
        let url = "https://jenkins.example.com/job/test/ARCH=amd64,INSTANCE_TYPE=t2.micro,node=ps5/3/";
        let params = parse_url(url, DEFAULT_IGNORE_KEYS);
        assert_eq!(
            params,
            vec![
                ("arch".to_string(), "amd64".to_string()),
                ("instance_type".to_string(), "t2.micro".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_url_skips_non_matching_segments() {
        let params = parse_url("https://host/job/plain/42/", DEFAULT_IGNORE_KEYS);
        assert!(params.is_empty());
    }

    #[test]
    fn test_parse_url_round_trips_config_string() {
        let config = MatrixRunConfig::from_url("arch=amd64 instance_type=t2.micro test=boot");
        assert_eq!(
            config.config_string(),
            "arch=amd64 instance_type=t2.micro test=boot"
        );
        let reparsed = parse_url(&config.config_string(), DEFAULT_IGNORE_KEYS);
        assert_eq!(
            reparsed,
            vec![
                ("arch".to_string(), "amd64".to_string()),
                ("instance_type".to_string(), "t2.micro".to_string()),
                ("test".to_string(), "boot".to_string()),
            ]
        );
    }

    #[test]
    fn test_parse_url_excludes_node_key() {
        let config =
            MatrixRunConfig::from_url("arch=amd64 instance_type=t2.micro test=boot node=ps5");
        assert_eq!(
            config.config_string(),
            "arch=amd64 instance_type=t2.micro test=boot"
        );
    }

    #[test]
    fn test_oracle_variant_selected_by_provider_keys() {
        let config = MatrixRunConfig::from_url(
            "https://host/job/t/ARCH=arm64,LAUNCH_MODE=paravirt,LOGIN_METHOD=ssh/7/",
        );
        match &config {
            MatrixRunConfig::Oracle(c) => {
                assert_eq!(c.arch.as_deref(), Some("arm64"));
                assert_eq!(c.launch_mode, "paravirt");
                assert_eq!(c.login_method, "ssh");
            }
            MatrixRunConfig::Standard(_) => panic!("expected Oracle variant"),
        }
        assert_eq!(
            config.config_string(),
            "arch=arm64 launch_mode=paravirt login_method=ssh"
        );
    }

    #[test]
    fn test_class_name_path_replaces_only_last_dot() {
        assert_eq!(
            class_name_path("tests.suite.BasicUbuntu"),
            "tests.suite/BasicUbuntu"
        );
        assert_eq!(class_name_path("BasicUbuntu"), "BasicUbuntu");
    }

    #[test]
    fn test_matrix_report_url_keeps_raw_test_name() {
        let report = MatrixTestReport {
            test_config: MatrixRunConfig::from_url("arch=amd64"),
            test_result: TestResult {
                duration: 0.0,
                empty: false,
                fail_count: 0,
                pass_count: 0,
                skip_count: 0,
                suites: vec![],
            },
            url: "https://host/job/t/ARCH=amd64/3/".to_string(),
        };
        assert_eq!(
            report.test_case_report_url("test snap (preseed)", "tests.suite.BasicUbuntu"),
            "https://host/job/t/ARCH=amd64/3/testReport/junit/tests.suite/BasicUbuntu/test snap (preseed)"
        );
    }

    #[test]
    fn test_sanitize_test_name_replaces_unsafe_characters() {
        assert_eq!(
            sanitize_test_name("test snap (preseed)"),
            "test_snap__preseed_"
        );
        assert_eq!(sanitize_test_name("test_boot"), "test_boot");
    }

    #[test]
    fn test_matrix_test_results_from_data_builds_children_first() {
        let payload = json!({
            "failCount": 1,
            "skipCount": 0,
            "totalCount": 2,
            "childReports": [{
                "child": {"url": "https://host/job/t/ARCH=amd64/3/"},
                "result": {
                    "failCount": 1,
                    "passCount": 1,
                    "skipCount": 0,
                    "suites": [],
                },
            }],
        });
        let results = MatrixTestResults::from_data(&payload).unwrap();
        assert_eq!(results.matrix_test_reports.len(), 1);
        assert_eq!(
            results.matrix_test_reports[0].test_config.arch(),
            Some("amd64")
        );

        // A child missing its result payload fails the parent entirely.
        let broken = json!({
            "failCount": 1,
            "skipCount": 0,
            "totalCount": 2,
            "childReports": [{"child": {"url": "https://host/x/"}}],
        });
        assert!(MatrixTestResults::from_data(&broken).is_err());
    }
}
