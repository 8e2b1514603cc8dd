//! The failure filter engine.
//!
//! A filter is a set of explicit per-field parameter slots plus a combine
//! mode. String parameters are case-insensitive regex containment; typed
//! parameters compare with an explicit operator. Filters never mutate their
//! input: they partition a slice of records into matched and unmatched.

use std::fmt;

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// How a filter's active parameters combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CombineMode {
    #[default]
    And,
    Or,
}

/// Comparison operator for typed parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    #[default]
    Eq,
    Gt,
    Lt,
    Ge,
    Le,
}

impl CompareOp {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "eq" => Ok(Self::Eq),
            "gt" => Ok(Self::Gt),
            "lt" => Ok(Self::Lt),
            "ge" => Ok(Self::Ge),
            "le" => Ok(Self::Le),
            other => Err(Error::InvalidOperator(other.to_string())),
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "==",
            Self::Gt => ">",
            Self::Lt => "<",
            Self::Ge => ">=",
            Self::Le => "<=",
        }
    }

    fn accepts(&self, ord: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Self::Eq => ord == Equal,
            Self::Gt => ord == Greater,
            Self::Lt => ord == Less,
            Self::Ge => ord != Less,
            Self::Le => ord != Greater,
        }
    }
}

/// A typed comparison value. Untagged: integers stay integers, RFC 3339
/// strings become timestamps, everything else is text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
    Text(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Time(v) => write!(f, "{}", v.to_rfc3339()),
            Self::Text(v) => write!(f, "{v}"),
        }
    }
}

/// A typed parameter: a value and a comparison operator, `eq` by default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareParam {
    pub value: ParamValue,
    #[serde(default)]
    pub op: CompareOp,
}

impl CompareParam {
    pub fn new(value: ParamValue, op: CompareOp) -> Self {
        Self { value, op }
    }

    pub fn eq(value: ParamValue) -> Self {
        Self::new(value, CompareOp::Eq)
    }

    /// Evaluate against one field value. A type mismatch never matches;
    /// integer and float values compare numerically across each other.
    pub fn matches(&self, field: &FieldValue<'_>) -> bool {
        let ord = match (field, &self.value) {
            (FieldValue::Int(x), ParamValue::Int(v)) => x.partial_cmp(v),
            (FieldValue::Int(x), ParamValue::Float(v)) => (*x as f64).partial_cmp(v),
            (FieldValue::Float(x), ParamValue::Int(v)) => x.partial_cmp(&(*v as f64)),
            (FieldValue::Float(x), ParamValue::Float(v)) => x.partial_cmp(v),
            (FieldValue::Time(x), ParamValue::Time(v)) => Some(x.cmp(v)),
            (FieldValue::Str(x), ParamValue::Text(v)) => Some((*x).cmp(v.as_str())),
            _ => None,
        };
        match ord {
            Some(ord) => self.op.accepts(ord),
            None => false,
        }
    }
}

impl fmt::Display for CompareParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.op.symbol(), self.value)
    }
}

/// A borrowed view of one filterable field of a record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Str(&'a str),
    Int(i64),
    Float(f64),
    Time(DateTime<Utc>),
}

/// Records that expose named fields to the filter engine.
///
/// Field lookup is explicit: a record returns `None` for names it does not
/// carry and for fields that are unset, and an unset field never matches.
pub trait Filterable {
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

/// One active parameter slot of a filter.
#[derive(Debug, Clone, Copy)]
pub enum ParamRef<'a> {
    /// Case-insensitive regex containment against a string field.
    Text(&'a str),
    /// Typed comparison.
    Compare(&'a CompareParam),
}

/// A named failure filter: metadata plus the active parameter slots.
///
/// The name and description are presentation only and never affect
/// matching.
pub trait FailureFilter {
    fn combine_mode(&self) -> CombineMode;
    fn filter_name(&self) -> &str;
    fn filter_description(&self) -> &str;
    /// The set parameter slots, as (field name, parameter) pairs.
    fn active_params(&self) -> Vec<(&'static str, ParamRef<'_>)>;
}

enum CompiledParam<'f> {
    Pattern(Regex),
    Compare(&'f CompareParam),
}

fn compile_params<'f>(
    filter: &'f dyn FailureFilter,
) -> Result<Vec<(&'static str, CompiledParam<'f>)>> {
    filter
        .active_params()
        .into_iter()
        .map(|(name, param)| {
            let compiled = match param {
                ParamRef::Text(pattern) => CompiledParam::Pattern(
                    RegexBuilder::new(pattern).case_insensitive(true).build()?,
                ),
                ParamRef::Compare(cp) => CompiledParam::Compare(cp),
            };
            Ok((name, compiled))
        })
        .collect()
}

fn param_matches<R: Filterable>(record: &R, name: &str, param: &CompiledParam<'_>) -> bool {
    let Some(field) = record.field(name) else {
        return false;
    };
    match param {
        CompiledParam::Pattern(re) => match field {
            FieldValue::Str(s) => re.is_match(s),
            _ => false,
        },
        CompiledParam::Compare(cp) => cp.matches(&field),
    }
}

fn record_matches<R: Filterable>(
    record: &R,
    params: &[(&'static str, CompiledParam<'_>)],
    mode: CombineMode,
) -> bool {
    match mode {
        // Zero active params matches everything.
        CombineMode::And => params.iter().all(|(name, p)| param_matches(record, name, p)),
        // Complement of "fails every param": zero active params matches
        // nothing.
        CombineMode::Or => {
            !params.is_empty() && params.iter().any(|(name, p)| param_matches(record, name, p))
        }
    }
}

/// Split `records` into (matched, unmatched) under one filter.
///
/// Both halves preserve input order; every record lands in exactly one half,
/// decided per position, so duplicates by value stay independent.
pub fn partition<'r, R: Filterable>(
    filter: &dyn FailureFilter,
    records: &'r [R],
) -> Result<(Vec<&'r R>, Vec<&'r R>)> {
    let params = compile_params(filter)?;
    let mode = filter.combine_mode();

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for record in records {
        if record_matches(record, &params, mode) {
            matched.push(record);
        } else {
            unmatched.push(record);
        }
    }
    Ok((matched, unmatched))
}

/// Split `records` into (matched by any filter, matched by none).
///
/// OR across the filters, each filter keeping its own combine mode inside.
/// Matched records are deduplicated by position. Empty input short-circuits
/// before any filter is compiled.
pub fn partition_all<'r, R: Filterable>(
    filters: &[&dyn FailureFilter],
    records: &'r [R],
) -> Result<(Vec<&'r R>, Vec<&'r R>)> {
    if records.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    let mut matched_flags = vec![false; records.len()];
    for filter in filters {
        let params = compile_params(*filter)?;
        let mode = filter.combine_mode();
        for (flag, record) in matched_flags.iter_mut().zip(records) {
            if !*flag && record_matches(record, &params, mode) {
                *flag = true;
            }
        }
    }

    let mut matched = Vec::new();
    let mut unmatched = Vec::new();
    for (flag, record) in matched_flags.iter().zip(records) {
        if *flag {
            matched.push(record);
        } else {
            unmatched.push(record);
        }
    }
    Ok((matched, unmatched))
}

fn default_filter_name() -> String {
    "Unnamed Filter".to_string()
}

fn default_filter_description() -> String {
    "No description provided".to_string()
}

/// Filter over test-failure records.
///
/// Every slot is optional; string slots match as case-insensitive regex
/// containment (use `.*`, not `*`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestFailureFilter {
    #[serde(default)]
    pub test_case_name: Option<String>,
    #[serde(default)]
    pub test_case_class_name: Option<String>,
    #[serde(default)]
    pub error_text: Option<String>,
    #[serde(default)]
    pub error_stack_trace: Option<String>,
    #[serde(default)]
    pub suite: Option<String>,
    #[serde(default)]
    pub job_name: Option<String>,
    #[serde(default)]
    pub build_number: Option<CompareParam>,
    #[serde(default)]
    pub job_run_url: Option<String>,
    #[serde(default)]
    pub test_case_url: Option<String>,
    #[serde(default)]
    pub timestamp: Option<CompareParam>,

    #[serde(default = "default_filter_name")]
    pub filter_name: String,
    #[serde(default = "default_filter_description")]
    pub filter_description: String,
    #[serde(default)]
    pub filter_operator: CombineMode,
}

impl Default for TestFailureFilter {
    fn default() -> Self {
        TestFailureFilter {
            test_case_name: None,
            test_case_class_name: None,
            error_text: None,
            error_stack_trace: None,
            suite: None,
            job_name: None,
            build_number: None,
            job_run_url: None,
            test_case_url: None,
            timestamp: None,
            filter_name: default_filter_name(),
            filter_description: default_filter_description(),
            filter_operator: CombineMode::And,
        }
    }
}

fn push_text<'a>(
    params: &mut Vec<(&'static str, ParamRef<'a>)>,
    name: &'static str,
    value: &'a Option<String>,
) {
    if let Some(v) = value {
        params.push((name, ParamRef::Text(v)));
    }
}

fn push_compare<'a>(
    params: &mut Vec<(&'static str, ParamRef<'a>)>,
    name: &'static str,
    value: &'a Option<CompareParam>,
) {
    if let Some(v) = value {
        params.push((name, ParamRef::Compare(v)));
    }
}

impl FailureFilter for TestFailureFilter {
    fn combine_mode(&self) -> CombineMode {
        self.filter_operator
    }

    fn filter_name(&self) -> &str {
        &self.filter_name
    }

    fn filter_description(&self) -> &str {
        &self.filter_description
    }

    fn active_params(&self) -> Vec<(&'static str, ParamRef<'_>)> {
        let mut params = Vec::new();
        push_text(&mut params, "test_case_name", &self.test_case_name);
        push_text(&mut params, "test_case_class_name", &self.test_case_class_name);
        push_text(&mut params, "error_text", &self.error_text);
        push_text(&mut params, "error_stack_trace", &self.error_stack_trace);
        push_text(&mut params, "suite", &self.suite);
        push_text(&mut params, "job_name", &self.job_name);
        push_compare(&mut params, "build_number", &self.build_number);
        push_text(&mut params, "job_run_url", &self.job_run_url);
        push_text(&mut params, "test_case_url", &self.test_case_url);
        push_compare(&mut params, "timestamp", &self.timestamp);
        params
    }
}

impl fmt::Display for TestFailureFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:\n{}", self.filter_name, self.filter_description)?;
        for (name, param) in self.active_params() {
            match param {
                ParamRef::Text(v) => write!(f, "\n  {name}: {v}")?,
                ParamRef::Compare(v) => write!(f, "\n  {name}: {v}")?,
            }
        }
        Ok(())
    }
}

/// A parameter that is either a plain string pattern or a typed comparison,
/// used for version slots that can be matched either way.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TextOrCompare {
    Compare(CompareParam),
    Text(String),
}

impl TextOrCompare {
    fn as_param_ref(&self) -> ParamRef<'_> {
        match self {
            Self::Compare(cp) => ParamRef::Compare(cp),
            Self::Text(s) => ParamRef::Text(s),
        }
    }
}

/// [`TestFailureFilter`] extended with cloud-init specific slots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CiTestFailureFilter {
    #[serde(flatten)]
    pub base: TestFailureFilter,
    #[serde(default)]
    pub cloud_name: Option<String>,
    #[serde(default)]
    pub image_type: Option<String>,
    #[serde(default)]
    pub cloud_init_version: Option<TextOrCompare>,
}

impl FailureFilter for CiTestFailureFilter {
    fn combine_mode(&self) -> CombineMode {
        self.base.filter_operator
    }

    fn filter_name(&self) -> &str {
        &self.base.filter_name
    }

    fn filter_description(&self) -> &str {
        &self.base.filter_description
    }

    fn active_params(&self) -> Vec<(&'static str, ParamRef<'_>)> {
        let mut params = self.base.active_params();
        push_text(&mut params, "cloud_name", &self.cloud_name);
        push_text(&mut params, "image_type", &self.image_type);
        if let Some(version) = &self.cloud_init_version {
            params.push(("cloud_init_version", version.as_param_ref()));
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Record {
        name: &'static str,
        error: Option<&'static str>,
        build: i64,
    }

    impl Filterable for Record {
        fn field(&self, name: &str) -> Option<FieldValue<'_>> {
            match name {
                "test_case_name" => Some(FieldValue::Str(self.name)),
                "error_text" => self.error.map(FieldValue::Str),
                "build_number" => Some(FieldValue::Int(self.build)),
                _ => None,
            }
        }
    }

    fn records() -> Vec<Record> {
        vec![
            Record { name: "test_snap_preseed", error: Some("oops timeout"), build: 10 },
            Record { name: "test_lxd", error: Some("connection reset"), build: 11 },
            Record { name: "test_boot", error: None, build: 12 },
        ]
    }

    #[test]
    fn test_and_requires_every_active_param() {
        let filter = TestFailureFilter {
            test_case_name: Some("snap".to_string()),
            error_text: Some("timeout".to_string()),
            ..TestFailureFilter::default()
        };
        let records = records();
        let (matched, unmatched) = partition(&filter, &records).unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].name, "test_snap_preseed");
        assert_eq!(unmatched.len(), 2);
    }

    #[test]
    fn test_or_matches_any_active_param() {
        let filter = TestFailureFilter {
            test_case_name: Some("lxd".to_string()),
            error_text: Some("timeout".to_string()),
            filter_operator: CombineMode::Or,
            ..TestFailureFilter::default()
        };
        let records = records();
        let (matched, unmatched) = partition(&filter, &records).unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].name, "test_boot");
    }

    #[test]
    fn test_empty_and_matches_all_empty_or_matches_none() {
        let records = records();

        let all = TestFailureFilter::default();
        let (matched, _) = partition(&all, &records).unwrap();
        assert_eq!(matched.len(), 3);

        let none = TestFailureFilter {
            filter_operator: CombineMode::Or,
            ..TestFailureFilter::default()
        };
        let (matched, unmatched) = partition(&none, &records).unwrap();
        assert!(matched.is_empty());
        assert_eq!(unmatched.len(), 3);
    }

    #[test]
    fn test_unset_field_never_matches() {
        let filter = TestFailureFilter {
            error_text: Some(".*".to_string()),
            ..TestFailureFilter::default()
        };
        let records = records();
        let (matched, _) = partition(&filter, &records).unwrap();
        // test_boot has no error text, so not even ".*" reaches it.
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_string_matching_is_case_insensitive_containment() {
        let filter = TestFailureFilter {
            test_case_name: Some("SNAP".to_string()),
            ..TestFailureFilter::default()
        };
        let records = records();
        let (matched, _) = partition(&filter, &records).unwrap();
        assert_eq!(matched.len(), 1);
    }

    #[test]
    fn test_compare_param_operators() {
        let filter = TestFailureFilter {
            build_number: Some(CompareParam::new(ParamValue::Int(11), CompareOp::Ge)),
            ..TestFailureFilter::default()
        };
        let records = records();
        let (matched, _) = partition(&filter, &records).unwrap();
        assert_eq!(matched.len(), 2);

        assert!(CompareParam::eq(ParamValue::Int(10)).matches(&FieldValue::Int(10)));
        assert!(!CompareParam::eq(ParamValue::Int(10)).matches(&FieldValue::Str("10")));
        assert!(
            CompareParam::new(ParamValue::Float(1.5), CompareOp::Lt)
                .matches(&FieldValue::Int(1))
        );
    }

    #[test]
    fn test_invalid_operator_string_is_rejected() {
        let err = CompareOp::parse("neq").unwrap_err();
        assert!(matches!(err, Error::InvalidOperator(op) if op == "neq"));
        assert_eq!(CompareOp::parse("ge").unwrap().symbol(), ">=");
    }

    #[test]
    fn test_invalid_regex_is_reported_not_panicked() {
        let filter = TestFailureFilter {
            test_case_name: Some("[".to_string()),
            ..TestFailureFilter::default()
        };
        let records = records();
        let err = partition(&filter, &records).unwrap_err();
        assert!(matches!(err, Error::InvalidFilter(_)));
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint_with_duplicates() {
        let records = vec![
            Record { name: "test_lxd", error: None, build: 1 },
            Record { name: "test_lxd", error: None, build: 1 },
        ];
        let filter = TestFailureFilter {
            test_case_name: Some("lxd".to_string()),
            ..TestFailureFilter::default()
        };
        let (matched, unmatched) = partition(&filter, &records).unwrap();
        assert_eq!(matched.len() + unmatched.len(), records.len());
        // Identical values are tracked by position, both match here.
        assert_eq!(matched.len(), 2);
    }

    #[test]
    fn test_partition_all_unions_filters() {
        let records = records();
        let snap = TestFailureFilter {
            test_case_name: Some("snap".to_string()),
            ..TestFailureFilter::default()
        };
        let lxd = TestFailureFilter {
            test_case_name: Some("lxd".to_string()),
            ..TestFailureFilter::default()
        };
        let (matched, unmatched) =
            partition_all(&[&snap as &dyn FailureFilter, &lxd], &records).unwrap();
        assert_eq!(matched.len(), 2);
        assert_eq!(unmatched.len(), 1);
        assert_eq!(unmatched[0].name, "test_boot");

        // Empty input returns immediately, even with a broken filter.
        let broken = TestFailureFilter {
            test_case_name: Some("[".to_string()),
            ..TestFailureFilter::default()
        };
        let empty: Vec<Record> = Vec::new();
        let (matched, unmatched) =
            partition_all(&[&broken as &dyn FailureFilter], &empty).unwrap();
        assert!(matched.is_empty() && unmatched.is_empty());
    }

    #[test]
    fn test_filter_deserializes_with_defaults() {
        let filter: TestFailureFilter = serde_json::from_str(
            r#"{"test_case_name": "lxd", "build_number": {"value": 3, "op": "gt"}}"#,
        )
        .unwrap();
        assert_eq!(filter.filter_name, "Unnamed Filter");
        assert_eq!(filter.filter_operator, CombineMode::And);
        assert_eq!(
            filter.build_number,
            Some(CompareParam::new(ParamValue::Int(3), CompareOp::Gt))
        );
    }

    #[test]
    fn test_ci_filter_version_slot_accepts_both_shapes() {
        let text: CiTestFailureFilter =
            serde_json::from_str(r#"{"cloud_init_version": "24.1"}"#).unwrap();
        assert_eq!(
            text.cloud_init_version,
            Some(TextOrCompare::Text("24.1".to_string()))
        );

        let typed: CiTestFailureFilter = serde_json::from_str(
            r#"{"cloud_init_version": {"value": "24.1", "op": "ge"}}"#,
        )
        .unwrap();
        assert_eq!(
            typed.cloud_init_version,
            Some(TextOrCompare::Compare(CompareParam::new(
                ParamValue::Text("24.1".to_string()),
                CompareOp::Ge,
            )))
        );
    }
}
