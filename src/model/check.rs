//! The canonical check vocabulary: the closed set of result kinds an audit task may emit.

use serde::Serialize;
use std::fmt;

/// The base category selected by an input record's `state` field.
///
/// Deliberately not symmetric with the input state name (`active` maps to `Item`,
/// not `ActiveItem`) so that historical CSV output stays comparable across runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseCategory {
    Item,
    EmptyItem,
    DeletedItem,
    MergedItem,
}

impl BaseCategory {
    pub const fn as_str(self) -> &'static str {
        match self {
            BaseCategory::Item => "Item",
            BaseCategory::EmptyItem => "EmptyItem",
            BaseCategory::DeletedItem => "DeletedItem",
            BaseCategory::MergedItem => "MergedItem",
        }
    }
}

impl fmt::Display for BaseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed `check_state` label carried by every result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CheckState {
    Passed,
    Failed,
    ItemSkipped,
}

impl CheckState {
    pub const fn as_str(self) -> &'static str {
        match self {
            CheckState::Passed => "PASSED",
            CheckState::Failed => "FAILED",
            CheckState::ItemSkipped => "ITEM SKIPPED",
        }
    }
}

impl fmt::Display for CheckState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One outcome of one named predicate, for one MBID.
///
/// This is a closed, tagged sum, not an inheritance hierarchy: the three variants are the
/// entire vocabulary of things an audit task can report.
#[derive(Debug, Clone)]
pub enum CheckResult {
    Passed {
        mbid: String,
        description: String,
    },
    Failed {
        mbid: String,
        description: String,
        additional_data: Option<String>,
    },
    Skipped {
        mbid: String,
        description: String,
        additional_data: Option<String>,
    },
}

impl CheckResult {
    pub fn passed(mbid: impl Into<String>, description: impl Into<String>) -> Self {
        CheckResult::Passed {
            mbid: mbid.into(),
            description: description.into(),
        }
    }

    pub fn failed(mbid: impl Into<String>, description: impl Into<String>) -> Self {
        CheckResult::Failed {
            mbid: mbid.into(),
            description: description.into(),
            additional_data: None,
        }
    }

    pub fn failed_with(
        mbid: impl Into<String>,
        description: impl Into<String>,
        additional_data: impl Into<String>,
    ) -> Self {
        CheckResult::Failed {
            mbid: mbid.into(),
            description: description.into(),
            additional_data: Some(additional_data.into()),
        }
    }

    pub fn skipped(mbid: impl Into<String>, description: impl Into<String>) -> Self {
        CheckResult::Skipped {
            mbid: mbid.into(),
            description: description.into(),
            additional_data: None,
        }
    }

    pub fn mbid(&self) -> &str {
        match self {
            CheckResult::Passed { mbid, .. }
            | CheckResult::Failed { mbid, .. }
            | CheckResult::Skipped { mbid, .. } => mbid,
        }
    }

    pub fn description(&self) -> &str {
        match self {
            CheckResult::Passed { description, .. }
            | CheckResult::Failed { description, .. }
            | CheckResult::Skipped { description, .. } => description,
        }
    }

    pub fn state(&self) -> CheckState {
        match self {
            CheckResult::Passed { .. } => CheckState::Passed,
            CheckResult::Failed { .. } => CheckState::Failed,
            CheckResult::Skipped { .. } => CheckState::ItemSkipped,
        }
    }

    pub fn additional_data(&self) -> Option<&str> {
        match self {
            CheckResult::Failed { additional_data, .. }
            | CheckResult::Skipped { additional_data, .. } => additional_data.as_deref(),
            CheckResult::Passed { .. } => None,
        }
    }

    /// The `::`-delimited path segments of the description, first of which is the base category.
    pub fn category(&self) -> Vec<&str> {
        self.description().split("::").collect()
    }

    pub fn base_category(&self) -> &str {
        self.category().first().copied().unwrap_or("")
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.description(), self.state())
    }
}

/// Internal-error skip, always filed as `InternalError::<kind>` regardless of base category:
/// it reports an infrastructure fault, not a finding about one particular item state.
pub fn internal_error_skip(mbid: impl Into<String>, kind: &str) -> CheckResult {
    CheckResult::skipped(mbid, format!("InternalError::{kind}"))
}

pub const INTERNAL_ERROR_PREFIX: &str = "InternalError::";

/// Records one check outcome under `<base>::<category>`, logging the failure message on
/// failure, and reports whether the condition held. When `as_skip` is set, a `false` outcome
/// is recorded as `ItemSkipped` rather than `CheckFailed` (used by precondition checks that
/// should abort later stages without counting as a finding).
pub struct CheckRecorder {
    pub base: BaseCategory,
    pub mbid: String,
    pub results: Vec<CheckResult>,
}

impl CheckRecorder {
    pub fn new(base: BaseCategory, mbid: impl Into<String>) -> Self {
        Self {
            base,
            mbid: mbid.into(),
            results: Vec::new(),
        }
    }

    fn describe(&self, category: &str) -> String {
        format!("{}::{category}", self.base.as_str())
    }

    /// Returns `success` unchanged, after recording it under `category`.
    pub fn check(&mut self, category: &str, success: bool, failure_msg: &str) -> bool {
        self.check_inner(category, success, failure_msg, false)
    }

    /// Like [`Self::check`], but a `false` outcome is an `ItemSkipped`, not a `CheckFailed`.
    pub fn check_or_skip(&mut self, category: &str, success: bool, failure_msg: &str) -> bool {
        self.check_inner(category, success, failure_msg, true)
    }

    fn check_inner(&mut self, category: &str, success: bool, failure_msg: &str, as_skip: bool) -> bool {
        let description = self.describe(category);
        if success {
            self.results.push(CheckResult::passed(self.mbid.clone(), description));
        } else {
            tracing::error!(category, failure_msg, "check failed");
            let result = if as_skip {
                CheckResult::skipped(self.mbid.clone(), description)
            } else {
                CheckResult::failed(self.mbid.clone(), description)
            };
            self.results.push(result);
        }
        success
    }

    pub fn push(&mut self, result: CheckResult) {
        self.results.push(result);
    }

    pub fn into_results(self) -> Vec<CheckResult> {
        self.results
    }
}
