//! Rules engine: maps an activity to a category, client and billable flag.
//!
//! # Evaluation Order
//!
//! 1. Meeting override: an in-meeting segment on a Teams executable is always
//!    `Teams Meeting`, billable, regardless of stored rules.
//! 2. Stored rules, scanned in storage order. The first match wins. A match
//!    with an empty category keeps its client/billable but takes the default
//!    category.
//! 3. Default category inference with no client and unknown billable.
//!
//! Classification is a pure function of its inputs and the rule snapshot.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{Billable, Confidence, ValidationError};

/// Category assigned by the meeting override.
pub const MEETING_CATEGORY: &str = "Teams Meeting";

/// Executables eligible for the meeting override (compared case-insensitively).
pub const TEAMS_EXES: &[&str] = &["ms-teams.exe", "teams.exe"];

/// Which comparator a rule uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    /// Case-insensitive exact match on the executable name.
    Exe,
    /// Case-insensitive substring match on the resolved browser domain.
    Domain,
    /// Case-insensitive substring match on the window title.
    TitleContains,
}

impl MatchType {
    /// String representation for database storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exe => "exe",
            Self::Domain => "domain",
            Self::TitleContains => "title_contains",
        }
    }
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for MatchType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "exe" => Ok(Self::Exe),
            "domain" => Ok(Self::Domain),
            "title_contains" => Ok(Self::TitleContains),
            _ => Err(ValidationError::InvalidMatchType {
                value: s.to_string(),
            }),
        }
    }
}

/// A stored classification rule. Storage order is evaluation priority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub match_type: MatchType,
    pub pattern: String,
    /// Empty or missing means "use the default category".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(default)]
    pub billable: Billable,
}

impl Rule {
    /// Creates a rule after validating that the pattern is not blank.
    pub fn new(
        match_type: MatchType,
        pattern: impl Into<String>,
        category: Option<String>,
        client: Option<String>,
        billable: Billable,
    ) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(ValidationError::Empty { field: "pattern" });
        }
        Ok(Self {
            match_type,
            pattern,
            category,
            client,
            billable,
        })
    }

    /// Whether this rule matches the given activity.
    ///
    /// Blank patterns never match.
    pub fn matches(&self, exe: &str, title: Option<&str>, domain: Option<&str>) -> bool {
        if self.pattern.trim().is_empty() {
            return false;
        }
        match self.match_type {
            MatchType::Exe => exe.eq_ignore_ascii_case(&self.pattern),
            MatchType::Domain => domain.is_some_and(|d| contains_ignore_case(d, &self.pattern)),
            MatchType::TitleContains => {
                title.is_some_and(|t| contains_ignore_case(t, &self.pattern))
            }
        }
    }
}

fn contains_ignore_case(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Which path of the rules engine produced a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchSource {
    MeetingOverride,
    Rule { index: usize, match_type: MatchType },
    Default { bucket: DefaultBucket },
}

/// Which default-category row applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefaultBucket {
    /// A known office/chat application.
    Application,
    /// Unknown application with a resolved browser domain.
    Browser,
    /// Nothing known about the activity.
    Other,
}

/// The result of classifying one activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub category: String,
    pub client: Option<String>,
    pub billable: Billable,
    pub source: MatchSource,
}

/// Classifies an activity against an ordered rule snapshot.
///
/// Never fails: unmatched input resolves through the default categories.
pub fn classify(
    rules: &[Rule],
    exe: &str,
    title: Option<&str>,
    domain: Option<&str>,
    in_meeting: bool,
) -> Classification {
    if in_meeting && is_teams_exe(exe) {
        return Classification {
            category: MEETING_CATEGORY.to_string(),
            client: None,
            billable: Billable::Yes,
            source: MatchSource::MeetingOverride,
        };
    }

    for (index, rule) in rules.iter().enumerate() {
        if !rule.matches(exe, title, domain) {
            continue;
        }
        let category = match rule.category.as_deref().map(str::trim) {
            Some(category) if !category.is_empty() => category.to_string(),
            _ => default_category(exe, domain).0.to_string(),
        };
        return Classification {
            category,
            client: rule.client.clone(),
            billable: rule.billable,
            source: MatchSource::Rule {
                index,
                match_type: rule.match_type,
            },
        };
    }

    let (category, bucket) = default_category(exe, domain);
    Classification {
        category: category.to_string(),
        client: None,
        billable: Billable::Unknown,
        source: MatchSource::Default { bucket },
    }
}

/// Whether `exe` is one of the Teams executables.
pub fn is_teams_exe(exe: &str) -> bool {
    TEAMS_EXES.iter().any(|teams| exe.eq_ignore_ascii_case(teams))
}

/// Default category keyed by the upper-cased executable name.
pub fn default_category(exe: &str, domain: Option<&str>) -> (&'static str, DefaultBucket) {
    let category = match exe.to_ascii_uppercase().as_str() {
        "OUTLOOK.EXE" => Some("Email"),
        "EXCEL.EXE" => Some("Spreadsheet"),
        "WINWORD.EXE" => Some("Document Editing"),
        "POWERPNT.EXE" => Some("Slides"),
        "MS-TEAMS.EXE" | "TEAMS.EXE" => Some("Teams Chat/Browsing"),
        _ => None,
    };
    match (category, domain) {
        (Some(category), _) => (category, DefaultBucket::Application),
        (None, Some(_)) => ("Browser-Research", DefaultBucket::Browser),
        (None, None) => ("Other", DefaultBucket::Other),
    }
}

/// Tunable confidence scores for classifications.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidencePolicy {
    /// Score for any rule- or default-based classification.
    pub base: Confidence,
    /// Score for an exact `exe` rule hit.
    pub exe_rule: Confidence,
    /// Score for the meeting override.
    pub meeting_override: Confidence,
    /// Score for the `Other` default bucket.
    pub unknown_default: Confidence,
    /// Subtracted when a meeting was in progress but the override did not apply.
    pub meeting_conflict_penalty: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            base: Confidence::clamped(0.8),
            exe_rule: Confidence::clamped(0.9),
            meeting_override: Confidence::clamped(0.95),
            unknown_default: Confidence::clamped(0.5),
            meeting_conflict_penalty: 0.1,
        }
    }
}

impl ConfidencePolicy {
    /// Scores a classification. `in_meeting` is whether a meeting window
    /// contained the segment.
    pub fn score(&self, classification: &Classification, in_meeting: bool) -> Confidence {
        let score = match classification.source {
            MatchSource::MeetingOverride => return self.meeting_override,
            MatchSource::Rule {
                match_type: MatchType::Exe,
                ..
            } => self.exe_rule,
            MatchSource::Default {
                bucket: DefaultBucket::Other,
            } => self.unknown_default,
            MatchSource::Rule { .. } | MatchSource::Default { .. } => self.base,
        };
        if in_meeting {
            Confidence::clamped(score.value() - self.meeting_conflict_penalty)
        } else {
            score
        }
    }
}
