//! Core type definitions with validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// Invalid billable value.
    #[error("invalid billable value: {value}")]
    InvalidBillable { value: String },

    /// Invalid rule match type.
    #[error("invalid match type: {value} (expected exe, domain or title_contains)")]
    InvalidMatchType { value: String },
}

/// Whether time is billable.
///
/// `Unknown` means no rule decided it. Stored as a nullable integer
/// (`1`, `0`, `NULL`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Billable {
    Yes,
    No,
    #[default]
    Unknown,
}

impl Billable {
    /// String representation for display and CLI arguments.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Unknown => "unknown",
        }
    }

    /// Converts from the nullable integer column representation.
    #[must_use]
    pub const fn from_flag(flag: Option<i64>) -> Self {
        match flag {
            Some(0) => Self::No,
            Some(_) => Self::Yes,
            None => Self::Unknown,
        }
    }

    /// Converts to the nullable integer column representation.
    #[must_use]
    pub const fn to_flag(self) -> Option<i64> {
        match self {
            Self::Yes => Some(1),
            Self::No => Some(0),
            Self::Unknown => None,
        }
    }
}

impl fmt::Display for Billable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Billable {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "yes" | "true" | "1" => Ok(Self::Yes),
            "no" | "false" | "0" => Ok(Self::No),
            "unknown" | "" => Ok(Self::Unknown),
            _ => Err(ValidationError::InvalidBillable {
                value: s.to_string(),
            }),
        }
    }
}

/// A classification confidence in \[0.0, 1.0\].
///
/// Every value is clamped on the way in, including policy values read from
/// config.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Confidence(f64);

impl Confidence {
    /// Creates a confidence value, clamping to \[0.0, 1.0\].
    ///
    /// NaN values become 0.0. Values outside the range are clamped.
    #[must_use]
    pub const fn clamped(value: f64) -> Self {
        if value.is_nan() || value < 0.0 {
            Self(0.0)
        } else if value > 1.0 {
            Self(1.0)
        } else {
            Self(value)
        }
    }

    /// Returns the inner f64 value.
    #[must_use]
    pub const fn value(self) -> f64 {
        self.0
    }

    /// Returns the lower of two confidence values.
    #[must_use]
    pub const fn min(self, other: Self) -> Self {
        if other.0 < self.0 { other } else { self }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Serialize for Confidence {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Confidence {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = f64::deserialize(deserializer)?;
        // Clamp on deserialization to be lenient with hand-edited config
        Ok(Self::clamped(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[expect(
        clippy::float_cmp,
        reason = "exact equality intended for boundary tests"
    )]
    fn confidence_clamped_handles_edge_cases() {
        assert_eq!(Confidence::clamped(-1.0).value(), 0.0);
        assert_eq!(Confidence::clamped(2.0).value(), 1.0);
        assert_eq!(Confidence::clamped(f64::NAN).value(), 0.0);
        assert_eq!(Confidence::clamped(0.5).value(), 0.5);
    }

    #[test]
    #[expect(
        clippy::float_cmp,
        reason = "exact equality intended for boundary tests"
    )]
    fn confidence_serde_clamps_out_of_range() {
        let parsed: Confidence = serde_json::from_str("1.5").unwrap();
        assert_eq!(parsed.value(), 1.0);

        let parsed: Confidence = serde_json::from_str("-0.5").unwrap();
        assert_eq!(parsed.value(), 0.0);
    }

    // ========== Billable Tests ==========

    #[test]
    fn billable_flag_conversion() {
        assert_eq!(Billable::from_flag(Some(1)), Billable::Yes);
        assert_eq!(Billable::from_flag(Some(0)), Billable::No);
        assert_eq!(Billable::from_flag(None), Billable::Unknown);
        assert_eq!(Billable::Yes.to_flag(), Some(1));
        assert_eq!(Billable::No.to_flag(), Some(0));
        assert_eq!(Billable::Unknown.to_flag(), None);
    }

    #[test]
    fn billable_from_str() {
        assert_eq!("yes".parse::<Billable>().unwrap(), Billable::Yes);
        assert_eq!("No".parse::<Billable>().unwrap(), Billable::No);
        assert_eq!("unknown".parse::<Billable>().unwrap(), Billable::Unknown);
        assert!("maybe".parse::<Billable>().is_err());
    }

    #[test]
    fn billable_serializes_lowercase() {
        let json = serde_json::to_string(&Billable::Unknown).unwrap();
        assert_eq!(json, "\"unknown\"");
    }
}
