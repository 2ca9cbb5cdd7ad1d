use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Verdict from one grading run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ReportCard {
    pub passed: bool,
    pub note: String,
    /// Total grading time in seconds.
    pub duration: f64,
    pub results: Vec<ReportCardResult>,
}

/// A single named result within a report card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportCardResult {
    pub name: String,
    pub outcome: Outcome,
    /// Multi-line details, rendered in a monospace font.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Source location, e.g. `path/to/file.py:12`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

/// Outcome of a single report card result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Passed,
    Failed,
    Error,
    Skipped,
}

impl Outcome {
    pub const ALL: &'static [Outcome] = &[
        Outcome::Passed,
        Outcome::Failed,
        Outcome::Error,
        Outcome::Skipped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Failed => "failed",
            Outcome::Error => "error",
            Outcome::Skipped => "skipped",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when parsing an invalid outcome string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseOutcomeError {
    invalid: String,
}

impl fmt::Display for ParseOutcomeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid outcome '{}'. Valid values: {}",
            self.invalid,
            Outcome::ALL
                .iter()
                .map(|o| o.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        )
    }
}

impl std::error::Error for ParseOutcomeError {}

impl FromStr for Outcome {
    type Err = ParseOutcomeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passed" => Ok(Outcome::Passed),
            "failed" => Ok(Outcome::Failed),
            "error" => Ok(Outcome::Error),
            "skipped" => Ok(Outcome::Skipped),
            _ => Err(ParseOutcomeError {
                invalid: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serde_roundtrip() {
        for outcome in Outcome::ALL {
            let json = serde_json::to_string(outcome).unwrap();
            let parsed: Outcome = serde_json::from_str(&json).unwrap();
            assert_eq!(*outcome, parsed);
        }
    }

    #[test]
    fn test_from_str() {
        assert_eq!("failed".parse::<Outcome>().unwrap(), Outcome::Failed);
        assert!("Passed".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_report_card_wire_shape() {
        let card = ReportCard {
            passed: true,
            note: "all tests passed".into(),
            duration: 1.25,
            results: vec![ReportCardResult {
                name: "test_cat".into(),
                outcome: Outcome::Passed,
                details: None,
                context: None,
            }],
        };
        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["results"][0]["outcome"], "passed");
        assert!(json["results"][0].get("details").is_none());
    }
}
