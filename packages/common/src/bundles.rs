use serde::{Deserialize, Serialize};

use crate::commits::Commit;
use crate::events::EventMessage;
use crate::problems::{Problem, ProblemSet, ProblemSetProblem, ProblemStep, ProblemType};

/// Envelope for publishing or updating a problem with its steps and the
/// author's per-step solution commits. The server fills in hostname and
/// signatures when it validates the bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemBundle {
    #[serde(default)]
    pub problem_type: Option<ProblemType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub problem_type_signature: String,
    pub problem: Problem,
    pub problem_steps: Vec<ProblemStep>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub problem_signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(rename = "userID", default)]
    pub user_id: i64,
    pub commits: Vec<Commit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub commit_signatures: Vec<String>,
}

/// Envelope for one commit together with everything the daycare needs to
/// execute it. Server-issued signatures are relayed verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitBundle {
    #[serde(default)]
    pub problem_type: Option<ProblemType>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub problem_type_signature: String,
    #[serde(default)]
    pub problem: Option<Problem>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub problem_steps: Vec<ProblemStep>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub problem_signature: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hostname: String,
    #[serde(rename = "userID", default)]
    pub user_id: i64,
    pub commit: Commit,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub commit_signature: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSetBundle {
    pub problem_set: ProblemSet,
    pub problem_set_problems: Vec<ProblemSetProblem>,
}

/// A single client → daycare frame. Exactly one field is set per frame.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaycareRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_bundle: Option<CommitBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub close_stdin: Option<bool>,
}

/// A single daycare → client frame: an error, the final commit bundle, or
/// one transcript event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaycareResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_bundle: Option<CommitBundle>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daycare_request_frames_are_sparse() {
        let req = DaycareRequest {
            stdin: Some("\u{1b}[A".to_string()),
            ..DaycareRequest::default()
        };
        let json = serde_json::to_string(&req).unwrap();
        assert_eq!(json, "{\"stdin\":\"\\u001b[A\"}");

        let req = DaycareRequest {
            close_stdin: Some(true),
            ..DaycareRequest::default()
        };
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"{"closeStdin":true}"#);
    }

    #[test]
    fn test_daycare_response_parses_each_arm() {
        let resp: DaycareResponse = serde_json::from_str(r#"{"error":"no daycare"}"#).unwrap();
        assert_eq!(resp.error.as_deref(), Some("no daycare"));

        let resp: DaycareResponse = serde_json::from_str(
            r#"{"event":{"time":"2024-01-01T00:00:00Z","event":"exit","exitStatus":0}}"#,
        )
        .unwrap();
        assert!(resp.event.is_some());
    }
}
