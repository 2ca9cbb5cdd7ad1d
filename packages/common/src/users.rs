use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default)]
    pub author: bool,
    #[serde(default)]
    pub admin: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A course as defined by the learning management system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: i64,
    pub name: String,
    pub label: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One user's enrollment in a problem set within a course. Commits hang off
/// assignments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: i64,
    #[serde(rename = "courseID")]
    pub course_id: i64,
    #[serde(rename = "problemSetID")]
    pub problem_set_id: i64,
    #[serde(rename = "userID")]
    pub user_id: i64,
    /// Comma-separated LMS role list.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub roles: String,
    #[serde(default)]
    pub instructor: bool,
    /// Per-problem score history, keyed by problem unique ID.
    #[serde(rename = "raw_scores", default)]
    pub raw_scores: BTreeMap<String, Vec<f64>>,
    #[serde(default)]
    pub score: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub canvas_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Assignment {
    /// True when the LMS roles mark this user as an instructor for the
    /// course.
    pub fn is_instructor_role(&self) -> bool {
        self.roles.split(',').any(|role| role == "Instructor")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructor_role() {
        let mut asst = Assignment {
            roles: "Learner".to_string(),
            ..Assignment::default()
        };
        assert!(!asst.is_instructor_role());
        asst.roles = "Learner,Instructor".to_string();
        assert!(asst.is_instructor_role());
    }

    #[test]
    fn test_assignment_wire_names() {
        let asst = Assignment {
            id: 7,
            course_id: 2,
            problem_set_id: 3,
            user_id: 4,
            canvas_title: "Loops".to_string(),
            ..Assignment::default()
        };
        let json = serde_json::to_value(&asst).unwrap();
        assert_eq!(json["courseID"], 2);
        assert_eq!(json["problemSetID"], 3);
        assert_eq!(json["userID"], 4);
        assert_eq!(json["canvasTitle"], "Loops");
    }
}
