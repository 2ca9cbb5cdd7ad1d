use std::path::PathBuf;

use common::{Assignment, User};

use crate::api::Client;
use crate::assignment::materialize;
use crate::error::{CliError, Result};

/// Download an assignment into a fresh working directory.
///
/// The assignment is named either by its numeric id or as
/// `COURSE/problem-set-id`, both as shown by `grind list`.
pub fn run(api: &Client, name: &str, root_dir: Option<PathBuf>) -> Result<()> {
    let root_dir = match root_dir {
        Some(dir) => dir,
        None => dirs::home_dir()
            .ok_or_else(|| CliError::Config("unable to locate home directory".to_string()))?,
    };

    let user: User = api.get("/users/me", &[])?;
    let assignment = resolve(api, &user, name)?;
    if assignment.user_id != user.id {
        return Err(CliError::Validation(format!(
            "you do not have an assignment with number {}",
            assignment.id
        )));
    }
    materialize(api, &assignment, &root_dir)?;
    Ok(())
}

pub fn resolve(api: &Client, user: &User, name: &str) -> Result<Assignment> {
    if let Ok(id) = name.parse::<i64>() {
        if id > 0 {
            return api.get(&format!("/assignments/{id}"), &[]);
        }
    }

    let Some((label, unique)) = name.split_once('/') else {
        return Err(CliError::Validation(format!(
            "unknown assignment identifier {name:?}; give the assignment number or a \
             COURSE/problem-set-id name, both shown by 'grind list'"
        )));
    };
    let assignments: Vec<Assignment> = api.get(
        &format!("/users/{}/assignments", user.id),
        &[
            ("course_lti_label", label.to_string()),
            ("problem_unique", unique.to_string()),
        ],
    )?;
    match assignments.len() {
        0 => Err(CliError::Validation(format!(
            "no matching assignment found for {name:?}; use 'grind list' to see \
             available assignments"
        ))),
        1 => Ok(assignments.into_iter().next().ok_or_else(|| {
            CliError::Protocol("assignment list changed underneath us".to_string())
        })?),
        _ => Err(CliError::Validation(
            "found more than one matching assignment; try the assignment number instead"
                .to_string(),
        )),
    }
}
