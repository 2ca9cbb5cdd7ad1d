use std::path::Path;

use chrono::Utc;
use common::{CommitBundle, User};
use tracing::info;

use crate::api::Client;
use crate::error::{CliError, Result};
use crate::gather;
use crate::session::run_interactive_session;

/// Upload the working directory and run a problem-type action in an
/// interactive daycare session.
pub fn run(api: &Client, action: Option<&str>, dir: &Path) -> Result<()> {
    let now = Utc::now();

    if action == Some("grade") {
        return Err(CliError::Validation(
            "'grind action' is for testing code, not for grading; \
             to submit your code for grading, use 'grind grade'"
                .to_string(),
        ));
    }

    let user: User = api.get("/users/me", &[])?;
    let mut gathered = gather::gather(api, now, dir)?;

    // with no action, or an unknown one, list the choices and stop
    let available = || {
        let mut names: Vec<&str> = gathered
            .problem_type
            .actions
            .keys()
            .map(String::as_str)
            .filter(|name| *name != "grade")
            .collect();
        names.sort_unstable();
        names
    };
    let action = match action {
        Some(action) if gathered.problem_type.actions.contains_key(action) => action,
        _ => {
            println!(
                "available actions for problem type {}:",
                gathered.problem_type.name
            );
            for name in available() {
                println!("   {name}");
            }
            return Err(CliError::Validation(
                "use 'grind action <name>' to initiate an action".to_string(),
            ));
        }
    };

    gathered.commit.action = action.to_string();
    gathered.commit.note = format!("grind action {action}");
    let unsigned = CommitBundle {
        user_id: user.id,
        commit: gathered.commit.clone(),
        ..CommitBundle::default()
    };
    let signed: CommitBundle = api.post("/commit_bundles/unsigned", &[], &unsigned)?;

    println!(
        "starting interactive session for {} step {}",
        gathered.problem.unique, gathered.commit.step
    );
    if run_interactive_session(&signed, &gathered.problem_dir)?.is_some() {
        info!("session finished with a commit bundle");
    }
    Ok(())
}
