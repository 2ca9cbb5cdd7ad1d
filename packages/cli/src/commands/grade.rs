use std::path::Path;

use chrono::Utc;
use common::{CommitBundle, User};
use tracing::info;

use crate::api::Client;
use crate::assignment::next_step;
use crate::error::{CliError, Result};
use crate::gather;
use crate::session::{confirm_commit_bundle, render_transcript};

/// Save the working directory and submit it for grading. A passing grade
/// advances the problem to its next step.
pub fn run(api: &Client, dir: &Path) -> Result<()> {
    let now = Utc::now();
    let user: User = api.get("/users/me", &[])?;

    let mut gathered = gather::gather(api, now, dir)?;
    gathered.commit.action = "grade".to_string();
    gathered.commit.note = "grading from grind tool".to_string();
    let assignment_id = gathered.commit.assignment_id;

    let unsigned = CommitBundle {
        user_id: user.id,
        commit: gathered.commit.clone(),
        ..CommitBundle::default()
    };
    let signed: CommitBundle = api.post(
        &format!("/assignments/{assignment_id}/commit_bundles/unsigned"),
        &[],
        &unsigned,
    )?;

    info!(
        "submitting {} step {} to {} for grading",
        gathered.problem.unique, gathered.commit.step, signed.hostname
    );
    let graded = confirm_commit_bundle(&signed)?;

    // save the graded commit, report card and all
    let to_save = CommitBundle {
        hostname: graded.hostname.clone(),
        user_id: graded.user_id,
        commit: graded.commit.clone(),
        commit_signature: graded.commit_signature.clone(),
        ..CommitBundle::default()
    };
    let saved: CommitBundle = api.post(
        &format!("/assignments/{assignment_id}/commit_bundles/signed"),
        &[],
        &to_save,
    )?;
    let commit = saved.commit;

    if commit.passed() {
        let unique = gathered.problem.unique.clone();
        let info = gathered.dotfile.problems.get_mut(&unique).ok_or_else(|| {
            CliError::Validation(format!("problem {unique} is missing from the dotfile"))
        })?;
        if next_step(
            api,
            &gathered.problem_dir,
            info,
            &gathered.problem,
            &commit,
        )? {
            gathered.dotfile.save()?;
        }
    } else {
        println!("solution for step {} failed", commit.step);
        if let Some(card) = &commit.report_card {
            println!("report card: {}", card.note);
        }
        render_transcript(&commit.transcript)?;
    }
    Ok(())
}
