use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use common::Assignment;
use tracing::info;

use crate::api::Client;
use crate::assignment::materialize;
use crate::error::{CliError, Result};

/// Download a student's assignment into a temporary directory and open a
/// subshell in the problem they most recently worked on. The tree is
/// removed when the shell exits.
pub fn run(api: &Client, assignment_id: i64) -> Result<()> {
    let assignment: Assignment = api.get(&format!("/assignments/{assignment_id}"), &[])?;

    let root: PathBuf = std::env::temp_dir().join(format!("grind-tmp.{}", std::process::id()));
    fs::create_dir(&root).map_err(|err| CliError::fs(&root, err))?;

    let result = inspect(api, &assignment, &root);

    info!("deleting {}", root.display());
    let _ = fs::remove_dir_all(&root);
    result
}

fn inspect(api: &Client, assignment: &Assignment, root: &Path) -> Result<()> {
    let change_to = materialize(api, assignment, root)?;

    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/bash".to_string());
    println!("exit shell when finished");
    let status = Command::new(&shell)
        .current_dir(&change_to)
        .status()
        .map_err(|err| CliError::Validation(format!("error launching shell {shell}: {err}")))?;
    if !status.success() {
        info!("shell exited with {status}");
    }
    Ok(())
}
