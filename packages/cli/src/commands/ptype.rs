use std::fs;
use std::path::Path;

use common::ProblemType;
use tracing::{info, warn};

use crate::api::Client;
use crate::assignment::write_file;
use crate::error::{CliError, Result};

/// With no name, list the known problem types; with a name, download that
/// type's scaffold files (Makefile, test runners, …) into the current
/// directory.
pub fn run(api: &Client, name: Option<&str>) -> Result<()> {
    let Some(name) = name else {
        return list(api);
    };

    let problem_type: ProblemType = api.get(&format!("/problem_types/{name}"), &[])?;
    for (name, contents) in &problem_type.files {
        check_and_update(Path::new("."), name, contents)?;
    }
    Ok(())
}

fn list(api: &Client) -> Result<()> {
    let problem_types: Vec<ProblemType> = api.get("/problem_types", &[])?;
    if problem_types.is_empty() {
        return Err(CliError::Protocol("no problem types found".to_string()));
    }
    println!("Problem types:");
    let width = problem_types
        .iter()
        .map(|pt| pt.name.len())
        .max()
        .unwrap_or(0);
    for problem_type in &problem_types {
        let actions: Vec<&str> = problem_type.actions.keys().map(String::as_str).collect();
        println!(
            "    {:<width$}  actions: {}",
            problem_type.name,
            actions.join(", ")
        );
    }
    Ok(())
}

/// Write the file if missing; replace it with a warning if it drifted from
/// the current version.
fn check_and_update(dir: &Path, name: &str, contents: &str) -> Result<()> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            info!("saving file {name}");
            write_file(&path, contents)
        }
        Err(err) => Err(CliError::fs(&path, err)),
        Ok(on_disk) if on_disk != contents => {
            warn!("file {name} does not match the latest version; replacing it");
            write_file(&path, contents)
        }
        Ok(_) => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_and_update_writes_missing_and_replaces_stale() {
        let dir = tempfile::tempdir().unwrap();
        check_and_update(dir.path(), "Makefile", "all:\n").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("Makefile")).unwrap(),
            "all:\n"
        );

        fs::write(dir.path().join("Makefile"), "edited\n").unwrap();
        check_and_update(dir.path(), "Makefile", "all:\n").unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join("Makefile")).unwrap(),
            "all:\n"
        );
    }
}
