use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use common::problems::fix_line_endings;
use common::{Assignment, Commit, FileMap, Problem, ProblemType};
use tracing::debug;

use crate::api::Client;
use crate::dotfile::{DOTFILE_NAME, DotFile, find_dotfile};
use crate::error::{CliError, Result};

/// Everything a commit-producing command needs about the problem the user
/// is standing in.
pub struct Gathered {
    pub problem_type: ProblemType,
    pub problem: Problem,
    pub assignment: Assignment,
    pub commit: Commit,
    pub dotfile: DotFile,
    pub problem_dir: PathBuf,
}

/// Turn the working directory into a normalized commit for its current
/// step.
pub fn gather(api: &Client, now: DateTime<Utc>, start: &Path) -> Result<Gathered> {
    let located = find_dotfile(start)?;
    let dotfile = located.dotfile;

    let assignment: Assignment =
        api.get(&format!("/assignments/{}", dotfile.assignment_id), &[])?;

    // a single-problem set keeps its files in the root directory; otherwise
    // the problem is named by the subdirectory the user is in
    let (unique, problem_dir) = if dotfile.problems.len() == 1 {
        let unique = dotfile
            .problems
            .keys()
            .next()
            .cloned()
            .unwrap_or_default();
        (unique, located.problem_set_dir.clone())
    } else {
        let problem_dir = located.problem_dir.clone().ok_or_else(|| {
            CliError::Validation(
                "you must identify the problem within this problem set; \
                 run this from within the problem directory"
                    .to_string(),
            )
        })?;
        let unique = problem_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        (unique, problem_dir)
    };
    let info = dotfile.problems.get(&unique).ok_or_else(|| {
        CliError::Validation(format!(
            "unable to recognize the problem based on the directory name {unique:?}"
        ))
    })?;

    let problem: Problem = api.get(&format!("/problems/{}", info.id), &[])?;
    let problem_type: ProblemType =
        api.get(&format!("/problem_types/{}", problem.problem_type), &[])?;

    let files = read_whitelisted(&problem_dir, info.whitelist.keys().map(String::as_str))?;

    let mut commit = Commit {
        assignment_id: dotfile.assignment_id,
        problem_id: info.id,
        step: info.step,
        files,
        created_at: now,
        updated_at: now,
        ..Commit::default()
    };
    commit
        .normalize(now, Some(&info.whitelist))
        .map_err(|err| CliError::Validation(err.to_string()))?;

    Ok(Gathered {
        problem_type,
        problem,
        assignment,
        commit,
        dotfile,
        problem_dir,
    })
}

/// Read the whitelisted files out of a problem directory.
///
/// The walk is non-recursive: subdirectory content belongs to the step and
/// is never uploaded. Whitelisted files missing from disk are a fatal
/// error listing every missing name.
fn read_whitelisted<'a>(
    dir: &Path,
    whitelist: impl Iterator<Item = &'a str>,
) -> Result<FileMap> {
    let entries = fs::read_dir(dir).map_err(|err| CliError::fs(dir, err))?;
    let mut on_disk = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|err| CliError::fs(dir, err))?;
        let file_type = entry.file_type().map_err(|err| CliError::fs(entry.path(), err))?;
        if !file_type.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().to_string();
        if name == DOTFILE_NAME {
            continue;
        }
        on_disk.push(name);
    }

    let mut files = FileMap::new();
    let mut missing = Vec::new();
    for name in whitelist {
        if !on_disk.iter().any(|have| have == name) {
            missing.push(name.to_string());
            continue;
        }
        let path = dir.join(name);
        let raw = fs::read(&path).map_err(|err| CliError::fs(&path, err))?;
        let text = String::from_utf8(raw).map_err(|_| {
            CliError::Validation(format!("{name} is not valid UTF-8 and cannot be uploaded"))
        })?;
        files.insert(name.to_string(), fix_line_endings(&text));
    }
    if !missing.is_empty() {
        missing.sort();
        return Err(CliError::Validation(format!(
            "did not find all the expected files; missing: {}",
            missing.join(", ")
        )));
    }
    debug!(count = files.len(), "gathered files from {}", dir.display());
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_whitelisted_includes_only_listed_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print('hello')\n").unwrap();
        fs::write(dir.path().join("scratch.txt"), "notes").unwrap();
        fs::write(dir.path().join(DOTFILE_NAME), "{}").unwrap();

        let files = read_whitelisted(dir.path(), ["main.py"].into_iter()).unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files["main.py"], "print('hello')\n");
    }

    #[test]
    fn test_read_whitelisted_normalizes_line_endings() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "print('hello')  \r\n\n").unwrap();
        let files = read_whitelisted(dir.path(), ["main.py"].into_iter()).unwrap();
        assert_eq!(files["main.py"], "print('hello')\n");
    }

    #[test]
    fn test_read_whitelisted_reports_every_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), "pass\n").unwrap();
        let err =
            read_whitelisted(dir.path(), ["main.py", "helper.py", "util.py"].into_iter())
                .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("helper.py"));
        assert!(message.contains("util.py"));
        assert!(!message.contains("main.py"));
    }

    #[test]
    fn test_read_whitelisted_skips_subdirectories() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("doc")).unwrap();
        fs::write(dir.path().join("doc").join("index.html"), "<html>").unwrap();
        fs::write(dir.path().join("main.py"), "pass\n").unwrap();
        let files = read_whitelisted(dir.path(), ["main.py"].into_iter()).unwrap();
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_read_whitelisted_rejects_binary_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("main.py"), [0xff, 0xfe, 0x00]).unwrap();
        let err = read_whitelisted(dir.path(), ["main.py"].into_iter()).unwrap_err();
        assert!(err.to_string().contains("UTF-8"));
    }
}
