use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use common::Whitelist;
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Per-problem-set marker file at the root of a working directory.
pub const DOTFILE_NAME: &str = ".grind";

/// Local record of one problem's progress: its id, the step the student is
/// on, and the set of filenames that belong to the solution so far.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemInfo {
    pub id: i64,
    pub step: i64,
    pub whitelist: Whitelist,
}

/// Contents of the `.grind` file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DotFile {
    #[serde(rename = "assignmentID")]
    pub assignment_id: i64,
    pub problems: BTreeMap<String, ProblemInfo>,
    #[serde(skip)]
    pub path: PathBuf,
}

/// Result of locating the dotfile from some starting directory.
#[derive(Debug)]
pub struct Located {
    pub dotfile: DotFile,
    /// Directory containing the dotfile.
    pub problem_set_dir: PathBuf,
    /// Immediate child of the problem-set root along the descent path, when
    /// the search started below it.
    pub problem_dir: Option<PathBuf>,
}

/// Walk from `dir` toward the filesystem root looking for the dotfile.
fn walk_up(mut dir: PathBuf) -> Option<(PathBuf, Option<PathBuf>)> {
    let mut child = None;
    loop {
        if dir.join(DOTFILE_NAME).is_file() {
            return Some((dir, child));
        }
        match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                child = Some(dir.clone());
                dir = parent.to_path_buf();
            }
            _ => return None,
        }
    }
}

/// Find and read the nearest dotfile at or above `start`.
///
/// The search runs through two states: first over the path as given, and if
/// that walk hit its top without a match, once more from the resolved
/// absolute path.
pub fn find_dotfile(start: &Path) -> Result<Located> {
    let relative = walk_up(start.to_path_buf());
    let found = match relative {
        Some(found) => Some(found),
        None => std::path::absolute(start).ok().and_then(walk_up),
    };
    let (problem_set_dir, problem_dir) = found.ok_or_else(|| {
        CliError::Validation(format!(
            "unable to find {DOTFILE_NAME} in {} or an ancestor directory; \
             you must run this in a problem directory",
            start.display()
        ))
    })?;

    let path = problem_set_dir.join(DOTFILE_NAME);
    let raw = fs::read_to_string(&path).map_err(|err| CliError::fs(&path, err))?;
    let mut dotfile: DotFile = serde_json::from_str(&raw)
        .map_err(|err| CliError::Validation(format!("error parsing {}: {err}", path.display())))?;
    dotfile.path = path;

    Ok(Located {
        dotfile,
        problem_set_dir,
        problem_dir,
    })
}

impl DotFile {
    /// Write the dotfile back to the location it was read from.
    pub fn save(&self) -> Result<()> {
        let mut raw = serde_json::to_string_pretty(self).map_err(|err| {
            CliError::Validation(format!("error encoding {}: {err}", self.path.display()))
        })?;
        raw.push('\n');
        fs::write(&self.path, raw).map_err(|err| CliError::fs(&self.path, err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(path: PathBuf) -> DotFile {
        DotFile {
            assignment_id: 7,
            problems: BTreeMap::from([(
                "cs1400-loops".to_string(),
                ProblemInfo {
                    id: 42,
                    step: 1,
                    whitelist: Whitelist::from([("main.py".to_string(), true)]),
                },
            )]),
            path,
        }
    }

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let dotfile = sample(dir.path().join(DOTFILE_NAME));
        dotfile.save().unwrap();

        let located = find_dotfile(dir.path()).unwrap();
        assert_eq!(located.dotfile.assignment_id, 7);
        let info = &located.dotfile.problems["cs1400-loops"];
        assert_eq!(info.id, 42);
        assert_eq!(info.step, 1);
        assert!(info.whitelist["main.py"]);
        assert!(located.problem_dir.is_none());
    }

    #[test]
    fn test_wire_shape() {
        let dotfile = sample(PathBuf::new());
        let json = serde_json::to_value(&dotfile).unwrap();
        assert_eq!(json["assignmentID"], 7);
        assert_eq!(json["problems"]["cs1400-loops"]["whitelist"]["main.py"], true);
        assert!(json.get("path").is_none());
    }

    #[test]
    fn test_find_from_subdirectory_reports_problem_dir() {
        let dir = tempfile::tempdir().unwrap();
        sample(dir.path().join(DOTFILE_NAME)).save().unwrap();
        let problem = dir.path().join("cs1400-loops");
        let nested = problem.join("doc");
        fs::create_dir_all(&nested).unwrap();

        let located = find_dotfile(&nested).unwrap();
        assert_eq!(located.problem_set_dir, dir.path());
        assert_eq!(located.problem_dir.as_deref(), Some(problem.as_path()));
    }

    #[test]
    fn test_find_fails_cleanly_without_dotfile() {
        let dir = tempfile::tempdir().unwrap();
        let err = find_dotfile(dir.path()).unwrap_err();
        assert!(err.to_string().contains(DOTFILE_NAME));
    }
}
