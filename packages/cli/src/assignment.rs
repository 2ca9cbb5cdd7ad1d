use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use common::{
    Assignment, Commit, Course, Problem, ProblemSet, ProblemSetProblem, ProblemStep, ProblemType,
    Whitelist,
};
use regex::Regex;
use tracing::{debug, warn};

use crate::api::Client;
use crate::dotfile::{DOTFILE_NAME, DotFile, ProblemInfo};
use crate::error::{CliError, Result};

struct Download {
    problem: Problem,
    commit: Option<Commit>,
    step: ProblemStep,
    info: ProblemInfo,
}

/// Lay out an assignment on disk and write its dotfile.
///
/// Returns the directory of the problem with the most recent commit, which
/// is where an instructor inspecting a student wants to land.
pub fn materialize(api: &Client, assignment: &Assignment, root_dir: &Path) -> Result<PathBuf> {
    let course: Course = api.get(&format!("/courses/{}", assignment.course_id), &[])?;
    let problem_set: ProblemSet =
        api.get(&format!("/problem_sets/{}", assignment.problem_set_id), &[])?;
    let set_problems: Vec<ProblemSetProblem> = api.get(
        &format!("/problem_sets/{}/problems", assignment.problem_set_id),
        &[],
    )?;

    // fetch every problem with its latest commit and current step; problem
    // types are shared, so fetch each one once
    let mut types: BTreeMap<String, ProblemType> = BTreeMap::new();
    let mut downloads = Vec::new();
    for entry in &set_problems {
        let problem: Problem = api.get(&format!("/problems/{}", entry.problem_id), &[])?;
        let commit: Option<Commit> = api.get_optional(
            &format!(
                "/assignments/{}/problems/{}/commits/last",
                assignment.id, problem.id
            ),
            &[],
        )?;
        let step_number = commit.as_ref().map(|c| c.step).unwrap_or(1);
        let mut step: ProblemStep = api.get(
            &format!("/problems/{}/steps/{}", problem.id, step_number),
            &[],
        )?;
        step.fix_file_endings();
        if !types.contains_key(&problem.problem_type) {
            let problem_type: ProblemType =
                api.get(&format!("/problem_types/{}", problem.problem_type), &[])?;
            types.insert(problem.problem_type.clone(), problem_type);
        }
        let info = ProblemInfo {
            id: problem.id,
            step: step_number,
            whitelist: Whitelist::new(),
        };
        downloads.push(Download {
            problem,
            commit,
            step,
            info,
        });
    }

    let root = root_dir
        .join(course_directory(&course.label))
        .join(&problem_set.unique);
    if root.exists() {
        return Err(CliError::Validation(format!(
            "directory {} already exists; delete it first if you want to re-download the assignment",
            root.display()
        )));
    }
    println!("unpacking problem set in {}", root.display());
    fs::create_dir_all(&root).map_err(|err| CliError::fs(&root, err))?;

    let mut most_recent: Option<DateTime<Utc>> = None;
    let mut change_to = root.clone();
    let multiple = downloads.len() > 1;
    for download in &mut downloads {
        // one directory per problem, except a single-problem set lives in
        // the root directory itself
        let target = if multiple {
            root.join(&download.problem.unique)
        } else {
            root.clone()
        };
        if multiple {
            if download.step.step > 1 {
                println!(
                    "unpacking problem {} step {}",
                    download.problem.unique, download.step.step
                );
            } else {
                println!("unpacking problem {}", download.problem.unique);
            }
            fs::create_dir_all(&target).map_err(|err| CliError::fs(&target, err))?;
        } else if download.step.step > 1 {
            println!("unpacking step {}", download.step.step);
        }

        for (name, contents) in &download.step.files {
            write_file(&target.join(name), contents)?;
        }
        if !download.step.instructions.is_empty() {
            write_file(&target.join("doc/index.html"), &download.step.instructions)?;
        }

        // commit files overwrite step files
        if let Some(commit) = &download.commit {
            if most_recent.is_none_or(|t| commit.updated_at > t) {
                most_recent = Some(commit.updated_at);
                change_to = target.clone();
            }
            for (name, contents) in &commit.files {
                write_file(&target.join(name), contents)?;
            }
        }

        let problem_type = types.get(&download.problem.problem_type).ok_or_else(|| {
            CliError::Protocol(format!(
                "problem type {} was not downloaded",
                download.problem.problem_type
            ))
        })?;
        for (name, contents) in &problem_type.files {
            let path = target.join(name);
            if path.exists() {
                warn!(
                    "problem type file is overwriting problem file: {}",
                    path.display()
                );
            }
            write_file(&path, contents)?;
        }

        // the whitelist starts as the step's root-level files plus whatever
        // the commit carried
        for name in download.step.files.keys().filter(|n| !n.contains('/')) {
            download.info.whitelist.insert(name.clone(), true);
        }
        if let Some(commit) = download.commit.clone() {
            for name in commit.files.keys() {
                download.info.whitelist.insert(name.clone(), true);
            }
            if commit.passed() {
                next_step(api, &target, &mut download.info, &download.problem, &commit)?;
            }
        }
    }

    let dotfile = DotFile {
        assignment_id: assignment.id,
        problems: downloads
            .into_iter()
            .map(|d| (d.problem.unique, d.info))
            .collect(),
        path: root.join(DOTFILE_NAME),
    };
    dotfile.save()?;

    Ok(change_to)
}

/// Move a problem directory from the step it just passed to the next one.
///
/// Returns false when there is no next step, which is a normal completion,
/// not an error. On success the caller must persist the dotfile.
pub fn next_step(
    api: &Client,
    dir: &Path,
    info: &mut ProblemInfo,
    problem: &Problem,
    commit: &Commit,
) -> Result<bool> {
    println!("step {} passed", commit.step);

    let new_step: Option<ProblemStep> = api.get_optional(
        &format!("/problems/{}/steps/{}", problem.id, commit.step + 1),
        &[],
    )?;
    let Some(mut new_step) = new_step else {
        println!("you have completed all steps for this problem");
        return Ok(false);
    };
    new_step.fix_file_endings();
    let old_step: ProblemStep = api.get(
        &format!("/problems/{}/steps/{}", problem.id, commit.step),
        &[],
    )?;
    println!("moving to step {}", new_step.step);

    // clear the old instructions and all of the old step's subdirectory
    // content; root-level files are the student's and stay put
    remove_if_present(dir, "index.html")?;
    remove_if_present(dir, "doc/index.html")?;
    for name in old_step.files.keys().filter(|n| n.contains('/')) {
        remove_if_present(dir, name)?;
    }

    for (name, contents) in &new_step.files {
        write_file(&dir.join(name), contents)?;
    }
    if !new_step.instructions.is_empty() {
        write_file(&dir.join("doc/index.html"), &new_step.instructions)?;
    }

    for name in new_step.files.keys().filter(|n| !n.contains('/')) {
        info.whitelist.insert(name.clone(), true);
    }
    info.step += 1;
    Ok(true)
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| CliError::fs(parent, err))?;
    }
    fs::write(path, contents).map_err(|err| CliError::fs(path, err))
}

/// Delete a file if it exists, then make a best-effort attempt to remove
/// its now-empty parent directory.
fn remove_if_present(dir: &Path, name: &str) -> Result<()> {
    let path = dir.join(name);
    match fs::remove_file(&path) {
        Ok(()) => debug!("deleted {} from old step", path.display()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(CliError::fs(&path, err)),
    }
    if let Some(parent) = Path::new(name).parent() {
        if !parent.as_os_str().is_empty() {
            // ignored: the directory usually still has other files
            let _ = fs::remove_dir(dir.join(parent));
        }
    }
    Ok(())
}

static COURSE_CODE: OnceLock<Regex> = OnceLock::new();

/// Directory name for a course: the leading course code of its label, or
/// the whole label when no code is recognizable.
pub fn course_directory(label: &str) -> String {
    let re = COURSE_CODE
        .get_or_init(|| Regex::new(r"^([A-Za-z]+[- ]*\d+\w*)\b").expect("static pattern compiles"));
    match re.captures(label).and_then(|caps| caps.get(1)) {
        Some(code) => code.as_str().to_string(),
        None => label.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_course_directory_extracts_course_code() {
        assert_eq!(course_directory("CS-1400"), "CS-1400");
        assert_eq!(course_directory("CS-1400 Intro to Programming"), "CS-1400");
        assert_eq!(course_directory("MATH 2210 Calc III"), "MATH 2210");
        assert_eq!(course_directory("cs2810"), "cs2810");
    }

    #[test]
    fn test_course_directory_falls_back_to_label() {
        assert_eq!(course_directory("Senior Seminar"), "Senior Seminar");
        assert_eq!(course_directory(""), "");
    }

    #[test]
    fn test_write_file_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc").join("index.html");
        write_file(&path, "<html></html>").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "<html></html>");
    }

    #[test]
    fn test_remove_if_present_prunes_empty_directories() {
        let dir = tempfile::tempdir().unwrap();
        write_file(&dir.path().join("tests/test_cat.py"), "pass\n").unwrap();
        remove_if_present(dir.path(), "tests/test_cat.py").unwrap();
        assert!(!dir.path().join("tests").exists());
        // absent files are fine
        remove_if_present(dir.path(), "tests/missing.py").unwrap();
    }
}
