use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{
    Commit, CommitBundle, FileMap, Problem, ProblemBundle, ProblemSet, ProblemSetBundle,
    ProblemSetProblem, ProblemStep, ProblemType, User, Whitelist,
};
use tracing::{info, warn};

use crate::api::Client;
use crate::cfg::{StepConfig, parse_problem_config, parse_problem_set_config};
use crate::error::{CliError, Result};
use crate::session::{confirm_commit_bundle, render_transcript, run_interactive_session};

/// Name of the problem definition file an author keeps at the problem root.
pub const PROBLEM_CONFIG_NAME: &str = "problem.cfg";

/// Editor droppings and build products that never belong in a problem.
const SKIP_SUFFIXES: &[&str] = &["~", ".swp", ".o", ".pyc", ".out", ".DS_Store"];
const SKIP_DIRS: &[&str] = &["__pycache__"];

/// Publish a problem (run from inside a problem directory) or, given a
/// `.cfg` file, a problem set.
pub fn run(
    api: &Client,
    problem_set: Option<PathBuf>,
    update: bool,
    action: Option<&str>,
) -> Result<()> {
    if let Some(path) = problem_set {
        if action.is_some() {
            return Err(CliError::Validation(
                "you cannot specify an action when creating a problem set".to_string(),
            ));
        }
        return create_problem_set(api, &path, update);
    }
    if update && action.is_some() {
        return Err(CliError::Validation(
            "you specified --update, which is not valid when running an action".to_string(),
        ));
    }
    create_problem(api, Utc::now(), update, action)
}

fn create_problem(
    api: &Client,
    now: DateTime<Utc>,
    update: bool,
    action: Option<&str>,
) -> Result<()> {
    let (directory, descent_child) = find_problem_cfg(Path::new("."))?;
    let config_path = directory.join(PROBLEM_CONFIG_NAME);
    info!("reading {}", config_path.display());
    let text = fs::read_to_string(&config_path).map_err(|err| CliError::fs(&config_path, err))?;
    let cfg = parse_problem_config(&text).map_err(|err| {
        CliError::Validation(format!("failed to parse {}: {err}", config_path.display()))
    })?;

    let mut problem = Problem {
        unique: cfg.unique,
        note: cfg.note,
        problem_type: cfg.problem_type,
        tags: cfg.tags,
        options: cfg.options,
        created_at: now,
        updated_at: now,
        ..Problem::default()
    };

    check_directory_name(&directory, &problem.unique)?;

    let problem_type: ProblemType =
        api.get(&format!("/problem_types/{}", problem.problem_type), &[])?;
    if let Some(action) = action {
        if !problem_type.actions.contains_key(action) {
            return Err(CliError::Validation(format!(
                "action {action:?} does not exist for problem type {}",
                problem_type.name
            )));
        }
    }

    let existing: Vec<Problem> =
        api.get("/problems", &[("unique", problem.unique.clone())])?;
    match existing.as_slice() {
        [] => {
            if update {
                return Err(CliError::Validation(format!(
                    "you specified --update, but no existing problem with unique ID {:?} was found",
                    problem.unique
                )));
            }
            // the matching problem set unique must be free as well
            let sets: Vec<ProblemSet> =
                api.get("/problem_sets", &[("unique", problem.unique.clone())])?;
            if sets.len() > 1 {
                return Err(CliError::Protocol(format!(
                    "server found multiple problem sets with matching unique ID {:?}",
                    problem.unique
                )));
            }
            if let Some(set) = sets.first() {
                return Err(CliError::Validation(format!(
                    "problem set {} already exists with unique ID {:?}; this would prevent \
                     creating a problem set containing just this problem with matching id",
                    set.id, set.unique
                )));
            }
            println!("unique ID is {:?}", problem.unique);
            println!("  this problem is new--no existing problem has the same unique ID");
        }
        [previous] => {
            if action.is_none() && !update {
                return Err(CliError::Validation(format!(
                    "you did not specify --update, but a problem already exists with unique ID {:?}",
                    problem.unique
                )));
            }
            println!("unique ID is {:?}", problem.unique);
            println!("  this is an update of problem {}", previous.id);
            println!("  ({:?})", previous.note);
            problem.id = previous.id;
            problem.created_at = previous.created_at;
        }
        _ => {
            return Err(CliError::Protocol(format!(
                "server found multiple problems with matching unique ID {:?}",
                problem.unique
            )));
        }
    }

    let (mut problem_steps, mut commits) =
        gather_steps(&directory, &cfg.steps, &problem_type, action, now)?;

    // enforce the upload invariants locally before the server sees anything
    problem
        .normalize(now, &mut problem_steps)
        .map_err(|err| CliError::Validation(err.to_string()))?;
    for (step, commit) in problem_steps.iter().zip(commits.iter_mut()) {
        commit
            .normalize(now, Some(&step.whitelist))
            .map_err(|err| CliError::Validation(format!("step {}: {err}", step.step)))?;
    }

    let user: User = api.get("/users/me", &[])?;
    let unsigned = ProblemBundle {
        problem,
        problem_steps,
        commits,
        user_id: user.id,
        ..ProblemBundle::default()
    };

    let mut signed: ProblemBundle = api.post("/problem_bundles/unconfirmed", &[], &unsigned)?;
    if signed.hostname.is_empty() {
        return Err(CliError::Protocol(
            "server was unable to find a suitable daycare, unable to validate".to_string(),
        ));
    }

    // an action runs one interactive session on the chosen step and stops
    if let Some(action) = action {
        let (step_dir, step_n) = step_directory(&directory, descent_child.as_deref())
            .ok_or_else(|| {
                CliError::Validation(
                    "to use --action, you must run from within a step directory".to_string(),
                )
            })?;
        if step_n < 1 || step_n as usize > signed.problem_steps.len() {
            return Err(CliError::Validation(format!(
                "must run an action from within a valid step directory, not {step_n}"
            )));
        }
        println!("running interactive session for action {action:?} on step {step_n}");
        let unvalidated = commit_bundle_for(&signed, step_n as usize - 1)?;
        run_interactive_session(&unvalidated, &step_dir)?;
        return Ok(());
    }

    // validate every step's reference solution through the daycare
    for n in 0..signed.problem_steps.len() {
        println!("validating solution for step {}", n + 1);
        let unvalidated: CommitBundle =
            api.post("/commit_bundles/unsigned", &[], &commit_bundle_for(&signed, n)?)?;
        let validated = confirm_commit_bundle(&unvalidated)?;
        println!("  finished validating solution");
        if !validated.commit.passed() {
            let note = validated
                .commit
                .report_card
                .as_ref()
                .map(|card| card.note.clone())
                .unwrap_or_default();
            println!("  solution for step {} failed: {note}", n + 1);
            render_transcript(&validated.commit.transcript)?;
            return Err(CliError::Validation(
                "please fix solution and try again".to_string(),
            ));
        }
        signed.problem_type = validated.problem_type;
        signed.problem_type_signature = validated.problem_type_signature;
        if let Some(problem) = validated.problem {
            signed.problem = problem;
        }
        signed.problem_steps = validated.problem_steps;
        signed.problem_signature = validated.problem_signature;
        signed.commits[n] = validated.commit;
        if signed.commit_signatures.len() <= n {
            signed.commit_signatures.resize(n + 1, String::new());
        }
        signed.commit_signatures[n] = validated.commit_signature;
    }
    println!("problem and solution confirmed successfully");

    let is_new = signed.problem.id == 0;
    let confirmed: ProblemBundle = if is_new {
        api.post("/problem_bundles/confirmed", &[], &signed)?
    } else {
        api.put(&format!("/problem_bundles/{}", signed.problem.id), &[], &signed)?
    };
    println!(
        "problem {:?} saved and ready to use",
        confirmed.problem.unique
    );

    if is_new {
        // give the server a moment before referencing the new problem
        thread::sleep(Duration::from_secs(1));

        let set_bundle = ProblemSetBundle {
            problem_set: ProblemSet {
                unique: confirmed.problem.unique.clone(),
                note: format!("Problem set for: {}", confirmed.problem.note),
                tags: confirmed.problem.tags.clone(),
                created_at: now,
                updated_at: now,
                ..ProblemSet::default()
            },
            problem_set_problems: vec![ProblemSetProblem {
                problem_set_id: 0,
                problem_id: confirmed.problem.id,
                weight: 1.0,
            }],
        };
        let final_set: ProblemSetBundle = api.post("/problem_set_bundles", &[], &set_bundle)?;
        println!(
            "problem set {:?} created and ready to use",
            final_set.problem_set.unique
        );
    }
    Ok(())
}

/// The directory an author publishes from must be named after the problem.
fn check_directory_name(directory: &Path, unique: &str) -> Result<()> {
    let basename = directory
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    if basename != unique {
        return Err(CliError::Validation(format!(
            "the problem directory name ({basename}) must match the problem unique ID ({unique})"
        )));
    }
    Ok(())
}

/// Walk upward from `start` to the nearest directory holding `problem.cfg`.
/// Also reports the immediate child along the descent, which names the step
/// directory when the author ran from inside one.
fn find_problem_cfg(start: &Path) -> Result<(PathBuf, Option<PathBuf>)> {
    let mut dir = std::path::absolute(start).map_err(|err| CliError::fs(start, err))?;
    let mut child: Option<PathBuf> = None;
    loop {
        if dir.join(PROBLEM_CONFIG_NAME).is_file() {
            return Ok((dir, child));
        }
        match dir.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                child = Some(dir.clone());
                dir = parent.to_path_buf();
            }
            _ => {
                return Err(CliError::Validation(format!(
                    "unable to find {PROBLEM_CONFIG_NAME} in the current directory or an \
                     ancestor; you must run this in a problem directory"
                )));
            }
        }
    }
}

/// The numbered step directory the author is standing in, if any.
fn step_directory(directory: &Path, descent_child: Option<&Path>) -> Option<(PathBuf, i64)> {
    let child = descent_child?;
    if child.parent() != Some(directory) {
        return None;
    }
    let n: i64 = child.file_name()?.to_string_lossy().parse().ok()?;
    Some((child.to_path_buf(), n))
}

fn commit_bundle_for(bundle: &ProblemBundle, n: usize) -> Result<CommitBundle> {
    let commit = bundle.commits.get(n).cloned().ok_or_else(|| {
        CliError::Protocol(format!("bundle is missing the commit for step {}", n + 1))
    })?;
    Ok(CommitBundle {
        problem_type: bundle.problem_type.clone(),
        problem_type_signature: bundle.problem_type_signature.clone(),
        problem: Some(bundle.problem.clone()),
        problem_steps: bundle.problem_steps.clone(),
        problem_signature: bundle.problem_signature.clone(),
        hostname: bundle.hostname.clone(),
        user_id: bundle.user_id,
        commit,
        commit_signature: bundle.commit_signatures.get(n).cloned().unwrap_or_default(),
    })
}

/// Build the steps and their reference-solution commits from the numbered
/// step directories.
fn gather_steps(
    directory: &Path,
    cfg_steps: &[StepConfig],
    problem_type: &ProblemType,
    action: Option<&str>,
    now: DateTime<Utc>,
) -> Result<(Vec<ProblemStep>, Vec<Commit>)> {
    let mut whitelist = Whitelist::new();
    let mut steps = Vec::new();
    let mut commits = Vec::new();

    for (index, step_cfg) in cfg_steps.iter().enumerate() {
        let n = index as i64 + 1;
        info!("gathering step {n}");
        let step_dir = directory.join(n.to_string());

        let mut step = ProblemStep {
            step: n,
            note: step_cfg.note.clone(),
            weight: step_cfg.weight,
            ..ProblemStep::default()
        };
        let mut commit = Commit {
            step: n,
            action: action.unwrap_or("grade").to_string(),
            note: match action {
                Some(action) => format!("author solution tested with action {action} via grind"),
                None => "author solution submitted via grind".to_string(),
            },
            created_at: now,
            updated_at: now,
            ..Commit::default()
        };

        let mut starter = FileMap::new();
        let mut solution = FileMap::new();
        let mut root = FileMap::new();
        for (relpath, contents) in walk_step_files(&step_dir, problem_type)? {
            match relpath.split_once('/') {
                Some(("_solution", rest)) => {
                    solution.insert(rest.to_string(), contents);
                }
                Some(("_starter", rest)) => {
                    starter.insert(rest.to_string(), contents);
                }
                None => {
                    root.insert(relpath, contents);
                }
                Some(_) => {
                    // deeper paths are support files that ship with the step
                    step.files.insert(relpath, contents);
                }
            }
        }

        // sort out which files are the starter set and which the solution
        if !solution.is_empty() && !starter.is_empty() && !root.is_empty() {
            return Err(CliError::Validation(format!(
                "step {n} has files in _solution, _starter, and the step root; \
                 unsure how to proceed"
            )));
        }
        if solution.is_empty() {
            if root.is_empty() {
                return Err(CliError::Validation(format!(
                    "no solution files found for step {n}; place them in _solution/ \
                     or the step root"
                )));
            }
            solution = std::mem::take(&mut root);
        }
        if starter.is_empty() && !root.is_empty() {
            starter = std::mem::take(&mut root);
        }

        for (name, contents) in starter {
            whitelist.insert(name.clone(), true);
            step.files.insert(name, contents);
        }
        step.whitelist = whitelist.clone();

        for (name, contents) in solution {
            if whitelist.get(&name).copied().unwrap_or(false) {
                commit.files.insert(name, contents);
            } else {
                warn!(
                    "skipping solution file {name:?} because it is not in the starter \
                     file set of this or any previous step"
                );
            }
        }

        info!(
            "  found {} problem definition files and {} solution files",
            step.files.len(),
            commit.files.len()
        );
        steps.push(step);
        commits.push(commit);
    }

    Ok((steps, commits))
}

/// Recursively collect the files of one step directory as
/// (slash-separated relative path, contents) pairs, skipping scratch
/// directories, blacklisted suffixes, and problem-type scaffold files.
fn walk_step_files(step_dir: &Path, problem_type: &ProblemType) -> Result<Vec<(String, String)>> {
    fn walk(base: &Path, dir: &Path, out: &mut Vec<(String, PathBuf)>) -> Result<()> {
        let entries = fs::read_dir(dir).map_err(|err| CliError::fs(dir, err))?;
        for entry in entries {
            let entry = entry.map_err(|err| CliError::fs(dir, err))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .map_err(|err| CliError::fs(&path, err))?;
            let name = entry.file_name().to_string_lossy().to_string();
            if file_type.is_dir() {
                if SKIP_DIRS.contains(&name.as_str()) {
                    info!("  skipping directory {name}");
                    continue;
                }
                walk(base, &path, out)?;
            } else if file_type.is_file() {
                let rel = path
                    .strip_prefix(base)
                    .unwrap_or(&path)
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                out.push((rel, path));
            }
        }
        Ok(())
    }

    let mut found = Vec::new();
    walk(step_dir, step_dir, &mut found)?;

    let mut files = Vec::new();
    for (rel, path) in found {
        if problem_type.files.contains_key(&rel) {
            info!("  skipping file {rel} because it is provided by the problem type");
            continue;
        }
        if SKIP_SUFFIXES.iter().any(|suffix| rel.ends_with(suffix)) {
            info!("  skipping file {rel}");
            continue;
        }
        let raw = fs::read(&path).map_err(|err| CliError::fs(&path, err))?;
        let contents = String::from_utf8(raw).map_err(|_| {
            CliError::Validation(format!("{rel} is not valid UTF-8 and cannot be uploaded"))
        })?;
        files.push((rel, contents));
    }
    Ok(files)
}

fn create_problem_set(api: &Client, path: &Path, update: bool) -> Result<()> {
    let now = Utc::now();
    info!("creating problem set using {}", path.display());
    let text = fs::read_to_string(path).map_err(|err| CliError::fs(path, err))?;
    let cfg = parse_problem_set_config(&text).map_err(|err| {
        CliError::Validation(format!("failed to parse {}: {err}", path.display()))
    })?;

    let mut problem_set = ProblemSet {
        unique: cfg.unique,
        note: cfg.note,
        tags: cfg.tags,
        created_at: now,
        updated_at: now,
        ..ProblemSet::default()
    };

    let expected = format!("{}.cfg", problem_set.unique);
    if path.file_name().map(|n| n.to_string_lossy().to_string()) != Some(expected) {
        return Err(CliError::Validation(
            "the problem set file name must match the problem set unique ID".to_string(),
        ));
    }

    let existing: Vec<ProblemSet> =
        api.get("/problem_sets", &[("unique", problem_set.unique.clone())])?;
    match existing.as_slice() {
        [] => {
            if update {
                return Err(CliError::Validation(format!(
                    "you specified --update, but no existing problem set with unique ID {:?} \
                     was found",
                    problem_set.unique
                )));
            }
            println!("unique ID is {:?}", problem_set.unique);
            println!("  this problem set is new--no existing problem set has the same unique ID");
        }
        [previous] => {
            if !update {
                return Err(CliError::Validation(format!(
                    "you did not specify --update, but a problem set already exists with \
                     unique ID {:?}",
                    problem_set.unique
                )));
            }
            println!("unique ID is {:?}", problem_set.unique);
            println!("  this is an update of problem set {}", previous.id);
            println!("  ({:?})", previous.note);
            problem_set.id = previous.id;
            problem_set.created_at = previous.created_at;
        }
        _ => {
            return Err(CliError::Protocol(format!(
                "server found multiple problem sets with matching unique ID {:?}",
                problem_set.unique
            )));
        }
    }

    let mut bundle = ProblemSetBundle {
        problem_set,
        problem_set_problems: Vec::new(),
    };
    for (unique, weight) in &cfg.problems {
        let problems: Vec<Problem> = api.get("/problems", &[("unique", unique.clone())])?;
        let problem = match problems.as_slice() {
            [problem] => problem,
            [] => {
                return Err(CliError::Validation(format!(
                    "problem with unique ID {unique:?} not found"
                )));
            }
            _ => {
                return Err(CliError::Protocol(format!(
                    "server found multiple problems with matching unique ID {unique:?}"
                )));
            }
        };
        bundle.problem_set_problems.push(ProblemSetProblem {
            problem_set_id: 0,
            problem_id: problem.id,
            weight: if *weight <= 0.0 { 1.0 } else { *weight },
        });
    }

    let final_bundle: ProblemSetBundle = if bundle.problem_set.id == 0 {
        api.post("/problem_set_bundles", &[], &bundle)?
    } else {
        api.put(
            &format!("/problem_set_bundles/{}", bundle.problem_set.id),
            &[],
            &bundle,
        )?
    };
    println!(
        "problem set {:?} saved and ready to use",
        final_bundle.problem_set.unique
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, contents: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_find_problem_cfg_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join(PROBLEM_CONFIG_NAME), "[problem]\n");
        let step = dir.path().join("2");
        fs::create_dir(&step).unwrap();

        let (found, child) = find_problem_cfg(&step).unwrap();
        assert_eq!(found, dir.path());
        assert_eq!(child.as_deref(), Some(step.as_path()));

        let (found, child) = find_problem_cfg(dir.path()).unwrap();
        assert_eq!(found, dir.path());
        assert!(child.is_none());
    }

    #[test]
    fn test_directory_name_must_match_unique() {
        assert!(check_directory_name(Path::new("/work/foo"), "foo").is_ok());
        let err = check_directory_name(Path::new("/work/bar"), "foo").unwrap_err();
        assert!(err.to_string().contains("must match"));
    }

    #[test]
    fn test_step_directory_requires_numeric_child() {
        let dir = tempfile::tempdir().unwrap();
        let two = dir.path().join("2");
        let docs = dir.path().join("docs");
        assert_eq!(
            step_directory(dir.path(), Some(&two)),
            Some((two.clone(), 2))
        );
        assert_eq!(step_directory(dir.path(), Some(&docs)), None);
        assert_eq!(step_directory(dir.path(), None), None);
    }

    #[test]
    fn test_gather_steps_starter_and_solution_layout() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1/_starter/main.py"), "# TODO\n");
        write(&dir.path().join("1/_solution/main.py"), "print('hi')\n");
        write(&dir.path().join("1/tests/test_main.py"), "check\n");
        write(&dir.path().join("2/_solution/main.py"), "print('bye')\n");

        let cfg_steps = vec![
            StepConfig {
                note: "one".to_string(),
                weight: 1.0,
            },
            StepConfig {
                note: "two".to_string(),
                weight: 1.0,
            },
        ];
        let problem_type = ProblemType::default();
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let (steps, commits) =
            gather_steps(dir.path(), &cfg_steps, &problem_type, None, now).unwrap();

        assert_eq!(steps.len(), 2);
        assert!(steps[0].files.contains_key("main.py"));
        assert!(steps[0].files.contains_key("tests/test_main.py"));
        assert!(steps[0].whitelist["main.py"]);
        assert_eq!(commits[0].files["main.py"], "print('hi')\n");
        // step 2 has no new starter files but reuses the whitelist
        assert!(steps[1].whitelist["main.py"]);
        assert_eq!(commits[1].files["main.py"], "print('bye')\n");
    }

    #[test]
    fn test_gather_steps_root_only_is_the_solution() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1/_starter/main.py"), "# TODO\n");
        write(&dir.path().join("1/main.py"), "print('hi')\n");

        let cfg_steps = vec![StepConfig {
            note: "one".to_string(),
            weight: 1.0,
        }];
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let (steps, commits) =
            gather_steps(dir.path(), &cfg_steps, &ProblemType::default(), None, now).unwrap();
        assert_eq!(steps[0].files["main.py"], "# TODO\n");
        assert_eq!(commits[0].files["main.py"], "print('hi')\n");
    }

    #[test]
    fn test_gather_steps_rejects_all_three_sources() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("1/_starter/main.py"), "a\n");
        write(&dir.path().join("1/_solution/main.py"), "b\n");
        write(&dir.path().join("1/main.py"), "c\n");

        let cfg_steps = vec![StepConfig {
            note: "one".to_string(),
            weight: 1.0,
        }];
        let now = chrono::DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let err = gather_steps(dir.path(), &cfg_steps, &ProblemType::default(), None, now)
            .unwrap_err();
        assert!(err.to_string().contains("unsure how to proceed"));
    }

    #[test]
    fn test_walk_step_files_skips_scratch_and_scaffold() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("main.py"), "x\n");
        write(&dir.path().join("main.py~"), "backup\n");
        write(&dir.path().join("__pycache__/main.pyc"), "bin\n");
        write(&dir.path().join("Makefile"), "all:\n");

        let problem_type = ProblemType {
            files: FileMap::from([("Makefile".to_string(), "all:\n".to_string())]),
            ..ProblemType::default()
        };
        let files = walk_step_files(dir.path(), &problem_type).unwrap();
        let names: Vec<&str> = files.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["main.py"]);
    }
}
