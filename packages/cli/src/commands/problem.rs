use std::collections::BTreeMap;

use common::{Problem, ProblemSet, ProblemSetProblem, ProblemStep};

use crate::api::Client;
use crate::error::{CliError, Result};

/// Search problem sets by name, note, and tags, and print each match with
/// its problems, steps, and LTI URL.
pub fn run(api: &Client, terms: &[String]) -> Result<()> {
    if terms.is_empty() {
        return Err(CliError::Validation(
            "you must specify search terms to find the problem set; terms match \
             against problem set and problem names, notes, and tags"
                .to_string(),
        ));
    }

    let params: Vec<(&str, String)> = terms.iter().map(|t| ("search", t.clone())).collect();
    let mut problem_sets: Vec<ProblemSet> = api.get("/problem_sets", &params)?;
    if problem_sets.is_empty() {
        return Err(CliError::Validation(
            "no problem sets found matching the terms you gave".to_string(),
        ));
    }
    problem_sets.sort_by_key(|ps| ps.unique.to_lowercase());

    let mut problems: BTreeMap<i64, Problem> = BTreeMap::new();
    let mut steps: BTreeMap<i64, Vec<ProblemStep>> = BTreeMap::new();

    for (n, problem_set) in problem_sets.iter().enumerate() {
        if n > 0 {
            println!();
        }
        println!("{}", problem_set.note);

        let set_problems: Vec<ProblemSetProblem> = api.get(
            &format!("/problem_sets/{}/problems", problem_set.id),
            &[],
        )?;
        for entry in &set_problems {
            if !problems.contains_key(&entry.problem_id) {
                let problem: Problem =
                    api.get(&format!("/problems/{}", entry.problem_id), &[])?;
                problems.insert(entry.problem_id, problem);
            }
            if !steps.contains_key(&entry.problem_id) {
                let list: Vec<ProblemStep> =
                    api.get(&format!("/problems/{}/steps", entry.problem_id), &[])?;
                steps.insert(entry.problem_id, list);
            }
            let problem = &problems[&entry.problem_id];

            if entry.weight == 1.0 {
                println!("  * {} ({})", problem.note, problem.unique);
            } else {
                println!(
                    "  * {} ({}, weight {:.2})",
                    problem.note, problem.unique, entry.weight
                );
            }
            for (i, step) in steps[&entry.problem_id].iter().enumerate() {
                print!("    {}. {}", i + 1, step.note.replace('\n', "\n       "));
                if step.weight != 1.0 {
                    print!(" (weight {:.2})", step.weight);
                }
                println!();
            }

            println!();
            println!(
                "  → https://{}/lti/problem_sets/{}",
                api.host(),
                problem_set.unique
            );
        }
    }
    Ok(())
}
