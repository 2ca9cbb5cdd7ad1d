use common::{Assignment, Course, ProblemSet, User};

use crate::api::Client;
use crate::error::{CliError, Result};

/// List the user's assignments, grouped by course.
pub fn run(api: &Client) -> Result<()> {
    let user: User = api.get("/users/me", &[])?;
    let assignments: Vec<Assignment> =
        api.get(&format!("/users/{}/assignments", user.id), &[])?;
    if assignments.is_empty() {
        return Err(CliError::Validation(
            "no assignments found; you must start each assignment through your LMS \
             before you can access it here"
                .to_string(),
        ));
    }

    // column widths across the whole listing
    let id_width = assignments
        .iter()
        .map(|a| a.id.to_string().len())
        .max()
        .unwrap_or(1);
    let title_width = assignments
        .iter()
        .map(|a| a.canvas_title.len())
        .max()
        .unwrap_or(1);

    let mut course: Option<Course> = None;
    for assignment in &assignments {
        if course.as_ref().is_none_or(|c| c.id != assignment.course_id) {
            if course.is_some() {
                println!();
            }
            let next: Course = api.get(&format!("/courses/{}", assignment.course_id), &[])?;
            println!("{}", next.name);
            println!("{}", "-".repeat(next.name.len()));
            course = Some(next);
        }
        let problem_set: ProblemSet =
            api.get(&format!("/problem_sets/{}", assignment.problem_set_id), &[])?;
        let label = course.as_ref().map(|c| c.label.as_str()).unwrap_or("");
        println!(
            "{:<id_width$} {:<title_width$} {:>3.0}% ({}/{})",
            assignment.id,
            assignment.canvas_title,
            assignment.score * 100.0,
            label,
            problem_set.unique,
        );
    }
    Ok(())
}
