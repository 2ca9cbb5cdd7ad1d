use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::signature::{SignedValues, escape, sign_float, sign_time};

/// Map from file path (slash-separated) to contents.
pub type FileMap = BTreeMap<String, String>;

/// Set of filenames, stored as a name → true map to match the wire and
/// dotfile form.
pub type Whitelist = BTreeMap<String, bool>;

/// Earliest timestamp any record may carry; nothing predates the service.
pub fn beginning_of_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_451_606_400, 0).expect("constant timestamp")
}

/// Template for a family of problems: shared scaffold files plus the set of
/// actions the sandbox will run for them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemType {
    pub name: String,
    #[serde(default, skip_serializing_if = "FileMap::is_empty")]
    pub files: FileMap,
    pub actions: BTreeMap<String, ProblemTypeAction>,
}

/// One permitted action for a problem type, with the resource limits the
/// sandbox enforces. The client forwards the limits without interpretation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemTypeAction {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parser: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub interactive: bool,
    #[serde(rename = "maxCPU")]
    pub max_cpu: i64,
    pub max_session: i64,
    pub max_timeout: i64,
    #[serde(rename = "maxFD")]
    pub max_fd: i64,
    pub max_file_size: i64,
    pub max_memory: i64,
    pub max_threads: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    pub id: i64,
    pub unique: String,
    pub note: String,
    pub problem_type: String,
    pub tags: Vec<String>,
    pub options: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single step of a problem.
///
/// Root-level entries of `files` land in the working directory and belong to
/// the student once whitelisted; subdirectory entries are support files that
/// are replaced wholesale when the step advances.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemStep {
    #[serde(rename = "problemID")]
    pub problem_id: i64,
    /// One-based.
    pub step: i64,
    pub note: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instructions: String,
    pub weight: f64,
    pub files: FileMap,
    #[serde(default)]
    pub whitelist: Whitelist,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSet {
    pub id: i64,
    pub unique: String,
    pub note: String,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSetProblem {
    #[serde(rename = "problemSetID", default, skip_serializing_if = "is_zero")]
    pub problem_set_id: i64,
    #[serde(rename = "problemID")]
    pub problem_id: i64,
    pub weight: f64,
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unique ID cannot be empty")]
    EmptyUnique,
    #[error("unique ID must be URL friendly: {unique} is escaped as {escaped}")]
    UniqueNotUrlSafe { unique: String, escaped: String },
    #[error("note cannot be empty")]
    EmptyNote,
    #[error("missing note for step {step}")]
    MissingStepNote { step: i64 },
    #[error("problem must have at least one step")]
    NoSteps,
    #[error("{entity} createdAt time of {at} is invalid")]
    BadCreatedAt {
        entity: &'static str,
        at: DateTime<Utc>,
    },
    #[error("{entity} updatedAt time of {at} is invalid")]
    BadUpdatedAt {
        entity: &'static str,
        at: DateTime<Utc>,
    },
    #[error("commit must have at least one file")]
    NoFiles,
    #[error("commit score of {score} must be between 0 and 1")]
    BadScore { score: f64 },
}

/// Trimmed, non-empty, and equal to its URL-escaped form.
fn check_unique(unique: &mut String) -> Result<(), NormalizeError> {
    *unique = unique.trim().to_string();
    if unique.is_empty() {
        return Err(NormalizeError::EmptyUnique);
    }
    let escaped = escape(unique);
    if escaped != *unique {
        return Err(NormalizeError::UniqueNotUrlSafe {
            unique: unique.clone(),
            escaped,
        });
    }
    Ok(())
}

fn check_timestamps(
    entity: &'static str,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Result<(), NormalizeError> {
    if created_at < beginning_of_time() || created_at > now {
        return Err(NormalizeError::BadCreatedAt {
            entity,
            at: created_at,
        });
    }
    if updated_at < created_at || updated_at > now {
        return Err(NormalizeError::BadUpdatedAt {
            entity,
            at: updated_at,
        });
    }
    Ok(())
}

fn clean_list(list: &mut Vec<String>) {
    for item in list.iter_mut() {
        *item = item.trim().to_string();
    }
    list.sort();
}

impl Problem {
    /// Validate and canonicalize the problem together with its steps.
    ///
    /// Steps are renumbered 1-based in order and every whitelist entry is
    /// propagated onto all later steps, so the whitelist can only grow.
    pub fn normalize(
        &mut self,
        now: DateTime<Utc>,
        steps: &mut [ProblemStep],
    ) -> Result<(), NormalizeError> {
        check_unique(&mut self.unique)?;

        self.note = self.note.trim().to_string();
        if self.note.is_empty() {
            return Err(NormalizeError::EmptyNote);
        }

        clean_list(&mut self.tags);
        clean_list(&mut self.options);

        if steps.is_empty() {
            return Err(NormalizeError::NoSteps);
        }
        let mut carried = Whitelist::new();
        for (n, step) in steps.iter_mut().enumerate() {
            step.normalize(n as i64 + 1)?;
            for (name, _) in carried.iter() {
                step.whitelist.insert(name.clone(), true);
            }
            carried = step.whitelist.clone();
        }

        check_timestamps("problem", self.created_at, self.updated_at, now)
    }

    pub fn compute_signature(&self, secret: &str, steps: &[ProblemStep]) -> String {
        let mut v = SignedValues::new();
        v.add("id", self.id.to_string());
        v.add("unique", &self.unique);
        v.add("note", &self.note);
        v.add("problemType", &self.problem_type);
        for tag in &self.tags {
            v.add("tags", tag);
        }
        for option in &self.options {
            v.add("options", option);
        }
        v.add("createdAt", sign_time(self.created_at));
        v.add("updatedAt", sign_time(self.updated_at));
        for step in steps {
            v.add(format!("step-{}-note", step.step), &step.note);
            v.add(format!("step-{}-weight", step.step), sign_float(step.weight));
            for (name, contents) in &step.files {
                v.add(format!("step-{}-file-{}", step.step, name), contents);
            }
            for (name, _) in &step.whitelist {
                v.add(format!("step-{}-whitelist-{}", step.step, name), "true");
            }
        }
        v.sign(secret)
    }
}

impl ProblemStep {
    /// Canonicalize one step: assign its 1-based number, trim the note,
    /// default the weight, and normalize line endings of every file.
    pub fn normalize(&mut self, n: i64) -> Result<(), NormalizeError> {
        self.step = n;
        self.note = self.note.trim().to_string();
        if self.note.is_empty() {
            return Err(NormalizeError::MissingStepNote { step: n });
        }
        if self.weight <= 0.0 {
            self.weight = 1.0;
        }
        self.fix_file_endings();
        Ok(())
    }

    /// Normalize line endings of every file: files directly under `inputs/`
    /// or `doc/` keep trailing spaces, everything else gets the full
    /// cleanup.
    pub fn fix_file_endings(&mut self) {
        let mut clean = FileMap::new();
        for (name, contents) in std::mem::take(&mut self.files) {
            let fixed = if raw_directory(&name) {
                fix_newlines(&contents)
            } else {
                fix_line_endings(&contents)
            };
            if fixed != contents {
                debug!(file = %name, "fixed line endings");
            }
            clean.insert(name, fixed);
        }
        self.files = clean;
    }
}

impl ProblemSet {
    pub fn normalize(&mut self, now: DateTime<Utc>) -> Result<(), NormalizeError> {
        check_unique(&mut self.unique)?;
        self.note = self.note.trim().to_string();
        if self.note.is_empty() {
            return Err(NormalizeError::EmptyNote);
        }
        clean_list(&mut self.tags);
        check_timestamps("problem set", self.created_at, self.updated_at, now)
    }
}

impl ProblemType {
    pub fn compute_signature(&self, secret: &str) -> String {
        let mut v = SignedValues::new();
        v.add("name", &self.name);
        for (name, contents) in &self.files {
            v.add(format!("file-{name}"), contents);
        }
        for (name, action) in &self.actions {
            v.add(format!("action-{name}-parser"), &action.parser);
            v.add(
                format!("action-{name}-interactive"),
                action.interactive.to_string(),
            );
            v.add(format!("action-{name}-max-cpu"), action.max_cpu.to_string());
            v.add(
                format!("action-{name}-max-session"),
                action.max_session.to_string(),
            );
            v.add(
                format!("action-{name}-max-timeout"),
                action.max_timeout.to_string(),
            );
            v.add(format!("action-{name}-max-fd"), action.max_fd.to_string());
            v.add(
                format!("action-{name}-max-file-size"),
                action.max_file_size.to_string(),
            );
            v.add(
                format!("action-{name}-max-memory"),
                action.max_memory.to_string(),
            );
            v.add(
                format!("action-{name}-max-threads"),
                action.max_threads.to_string(),
            );
        }
        v.sign(secret)
    }
}

/// Files directly under these directories keep their trailing spaces; only
/// line terminators are touched.
fn raw_directory(name: &str) -> bool {
    match name.rsplit_once('/') {
        Some((dir, _)) => dir == "inputs" || dir == "doc",
        None => false,
    }
}

/// Normalize to LF endings, strip trailing spaces from every line, and
/// collapse trailing blank lines to exactly one newline. Empty stays empty.
pub fn fix_line_endings(s: &str) -> String {
    let mut s = s.replace("\r\n", "\n");
    s.push('\n');
    while s.contains(" \n") {
        s = s.replace(" \n", "\n");
    }
    while s.ends_with("\n\n") {
        s.pop();
    }
    if s == "\n" {
        s.clear();
    }
    s
}

/// Normalize to LF endings and collapse trailing blank lines, leaving
/// interior whitespace alone.
pub fn fix_newlines(s: &str) -> String {
    let mut s = s.replace("\r\n", "\n");
    s.push('\n');
    while s.ends_with("\n\n") {
        s.pop();
    }
    if s == "\n" {
        s.clear();
    }
    s
}
