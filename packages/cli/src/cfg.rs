use std::collections::BTreeMap;

use thiserror::Error;

/// Parser for the INI-style problem definition files: `[section]` headers,
/// `[section "sub"]` quoted subsections, `key = value` entries with
/// repeatable keys, and `#`/`;` comments.

#[derive(Debug, Error)]
pub enum CfgError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },
    #[error("missing [{0}] section")]
    MissingSection(&'static str),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, PartialEq)]
pub struct Section {
    pub name: String,
    pub subsection: Option<String>,
    pub entries: Vec<(String, String)>,
}

fn syntax(line: usize, message: impl Into<String>) -> CfgError {
    CfgError::Syntax {
        line,
        message: message.into(),
    }
}

fn unquote(value: &str) -> String {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        value[1..value.len() - 1].to_string()
    } else {
        value.to_string()
    }
}

pub fn parse_sections(text: &str) -> Result<Vec<Section>, CfgError> {
    let mut sections: Vec<Section> = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        let lineno = idx + 1;
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(rest) = line.strip_prefix('[') {
            let Some(inner) = rest.strip_suffix(']') else {
                return Err(syntax(lineno, "malformed section header"));
            };
            let inner = inner.trim();
            let (name, subsection) = match inner.split_once(char::is_whitespace) {
                None => (inner.to_string(), None),
                Some((name, sub)) => {
                    let sub = sub.trim();
                    if sub.len() >= 2 && sub.starts_with('"') && sub.ends_with('"') {
                        (name.to_string(), Some(sub[1..sub.len() - 1].to_string()))
                    } else {
                        return Err(syntax(lineno, "subsection name must be quoted"));
                    }
                }
            };
            sections.push(Section {
                name: name.to_lowercase(),
                subsection,
                entries: Vec::new(),
            });
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            return Err(syntax(lineno, "expected key = value"));
        };
        let Some(section) = sections.last_mut() else {
            return Err(syntax(lineno, "entry outside of any section"));
        };
        section
            .entries
            .push((key.trim().to_lowercase(), unquote(value.trim())));
    }
    Ok(sections)
}

/// Parsed `problem.cfg`.
#[derive(Debug, Default, PartialEq)]
pub struct ProblemConfig {
    pub unique: String,
    pub note: String,
    pub problem_type: String,
    pub tags: Vec<String>,
    pub options: Vec<String>,
    /// In step order; index 0 is step 1.
    pub steps: Vec<StepConfig>,
}

#[derive(Debug, Default, PartialEq)]
pub struct StepConfig {
    pub note: String,
    pub weight: f64,
}

pub fn parse_problem_config(text: &str) -> Result<ProblemConfig, CfgError> {
    let mut config = ProblemConfig::default();
    let mut steps: BTreeMap<i64, StepConfig> = BTreeMap::new();
    let mut saw_problem = false;

    for section in parse_sections(text)? {
        match (section.name.as_str(), &section.subsection) {
            ("problem", None) => {
                saw_problem = true;
                for (key, value) in section.entries {
                    match key.as_str() {
                        "unique" => config.unique = value,
                        "note" => config.note = value,
                        "type" => config.problem_type = value,
                        "tag" => config.tags.push(value),
                        "option" => config.options.push(value),
                        other => {
                            return Err(CfgError::Invalid(format!(
                                "unknown key {other:?} in [problem]"
                            )));
                        }
                    }
                }
            }
            ("step", Some(number)) => {
                let n: i64 = number.parse().map_err(|_| {
                    CfgError::Invalid(format!("step {number:?} is not a number"))
                })?;
                let mut step = StepConfig::default();
                for (key, value) in section.entries {
                    match key.as_str() {
                        "note" => step.note = value,
                        "weight" => {
                            step.weight = value.parse().map_err(|_| {
                                CfgError::Invalid(format!(
                                    "step {n} weight {value:?} is not a number"
                                ))
                            })?;
                        }
                        other => {
                            return Err(CfgError::Invalid(format!(
                                "unknown key {other:?} in [step \"{n}\"]"
                            )));
                        }
                    }
                }
                if steps.insert(n, step).is_some() {
                    return Err(CfgError::Invalid(format!("step {n} is defined twice")));
                }
            }
            _ => {
                return Err(CfgError::Invalid(format!(
                    "unknown section [{}]",
                    section.name
                )));
            }
        }
    }

    if !saw_problem {
        return Err(CfgError::MissingSection("problem"));
    }
    if steps.is_empty() {
        return Err(CfgError::Invalid(
            "problem must define at least one [step \"1\"] section".to_string(),
        ));
    }
    let total = steps.len() as i64;
    for i in 1..=total {
        match steps.remove(&i) {
            Some(step) => config.steps.push(step),
            None => {
                return Err(CfgError::Invalid(format!(
                    "expected {total} steps numbered 1 through {total}, but step {i} is missing"
                )));
            }
        }
    }
    Ok(config)
}

/// Parsed problem-set definition (`<unique>.cfg`).
#[derive(Debug, Default, PartialEq)]
pub struct ProblemSetConfig {
    pub unique: String,
    pub note: String,
    pub tags: Vec<String>,
    /// Problem unique name → weight; zero means "use the default".
    pub problems: Vec<(String, f64)>,
}

pub fn parse_problem_set_config(text: &str) -> Result<ProblemSetConfig, CfgError> {
    let mut config = ProblemSetConfig::default();
    let mut saw_set = false;

    for section in parse_sections(text)? {
        match (section.name.as_str(), &section.subsection) {
            ("problemset", None) => {
                saw_set = true;
                for (key, value) in section.entries {
                    match key.as_str() {
                        "unique" => config.unique = value,
                        "note" => config.note = value,
                        "tag" => config.tags.push(value),
                        other => {
                            return Err(CfgError::Invalid(format!(
                                "unknown key {other:?} in [problemset]"
                            )));
                        }
                    }
                }
            }
            ("problem", Some(unique)) => {
                let mut weight = 0.0;
                for (key, value) in section.entries {
                    match key.as_str() {
                        "weight" => {
                            weight = value.parse().map_err(|_| {
                                CfgError::Invalid(format!(
                                    "problem {unique:?} weight {value:?} is not a number"
                                ))
                            })?;
                        }
                        other => {
                            return Err(CfgError::Invalid(format!(
                                "unknown key {other:?} in [problem \"{unique}\"]"
                            )));
                        }
                    }
                }
                config.problems.push((unique.clone(), weight));
            }
            _ => {
                return Err(CfgError::Invalid(format!(
                    "unknown section [{}]",
                    section.name
                )));
            }
        }
    }

    if !saw_set {
        return Err(CfgError::MissingSection("problemset"));
    }
    if config.problems.is_empty() {
        return Err(CfgError::Invalid(
            "a problem set must contain at least one problem".to_string(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
# a sample problem definition
[problem]
unique = cs1400-loops
note = Practice with loops
type = python3unittest
tag = loops
tag = beginner
option = nocolor

[step "1"]
note = write the loop
weight = 0.5

[step "2"]
note = handle edge cases
"#;

    #[test]
    fn test_parse_problem_config() {
        let config = parse_problem_config(SAMPLE).unwrap();
        assert_eq!(config.unique, "cs1400-loops");
        assert_eq!(config.note, "Practice with loops");
        assert_eq!(config.problem_type, "python3unittest");
        assert_eq!(config.tags, vec!["loops", "beginner"]);
        assert_eq!(config.options, vec!["nocolor"]);
        assert_eq!(config.steps.len(), 2);
        assert_eq!(config.steps[0].note, "write the loop");
        assert_eq!(config.steps[0].weight, 0.5);
        assert_eq!(config.steps[1].note, "handle edge cases");
        assert_eq!(config.steps[1].weight, 0.0);
    }

    #[test]
    fn test_quoted_values_and_comments() {
        let text = "[problem]\nunique = demo\nnote = \"a note; with punctuation\"\ntype = x\n; comment\n[step \"1\"]\nnote = one\n";
        let config = parse_problem_config(text).unwrap();
        assert_eq!(config.note, "a note; with punctuation");
    }

    #[test]
    fn test_noncontiguous_steps_rejected() {
        let text = "[problem]\nunique = demo\nnote = n\ntype = t\n[step \"1\"]\nnote = a\n[step \"3\"]\nnote = c\n";
        let err = parse_problem_config(text).unwrap_err();
        assert!(err.to_string().contains("step 2 is missing"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let text = "[problem]\nunique = demo\nnotes = typo\n";
        assert!(parse_problem_config(text).is_err());
    }

    #[test]
    fn test_entry_outside_section_rejected() {
        assert!(parse_sections("unique = demo\n").is_err());
    }

    #[test]
    fn test_unquoted_subsection_rejected() {
        assert!(parse_sections("[step 1]\n").is_err());
    }

    #[test]
    fn test_parse_problem_set_config() {
        let text = "[problemset]\nunique = cs1400-week3\nnote = Week 3\ntag = week3\n\n[problem \"cs1400-loops\"]\nweight = 2\n[problem \"cs1400-strings\"]\n";
        let config = parse_problem_set_config(text).unwrap();
        assert_eq!(config.unique, "cs1400-week3");
        assert_eq!(
            config.problems,
            vec![
                ("cs1400-loops".to_string(), 2.0),
                ("cs1400-strings".to_string(), 0.0)
            ]
        );
    }
}
