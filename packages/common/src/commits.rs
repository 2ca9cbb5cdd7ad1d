use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::events::EventMessage;
use crate::problems::{FileMap, NormalizeError, Whitelist, beginning_of_time, fix_line_endings};
use crate::report::ReportCard;
use crate::signature::{SignedValues, sign_float, sign_time};

/// Upper bound on transcript entries kept after compression.
pub const TRANSCRIPT_EVENT_COUNT_LIMIT: usize = 500;

/// Upper bound on total stream-event payload bytes kept in a transcript.
pub const TRANSCRIPT_DATA_LIMIT: usize = 100_000;

/// An attempt at one step of one problem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Commit {
    pub id: i64,
    #[serde(rename = "assignmentID")]
    pub assignment_id: i64,
    #[serde(rename = "problemID")]
    pub problem_id: i64,
    /// One-based.
    pub step: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub action: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub note: String,
    pub files: FileMap,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub transcript: Vec<EventMessage>,
    #[serde(default)]
    pub report_card: Option<ReportCard>,
    #[serde(default)]
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Commit {
    /// True when this commit completed its step: the report card passed and
    /// the score is full marks.
    pub fn passed(&self) -> bool {
        matches!(&self.report_card, Some(card) if card.passed) && self.score == 1.0
    }

    /// Validate and canonicalize the commit before upload.
    pub fn normalize(
        &mut self,
        now: DateTime<Utc>,
        whitelist: Option<&Whitelist>,
    ) -> Result<(), NormalizeError> {
        self.action = self.action.trim().to_string();
        self.note = self.note.trim().to_string();
        self.filter_incoming(whitelist);
        if self.files.is_empty() {
            return Err(NormalizeError::NoFiles);
        }
        self.compress_transcript();
        if !(0.0..=1.0).contains(&self.score) {
            return Err(NormalizeError::BadScore { score: self.score });
        }
        if self.created_at < beginning_of_time() || self.created_at > now {
            return Err(NormalizeError::BadCreatedAt {
                entity: "commit",
                at: self.created_at,
            });
        }
        if self.updated_at < beginning_of_time() || self.updated_at > now {
            return Err(NormalizeError::BadUpdatedAt {
                entity: "commit",
                at: self.updated_at,
            });
        }
        Ok(())
    }

    /// Drop files that do not belong to the step and normalize line endings
    /// of the rest. With no whitelist, only root-level names survive.
    pub fn filter_incoming(&mut self, whitelist: Option<&Whitelist>) {
        let mut clean = FileMap::new();
        for (name, contents) in std::mem::take(&mut self.files) {
            let keep = match whitelist {
                Some(list) => list.get(&name).copied().unwrap_or(false),
                None => !name.contains('/'),
            };
            if keep {
                clean.insert(name, fix_line_endings(&contents));
            } else {
                debug!(file = %name, "filtered out file not belonging to the step");
            }
        }
        self.files = clean;
    }

    /// Merge adjacent stream events of the same kind and enforce the
    /// transcript size caps. Running this twice gives the same result as
    /// running it once.
    pub fn compress_transcript(&mut self) {
        let before = self.transcript.len();
        let mut count = 0usize;
        let mut overflow = 0usize;
        let mut out: Vec<EventMessage> = Vec::new();
        for event in std::mem::take(&mut self.transcript) {
            if let Some(prev) = out.last_mut() {
                if let Some(data) = event.kind.stream_data() {
                    if count >= TRANSCRIPT_DATA_LIMIT {
                        overflow += data.len();
                        continue;
                    }
                    count += data.len();
                    if prev.kind.merge_stream(&event.kind) {
                        prev.time = event.time;
                        continue;
                    }
                }
            }
            out.push(event);
        }

        if overflow > 0 {
            debug!(
                before,
                after = out.len(),
                discarded = overflow,
                "transcript compressed with overflow"
            );
        } else if before != out.len() {
            debug!(before, after = out.len(), "transcript compressed");
        }
        if out.len() > TRANSCRIPT_EVENT_COUNT_LIMIT {
            debug!(
                before = out.len(),
                after = TRANSCRIPT_EVENT_COUNT_LIMIT,
                "transcript truncated"
            );
            out.truncate(TRANSCRIPT_EVENT_COUNT_LIMIT);
        }

        self.transcript = out;
    }

    pub fn compute_signature(
        &self,
        secret: &str,
        problem_type_signature: &str,
        problem_signature: &str,
        daycare_host: &str,
        user_id: i64,
    ) -> String {
        let mut v = SignedValues::new();
        v.add("id", self.id.to_string());
        v.add("assignment_id", self.assignment_id.to_string());
        v.add("problem_id", self.problem_id.to_string());
        v.add("step", self.step.to_string());
        v.add("action", &self.action);
        v.add("note", &self.note);
        for (name, contents) in &self.files {
            v.add(format!("file-{name}"), contents);
        }
        for (n, event) in self.transcript.iter().enumerate() {
            v.add(format!("transcript-{n}"), event.to_string());
        }
        if let Some(card) = &self.report_card {
            v.add("reportcard-passed", card.passed.to_string());
            v.add("reportcard-note", &card.note);
            v.add(
                "reportcard-duration",
                format!("{}s", sign_float(card.duration)),
            );
            for (n, result) in card.results.iter().enumerate() {
                v.add(format!("reportcard-{n}-name"), &result.name);
                v.add(format!("reportcard-{n}-outcome"), result.outcome.as_str());
                if let Some(details) = &result.details {
                    v.add(format!("reportcard-{n}-details"), details);
                }
                if let Some(context) = &result.context {
                    v.add(format!("reportcard-{n}-context"), context);
                }
            }
        }
        v.add("score", sign_float(self.score));
        v.add("created_at", sign_time(self.created_at));
        v.add("updated_at", sign_time(self.updated_at));
        v.add("problem_type_signature", problem_type_signature);
        v.add("problem_signature", problem_signature);
        v.add("daycare_host", daycare_host);
        v.add("user_id", user_id.to_string());
        v.sign(secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn stream(kind: fn(String) -> EventKind, data: &str, secs: i64) -> EventMessage {
        EventMessage {
            time: at(secs),
            kind: kind(data.to_string()),
        }
    }

    fn stdout(data: &str, secs: i64) -> EventMessage {
        stream(|stream_data| EventKind::Stdout { stream_data }, data, secs)
    }

    fn stderr(data: &str, secs: i64) -> EventMessage {
        stream(|stream_data| EventKind::Stderr { stream_data }, data, secs)
    }

    fn commit_with(transcript: Vec<EventMessage>) -> Commit {
        Commit {
            assignment_id: 7,
            problem_id: 42,
            step: 1,
            files: FileMap::from([("main.py".to_string(), "pass\n".to_string())]),
            transcript,
            created_at: at(1_700_000_000),
            updated_at: at(1_700_000_000),
            ..Commit::default()
        }
    }

    #[test]
    fn test_filter_keeps_whitelisted_only() {
        let mut commit = commit_with(vec![]);
        commit.files.insert("notes.txt".into(), "junk\r\n".into());
        let whitelist = Whitelist::from([("main.py".to_string(), true)]);
        commit.filter_incoming(Some(&whitelist));
        assert_eq!(commit.files.len(), 1);
        assert!(commit.files.contains_key("main.py"));
    }

    #[test]
    fn test_filter_without_whitelist_drops_subdirectories() {
        let mut commit = commit_with(vec![]);
        commit.files.insert("doc/index.html".into(), "x".into());
        commit.filter_incoming(None);
        assert!(!commit.files.contains_key("doc/index.html"));
        assert!(commit.files.contains_key("main.py"));
    }

    #[test]
    fn test_filter_normalizes_line_endings() {
        let mut commit = commit_with(vec![]);
        commit.files.insert("main.py".into(), "x = 1  \r\n\n".into());
        commit.filter_incoming(None);
        assert_eq!(commit.files["main.py"], "x = 1\n");
    }

    #[test]
    fn test_compress_merges_adjacent_same_kind() {
        let mut commit = commit_with(vec![
            stdout("a", 1),
            stdout("b", 2),
            stderr("x", 3),
            stdout("c", 4),
        ]);
        commit.compress_transcript();
        assert_eq!(commit.transcript.len(), 3);
        assert_eq!(commit.transcript[0].kind.stream_data(), Some("ab"));
        assert_eq!(commit.transcript[0].time, at(2));
        assert_eq!(commit.transcript[1].kind.stream_data(), Some("x"));
        assert_eq!(commit.transcript[2].kind.stream_data(), Some("c"));
    }

    #[test]
    fn test_compress_never_merges_non_stream_events() {
        let mut commit = commit_with(vec![
            EventMessage {
                time: at(1),
                kind: EventKind::Exit { exit_status: 0 },
            },
            EventMessage {
                time: at(2),
                kind: EventKind::Exit { exit_status: 1 },
            },
        ]);
        commit.compress_transcript();
        assert_eq!(commit.transcript.len(), 2);
    }

    #[test]
    fn test_compress_is_idempotent() {
        let mut commit = commit_with(vec![
            stdout("a", 1),
            stdout("b", 2),
            stderr("x", 3),
            stderr("y", 4),
            stdout("c", 5),
        ]);
        commit.compress_transcript();
        let once = commit.transcript.clone();
        commit.compress_transcript();
        assert_eq!(commit.transcript, once);
    }

    #[test]
    fn test_compress_enforces_data_cap() {
        let chunk = "x".repeat(60_000);
        let mut commit = commit_with(vec![
            stdout("start", 1),
            stderr(&chunk, 2),
            stdout(&chunk, 3),
            stderr("late", 4),
            EventMessage {
                time: at(5),
                kind: EventKind::Exit { exit_status: 0 },
            },
        ]);
        commit.compress_transcript();
        // the stderr chunk lands under the cap, the second chunk crosses it,
        // and everything after is discarded except non-stream events
        let kinds: Vec<bool> = commit
            .transcript
            .iter()
            .map(|e| e.kind.stream_data().is_some())
            .collect();
        assert_eq!(kinds, vec![true, true, true, false]);
        let total: usize = commit
            .transcript
            .iter()
            .filter_map(|e| e.kind.stream_data())
            .map(|d| d.len())
            .sum();
        assert!(total <= TRANSCRIPT_DATA_LIMIT + chunk.len() + "start".len());
    }

    #[test]
    fn test_compress_enforces_event_count_cap() {
        let mut events = Vec::new();
        for n in 0..600 {
            events.push(EventMessage {
                time: at(n),
                kind: EventKind::Exit { exit_status: n },
            });
        }
        let mut commit = commit_with(events);
        commit.compress_transcript();
        assert_eq!(commit.transcript.len(), TRANSCRIPT_EVENT_COUNT_LIMIT);
    }

    #[test]
    fn test_normalize_rejects_empty_files() {
        let mut commit = commit_with(vec![]);
        commit.files.clear();
        assert!(matches!(
            commit.normalize(at(1_700_000_001), None),
            Err(NormalizeError::NoFiles)
        ));
    }

    #[test]
    fn test_normalize_rejects_out_of_range_score() {
        let mut commit = commit_with(vec![]);
        commit.score = 1.5;
        assert!(matches!(
            commit.normalize(at(1_700_000_001), None),
            Err(NormalizeError::BadScore { .. })
        ));
    }

    #[test]
    fn test_signature_stable_after_renormalize() {
        let mut commit = commit_with(vec![stdout("hello", 1), stdout(" world", 2)]);
        commit.normalize(at(1_700_000_001), None).unwrap();
        let first = commit.compute_signature("secret", "tsig", "psig", "daycare.test", 3);
        commit.normalize(at(1_700_000_001), None).unwrap();
        let second = commit.compute_signature("secret", "tsig", "psig", "daycare.test", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn test_passed_requires_card_and_full_score() {
        let mut commit = commit_with(vec![]);
        assert!(!commit.passed());
        commit.report_card = Some(ReportCard {
            passed: true,
            ..ReportCard::default()
        });
        commit.score = 0.5;
        assert!(!commit.passed());
        commit.score = 1.0;
        assert!(commit.passed());
    }
}
