use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::ReportCard;

/// One entry in a grading-session transcript.
///
/// The wire form carries the discriminator in the `event` field alongside
/// the kind-specific payload; frames with an unknown discriminator fail to
/// parse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub time: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum EventKind {
    Exec {
        #[serde(rename = "execCommand")]
        exec_command: Vec<String>,
    },
    Exit {
        #[serde(rename = "exitStatus")]
        exit_status: i64,
    },
    Stdin {
        #[serde(rename = "streamData")]
        stream_data: String,
    },
    Stdout {
        #[serde(rename = "streamData")]
        stream_data: String,
    },
    Stderr {
        #[serde(rename = "streamData")]
        stream_data: String,
    },
    Stdinclosed,
    Error {
        error: String,
    },
    Reportcard {
        #[serde(rename = "reportCard")]
        report_card: ReportCard,
    },
    Files {
        files: BTreeMap<String, String>,
    },
}

impl EventKind {
    /// Payload of a stream event (`stdin`, `stdout`, `stderr`), if this is
    /// one.
    pub fn stream_data(&self) -> Option<&str> {
        match self {
            EventKind::Stdin { stream_data }
            | EventKind::Stdout { stream_data }
            | EventKind::Stderr { stream_data } => Some(stream_data),
            _ => None,
        }
    }

    /// Append another event's stream payload onto this one if both are the
    /// same stream kind. Returns false when the events cannot merge.
    pub fn merge_stream(&mut self, other: &EventKind) -> bool {
        match (self, other) {
            (EventKind::Stdin { stream_data: a }, EventKind::Stdin { stream_data: b })
            | (EventKind::Stdout { stream_data: a }, EventKind::Stdout { stream_data: b })
            | (EventKind::Stderr { stream_data: a }, EventKind::Stderr { stream_data: b }) => {
                a.push_str(b);
                true
            }
            _ => false,
        }
    }
}

impl fmt::Display for EventMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            EventKind::Exec { exec_command } => {
                write!(f, "event: exec {}", exec_command.join(" "))
            }
            EventKind::Exit { exit_status } => write!(f, "event: exit {exit_status}"),
            EventKind::Stdin { stream_data } => write!(f, "event: stdin {stream_data:?}"),
            EventKind::Stdout { stream_data } => write!(f, "event: stdout {stream_data:?}"),
            EventKind::Stderr { stream_data } => write!(f, "event: stderr {stream_data:?}"),
            EventKind::Stdinclosed => write!(f, "event: stdinclosed"),
            EventKind::Error { error } => write!(f, "event: error {error}"),
            EventKind::Reportcard { report_card } => write!(
                f,
                "event: reportcard passed={} {} in {}s",
                report_card.passed, report_card.note, report_card.duration
            ),
            EventKind::Files { files } => {
                let names: Vec<&str> = files.keys().map(|s| s.as_str()).collect();
                write!(f, "event: files {}", names.join(", "))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn test_serde_roundtrip_all_kinds() {
        let kinds = vec![
            EventKind::Exec {
                exec_command: vec!["python3".into(), "main.py".into()],
            },
            EventKind::Exit { exit_status: 0 },
            EventKind::Stdout {
                stream_data: "hello\n".into(),
            },
            EventKind::Stdinclosed,
            EventKind::Error {
                error: "boom".into(),
            },
            EventKind::Files {
                files: BTreeMap::from([("out.txt".to_string(), "data".to_string())]),
            },
        ];
        for kind in kinds {
            let message = EventMessage {
                time: at(1_700_000_000),
                kind,
            };
            let json = serde_json::to_string(&message).unwrap();
            let parsed: EventMessage = serde_json::from_str(&json).unwrap();
            assert_eq!(message, parsed);
        }
    }

    #[test]
    fn test_wire_discriminator_and_payload_names() {
        let message = EventMessage {
            time: at(1_700_000_000),
            kind: EventKind::Exec {
                exec_command: vec!["ls".into()],
            },
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["event"], "exec");
        assert_eq!(json["execCommand"][0], "ls");
    }

    #[test]
    fn test_unknown_discriminator_rejected() {
        let raw = r#"{"time":"2024-01-01T00:00:00Z","event":"telepathy"}"#;
        assert!(serde_json::from_str::<EventMessage>(raw).is_err());
        let raw = r#"{"time":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<EventMessage>(raw).is_err());
    }

    #[test]
    fn test_merge_stream_same_kind_only() {
        let mut a = EventKind::Stdout {
            stream_data: "foo".into(),
        };
        assert!(a.merge_stream(&EventKind::Stdout {
            stream_data: "bar".into(),
        }));
        assert_eq!(a.stream_data(), Some("foobar"));
        assert!(!a.merge_stream(&EventKind::Stderr {
            stream_data: "baz".into(),
        }));
    }
}
