use std::io::Write as _;
use std::path::Path;

use common::{CommitBundle, DaycareRequest, DaycareResponse, EventKind, EventMessage};
use console::{Key, Term, style};
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{info, warn};

use crate::assignment::write_file;
use crate::error::{CliError, Result};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WriteHalf = SplitSink<Socket, Message>;

/// Run one interactive daycare session: keystrokes go out as stdin frames,
/// streamed events render on the console, and the session ends when the
/// server sends an error or the finalized commit bundle.
///
/// There is no reconnect: a dropped socket ends the session.
pub fn run_interactive_session(bundle: &CommitBundle, dir: &Path) -> Result<Option<CommitBundle>> {
    let url = socket_url(bundle)?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliError::Transport(format!("error starting session runtime: {err}")))?;
    let result = runtime.block_on(interactive_loop(bundle, dir, &url));
    // the keyboard reader may still be parked waiting for a key; don't wait
    runtime.shutdown_background();
    result
}

/// Stream a signed commit bundle through the daycare and return the
/// finalized bundle, ignoring the event stream. Used for grading and for
/// author-side step validation.
pub fn confirm_commit_bundle(bundle: &CommitBundle) -> Result<CommitBundle> {
    let url = socket_url(bundle)?;
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|err| CliError::Transport(format!("error starting session runtime: {err}")))?;
    runtime.block_on(async {
        let mut socket = dial(&url).await?;
        let first = DaycareRequest {
            commit_bundle: Some(bundle.clone()),
            ..DaycareRequest::default()
        };
        let frame = encode_frame(&first)?;
        socket
            .send(Message::Text(frame))
            .await
            .map_err(|err| CliError::Transport(format!("error writing request message: {err}")))?;

        while let Some(message) = socket.next().await {
            let message = message
                .map_err(|err| CliError::Transport(format!("socket error reading event: {err}")))?;
            let Message::Text(text) = message else {
                continue;
            };
            let response = decode_frame(&text)?;
            if let Some(error) = response.error {
                return Err(CliError::Protocol(format!("server returned an error: {error}")));
            }
            if let Some(finished) = response.commit_bundle {
                return Ok(finished);
            }
            if response.event.is_none() {
                return Err(CliError::Protocol("unexpected reply from server".to_string()));
            }
            // streamed events are ignored here; the caller only wants the verdict
        }
        Err(CliError::Protocol(
            "no commit returned from server".to_string(),
        ))
    })
}

async fn interactive_loop(
    bundle: &CommitBundle,
    dir: &Path,
    url: &str,
) -> Result<Option<CommitBundle>> {
    let socket = dial(url).await?;
    let (mut write, mut read) = socket.split();

    let first = DaycareRequest {
        commit_bundle: Some(bundle.clone()),
        ..DaycareRequest::default()
    };
    send_frame(&mut write, &first).await?;

    // keyboard producer: poll key events on a blocking thread and hand the
    // encoded frames to the socket loop
    let (tx, mut rx) = mpsc::unbounded_channel::<DaycareRequest>();
    let _keyboard = tokio::task::spawn_blocking(move || {
        let term = Term::stdout();
        loop {
            match term.read_key() {
                Ok(key) => {
                    let Some(encoded) = encode_key(&key) else {
                        continue;
                    };
                    let frame = DaycareRequest {
                        stdin: Some(encoded),
                        ..DaycareRequest::default()
                    };
                    if tx.send(frame).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("terminal error: {err}");
                    let _ = tx.send(DaycareRequest {
                        close_stdin: Some(true),
                        ..DaycareRequest::default()
                    });
                    break;
                }
            }
        }
    });

    let mut stdin_open = true;
    loop {
        tokio::select! {
            request = rx.recv(), if stdin_open => {
                match request {
                    Some(request) => {
                        let closing = request.close_stdin.is_some();
                        send_frame(&mut write, &request).await?;
                        if closing {
                            stdin_open = false;
                        }
                    }
                    None => stdin_open = false,
                }
            }
            frame = read.next() => {
                let Some(Ok(message)) = frame else {
                    info!("session closed by server");
                    return Ok(None);
                };
                match message {
                    Message::Text(text) => {
                        let response = decode_frame(&text)?;
                        if let Some(error) = response.error {
                            eprintln!(
                                "{}",
                                style(format!("server returned an error: {error}")).red()
                            );
                            return Ok(None);
                        }
                        if let Some(finished) = response.commit_bundle {
                            info!("commit bundle returned, ending session");
                            return Ok(Some(finished));
                        }
                        match response.event {
                            Some(event) => render(&event, Some(dir))?,
                            None => {
                                warn!("unexpected reply from server");
                                return Ok(None);
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("session closed by server");
                        return Ok(None);
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn dial(url: &str) -> Result<Socket> {
    let (socket, _) = connect_async(url)
        .await
        .map_err(|err| CliError::Transport(format!("error dialing {url}: {err}")))?;
    Ok(socket)
}

async fn send_frame(write: &mut WriteHalf, frame: &DaycareRequest) -> Result<()> {
    let text = encode_frame(frame)?;
    write
        .send(Message::Text(text))
        .await
        .map_err(|err| CliError::Transport(format!("error writing request message: {err}")))
}

fn encode_frame(frame: &DaycareRequest) -> Result<String> {
    serde_json::to_string(frame)
        .map_err(|err| CliError::Protocol(format!("error encoding request message: {err}")))
}

fn decode_frame(text: &str) -> Result<DaycareResponse> {
    serde_json::from_str(text)
        .map_err(|err| CliError::Protocol(format!("malformed frame from daycare: {err}")))
}

fn socket_url(bundle: &CommitBundle) -> Result<String> {
    if bundle.hostname.is_empty() {
        return Err(CliError::Protocol(
            "server was unable to find a suitable daycare".to_string(),
        ));
    }
    let problem_type = bundle
        .problem_type
        .as_ref()
        .map(|t| t.name.clone())
        .or_else(|| bundle.problem.as_ref().map(|p| p.problem_type.clone()))
        .ok_or_else(|| CliError::Protocol("bundle carries no problem type".to_string()))?;
    Ok(format!(
        "wss://{}/v2/sockets/{}/{}",
        bundle.hostname, problem_type, bundle.commit.action
    ))
}

/// Render one transcript event on the console. `dir` is where `files`
/// events land; playback of a stored transcript passes `None` and skips
/// them.
fn render(event: &EventMessage, dir: Option<&Path>) -> Result<()> {
    match &event.kind {
        EventKind::Exec { exec_command } => {
            println!("{}", style(format!("$ {}", exec_command.join(" "))).cyan());
        }
        EventKind::Stdin { stream_data } => {
            print!("{}", style(stream_data).yellow());
            let _ = std::io::stdout().flush();
        }
        EventKind::Stdout { stream_data } => {
            print!("{stream_data}");
            let _ = std::io::stdout().flush();
        }
        EventKind::Stderr { stream_data } => {
            eprint!("{}", style(stream_data).red());
        }
        EventKind::Exit { exit_status } => {
            println!("{}", style(format!("exit status {exit_status}")).cyan());
        }
        EventKind::Error { error } => {
            eprintln!("{}", style(format!("Error: {error}")).red());
        }
        EventKind::Files { files } => {
            if let Some(dir) = dir {
                for (name, contents) in files {
                    info!("downloading file {name}");
                    write_file(&dir.join(name), contents)?;
                }
            }
        }
        EventKind::Stdinclosed | EventKind::Reportcard { .. } => {}
    }
    Ok(())
}

/// Print a stored transcript with the same color coding the live session
/// uses.
pub fn render_transcript(transcript: &[EventMessage]) -> Result<()> {
    for event in transcript {
        render(event, None)?;
    }
    Ok(())
}

/// Encode one key event as the bytes a VT100-style terminal would send.
///
/// Printable runes go out as their full UTF-8 encoding; control keys pass
/// through as-is; navigation keys become ANSI escape sequences. Keys with
/// no terminal representation are dropped.
pub fn encode_key(key: &Key) -> Option<String> {
    let encoded = match key {
        Key::Char(c) => c.to_string(),
        Key::Enter => "\r".to_string(),
        Key::Tab => "\t".to_string(),
        Key::Backspace => "\u{8}".to_string(),
        Key::Escape => "\u{1b}".to_string(),
        Key::ArrowUp => "\u{1b}[A".to_string(),
        Key::ArrowDown => "\u{1b}[B".to_string(),
        Key::ArrowRight => "\u{1b}[C".to_string(),
        Key::ArrowLeft => "\u{1b}[D".to_string(),
        Key::Home => "\u{1b}[H".to_string(),
        Key::End => "\u{1b}[F".to_string(),
        Key::Insert => "\u{1b}[2~".to_string(),
        Key::Del => "\u{1b}[3~".to_string(),
        Key::PageUp => "\u{1b}[5~".to_string(),
        Key::PageDown => "\u{1b}[6~".to_string(),
        _ => return None,
    };
    Some(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::Commit;

    #[test]
    fn test_encode_key_navigation_table() {
        let cases = [
            (Key::ArrowUp, "\u{1b}[A"),
            (Key::ArrowDown, "\u{1b}[B"),
            (Key::ArrowRight, "\u{1b}[C"),
            (Key::ArrowLeft, "\u{1b}[D"),
            (Key::Home, "\u{1b}[H"),
            (Key::End, "\u{1b}[F"),
            (Key::Insert, "\u{1b}[2~"),
            (Key::Del, "\u{1b}[3~"),
            (Key::PageUp, "\u{1b}[5~"),
            (Key::PageDown, "\u{1b}[6~"),
        ];
        for (key, want) in cases {
            assert_eq!(encode_key(&key).as_deref(), Some(want));
        }
    }

    #[test]
    fn test_encode_key_control_keys_pass_through() {
        assert_eq!(encode_key(&Key::Backspace).as_deref(), Some("\u{8}"));
        assert_eq!(encode_key(&Key::Enter).as_deref(), Some("\r"));
        assert_eq!(encode_key(&Key::Tab).as_deref(), Some("\t"));
        assert_eq!(encode_key(&Key::Escape).as_deref(), Some("\u{1b}"));
        assert_eq!(encode_key(&Key::Char('\u{3}')).as_deref(), Some("\u{3}"));
    }

    #[test]
    fn test_encode_key_multibyte_rune_is_full_utf8() {
        let encoded = encode_key(&Key::Char('é')).unwrap();
        assert_eq!(encoded.as_bytes(), "é".as_bytes());
        assert_eq!(encoded.len(), 2);
        let encoded = encode_key(&Key::Char('漢')).unwrap();
        assert_eq!(encoded.len(), 3);
    }

    #[test]
    fn test_encode_key_drops_unrepresentable_keys() {
        assert_eq!(encode_key(&Key::Shift), None);
        assert_eq!(encode_key(&Key::Unknown), None);
    }

    #[test]
    fn test_socket_url_requires_hostname() {
        let bundle = CommitBundle {
            commit: Commit {
                action: "debug".to_string(),
                ..Commit::default()
            },
            ..CommitBundle::default()
        };
        assert!(socket_url(&bundle).is_err());
    }

    #[test]
    fn test_socket_url_prefers_bundle_problem_type() {
        let bundle = CommitBundle {
            hostname: "daycare.example.edu".to_string(),
            problem_type: Some(common::ProblemType {
                name: "python3unittest".to_string(),
                ..common::ProblemType::default()
            }),
            commit: Commit {
                action: "shell".to_string(),
                ..Commit::default()
            },
            ..CommitBundle::default()
        };
        assert_eq!(
            socket_url(&bundle).unwrap(),
            "wss://daycare.example.edu/v2/sockets/python3unittest/shell"
        );
    }
}
