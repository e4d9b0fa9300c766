//! Battle playback.
//!
//! Decoding the battle payload and simulating entities is done by an external
//! replay backend. This module defines the seam the rest of the app talks to
//! and an adapter that drives the backend as a child process.

use serde::Deserialize;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::process::{Command, Stdio};

use crate::error::{ChatError, Result};
use crate::events::{EventRegistry, MethodCall};
use crate::models::{PlayerInfo, PlayerRegistry};
use crate::replay::ClientVersion;

const STDERR_TAIL_LINES: usize = 20;

/// Something that can be driven through a battle payload, emitting entity
/// method calls to the given registry as it goes.
pub trait BattlePlayer {
    /// In strict mode any unrecognized or malformed structure aborts playback.
    fn play(&mut self, payload: &[u8], strict_mode: bool, events: &mut EventRegistry)
        -> Result<()>;

    /// Post-battle player info, `None` if playback never produced it.
    fn players_info(&self) -> Option<&PlayerRegistry>;
}

/// Builds a player for a specific client version
pub trait PlayerFactory: Send + Sync {
    fn create(&self, version: &ClientVersion) -> Result<Box<dyn BattlePlayer>>;
}

/// One line of backend output, as written on the wire
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireLine {
    MethodCall(MethodCall),
    /// Object keys are player ids in decimal
    Players { players: HashMap<String, PlayerInfo> },
    Error { message: String },
}

/// One line of backend output, with player ids resolved
#[derive(Debug)]
enum BackendLine {
    MethodCall(MethodCall),
    Players(PlayerRegistry),
    Error(String),
}

fn protocol_error(line_no: usize, reason: impl Into<String>) -> ChatError {
    ChatError::Protocol {
        line: line_no,
        reason: reason.into(),
    }
}

fn parse_backend_line(
    line_no: usize,
    line: &str,
    strict_mode: bool,
) -> Result<Option<BackendLine>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let wire = match serde_json::from_str::<WireLine>(trimmed) {
        Ok(parsed) => parsed,
        Err(e) if strict_mode => return Err(protocol_error(line_no, e.to_string())),
        Err(e) => {
            tracing::warn!("Skipping backend line {}: {}", line_no, e);
            return Ok(None);
        }
    };

    Ok(Some(match wire {
        WireLine::MethodCall(call) => BackendLine::MethodCall(call),
        WireLine::Players { players } => {
            BackendLine::Players(roster_from_wire(line_no, players, strict_mode)?)
        }
        WireLine::Error { message } => BackendLine::Error(message),
    }))
}

fn roster_from_wire(
    line_no: usize,
    players: HashMap<String, PlayerInfo>,
    strict_mode: bool,
) -> Result<PlayerRegistry> {
    let mut registry = PlayerRegistry::with_capacity(players.len());
    for (key, info) in players {
        match key.trim().parse::<i64>() {
            Ok(id) => {
                registry.insert(id, info);
            }
            Err(_) if strict_mode => {
                return Err(protocol_error(
                    line_no,
                    format!("player id {:?} is not an integer", key),
                ))
            }
            Err(_) => tracing::warn!("Skipping player with invalid id {:?}", key),
        }
    }
    Ok(registry)
}

/// Runs `<program> <args..> --version <v> [--strict]`, writes the payload to
/// its stdin and reads JSON lines from its stdout.
pub struct ExternalPlayer {
    program: String,
    args: Vec<String>,
    version: ClientVersion,
    players: Option<PlayerRegistry>,
}

impl ExternalPlayer {
    pub fn new(program: String, args: Vec<String>, version: ClientVersion) -> Self {
        Self {
            program,
            args,
            version,
            players: None,
        }
    }

    /// Returns the number of handler invocations.
    fn consume<R: BufRead>(
        &mut self,
        mut reader: R,
        strict_mode: bool,
        events: &mut EventRegistry,
    ) -> Result<usize> {
        let mut buf = Vec::new();
        let mut line_no = 0usize;
        let mut dispatched = 0usize;
        loop {
            buf.clear();
            if reader.read_until(b'\n', &mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = match std::str::from_utf8(&buf) {
                Ok(line) => line,
                Err(e) if strict_mode => {
                    return Err(protocol_error(line_no, format!("invalid UTF-8: {}", e)))
                }
                Err(e) => {
                    tracing::warn!("Skipping backend line {}: invalid UTF-8: {}", line_no, e);
                    continue;
                }
            };
            match parse_backend_line(line_no, line, strict_mode)? {
                Some(BackendLine::MethodCall(call)) => {
                    dispatched += events.dispatch(&call);
                }
                Some(BackendLine::Players(players)) => {
                    tracing::debug!("Backend reported {} players", players.len());
                    self.players = Some(players);
                }
                Some(BackendLine::Error(message)) => return Err(ChatError::Playback(message)),
                None => {}
            }
        }
        tracing::debug!("Dispatched {} method calls to subscribers", dispatched);
        Ok(dispatched)
    }
}

impl BattlePlayer for ExternalPlayer {
    fn play(
        &mut self,
        payload: &[u8],
        strict_mode: bool,
        events: &mut EventRegistry,
    ) -> Result<()> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .arg("--version")
            .arg(self.version.to_string());
        if strict_mode {
            command.arg("--strict");
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|source| ChatError::BackendSpawn {
            program: self.program.clone(),
            source,
        })?;
        let (mut stdin, stdout, mut stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(i), Some(o), Some(e)) => (i, o, e),
                _ => {
                    let _ = child.kill();
                    return Err(ChatError::Io(std::io::Error::other(
                        "backend pipes were not captured",
                    )));
                }
            };

        let (outcome, stderr_text) = std::thread::scope(|scope| {
            let writer = scope.spawn(move || {
                let result = stdin.write_all(payload);
                drop(stdin);
                result
            });
            let stderr_reader = scope.spawn(move || {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf);
                buf
            });

            let outcome = self.consume(BufReader::new(stdout), strict_mode, events);
            if outcome.is_err() {
                let _ = child.kill();
            }

            match writer.join() {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    tracing::warn!("Failed to write payload to backend: {}", e);
                }
                Ok(Err(_)) => {
                    tracing::debug!("Backend closed stdin before reading the full payload")
                }
                _ => {}
            }
            (outcome, stderr_reader.join().unwrap_or_default())
        });

        let status = child.wait()?;
        outcome?;
        if !status.success() {
            return Err(ChatError::BackendFailed {
                status: status.to_string(),
                stderr: stderr_tail(&stderr_text),
            });
        }
        Ok(())
    }

    fn players_info(&self) -> Option<&PlayerRegistry> {
        self.players.as_ref()
    }
}

fn stderr_tail(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Creates `ExternalPlayer`s for one configured backend command
#[derive(Debug, Clone)]
pub struct ExternalPlayerFactory {
    pub program: String,
    pub args: Vec<String>,
}

impl PlayerFactory for ExternalPlayerFactory {
    fn create(&self, version: &ClientVersion) -> Result<Box<dyn BattlePlayer>> {
        Ok(Box::new(ExternalPlayer::new(
            self.program.clone(),
            self.args.clone(),
            version.clone(),
        )))
    }
}
