//! The user's bot, seen from the console as a capability that turns one
//! event into a list of actions.

use std::{
    io::{self, Write},
    path::{Path, PathBuf},
    process::{Command, Stdio},
    thread,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{CliError, Result};

pub const DEFAULT_ENTRY_POINT: &str = "bothub/bot";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

/// Synthetic input event handed to the bot for every console line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub trigger: String,
    pub channel: String,
    pub sender: Sender,
    pub raw_data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum HandlerAction {
    SendMessage {
        message: String,
        #[serde(default)]
        chat_id: Option<String>,
        #[serde(default)]
        channel: Option<String>,
    },
    SetProjectData {
        data: Map<String, Value>,
    },
    SetUserData {
        data: Map<String, Value>,
    },
}

pub trait BotHandler {
    fn handle(&mut self, event: &Event, context: &Value) -> Result<Vec<HandlerAction>>;
}

/// Runs the entry point once per event: one JSON request line on stdin,
/// one action per stdout line. Plain text lines are messages to the sender.
#[derive(Debug, Clone)]
pub struct ProcessHandler {
    program: PathBuf,
    args: Vec<String>,
    working_dir: PathBuf,
}

impl ProcessHandler {
    pub fn new(program: PathBuf, args: Vec<String>, working_dir: PathBuf) -> Self {
        Self {
            program,
            args,
            working_dir,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

pub fn parse_actions(stdout: &str) -> Vec<HandlerAction> {
    stdout
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.trim().is_empty())
        .map(|line| {
            serde_json::from_str::<HandlerAction>(line).unwrap_or_else(|_| {
                HandlerAction::SendMessage {
                    message: line.to_owned(),
                    chat_id: None,
                    channel: None,
                }
            })
        })
        .collect()
}

impl BotHandler for ProcessHandler {
    fn handle(&mut self, event: &Event, context: &Value) -> Result<Vec<HandlerAction>> {
        let request = json!({ "event": event, "context": context });
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| CliError::io(&self.program, err))?;

        // stdin is fed from a scoped thread while stdout drains here.
        let stdin = child.stdin.take();
        let line = format!("{request}\n");
        let (written, output) = thread::scope(|scope| {
            let writer = scope.spawn(move || -> io::Result<()> {
                if let Some(mut stdin) = stdin {
                    stdin.write_all(line.as_bytes())?;
                }
                Ok(())
            });
            let output = child.wait_with_output();
            (writer.join(), output)
        });
        let output = output.map_err(|err| CliError::io(&self.program, err))?;
        match written {
            Ok(Ok(())) => {}
            Ok(Err(err)) => debug!(%err, "bot handler did not read the whole request"),
            Err(_) => {
                return Err(CliError::HandlerFailed(
                    "request writer thread panicked".into(),
                ));
            }
        }
        if !output.status.success() {
            return Err(CliError::HandlerFailed(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let actions = parse_actions(&stdout);
        debug!(count = actions.len(), "handler returned actions");
        Ok(actions)
    }
}

/// Resolve the entry point command line. Paths containing a separator are
/// taken relative to the project directory; bare names go through `PATH`.
pub fn load_handler(project_dir: &Path, entry_point: Option<&str>) -> Result<ProcessHandler> {
    let command = entry_point
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .unwrap_or(DEFAULT_ENTRY_POINT);
    let mut parts = command.split_whitespace().map(str::to_owned);
    let Some(program) = parts.next() else {
        return Err(CliError::ModuleLoad("entry point is empty".into()));
    };
    let args: Vec<String> = parts.collect();

    let program_path = if program.contains('/') || program.contains('\\') {
        let candidate = project_dir.join(&program);
        if !candidate.is_file() {
            return Err(CliError::ModuleLoad(format!(
                "{} not found. Is this a bothub project directory?",
                candidate.display()
            )));
        }
        candidate
    } else {
        which::which(&program)
            .map_err(|err| CliError::ModuleLoad(format!("{program}: {err}")))?
    };

    debug!(program = %program_path.display(), ?args, "bot handler resolved");
    Ok(ProcessHandler::new(
        program_path,
        args,
        project_dir.to_path_buf(),
    ))
}
