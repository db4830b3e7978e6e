//! Local chat session against the project's bot.
//!
//! Each input line becomes an [`Event`], goes to the [`BotHandler`], and the
//! returned actions are applied to the console channel and the cached
//! project storage. A failing handler is reported and the session goes on.

pub mod channel;
pub mod handler;
pub mod storage;

use std::io::Write;

use colored::Colorize;
use rustyline::{DefaultEditor, error::ReadlineError};
use serde_json::{Map, Value, json};
use tracing::{debug, warn};

use crate::api::{NluIntegration, Properties};
use crate::error::{CliError, Result};
pub use channel::ConsoleChannel;
pub use handler::{BotHandler, Event, HandlerAction, Location, ProcessHandler, Sender, load_handler};
pub use storage::{CONSOLE_CHANNEL, CONSOLE_USER, CachedStorage, HttpStorageClient, StorageClient};

pub const PROMPT: &str = "BotHub> ";

pub const HELP: &str = "\
/help                  show this message
/refresh               reload project properties from the server
/location <lat> <lon>  send a location event
/exit, /quit           leave the session";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopControl {
    Continue,
    Exit,
}

/// Build the event for one console line. `/location <lat> <lon>` carries a
/// location instead of text content.
pub fn make_event(line: &str) -> Result<Event> {
    let mut event = Event {
        trigger: CONSOLE_CHANNEL.into(),
        channel: CONSOLE_CHANNEL.into(),
        sender: Sender {
            id: CONSOLE_USER.into(),
            name: "Local user".into(),
        },
        raw_data: line.to_owned(),
        content: None,
        location: None,
    };

    if let Some(rest) = line.strip_prefix("/location") {
        let coords: Vec<&str> = rest.split_whitespace().collect();
        let [latitude, longitude] = coords.as_slice() else {
            return Err(CliError::InvalidValue(
                "usage: /location <latitude> <longitude>".into(),
            ));
        };
        let parse = |raw: &str| {
            raw.parse::<f64>()
                .map_err(|_| CliError::InvalidValue(format!("not a coordinate: {raw}")))
        };
        event.location = Some(Location {
            latitude: parse(*latitude)?,
            longitude: parse(*longitude)?,
        });
    } else if !line.is_empty() {
        event.content = Some(line.to_owned());
    }
    Ok(event)
}

/// `{project_id, nlu: {<name>: credentials}, properties, user_data}`.
pub fn build_context(
    project_id: i64,
    nlus: &[NluIntegration],
    properties: &Properties,
    user_data: Value,
) -> Value {
    let nlu: Map<String, Value> = nlus
        .iter()
        .map(|integration| (integration.nlu.clone(), integration.credentials.clone()))
        .collect();
    json!({
        "project_id": project_id,
        "nlu": nlu,
        "properties": properties,
        "user_data": user_data,
    })
}

pub struct TestConsole<H, S, W> {
    handler: H,
    storage: CachedStorage<S>,
    channel: ConsoleChannel<W>,
    project_id: i64,
    nlus: Vec<NluIntegration>,
}

impl<H, S, W> TestConsole<H, S, W>
where
    H: BotHandler,
    S: StorageClient,
    W: Write,
{
    pub fn new(
        handler: H,
        storage: CachedStorage<S>,
        channel: ConsoleChannel<W>,
        project_id: i64,
        nlus: Vec<NluIntegration>,
    ) -> Self {
        Self {
            handler,
            storage,
            channel,
            project_id,
            nlus,
        }
    }

    pub fn storage(&self) -> &CachedStorage<S> {
        &self.storage
    }

    pub fn into_channel(self) -> ConsoleChannel<W> {
        self.channel
    }

    /// Context for the next event. The console user's stored data is read
    /// fresh each time; a user with nothing stored yet gets `null`.
    pub fn context(&self) -> Result<Value> {
        let user_data = match self.storage.get_current_user_data(None) {
            Ok(data) => data,
            Err(CliError::NotFound(_)) => Value::Null,
            Err(err) => return Err(err),
        };
        Ok(build_context(
            self.project_id,
            &self.nlus,
            self.storage.project_data(),
            user_data,
        ))
    }

    /// Handle one input line. Only I/O failures on the console itself are
    /// returned; everything else is printed and the loop continues.
    pub fn process_line(&mut self, line: &str) -> Result<LoopControl> {
        let line = line.trim();
        match line {
            "" => return Ok(LoopControl::Continue),
            "/exit" | "/quit" => return Ok(LoopControl::Exit),
            "/help" => {
                self.channel.println(HELP)?;
                return Ok(LoopControl::Continue);
            }
            "/refresh" => {
                match self.storage.load_project_data().map(|properties| properties.len()) {
                    Ok(count) => {
                        self.channel
                            .println(&format!("Reloaded {count} properties"))?;
                    }
                    Err(err) => self.report(&err)?,
                }
                return Ok(LoopControl::Continue);
            }
            _ => {}
        }

        let event = match make_event(line) {
            Ok(event) => event,
            Err(err) => {
                self.report(&err)?;
                return Ok(LoopControl::Continue);
            }
        };
        if let Err(err) = self.dispatch(&event) {
            warn!(%err, "bot handler failed");
            self.report(&err)?;
        }
        Ok(LoopControl::Continue)
    }

    fn dispatch(&mut self, event: &Event) -> Result<()> {
        let context = self.context()?;
        let actions = self.handler.handle(event, &context)?;
        debug!(actions = actions.len(), "dispatching handler actions");
        for action in actions {
            match action {
                HandlerAction::SendMessage {
                    message,
                    chat_id,
                    channel,
                } => {
                    let chat_id = chat_id.unwrap_or_else(|| event.sender.id.clone());
                    self.channel
                        .send_message(&chat_id, &message, channel.as_deref())?;
                }
                HandlerAction::SetProjectData { data } => {
                    let data: Properties = data
                        .into_iter()
                        .map(|(key, value)| (key, value.into()))
                        .collect();
                    self.storage.set_project_data(data);
                }
                HandlerAction::SetUserData { data } => {
                    self.storage.set_current_user_data(&data)?;
                }
            }
        }
        self.storage.store_project_data()
    }

    fn report(&mut self, err: &CliError) -> Result<()> {
        self.channel
            .println(&format!("{}: {err}", err.kind()).red().to_string())
    }

    /// Feed lines until one of them asks to exit.
    pub fn run_lines<I, L>(&mut self, lines: I) -> Result<()>
    where
        I: IntoIterator<Item = L>,
        L: AsRef<str>,
    {
        for line in lines {
            if self.process_line(line.as_ref())? == LoopControl::Exit {
                break;
            }
        }
        Ok(())
    }

    /// Interactive loop with line editing. Ctrl-C and Ctrl-D end the session.
    pub fn run_interactive(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new()
            .map_err(|err| CliError::Client(format!("failed to initialize readline: {err}")))?;
        loop {
            match editor.readline(PROMPT) {
                Ok(line) => {
                    if !line.trim().is_empty() {
                        let _ = editor.add_history_entry(line.as_str());
                    }
                    if self.process_line(&line)? == LoopControl::Exit {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => {
                    return Err(CliError::Client(format!("failed to read input: {err}")));
                }
            }
        }
        Ok(())
    }
}
