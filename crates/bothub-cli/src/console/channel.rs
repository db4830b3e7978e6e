use std::io::Write;

use crate::error::{CliError, Result};

/// Prints bot output to the terminal in place of a messaging platform.
pub struct ConsoleChannel<W> {
    out: W,
}

impl<W: Write> ConsoleChannel<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn send_message(&mut self, chat_id: &str, message: &str, channel: Option<&str>) -> Result<()> {
        let line = match channel {
            Some(channel) => format!("[{channel}:{chat_id}] {message}"),
            None => message.to_owned(),
        };
        self.println(&line)
    }

    pub fn println(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{line}").map_err(|err| CliError::io("<console>", err))?;
        self.out
            .flush()
            .map_err(|err| CliError::io("<console>", err))
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_prefix_only_when_given() {
        let mut channel = ConsoleChannel::new(Vec::new());
        channel.send_message("localuser", "hello", None).unwrap();
        channel
            .send_message("12345", "hello", Some("telegram"))
            .unwrap();
        let out = String::from_utf8(channel.into_inner()).unwrap();
        assert_eq!(out, "hello\n[telegram:12345] hello\n");
    }
}
