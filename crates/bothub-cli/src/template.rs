//! Starter project uploaded by `bothub init`.

use crate::error::Result;
use crate::package::pack_files;

pub const LANGUAGE: &str = "python3";
pub const ENTRY_POINT: &str = "python3 bothub/bot.py";
pub const DEPENDENCY_FILE: &str = "requirements.txt";

pub const BOT_SOURCE: &str = r#"# -*- coding: utf-8 -*-
"""Echo bot.

The console and the platform call this module once per event. The event and
its context arrive as one JSON line on stdin:

    {"event": {"trigger": "cli", "channel": "cli",
               "sender": {"id": "localuser", "name": "Local user"},
               "content": "<message content>", "raw_data": "..."},
     "context": {"project_id": 1, "nlu": {}, "properties": {}}}

Every line printed to stdout is one action:

    {"action": "send_message", "message": "...", "chat_id": null, "channel": null}
    {"action": "set_project_data", "data": {...}}
    {"action": "set_user_data", "data": {...}}
"""

import json
import sys


def handle_message(event, context):
    return [{"action": "send_message", "message": "Echo: {}".format(event["content"])}]


def main():
    request = json.loads(sys.stdin.readline())
    for action in handle_message(request["event"], request["context"]):
        print(json.dumps(action))


if __name__ == "__main__":
    main()
"#;

pub const REQUIREMENTS: &str = "";

pub fn files() -> Vec<(&'static str, &'static [u8])> {
    vec![
        ("bothub/__init__.py", b"".as_slice()),
        ("bothub/bot.py", BOT_SOURCE.as_bytes()),
        (DEPENDENCY_FILE, REQUIREMENTS.as_bytes()),
    ]
}

/// The starter project as a tar+gzip archive.
pub fn archive() -> Result<Vec<u8>> {
    pack_files(&files())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::package::extract_dist_bytes;
    use tempfile::tempdir;

    #[test]
    fn template_archive_contains_echo_bot() {
        let bytes = archive().unwrap();
        let target = tempdir().unwrap();
        extract_dist_bytes(&bytes, target.path()).unwrap();
        let bot = std::fs::read_to_string(target.path().join("bothub/bot.py")).unwrap();
        assert!(bot.contains("Echo: {}"));
        assert!(target.path().join("bothub/__init__.py").is_file());
        assert!(target.path().join(DEPENDENCY_FILE).is_file());
    }
}
