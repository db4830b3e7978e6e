//! Plain-text rendering for command output.

use std::collections::BTreeMap;

use crate::api::{Properties, PropertyValue};

pub static INTRODUCTION: [(&str, &str); 4] = [
    ("Step 1: bothub configure", "-- Configure account credential"),
    (
        "Step 2: bothub new",
        "-- Create a minimum bot project in https://app.bothub.studio/ and clone to your local machine.",
    ),
    (
        "Step 3: bothub test",
        "-- goto your new project directory and run `bothub test`",
    ),
    (
        "Step 4: bothub deploy",
        "-- change some code in bot.py then run `bothub deploy` to https://app.bothub.studio/",
    ),
];

/// Guide steps from `start` on.
pub fn introduction(start: usize) -> &'static [(&'static str, &'static str)] {
    INTRODUCTION.get(start..).unwrap_or_default()
}

/// ASCII table with a separator under the header row.
pub fn table(header: &[&str], rows: &[Vec<String>]) -> String {
    let columns = header
        .len()
        .max(rows.iter().map(Vec::len).max().unwrap_or(0));
    let mut widths = vec![0usize; columns];
    let header_row: Vec<String> = header.iter().map(|cell| cell.to_string()).collect();
    for row in std::iter::once(&header_row).chain(rows) {
        for (idx, cell) in row.iter().enumerate() {
            widths[idx] = widths[idx].max(cell.chars().count());
        }
    }

    let border = {
        let mut line = String::from("+");
        for width in &widths {
            line.push_str(&"-".repeat(width + 2));
            line.push('+');
        }
        line
    };
    let render_row = |row: &[String]| {
        let mut line = String::from("|");
        for (idx, width) in widths.iter().enumerate() {
            let cell = row.get(idx).map(String::as_str).unwrap_or("");
            let pad = width - cell.chars().count();
            line.push(' ');
            line.push_str(cell);
            line.push_str(&" ".repeat(pad + 1));
            line.push('|');
        }
        line
    };

    let mut lines = vec![border.clone(), render_row(header_row.as_slice()), border.clone()];
    lines.extend(rows.iter().map(|row| render_row(row.as_slice())));
    lines.push(border);
    lines.join("\n")
}

pub fn property_rows(properties: &Properties) -> Vec<Vec<String>> {
    properties
        .iter()
        .map(|(key, value)| vec![key.clone(), value.to_string()])
        .collect()
}

/// `key: value` lines with the keys padded to a common width.
pub fn key_values(map: &BTreeMap<String, PropertyValue>) -> String {
    let width = map.keys().map(|key| key.chars().count()).max().unwrap_or(0) + 3;
    map.iter()
        .map(|(key, value)| format!("{key:<width$}: {value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Output for `property get`: objects expand to one line per key.
pub fn property_value(key: &str, value: &PropertyValue) -> String {
    match value.as_object() {
        Some(map) if !map.is_empty() => key_values(map),
        _ => format!("{key}: {value}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn project_table() {
        let rows = vec![
            vec!["myfirstbot".to_string(), "online".to_string(), "2017-08-01".to_string()],
            vec!["bot2".to_string(), "deploying".to_string(), String::new()],
        ];
        insta::assert_snapshot!(table(&["Project", "Status", "Created"], &rows), @r"
        +------------+-----------+------------+
        | Project    | Status    | Created    |
        +------------+-----------+------------+
        | myfirstbot | online    | 2017-08-01 |
        | bot2       | deploying |            |
        +------------+-----------+------------+
        ");
    }

    #[test]
    fn empty_table_keeps_header() {
        insta::assert_snapshot!(table(&["Channel"], &[]), @r"
        +---------+
        | Channel |
        +---------+
        +---------+
        ");
    }

    #[test]
    fn property_listing() {
        let value = PropertyValue::from(json!({"name": "bot", "greeting": {"en": "hi"}, "n": 1}));
        insta::assert_snapshot!(property_value("config", &value), @r#"
        greeting   : {"en":"hi"}
        n          : 1
        name       : bot
        "#);
        assert_eq!(
            property_value("greeting", &PropertyValue::String("hi".into())),
            "greeting: hi"
        );
    }

    #[test]
    fn introduction_starts_at_step() {
        assert_eq!(introduction(0).len(), 4);
        assert_eq!(introduction(3)[0].0, "Step 4: bothub deploy");
        assert!(introduction(9).is_empty());
    }
}
