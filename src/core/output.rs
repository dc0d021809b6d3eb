//! Output rendering helpers shared by CLI handlers.
//!
//! Text output is for people and stays bounded; JSON output is for agents and is printed whole.

use crate::core::error::CohortError;
use crate::core::time;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("json") {
            OutputFormat::Json
        } else {
            OutputFormat::Text
        }
    }

    pub fn is_json(self) -> bool {
        self == OutputFormat::Json
    }
}

/// Pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CohortError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Collapse newlines/extra whitespace and bound length for terminal display.
pub fn compact_line(input: &str, max_chars: usize) -> String {
    let collapsed = input.split_whitespace().collect::<Vec<_>>().join(" ");
    let mut chars = collapsed.chars();
    let preview: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{}...", preview)
    } else {
        preview
    }
}

/// Up to `max_items` paths joined for a single table cell.
pub fn preview_paths(paths: &[String], max_items: usize) -> String {
    let shown = paths
        .iter()
        .take(max_items)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    if paths.len() > max_items {
        format!("{} (+{} more)", shown, paths.len() - max_items)
    } else {
        shown
    }
}

/// Age column, e.g. "3m ago".
pub fn age(ts: i64) -> String {
    format!("{} ago", time::format_age(ts, time::now_millis()))
}
