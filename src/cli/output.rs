//! Output formatting utilities for the CLI.

use comfy_table::{presets, Cell, CellAlignment, ContentArrangement, Table};
use serde::Serialize;

use crate::services::StatusSummary;

pub trait CommandOutput: Serialize {
    fn to_human(&self) -> String;

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

pub fn output<T: CommandOutput>(result: &T, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&result.to_json()).unwrap_or_default()
        );
    } else {
        println!("{}", result.to_human());
    }
}

/// Truncate a string to a maximum length, appending "..." if truncated.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

/// Borderless table with upper-cased headers.
pub fn list_table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::NOTHING)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(
            headers
                .iter()
                .map(|h| Cell::new(h.to_uppercase()).set_alignment(CellAlignment::Left)),
        );
    table
}

/// Per-state counts, skipping empty states.
pub fn summary_table(summary: &StatusSummary) -> String {
    let mut table = list_table(&["state", "count"]);
    for row in summary.counts.iter().filter(|c| c.count > 0) {
        table.add_row(vec![
            Cell::new(row.state.as_str()),
            Cell::new(row.count).set_alignment(CellAlignment::Right),
        ]);
    }
    format!(
        "{} task(s)\n{table}",
        console::style(summary.total).bold()
    )
}

/// Bulleted list of names under a heading, or nothing when empty.
pub fn name_list(heading: &str, names: &[String], limit: usize) -> Option<String> {
    if names.is_empty() {
        return None;
    }
    let mut lines = vec![format!("{heading} ({}):", names.len())];
    lines.extend(names.iter().take(limit).map(|n| format!("  {n}")));
    if names.len() > limit {
        lines.push(format!("  ... and {} more", names.len() - limit));
    }
    Some(lines.join("\n"))
}
