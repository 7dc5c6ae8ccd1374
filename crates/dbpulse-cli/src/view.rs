//! Text rendering of status snapshots.

use chrono::{DateTime, Local, Utc};
use colored::{ColoredString, Colorize};

use dbpulse::{Status, StatusSnapshot};

/// Errors longer than this are cut in the one-line view.
const ERROR_PREVIEW_CHARS: usize = 35;

pub fn indicator_label(status: Status) -> &'static str {
    match status {
        Status::Connected => "ONLINE",
        Status::Disconnected => "OFFLINE",
        Status::Reconnecting => "RECONNECTING",
        Status::Unknown => "CHECKING",
    }
}

fn painted_label(status: Status) -> ColoredString {
    let label = indicator_label(status);
    match status {
        Status::Connected => label.green().bold(),
        Status::Disconnected => label.red().bold(),
        Status::Reconnecting => label.yellow().bold(),
        Status::Unknown => label.dimmed(),
    }
}

fn detail_status(status: Status) -> &'static str {
    match status {
        Status::Connected => "Connected",
        Status::Disconnected => "Disconnected",
        Status::Reconnecting => "Reconnecting...",
        Status::Unknown => "Unknown",
    }
}

/// Cut `text` to at most `max` characters, appending `...` when cut.
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

pub fn format_clock(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local).format("%H:%M:%S").to_string()
}

pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

/// One-line summary: label, last check time, and error preview or
/// an all-clear note.
pub fn status_line(snapshot: &StatusSnapshot) -> String {
    let mut line = format!("[{}]", painted_label(snapshot.status));

    if let Some(time) = snapshot.last_ping_time {
        line.push_str(&format!(" Last Check: {}", format_clock(time)));
    }

    if let Some(error) = &snapshot.last_error {
        let preview = truncate(&format!("Error: {error}"), ERROR_PREVIEW_CHARS);
        line.push_str(&format!(" | {}", preview.red()));
    } else if snapshot.status == Status::Connected {
        line.push_str(&format!(" | {}", "All systems operational".green()));
    }

    if snapshot.needs_manual_reconnect() {
        line.push_str(&format!(" | {}", "press r to reconnect".yellow()));
    }

    line
}

/// Multi-line detail view.
pub fn detail_lines(snapshot: &StatusSnapshot, target: &str) -> Vec<String> {
    let mut lines = vec![
        "Connection Details".bold().to_string(),
        format!("Connection Status: {}", detail_status(snapshot.status)),
        format!("Target: {}", target.cyan()),
    ];

    if let Some(time) = snapshot.last_ping_time {
        lines.push(format!("Last Ping: {}", format_timestamp(time)));
    }
    if let Some(time) = snapshot.last_reconnect_time {
        lines.push(format!("Last Reconnect: {}", format_timestamp(time)));
    }

    if let Some(error) = &snapshot.last_error {
        lines.push(format!("{} {}", "Error Details:".red(), error));
    } else if snapshot.status == Status::Connected {
        lines.push("All systems operational".green().to_string());
    }

    if snapshot.needs_manual_reconnect() {
        lines.push(
            "All reconnection attempts failed. Enter r to try again."
                .yellow()
                .to_string(),
        );
    }

    lines
}
