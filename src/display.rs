//! Colored CLI display utilities for bus events.
//!
//! This module provides functions for printing colored, formatted output
//! to the terminal while processes are supervised.

use std::io::{self, Write};

use chrono::Utc;
use owo_colors::OwoColorize;

use crate::bus::{Event, ExitReason};
use crate::process::StreamKind;
use crate::sniffer::DetectedUrl;
use crate::supervisor::{ProcessId, ServerInfo};

/// Get current timestamp in the same format as tracing.
fn timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Maximum length for truncated display strings.
const DEFAULT_MAX_LEN: usize = 200;

/// Truncate a string to a maximum number of characters, adding ellipsis if
/// truncated.
#[must_use]
pub fn truncate(s: &str, max_len: usize, raw_mode: bool) -> String {
    if raw_mode || s.chars().count() <= max_len {
        return s.to_string();
    }
    if max_len <= 3 {
        return "...".to_string();
    }
    let kept: String = s.chars().take(max_len - 3).collect();
    format!("{kept}...")
}

/// First block of a process id, enough to tell processes apart on screen.
#[must_use]
pub fn short_id(id: ProcessId) -> String {
    id.to_string().chars().take(8).collect()
}

/// Bracketed label for an event.
#[must_use]
pub fn event_label(event: &Event) -> &'static str {
    match event {
        Event::Started { .. } => "[STARTED]",
        Event::Stopped { .. } => "[STOPPED]",
        Event::Output(output) => match output.stream {
            StreamKind::Stdout => "[OUT]",
            StreamKind::Stderr => "[ERR]",
        },
        Event::Error { .. } => "[ERROR]",
        Event::Status { .. } => "[STATUS]",
        Event::Restarted { .. } => "[RESTART]",
        Event::InfoUpdated { .. } => "[INFO]",
        Event::RequestStatus { .. } | Event::RequestRestart { .. } | Event::ClearLogs { .. } => {
            "[CONTROL]"
        }
    }
}

fn describe_process(process: &ServerInfo) -> String {
    match &process.server_url {
        Some(url) => format!("{} ({}) {url}", process.name, process.status),
        None => format!("{} ({})", process.name, process.status),
    }
}

/// Plain-text body of an event line, without timestamp or label.
#[must_use]
pub fn describe_event(event: &Event, raw_mode: bool) -> String {
    match event {
        Event::Started { process } => {
            let pid = process.pid.map_or(String::new(), |pid| format!(" pid={pid}"));
            format!("{}{pid}", describe_process(process))
        }
        Event::Stopped {
            exit_code,
            reason,
            process,
            ..
        } => {
            let code = exit_code.map_or_else(|| "none".to_string(), |code| code.to_string());
            let reason = match reason {
                ExitReason::Exited => "exited",
                ExitReason::Stopped => "stopped",
                ExitReason::Restarted => "restarting",
            };
            format!("{} {reason} exit_code={code}", process.name)
        }
        Event::Output(output) => truncate(&output.chunk, DEFAULT_MAX_LEN, raw_mode),
        Event::Error { message, .. } => truncate(message, DEFAULT_MAX_LEN, raw_mode),
        Event::Status { process, logs } => match logs {
            Some(logs) => format!("{} logs={}", describe_process(process), logs.len()),
            None => describe_process(process),
        },
        Event::Restarted {
            old_command,
            new_command,
            ..
        } if old_command != new_command => format!("{old_command} -> {new_command}"),
        Event::Restarted { new_command, .. } => new_command.clone(),
        Event::InfoUpdated { process, .. } => describe_process(process),
        Event::RequestStatus { .. } => "status requested".to_string(),
        Event::RequestRestart { new_command, .. } => match new_command {
            Some(command) => format!("restart requested: {command}"),
            None => "restart requested".to_string(),
        },
        Event::ClearLogs { .. } => "clear logs requested".to_string(),
    }
}

/// Print one bus event.
pub fn print_event(event: &Event, raw_mode: bool) {
    let ts = timestamp();
    let label = event_label(event);
    let id = event
        .process_id()
        .map_or_else(|| "--------".to_string(), short_id);
    let body = describe_event(event, raw_mode);

    match event {
        Event::Started { .. } | Event::Restarted { .. } => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.green().bold(),
            id.dimmed(),
            body
        ),
        Event::Stopped {
            exit_code: Some(code),
            ..
        } if *code != 0 => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.red().bold(),
            id.dimmed(),
            body
        ),
        Event::Stopped { .. } => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.blue().bold(),
            id.dimmed(),
            body
        ),
        Event::Output(output) if output.stream == StreamKind::Stderr => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.yellow().bold(),
            id.dimmed(),
            body
        ),
        Event::Output(_) => println!("{} {} {} {}", ts.dimmed(), label.dimmed(), id.dimmed(), body),
        Event::Error { .. } => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.red().bold(),
            id.dimmed(),
            body.red()
        ),
        _ => println!(
            "{} {} {} {}",
            ts.dimmed(),
            label.cyan().bold(),
            id.dimmed(),
            body
        ),
    }
    let _ = io::stdout().flush();
}

/// Print one bus event as a JSON line.
pub fn print_event_json(event: &Event) {
    match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
    }
    let _ = io::stdout().flush();
}

/// Print a URL found by `devrunner sniff`.
pub fn print_detected_url(detected: &DetectedUrl) {
    println!(
        "{} {} {} {}",
        timestamp().dimmed(),
        "[URL]".magenta().bold(),
        detected.url.cyan(),
        format!("host={} port={}", detected.host, detected.port).dimmed()
    );
    let _ = io::stdout().flush();
}

/// Print an error message.
pub fn print_error(message: &str) {
    println!("{} {}", "[ERROR]".red().bold(), message);
    let _ = io::stdout().flush();
}
