// Output format auto-detection for the CLI.
//
// TTY → human-readable text. Piped/redirected → one JSON object per line.
// `--json` forces JSON output regardless of terminal.

use std::collections::HashSet;
use std::io::{self, IsTerminal, Write};

use nomad_common::types::{Entry, EntryId, Incident, IncidentType, Message, Ownership, RoomId};
use serde::Serialize;

const ANSI_RED: &str = "\x1b[31m";
const ANSI_YELLOW: &str = "\x1b[33m";
const ANSI_DIM: &str = "\x1b[2m";
const ANSI_RESET: &str = "\x1b[0m";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Human,
    Json,
}

impl OutputFormat {
    /// JSON if `--json` was passed or stdout is not a TTY.
    pub fn detect(json_flag: bool) -> Self {
        if json_flag {
            return Self::Json;
        }
        Self::detect_from_terminal(io::stdout().is_terminal())
    }

    pub fn detect_from_terminal(is_tty: bool) -> Self {
        if is_tty {
            Self::Human
        } else {
            Self::Json
        }
    }
}

pub fn print_output<T, F>(format: OutputFormat, value: &T, human_fn: F) -> io::Result<()>
where
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    write_output(&mut io::stdout().lock(), format, value, human_fn)
}

/// Write a value to a provided writer (useful for testing).
pub fn write_output<W, T, F>(
    writer: &mut W,
    format: OutputFormat,
    value: &T,
    human_fn: F,
) -> io::Result<()>
where
    W: Write,
    T: Serialize,
    F: FnOnce(&T) -> String,
{
    match format {
        OutputFormat::Human => writeln!(writer, "{}", human_fn(value)),
        OutputFormat::Json => {
            serde_json::to_writer(&mut *writer, value).map_err(io::Error::other)?;
            writeln!(writer)
        }
    }
}

pub fn print_error(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "error", code, message, ANSI_RED);
}

pub fn print_warning(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "warning", code, message, ANSI_YELLOW);
}

/// Connection status lines go to stderr so stdout stays a clean entry stream.
pub fn print_status(format: OutputFormat, code: &str, message: &str) {
    print_stderr(format, "status", code, message, ANSI_DIM);
}

fn print_stderr(format: OutputFormat, label: &str, code: &str, message: &str, color: &str) {
    let mut err = io::stderr().lock();
    match format {
        OutputFormat::Human => {
            let line = render_human_stderr_line(label, message, io::stderr().is_terminal(), color);
            let _ = writeln!(err, "{line}");
        }
        OutputFormat::Json => {
            let obj = serde_json::json!({ label: { "code": code, "message": message } });
            let _ = serde_json::to_writer(&mut err, &obj);
            let _ = writeln!(err);
        }
    }
}

pub fn print_anyhow_error(format: OutputFormat, error: &anyhow::Error) {
    let (code, message) = actionable_error(error);
    print_error(format, code, &message);
}

fn actionable_error(error: &anyhow::Error) -> (&'static str, String) {
    let message = format!("{error:#}");
    let lower = message.to_ascii_lowercase();

    if lower.contains("plaintext is allowed only for localhost") {
        return (
            "INSECURE_ENDPOINT",
            format!("{message}. Use wss:// or https:// in ~/.nomad/config.toml"),
        );
    }

    if lower.contains("config parse error") || lower.contains("config i/o error") {
        return ("CONFIG_INVALID", format!("{message}. Run: nomad config init to start over"));
    }

    if lower.contains("invalid") && lower.contains("endpoints.") {
        return ("CONFIG_INVALID", message);
    }

    ("ERROR", message)
}

fn render_human_stderr_line(label: &str, message: &str, is_tty: bool, color: &str) -> String {
    if is_tty {
        format!("{color}{label}:{ANSI_RESET} {message}")
    } else {
        format!("{label}: {message}")
    }
}

// ── Entries ─────────────────────────────────────────────────────────

pub fn render_entry(entry: &Entry) -> String {
    match entry {
        Entry::Message(message) => render_message(message),
        Entry::Incident(incident) => render_incident(incident),
    }
}

fn render_message(message: &Message) -> String {
    let author = match message.ownership {
        Ownership::Own => format!("{} (you)", message.user_name),
        Ownership::Other => message.user_name.clone(),
    };
    with_time_label(message.created_at.label(), format!("{author}: {}", message.text))
}

fn render_incident(incident: &Incident) -> String {
    let mut line = format!("{} {}", incident_label(incident.incident_type), incident.description);
    if let (Some(latitude), Some(longitude)) = (incident.latitude, incident.longitude) {
        line.push_str(&format!(" ({latitude:.4}, {longitude:.4})"));
    }
    with_time_label(incident.reported_at.label(), line)
}

fn with_time_label(label: String, body: String) -> String {
    if label.is_empty() {
        body
    } else {
        format!("[{label}] {body}")
    }
}

pub fn incident_label(incident_type: IncidentType) -> &'static str {
    match incident_type {
        IncidentType::PowerCut => "POWER CUT",
        IncidentType::TrafficJam => "TRAFFIC JAM",
        IncidentType::SafetyIssue => "SAFETY ISSUE",
        IncidentType::Other => "OTHER",
    }
}

/// Prints each timeline entry once, however often the view is republished.
pub struct EntryPrinter {
    format: OutputFormat,
    room_id: Option<RoomId>,
    printed: HashSet<EntryId>,
}

impl EntryPrinter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, room_id: None, printed: HashSet::new() }
    }

    /// Track the room the view currently shows. Entering a different room
    /// forgets what was printed, so ids reused across rooms print again.
    pub fn enter_room(&mut self, room_id: Option<&RoomId>) {
        if self.room_id.as_ref() != room_id {
            self.room_id = room_id.cloned();
            self.reset();
        }
    }

    pub fn print_new(&mut self, entries: &[Entry]) -> io::Result<()> {
        self.write_new(&mut io::stdout().lock(), entries)
    }

    pub fn write_new<W: Write>(&mut self, writer: &mut W, entries: &[Entry]) -> io::Result<()> {
        for entry in entries {
            if self.printed.insert(entry.id().clone()) {
                write_output(writer, self.format, entry, render_entry)?;
            }
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.printed.clear();
    }
}
