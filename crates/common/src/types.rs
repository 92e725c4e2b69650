// Core domain types shared across all nomad crates.

use std::fmt;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::time::Timestamp;

// ── Identifiers ─────────────────────────────────────────────────────

/// Logical scope that partitions messages: a city, a meetup, or the incident feed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Opaque entry identifier. The backend sends either strings or numbers;
/// both are kept in their string form so `7` and `"7"` compare equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Id for a live entry that arrived without one. Never collides with a
    /// server id, so such entries are never deduplicated.
    pub fn local() -> Self {
        Self(format!("local-{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

// ── Feeds ───────────────────────────────────────────────────────────

/// The three feature families that carry a live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feed {
    /// Per-city community chat.
    CityChat,
    /// Per-meetup event chat.
    MeetupChat,
    /// Live incident reports.
    Incidents,
}

impl Feed {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CityChat => "city_chat",
            Self::MeetupChat => "meetup_chat",
            Self::Incidents => "incidents",
        }
    }

    /// History endpoint path for a room, relative to the API base URL.
    pub fn history_path(self, room_id: &RoomId) -> String {
        format!("/{}", self.history_segments(room_id).join("/"))
    }

    /// The same path as unescaped segments, for URL builders.
    pub fn history_segments(self, room_id: &RoomId) -> Vec<&str> {
        match self {
            Self::CityChat => vec!["api", "cities", room_id.as_str(), "chat"],
            Self::MeetupChat => vec!["api", "chat", "history", room_id.as_str()],
            Self::Incidents => vec!["api", "incidents"],
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Participants ────────────────────────────────────────────────────

/// The local participant as announced in join and message frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    pub id: String,
    pub name: String,
}

/// Whether an entry was authored by the local participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ownership {
    Own,
    Other,
}

impl Ownership {
    pub fn of(author_id: &str, local: &LocalIdentity) -> Self {
        if author_id == local.id {
            Self::Own
        } else {
            Self::Other
        }
    }
}

// ── Entries ─────────────────────────────────────────────────────────

/// A chat message in canonical form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub id: EntryId,
    pub room_id: RoomId,
    pub user_id: String,
    pub user_name: String,
    pub text: String,
    pub created_at: Timestamp,
    pub ownership: Ownership,
}

/// Category of a reported incident. Unknown categories fold into `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    PowerCut,
    TrafficJam,
    SafetyIssue,
    Other,
}

impl IncidentType {
    pub fn parse(value: &str) -> Self {
        match value {
            "power_cut" => Self::PowerCut,
            "traffic_jam" => Self::TrafficJam,
            "safety_issue" => Self::SafetyIssue,
            _ => Self::Other,
        }
    }
}

/// An incident report from the live feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Incident {
    pub id: EntryId,
    pub incident_type: IncidentType,
    pub description: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reported_at: Timestamp,
    pub reported_by: Option<String>,
}

/// Any entry a room's timeline can hold.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entry {
    Message(Message),
    Incident(Incident),
}

impl Entry {
    pub fn id(&self) -> &EntryId {
        match self {
            Self::Message(message) => &message.id,
            Self::Incident(incident) => &incident.id,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Message(message) => message.created_at,
            Self::Incident(incident) => incident.reported_at,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Self::Message(message) => Some(message),
            Self::Incident(_) => None,
        }
    }

    pub fn as_incident(&self) -> Option<&Incident> {
        match self {
            Self::Incident(incident) => Some(incident),
            Self::Message(_) => None,
        }
    }
}

// ── Incident tally ──────────────────────────────────────────────────

/// Per-type incident counts for a single UTC day.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IncidentTally {
    pub power_cut: usize,
    pub traffic_jam: usize,
    pub safety_issue: usize,
    pub other: usize,
}

impl IncidentTally {
    /// Count incidents reported on `day`. Incidents with an invalid
    /// timestamp are never counted.
    pub fn for_day<'a>(incidents: impl IntoIterator<Item = &'a Incident>, day: NaiveDate) -> Self {
        let mut tally = Self::default();
        for incident in incidents {
            let Some(reported_at) = incident.reported_at.instant() else {
                continue;
            };
            if reported_at.date_naive() != day {
                continue;
            }
            match incident.incident_type {
                IncidentType::PowerCut => tally.power_cut += 1,
                IncidentType::TrafficJam => tally.traffic_jam += 1,
                IncidentType::SafetyIssue => tally.safety_issue += 1,
                IncidentType::Other => tally.other += 1,
            }
        }
        tally
    }

    pub fn today<'a>(incidents: impl IntoIterator<Item = &'a Incident>) -> Self {
        Self::for_day(incidents, Utc::now().date_naive())
    }

    pub fn total(&self) -> usize {
        self.power_cut + self.traffic_jam + self.safety_issue + self.other
    }
}
