// Live channel frames: JSON text messages discriminated by `type`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::time::{normalize, Timestamp};
use crate::types::{
    EntryId, Incident, IncidentType, LocalIdentity, Message, Ownership, RoomId,
};

/// Errors decoding or converting a frame. Always recovered locally.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame is missing required field `{0}`")]
    MissingField(&'static str),
}

// ── Outbound ────────────────────────────────────────────────────────

/// Client -> server frames.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundFrame {
    /// Sent exactly once after every successful open.
    #[serde(rename_all = "camelCase")]
    Join { room_id: RoomId, user_id: String, user_name: String },

    /// A composed chat message. The server echoes it back on the stream.
    #[serde(rename_all = "camelCase")]
    Message { room_id: RoomId, user_id: String, user_name: String, message: String },
}

impl OutboundFrame {
    pub fn join(room_id: &RoomId, identity: &LocalIdentity) -> Self {
        Self::Join {
            room_id: room_id.clone(),
            user_id: identity.id.clone(),
            user_name: identity.name.clone(),
        }
    }

    pub fn message(room_id: &RoomId, identity: &LocalIdentity, text: &str) -> Self {
        Self::Message {
            room_id: room_id.clone(),
            user_id: identity.id.clone(),
            user_name: identity.name.clone(),
            message: text.to_string(),
        }
    }

    pub fn encode(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Server -> client frames. Unknown kinds decode to `Unknown` so the caller
/// can log and drop them.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    Message(MessagePayload),
    NewIncident(IncidentPayload),
    #[serde(other)]
    Unknown,
}

impl InboundFrame {
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text)?)
    }
}

/// Message payloads arrive wrapped in `data` or flattened into the frame.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum MessagePayload {
    Wrapped { data: WireMessage },
    Flat(WireMessage),
}

impl MessagePayload {
    pub fn into_wire(self) -> WireMessage {
        match self {
            Self::Wrapped { data } | Self::Flat(data) => data,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum IncidentPayload {
    Wrapped { data: WireIncident },
    Flat(WireIncident),
}

impl IncidentPayload {
    pub fn into_wire(self) -> WireIncident {
        match self {
            Self::Wrapped { data } | Self::Flat(data) => data,
        }
    }
}

/// Entry ids are strings or numbers on the wire.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum WireId {
    Text(String),
    Number(serde_json::Number),
}

impl From<WireId> for EntryId {
    fn from(value: WireId) -> Self {
        match value {
            WireId::Text(text) => EntryId::new(text),
            WireId::Number(number) => EntryId::new(number.to_string()),
        }
    }
}

/// A chat record as served by the live channel and the history endpoints.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WireMessage {
    pub message_id: Option<WireId>,
    #[serde(alias = "cityId", alias = "meetupId")]
    pub room_id: Option<String>,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub message: Option<String>,
    pub created_at: Option<Value>,
    /// Meetup records carry their instant here instead of `createdAt`.
    pub timestamp: Option<Value>,
}

impl WireMessage {
    /// Convert into the canonical shape. `fallback_time` applies when the
    /// record has no instant at all (live frames use the receive time).
    pub fn into_message(
        self,
        room_id: &RoomId,
        local: &LocalIdentity,
        fallback_time: Timestamp,
    ) -> Result<Message, FrameError> {
        let text = self.message.ok_or(FrameError::MissingField("message"))?;
        let user_id = self.user_id.unwrap_or_default();
        let created_at = self
            .created_at
            .or(self.timestamp)
            .filter(|value| !value.is_null())
            .map_or(fallback_time, |value| normalize(&value));

        Ok(Message {
            id: self.message_id.map_or_else(EntryId::local, EntryId::from),
            room_id: room_id.clone(),
            ownership: Ownership::of(&user_id, local),
            user_id,
            user_name: self.user_name.unwrap_or_default(),
            text,
            created_at,
        })
    }
}

/// An incident record as served by the feed and `/api/incidents`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct WireIncident {
    #[serde(alias = "id")]
    pub incident_id: Option<WireId>,
    pub incident_type: Option<String>,
    pub description: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub reported_at: Option<Value>,
    pub reported_by: Option<String>,
}

impl WireIncident {
    pub fn into_incident(self, fallback_time: Timestamp) -> Result<Incident, FrameError> {
        let incident_type = self
            .incident_type
            .as_deref()
            .map(IncidentType::parse)
            .ok_or(FrameError::MissingField("incidentType"))?;
        let reported_at = self
            .reported_at
            .filter(|value| !value.is_null())
            .map_or(fallback_time, |value| normalize(&value));

        Ok(Incident {
            id: self.incident_id.map_or_else(EntryId::local, EntryId::from),
            incident_type,
            description: self.description.unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            reported_at,
            reported_by: self.reported_by,
        })
    }
}
