// History reconciler: fetch a room's snapshot over REST and normalize it.
//
// Failures never propagate. The caller always gets a list, possibly empty,
// and the live channel carries on regardless.

use anyhow::{anyhow, bail, Context, Result};
use nomad_common::protocol::rest::HistoryEnvelope;
use nomad_common::protocol::ws::{WireIncident, WireMessage};
use nomad_common::time::Timestamp;
use nomad_common::types::{Entry, Feed, LocalIdentity, RoomId};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// A snapshot request for one room.
#[derive(Debug, Clone)]
pub struct HistoryRequest {
    pub feed: Feed,
    pub room_id: RoomId,
    pub identity: LocalIdentity,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct HistoryClient {
    http: reqwest::Client,
    api_base: Url,
}

impl HistoryClient {
    pub fn new(api_base: Url) -> Self {
        Self { http: reqwest::Client::new(), api_base }
    }

    pub fn with_client(http: reqwest::Client, api_base: Url) -> Self {
        Self { http, api_base }
    }

    /// Fetch and normalize the snapshot. Any failure yields an empty list.
    pub async fn fetch(&self, request: &HistoryRequest) -> Vec<Entry> {
        match self.try_fetch(request).await {
            Ok(entries) => {
                debug!(feed = %request.feed, room_id = %request.room_id, count = entries.len(), "history loaded");
                entries
            }
            Err(error) => {
                warn!(
                    feed = %request.feed,
                    room_id = %request.room_id,
                    error = %format!("{error:#}"),
                    "history unavailable, continuing with live entries only"
                );
                Vec::new()
            }
        }
    }

    async fn try_fetch(&self, request: &HistoryRequest) -> Result<Vec<Entry>> {
        let url = self.history_url(request.feed, &request.room_id)?;
        let mut builder = self.http.get(url.clone());
        if let Some(token) = &request.access_token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await.with_context(|| format!("GET {url} failed"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        let body = response.bytes().await.context("failed to read history body")?;
        let envelope = HistoryEnvelope::parse(&body).context("malformed history body")?;
        let message = envelope.message.clone();
        let records = envelope
            .into_records()
            .ok_or_else(|| anyhow!("backend reported failure: {}", message.unwrap_or_default()))?;

        Ok(reconcile(request.feed, &request.room_id, &request.identity, records))
    }

    fn history_url(&self, feed: Feed, room_id: &RoomId) -> Result<Url> {
        let mut url = self.api_base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("api base `{}` cannot carry a path", self.api_base))?
            .pop_if_empty()
            .extend(feed.history_segments(room_id));
        Ok(url)
    }
}

/// Normalize raw history records, skipping any that cannot be decoded.
/// Records without a usable instant keep an invalid timestamp.
pub fn reconcile(
    feed: Feed,
    room_id: &RoomId,
    identity: &LocalIdentity,
    records: Vec<Value>,
) -> Vec<Entry> {
    records
        .into_iter()
        .enumerate()
        .filter_map(|(index, record)| match decode_record(feed, room_id, identity, record) {
            Ok(entry) => Some(entry),
            Err(error) => {
                warn!(%feed, index, %error, "skipping undecodable history record");
                None
            }
        })
        .collect()
}

fn decode_record(
    feed: Feed,
    room_id: &RoomId,
    identity: &LocalIdentity,
    record: Value,
) -> Result<Entry> {
    let entry = match feed {
        Feed::CityChat | Feed::MeetupChat => {
            let wire: WireMessage = serde_json::from_value(record)?;
            Entry::Message(wire.into_message(room_id, identity, Timestamp::Invalid)?)
        }
        Feed::Incidents => {
            let wire: WireIncident = serde_json::from_value(record)?;
            Entry::Incident(wire.into_incident(Timestamp::Invalid)?)
        }
    };
    Ok(entry)
}
