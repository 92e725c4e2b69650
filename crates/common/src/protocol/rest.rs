// REST envelope shared by the history endpoints.

use serde::Deserialize;
use serde_json::Value;

/// `{success, data, message}` as returned by every history endpoint.
///
/// Records stay as raw JSON so one undecodable record can be skipped
/// without discarding the rest of the snapshot.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct HistoryEnvelope {
    pub success: bool,
    pub data: Option<Vec<Value>>,
    pub message: Option<String>,
}

impl HistoryEnvelope {
    pub fn parse(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }

    /// Records of a successful response; `None` when the backend reported failure.
    pub fn into_records(self) -> Option<Vec<Value>> {
        if self.success {
            Some(self.data.unwrap_or_default())
        } else {
            None
        }
    }
}
