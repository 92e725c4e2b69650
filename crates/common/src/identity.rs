// Local participant identity resolution.
//
// The identity is a pure function of the session profile, the caller's
// guest label and the guest id minted for the mounted session.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::LocalIdentity;

const GUEST_ID_PREFIX: &str = "guest-";
const GUEST_ID_LEN: usize = 9;

/// Read-only view of the externally issued session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionProfile {
    /// Authenticated subject identifier.
    pub sub: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
    pub email: Option<String>,
    /// Bearer token for REST calls. Never part of the identity.
    pub access_token: Option<String>,
}

/// Random guest identifier, stable for one mounted session and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GuestId(String);

impl GuestId {
    pub fn generate() -> Self {
        let random = Uuid::new_v4().simple().to_string();
        Self(format!("{GUEST_ID_PREFIX}{}", &random[..GUEST_ID_LEN]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Resolve `{id, name}` for the local participant.
///
/// Name: `given family` -> given -> family -> email local part -> guest label.
/// Id: subject -> email -> guest id. Blank fields count as absent.
pub fn resolve_identity(
    profile: Option<&SessionProfile>,
    guest_label: &str,
    guest_id: &GuestId,
) -> LocalIdentity {
    let given = non_blank(profile.and_then(|p| p.given_name.as_deref()));
    let family = non_blank(profile.and_then(|p| p.family_name.as_deref()));
    let email = non_blank(profile.and_then(|p| p.email.as_deref()));
    let subject = non_blank(profile.and_then(|p| p.sub.as_deref()));

    let name = match (given, family) {
        (Some(given), Some(family)) => format!("{given} {family}"),
        (Some(given), None) => given.to_string(),
        (None, Some(family)) => family.to_string(),
        (None, None) => email
            .and_then(email_local_part)
            .map_or_else(|| guest_label.to_string(), str::to_string),
    };

    let id = subject.or(email).map_or_else(|| guest_id.as_str().to_string(), str::to_string);

    LocalIdentity { id, name }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

fn email_local_part(email: &str) -> Option<&str> {
    let local = email.split('@').next().unwrap_or(email).trim();
    (!local.is_empty()).then_some(local)
}
