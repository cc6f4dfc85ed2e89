#![forbid(unsafe_code)]

//! Credential handling for the two account slots.
//!
//! The interactive OAuth consent flow happens outside this tool; what lands
//! here is the token file it leaves behind, one per account. The transfer
//! core treats the resulting [`Credential`] as an opaque bearer token.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::TransferError;

/// Which account a credential belongs to. The two slots are fully
/// independent: separate token files, separate refresh state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSlot {
    Source,
    Destination,
}

impl fmt::Display for AccountSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccountSlot::Source => write!(f, "source"),
            AccountSlot::Destination => write!(f, "destination"),
        }
    }
}

/// On-disk token file shape, as written by the consent flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredToken {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
}

/// Opaque credential handed to the platform client.
#[derive(Debug, Clone)]
pub struct Credential {
    pub access_token: String,
}

#[derive(Deserialize)]
struct RefreshResponse {
    access_token: String,
}

/// Loads the credential for one slot. When the token file carries refresh
/// material, a refresh grant is exchanged first and the rotated token is
/// written back, so long-lived installs keep working after the short-lived
/// access token expires.
pub fn load_credential(
    agent: &ureq::Agent,
    path: &Path,
    slot: AccountSlot,
) -> Result<Credential, TransferError> {
    let stored = read_token_file(path, slot)?;

    let Some(request) = refresh_request(&stored) else {
        return Ok(Credential {
            access_token: stored.token,
        });
    };

    let access_token = exchange_refresh_grant(agent, &request, slot)?;
    let rotated = StoredToken {
        token: access_token.clone(),
        ..stored
    };
    write_token_file(path, &rotated)?;
    Ok(Credential { access_token })
}

pub fn read_token_file(path: &Path, slot: AccountSlot) -> Result<StoredToken, TransferError> {
    if !path.exists() {
        return Err(TransferError::Authentication(format!(
            "token file {} not found; authenticate the {slot} account first",
            path.display()
        )));
    }
    let raw = fs::read_to_string(path).map_err(|err| {
        TransferError::Authentication(format!("reading {}: {err}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|err| {
        TransferError::Authentication(format!("parsing {}: {err}", path.display()))
    })
}

pub fn write_token_file(path: &Path, token: &StoredToken) -> Result<(), TransferError> {
    let payload = serde_json::to_string_pretty(token)
        .map_err(|err| TransferError::Authentication(format!("serializing token: {err}")))?;
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, payload).map_err(|err| {
        TransferError::Authentication(format!("writing {}: {err}", tmp_path.display()))
    })?;
    fs::rename(&tmp_path, path).map_err(|err| {
        TransferError::Authentication(format!("finalizing {}: {err}", path.display()))
    })
}

struct RefreshRequest<'a> {
    token_uri: &'a str,
    client_id: &'a str,
    client_secret: &'a str,
    refresh_token: &'a str,
}

/// A refresh is only attempted when the file carries the complete grant
/// material; a bare access token is used as-is.
fn refresh_request(stored: &StoredToken) -> Option<RefreshRequest<'_>> {
    Some(RefreshRequest {
        token_uri: stored.token_uri.as_deref()?,
        client_id: stored.client_id.as_deref()?,
        client_secret: stored.client_secret.as_deref()?,
        refresh_token: stored.refresh_token.as_deref()?,
    })
}

fn exchange_refresh_grant(
    agent: &ureq::Agent,
    request: &RefreshRequest<'_>,
    slot: AccountSlot,
) -> Result<String, TransferError> {
    let response = agent
        .post(request.token_uri)
        .send_form(&[
            ("client_id", request.client_id),
            ("client_secret", request.client_secret),
            ("refresh_token", request.refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .map_err(|err| {
            TransferError::Authentication(format!("refreshing {slot} token: {err}"))
        })?;

    let parsed: RefreshResponse = response.into_json().map_err(|err| {
        TransferError::Authentication(format!("parsing {slot} token response: {err}"))
    })?;
    Ok(parsed.access_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn bare_token(token: &str) -> StoredToken {
        StoredToken {
            token: token.into(),
            refresh_token: None,
            token_uri: None,
            client_id: None,
            client_secret: None,
            scopes: Vec::new(),
        }
    }

    #[test]
    fn missing_token_file_is_an_authentication_error() {
        let dir = tempdir().unwrap();
        let agent = ureq::agent();
        let err = load_credential(
            &agent,
            &dir.path().join("token_source.json"),
            AccountSlot::Source,
        )
        .unwrap_err();
        assert!(matches!(err, TransferError::Authentication(_)));
        assert!(err.to_string().contains("source"));
    }

    #[test]
    fn bare_token_is_used_without_refresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token_dest.json");
        write_token_file(&path, &bare_token("ya29.opaque")).unwrap();

        let agent = ureq::agent();
        let credential = load_credential(&agent, &path, AccountSlot::Destination).unwrap();
        assert_eq!(credential.access_token, "ya29.opaque");
    }

    #[test]
    fn token_file_roundtrip_omits_empty_fields() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        write_token_file(&path, &bare_token("abc")).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["token"], "abc");
        assert!(value.get("refresh_token").is_none());
        assert!(value.get("scopes").is_none());

        let reread = read_token_file(&path, AccountSlot::Source).unwrap();
        assert_eq!(reread.token, "abc");
    }

    #[test]
    fn refresh_request_requires_complete_grant_material() {
        let mut stored = bare_token("abc");
        stored.refresh_token = Some("r".into());
        stored.client_id = Some("c".into());
        assert!(refresh_request(&stored).is_none());

        stored.client_secret = Some("s".into());
        stored.token_uri = Some("https://oauth.example/token".into());
        let request = refresh_request(&stored).expect("complete material");
        assert_eq!(request.refresh_token, "r");
    }

    #[test]
    fn corrupt_token_file_is_an_authentication_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("token.json");
        fs::write(&path, "not json").unwrap();
        let err = read_token_file(&path, AccountSlot::Source).unwrap_err();
        assert!(matches!(err, TransferError::Authentication(_)));
    }
}
