//! Grant token minting and validation.
//!
//! Format: `base64url(json(payload)) + "." + hex(HMAC_SHA256(secret, payload_b64))`.
//! The HMAC check is constant-time; everything else is a plain equality.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::TokenInvalidReason;

type HmacSha256 = Hmac<Sha256>;

/// Grant-token payload (spec §4.8, §6).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GrantPayload {
    pub sid: String,
    pub tid: String,
    pub vid: Option<String>,
    pub cv: i64,
    pub uid: i64,
    pub exp: i64,
}

/// In-process advisory cache of issued grants, keyed by `(sid, tid, vid)`.
/// Purely advisory (spec §9 Open Questions) — signature, expiry, and
/// content_version fully authorize validation without consulting it.
#[derive(Default)]
struct GrantCache {
    entries: HashMap<(String, String, Option<String>), (i64, chrono::DateTime<Utc>)>,
}

pub struct GrantAuthorizer {
    secret: String,
    ttl_secs: u64,
    cache: Arc<RwLock<GrantCache>>,
}

impl GrantAuthorizer {
    pub fn new(secret: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            secret: secret.into(),
            ttl_secs,
            cache: Arc::new(RwLock::new(GrantCache::default())),
        }
    }

    fn sign(&self, payload_b64: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload_b64.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint a token after a positive access-evaluator result, optionally
    /// caching the grant.
    pub async fn issue(
        &self,
        session_id: &str,
        track_id: &str,
        voice_id: Option<&str>,
        content_version: i64,
        user_id: i64,
    ) -> String {
        let exp = Utc::now().timestamp() + self.ttl_secs as i64;
        let payload = GrantPayload {
            sid: session_id.to_string(),
            tid: track_id.to_string(),
            vid: voice_id.map(|s| s.to_string()),
            cv: content_version,
            uid: user_id,
            exp,
        };

        let json = serde_json::to_vec(&payload).expect("GrantPayload always serializes");
        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let signature = self.sign(&payload_b64);

        let mut cache = self.cache.write().await;
        cache.entries.insert(
            (session_id.to_string(), track_id.to_string(), voice_id.map(|s| s.to_string())),
            (content_version, Utc::now() + chrono::Duration::seconds(self.ttl_secs as i64)),
        );

        format!("{payload_b64}.{signature}")
    }

    /// Validate a token against the expected (track, voice) and the
    /// track's current content version. Returns `Ok(())` or the specific
    /// reason it was rejected.
    pub fn validate(
        &self,
        token: &str,
        track_id: &str,
        voice_id: Option<&str>,
        current_content_version: i64,
    ) -> Result<GrantPayload, TokenInvalidReason> {
        let (payload_b64, signature) = token
            .split_once('.')
            .ok_or(TokenInvalidReason::Malformed)?;

        let expected = self.sign(payload_b64);
        if !constant_time_eq(signature.as_bytes(), expected.as_bytes()) {
            return Err(TokenInvalidReason::BadSignature);
        }

        let json = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenInvalidReason::Malformed)?;
        let payload: GrantPayload =
            serde_json::from_slice(&json).map_err(|_| TokenInvalidReason::Malformed)?;

        if Utc::now().timestamp() > payload.exp {
            return Err(TokenInvalidReason::Expired);
        }
        if payload.tid != track_id {
            return Err(TokenInvalidReason::WrongTrack);
        }
        if payload.vid.as_deref() != voice_id {
            return Err(TokenInvalidReason::WrongVoice);
        }
        if payload.cv != current_content_version {
            return Err(TokenInvalidReason::ContentUpdated);
        }

        Ok(payload)
    }

    /// Drop every cached grant for a track (called on content-version bump).
    pub async fn invalidate_track(&self, track_id: &str) {
        let mut cache = self.cache.write().await;
        cache.entries.retain(|(_, tid, _), _| tid != track_id);
    }
}

/// Constant-time byte comparison, independent of the hex crate's own
/// internals, so signature comparisons never short-circuit on the first
/// differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trip_issue_and_validate() {
        let auth = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
        let token = auth.issue("sess1", "track1", Some("alloy"), 3, 42).await;

        let payload = auth.validate(&token, "track1", Some("alloy"), 3).unwrap();
        assert_eq!(payload.uid, 42);
        assert_eq!(payload.cv, 3);
    }

    #[tokio::test]
    async fn content_version_bump_invalidates_token() {
        let auth = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
        let token = auth.issue("sess1", "track1", None, 1, 42).await;

        let err = auth.validate(&token, "track1", None, 2).unwrap_err();
        assert_eq!(err, TokenInvalidReason::ContentUpdated);
    }

    #[tokio::test]
    async fn wrong_voice_is_rejected() {
        let auth = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
        let token = auth.issue("sess1", "track1", Some("alloy"), 1, 42).await;

        let err = auth.validate(&token, "track1", Some("echo"), 1).unwrap_err();
        assert_eq!(err, TokenInvalidReason::WrongVoice);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let auth = GrantAuthorizer::new("a-very-long-test-secret-key-value", 600);
        let payload = GrantPayload {
            sid: "s".into(),
            tid: "t".into(),
            vid: None,
            cv: 1,
            uid: 1,
            exp: Utc::now().timestamp() + 60,
        };
        let json = serde_json::to_vec(&payload).unwrap();
        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let forged = format!("{payload_b64}.deadbeef");

        let err = auth.validate(&forged, "t", None, 1).unwrap_err();
        assert_eq!(err, TokenInvalidReason::BadSignature);
    }
}
