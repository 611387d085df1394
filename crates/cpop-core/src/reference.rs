//! Claim references - what the QR code carries
//!
//! The canonical form is `<origin>/claim/<event_id>`. Scanners hand back
//! whatever text they decoded, so [`ClaimReference::parse`] also accepts a
//! JSON payload `{"eventId": "..."}` and a bare event id typed by hand.

use serde::Deserialize;
use std::fmt;
use url::Url;

const MAX_EVENT_ID_LEN: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    #[error("empty claim payload")]
    Empty,

    #[error("'{0}' is not a valid event id")]
    InvalidEventId(String),

    #[error("url '{0}' does not point at a claim page")]
    NotAClaimUrl(String),

    #[error("JSON payload has no usable eventId: {0}")]
    Json(String),

    #[error("origin '{0}' is not an http(s) url")]
    InvalidOrigin(String),
}

/// A shareable pointer to one event's claim page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClaimReference {
    event_id: String,
}

#[derive(Deserialize)]
struct ScanPayload {
    #[serde(rename = "eventId")]
    event_id: String,
}

impl ClaimReference {
    pub fn new(event_id: impl Into<String>) -> Result<Self, ReferenceError> {
        let event_id = event_id.into();
        if !is_valid_event_id(&event_id) {
            return Err(ReferenceError::InvalidEventId(event_id));
        }
        Ok(Self { event_id })
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Claim page URL on the given origin
    pub fn url(&self, origin: &str) -> Result<Url, ReferenceError> {
        let base = Url::parse(origin)
            .ok()
            .filter(|u| matches!(u.scheme(), "http" | "https"))
            .ok_or_else(|| ReferenceError::InvalidOrigin(origin.to_string()))?;

        let mut url = base;
        url.set_query(None);
        url.set_fragment(None);
        url.path_segments_mut()
            .map_err(|_| ReferenceError::InvalidOrigin(origin.to_string()))?
            .pop_if_empty()
            .push("claim")
            .push(&self.event_id);
        Ok(url)
    }

    /// Decode whatever the scanner (or a human) produced
    pub fn parse(payload: &str) -> Result<Self, ReferenceError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Err(ReferenceError::Empty);
        }

        if payload.starts_with('{') {
            let scanned: ScanPayload =
                serde_json::from_str(payload).map_err(|e| ReferenceError::Json(e.to_string()))?;
            return Self::new(scanned.event_id.trim());
        }

        if let Ok(url) = Url::parse(payload) {
            if matches!(url.scheme(), "http" | "https") {
                return Self::from_url(&url);
            }
        }

        Self::new(payload)
    }

    fn from_url(url: &Url) -> Result<Self, ReferenceError> {
        let not_claim = || ReferenceError::NotAClaimUrl(url.to_string());
        let segments: Vec<&str> = url
            .path_segments()
            .ok_or_else(not_claim)?
            .filter(|s| !s.is_empty())
            .collect();

        let pos = segments.iter().rposition(|s| *s == "claim").ok_or_else(not_claim)?;
        let id = segments.get(pos + 1).ok_or_else(not_claim)?;
        if pos + 2 != segments.len() {
            return Err(not_claim());
        }
        Self::new(*id)
    }
}

impl fmt::Display for ClaimReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.event_id)
    }
}

fn is_valid_event_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_EVENT_ID_LEN
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "event-3f2a9c1b7e5d4f60a1b2c3d4e5f60718";

    #[test]
    fn test_url_format() {
        let reference = ClaimReference::new(ID).unwrap();
        let url = reference.url("https://cpop.app").unwrap();
        assert_eq!(url.as_str(), format!("https://cpop.app/claim/{}", ID));

        let url = reference.url("https://example.org/app/").unwrap();
        assert_eq!(url.as_str(), format!("https://example.org/app/claim/{}", ID));
    }

    #[test]
    fn test_parse_url_any_origin() {
        let parsed = ClaimReference::parse(&format!("https://other.host/claim/{}/", ID)).unwrap();
        assert_eq!(parsed.event_id(), ID);

        let parsed = ClaimReference::parse(&format!("http://localhost:3000/claim/{}?ref=qr#top", ID)).unwrap();
        assert_eq!(parsed.event_id(), ID);
    }

    #[test]
    fn test_parse_json_fallback() {
        let payload = format!(r#"{{"eventId": "{}", "name": "Hackathon"}}"#, ID);
        assert_eq!(ClaimReference::parse(&payload).unwrap().event_id(), ID);

        assert!(matches!(
            ClaimReference::parse(r#"{"name": "no id"}"#),
            Err(ReferenceError::Json(_))
        ));
    }

    #[test]
    fn test_parse_manual_entry() {
        assert_eq!(ClaimReference::parse(&format!("  {}\n", ID)).unwrap().event_id(), ID);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(ClaimReference::parse("   "), Err(ReferenceError::Empty));
        assert!(matches!(
            ClaimReference::parse("https://cpop.app/events"),
            Err(ReferenceError::NotAClaimUrl(_))
        ));
        assert!(matches!(
            ClaimReference::parse("https://cpop.app/claim/"),
            Err(ReferenceError::NotAClaimUrl(_))
        ));
        assert!(matches!(
            ClaimReference::parse("drop table events;"),
            Err(ReferenceError::InvalidEventId(_))
        ));
    }

    #[test]
    fn test_round_trip_through_url() {
        let reference = ClaimReference::new(ID).unwrap();
        let url = reference.url("https://cpop.app").unwrap();
        assert_eq!(ClaimReference::parse(url.as_str()).unwrap(), reference);
    }

    #[test]
    fn test_bad_origin() {
        let reference = ClaimReference::new(ID).unwrap();
        assert!(reference.url("cpop.app").is_err());
        assert!(reference.url("mailto:someone@example.org").is_err());
    }
}
