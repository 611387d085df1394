//! Organizer input and the on-chain metadata derived from it

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protocol maximum for the on-chain token name
pub const MAX_NAME_LEN: usize = 32;
/// Protocol maximum for the on-chain token symbol
pub const MAX_SYMBOL_LEN: usize = 10;
/// Metadata URI limit
pub const MAX_URI_LEN: usize = 200;
/// Token decimals range upper bound
pub const MAX_DECIMALS: u8 = 9;
/// Attendee bound used when the config does not override it
pub const DEFAULT_MAX_ATTENDEES: u32 = 1_000;

/// What the organizer typed into the event form
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDetails {
    pub title: String,
    pub location: String,
    /// `YYYY-MM-DD`
    pub date: String,
    /// `HH:MM`
    pub time: String,
    pub description: String,
    pub attendee_count: u32,
    pub symbol: String,
    #[serde(default)]
    pub decimals: u8,
    pub image_url: String,
}

/// One broken validation rule
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationIssue {
    #[error("title is required")]
    MissingTitle,

    #[error("symbol is required")]
    MissingSymbol,

    #[error("symbol '{0}' is longer than 10 characters")]
    SymbolTooLong(String),

    #[error("symbol '{0}' is reserved for the network's native asset")]
    ReservedSymbol(String),

    #[error("decimals must be between 0 and 9, got {0}")]
    Decimals(u8),

    #[error("attendee count must be at least 1")]
    NoAttendees,

    #[error("attendee count {count} exceeds the limit of {limit}")]
    TooManyAttendees { count: u32, limit: u32 },

    #[error("date '{0}' is not YYYY-MM-DD")]
    Date(String),

    #[error("time '{0}' is not HH:MM")]
    Time(String),

    #[error("image url '{0}' is not an absolute http(s) url")]
    ImageUrl(String),

    #[error("image url is longer than 200 characters")]
    ImageUrlTooLong,
}

/// Every rule the input broke
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl ValidationError {
    pub fn contains(&self, issue: &ValidationIssue) -> bool {
        self.issues.contains(issue)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid event details: ")?;
        for (i, issue) in self.issues.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", issue)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl EventDetails {
    /// Check the form against the rules that must hold before any ledger call
    pub fn validate(&self, native_symbol: &str, max_attendees: u32) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        if self.title.trim().is_empty() {
            issues.push(ValidationIssue::MissingTitle);
        }

        let symbol = self.symbol.trim();
        if symbol.is_empty() {
            issues.push(ValidationIssue::MissingSymbol);
        } else {
            if symbol.chars().count() > MAX_SYMBOL_LEN {
                issues.push(ValidationIssue::SymbolTooLong(symbol.to_string()));
            }
            if symbol.eq_ignore_ascii_case(native_symbol.trim()) {
                issues.push(ValidationIssue::ReservedSymbol(symbol.to_string()));
            }
        }

        if self.decimals > MAX_DECIMALS {
            issues.push(ValidationIssue::Decimals(self.decimals));
        }

        if self.attendee_count == 0 {
            issues.push(ValidationIssue::NoAttendees);
        } else if self.attendee_count > max_attendees {
            issues.push(ValidationIssue::TooManyAttendees {
                count: self.attendee_count,
                limit: max_attendees,
            });
        }

        let date = self.date.trim();
        if !date.is_empty() && chrono::NaiveDate::parse_from_str(date, "%Y-%m-%d").is_err() {
            issues.push(ValidationIssue::Date(date.to_string()));
        }

        let time = self.time.trim();
        if !time.is_empty() && chrono::NaiveTime::parse_from_str(time, "%H:%M").is_err() {
            issues.push(ValidationIssue::Time(time.to_string()));
        }

        let image = self.image_url.trim();
        if !image.is_empty() {
            match url::Url::parse(image) {
                Ok(u) if matches!(u.scheme(), "http" | "https") => {}
                _ => issues.push(ValidationIssue::ImageUrl(image.to_string())),
            }
            if image.chars().count() > MAX_URI_LEN {
                issues.push(ValidationIssue::ImageUrlTooLong);
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }

    /// On-chain metadata for these details
    pub fn token_metadata(&self) -> TokenMetadataFields {
        TokenMetadataFields::new(&self.title, &self.symbol, &self.image_url)
    }

    /// Base units in one whole token
    pub fn unit_amount(&self) -> u64 {
        10u64.pow(self.decimals.min(MAX_DECIMALS) as u32)
    }
}

/// Name/symbol/uri as they will be written on-chain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenMetadataFields {
    pub name: String,
    pub symbol: String,
    pub uri: String,
}

impl TokenMetadataFields {
    /// Truncates name and symbol to the protocol maximums
    pub fn new(name: &str, symbol: &str, uri: &str) -> Self {
        Self {
            name: truncate_chars(name.trim(), MAX_NAME_LEN),
            symbol: truncate_chars(symbol.trim(), MAX_SYMBOL_LEN),
            uri: uri.trim().to_string(),
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
