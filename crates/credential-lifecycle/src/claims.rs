//! Display-ready identity claims
//!
//! Claims from the ID token and from the user-info endpoint both go through
//! `ClaimsView::from_claims`, so the same underlying claims always render the
//! same way regardless of where they came from.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use oidc_auth::TokenSet;
use oidc_auth::claims::{
    AUTH_TIME, ISSUED_AT, ISSUER, NAME, PREFERRED_USERNAME, SUBJECT, UPDATED_AT,
};
use serde::Serialize;

/// Marker rendered for a missing claim.
pub const NOT_AVAILABLE: &str = "N/A";

/// Medium date, medium time, always UTC.
const TIMESTAMP_FORMAT: &str = "%b %-d, %Y at %-I:%M:%S %p";

/// Identity claims formatted for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClaimsView {
    pub preferred_username: String,
    pub name: String,
    pub subject: String,
    pub issuer: String,
    pub auth_time: String,
    pub issued_at: String,
    pub updated_at: String,
}

impl ClaimsView {
    pub fn from_claims(claims: &BTreeMap<String, String>) -> Self {
        let text = |key: &str| {
            claims
                .get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };
        let time = |key: &str| {
            claims
                .get(key)
                .and_then(|v| format_timestamp(v))
                .unwrap_or_else(|| NOT_AVAILABLE.to_string())
        };

        Self {
            preferred_username: text(PREFERRED_USERNAME),
            name: text(NAME),
            subject: text(SUBJECT),
            issuer: text(ISSUER),
            auth_time: time(AUTH_TIME),
            issued_at: time(ISSUED_AT),
            updated_at: time(UPDATED_AT),
        }
    }

    /// `"Label: value"` lines, sorted.
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = [
            ("Auth Time", &self.auth_time),
            ("Issued At", &self.issued_at),
            ("Issuer", &self.issuer),
            ("Name", &self.name),
            ("Preferred Username", &self.preferred_username),
            ("Subject", &self.subject),
            ("Updated At", &self.updated_at),
        ]
        .iter()
        .map(|(label, value)| format!("{label}: {value}"))
        .collect();
        lines.sort();
        lines
    }
}

/// Claims carried by the token set's ID token.
pub fn extract(token_set: &TokenSet) -> ClaimsView {
    ClaimsView::from_claims(token_set.claims())
}

/// Claims from the user-info endpoint, layered over the ID-token claims.
pub fn extract_user_info(token_set: &TokenSet, user_info: &BTreeMap<String, String>) -> ClaimsView {
    let mut merged = token_set.claims().clone();
    merged.extend(user_info.iter().map(|(k, v)| (k.clone(), v.clone())));
    ClaimsView::from_claims(&merged)
}

/// Render an epoch-seconds or RFC 3339 timestamp, or `None` if unparseable.
pub fn format_timestamp(raw: &str) -> Option<String> {
    parse_timestamp(raw.trim()).map(|t| t.format(TIMESTAMP_FORMAT).to_string())
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    if let Ok(secs) = raw.parse::<f64>() {
        if secs.is_finite() {
            return DateTime::from_timestamp(secs.trunc() as i64, 0);
        }
        return None;
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
