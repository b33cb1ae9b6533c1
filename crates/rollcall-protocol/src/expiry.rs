//! Resolving a token response into an absolute expiry.
//!
//! The countdown is driven by `expires_at - now`, so the expiry must be
//! an absolute instant. The backend provides `expires_at_timestamp`
//! (epoch milliseconds) for that purpose. Older deployments only send
//! `expires_at`, a string formatted in the backend's local timezone;
//! parsing it on the client is timezone-fragile and therefore opt-in.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

use crate::{ProtocolError, TokenResponse};

/// Formats accepted for a naive (offset-less) `expires_at` string.
const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
];

/// How to treat a token response that lacks `expires_at_timestamp`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Require the absolute timestamp. A response without it is a
    /// contract violation and fails with [`ProtocolError::MissingTimestamp`].
    #[default]
    Strict,
    /// Fall back to parsing `expires_at`. RFC 3339 strings carry their
    /// own offset; naive strings are read at `utc_offset_minutes`.
    Lenient {
        /// Offset of the backend's local time from UTC, in minutes.
        utc_offset_minutes: i32,
    },
}

/// Computes the absolute expiry (epoch milliseconds) of a token response.
///
/// # Errors
/// - [`ProtocolError::InvalidMessage`]: timestamp present but not positive
/// - [`ProtocolError::MissingTimestamp`]: no timestamp under [`ExpiryPolicy::Strict`]
/// - [`ProtocolError::InvalidTimestamp`]: fallback string unparsable
pub fn resolve_expiry(
    response: &TokenResponse,
    policy: ExpiryPolicy,
) -> Result<i64, ProtocolError> {
    if let Some(ts) = response.expires_at_timestamp {
        if ts <= 0 {
            return Err(ProtocolError::InvalidMessage(format!(
                "expires_at_timestamp must be positive, got {ts}"
            )));
        }
        return Ok(ts);
    }

    match policy {
        ExpiryPolicy::Strict => Err(ProtocolError::MissingTimestamp),
        ExpiryPolicy::Lenient { utc_offset_minutes } => {
            let ms = parse_formatted(&response.expires_at, utc_offset_minutes)?;
            tracing::warn!(
                expires_at = %response.expires_at,
                utc_offset_minutes,
                "token response lacks expires_at_timestamp, parsed formatted expiry"
            );
            Ok(ms)
        }
    }
}

fn parse_formatted(raw: &str, utc_offset_minutes: i32) -> Result<i64, ProtocolError> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }

    let offset = utc_offset_minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| ProtocolError::InvalidTimestamp(raw.to_owned()))?;

    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return offset
                .from_local_datetime(&naive)
                .single()
                .map(|dt| dt.timestamp_millis())
                .ok_or_else(|| ProtocolError::InvalidTimestamp(raw.to_owned()));
        }
    }

    Err(ProtocolError::InvalidTimestamp(raw.to_owned()))
}
