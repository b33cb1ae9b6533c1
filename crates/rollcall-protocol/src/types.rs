//! Core protocol types: the JSON bodies exchanged with the backend.
//!
//! Four endpoints make up the whole contract:
//!
//! | Endpoint | Request | Response |
//! |---|---|---|
//! | `GET /session-token` | - | [`TokenResponse`] |
//! | `PUT /session-toggle` | [`ToggleRequest`] | [`ToggleResponse`] |
//! | `GET /attendance-snapshot` | - | [`AttendanceSnapshot`] |
//! | `POST /attendance-write` | [`AttendanceWrite`] | [`WriteAck`] |

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one scheduled class meeting: the scope of a live session.
///
/// Newtype over `u64` so a meeting can never be passed where some other
/// numeric id is expected. `#[serde(transparent)]` keeps the wire form a
/// bare number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeetingId(pub u64);

impl fmt::Display for MeetingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M-{}", self.0)
    }
}

/// Identifies a student within a meeting's attendance roster.
///
/// The backend owns the format (matriculation numbers, UUIDs, ...), so
/// this is an opaque string. It is used as a JSON object key in
/// [`AttendanceSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StudentId(pub String);

impl fmt::Display for StudentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StudentId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for StudentId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Session token
// ---------------------------------------------------------------------------

/// Response body of `GET /session-token`.
///
/// `expires_at_timestamp` (absolute epoch milliseconds) is authoritative
/// when present. `expires_at` is a backend-local formatted string kept
/// for older deployments; see [`ExpiryPolicy`](crate::ExpiryPolicy).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    /// Opaque credential embedded in the scan URL.
    pub token: String,
    /// Formatted expiry, e.g. `"2024-05-01 10:30:00"`.
    pub expires_at: String,
    /// Absolute expiry in epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at_timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// Session toggle
// ---------------------------------------------------------------------------

/// Request body of `PUT /session-toggle`.
///
/// The desired state is sent explicitly rather than "flip whatever it
/// is", so repeating the request is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

/// Response body of `PUT /session-toggle`: the state the server now holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToggleResponse {
    pub enabled: bool,
}

// ---------------------------------------------------------------------------
// Attendance
// ---------------------------------------------------------------------------

/// Local attendance state: student → present.
///
/// A `BTreeMap` so iteration (and therefore diffs and logs) is ordered.
pub type AttendanceMap = BTreeMap<StudentId, bool>;

/// One student's entry in a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceEntry {
    pub present: bool,
}

/// Response body of `GET /attendance-snapshot`.
///
/// On the wire this is a plain object keyed by student id:
///
/// ```json
/// { "s-1": { "present": true }, "s-2": { "present": false } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttendanceSnapshot(pub BTreeMap<StudentId, AttendanceEntry>);

impl AttendanceSnapshot {
    /// Flattens the snapshot into the local presence map.
    pub fn into_presence(self) -> AttendanceMap {
        self.0
            .into_iter()
            .map(|(id, entry)| (id, entry.present))
            .collect()
    }

    /// Builds a snapshot from a presence map (used by in-memory backends).
    pub fn from_presence(map: &AttendanceMap) -> Self {
        Self(
            map.iter()
                .map(|(id, present)| (id.clone(), AttendanceEntry { present: *present }))
                .collect(),
        )
    }

    /// Number of students in the snapshot.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if the snapshot has no students.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Request body of `POST /attendance-write`: a single-record change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceWrite {
    pub student_id: StudentId,
    pub present: bool,
}

/// Response body of `POST /attendance-write`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteAck {
    pub success: bool,
    /// Human-readable reason when `success` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
