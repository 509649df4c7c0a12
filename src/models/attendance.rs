use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Normalized content of an attendance QR code. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanPayload {
    pub team_id: String,
    pub access_credential: String,
    pub member_id: Option<String>,
}

/// Canonical wire shape, field order included.
#[derive(Serialize)]
struct WirePayload<'a> {
    team_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    member_id: Option<&'a str>,
    access_key: &'a str,
}

impl ScanPayload {
    pub fn team(team_id: &str, access_key: &str) -> Self {
        Self {
            team_id: team_id.to_string(),
            access_credential: access_key.to_string(),
            member_id: None,
        }
    }

    pub fn member(team_id: &str, member_id: &str, access_key: &str) -> Self {
        Self {
            member_id: Some(member_id.to_string()),
            ..Self::team(team_id, access_key)
        }
    }

    /// Compact JSON as embedded in issued QR codes.
    pub fn to_wire(&self) -> String {
        let wire = WirePayload {
            team_id: &self.team_id,
            member_id: self.member_id.as_deref(),
            access_key: &self.access_credential,
        };
        serde_json::to_string(&wire).unwrap_or_default()
    }
}

/// Attendance-relevant columns of a team or member row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct AttendanceRecord {
    pub team_id: String,
    pub member_id: Option<Uuid>,
    pub name: String,
    pub present: bool,
    pub checkin_time: Option<DateTime<Utc>>,
}

/// What the datastore's compare-and-set did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinTransition {
    /// No row matched the id/credential pair.
    Missing,
    /// Row was already present; nothing written.
    AlreadyPresent(AttendanceRecord),
    /// Row flipped from absent to present by this call.
    CheckedIn(AttendanceRecord),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckinOutcome {
    Success(AttendanceRecord),
    AlreadyPresent(AttendanceRecord),
}

impl CheckinOutcome {
    pub fn record(&self) -> &AttendanceRecord {
        match self {
            Self::Success(record) | Self::AlreadyPresent(record) => record,
        }
    }

    pub fn status(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::AlreadyPresent(_) => "already_present",
        }
    }
}
