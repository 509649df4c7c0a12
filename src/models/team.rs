use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::models::attendance::ScanPayload;

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct Team {
    pub id: Uuid,
    pub team_id: String,
    pub team_name: String,
    pub college_name: String,
    pub year: String,
    pub domain: String,
    pub leader_name: String,
    pub leader_email: String,
    pub leader_phone: String,

    #[serde(skip_serializing)]
    pub access_key: String,
    pub attendance_status: bool,
    pub checkin_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TeamMember {
    pub id: Uuid,
    pub team_id: String,
    pub name: String,
    pub email: String,
    pub phone: String,
    pub is_team_leader: bool,

    #[serde(skip_serializing)]
    pub access_key: String,
    pub attendance_status: bool,
    pub checkin_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewMember {
    #[validate(length(min = 2, max = 100))]
    pub name: String,
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 10, max = 20))]
    pub phone: String,
    #[serde(default)]
    pub is_team_leader: bool,
}

/// Registration form as submitted with the OTP request.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewRegistration {
    #[validate(length(min = 3, max = 100))]
    pub team_name: String,
    #[validate(length(min = 2, max = 100))]
    pub leader_name: String,
    #[validate(email)]
    pub leader_email: String,
    #[validate(length(min = 10, max = 20))]
    pub leader_phone: String,
    #[validate(length(min = 2, max = 100))]
    pub college_name: String,
    #[validate(length(min = 1, max = 50))]
    pub year: String,
    #[validate(length(min = 1, max = 50))]
    pub domain: String,
    #[validate(length(min = 1, max = 3), nested)]
    pub team_members: Vec<NewMember>,
    #[serde(default)]
    pub terms_accepted: bool,
}

/// Why a registration form was refused.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationRejected {
    #[error("{0}")]
    Fields(#[from] ValidationErrors),
    #[error("{0}")]
    Rule(&'static str),
}

impl NewRegistration {
    /// Trims every field, lowercases emails, validates, and makes sure
    /// exactly one member leads (the first one when nobody is flagged).
    pub fn normalize(mut self) -> Result<Self, RegistrationRejected> {
        trim(&mut self.team_name);
        trim(&mut self.leader_name);
        trim(&mut self.leader_phone);
        trim(&mut self.college_name);
        trim(&mut self.year);
        trim(&mut self.domain);
        self.leader_email = self.leader_email.trim().to_lowercase();
        for member in &mut self.team_members {
            trim(&mut member.name);
            trim(&mut member.phone);
            member.email = member.email.trim().to_lowercase();
        }

        self.validate()?;

        if !self.terms_accepted {
            return Err(RegistrationRejected::Rule(
                "You must accept terms and conditions",
            ));
        }
        if !is_plain_name(&self.team_name) || !is_plain_name(&self.leader_name) {
            return Err(RegistrationRejected::Rule("Name contains invalid characters"));
        }
        let phones = std::iter::once(&self.leader_phone)
            .chain(self.team_members.iter().map(|m| &m.phone));
        for phone in phones {
            if phone.chars().filter(char::is_ascii_digit).count() < 10 {
                return Err(RegistrationRejected::Rule(
                    "Phone number must have at least 10 digits",
                ));
            }
        }

        let leader = self
            .team_members
            .iter()
            .position(|m| m.is_team_leader)
            .unwrap_or(0);
        for (idx, member) in self.team_members.iter_mut().enumerate() {
            member.is_team_leader = idx == leader;
        }

        Ok(self)
    }
}

fn trim(value: &mut String) {
    let trimmed = value.trim();
    if trimmed.len() != value.len() {
        *value = trimmed.to_string();
    }
}

fn is_plain_name(name: &str) -> bool {
    name.chars()
        .all(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || c == '-' || c == '.')
}

/// Everything the datastore needs to persist a verified registration.
#[derive(Debug, Clone)]
pub struct NewTeam {
    pub team_id: String,
    pub access_key: String,
    pub registration: NewRegistration,
    pub members: Vec<NewTeamMember>,
}

#[derive(Debug, Clone)]
pub struct NewTeamMember {
    pub id: Uuid,
    pub access_key: String,
    pub member: NewMember,
}

/// Public view of a team, without its credential.
#[derive(Debug, Clone, Serialize)]
pub struct TeamOut {
    pub id: String,
    pub team_id: String,
    pub team_name: String,
    pub leader_name: String,
    pub leader_email: String,
    pub college_name: String,
    pub year: String,
    pub domain: String,
    pub attendance_status: bool,
    pub checkin_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&Team> for TeamOut {
    fn from(team: &Team) -> Self {
        Self {
            id: team.id.to_string(),
            team_id: team.team_id.clone(),
            team_name: team.team_name.clone(),
            leader_name: team.leader_name.clone(),
            leader_email: team.leader_email.clone(),
            college_name: team.college_name.clone(),
            year: team.year.clone(),
            domain: team.domain.clone(),
            attendance_status: team.attendance_status,
            checkin_time: team.checkin_time,
            created_at: team.created_at,
        }
    }
}

/// A member's credential plus the QR text that carries it.
#[derive(Debug, Clone, Serialize)]
pub struct MemberCredential {
    pub member_id: String,
    pub name: String,
    pub email: String,
    pub is_team_leader: bool,
    pub access_key: String,
    pub qr_payload: String,
}

/// Returned once, right after promotion: the only time credentials leave the server.
#[derive(Debug, Clone, Serialize)]
pub struct RegisteredTeam {
    pub team: TeamOut,
    pub access_key: String,
    pub qr_payload: String,
    pub members: Vec<MemberCredential>,
}

impl RegisteredTeam {
    pub fn new(team: &Team, members: &[TeamMember]) -> Self {
        let team_qr = ScanPayload::team(&team.team_id, &team.access_key);
        let members = members
            .iter()
            .map(|member| {
                let qr = ScanPayload::member(
                    &member.team_id,
                    &member.id.to_string(),
                    &member.access_key,
                );
                MemberCredential {
                    member_id: member.id.to_string(),
                    name: member.name.clone(),
                    email: member.email.clone(),
                    is_team_leader: member.is_team_leader,
                    access_key: member.access_key.clone(),
                    qr_payload: qr.to_wire(),
                }
            })
            .collect();

        Self {
            team: TeamOut::from(team),
            access_key: team.access_key.clone(),
            qr_payload: team_qr.to_wire(),
            members,
        }
    }
}

/// Registration and attendance counters for the organizers' dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total_teams: i64,
    pub total_members: i64,
    pub teams_checked_in: i64,
    pub members_checked_in: i64,
    pub domain_distribution: BTreeMap<String, i64>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_registration(email: &str) -> NewRegistration {
        NewRegistration {
            team_name: "Byte Bandits".into(),
            leader_name: "Asha Rao".into(),
            leader_email: email.into(),
            leader_phone: "+91 98765 43210".into(),
            college_name: "LBRCE".into(),
            year: "3rd Year".into(),
            domain: "AI".into(),
            team_members: vec![
                NewMember {
                    name: "Asha Rao".into(),
                    email: email.into(),
                    phone: "9876543210".into(),
                    is_team_leader: false,
                },
                NewMember {
                    name: "Ravi Kumar".into(),
                    email: "ravi@x.com".into(),
                    phone: "9123456780".into(),
                    is_team_leader: false,
                },
            ],
            terms_accepted: true,
        }
    }

    #[test]
    fn test_normalize_trims_and_picks_first_leader() {
        let mut form = sample_registration("  Lead@X.com ");
        form.team_name = "  Byte Bandits ".into();
        let form = form.normalize().unwrap();

        assert_eq!(form.leader_email, "lead@x.com");
        assert_eq!(form.team_name, "Byte Bandits");
        assert!(form.team_members[0].is_team_leader);
        assert!(!form.team_members[1].is_team_leader);
    }

    #[test]
    fn test_normalize_keeps_single_flagged_leader() {
        let mut form = sample_registration("lead@x.com");
        form.team_members[1].is_team_leader = true;
        let form = form.normalize().unwrap();
        assert!(!form.team_members[0].is_team_leader);
        assert!(form.team_members[1].is_team_leader);
    }

    #[test]
    fn test_terms_must_be_accepted() {
        let mut form = sample_registration("lead@x.com");
        form.terms_accepted = false;
        assert!(matches!(
            form.normalize(),
            Err(RegistrationRejected::Rule(_))
        ));
    }

    #[test]
    fn test_member_count_is_bounded() {
        let mut form = sample_registration("lead@x.com");
        let extra = form.team_members[1].clone();
        form.team_members.extend([extra.clone(), extra]);
        assert_eq!(form.team_members.len(), 4);
        assert!(matches!(
            form.normalize(),
            Err(RegistrationRejected::Fields(_))
        ));
    }

    #[test]
    fn test_phone_needs_ten_digits() {
        let mut form = sample_registration("lead@x.com");
        form.leader_phone = "+91-abc-defg-hi".into();
        assert!(form.normalize().is_err());
    }

    #[test]
    fn test_invalid_email_rejected() {
        let form = sample_registration("not-an-email");
        assert!(matches!(
            form.normalize(),
            Err(RegistrationRejected::Fields(_))
        ));
    }
}
