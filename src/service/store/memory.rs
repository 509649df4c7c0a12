use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::{StoreError, StoreResult, TeamStore};
use crate::models::{
    attendance::{AttendanceRecord, CheckinTransition},
    team::{EventStats, NewTeam, Team, TeamMember},
};

#[derive(Default)]
struct MemoryState {
    teams: HashMap<String, Team>,
    members: HashMap<Uuid, TeamMember>,
    sequence: i64,
}

/// Non-persistent [`TeamStore`]. Every operation runs under one lock, which
/// makes the check-in read and write a single atomic step.
#[derive(Default)]
pub struct MemoryTeamStore {
    state: Mutex<MemoryState>,
}

impl MemoryTeamStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn team_record(team: &Team) -> AttendanceRecord {
    AttendanceRecord {
        team_id: team.team_id.clone(),
        member_id: None,
        name: team.team_name.clone(),
        present: team.attendance_status,
        checkin_time: team.checkin_time,
    }
}

fn member_record(member: &TeamMember) -> AttendanceRecord {
    AttendanceRecord {
        team_id: member.team_id.clone(),
        member_id: Some(member.id),
        name: member.name.clone(),
        present: member.attendance_status,
        checkin_time: member.checkin_time,
    }
}

#[async_trait]
impl TeamStore for MemoryTeamStore {
    async fn leader_exists(&self, leader_email: &str) -> StoreResult<bool> {
        let state = self.state.lock();
        Ok(state
            .teams
            .values()
            .any(|team| team.leader_email == leader_email))
    }

    async fn next_team_sequence(&self) -> StoreResult<i64> {
        let mut state = self.state.lock();
        state.sequence += 1;
        Ok(state.sequence)
    }

    async fn create_team(&self, team: NewTeam) -> StoreResult<(Team, Vec<TeamMember>)> {
        let mut state = self.state.lock();
        let form = team.registration;

        if state.teams.contains_key(&team.team_id) {
            return Err(StoreError::Conflict("idx_teams_team_id".into()));
        }
        if state
            .teams
            .values()
            .any(|existing| existing.leader_email == form.leader_email)
        {
            return Err(StoreError::Conflict("idx_teams_leader_email".into()));
        }
        if team
            .members
            .iter()
            .any(|m| state.members.values().any(|e| e.access_key == m.access_key))
        {
            return Err(StoreError::Conflict("idx_team_members_access_key".into()));
        }

        let now = Utc::now();
        let created = Team {
            id: Uuid::new_v4(),
            team_id: team.team_id.clone(),
            team_name: form.team_name,
            college_name: form.college_name,
            year: form.year,
            domain: form.domain,
            leader_name: form.leader_name,
            leader_email: form.leader_email,
            leader_phone: form.leader_phone,
            access_key: team.access_key,
            attendance_status: false,
            checkin_time: None,
            created_at: now,
        };

        let members: Vec<TeamMember> = team
            .members
            .into_iter()
            .map(|new_member| TeamMember {
                id: new_member.id,
                team_id: team.team_id.clone(),
                name: new_member.member.name,
                email: new_member.member.email,
                phone: new_member.member.phone,
                is_team_leader: new_member.member.is_team_leader,
                access_key: new_member.access_key,
                attendance_status: false,
                checkin_time: None,
                created_at: now,
            })
            .collect();

        state.teams.insert(created.team_id.clone(), created.clone());
        for member in &members {
            state.members.insert(member.id, member.clone());
        }
        Ok((created, members))
    }

    async fn find_team(&self, team_id: &str) -> StoreResult<Option<Team>> {
        Ok(self.state.lock().teams.get(team_id).cloned())
    }

    async fn stats(&self) -> StoreResult<EventStats> {
        let state = self.state.lock();
        let mut stats = EventStats {
            total_teams: state.teams.len() as i64,
            total_members: state.members.len() as i64,
            ..EventStats::default()
        };
        for team in state.teams.values() {
            stats.teams_checked_in += i64::from(team.attendance_status);
            *stats
                .domain_distribution
                .entry(team.domain.clone())
                .or_default() += 1;
        }
        stats.members_checked_in = state
            .members
            .values()
            .filter(|member| member.attendance_status)
            .count() as i64;
        Ok(stats)
    }

    async fn check_in_team(
        &self,
        team_id: &str,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition> {
        let mut state = self.state.lock();
        let Some(team) = state
            .teams
            .get_mut(team_id)
            .filter(|team| team.access_key == access_key)
        else {
            return Ok(CheckinTransition::Missing);
        };

        if team.attendance_status {
            return Ok(CheckinTransition::AlreadyPresent(team_record(team)));
        }
        team.attendance_status = true;
        team.checkin_time = Some(at);
        Ok(CheckinTransition::CheckedIn(team_record(team)))
    }

    async fn check_in_member(
        &self,
        team_id: &str,
        member_id: Uuid,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition> {
        let mut state = self.state.lock();
        let Some(member) = state
            .members
            .get_mut(&member_id)
            .filter(|member| member.team_id == team_id && member.access_key == access_key)
        else {
            return Ok(CheckinTransition::Missing);
        };

        if member.attendance_status {
            return Ok(CheckinTransition::AlreadyPresent(member_record(member)));
        }
        member.attendance_status = true;
        member.checkin_time = Some(at);
        Ok(CheckinTransition::CheckedIn(member_record(member)))
    }
}
