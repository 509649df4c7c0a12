use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Error as SqlxError, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use super::{StoreError, StoreResult, TeamStore};
use crate::models::{
    attendance::{AttendanceRecord, CheckinTransition},
    team::{EventStats, NewTeam, Team, TeamMember},
};

const TEAM_ATTENDANCE_COLUMNS: &str = r#"
    team_id,
    NULL::uuid AS member_id,
    team_name AS name,
    attendance_status AS present,
    checkin_time
"#;

const MEMBER_ATTENDANCE_COLUMNS: &str = r#"
    team_id,
    id AS member_id,
    name,
    attendance_status AS present,
    checkin_time
"#;

#[derive(Clone)]
pub struct PgTeamStore {
    pool: PgPool,
}

impl PgTeamStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps unique violations to [`StoreError::Conflict`], keeping the constraint name.
fn classify(err: SqlxError) -> StoreError {
    if let SqlxError::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            let constraint = db_err.constraint().unwrap_or("unique constraint");
            return StoreError::Conflict(constraint.to_string());
        }
    }
    StoreError::Database(err)
}

/// Second half of the compare-and-set: the conditional update touched no
/// row, so report whether that was a missing row or an already-present one.
fn settle(existing: Option<AttendanceRecord>) -> CheckinTransition {
    match existing {
        Some(record) => CheckinTransition::AlreadyPresent(record),
        None => CheckinTransition::Missing,
    }
}

#[async_trait]
impl TeamStore for PgTeamStore {
    async fn leader_exists(&self, leader_email: &str) -> StoreResult<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE leader_email = $1)")
                .bind(leader_email)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn next_team_sequence(&self) -> StoreResult<i64> {
        let seq: i64 = sqlx::query_scalar("SELECT nextval('team_seq')")
            .fetch_one(&self.pool)
            .await?;
        Ok(seq)
    }

    #[instrument(skip(self, team), fields(team_id = %team.team_id))]
    async fn create_team(&self, team: NewTeam) -> StoreResult<(Team, Vec<TeamMember>)> {
        let mut tx = self.pool.begin().await?;
        let form = &team.registration;

        let created = sqlx::query_as::<_, Team>(
            r#"
                INSERT INTO teams (
                    id,
                    team_id,
                    team_name,
                    college_name,
                    year,
                    domain,
                    leader_name,
                    leader_email,
                    leader_phone,
                    access_key,
                    attendance_status,
                    created_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, FALSE, NOW())
                RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&team.team_id)
        .bind(&form.team_name)
        .bind(&form.college_name)
        .bind(&form.year)
        .bind(&form.domain)
        .bind(&form.leader_name)
        .bind(&form.leader_email)
        .bind(&form.leader_phone)
        .bind(&team.access_key)
        .fetch_one(&mut *tx)
        .await
        .map_err(classify)?;

        let mut members = Vec::with_capacity(team.members.len());
        for new_member in &team.members {
            let member = sqlx::query_as::<_, TeamMember>(
                r#"
                    INSERT INTO team_members (
                        id,
                        team_id,
                        name,
                        email,
                        phone,
                        is_team_leader,
                        access_key,
                        attendance_status,
                        created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, FALSE, NOW())
                    RETURNING *
                "#,
            )
            .bind(new_member.id)
            .bind(&team.team_id)
            .bind(&new_member.member.name)
            .bind(&new_member.member.email)
            .bind(&new_member.member.phone)
            .bind(new_member.member.is_team_leader)
            .bind(&new_member.access_key)
            .fetch_one(&mut *tx)
            .await
            .map_err(classify)?;
            members.push(member);
        }

        tx.commit().await?;
        info!(members = members.len(), "Team record created");
        Ok((created, members))
    }

    async fn find_team(&self, team_id: &str) -> StoreResult<Option<Team>> {
        let team = sqlx::query_as::<_, Team>("SELECT * FROM teams WHERE team_id = $1")
            .bind(team_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(team)
    }

    async fn stats(&self) -> StoreResult<EventStats> {
        let (total_teams, teams_checked_in): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE attendance_status) FROM teams",
        )
        .fetch_one(&self.pool)
        .await?;

        let (total_members, members_checked_in): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE attendance_status) FROM team_members",
        )
        .fetch_one(&self.pool)
        .await?;

        let domains: Vec<(String, i64)> =
            sqlx::query_as("SELECT domain, COUNT(*) FROM teams GROUP BY domain")
                .fetch_all(&self.pool)
                .await?;

        Ok(EventStats {
            total_teams,
            total_members,
            teams_checked_in,
            members_checked_in,
            domain_distribution: domains.into_iter().collect(),
        })
    }

    async fn check_in_team(
        &self,
        team_id: &str,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition> {
        // Concurrent updates of the same row serialize on the row lock; the
        // loser re-evaluates the predicate, sees TRUE and updates nothing.
        let updated = sqlx::query_as::<_, AttendanceRecord>(&format!(
            r#"
                UPDATE teams
                SET attendance_status = TRUE,
                    checkin_time = $3
                WHERE team_id = $1
                  AND access_key = $2
                  AND attendance_status = FALSE
                RETURNING {TEAM_ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(team_id)
        .bind(access_key)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = updated {
            return Ok(CheckinTransition::CheckedIn(record));
        }

        let existing = sqlx::query_as::<_, AttendanceRecord>(&format!(
            "SELECT {TEAM_ATTENDANCE_COLUMNS} FROM teams WHERE team_id = $1 AND access_key = $2"
        ))
        .bind(team_id)
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settle(existing))
    }

    async fn check_in_member(
        &self,
        team_id: &str,
        member_id: Uuid,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition> {
        let updated = sqlx::query_as::<_, AttendanceRecord>(&format!(
            r#"
                UPDATE team_members
                SET attendance_status = TRUE,
                    checkin_time = $4
                WHERE id = $1
                  AND team_id = $2
                  AND access_key = $3
                  AND attendance_status = FALSE
                RETURNING {MEMBER_ATTENDANCE_COLUMNS}
            "#
        ))
        .bind(member_id)
        .bind(team_id)
        .bind(access_key)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(record) = updated {
            return Ok(CheckinTransition::CheckedIn(record));
        }

        let existing = sqlx::query_as::<_, AttendanceRecord>(&format!(
            r#"
                SELECT {MEMBER_ATTENDANCE_COLUMNS}
                FROM team_members
                WHERE id = $1 AND team_id = $2 AND access_key = $3
            "#
        ))
        .bind(member_id)
        .bind(team_id)
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settle(existing))
    }
}
