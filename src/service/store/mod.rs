//! Durable storage for teams, members and their attendance.
//!
//! - `PgTeamStore`: Postgres through sqlx (production)
//! - `MemoryTeamStore`: process-local, for development without a database and for tests
//!
//! Check-in must be a compare-and-set: of two concurrent scans of the same
//! absent record exactly one observes the transition.

mod memory;
mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    attendance::CheckinTransition,
    team::{EventStats, NewTeam, Team, TeamMember},
};

pub use memory::MemoryTeamStore;
pub use postgres::PgTeamStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint (leader email, team id, credential) was hit.
    #[error("record already exists: {0}")]
    Conflict(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait TeamStore: Send + Sync {
    async fn leader_exists(&self, leader_email: &str) -> StoreResult<bool>;

    /// Next value of the team sequence, starting at 1.
    async fn next_team_sequence(&self) -> StoreResult<i64>;

    /// Persists the team and all of its members atomically.
    async fn create_team(&self, team: NewTeam) -> StoreResult<(Team, Vec<TeamMember>)>;

    async fn find_team(&self, team_id: &str) -> StoreResult<Option<Team>>;

    async fn stats(&self) -> StoreResult<EventStats>;

    /// Marks the team present if `access_key` matches and it is not present yet.
    async fn check_in_team(
        &self,
        team_id: &str,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition>;

    /// Same as [`TeamStore::check_in_team`] for one member of the team.
    async fn check_in_member(
        &self,
        team_id: &str,
        member_id: Uuid,
        access_key: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<CheckinTransition>;
}
