use std::sync::Arc;

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::attendance::{CheckinOutcome, CheckinTransition, ScanPayload},
    service::store::TeamStore,
    utils::clock::Clock,
};

/// Turns a parsed scan into a check-in against the durable store.
pub struct AttendanceService {
    store: Arc<dyn TeamStore>,
    clock: Arc<dyn Clock>,
}

impl AttendanceService {
    pub fn new(store: Arc<dyn TeamStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Marks the team (or the member, when the payload names one) present.
    ///
    /// An unknown team, a wrong credential and a malformed member id are
    /// indistinguishable to the caller.
    #[instrument(skip(self, payload), fields(team_id = %payload.team_id, member_id = ?payload.member_id))]
    pub async fn check_in(&self, payload: &ScanPayload) -> Result<CheckinOutcome, AppError> {
        let at = self.clock.utc_now();

        let transition = match payload.member_id.as_deref() {
            None => {
                self.store
                    .check_in_team(&payload.team_id, &payload.access_credential, at)
                    .await?
            }
            Some(raw) => match Uuid::parse_str(raw) {
                Ok(member_id) => {
                    self.store
                        .check_in_member(
                            &payload.team_id,
                            member_id,
                            &payload.access_credential,
                            at,
                        )
                        .await?
                }
                Err(_) => CheckinTransition::Missing,
            },
        };

        match transition {
            CheckinTransition::CheckedIn(record) => {
                info!(name = %record.name, "Checked in");
                Ok(CheckinOutcome::Success(record))
            }
            CheckinTransition::AlreadyPresent(record) => {
                info!(name = %record.name, "Already checked in");
                Ok(CheckinOutcome::AlreadyPresent(record))
            }
            CheckinTransition::Missing => {
                warn!("No record matches scanned credential");
                Err(AppError::NotFound(
                    "Invalid QR code or team not found".to_string(),
                ))
            }
        }
    }
}
