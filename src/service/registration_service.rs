//! Registration staging and promotion.
//!
//! A submitted form is staged under the leader's email while the OTP is in
//! flight. The staged payload and the OTP expire independently, so promotion
//! re-reads both at the moment it runs instead of trusting earlier steps.

use std::{sync::Arc, time::Duration};

use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::{
    errors::AppError,
    models::{
        otp_codes::{Delivery, is_well_formed_code, normalize_identity},
        team::{NewRegistration, NewTeam, NewTeamMember, RegisteredTeam},
    },
    service::{
        otp_service::OtpService,
        store::{StoreError, TeamStore},
        ttl_store::TtlStore,
    },
    utils::{
        clock::Clock,
        generators::{ACCESS_KEY_LEN, format_team_id, generate_access_key},
    },
};

/// Pending registrations keyed by normalized leader email.
pub struct RegistrationStaging {
    drafts: TtlStore<NewRegistration>,
    ttl: Duration,
}

impl RegistrationStaging {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            drafts: TtlStore::new(clock),
            ttl,
        }
    }

    pub fn store(&self, identity: &str, payload: NewRegistration) {
        self.drafts
            .set(normalize_identity(identity), payload, self.ttl);
    }

    /// Absent and expired are the same outcome.
    pub fn fetch(&self, identity: &str) -> Option<NewRegistration> {
        self.drafts.get(&normalize_identity(identity))
    }

    pub fn consume(&self, identity: &str) {
        self.drafts.delete(&normalize_identity(identity));
    }

    pub fn sweep(&self) -> usize {
        self.drafts.sweep()
    }

    /// Staged forms not yet swept, expired ones included.
    pub fn pending(&self) -> usize {
        self.drafts.len()
    }
}

/// What `issue_otp` tells the client.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OtpReceipt {
    pub status: &'static str,
    pub message: String,
    pub expires_in_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

pub struct RegistrationService {
    otp: Arc<OtpService>,
    staging: RegistrationStaging,
    store: Arc<dyn TeamStore>,
    team_id_prefix: String,
    expose_otp_on_delivery_failure: bool,
}

impl RegistrationService {
    pub fn new(
        otp: Arc<OtpService>,
        staging: RegistrationStaging,
        store: Arc<dyn TeamStore>,
        team_id_prefix: impl Into<String>,
        expose_otp_on_delivery_failure: bool,
    ) -> Self {
        Self {
            otp,
            staging,
            store,
            team_id_prefix: team_id_prefix.into(),
            expose_otp_on_delivery_failure,
        }
    }

    pub fn staging(&self) -> &RegistrationStaging {
        &self.staging
    }

    /// Validates the form, issues a code, stages the form and sends the code.
    #[instrument(skip(self, form), fields(leader_email = %form.leader_email))]
    pub async fn issue_otp(&self, form: NewRegistration) -> Result<OtpReceipt, AppError> {
        let form = form.normalize()?;
        let identity = form.leader_email.clone();

        let code = self.otp.issue(&identity)?;
        self.staging.store(&identity, form);
        let expires_in_secs = self.otp.policy().code_ttl.as_secs();

        match self.otp.deliver(&identity, &code).await {
            Delivery::Sent => Ok(OtpReceipt {
                status: "success",
                message: format!(
                    "OTP sent to {identity}. Check your inbox (including spam). It expires in {} minutes.",
                    expires_in_secs / 60
                ),
                expires_in_secs,
                otp: None,
            }),
            Delivery::Failed => {
                warn!("OTP email failed, registration stays staged");
                Ok(OtpReceipt {
                    status: "warning",
                    message: "OTP email could not be delivered. Request a new code or contact the organizers."
                        .to_string(),
                    expires_in_secs,
                    otp: self.expose_otp_on_delivery_failure.then_some(code),
                })
            }
        }
    }

    /// Verifies the code and turns the staged form into a durable team.
    ///
    /// The staged form is removed only once the team exists, so a datastore
    /// failure leaves it in place for a retry with a fresh code.
    #[instrument(skip(self, code))]
    pub async fn verify_otp(&self, identity: &str, code: &str) -> Result<RegisteredTeam, AppError> {
        let identity = normalize_identity(identity);
        let code = code.trim();
        if !is_well_formed_code(code) {
            return Err(AppError::Validation("OTP must be exactly 6 digits".into()));
        }

        self.otp.verify(&identity, code)?;

        let Some(form) = self.staging.fetch(&identity) else {
            warn!("Staged registration expired before promotion");
            return Err(AppError::Expired);
        };

        if self.store.leader_exists(&identity).await? {
            warn!("Leader email already owns a team");
            return Err(AppError::Conflict(
                "This email is already registered with a team".into(),
            ));
        }

        let seq = self.store.next_team_sequence().await?;
        let team_id = format_team_id(&self.team_id_prefix, seq);
        let members = form
            .team_members
            .iter()
            .map(|member| NewTeamMember {
                id: Uuid::new_v4(),
                access_key: generate_access_key(ACCESS_KEY_LEN),
                member: member.clone(),
            })
            .collect();
        let new_team = NewTeam {
            team_id,
            access_key: generate_access_key(ACCESS_KEY_LEN),
            registration: form,
            members,
        };

        let (team, members) = self.store.create_team(new_team).await.map_err(|err| match err {
            StoreError::Conflict(constraint) => {
                warn!(%constraint, "Team creation hit a unique constraint");
                AppError::Conflict("Team creation failed due to duplicate data".into())
            }
            other => other.into(),
        })?;

        self.staging.consume(&identity);
        info!(team_id = %team.team_id, "Registration promoted");
        Ok(RegisteredTeam::new(&team, &members))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::team::tests::sample_registration,
        service::{
            otp_service::{OtpPolicy, tests::RecordingNotifier},
            store::MemoryTeamStore,
        },
        utils::clock::ManualClock,
    };

    struct Harness {
        clock: Arc<ManualClock>,
        notifier: Arc<RecordingNotifier>,
        store: Arc<MemoryTeamStore>,
        service: RegistrationService,
    }

    fn harness_with(notifier: RecordingNotifier, expose: bool) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let notifier = Arc::new(notifier);
        let store = Arc::new(MemoryTeamStore::new());
        let otp = Arc::new(OtpService::new(
            OtpPolicy::default(),
            clock.clone(),
            notifier.clone(),
        ));
        let staging = RegistrationStaging::new(Duration::from_secs(300), clock.clone());
        let service = RegistrationService::new(otp, staging, store.clone(), "HACK2026", expose);
        Harness {
            clock,
            notifier,
            store,
            service,
        }
    }

    fn harness() -> Harness {
        harness_with(RecordingNotifier::default(), false)
    }

    #[test]
    fn test_staging_fetch_and_consume() {
        let clock = Arc::new(ManualClock::new());
        let staging = RegistrationStaging::new(Duration::from_secs(300), clock.clone());
        staging.store("Lead@X.com", sample_registration("lead@x.com"));

        assert!(staging.fetch("lead@x.com").is_some());
        staging.consume("lead@x.com");
        staging.consume("lead@x.com");
        assert!(staging.fetch("lead@x.com").is_none());
    }

    #[test]
    fn test_staging_expires_independently() {
        let clock = Arc::new(ManualClock::new());
        let staging = RegistrationStaging::new(Duration::from_secs(300), clock.clone());
        staging.store("lead@x.com", sample_registration("lead@x.com"));
        clock.advance(Duration::from_secs(301));
        assert!(staging.fetch("lead@x.com").is_none());
    }

    #[actix_web::test]
    async fn test_issue_then_verify_promotes() {
        let h = harness();
        let receipt = h
            .service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        assert_eq!(receipt.status, "success");
        assert!(receipt.otp.is_none());

        let code = h.notifier.last_code_for("lead@x.com").unwrap();
        let registered = h.service.verify_otp("lead@x.com", &code).await.unwrap();

        assert_eq!(registered.team.team_id, "HACK2026-001");
        assert_eq!(registered.members.len(), 2);
        assert!(registered.members[0].is_team_leader);
        assert_eq!(registered.access_key.len(), ACCESS_KEY_LEN);
        assert!(h.service.staging().fetch("lead@x.com").is_none());
        assert!(h.store.leader_exists("lead@x.com").await.unwrap());
    }

    #[actix_web::test]
    async fn test_failed_delivery_exposes_code_only_when_enabled() {
        let hidden = harness_with(RecordingNotifier::failing(), false);
        let receipt = hidden
            .service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        assert_eq!(receipt.status, "warning");
        assert!(receipt.otp.is_none());

        let exposed = harness_with(RecordingNotifier::failing(), true);
        let receipt = exposed
            .service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        let code = receipt.otp.unwrap();
        assert!(exposed.service.verify_otp("lead@x.com", &code).await.is_ok());
    }

    #[actix_web::test]
    async fn test_invalid_form_issues_nothing() {
        let h = harness();
        let mut form = sample_registration("lead@x.com");
        form.terms_accepted = false;
        let err = h.service.issue_otp(form).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
        assert!(h.notifier.sent.lock().is_empty());
    }

    #[actix_web::test]
    async fn test_malformed_code_is_not_an_attempt() {
        let h = harness();
        h.service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        for _ in 0..5 {
            let err = h.service.verify_otp("lead@x.com", "12ab").await.unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        let code = h.notifier.last_code_for("lead@x.com").unwrap();
        assert!(h.service.verify_otp("lead@x.com", &code).await.is_ok());
    }

    #[actix_web::test]
    async fn test_expired_staging_blocks_promotion() {
        let h = harness();
        h.service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        let code = h.notifier.last_code_for("lead@x.com").unwrap();

        // Staged form gone while the code is still valid.
        h.service.staging().consume("lead@x.com");
        let err = h.service.verify_otp("lead@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::Expired));
        assert!(!h.store.leader_exists("lead@x.com").await.unwrap());
    }

    #[actix_web::test]
    async fn test_expired_code_is_generic_expired() {
        let h = harness();
        h.service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        let code = h.notifier.last_code_for("lead@x.com").unwrap();
        h.clock.advance(Duration::from_secs(301));
        let err = h.service.verify_otp("lead@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::Expired));
    }

    #[actix_web::test]
    async fn test_second_registration_for_leader_conflicts() {
        let h = harness();
        h.service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        let code = h.notifier.last_code_for("lead@x.com").unwrap();
        h.service.verify_otp("lead@x.com", &code).await.unwrap();

        h.service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap();
        let code = h.notifier.last_code_for("lead@x.com").unwrap();
        let err = h.service.verify_otp("lead@x.com", &code).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(h.service.staging().fetch("lead@x.com").is_some());
    }

    #[actix_web::test]
    async fn test_generation_rate_limit_surfaces() {
        let h = harness();
        for _ in 0..3 {
            h.service
                .issue_otp(sample_registration("lead@x.com"))
                .await
                .unwrap();
        }
        let err = h
            .service
            .issue_otp(sample_registration("lead@x.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::RateLimited { .. }));
    }
}
