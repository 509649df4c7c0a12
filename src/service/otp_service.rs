//! One-time code issuance and verification.
//!
//! Per identity the lifecycle is `none -> issued -> consumed`, where a new
//! issue silently replaces the previous code. Rate limiting is reported as
//! an error outcome and never stored as a state of the code itself.

use std::{sync::Arc, time::Duration};

use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::{
    config::config::Config,
    models::otp_codes::{Delivery, IssuedOtp, normalize_identity},
    service::{
        email_service::OtpNotifier,
        rate_limiter::{RateLimited, RateLimiter, RateScope},
        ttl_store::{Take, TtlStore},
    },
    utils::{clock::Clock, generators::generate_otp_code},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtpPolicy {
    pub code_ttl: Duration,
    pub generation_limit: u32,
    pub generation_window: Duration,
    pub verification_limit: u32,
    pub verification_window: Duration,
}

impl Default for OtpPolicy {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(300),
            generation_limit: 3,
            generation_window: Duration::from_secs(60),
            verification_limit: 3,
            verification_window: Duration::from_secs(15 * 60),
        }
    }
}

impl OtpPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            code_ttl: Duration::from_secs(config.otp_ttl_secs),
            generation_limit: config.otp_generation_limit,
            generation_window: Duration::from_secs(config.otp_generation_window_secs),
            verification_limit: config.otp_verification_limit,
            verification_window: Duration::from_secs(config.otp_verification_window_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OtpError {
    #[error("too many {} attempts, retry in {}s", .scope.as_str(), .retry_after.as_secs())]
    RateLimited {
        scope: RateScope,
        retry_after: Duration,
    },

    /// Never requested, expired and already used all look the same from outside.
    #[error("OTP not found or expired")]
    NotFound,

    #[error("invalid OTP, {attempts_remaining} attempts remaining")]
    Invalid { attempts_remaining: u32 },
}

impl From<RateLimited> for OtpError {
    fn from(limited: RateLimited) -> Self {
        Self::RateLimited {
            scope: limited.scope,
            retry_after: limited.retry_after,
        }
    }
}

pub struct OtpService {
    codes: TtlStore<String>,
    generation: RateLimiter,
    verification: RateLimiter,
    notifier: Arc<dyn OtpNotifier>,
    policy: OtpPolicy,
}

impl OtpService {
    pub fn new(policy: OtpPolicy, clock: Arc<dyn Clock>, notifier: Arc<dyn OtpNotifier>) -> Self {
        Self {
            codes: TtlStore::new(clock.clone()),
            generation: RateLimiter::new(
                RateScope::Generation,
                policy.generation_limit,
                policy.generation_window,
                clock.clone(),
            ),
            verification: RateLimiter::new(
                RateScope::Verification,
                policy.verification_limit,
                policy.verification_window,
                clock,
            ),
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &OtpPolicy {
        &self.policy
    }

    /// Stores a new code for `identity` without sending it.
    #[instrument(skip(self))]
    pub fn issue(&self, identity: &str) -> Result<String, OtpError> {
        let identity = normalize_identity(identity);

        // Checked and counted in one step so concurrent requests cannot both slip under the cap.
        self.generation.try_acquire(&identity).inspect_err(|limited| {
            warn!(
                retry_after_secs = limited.retry_after.as_secs(),
                "OTP generation rate limit exceeded"
            );
        })?;

        let code = generate_otp_code();
        self.codes.set(identity, code.clone(), self.policy.code_ttl);
        info!("OTP issued");
        Ok(code)
    }

    /// Hands an issued code to the notifier. Failure leaves the code valid.
    #[instrument(skip(self, code))]
    pub async fn deliver(&self, identity: &str, code: &str) -> Delivery {
        let identity = normalize_identity(identity);
        match self.notifier.send_otp(&identity, code).await {
            Ok(()) => Delivery::Sent,
            Err(err) => {
                warn!(error = %err, "OTP delivery failed, code stays valid");
                Delivery::Failed
            }
        }
    }

    pub async fn generate(&self, identity: &str) -> Result<IssuedOtp, OtpError> {
        let code = self.issue(identity)?;
        let delivery = self.deliver(identity, &code).await;
        Ok(IssuedOtp {
            code,
            expires_in: self.policy.code_ttl,
            delivery,
        })
    }

    /// Checks `candidate` and consumes the stored code when it matches.
    #[instrument(skip(self, candidate))]
    pub fn verify(&self, identity: &str, candidate: &str) -> Result<(), OtpError> {
        let identity = normalize_identity(identity);
        self.verification.check(&identity).inspect_err(|_| {
            warn!("OTP verification rate limit exceeded");
        })?;

        match self.codes.take_if(&identity, |stored| stored == candidate) {
            Take::Taken(_) => {
                self.verification.reset(&identity);
                info!("OTP verified");
                Ok(())
            }
            Take::Missing => {
                self.verification.record(&identity);
                warn!("OTP not found or expired");
                Err(OtpError::NotFound)
            }
            Take::Rejected => {
                let attempts_remaining = self.verification.record(&identity);
                warn!(attempts_remaining, "Invalid OTP");
                Err(OtpError::Invalid { attempts_remaining })
            }
        }
    }

    /// Drops expired codes and rate-limit windows.
    pub fn sweep(&self) -> usize {
        self.codes.sweep() + self.generation.sweep() + self.verification.sweep()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use async_trait::async_trait;
    use eyre::eyre;
    use parking_lot::Mutex;

    use super::*;
    use crate::utils::clock::ManualClock;

    /// Records every delivery; optionally fails them all.
    #[derive(Default)]
    pub(crate) struct RecordingNotifier {
        pub sent: Mutex<Vec<(String, String)>>,
        pub fail: bool,
    }

    impl RecordingNotifier {
        pub(crate) fn failing() -> Self {
            Self {
                fail: true,
                ..Self::default()
            }
        }

        pub(crate) fn last_code_for(&self, to: &str) -> Option<String> {
            self.sent
                .lock()
                .iter()
                .rev()
                .find(|(recipient, _)| recipient == to)
                .map(|(_, code)| code.clone())
        }
    }

    #[async_trait]
    impl OtpNotifier for RecordingNotifier {
        async fn send_otp(&self, to: &str, code: &str) -> eyre::Result<()> {
            self.sent.lock().push((to.to_string(), code.to_string()));
            if self.fail {
                return Err(eyre!("mailbox unavailable"));
            }
            Ok(())
        }
    }

    fn service() -> (Arc<ManualClock>, Arc<RecordingNotifier>, OtpService) {
        let clock = Arc::new(ManualClock::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let service = OtpService::new(OtpPolicy::default(), clock.clone(), notifier.clone());
        (clock, notifier, service)
    }

    fn wrong_code(code: &str) -> &'static str {
        if code == "000000" { "111111" } else { "000000" }
    }

    #[actix_web::test]
    async fn test_fourth_generate_within_window_is_rate_limited() {
        let (_, _, service) = service();
        for _ in 0..3 {
            service.generate("a@x.com").await.unwrap();
        }
        let err = service.generate("a@x.com").await.unwrap_err();
        assert!(matches!(
            err,
            OtpError::RateLimited {
                scope: RateScope::Generation,
                ..
            }
        ));
    }

    #[actix_web::test]
    async fn test_generation_window_resets() {
        let (clock, _, service) = service();
        for _ in 0..3 {
            service.generate("a@x.com").await.unwrap();
        }
        clock.advance(Duration::from_secs(60));
        assert!(service.generate("a@x.com").await.is_ok());
    }

    #[actix_web::test]
    async fn test_generate_sends_stored_code() {
        let (_, notifier, service) = service();
        let issued = service.generate(" A@X.com ").await.unwrap();
        assert_eq!(issued.delivery, Delivery::Sent);
        assert_eq!(issued.expires_in, Duration::from_secs(300));
        assert_eq!(notifier.last_code_for("a@x.com"), Some(issued.code));
    }

    #[actix_web::test]
    async fn test_delivery_failure_keeps_code_valid() {
        let clock = Arc::new(ManualClock::new());
        let notifier = Arc::new(RecordingNotifier::failing());
        let service = OtpService::new(OtpPolicy::default(), clock, notifier);

        let issued = service.generate("a@x.com").await.unwrap();
        assert_eq!(issued.delivery, Delivery::Failed);
        assert_eq!(service.verify("a@x.com", &issued.code), Ok(()));
    }

    #[actix_web::test]
    async fn test_valid_exactly_once() {
        let (_, _, service) = service();
        let issued = service.generate("a@x.com").await.unwrap();
        assert_eq!(service.verify("a@x.com", &issued.code), Ok(()));
        assert_eq!(
            service.verify("a@x.com", &issued.code),
            Err(OtpError::NotFound)
        );
    }

    #[actix_web::test]
    async fn test_new_code_supersedes_previous() {
        let (_, _, service) = service();
        let first = service.generate("a@x.com").await.unwrap();
        let second = service.generate("a@x.com").await.unwrap();
        if first.code != second.code {
            assert!(matches!(
                service.verify("a@x.com", &first.code),
                Err(OtpError::Invalid { .. })
            ));
        }
        assert_eq!(service.verify("a@x.com", &second.code), Ok(()));
    }

    #[actix_web::test]
    async fn test_expired_code_is_not_found() {
        let (clock, _, service) = service();
        let issued = service.generate("a@x.com").await.unwrap();
        clock.advance(Duration::from_secs(301));
        assert_eq!(
            service.verify("a@x.com", &issued.code),
            Err(OtpError::NotFound)
        );
    }

    #[actix_web::test]
    async fn test_three_failures_lock_out_even_correct_code() {
        let (_, _, service) = service();
        let issued = service.generate("a@x.com").await.unwrap();
        let wrong = wrong_code(&issued.code);

        for remaining in [2, 1, 0] {
            assert_eq!(
                service.verify("a@x.com", wrong),
                Err(OtpError::Invalid {
                    attempts_remaining: remaining
                })
            );
        }
        assert!(matches!(
            service.verify("a@x.com", &issued.code),
            Err(OtpError::RateLimited {
                scope: RateScope::Verification,
                ..
            })
        ));
    }

    #[actix_web::test]
    async fn test_end_to_end_lifecycle() {
        let (_, _, service) = service();
        let code = service.generate("a@x.com").await.unwrap().code;

        assert_eq!(
            service.verify("a@x.com", wrong_code(&code)),
            Err(OtpError::Invalid {
                attempts_remaining: 2
            })
        );
        assert_eq!(service.verify("a@x.com", &code), Ok(()));
        assert_eq!(service.verify("a@x.com", &code), Err(OtpError::NotFound));
    }

    #[test]
    fn test_unknown_identity_counts_against_window() {
        let (_, _, service) = service();
        for _ in 0..3 {
            assert_eq!(
                service.verify("ghost@x.com", "123456"),
                Err(OtpError::NotFound)
            );
        }
        assert!(matches!(
            service.verify("ghost@x.com", "123456"),
            Err(OtpError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_sweep_reclaims_expired_state() {
        let (clock, _, service) = service();
        service.issue("a@x.com").unwrap();
        let _ = service.verify("b@x.com", "123456");
        clock.advance(Duration::from_secs(16 * 60));
        assert_eq!(service.sweep(), 3);
    }
}
