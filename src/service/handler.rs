use std::{sync::Arc, time::Duration};

use actix_web::{rt, web};
use tracing::{debug, info};

use crate::{
    config::config::Config,
    errors::AppError,
    service::{
        attendance_service::AttendanceService,
        email_service::OtpNotifier,
        otp_service::{OtpPolicy, OtpService},
        qr::QrScanner,
        registration_service::{RegistrationService, RegistrationStaging},
        store::TeamStore,
    },
    utils::clock::Clock,
};

/// Services shared by every worker. Built once at startup.
pub struct AppState {
    pub otp: Arc<OtpService>,
    pub registration: RegistrationService,
    pub attendance: AttendanceService,
    pub scanner: Arc<QrScanner>,
    pub store: Arc<dyn TeamStore>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn TeamStore>,
        notifier: Arc<dyn OtpNotifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let otp = Arc::new(OtpService::new(
            OtpPolicy::from_config(config),
            clock.clone(),
            notifier,
        ));
        let staging = RegistrationStaging::new(config.registration_ttl(), clock.clone());
        let registration = RegistrationService::new(
            otp.clone(),
            staging,
            store.clone(),
            config.team_id_prefix.clone(),
            config.expose_otp_on_delivery_failure,
        );

        Self {
            otp,
            registration,
            attendance: AttendanceService::new(store.clone(), clock),
            scanner: Arc::new(QrScanner::new(config.max_upload_bytes)),
            store,
        }
    }

    /// Drops expired codes, rate-limit windows and staged registrations.
    pub fn sweep_expired(&self) -> usize {
        self.otp.sweep() + self.registration.staging().sweep()
    }
}

/// Periodically reclaims expired in-memory state. Lookups never rely on it.
pub fn spawn_sweeper(state: web::Data<AppState>, every: Duration) {
    info!(interval_secs = every.as_secs(), "Starting expiry sweeper");
    rt::spawn(async move {
        let mut ticker = rt::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = state.sweep_expired();
            if removed > 0 {
                debug!(removed, "Swept expired entries");
            }
        }
    });
}

pub fn app_config(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default()
            .limit(64 * 1024)
            .error_handler(|err, _req| {
                AppError::BadRequest(format!("Invalid request body: {err}")).into()
            }),
    );
}
