use std::sync::Arc;

use actix_web::web;
use async_trait::async_trait;
use eyre::{Result, WrapErr, eyre};
use lettre::{
    Message, SmtpTransport, Transport, message::header::ContentType,
    transport::smtp::authentication::Credentials,
};
use tracing::{info, instrument, warn};

use crate::config::config::Config;

/// Delivers a freshly issued OTP to its owner.
///
/// Failures are reported to the caller; they never roll back issuance.
#[async_trait]
pub trait OtpNotifier: Send + Sync {
    async fn send_otp(&self, to: &str, code: &str) -> Result<()>;
}

pub struct EmailService {
    mailer: SmtpTransport,
    from_address: String,
    platform_name: String,
    otp_ttl_minutes: u64,
}

impl EmailService {
    pub fn new(
        smtp_host: &str,
        smtp_user: &str,
        smtp_pass: &str,
        platform_name: &str,
        otp_ttl_minutes: u64,
    ) -> Result<Self> {
        let creds = Credentials::new(smtp_user.to_string(), smtp_pass.to_string());

        let mailer = SmtpTransport::relay(smtp_host)
            .wrap_err_with(|| format!("Configuring SMTP relay {smtp_host}"))?
            .credentials(creds)
            .build();

        Ok(Self {
            mailer,
            from_address: smtp_user.to_string(),
            platform_name: platform_name.to_string(),
            otp_ttl_minutes,
        })
    }

    fn otp_message(&self, to: &str, code: &str) -> Result<Message> {
        let body = format!(
            "Your {} verification code is {code}.\n\n\
             It expires in {} minutes. If you did not request it, ignore this email.",
            self.platform_name, self.otp_ttl_minutes
        );

        Message::builder()
            .from(self.from_address.parse().wrap_err("Invalid sender address")?)
            .to(to.parse().wrap_err("Invalid recipient address")?)
            .subject(format!("{} verification code", self.platform_name))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .wrap_err("Building OTP email")
    }
}

#[async_trait]
impl OtpNotifier for EmailService {
    #[instrument(skip(self, code))]
    async fn send_otp(&self, to: &str, code: &str) -> Result<()> {
        let email = self.otp_message(to, code)?;
        let mailer = self.mailer.clone();

        // SmtpTransport is blocking; keep it off the worker thread.
        web::block(move || mailer.send(&email))
            .await
            .map_err(|e| eyre!("SMTP worker failed: {e}"))?
            .wrap_err("Sending OTP email")?;

        info!("OTP email delivered");
        Ok(())
    }
}

/// Used when SMTP is not configured: every delivery fails.
pub struct DisabledNotifier;

#[async_trait]
impl OtpNotifier for DisabledNotifier {
    async fn send_otp(&self, to: &str, _code: &str) -> Result<()> {
        warn!(%to, "SMTP is not configured, OTP not delivered");
        Err(eyre!("SMTP is not configured"))
    }
}

/// Picks the SMTP sender when credentials are present.
pub fn notifier_from_config(config: &Config) -> Result<Arc<dyn OtpNotifier>> {
    match (&config.smtp_host, &config.smtp_user, &config.smtp_pass) {
        (Some(host), Some(user), Some(pass)) if !host.is_empty() => {
            info!(%host, "Initializing SMTP notifier");
            let service = EmailService::new(
                host,
                user,
                pass,
                &config.platform_name,
                config.otp_ttl_secs / 60,
            )?;
            Ok(Arc::new(service))
        }
        _ => {
            warn!("SMTP_HOST/SMTP_USER/SMTP_PASS not set, OTP emails are disabled");
            Ok(Arc::new(DisabledNotifier))
        }
    }
}
