use std::time::Duration;

use actix_web::{HttpResponse, ResponseError, http::StatusCode, http::header};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

use crate::{
    models::team::RegistrationRejected,
    service::{
        otp_service::OtpError,
        qr::{ImageRejection, QrError},
        rate_limiter::RateScope,
        store::StoreError,
    },
};

/// Everything a request can fail with, as seen by the client.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Too many requests. Please try again in {} seconds", retry_after_secs(.retry_after))]
    RateLimited {
        scope: RateScope,
        retry_after: Duration,
    },

    /// OTP or staged registration missing, expired or already used.
    #[error("OTP expired or not found. Please request a new one")]
    Expired,

    #[error("Invalid OTP. {attempts_remaining} attempts remaining")]
    InvalidOtp { attempts_remaining: u32 },

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    ImageRejected(ImageRejection),

    #[error("{0}")]
    QrNotDetected(String),

    #[error("{0}")]
    InvalidPayload(String),

    #[error("{0}")]
    NotFound(String),

    /// Details are logged where the error is created and never sent out.
    #[error("Internal server error")]
    Internal,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    status: &'static str,
    error_code: &'a str,
    message: String,
}

fn retry_after_secs(retry_after: &Duration) -> u64 {
    let secs = retry_after.as_secs() + u64::from(retry_after.subsec_nanos() > 0);
    secs.max(1)
}

impl AppError {
    pub fn internal(context: &str, err: impl std::fmt::Display) -> Self {
        error!(error = %err, "{context}");
        Self::Internal
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::RateLimited {
                scope: RateScope::Generation,
                ..
            } => "otp_generation_rate_limited",
            Self::RateLimited {
                scope: RateScope::Verification,
                ..
            } => "otp_verification_rate_limited",
            Self::Expired => "otp_expired",
            Self::InvalidOtp { .. } => "invalid_otp",
            Self::Conflict(_) => "conflict",
            Self::Validation(_) => "validation_error",
            Self::BadRequest(_) => "bad_request",
            Self::ImageRejected(ImageRejection::TooLarge { .. }) => "file_too_large",
            Self::ImageRejected(ImageRejection::UnsupportedType(_)) => "unsupported_file_type",
            Self::ImageRejected(ImageRejection::Unreadable(_)) => "unreadable_image",
            Self::QrNotDetected(_) => "qr_not_detected",
            Self::InvalidPayload(_) => "invalid_qr_data",
            Self::NotFound(_) => "not_found",
            Self::Internal => "internal_error",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Expired => StatusCode::GONE,
            Self::InvalidOtp { .. } | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Validation(_)
            | Self::QrNotDetected(_)
            | Self::InvalidPayload(_)
            | Self::ImageRejected(ImageRejection::Unreadable(_)) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            Self::ImageRejected(ImageRejection::TooLarge { .. }) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ImageRejected(ImageRejection::UnsupportedType(_)) => {
                StatusCode::UNSUPPORTED_MEDIA_TYPE
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let mut response = HttpResponse::build(self.status_code());
        if let Self::RateLimited { retry_after, .. } = self {
            response.insert_header((header::RETRY_AFTER, retry_after_secs(retry_after).to_string()));
        }
        response.json(ErrorBody {
            status: "error",
            error_code: self.error_code(),
            message: self.to_string(),
        })
    }
}

impl From<OtpError> for AppError {
    fn from(err: OtpError) -> Self {
        match err {
            OtpError::RateLimited { scope, retry_after } => Self::RateLimited { scope, retry_after },
            OtpError::NotFound => Self::Expired,
            OtpError::Invalid { attempts_remaining } => Self::InvalidOtp { attempts_remaining },
        }
    }
}

impl From<QrError> for AppError {
    fn from(err: QrError) -> Self {
        match err {
            QrError::ImageRejected(rejection) => Self::ImageRejected(rejection),
            QrError::NotDetected => Self::QrNotDetected(err.to_string()),
            QrError::InvalidPayload(_) => Self::InvalidPayload(err.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => {
                Self::Conflict(format!("Record already exists ({constraint})"))
            }
            other => Self::internal("Datastore failure", other),
        }
    }
}

impl From<RegistrationRejected> for AppError {
    fn from(err: RegistrationRejected) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<eyre::Report> for AppError {
    fn from(err: eyre::Report) -> Self {
        Self::internal("Unhandled error", format!("{err:#}"))
    }
}
