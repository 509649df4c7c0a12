pub mod attendance_service;
pub mod email_service;
pub mod handler;
pub mod otp_service;
pub mod qr;
pub mod rate_limiter;
pub mod registration_service;
pub mod store;
pub mod ttl_store;
