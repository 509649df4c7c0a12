pub mod attendance;
pub mod otp_codes;
pub mod team;
