use actix_web::web;

use crate::controllers::{
    attendance_controller::AttendanceController, registration_controller::RegistrationController,
};

pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/api/register", web::post().to(RegistrationController::register))
        .route(
            "/api/verify-otp",
            web::post().to(RegistrationController::verify_otp),
        )
        .route(
            "/api/team/{team_id}",
            web::get().to(RegistrationController::get_team),
        )
        .route(
            "/api/attendance/scan",
            web::post().to(AttendanceController::scan),
        )
        .route(
            "/api/attendance/scan-file",
            web::post().to(AttendanceController::scan_file),
        )
        .route("/api/stats", web::get().to(AttendanceController::stats));
}
