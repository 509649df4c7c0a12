pub mod attendance_controller;
pub mod registration_controller;
