use actix_web::{HttpResponse, web};
use serde::Deserialize;

use crate::{
    errors::AppError,
    models::team::{NewRegistration, TeamOut},
    service::handler::AppState,
};

pub struct RegistrationController;

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub leader_email: String,
    pub otp: String,
}

impl RegistrationController {
    pub async fn register(
        state: web::Data<AppState>,
        request: web::Json<NewRegistration>,
    ) -> Result<HttpResponse, AppError> {
        let receipt = state.registration.issue_otp(request.into_inner()).await?;
        Ok(HttpResponse::Accepted().json(receipt))
    }

    pub async fn verify_otp(
        state: web::Data<AppState>,
        request: web::Json<VerifyOtpRequest>,
    ) -> Result<HttpResponse, AppError> {
        let registered = state
            .registration
            .verify_otp(&request.leader_email, &request.otp)
            .await?;

        Ok(HttpResponse::Created().json(serde_json::json!({
            "status": "success",
            "message": "Team registered successfully",
            "data": registered
        })))
    }

    pub async fn get_team(
        state: web::Data<AppState>,
        path: web::Path<String>,
    ) -> Result<HttpResponse, AppError> {
        let team_id = path.into_inner();
        match state.store.find_team(team_id.trim()).await? {
            Some(team) => Ok(HttpResponse::Ok().json(TeamOut::from(&team))),
            None => Err(AppError::NotFound(format!("Team {team_id} not found"))),
        }
    }
}
