use actix_multipart::Multipart;
use actix_web::{HttpResponse, web};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    errors::AppError,
    models::attendance::CheckinOutcome,
    service::{handler::AppState, qr::ImageRejection},
};

const UPLOAD_FIELD: &str = "file";

pub struct AttendanceController;

#[derive(Deserialize)]
pub struct ScanRequest {
    pub qr_data: String,
}

#[derive(Serialize)]
struct ScanResponse<'a> {
    status: &'static str,
    message: String,
    team_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    member_id: Option<String>,
    name: &'a str,
    attendance_status: bool,
    checkin_time: Option<DateTime<Utc>>,
}

impl<'a> From<&'a CheckinOutcome> for ScanResponse<'a> {
    fn from(outcome: &'a CheckinOutcome) -> Self {
        let record = outcome.record();
        let message = match outcome {
            CheckinOutcome::Success(_) => format!("Welcome, {}! Attendance marked.", record.name),
            CheckinOutcome::AlreadyPresent(_) => {
                format!("{} has already checked in", record.name)
            }
        };

        Self {
            status: outcome.status(),
            message,
            team_id: &record.team_id,
            member_id: record.member_id.map(|id| id.to_string()),
            name: &record.name,
            attendance_status: record.present,
            checkin_time: record.checkin_time,
        }
    }
}

struct Upload {
    filename: String,
    content_type: String,
    bytes: Vec<u8>,
}

impl AttendanceController {
    pub async fn scan(
        state: web::Data<AppState>,
        request: web::Json<ScanRequest>,
    ) -> Result<HttpResponse, AppError> {
        let payload = state.scanner.parse(&request.qr_data)?;
        let outcome = state.attendance.check_in(&payload).await?;
        Ok(HttpResponse::Ok().json(ScanResponse::from(&outcome)))
    }

    pub async fn scan_file(
        state: web::Data<AppState>,
        mut multipart: Multipart,
    ) -> Result<HttpResponse, AppError> {
        let upload = read_upload(&mut multipart, state.scanner.max_upload_bytes()).await?;
        info!(
            filename = %upload.filename,
            size = upload.bytes.len(),
            "Received QR upload"
        );

        let scanner = state.scanner.clone();
        let payload = web::block(move || {
            scanner.scan_file(&upload.bytes, &upload.filename, &upload.content_type)
        })
        .await
        .map_err(|err| AppError::internal("QR decode worker failed", err))??;

        let outcome = state.attendance.check_in(&payload).await?;
        Ok(HttpResponse::Ok().json(ScanResponse::from(&outcome)))
    }

    pub async fn stats(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
        let stats = state.store.stats().await?;
        Ok(HttpResponse::Ok().json(serde_json::json!({
            "stats": stats,
            "pending_registrations": state.registration.staging().pending(),
        })))
    }
}

/// Reads the `file` field, giving up as soon as it grows past `max_bytes`.
async fn read_upload(multipart: &mut Multipart, max_bytes: usize) -> Result<Upload, AppError> {
    while let Some(mut field) = multipart
        .try_next()
        .await
        .map_err(|err| AppError::BadRequest(format!("Malformed multipart body: {err}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .unwrap_or_default()
            .to_string();
        let content_type = field
            .content_type()
            .map(ToString::to_string)
            .unwrap_or_default();

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| AppError::BadRequest(format!("Upload interrupted: {err}")))?
        {
            if bytes.len() + chunk.len() > max_bytes {
                warn!(max_bytes, "Upload exceeds size limit, aborting read");
                return Err(AppError::ImageRejected(ImageRejection::TooLarge {
                    size: bytes.len() + chunk.len(),
                    max: max_bytes,
                }));
            }
            bytes.extend_from_slice(&chunk);
        }

        return Ok(Upload {
            filename,
            content_type,
            bytes,
        });
    }

    Err(AppError::BadRequest(format!(
        "Missing multipart field '{UPLOAD_FIELD}'"
    )))
}

#[cfg(test)]
mod tests {
    use actix_web::{
        App,
        http::{StatusCode, header},
        test,
    };
    use serde_json::{Value, json};

    use crate::{
        config::{config::Config, routes::routes},
        controllers::tests::{register_team, test_state},
        service::{handler::app_config, qr::tests::qr_png},
    };

    const BOUNDARY: &str = "checkin-test-boundary";

    fn multipart(filename: &str, content_type: &str, bytes: &[u8]) -> (String, Vec<u8>) {
        let mut body = format!(
            "--{BOUNDARY}\r\n\
             Content-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\n\
             Content-Type: {content_type}\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(bytes);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
        (format!("multipart/form-data; boundary={BOUNDARY}"), body)
    }

    #[actix_web::test]
    async fn test_scan_string_marks_then_reports_present() {
        let (state, notifier) = test_state(&Config::default());
        let registered = register_team(&state, &notifier, "lead@x.com").await;
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let scan = || {
            test::TestRequest::post()
                .uri("/api/attendance/scan")
                .set_json(json!({ "qr_data": registered.qr_payload }))
                .to_request()
        };

        let resp = test::call_service(&app, scan()).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let first: Value = test::read_body_json(resp).await;
        assert_eq!(first["status"], "success");
        assert_eq!(first["attendance_status"], true);
        assert!(first.get("member_id").is_none());

        let resp = test::call_service(&app, scan()).await;
        let second: Value = test::read_body_json(resp).await;
        assert_eq!(second["status"], "already_present");
        assert_eq!(second["checkin_time"], first["checkin_time"]);
    }

    #[actix_web::test]
    async fn test_scan_string_errors() {
        let (state, _) = test_state(&Config::default());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/attendance/scan")
            .set_json(json!({ "qr_data": "{\"foo\":\"bar\"}" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error_code"], "invalid_qr_data");

        let req = test::TestRequest::post()
            .uri("/api/attendance/scan")
            .set_json(json!({ "qr_data": "team_id=HACK2026-001;access_key=nope" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_scan_file_checks_in_member() {
        let (state, notifier) = test_state(&Config::default());
        let registered = register_team(&state, &notifier, "lead@x.com").await;
        let member = &registered.members[1];
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let (content_type, body) =
            multipart("badge.png", "image/png", &qr_png(&member.qr_payload));
        let req = test::TestRequest::post()
            .uri("/api/attendance/scan-file")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["status"], "success");
        assert_eq!(body["member_id"], member.member_id.as_str());
        assert_eq!(body["name"], member.name.as_str());
    }

    #[actix_web::test]
    async fn test_stats_count_check_ins() {
        let (state, notifier) = test_state(&Config::default());
        let registered = register_team(&state, &notifier, "lead@x.com").await;
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::post()
            .uri("/api/attendance/scan")
            .set_json(json!({ "qr_data": registered.members[0].qr_payload }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), StatusCode::OK);

        let req = test::TestRequest::get().uri("/api/stats").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["stats"]["total_teams"], 1);
        assert_eq!(body["stats"]["total_members"], 2);
        assert_eq!(body["stats"]["teams_checked_in"], 0);
        assert_eq!(body["stats"]["members_checked_in"], 1);
        assert_eq!(body["stats"]["domain_distribution"]["AI"], 1);
        assert_eq!(body["pending_registrations"], 0);
    }

    #[actix_web::test]
    async fn test_scan_file_rejections() {
        let config = Config {
            max_upload_bytes: 1024,
            ..Config::default()
        };
        let (state, _) = test_state(&config);
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let (content_type, body) = multipart("badge.png", "image/png", &vec![0u8; 4096]);
        let req = test::TestRequest::post()
            .uri("/api/attendance/scan-file")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

        let (content_type, body) = multipart("badge.pdf", "application/pdf", b"%PDF-1.4");
        let req = test::TestRequest::post()
            .uri("/api/attendance/scan-file")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[actix_web::test]
    async fn test_scan_file_without_code_is_not_detected() {
        let (state, _) = test_state(&Config::default());
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .configure(app_config)
                .configure(routes),
        )
        .await;

        let solid = image::GrayImage::from_pixel(160, 160, image::Luma([255]));
        let mut png = Vec::new();
        solid
            .write_to(&mut std::io::Cursor::new(&mut png), image::ImageFormat::Png)
            .unwrap();

        let (content_type, body) = multipart("badge.png", "image/png", &png);
        let req = test::TestRequest::post()
            .uri("/api/attendance/scan-file")
            .insert_header((header::CONTENT_TYPE, content_type))
            .set_payload(body)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error_code"], "qr_not_detected");
    }
}
