//! HTTP API over the detection pipeline
//!
//! `POST /api/identifylogins/` takes a login event and returns the detection
//! result; failures are reported as a JSON error body with a matching status.

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse, ResponseError};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::detection::{DetectionError, DetectionPipeline};
use crate::models::{LoginEvent, ValidationErrors};

pub const IDENTIFY_LOGINS_PATH: &str = "/api/identifylogins/";
pub const HEALTH_PATH: &str = "/health";

/// JSON error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiError {
    pub status: u16,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<ValidationErrors>,
}

impl ApiError {
    pub fn invalid_arguments(errors: ValidationErrors) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST.as_u16(),
            code: "invalid_arguments".to_string(),
            desc: None,
            validation_errors: Some(errors),
        }
    }

    pub fn invalid_body(cause: impl fmt::Display) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST.as_u16(),
            code: "invalid_body".to_string(),
            desc: Some(cause.to_string()),
            validation_errors: None,
        }
    }

    pub fn internal(cause: impl fmt::Display) -> Self {
        ApiError {
            status: StatusCode::INTERNAL_SERVER_ERROR.as_u16(),
            code: "internal_error".to_string(),
            desc: Some(cause.to_string()),
            validation_errors: None,
        }
    }

    pub fn not_implemented(method: &str, path: &str) -> Self {
        ApiError {
            status: StatusCode::NOT_IMPLEMENTED.as_u16(),
            code: "not_implemented".to_string(),
            desc: Some(format!("{} Not Implemented on {}", method, path)),
            validation_errors: None,
        }
    }
}

impl From<DetectionError> for ApiError {
    fn from(err: DetectionError) -> Self {
        match err {
            DetectionError::Validation(errors) => ApiError::invalid_arguments(errors),
            DetectionError::Internal(cause) => ApiError::internal(cause),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code, self.status)?;
        if let Some(desc) = &self.desc {
            write!(f, ": {}", desc)?;
        }
        Ok(())
    }
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(self)
    }
}

/// Register the API routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource(vec![IDENTIFY_LOGINS_PATH, IDENTIFY_LOGINS_PATH.trim_end_matches('/')])
            .route(web::post().to(identify_logins))
            .default_service(web::to(not_implemented)),
    )
    .route(HEALTH_PATH, web::get().to(health));
}

async fn identify_logins(
    pipeline: web::Data<DetectionPipeline>,
    body: web::Bytes,
) -> Result<HttpResponse, ApiError> {
    let event: LoginEvent = serde_json::from_slice(&body).map_err(ApiError::invalid_body)?;

    match pipeline.detect(&event).await {
        Ok(result) => Ok(HttpResponse::Ok().json(result)),
        Err(e) => {
            if e.is_validation() {
                log::debug!("Rejected login event {:?}: {}", event.event_id, e);
            } else {
                log::error!("Detection failed for event {:?}: {}", event.event_id, e);
            }
            Err(e.into())
        }
    }
}

async fn not_implemented(req: HttpRequest) -> HttpResponse {
    ApiError::not_implemented(req.method().as_str(), req.path()).error_response()
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}
