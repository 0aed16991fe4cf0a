//! REST handlers

use std::convert::Infallible;

use ab_bench_core::{Availability, BenchError, SessionController, StopOutcome, TrialConfig};
use serde::Serialize;
use warp::http::StatusCode;
use warp::reply::{json, with_status, Response};
use warp::{Rejection, Reply};

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message
    pub error: String,
    /// Individual validation failures
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl ErrorResponse {
    fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            errors: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    ab: Availability,
}

#[derive(Debug, Serialize)]
struct ValidateResponse {
    valid: bool,
    errors: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SessionCreated {
    session_id: String,
}

#[derive(Debug, Serialize)]
struct SessionStarted {
    session_id: String,
    status: &'static str,
}

#[derive(Debug, Serialize)]
struct SessionStopped {
    session_id: String,
    outcome: StopOutcome,
}

fn reply<T: Serialize>(status: StatusCode, body: &T) -> Response {
    with_status(json(body), status).into_response()
}

fn error_reply(err: BenchError) -> Response {
    let status = match &err {
        BenchError::ConfigValidation(_) => StatusCode::BAD_REQUEST,
        BenchError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        BenchError::AlreadyRunning(_) | BenchError::NotStartable { .. } => StatusCode::CONFLICT,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status == StatusCode::INTERNAL_SERVER_ERROR {
        tracing::error!(error = %err, "Request failed");
    }
    let body = ErrorResponse {
        error: err.to_string(),
        errors: err.validation_errors().to_vec(),
    };
    reply(status, &body)
}

/// `GET /api/health`
pub async fn health(controller: SessionController) -> Result<Response, Infallible> {
    let ab = controller.check_availability().await;
    let status = if ab.available { "ok" } else { "degraded" };
    Ok(reply(StatusCode::OK, &HealthResponse { status, ab }))
}

/// `POST /api/validate`
pub async fn validate(
    config: TrialConfig,
    controller: SessionController,
) -> Result<Response, Infallible> {
    let report = controller.validate(&config);
    Ok(reply(
        StatusCode::OK,
        &ValidateResponse {
            valid: report.is_ok(),
            errors: report.errors,
        },
    ))
}

/// `GET /api/sessions`
pub async fn list_sessions(controller: SessionController) -> Result<Response, Infallible> {
    Ok(reply(StatusCode::OK, &controller.list_sessions()))
}

/// `POST /api/sessions`
pub async fn create_session(
    config: TrialConfig,
    controller: SessionController,
) -> Result<Response, Infallible> {
    Ok(match controller.create_session(config) {
        Ok(session_id) => reply(StatusCode::CREATED, &SessionCreated { session_id }),
        Err(e) => error_reply(e),
    })
}

/// `GET /api/sessions/:id`
pub async fn get_session(
    id: String,
    controller: SessionController,
) -> Result<Response, Infallible> {
    Ok(match controller.get_session(&id) {
        Ok(session) => reply(StatusCode::OK, &session),
        Err(e) => error_reply(e),
    })
}

/// `DELETE /api/sessions/:id`
pub async fn delete_session(
    id: String,
    controller: SessionController,
) -> Result<Response, Infallible> {
    Ok(match controller.delete_session(&id) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_reply(e),
    })
}

/// `POST /api/sessions/:id/start`
pub async fn start_session(
    id: String,
    controller: SessionController,
) -> Result<Response, Infallible> {
    Ok(match controller.start_session(&id) {
        Ok(()) => reply(
            StatusCode::ACCEPTED,
            &SessionStarted {
                session_id: id,
                status: "running",
            },
        ),
        Err(e) => error_reply(e),
    })
}

/// `POST /api/sessions/:id/stop`
pub async fn stop_session(
    id: String,
    controller: SessionController,
) -> Result<Response, Infallible> {
    Ok(match controller.stop_session(&id) {
        Ok(outcome) => reply(
            StatusCode::OK,
            &SessionStopped {
                session_id: id,
                outcome,
            },
        ),
        Err(e) => error_reply(e),
    })
}

/// Turn warp rejections into JSON errors
pub async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found".to_string())
    } else if let Some(e) = rejection.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, format!("invalid request body: {e}"))
    } else if rejection.find::<warp::reject::UnsupportedMediaType>().is_some() {
        (
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "expected application/json".to_string(),
        )
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "method not allowed".to_string())
    } else {
        tracing::warn!(?rejection, "Unhandled rejection");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal server error".to_string(),
        )
    };
    Ok(reply(status, &ErrorResponse::new(message)))
}
