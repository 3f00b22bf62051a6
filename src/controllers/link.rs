//! Link/unlink endpoints.
//!
//! The retry boundary lives here: admission refusals are retried a bounded
//! number of times before surfacing, so a caller racing a finishing attempt
//! usually succeeds without seeing the gate at all.

use actix_web::{web, HttpResponse, Responder};
use serde::{Deserialize, Serialize};

use crate::errors::LinkError;
use crate::models::{
    CreateLinkTokenRequest, LinkHistoryEntry, LinkOutcome, LinkToken, LinkUserRequest,
    UnlinkOptions,
};
use crate::services::retry::with_admission_retry;
use crate::AppState;

#[derive(Serialize)]
pub struct LinkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<LinkOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct UnlinkResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_aggregate_user_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub still_connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct LinkHistoryResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<LinkHistoryEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct LinkTokenResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<LinkToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub aggregate_user_id: i64,
}

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/user/link")
            .route("", web::post().to(link_user))
            .route("/history", web::get().to(link_history))
            .route("/token", web::post().to(create_link_token))
            .route("/{default_user_id}", web::delete().to(unlink_user)),
    );
}

fn status_for(err: &LinkError) -> actix_web::http::StatusCode {
    use actix_web::http::StatusCode;
    match err {
        LinkError::AttemptInProgress { .. } => StatusCode::CONFLICT,
        LinkError::PolicyViolation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        LinkError::Store(_) | LinkError::Downstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn link_user(state: web::Data<AppState>, body: web::Json<LinkUserRequest>) -> impl Responder {
    let req = body.into_inner();
    let service = state.link_service.clone();

    let result = with_admission_retry(|| {
        let service = service.clone();
        let token = req.link_token.clone();
        async move {
            service
                .link_user(req.default_user_id, req.aggregate_user_id, token.as_deref())
                .await
        }
    })
    .await;

    match result {
        Ok(outcome) => HttpResponse::Ok().json(LinkResponse {
            success: true,
            outcome: Some(outcome),
            error: None,
        }),
        Err(err) => HttpResponse::build(status_for(&err)).json(LinkResponse {
            success: false,
            outcome: None,
            error: Some(err.to_string()),
        }),
    }
}

async fn unlink_user(
    state: web::Data<AppState>,
    path: web::Path<i64>,
    options: web::Query<UnlinkOptions>,
) -> impl Responder {
    let default_user_id = path.into_inner();
    let options = options.into_inner();
    let service = state.link_service.clone();

    let result = with_admission_retry(|| {
        let service = service.clone();
        async move { service.unlink_user(default_user_id, options).await }
    })
    .await;

    match result {
        Ok(outcome) => HttpResponse::Ok().json(UnlinkResponse {
            success: true,
            previous_aggregate_user_id: Some(outcome.previous_aggregate_user_id),
            still_connected: Some(outcome.still_connected),
            error: None,
        }),
        Err(err) => {
            let status = status_for(&err);
            HttpResponse::build(status).json(UnlinkResponse {
                success: false,
                previous_aggregate_user_id: None,
                still_connected: None,
                error: Some(err.to_string()),
            })
        }
    }
}

async fn link_history(
    state: web::Data<AppState>,
    query: web::Query<HistoryQuery>,
) -> impl Responder {
    match state.db.get_link_history(query.aggregate_user_id) {
        Ok(history) => HttpResponse::Ok().json(LinkHistoryResponse {
            success: true,
            history: Some(history),
            error: None,
        }),
        Err(e) => {
            log::error!("Failed to load link history: {}", e);
            HttpResponse::InternalServerError().json(LinkHistoryResponse {
                success: false,
                history: None,
                error: Some("Internal server error".to_string()),
            })
        }
    }
}

async fn create_link_token(
    state: web::Data<AppState>,
    body: web::Json<CreateLinkTokenRequest>,
) -> impl Responder {
    match state
        .db
        .create_link_token(body.aggregate_user_id, &body.platform, &body.external_id)
    {
        Ok(token) => HttpResponse::Ok().json(LinkTokenResponse {
            success: true,
            token: Some(token),
            error: None,
        }),
        Err(e) => {
            log::error!("Failed to create link token: {}", e);
            HttpResponse::InternalServerError().json(LinkTokenResponse {
                success: false,
                token: None,
                error: Some("Internal server error".to_string()),
            })
        }
    }
}
