use actix_web::{
    get, post,
    web::{self, Data},
    HttpResponse, Responder,
};
use log::{debug, error, info};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::apns::{ActivityEvent, ApnsClient, ApnsError, LiveActivityGateway};
use crate::authtoken::AuthToken;
use crate::models::{ActivityRequest, HealthResponse, RegisterData};
use crate::registry::Registry;
use crate::util::get_short_token;

#[post("/register-activity")]
pub async fn register_activity(
    payload: web::Json<RegisterData>,
    registry: Data<Arc<RwLock<Registry>>>,
) -> impl Responder {
    registry
        .write()
        .await
        .register(&payload.journey_id, &payload.push_token);

    debug!(
        "register:: journey {} -> token ...{} ({} active)",
        payload.journey_id,
        get_short_token(&payload.push_token),
        registry.read().await.len()
    );
    HttpResponse::Ok().json(json!({ "status": "registered" }))
}

#[post("/update-train-activity")]
pub async fn update_train_activity(
    payload: web::Json<ActivityRequest>,
    registry: Data<Arc<RwLock<Registry>>>,
    auth_token: Data<Arc<RwLock<AuthToken>>>,
    apns: Data<ApnsClient>,
) -> impl Responder {
    let mut status = payload.status.clone();
    status.normalize_timestamps();

    if registry
        .write()
        .await
        .update(&payload.push_token, status.clone())
        .is_err()
    {
        info!(
            "update:: rejected unregistered token ...{}",
            get_short_token(&payload.push_token)
        );
        return HttpResponse::NotFound().json(json!({ "detail": "push token is not registered" }));
    }

    let auth = auth_token.read().await.token.clone();
    match apns
        .send_live_activity(&payload.push_token, &auth, ActivityEvent::Update, &status)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(json!({ "status": "success" })),
        Err(e) => upstream_failure("update", &payload.push_token, e),
    }
}

#[post("/end-train-activity")]
pub async fn end_train_activity(
    payload: web::Json<ActivityRequest>,
    registry: Data<Arc<RwLock<Registry>>>,
    auth_token: Data<Arc<RwLock<AuthToken>>>,
    apns: Data<ApnsClient>,
) -> impl Responder {
    let mut status = payload.status.clone();
    status.normalize_timestamps();

    // idempotent: ending an unknown token still forwards the end event
    registry.write().await.remove(&payload.push_token);

    let auth = auth_token.read().await.token.clone();
    match apns
        .send_live_activity(&payload.push_token, &auth, ActivityEvent::End, &status)
        .await
    {
        Ok(()) => HttpResponse::Ok().json(json!({ "status": "success" })),
        Err(e) => upstream_failure("end", &payload.push_token, e),
    }
}

#[get("/health")]
pub async fn health(registry: Data<Arc<RwLock<Registry>>>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy",
        timestamp: chrono::Utc::now().to_rfc3339(),
        active_activities: registry.read().await.len(),
    })
}

fn upstream_failure(op: &str, push_token: &str, e: ApnsError) -> HttpResponse {
    error!(
        "{}:: token ...{} APNs failure: {:?}",
        op,
        get_short_token(push_token),
        e
    );
    HttpResponse::BadGateway().json(json!({ "detail": format!("APNs error: {:?}", e) }))
}
