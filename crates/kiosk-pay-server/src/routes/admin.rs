use actix_web::{delete, get, patch, put, web, HttpRequest, HttpResponse};
use kiosk_pay::{CredentialInput, Provider, SettlementStatus};
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: u32 = 50;

/// Check the admin bearer token. Admin routes are off when no token is configured.
fn require_admin(req: &HttpRequest, state: &AppState) -> Result<(), ApiError> {
    let Some(expected) = state.admin_token.as_deref() else {
        return Err(ApiError::AdminDisabled);
    };
    if kiosk_pay::security::bearer_matches(super::authorization(req), expected) {
        Ok(())
    } else {
        tracing::warn!(path = %req.path(), "admin authentication failed");
        Err(ApiError::Unauthorized)
    }
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[get("/admin/settlements")]
pub async fn list_settlements(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<ListQuery>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let limit = query.limit.unwrap_or(DEFAULT_LIST_LIMIT);
    let offset = query.offset.unwrap_or(0);
    let settlements = state.engine.list(limit, offset).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "settlements": settlements,
        "offset": offset,
    })))
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: SettlementStatus,
}

#[patch("/admin/settlements/{id}/status")]
pub async fn set_status(
    req: HttpRequest,
    state: web::Data<AppState>,
    id: web::Path<String>,
    body: web::Json<StatusUpdate>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let record = state.engine.set_status(&id, body.status).await?;
    Ok(HttpResponse::Ok().json(record))
}

#[delete("/admin/settlements")]
pub async fn clear_settlements(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let removed = state.engine.clear().await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({ "removed": removed })))
}

#[put("/admin/tenants/{tenant}/credentials/{provider}")]
pub async fn put_credentials(
    req: HttpRequest,
    state: web::Data<AppState>,
    path: web::Path<(String, String)>,
    body: web::Json<CredentialInput>,
) -> Result<HttpResponse, ApiError> {
    require_admin(&req, &state)?;
    let (tenant, provider) = path.into_inner();
    let provider: Provider = provider
        .parse()
        .map_err(|_| ApiError::NotFound(format!("unknown provider: {provider}")))?;

    let stored = state.store_credentials(&tenant, provider, &body).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "tenant": tenant,
        "provider": provider,
        "stored": stored,
    })))
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(list_settlements)
        .service(set_status)
        .service(clear_settlements)
        .service(put_credentials);
}
