use actix_web::http::StatusCode;
use actix_web::{post, web, HttpRequest, HttpResponse};
use kiosk_pay::{
    ClickAdapter, ErrorCode, InboundRequest, PaymeAdapter, Phase, ProviderAdapter, ProviderReply,
};

use crate::metrics;
use crate::state::AppState;

/// Run one provider webhook: load the tenant's secrets, let the adapter
/// authenticate and drive the engine, record metrics.
///
/// A tenant without credentials for this provider gets the provider's
/// signature-invalid answer before any order or ledger access.
async fn handle<A: ProviderAdapter>(
    adapter: &A,
    phase: Phase,
    req: &HttpRequest,
    tenant: &str,
    state: &AppState,
    body: &[u8],
) -> HttpResponse {
    let provider = adapter.provider();
    let inbound = InboundRequest::new(super::authorization(req), body);
    let start = std::time::Instant::now();

    let reply = match state.load_secrets(tenant, provider).await {
        Ok(Some(secrets)) => match phase {
            Phase::Prepare => adapter.prepare(&state.engine, &inbound, &secrets).await,
            Phase::Complete => adapter.complete(&state.engine, &inbound, &secrets).await,
        },
        Ok(None) => {
            tracing::warn!(tenant = %tenant, %provider, "no credentials for tenant");
            adapter.reject(&inbound, ErrorCode::SignatureInvalid)
        }
        Err(e) => {
            tracing::error!(tenant = %tenant, %provider, error = %e, "credential lookup failed");
            adapter.reject(&inbound, ErrorCode::InternalError)
        }
    };

    record(provider.as_str(), phase, &reply, start.elapsed().as_secs_f64());
    tracing::info!(
        tenant = %tenant,
        %provider,
        phase = phase.as_str(),
        outcome = reply.outcome,
        "webhook handled"
    );

    HttpResponse::build(StatusCode::from_u16(reply.status).unwrap_or(StatusCode::OK))
        .json(reply.body)
}

fn record(provider: &str, phase: Phase, reply: &ProviderReply, elapsed: f64) {
    metrics::WEBHOOK_REQUESTS
        .with_label_values(&[provider, phase.as_str(), reply.outcome])
        .inc();
    if reply.outcome == ErrorCode::SignatureInvalid.label() {
        metrics::AUTH_FAILURES.with_label_values(&[provider]).inc();
    }
    if phase == Phase::Complete {
        metrics::COMPLETE_LATENCY
            .with_label_values(&[provider])
            .observe(elapsed);
    }
}

#[post("/payments/{tenant}/click/prepare")]
pub async fn click_prepare(
    req: HttpRequest,
    tenant: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle(&ClickAdapter::new(), Phase::Prepare, &req, &tenant, &state, &body).await
}

#[post("/payments/{tenant}/click/complete")]
pub async fn click_complete(
    req: HttpRequest,
    tenant: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle(&ClickAdapter::new(), Phase::Complete, &req, &tenant, &state, &body).await
}

#[post("/payments/{tenant}/payme/check")]
pub async fn payme_check(
    req: HttpRequest,
    tenant: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle(&PaymeAdapter::new(), Phase::Prepare, &req, &tenant, &state, &body).await
}

#[post("/payments/{tenant}/payme/perform")]
pub async fn payme_perform(
    req: HttpRequest,
    tenant: web::Path<String>,
    state: web::Data<AppState>,
    body: web::Bytes,
) -> HttpResponse {
    handle(&PaymeAdapter::new(), Phase::Complete, &req, &tenant, &state, &body).await
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(click_prepare)
        .service(click_complete)
        .service(payme_check)
        .service(payme_perform);
}
