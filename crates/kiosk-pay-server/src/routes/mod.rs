//! HTTP endpoints.
//!
//! - [`payments`]: provider webhooks under `/payments/{tenant}/...`
//! - [`admin`]: bearer-gated settlement admin and credential onboarding
//! - [`health`]: `/health` and `/metrics`

pub mod admin;
pub mod health;
pub mod payments;

use actix_web::{web, HttpRequest};

/// Register every route.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.configure(health::configure)
        .configure(payments::configure)
        .configure(admin::configure);
}

/// `Authorization` header value, if present and valid UTF-8.
pub(crate) fn authorization(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}
