//! CORS configuration for the admin dashboard.

use actix_cors::Cors;

/// Build the CORS middleware from an explicit origin allow-list.
///
/// With no origins configured, only `http://localhost[:port]` is accepted.
/// Wildcards are rejected at config validation time.
pub fn build_cors(allowed_origins: &[String]) -> Cors {
    let allowed = allowed_origins.to_vec();
    Cors::default()
        .allowed_origin_fn(move |origin, _req_head| {
            let origin_str = origin.to_str().unwrap_or("");
            if allowed.is_empty() {
                origin_str == "http://localhost" || origin_str.starts_with("http://localhost:")
            } else {
                allowed.iter().any(|a| a == origin_str)
            }
        })
        .allowed_methods(vec!["GET", "POST", "PUT", "PATCH", "DELETE", "OPTIONS"])
        .allowed_headers(vec![
            actix_web::http::header::AUTHORIZATION,
            actix_web::http::header::ACCEPT,
            actix_web::http::header::CONTENT_TYPE,
        ])
        .max_age(3600)
}
