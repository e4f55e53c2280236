pub mod access;
pub mod auth;
mod contact;
pub mod error;
mod galleries;
mod media;
pub mod rate_limit;
pub mod setup;
mod users;
pub mod validation;

#[cfg(test)]
mod tests;

use axum::{
    body::Body,
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, Request},
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::utils::now_rfc3339;
use crate::AppState;
use error::ApiError;

/// Multipart framing and text fields on top of the file itself
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Public, with the stricter limit
    let auth_routes = Router::new()
        .route("/register", post(auth::register))
        .route("/verify-email", post(auth::verify_email))
        .route("/resend-otp", post(auth::resend_otp))
        .route("/login", post(auth::login))
        .route("/google-login", post(auth::google_login))
        .route("/forgot-password", post(auth::forgot_password))
        .route("/reset-password", post(auth::reset_password))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_auth,
        ))
        .route("/me", get(auth::me));

    let setup_routes = Router::new()
        .route("/status", get(setup::setup_status))
        .route("/create-admin", post(setup::create_admin));

    let user_routes = Router::new()
        .route("/profile", get(users::get_profile).put(users::update_profile))
        .route("/change-password", put(users::change_password))
        .route("/stats", get(users::my_stats))
        // Admin
        .route("/admin/all", get(users::admin_list_users))
        .route("/admin/deleted", get(users::admin_list_deleted))
        .route(
            "/admin/:id",
            get(users::admin_get_user)
                .put(users::admin_update_user)
                .delete(users::admin_delete_user),
        )
        .route("/admin/:id/recover", put(users::admin_recover_user))
        .route("/admin/:id/permanent", delete(users::admin_permanent_delete_user))
        .route("/admin/:id/reactivate", put(users::admin_reactivate_user))
        .route("/admin/:id/stats", get(users::admin_user_stats));

    let upload_limit = state.storage.max_file_size() + MULTIPART_OVERHEAD;
    let media_routes = Router::new()
        .route(
            "/upload",
            post(media::upload).layer(DefaultBodyLimit::max(upload_limit)),
        )
        .route("/", get(media::list))
        .route("/stats", get(media::stats))
        .route("/download-zip", post(media::download_zip))
        .route("/gallery/:id", get(media::by_gallery))
        .route(
            "/:id",
            get(media::get_media)
                .put(media::update_media)
                .delete(media::delete_media),
        )
        .route("/:id/download", get(media::download));

    let gallery_routes = Router::new()
        .route("/", get(galleries::list).post(galleries::create_gallery))
        .route("/shared", get(galleries::shared_with_me))
        .route(
            "/:id",
            get(galleries::get_gallery)
                .put(galleries::update_gallery)
                .delete(galleries::delete_gallery),
        )
        .route("/:id/share", post(galleries::share_gallery))
        .route("/:id/shares", get(galleries::gallery_shares))
        .route("/:id/share/:user_id", delete(galleries::unshare_gallery));

    let contact_routes = Router::new()
        .route("/", post(contact::submit))
        .route("/my-messages", get(contact::my_messages))
        .route(
            "/:id",
            put(contact::update_message).delete(contact::delete_message),
        )
        .route("/admin/all", get(contact::admin_list))
        .route("/admin/:id", delete(contact::admin_delete))
        .route("/admin/:id/status", put(contact::admin_update_status));

    let api_routes = Router::new()
        .route("/health", get(health_check))
        .nest("/auth", auth_routes)
        .nest("/setup", setup_routes)
        .nest("/users", user_routes)
        .nest("/media", media_routes)
        .nest("/galleries", gallery_routes)
        .nest("/contact", contact_routes)
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_api,
        ));

    let mut router = Router::new()
        .nest("/api", api_routes)
        .nest_service("/uploads", ServeDir::new(state.storage.dir()));

    // Single-page frontend: unknown paths fall back to index.html
    if let Some(static_dir) = &state.config.server.static_dir {
        let index = static_dir.join("index.html");
        router = router.fallback_service(
            ServeDir::new(static_dir).not_found_service(ServeFile::new(index)),
        );
    }

    router
        .layer(middleware::from_fn(security_headers))
        .layer(cors_layer(&state.config.server.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "message": "Galleria API is running",
        "timestamp": now_rfc3339(),
    }))
}

async fn api_not_found() -> ApiError {
    ApiError::not_found("Route not found")
}

fn cors_layer(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
        .max_age(Duration::from_secs(60 * 60));

    match HeaderValue::from_str(frontend_url.trim_end_matches('/')) {
        Ok(origin) => layer.allow_origin(origin),
        Err(e) => {
            warn!(frontend_url = %frontend_url, error = %e, "Invalid frontend URL; cross-origin requests disabled");
            layer
        }
    }
}

/// Conservative browser hardening headers on every response
async fn security_headers(request: Request<Body>, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("strict-origin-when-cross-origin"),
    );
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static(
            "default-src 'self'; img-src 'self' data: blob: https:; \
             style-src 'self' 'unsafe-inline'; script-src 'self' https://accounts.google.com; \
             frame-src https://accounts.google.com; frame-ancestors 'none'",
        ),
    );

    response
}
