//! Handler tests against the full router with an in-memory database.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use super::auth::{hash_password, hash_token, issue_token};
use super::create_router;
use crate::config::Config;
use crate::db::{
    find_user_by_email, find_user_by_id, init_in_memory, insert_user, NewUser, User, UserRole,
};
use crate::oauth::{GoogleIdentity, GoogleIdentityVerifier, OAuthError};
use crate::storage::test_images;
use crate::utils::to_rfc3339;
use crate::AppState;

const PASSWORD: &str = "password123";
const BOUNDARY: &str = "galleria-test-boundary";

/// Accepts the token "good-token" as jane@gmail.com
struct StubGoogle;

#[async_trait]
impl GoogleIdentityVerifier for StubGoogle {
    async fn verify(&self, id_token: &str) -> Result<GoogleIdentity, OAuthError> {
        if id_token == "good-token" {
            Ok(GoogleIdentity {
                subject: "google-123".to_string(),
                email: "Jane@Gmail.com".to_string(),
                name: Some("Jane Google".to_string()),
                picture: Some("https://example.com/jane.png".to_string()),
            })
        } else {
            Err(OAuthError::Rejected("invalid_token".to_string()))
        }
    }
}

struct TestApp {
    router: Router,
    state: Arc<AppState>,
    _uploads: TempDir,
}

impl TestApp {
    async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    async fn with_config(customize: impl FnOnce(&mut Config)) -> Self {
        let uploads = TempDir::new().unwrap();
        let mut config = Config::default();
        config.auth.jwt_secret = "test-secret".to_string();
        config.rate_limit.enabled = false;
        config.uploads.dir = uploads.path().to_path_buf();
        customize(&mut config);

        let db = init_in_memory().await.unwrap();
        let state = Arc::new(AppState::new(config, db).with_google_verifier(Arc::new(StubGoogle)));

        Self {
            router: create_router(state.clone()),
            state,
            _uploads: uploads,
        }
    }

    /// A verified account with a session token
    async fn user(&self, name: &str, role: UserRole) -> (User, String) {
        let user = insert_user(
            &self.state.db,
            NewUser {
                name: name.to_string(),
                email: format!("{}@example.com", name.to_lowercase()),
                password_hash: Some(hash_password(PASSWORD).unwrap()),
                role,
                avatar: None,
                google_id: None,
                is_email_verified: true,
                email_verification_otp: None,
                email_verification_expires: None,
            },
        )
        .await
        .unwrap();
        let token = issue_token("test-secret", 7, &user.id).unwrap();
        (user, token)
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    async fn json(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Value,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::from(body.to_string())).unwrap())
            .await
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method("GET").uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        self.send(builder.body(Body::empty()).unwrap()).await
    }

    async fn upload(&self, token: &str, fields: &[(&str, &str)], png: Vec<u8>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/api/media/upload")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(fields, "photo.png", "image/png", &png)))
            .unwrap();
        self.send(request).await
    }
}

fn multipart_body(fields: &[(&str, &str)], filename: &str, content_type: &str, file: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"media\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
            BOUNDARY, filename, content_type
        )
        .as_bytes(),
    );
    body.extend_from_slice(file);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

#[tokio::test]
async fn test_health_and_unknown_route() {
    let app = TestApp::new().await;

    let response = app
        .router
        .clone()
        .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-content-type-options").unwrap(),
        "nosniff"
    );
    assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");

    let (status, body) = app.get("/api/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "Route not found");
}

#[tokio::test]
async fn test_register_verify_and_login() {
    let app = TestApp::new().await;

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({ "name": "Ama", "email": "Ama@Example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["requiresVerification"], true);
    assert_eq!(body["email"], "ama@example.com");

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "ama@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Please verify your email first");

    sqlx::query("UPDATE users SET email_verification_otp = ? WHERE email = ?")
        .bind(hash_token("123456"))
        .bind("ama@example.com")
        .execute(&app.state.db)
        .await
        .unwrap();

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/verify-email",
            None,
            json!({ "email": "ama@example.com", "otp": "654321" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/verify-email",
            None,
            json!({ "email": "ama@example.com", "otp": "123456" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["token"].as_str().is_some());

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "AMA@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap().to_string();

    let (status, body) = app.get("/api/auth/me", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "ama@example.com");

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/register",
            None,
            json!({ "name": "Ama", "email": "ama@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_expired_otp_is_rejected() {
    let app = TestApp::new().await;

    app.json(
        "POST",
        "/api/auth/register",
        None,
        json!({ "name": "Kofi", "email": "kofi@example.com", "password": PASSWORD }),
    )
    .await;

    sqlx::query(
        "UPDATE users SET email_verification_otp = ?, email_verification_expires = ? WHERE email = ?",
    )
    .bind(hash_token("123456"))
    .bind(to_rfc3339(Utc::now() - Duration::minutes(11)))
    .bind("kofi@example.com")
    .execute(&app.state.db)
    .await
    .unwrap();

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/verify-email",
            None,
            json!({ "email": "kofi@example.com", "otp": "123456" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("expired"));

    let user = find_user_by_email(&app.state.db, "kofi@example.com")
        .await
        .unwrap()
        .unwrap();
    assert!(!user.is_email_verified);
}

#[tokio::test]
async fn test_requests_without_valid_token_are_unauthorized() {
    let app = TestApp::new().await;

    let (status, _) = app.get("/api/media", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = app.get("/api/media", Some("not-a-jwt")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (_, user_token) = app.user("Esi", UserRole::User).await;
    let (status, _) = app.get("/api/users/admin/all", Some(&user_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_soft_deleted_user_cannot_log_in() {
    let app = TestApp::new().await;
    let (_, admin_token) = app.user("Admin", UserRole::Admin).await;
    let (user, user_token) = app.user("Yaw", UserRole::User).await;

    let (status, _) = app
        .json(
            "DELETE",
            &format!("/api/users/admin/{}", user.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": user.email, "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid credentials");

    let (status, _) = app.get("/api/auth/me", Some(&user_token)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app.get("/api/users/admin/deleted", Some(&admin_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/users/admin/{}/recover", user.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": user.email, "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_admin_cannot_delete_or_demote_self() {
    let app = TestApp::new().await;
    let (admin, admin_token) = app.user("Admin", UserRole::Admin).await;

    let (status, body) = app
        .json(
            "DELETE",
            &format!("/api/users/admin/{}", admin.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "You cannot delete your own account");

    let (status, _) = app
        .json(
            "DELETE",
            &format!("/api/users/admin/{}/permanent", admin.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/users/admin/{}", admin.id),
            Some(&admin_token),
            json!({ "role": "user" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/users/admin/{}", admin.id),
            Some(&admin_token),
            json!({ "isActive": false }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_cannot_modify_another_users_media() {
    let app = TestApp::new().await;
    let (owner, owner_token) = app.user("Owner", UserRole::User).await;
    let (_, other_token) = app.user("Other", UserRole::User).await;

    let (status, body) = app
        .upload(
            &owner_token,
            &[("title", "Sunset"), ("tags", "beach, evening"), ("isPublic", "false")],
            test_images::png(8, 6),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["message"], "Media uploaded successfully");
    assert_eq!(body["media"]["user"]["id"], owner.id.as_str());
    assert_eq!(body["media"]["dimensions"]["width"], 8);
    assert_eq!(body["media"]["tags"], json!(["beach", "evening"]));
    let media_id = body["media"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/media/{}", media_id),
            Some(&other_token),
            json!({ "title": "Mine now" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(
            "DELETE",
            &format!("/api/media/{}", media_id),
            Some(&other_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.get(&format!("/api/media/{}", media_id), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .json(
            "PUT",
            &format!("/api/media/{}", media_id),
            Some(&owner_token),
            json!({ "title": "Golden hour", "tags": ["sky"], "isPublic": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["media"]["title"], "Golden hour");
    assert_eq!(body["media"]["isPublic"], true);

    let (status, body) = app.get(&format!("/api/media/{}", media_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["media"]["views"], 0);

    let (status, body) = app
        .get(&format!("/api/media/{}", media_id), Some(&other_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["media"]["views"], 1);
}

#[tokio::test]
async fn test_upload_rejects_non_images() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Owner", UserRole::User).await;

    let (status, body) = app
        .upload(&token, &[("title", "Fake")], b"definitely not a png".to_vec())
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Only JPG, JPEG, and PNG files are allowed");

    let leftover = std::fs::read_dir(app.state.storage.dir()).unwrap().count();
    assert_eq!(leftover, 0);
}

#[tokio::test]
async fn test_media_listing_scopes() {
    let app = TestApp::new().await;
    let (alice, alice_token) = app.user("Alice", UserRole::User).await;
    let (_, bob_token) = app.user("Bob", UserRole::User).await;

    app.upload(&alice_token, &[("title", "Public one"), ("isPublic", "true")], test_images::png(2, 2))
        .await;
    app.upload(&alice_token, &[("title", "Private one")], test_images::png(2, 2))
        .await;

    let (status, body) = app.get("/api/media", Some(&alice_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 2);

    let (status, body) = app
        .get(&format!("/api/media?userId={}", alice.id), Some(&bob_token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total"], 1);
    assert_eq!(body["media"][0]["title"], "Public one");

    let (_, body) = app.get("/api/media?search=private", Some(&alice_token)).await;
    assert_eq!(body["total"], 1);

    let (status, body) = app.get("/api/media/stats", Some(&alice_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalMedia"], 2);
    assert_eq!(body["recentMedia"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_download_zip() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Owner", UserRole::User).await;

    let mut ids = Vec::new();
    for _ in 0..2 {
        let (_, body) = app.upload(&token, &[], test_images::png(3, 3)).await;
        ids.push(body["media"]["id"].as_str().unwrap().to_string());
    }

    let (status, _) = app
        .json("POST", "/api/media/download-zip", Some(&token), json!({ "mediaIds": [] }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::builder()
        .method("POST")
        .uri("/api/media/download-zip")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "mediaIds": &ids }).to_string()))
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/zip"
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let archive = zip::ZipArchive::new(std::io::Cursor::new(bytes.to_vec())).unwrap();
    assert_eq!(archive.len(), 2);

    let (_, body) = app.get(&format!("/api/media/{}", ids[0]), Some(&token)).await;
    assert_eq!(body["media"]["downloads"], 1);
}

#[tokio::test]
async fn test_shared_gallery_readable_by_target_only() {
    let app = TestApp::new().await;
    let (_, alice_token) = app.user("Alice", UserRole::User).await;
    let (bob, bob_token) = app.user("Bob", UserRole::User).await;
    let (_, carol_token) = app.user("Carol", UserRole::User).await;

    let (status, body) = app
        .json(
            "POST",
            "/api/galleries",
            Some(&alice_token),
            json!({ "name": "  Holiday  ", "isPublic": false }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["gallery"]["name"], "Holiday");
    let gallery_id = body["gallery"]["id"].as_str().unwrap().to_string();
    let gallery_uri = format!("/api/galleries/{}", gallery_id);

    let (status, _) = app
        .json("POST", "/api/galleries", Some(&alice_token), json!({ "name": "Holiday" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app.get(&gallery_uri, Some(&bob_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let share_uri = format!("{}/share", gallery_uri);
    let (status, body) = app
        .json("POST", &share_uri, Some(&alice_token), json!({ "email": bob.email }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["share"]["user"]["id"], bob.id.as_str());

    let (status, _) = app
        .json("POST", &share_uri, Some(&alice_token), json!({ "userId": bob.id }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json("POST", &share_uri, Some(&bob_token), json!({ "email": "carol@example.com" }))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get(&gallery_uri, Some(&bob_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gallery"]["isOwner"], false);
    assert_eq!(body["gallery"]["sharedBy"]["name"], "Alice");

    let (status, _) = app.get(&gallery_uri, Some(&carol_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.get("/api/galleries/shared", Some(&bob_token)).await;
    assert_eq!(body["galleries"].as_array().unwrap().len(), 1);

    let (_, body) = app.get("/api/galleries/shared", Some(&carol_token)).await;
    assert_eq!(body["galleries"].as_array().unwrap().len(), 0);

    // The share target may leave
    let (status, _) = app
        .json(
            "DELETE",
            &format!("{}/share/{}", gallery_uri, bob.id),
            Some(&bob_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app.get(&gallery_uri, Some(&bob_token)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_deleting_gallery_detaches_media() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Alice", UserRole::User).await;

    let (_, body) = app
        .json("POST", "/api/galleries", Some(&token), json!({ "name": "Trip" }))
        .await;
    let gallery_id = body["gallery"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .upload(&token, &[("gallery", gallery_id.as_str())], test_images::png(2, 2))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    let media_id = body["media"]["id"].as_str().unwrap().to_string();

    let (status, body) = app
        .get(&format!("/api/media/gallery/{}", gallery_id), Some(&token))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["totalItems"], 1);
    assert_eq!(body["pagination"]["hasNext"], false);

    let (status, _) = app
        .json("DELETE", &format!("/api/galleries/{}", gallery_id), Some(&token), json!({}))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = app.get(&format!("/api/media/{}", media_id), Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["media"]["gallery"], Value::Null);
}

#[tokio::test]
async fn test_setup_flow() {
    let app = TestApp::new().await;

    let (_, body) = app.get("/api/setup/status", None).await;
    assert_eq!(body["needsSetup"], true);

    let (status, body) = app
        .json(
            "POST",
            "/api/setup/create-admin",
            None,
            json!({ "name": "Root", "email": "root@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["user"]["role"], "admin");

    let (_, body) = app.get("/api/setup/status", None).await;
    assert_eq!(body["needsSetup"], false);

    let (status, _) = app
        .json(
            "POST",
            "/api/setup/create-admin",
            None,
            json!({ "name": "Second", "email": "second@example.com", "password": PASSWORD }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_google_login() {
    let app = TestApp::new().await;

    let (status, _) = app
        .json("POST", "/api/auth/google-login", None, json!({ "token": "forged" }))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = app
        .json("POST", "/api/auth/google-login", None, json!({ "token": "good-token" }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["email"], "jane@gmail.com");

    let user = find_user_by_email(&app.state.db, "jane@gmail.com")
        .await
        .unwrap()
        .unwrap();
    assert!(user.is_email_verified);
    assert_eq!(user.google_id.as_deref(), Some("google-123"));
    assert!(user.password_hash.is_none());
}

#[tokio::test]
async fn test_contact_messages() {
    let app = TestApp::new().await;
    let (_, admin_token) = app.user("Admin", UserRole::Admin).await;
    let (user, user_token) = app.user("Abena", UserRole::User).await;

    let (status, body) = app
        .json(
            "POST",
            "/api/contact",
            None,
            json!({ "name": "Visitor", "email": "visitor@example.com", "message": "Hello" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["contact"]["user"], Value::Null);
    let anonymous_id = body["contact"]["id"].as_str().unwrap().to_string();

    let (status, _) = app
        .json("POST", "/api/contact", None, json!({ "message": "No name" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json("POST", "/api/contact", Some(&user_token), json!({ "message": "Signed in" }))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["contact"]["email"], user.email.as_str());

    let (_, body) = app.get("/api/contact/my-messages", Some(&user_token)).await;
    assert_eq!(body["total"], 1);

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/contact/{}", anonymous_id),
            Some(&user_token),
            json!({ "message": "Edited" }),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .json(
            "PUT",
            &format!("/api/contact/admin/{}/status", anonymous_id),
            Some(&admin_token),
            json!({ "status": "archived" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json(
            "PUT",
            &format!("/api/contact/admin/{}/status", anonymous_id),
            Some(&admin_token),
            json!({ "status": "replied", "isResolved": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["contact"]["status"], "replied");
    assert_eq!(body["contact"]["isResolved"], true);

    let (_, body) = app
        .get("/api/contact/admin/all?status=unread", Some(&admin_token))
        .await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_profile_update_and_password_change() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Kwame", UserRole::User).await;
    app.user("Taken", UserRole::User).await;

    let (status, _) = app
        .json("PUT", "/api/users/profile", Some(&token), json!({ "email": "taken@example.com" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .json("PUT", "/api/users/profile", Some(&token), json!({ "name": "Kwame A." }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Kwame A.");

    let (status, _) = app
        .json(
            "PUT",
            "/api/users/change-password",
            Some(&token),
            json!({ "currentPassword": "wrong-one", "newPassword": "newsecret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "PUT",
            "/api/users/change-password",
            Some(&token),
            json!({ "currentPassword": PASSWORD, "newPassword": "newsecret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": "kwame@example.com", "password": "newsecret1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
}

async fn count(app: &TestApp, sql: &str, id: &str) -> i64 {
    sqlx::query_scalar(sql)
        .bind(id)
        .fetch_one(&app.state.db)
        .await
        .unwrap()
}

fn login_from(forwarded_for: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/auth/login")
        .header(header::CONTENT_TYPE, "application/json")
        .header("x-forwarded-for", forwarded_for)
        .body(Body::from(
            json!({ "email": "nobody@example.com", "password": PASSWORD }).to_string(),
        ))
        .unwrap()
}

#[tokio::test]
async fn test_auth_limit_ignores_forwarded_for_by_default() {
    let app = TestApp::with_config(|c| {
        c.rate_limit.enabled = true;
        c.rate_limit.auth_requests_per_window = 2;
    })
    .await;

    let mut statuses = Vec::new();
    for i in 0..5 {
        let (status, _) = app.send(login_from(&format!("198.51.100.{}", i))).await;
        statuses.push(status);
    }

    assert_eq!(&statuses[..2], &[StatusCode::BAD_REQUEST, StatusCode::BAD_REQUEST]);
    assert!(statuses[2..].iter().all(|s| *s == StatusCode::TOO_MANY_REQUESTS));
}

#[tokio::test]
async fn test_auth_limit_keys_on_forwarded_for_when_trusted() {
    let app = TestApp::with_config(|c| {
        c.rate_limit.enabled = true;
        c.rate_limit.auth_requests_per_window = 2;
        c.rate_limit.trust_proxy_headers = true;
    })
    .await;

    for i in 0..5 {
        let (status, _) = app.send(login_from(&format!("198.51.100.{}", i))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    let mut last = StatusCode::OK;
    for _ in 0..3 {
        last = app.send(login_from("203.0.113.9")).await.0;
    }
    assert_eq!(last, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_media_stats_include_gallery_counts() {
    let app = TestApp::new().await;
    let (alice, alice_token) = app.user("Alice", UserRole::User).await;
    let (_, bob_token) = app.user("Bob", UserRole::User).await;

    app.json("POST", "/api/galleries", Some(&alice_token), json!({ "name": "Mine" }))
        .await;
    let (_, body) = app
        .json("POST", "/api/galleries", Some(&bob_token), json!({ "name": "Bob's" }))
        .await;
    let bob_gallery = body["gallery"]["id"].as_str().unwrap().to_string();
    let (status, _) = app
        .json(
            "POST",
            &format!("/api/galleries/{}/share", bob_gallery),
            Some(&bob_token),
            json!({ "userId": alice.id }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = app.get("/api/media/stats", Some(&alice_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["stats"]["totalMedia"], 0);
    assert_eq!(body["stats"]["totalGalleries"], 1);
    assert_eq!(body["stats"]["totalSharedGalleries"], 1);
}

#[tokio::test]
async fn test_download_zip_caps_selection() {
    let app = TestApp::with_config(|c| c.uploads.max_zip_items = 2).await;
    let (_, token) = app.user("Owner", UserRole::User).await;

    let (status, body) = app
        .json(
            "POST",
            "/api/media/download-zip",
            Some(&token),
            json!({ "mediaIds": ["a", "b", "c"] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "At most 2 media can be downloaded at once");
}

#[tokio::test]
async fn test_password_reset_flow() {
    let app = TestApp::new().await;
    let (user, _) = app.user("Efua", UserRole::User).await;

    let (status, _) = app
        .json("POST", "/api/auth/forgot-password", None, json!({ "email": "ghost@example.com" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = app
        .json("POST", "/api/auth/forgot-password", None, json!({ "email": user.email }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = find_user_by_id(&app.state.db, &user.id).await.unwrap().unwrap();
    let stored_hash = stored.reset_password_token_hash.unwrap();
    assert_eq!(stored_hash.len(), 64);
    assert!(stored_hash.chars().all(|c| c.is_ascii_hexdigit()));
    assert!(stored.reset_password_expires.is_some());

    // Replace the emailed token with one this test knows
    sqlx::query("UPDATE users SET reset_password_token_hash = ? WHERE id = ?")
        .bind(hash_token("known-reset-token"))
        .bind(&user.id)
        .execute(&app.state.db)
        .await
        .unwrap();

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({ "token": "wrong-token", "newPassword": "brandnew1" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({ "token": "known-reset-token", "newPassword": "brandnew1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let stored = find_user_by_id(&app.state.db, &user.id).await.unwrap().unwrap();
    assert!(stored.reset_password_token_hash.is_none());
    assert!(stored.reset_password_expires.is_none());

    let (status, _) = app
        .json(
            "POST",
            "/api/auth/login",
            None,
            json!({ "email": user.email, "password": "brandnew1" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    // Tokens are single use
    let (status, _) = app
        .json(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({ "token": "known-reset-token", "newPassword": "another12" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    sqlx::query(
        "UPDATE users SET reset_password_token_hash = ?, reset_password_expires = ? WHERE id = ?",
    )
    .bind(hash_token("stale-token"))
    .bind(to_rfc3339(Utc::now() - Duration::minutes(1)))
    .bind(&user.id)
    .execute(&app.state.db)
    .await
    .unwrap();

    let (status, body) = app
        .json(
            "POST",
            "/api/auth/reset-password",
            None,
            json!({ "token": "stale-token", "newPassword": "another12" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid or expired reset token");
}

#[tokio::test]
async fn test_resend_otp() {
    let app = TestApp::new().await;
    let (verified, _) = app.user("Adwoa", UserRole::User).await;

    let (status, _) = app
        .json("POST", "/api/auth/resend-otp", None, json!({ "email": "ghost@example.com" }))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .json("POST", "/api/auth/resend-otp", None, json!({ "email": verified.email }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Email already verified");

    app.json(
        "POST",
        "/api/auth/register",
        None,
        json!({ "name": "Nana", "email": "nana@example.com", "password": PASSWORD }),
    )
    .await;
    sqlx::query(
        "UPDATE users SET email_verification_otp = 'stale', email_verification_expires = ? WHERE email = ?",
    )
    .bind(to_rfc3339(Utc::now() - Duration::minutes(30)))
    .bind("nana@example.com")
    .execute(&app.state.db)
    .await
    .unwrap();

    let (status, _) = app
        .json("POST", "/api/auth/resend-otp", None, json!({ "email": "nana@example.com" }))
        .await;
    assert_eq!(status, StatusCode::OK);

    let user = find_user_by_email(&app.state.db, "nana@example.com")
        .await
        .unwrap()
        .unwrap();
    let otp_hash = user.email_verification_otp.unwrap();
    assert_ne!(otp_hash, "stale");
    assert_eq!(otp_hash.len(), 64);
    assert!(!crate::utils::is_expired(
        user.email_verification_expires.as_deref(),
        Utc::now()
    ));
}

#[tokio::test]
async fn test_permanent_delete_removes_rows_and_files() {
    let app = TestApp::new().await;
    let (_, admin_token) = app.user("Admin", UserRole::Admin).await;
    let (alice, alice_token) = app.user("Alice", UserRole::User).await;
    let (bob, _) = app.user("Bob", UserRole::User).await;

    let (_, body) = app
        .json("POST", "/api/galleries", Some(&alice_token), json!({ "name": "Doomed" }))
        .await;
    let gallery_id = body["gallery"]["id"].as_str().unwrap().to_string();
    app.json(
        "POST",
        &format!("/api/galleries/{}/share", gallery_id),
        Some(&alice_token),
        json!({ "email": bob.email }),
    )
    .await;
    let (status, _) = app
        .upload(&alice_token, &[("gallery", gallery_id.as_str())], test_images::png(2, 2))
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(std::fs::read_dir(app.state.storage.dir()).unwrap().count(), 1);

    let (status, body) = app
        .json(
            "DELETE",
            &format!("/api/users/admin/{}/permanent", alice.id),
            Some(&admin_token),
            json!({}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "User permanently deleted");

    assert!(find_user_by_id(&app.state.db, &alice.id).await.unwrap().is_none());
    assert_eq!(count(&app, "SELECT COUNT(*) FROM galleries WHERE user_id = ?", &alice.id).await, 0);
    assert_eq!(count(&app, "SELECT COUNT(*) FROM media WHERE user_id = ?", &alice.id).await, 0);
    assert_eq!(
        count(&app, "SELECT COUNT(*) FROM shared_galleries WHERE gallery_id = ?", &gallery_id).await,
        0
    );
    assert_eq!(std::fs::read_dir(app.state.storage.dir()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_download_counts_and_missing_file() {
    let app = TestApp::new().await;
    let (_, token) = app.user("Owner", UserRole::User).await;
    let png = test_images::png(4, 4);

    let (_, body) = app.upload(&token, &[], png.clone()).await;
    let media_id = body["media"]["id"].as_str().unwrap().to_string();
    let filename = body["media"]["filename"].as_str().unwrap().to_string();
    let uri = format!("/api/media/{}/download", media_id);

    let request = Request::get(uri.as_str())
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers().get(header::CONTENT_TYPE).unwrap(), "image/png");
    assert_eq!(
        response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
        "attachment; filename=\"photo.png\""
    );
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(bytes.as_ref(), png.as_slice());

    let (_, body) = app.get(&format!("/api/media/{}", media_id), Some(&token)).await;
    assert_eq!(body["media"]["downloads"], 1);

    std::fs::remove_file(app.state.storage.path_for(&filename).unwrap()).unwrap();

    let (status, body) = app.get(&uri, Some(&token)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "File not found");
}

#[tokio::test]
async fn test_public_gallery_hides_private_media_from_visitors() {
    let app = TestApp::new().await;
    let (_, alice_token) = app.user("Alice", UserRole::User).await;
    let (_, bob_token) = app.user("Bob", UserRole::User).await;

    let (_, body) = app
        .json(
            "POST",
            "/api/galleries",
            Some(&alice_token),
            json!({ "name": "Open", "isPublic": true }),
        )
        .await;
    let gallery_id = body["gallery"]["id"].as_str().unwrap().to_string();

    app.upload(
        &alice_token,
        &[("gallery", gallery_id.as_str()), ("isPublic", "true"), ("title", "Shown")],
        test_images::png(2, 2),
    )
    .await;
    app.upload(
        &alice_token,
        &[("gallery", gallery_id.as_str()), ("title", "Hidden")],
        test_images::png(2, 2),
    )
    .await;

    let uri = format!("/api/media/gallery/{}", gallery_id);

    let (status, body) = app.get(&uri, Some(&bob_token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pagination"]["totalItems"], 1);
    assert_eq!(body["media"][0]["title"], "Shown");

    let (_, body) = app.get(&uri, Some(&alice_token)).await;
    assert_eq!(body["pagination"]["totalItems"], 2);
}
