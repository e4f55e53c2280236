//! Account registration, email verification, login and session tokens.
//!
//! Sessions are stateless HS256 JWTs. Every authenticated request re-reads
//! the user, so deleting or deactivating an account takes effect at once.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{request::Parts, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_otp, validate_password};
use crate::db::{
    find_live_user_by_email, find_user_by_email, find_user_by_id, insert_user, normalize_email,
    AuthResponse, CurrentUserResponse, EmailRequest, GoogleLoginRequest, LoginRequest, NewUser,
    RegisterRequest, RegisterResponse, ResetPasswordRequest, User, UserRole, UserSummary,
    VerifyEmailRequest,
};
use crate::oauth::OAuthError;
use crate::utils::{is_expired, now_rfc3339, to_rfc3339};
use crate::AppState;

/// Hash a password using Argon2
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2.hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// Verify a password against a hash
pub fn verify_password(password: &str, hash: &str) -> bool {
    let parsed_hash = match PasswordHash::new(hash) {
        Ok(h) => h,
        Err(_) => return false,
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok()
}

/// Hash a password, mapping failures to a 500
pub(crate) fn hash_password_or_500(password: &str) -> Result<String, ApiError> {
    hash_password(password).map_err(|e| {
        tracing::error!(error = %e, "Failed to hash password");
        ApiError::internal("Failed to process password")
    })
}

/// Random 32-byte token, hex encoded
pub fn generate_token() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 32] = rng.random();
    hex::encode(bytes)
}

/// SHA-256 of a secret, hex encoded, for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Six-digit one-time code
pub fn generate_otp() -> String {
    rand::rng().random_range(100_000..1_000_000u32).to_string()
}

/// Constant-time comparison of two stored hashes
fn hashes_match(a: &str, b: &str) -> bool {
    a.len() == b.len() && bool::from(a.as_bytes().ct_eq(b.as_bytes()))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
}

/// Sign a session token for `user_id`
pub fn issue_token(secret: &str, ttl_days: i64, user_id: &str) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user_id.to_string(),
        iat: now.timestamp(),
        exp: (now + Duration::days(ttl_days)).timestamp(),
    };

    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        tracing::error!(error = %e, "Failed to sign session token");
        ApiError::internal("Failed to create session")
    })
}

/// Check signature and expiry, returning the claims
pub fn decode_token(secret: &str, token: &str) -> Option<Claims> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::new(Algorithm::HS256),
    )
    .ok()
    .map(|data| data.claims)
}

fn auth_response(state: &AppState, message: &str, user: &User) -> Result<AuthResponse, ApiError> {
    let token = issue_token(
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_days,
        &user.id,
    )?;

    Ok(AuthResponse {
        message: message.to_string(),
        token,
        user: UserSummary::from(user),
    })
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Resolve a bearer token to a live, active user
async fn authenticate(state: &AppState, token: &str) -> Result<User, ApiError> {
    let claims = decode_token(&state.config.auth.jwt_secret, token)
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired token"))?;

    let user = find_user_by_id(&state.db, &claims.sub)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid token. User not found."))?;

    if user.is_deleted() {
        return Err(ApiError::unauthorized("Account has been deleted"));
    }
    if !user.is_active {
        return Err(ApiError::unauthorized("Account is deactivated"));
    }

    Ok(user)
}

/// Authenticated caller; rejects the request with 401 otherwise
pub struct AuthUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts)
            .ok_or_else(|| ApiError::unauthorized("Access denied. No token provided."))?;
        authenticate(state, token).await.map(AuthUser)
    }
}

/// Caller if a valid token was sent; anonymous otherwise
pub struct OptionalUser(pub Option<User>);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for OptionalUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(parts) else {
            return Ok(OptionalUser(None));
        };

        match authenticate(state, token).await {
            Ok(user) => Ok(OptionalUser(Some(user))),
            Err(e) if e.status() == StatusCode::UNAUTHORIZED => Ok(OptionalUser(None)),
            Err(e) => Err(e),
        }
    }
}

/// Authenticated caller with the admin role
pub struct AdminUser(pub User);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for AdminUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let AuthUser(user) = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("Access denied. Admin privileges required."));
        }
        Ok(AdminUser(user))
    }
}

/// Register a new account and email a verification code
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&req.name))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password));
    errors.finish()?;

    let email = normalize_email(&req.email);

    if let Some(existing) = find_user_by_email(&state.db, &email).await? {
        if existing.is_deleted() {
            return Err(ApiError::bad_request(
                "This email was previously used by a deleted account. Please contact an administrator to recover your account.",
            ));
        }
        return Err(ApiError::bad_request("User already exists with this email"));
    }

    let otp = generate_otp();
    let expires = to_rfc3339(Utc::now() + Duration::minutes(state.config.auth.otp_ttl_minutes));

    let user = insert_user(
        &state.db,
        NewUser {
            name: req.name.trim().to_string(),
            email: email.clone(),
            password_hash: Some(hash_password_or_500(&req.password)?),
            role: UserRole::User,
            avatar: None,
            google_id: None,
            is_email_verified: false,
            email_verification_otp: Some(hash_token(&otp)),
            email_verification_expires: Some(expires),
        },
    )
    .await?;

    info!(user_id = %user.id, "Registered new user");

    if let Err(e) = state
        .mailer
        .send_verification_otp(&user.email, &user.name, &otp, state.config.auth.otp_ttl_minutes)
        .await
    {
        warn!(user_id = %user.id, error = %e, "Failed to send verification email");
    }

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            message: "Registration successful! Please check your email for the verification code."
                .to_string(),
            requires_verification: true,
            email: user.email,
        }),
    ))
}

/// Confirm an email address with the emailed code
pub async fn verify_email(
    State(state): State<Arc<AppState>>,
    Json(req): Json<VerifyEmailRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = find_live_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.is_email_verified {
        return Err(ApiError::bad_request("Email already verified"));
    }

    let otp = req.otp.trim();
    validate_otp(otp).map_err(ApiError::bad_request)?;

    let stored = user.email_verification_otp.as_deref().ok_or_else(|| {
        ApiError::bad_request("No verification token found. Please register again.")
    })?;

    if is_expired(user.email_verification_expires.as_deref(), Utc::now()) {
        return Err(ApiError::bad_request(
            "OTP has expired. Please register again.",
        ));
    }

    if !hashes_match(stored, &hash_token(otp)) {
        return Err(ApiError::bad_request(
            "Invalid OTP. Please check your email and try again.",
        ));
    }

    sqlx::query(
        r#"
        UPDATE users
        SET is_email_verified = 1, email_verification_otp = NULL,
            email_verification_expires = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    info!(user_id = %user.id, "Email verified");

    let user = find_user_by_id(&state.db, &user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    Ok(Json(auth_response(
        &state,
        "Email verified successfully! Welcome to Media Gallery.",
        &user,
    )?))
}

/// Issue a fresh verification code
pub async fn resend_otp(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = find_live_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    if user.is_email_verified {
        return Err(ApiError::bad_request("Email already verified"));
    }

    let otp = generate_otp();
    let expires = to_rfc3339(Utc::now() + Duration::minutes(state.config.auth.otp_ttl_minutes));

    sqlx::query(
        "UPDATE users SET email_verification_otp = ?, email_verification_expires = ?, updated_at = ? WHERE id = ?",
    )
    .bind(hash_token(&otp))
    .bind(&expires)
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    state
        .mailer
        .send_verification_otp(&user.email, &user.name, &otp, state.config.auth.otp_ttl_minutes)
        .await
        .map_err(|e| {
            warn!(user_id = %user.id, error = %e, "Failed to resend verification email");
            ApiError::internal("Failed to send verification email")
        })?;

    Ok(Json(serde_json::json!({
        "message": "New verification code sent to your email."
    })))
}

/// Password login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let user = find_live_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::bad_request("Invalid credentials"))?;

    if !user.is_active {
        return Err(ApiError::bad_request("Account is deactivated"));
    }

    let password_ok = user
        .password_hash
        .as_deref()
        .map(|hash| verify_password(&req.password, hash))
        .unwrap_or(false);
    if !password_ok {
        return Err(ApiError::bad_request("Invalid credentials"));
    }

    if !user.is_email_verified {
        return Err(ApiError::bad_request("Please verify your email first"));
    }

    sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
        .bind(now_rfc3339())
        .bind(&user.id)
        .execute(&state.db)
        .await?;

    info!(user_id = %user.id, "User logged in");

    Ok(Json(auth_response(&state, "Login successful", &user)?))
}

fn google_login_error(err: OAuthError) -> ApiError {
    match err {
        OAuthError::NotConfigured => ApiError::bad_request("Google login is not enabled"),
        OAuthError::Http(e) => {
            warn!(error = %e, "Could not reach Google to verify token");
            ApiError::external("Google authentication is temporarily unavailable")
        }
        other => {
            warn!(error = %other, "Google token verification failed");
            ApiError::unauthorized("Google authentication failed")
        }
    }
}

/// Sign in with a Google ID token, creating the account on first use
pub async fn google_login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<GoogleLoginRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    let identity = state
        .google
        .verify(&req.token)
        .await
        .map_err(google_login_error)?;

    let now = now_rfc3339();

    let user = match find_user_by_email(&state.db, &identity.email).await? {
        Some(existing) if existing.is_deleted() => {
            return Err(ApiError::bad_request(
                "This email was previously used by a deleted account. Please contact an administrator to recover your account.",
            ));
        }
        Some(existing) if !existing.is_active => {
            return Err(ApiError::bad_request("Account is deactivated"));
        }
        Some(existing) => {
            sqlx::query(
                r#"
                UPDATE users
                SET google_id = ?, avatar = COALESCE(avatar, ?), is_email_verified = 1,
                    email_verification_otp = NULL, email_verification_expires = NULL,
                    last_login = ?, updated_at = ?
                WHERE id = ?
                "#,
            )
            .bind(&identity.subject)
            .bind(&identity.picture)
            .bind(&now)
            .bind(&now)
            .bind(&existing.id)
            .execute(&state.db)
            .await?;

            find_user_by_id(&state.db, &existing.id)
                .await?
                .ok_or_else(|| ApiError::not_found("User not found"))?
        }
        None => {
            let name = identity
                .name
                .clone()
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| {
                    identity
                        .email
                        .split('@')
                        .next()
                        .unwrap_or("User")
                        .to_string()
                });

            let user = insert_user(
                &state.db,
                NewUser {
                    name,
                    email: identity.email.clone(),
                    password_hash: None,
                    role: UserRole::User,
                    avatar: identity.picture.clone(),
                    google_id: Some(identity.subject.clone()),
                    is_email_verified: true,
                    email_verification_otp: None,
                    email_verification_expires: None,
                },
            )
            .await?;

            sqlx::query("UPDATE users SET last_login = ? WHERE id = ?")
                .bind(&now)
                .bind(&user.id)
                .execute(&state.db)
                .await?;

            info!(user_id = %user.id, "Created account from Google sign-in");
            user
        }
    };

    Ok(Json(auth_response(&state, "Google login successful", &user)?))
}

/// Email a password reset link
pub async fn forgot_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<EmailRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let user = find_live_user_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::not_found("User not found"))?;

    let token = generate_token();
    let expires = to_rfc3339(Utc::now() + Duration::minutes(state.config.auth.reset_ttl_minutes));

    sqlx::query(
        "UPDATE users SET reset_password_token_hash = ?, reset_password_expires = ?, updated_at = ? WHERE id = ?",
    )
    .bind(hash_token(&token))
    .bind(&expires)
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    let reset_url = format!(
        "{}/reset-password/{}",
        state.config.server.frontend_url.trim_end_matches('/'),
        token
    );

    if let Err(e) = state
        .mailer
        .send_password_reset(&user.email, &user.name, &reset_url, state.config.auth.reset_ttl_minutes)
        .await
    {
        warn!(user_id = %user.id, error = %e, "Failed to send password reset email");
        return Err(ApiError::internal("Failed to send reset email"));
    }

    Ok(Json(serde_json::json!({ "message": "Password reset email sent" })))
}

/// Set a new password using an emailed reset token
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    validate_password(&req.new_password).map_err(|e| ApiError::validation_field("newPassword", e))?;

    let token_hash = hash_token(req.token.trim());
    let user: Option<User> = sqlx::query_as(
        "SELECT * FROM users WHERE reset_password_token_hash = ? AND deleted_at IS NULL",
    )
    .bind(&token_hash)
    .fetch_optional(&state.db)
    .await?;

    let user = match user {
        Some(u) if !is_expired(u.reset_password_expires.as_deref(), Utc::now()) => u,
        _ => return Err(ApiError::bad_request("Invalid or expired reset token")),
    };

    sqlx::query(
        r#"
        UPDATE users
        SET password_hash = ?, reset_password_token_hash = NULL,
            reset_password_expires = NULL, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(hash_password_or_500(&req.new_password)?)
    .bind(now_rfc3339())
    .bind(&user.id)
    .execute(&state.db)
    .await?;

    info!(user_id = %user.id, "Password reset");

    Ok(Json(serde_json::json!({ "message": "Password reset successful" })))
}

/// Current user summary
pub async fn me(AuthUser(user): AuthUser) -> Json<CurrentUserResponse> {
    Json(CurrentUserResponse {
        user: UserSummary::from(&user),
    })
}
