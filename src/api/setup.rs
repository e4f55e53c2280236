//! First-run setup: creating the initial administrator.

use axum::{extract::State, http::StatusCode, Json};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

use super::auth::{hash_password, hash_password_or_500, issue_token};
use super::error::{ApiError, ValidationErrorBuilder};
use super::validation::{validate_email, validate_name, validate_password};
use crate::db::{
    count_admins, find_user_by_email, insert_user, normalize_email, AuthResponse, NewUser,
    UserRole, UserSummary,
};
use crate::utils::now_rfc3339;
use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetupStatusResponse {
    pub needs_setup: bool,
}

#[derive(Deserialize)]
pub struct CreateAdminRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

/// Outcome of `ensure_admin_user`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminProvision {
    Created,
    Promoted,
    AlreadyAdmin,
}

/// Make sure an admin account exists for `email`.
///
/// An existing account with that email is promoted, verified, reactivated
/// and restored if soft-deleted; its password is left untouched.
pub async fn ensure_admin_user(
    db: &SqlitePool,
    name: &str,
    email: &str,
    password: &str,
) -> anyhow::Result<AdminProvision> {
    if let Some(existing) = find_user_by_email(db, email).await? {
        if existing.is_admin()
            && existing.is_active
            && existing.is_email_verified
            && !existing.is_deleted()
        {
            return Ok(AdminProvision::AlreadyAdmin);
        }

        sqlx::query(
            r#"
            UPDATE users
            SET role = 'admin', is_active = 1, is_email_verified = 1, deleted_at = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(now_rfc3339())
        .bind(&existing.id)
        .execute(db)
        .await?;

        info!(user_id = %existing.id, "Promoted existing account to admin");
        return Ok(AdminProvision::Promoted);
    }

    let password_hash =
        hash_password(password).map_err(|e| anyhow::anyhow!("Failed to hash password: {}", e))?;

    let user = insert_user(
        db,
        NewUser {
            name: name.to_string(),
            email: normalize_email(email),
            password_hash: Some(password_hash),
            role: UserRole::Admin,
            avatar: None,
            google_id: None,
            is_email_verified: true,
            email_verification_otp: None,
            email_verification_expires: None,
        },
    )
    .await?;

    info!(user_id = %user.id, email = %user.email, "Created admin account");
    Ok(AdminProvision::Created)
}

/// Whether the instance still needs its first admin
pub async fn setup_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SetupStatusResponse>, ApiError> {
    let admins = count_admins(&state.db).await?;
    Ok(Json(SetupStatusResponse {
        needs_setup: admins == 0,
    }))
}

/// Create the first admin; refused once any admin exists
pub async fn create_admin(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateAdminRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), ApiError> {
    if count_admins(&state.db).await? > 0 {
        return Err(ApiError::forbidden("Setup has already been completed"));
    }

    let mut errors = ValidationErrorBuilder::new();
    errors
        .check("name", validate_name(&req.name))
        .check("email", validate_email(&req.email))
        .check("password", validate_password(&req.password));
    errors.finish()?;

    if find_user_by_email(&state.db, &req.email).await?.is_some() {
        return Err(ApiError::bad_request("User already exists with this email"));
    }

    let user = insert_user(
        &state.db,
        NewUser {
            name: req.name.trim().to_string(),
            email: req.email.clone(),
            password_hash: Some(hash_password_or_500(&req.password)?),
            role: UserRole::Admin,
            avatar: None,
            google_id: None,
            is_email_verified: true,
            email_verification_otp: None,
            email_verification_expires: None,
        },
    )
    .await?;

    info!(user_id = %user.id, "Created admin account during setup");

    let token = issue_token(
        &state.config.auth.jwt_secret,
        state.config.auth.token_ttl_days,
        &user.id,
    )?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "Admin account created successfully".to_string(),
            token,
            user: UserSummary::from(&user),
        }),
    ))
}
